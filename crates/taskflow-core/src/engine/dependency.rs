//! Dependency graph for managing job dependencies.
//!
//! Design:
//! - Forward edges: job -> jobs it depends on (waits for)
//! - Reverse edges: job -> jobs that depend on it (waiting jobs)
//! - Invariant: edges and reverse_edges are kept in sync, and every
//!   registered job has an entry in both maps (possibly empty)
//! - Invariant: the graph is acyclic; a rejected mutation changes nothing

use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use crate::domain::{JobId, JobStatus};
use crate::error::{Result, SchedulerError};

/// Where a job stands with respect to its dependencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyState {
    /// Every dependency is Completed (vacuously true with none).
    Satisfied,

    /// At least one dependency has not finished yet, and none failed.
    Waiting,

    /// At least one dependency is Failed or Blocked.
    Failed,
}

/// Dependency graph over registered jobs.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    /// Forward edges: job -> jobs it depends on.
    edges: HashMap<JobId, BTreeSet<JobId>>,

    /// Reverse edges: job -> jobs that depend on it.
    /// Enables O(1) lookup: "who is waiting for this job?"
    reverse_edges: HashMap<JobId, BTreeSet<JobId>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `job` with its dependencies.
    ///
    /// Validation happens before anything is written, so a rejected job
    /// leaves the graph as it was.
    pub fn add_job(&mut self, job: JobId, dependencies: impl IntoIterator<Item = JobId>) -> Result<()> {
        let dependencies: BTreeSet<JobId> = dependencies.into_iter().collect();

        if self.contains(&job) {
            return Err(SchedulerError::DuplicateJob(job));
        }
        if dependencies.contains(&job) {
            return Err(SchedulerError::CyclicDependency {
                path: vec![job.clone(), job.clone()],
                job,
            });
        }
        if let Some(unknown) = dependencies.iter().find(|dep| !self.contains(dep)) {
            return Err(SchedulerError::UnknownDependency {
                dependency: unknown.clone(),
                job,
            });
        }
        // Adding job -> dep closes a cycle iff dep already reaches job.
        for dep in &dependencies {
            if let Some(back) = self.path_between(dep, &job) {
                let mut path = Vec::with_capacity(back.len() + 1);
                path.push(job.clone());
                path.extend(back);
                return Err(SchedulerError::CyclicDependency { job, path });
            }
        }

        for dep in &dependencies {
            self.reverse_edges
                .entry(dep.clone())
                .or_default()
                .insert(job.clone());
        }
        self.reverse_edges.entry(job.clone()).or_default();
        self.edges.insert(job, dependencies);
        Ok(())
    }

    /// Remove a job once nothing live depends on it.
    ///
    /// Dependents that are terminal (or already disposed) do not hold the job
    /// in place; their forward edge to it is dropped too, so no edge is left
    /// dangling.
    pub fn remove_job<F>(&mut self, job: &JobId, status_of: F) -> Result<()>
    where
        F: Fn(&JobId) -> Option<JobStatus>,
    {
        let Some(dependents) = self.reverse_edges.get(job) else {
            return Err(SchedulerError::JobNotFound(job.clone()));
        };
        let live: Vec<JobId> = dependents
            .iter()
            .filter(|&d| status_of(d).is_some_and(|s| !s.is_terminal()))
            .cloned()
            .collect();
        if !live.is_empty() {
            return Err(SchedulerError::DependentsExist {
                job: job.clone(),
                dependents: live,
            });
        }

        let dependents = self.reverse_edges.remove(job).unwrap_or_default();
        for dependent in &dependents {
            if let Some(deps) = self.edges.get_mut(dependent) {
                deps.remove(job);
            }
        }
        for dep in self.edges.remove(job).unwrap_or_default() {
            if let Entry::Occupied(mut e) = self.reverse_edges.entry(dep) {
                e.get_mut().remove(job);
            }
        }
        Ok(())
    }

    pub fn contains(&self, job: &JobId) -> bool {
        self.edges.contains_key(job)
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Jobs that `job` waits for. `None` if `job` is not registered.
    pub fn dependencies_of(&self, job: &JobId) -> Option<&BTreeSet<JobId>> {
        self.edges.get(job)
    }

    /// Jobs waiting for `job`. `None` if `job` is not registered.
    pub fn dependents_of(&self, job: &JobId) -> Option<&BTreeSet<JobId>> {
        self.reverse_edges.get(job)
    }

    /// True iff every dependency of `job` is Completed.
    pub fn is_satisfied<F>(&self, job: &JobId, status_of: F) -> bool
    where
        F: Fn(&JobId) -> Option<JobStatus>,
    {
        self.edges.get(job).is_some_and(|deps| {
            deps.iter()
                .all(|dep| status_of(dep) == Some(JobStatus::Completed))
        })
    }

    /// True iff any dependency of `job` is Failed or Blocked.
    pub fn has_failed_dependency<F>(&self, job: &JobId, status_of: F) -> bool
    where
        F: Fn(&JobId) -> Option<JobStatus>,
    {
        self.edges.get(job).is_some_and(|deps| {
            deps.iter()
                .any(|dep| status_of(dep).is_some_and(JobStatus::is_failure))
        })
    }

    /// Combined view; a failed dependency wins over an unfinished one.
    pub fn dependency_state<F>(&self, job: &JobId, status_of: F) -> DependencyState
    where
        F: Fn(&JobId) -> Option<JobStatus>,
    {
        if self.has_failed_dependency(job, &status_of) {
            DependencyState::Failed
        } else if self.is_satisfied(job, &status_of) {
            DependencyState::Satisfied
        } else {
            DependencyState::Waiting
        }
    }

    /// Every transitive dependent of `job`, breadth first, each once.
    pub fn downstream_of(&self, job: &JobId) -> Vec<JobId> {
        let mut visited = HashSet::new();
        let mut order = Vec::new();
        let mut queue: VecDeque<&JobId> =
            self.reverse_edges.get(job).into_iter().flatten().collect();

        while let Some(next) = queue.pop_front() {
            if !visited.insert(next) {
                continue;
            }
            order.push(next.clone());
            queue.extend(self.reverse_edges.get(next).into_iter().flatten());
        }
        order
    }

    /// Path `from -> ... -> to` along dependency edges, if `from` depends on
    /// `to` (directly or transitively).
    pub fn path_between(&self, from: &JobId, to: &JobId) -> Option<Vec<JobId>> {
        let mut prev: HashMap<&JobId, &JobId> = HashMap::new();
        let mut visited: HashSet<&JobId> = HashSet::from([from]);
        let mut stack = vec![from];

        while let Some(node) = stack.pop() {
            if node == to {
                return Some(follow_path(from, node, &prev));
            }
            for dep in self.edges.get(node).into_iter().flatten() {
                if visited.insert(dep) {
                    prev.insert(dep, node);
                    stack.push(dep);
                }
            }
        }
        None
    }
}

fn follow_path(from: &JobId, end: &JobId, prev: &HashMap<&JobId, &JobId>) -> Vec<JobId> {
    let mut path = vec![end.clone()];
    let mut current = end;
    while current != from {
        match prev.get(current) {
            Some(&p) => {
                path.push(p.clone());
                current = p;
            }
            None => break,
        }
    }
    path.reverse();
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> JobId {
        JobId::new(s)
    }

    fn ids(list: &[&str]) -> Vec<JobId> {
        list.iter().map(|s| id(s)).collect()
    }

    fn set(list: &[&str]) -> BTreeSet<JobId> {
        list.iter().map(|s| id(s)).collect()
    }

    fn statuses(pairs: &[(&str, JobStatus)]) -> impl Fn(&JobId) -> Option<JobStatus> + use<> {
        let map: HashMap<JobId, JobStatus> =
            pairs.iter().map(|(k, v)| (id(k), *v)).collect();
        move |job: &JobId| map.get(job).copied()
    }

    /// a <- b <- c, plus a <- c.
    fn chain() -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        graph.add_job(id("a"), []).unwrap();
        graph.add_job(id("b"), ids(&["a"])).unwrap();
        graph.add_job(id("c"), ids(&["a", "b"])).unwrap();
        graph
    }

    #[test]
    fn new_graph_is_empty() {
        let graph = DependencyGraph::new();
        assert!(graph.is_empty());
        assert!(graph.dependencies_of(&id("a")).is_none());
    }

    #[test]
    fn add_job_creates_forward_and_reverse_edges() {
        let graph = chain();
        assert_eq!(
            graph.dependencies_of(&id("c")).unwrap(),
            &set(&["a", "b"])
        );
        assert_eq!(
            graph.dependents_of(&id("a")).unwrap(),
            &set(&["b", "c"])
        );
        assert!(graph.dependents_of(&id("c")).unwrap().is_empty());
        assert_eq!(graph.len(), 3);
    }

    #[test]
    fn rejects_unknown_dependency_and_leaves_graph_unchanged() {
        let mut graph = chain();
        let err = graph.add_job(id("d"), ids(&["a", "zzz"])).unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::UnknownDependency { ref job, ref dependency }
                if *job == id("d") && *dependency == id("zzz")
        ));
        assert!(!graph.contains(&id("d")));
        assert!(!graph.dependents_of(&id("a")).unwrap().contains("d"));
    }

    #[test]
    fn rejects_self_dependency_as_cycle() {
        let mut graph = DependencyGraph::new();
        let err = graph.add_job(id("a"), ids(&["a"])).unwrap_err();
        match err {
            SchedulerError::CyclicDependency { job, path } => {
                assert_eq!(job, id("a"));
                assert_eq!(path, ids(&["a", "a"]));
            }
            other => panic!("expected cycle, got {other:?}"),
        }
        assert!(graph.is_empty());
    }

    #[test]
    fn rejects_duplicate_registration() {
        let mut graph = chain();
        let err = graph.add_job(id("b"), []).unwrap_err();
        assert!(matches!(err, SchedulerError::DuplicateJob(ref j) if *j == id("b")));
        assert_eq!(
            graph.dependencies_of(&id("b")).unwrap(),
            &set(&["a"])
        );
    }

    #[test]
    fn path_between_follows_dependency_edges() {
        let mut graph = chain();
        graph.add_job(id("d"), ids(&["c"])).unwrap();
        let path = graph.path_between(&id("d"), &id("a")).unwrap();
        assert_eq!(path.first(), Some(&id("d")));
        assert_eq!(path.last(), Some(&id("a")));
        assert!(graph.path_between(&id("a"), &id("d")).is_none());
    }

    #[test]
    fn diamond_is_not_a_cycle() {
        let mut graph = DependencyGraph::new();
        graph.add_job(id("a"), []).unwrap();
        graph.add_job(id("b"), ids(&["a"])).unwrap();
        graph.add_job(id("c"), ids(&["a"])).unwrap();
        graph.add_job(id("d"), ids(&["b", "c"])).unwrap();
        assert_eq!(graph.downstream_of(&id("a")).len(), 3);
    }

    #[test]
    fn downstream_visits_each_dependent_once() {
        let mut graph = DependencyGraph::new();
        //     a
        //    / \
        //   b   c
        //   |\ /|
        //   | X |
        //   |/ \|
        //   d   e
        graph.add_job(id("a"), []).unwrap();
        graph.add_job(id("b"), ids(&["a"])).unwrap();
        graph.add_job(id("c"), ids(&["a"])).unwrap();
        graph.add_job(id("d"), ids(&["b", "c"])).unwrap();
        graph.add_job(id("e"), ids(&["b", "c"])).unwrap();

        let downstream = graph.downstream_of(&id("a"));
        assert_eq!(downstream.len(), 4);
        let unique: HashSet<_> = downstream.iter().collect();
        assert_eq!(unique.len(), 4);
        assert!(graph.downstream_of(&id("d")).is_empty());
    }

    #[test]
    fn satisfaction_requires_every_dependency_completed() {
        let graph = chain();
        let lookup = statuses(&[("a", JobStatus::Completed), ("b", JobStatus::Running)]);
        assert!(graph.is_satisfied(&id("b"), &lookup));
        assert!(!graph.is_satisfied(&id("c"), &lookup));
        assert!(graph.is_satisfied(&id("a"), &lookup));
        assert_eq!(graph.dependency_state(&id("c"), &lookup), DependencyState::Waiting);
    }

    #[test]
    fn failed_or_blocked_dependency_is_detected() {
        let graph = chain();
        for status in [JobStatus::Failed, JobStatus::Blocked] {
            let lookup = statuses(&[("a", JobStatus::Completed), ("b", status)]);
            assert!(graph.has_failed_dependency(&id("c"), &lookup));
            assert_eq!(graph.dependency_state(&id("c"), &lookup), DependencyState::Failed);
        }
        let lookup = statuses(&[("a", JobStatus::Completed), ("b", JobStatus::Completed)]);
        assert_eq!(graph.dependency_state(&id("c"), &lookup), DependencyState::Satisfied);
    }

    #[test]
    fn remove_refuses_while_dependents_are_live() {
        let mut graph = chain();
        let lookup = statuses(&[
            ("a", JobStatus::Completed),
            ("b", JobStatus::Ready),
            ("c", JobStatus::Pending),
        ]);
        let err = graph.remove_job(&id("a"), &lookup).unwrap_err();
        match err {
            SchedulerError::DependentsExist { job, dependents } => {
                assert_eq!(job, id("a"));
                assert_eq!(dependents, ids(&["b", "c"]));
            }
            other => panic!("expected DependentsExist, got {other:?}"),
        }
        assert!(graph.contains(&id("a")));
    }

    #[test]
    fn remove_clears_both_directions() {
        let mut graph = chain();
        let lookup = statuses(&[
            ("a", JobStatus::Failed),
            ("b", JobStatus::Blocked),
            ("c", JobStatus::Blocked),
        ]);
        graph.remove_job(&id("b"), &lookup).unwrap();

        assert!(!graph.contains(&id("b")));
        assert!(!graph.dependents_of(&id("a")).unwrap().contains("b"));
        assert!(!graph.dependencies_of(&id("c")).unwrap().contains("b"));
        assert_eq!(graph.downstream_of(&id("a")), ids(&["c"]));
    }

    #[test]
    fn remove_unknown_job_fails() {
        let mut graph = DependencyGraph::new();
        let err = graph.remove_job(&id("ghost"), |_| None).unwrap_err();
        assert!(matches!(err, SchedulerError::JobNotFound(_)));
    }
}
