//! Process-local view of a project's issues grouped by workflow state.
//!
//! Always derivable from a canonical issue fetch plus the workflow graph and
//! never persisted.

use std::collections::HashMap;

use shared::{
    domain::{Issue, IssueId, StateId, WorkflowState},
    workflow::WorkflowGraph,
};

use crate::error::BoardLoadError;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoardCache {
    buckets: HashMap<StateId, Vec<Issue>>,
}

/// Where a server-confirmed issue ended up after [`BoardCache::reconcile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    /// Same bucket, same position; fields overwritten.
    InPlace,
    /// Server state differs from the cached bucket; appended to the server's bucket.
    Relocated { from: StateId },
    /// The issue is no longer cached (e.g. the board was refetched meanwhile).
    Missing,
    /// The server placed the issue in a state this board has no column for.
    ForeignState(StateId),
}

impl BoardCache {
    /// One (possibly empty) bucket per workflow state, preserving the order of
    /// `issues` within each bucket.
    pub fn build(graph: &WorkflowGraph, issues: Vec<Issue>) -> Result<Self, BoardLoadError> {
        let mut cache = Self::empty(graph);
        for issue in issues {
            let Some(bucket) = cache.buckets.get_mut(&issue.state.id) else {
                return Err(BoardLoadError::ForeignState {
                    key: issue.key,
                    state_id: issue.state.id,
                });
            };
            bucket.push(issue);
        }
        Ok(cache)
    }

    pub fn empty(graph: &WorkflowGraph) -> Self {
        Self {
            buckets: graph
                .columns()
                .map(|state| (state.id, Vec::new()))
                .collect(),
        }
    }

    pub fn bucket(&self, state_id: StateId) -> &[Issue] {
        self.buckets
            .get(&state_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn issue(&self, issue_id: IssueId) -> Option<&Issue> {
        self.locate(issue_id)
            .map(|(state_id, position)| &self.buckets[&state_id][position])
    }

    pub fn len(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.values().all(Vec::is_empty)
    }

    fn locate(&self, issue_id: IssueId) -> Option<(StateId, usize)> {
        self.buckets.iter().find_map(|(state_id, issues)| {
            issues
                .iter()
                .position(|issue| issue.id == issue_id)
                .map(|position| (*state_id, position))
        })
    }

    /// Optimistic placement: moves the issue to the end of `target`'s bucket and
    /// sets its state to `target`. Returns the state it left, or `None` when
    /// the issue or the target bucket is unknown.
    pub fn move_to(&mut self, issue_id: IssueId, target: &WorkflowState) -> Option<StateId> {
        if !self.buckets.contains_key(&target.id) {
            return None;
        }
        let (from, position) = self.locate(issue_id)?;
        let mut issue = self.buckets.get_mut(&from)?.remove(position);
        issue.state = target.clone();
        self.buckets.entry(target.id).or_default().push(issue);
        Some(from)
    }

    /// Adopts the server's representation of an issue.
    pub fn reconcile(&mut self, confirmed: Issue) -> Reconciled {
        let target = confirmed.state.id;
        if !self.buckets.contains_key(&target) {
            return Reconciled::ForeignState(target);
        }
        let Some((from, position)) = self.locate(confirmed.id) else {
            return Reconciled::Missing;
        };

        let bucket = self.buckets.entry(from).or_default();
        if from == target {
            bucket[position] = confirmed;
            return Reconciled::InPlace;
        }
        bucket.remove(position);
        self.buckets.entry(target).or_default().push(confirmed);
        Reconciled::Relocated { from }
    }
}
