use std::sync::Arc;

use shared::{
    domain::{Issue, ProjectId, StateId},
    workflow::WorkflowGraph,
};
use tracing::{debug, info, warn};

use crate::{
    cancel::CancelGuard, config::TransitionPolicy, error::TransitionError, store::IssueStore,
};

/// Validates and performs a single issue's state change against the remote store.
pub struct TransitionExecutor {
    store: Arc<dyn IssueStore>,
    graph: Arc<WorkflowGraph>,
    project: ProjectId,
    policy: TransitionPolicy,
}

impl TransitionExecutor {
    pub fn new(
        store: Arc<dyn IssueStore>,
        graph: Arc<WorkflowGraph>,
        project: ProjectId,
        policy: TransitionPolicy,
    ) -> Self {
        Self {
            store,
            graph,
            project,
            policy,
        }
    }

    pub fn policy(&self) -> TransitionPolicy {
        self.policy
    }

    /// Local checks performed before any remote call. The unknown-target check
    /// always runs; the graph check only under [`TransitionPolicy::ClientPrecheck`].
    pub fn precheck(&self, issue: &Issue, target: StateId) -> Result<(), TransitionError> {
        let Some(to_state) = self.graph.state(target) else {
            return Err(TransitionError::Invalid {
                reason: format!("Unknown state {target}."),
            });
        };
        if self.policy == TransitionPolicy::ClientPrecheck
            && !self.graph.can_transition(issue.state.id, target)
        {
            return Err(TransitionError::Invalid {
                reason: format!(
                    "Cannot transition from {} to {}.",
                    issue.state.name, to_state.name
                ),
            });
        }
        Ok(())
    }

    /// Moves `issue` to `target`. Returns the server's canonical issue on
    /// success; a move to the current state succeeds without a remote call.
    pub async fn execute(
        &self,
        issue: &Issue,
        target: StateId,
        cancel: &CancelGuard,
    ) -> Result<Issue, TransitionError> {
        if target == issue.state.id {
            debug!(issue = %issue.key, state = target.0, "transition: already in target state");
            return Ok(issue.clone());
        }

        self.precheck(issue, target)?;

        if cancel.is_cancelled() {
            return Err(TransitionError::Cancelled);
        }

        let mut cancel = cancel.clone();
        let result = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(issue = %issue.key, "transition: cancelled in flight");
                return Err(TransitionError::Cancelled);
            }
            result = self.store.transition_issue(self.project, &issue.key, target) => result,
        };

        match result {
            Ok(updated) => {
                info!(
                    issue = %updated.key,
                    from = issue.state.id.0,
                    requested = target.0,
                    state = updated.state.id.0,
                    "transition: confirmed"
                );
                Ok(updated)
            }
            Err(err) => {
                let err = TransitionError::from(err);
                warn!(issue = %issue.key, target = target.0, "transition: failed: {err}");
                Err(err)
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/executor_tests.rs"]
mod tests;
