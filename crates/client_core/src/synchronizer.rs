//! Optimistic board synchronizer.
//!
//! Applies a move to the cached board immediately, persists it through the
//! [`TransitionExecutor`] in a background task and reconciles with whatever
//! the remote store answers. A failed move is never inverted: the whole cache
//! is discarded and rebuilt from a canonical fetch. Overlapping reloads are
//! ordered by epoch, and confirmations landing while the cache is discarded
//! are re-applied to the rebuilt one.

use std::{collections::HashMap, sync::Arc};

use shared::{
    domain::{Issue, IssueId, ProjectId, StateId, WorkflowState},
    workflow::WorkflowGraph,
};
use tokio::sync::{broadcast, oneshot, Mutex};
use tracing::{debug, info, warn};

use crate::{
    board::{BoardCache, Reconciled},
    cancel::{CancelGuard, CancelHandle},
    config::{BoardOptions, ResponseOrdering},
    error::{BoardLoadError, MoveError, TransitionError},
    executor::TransitionExecutor,
    store::IssueStore,
};

const EVENT_CAPACITY: usize = 256;

/// Notification published after every cache mutation (optimistic or
/// reconciled) and every move resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum BoardEvent {
    Loaded {
        revision: u64,
    },
    OptimisticMove {
        issue_id: IssueId,
        from: StateId,
        to: StateId,
        revision: u64,
    },
    Reconciled {
        issue_id: IssueId,
        state_id: StateId,
        revision: u64,
    },
    MoveFailed {
        issue_id: IssueId,
        error: TransitionError,
    },
    ResponseDiscarded {
        issue_id: IssueId,
    },
    Reloaded {
        revision: u64,
    },
    ReloadFailed {
        reason: String,
    },
    TornDown,
}

/// How a single move ended, as seen by the caller that issued it.
#[derive(Debug, Clone, PartialEq)]
pub enum MoveOutcome {
    /// Target equals the current state; nothing was sent.
    Unchanged,
    /// The remote store accepted the move; the cache holds this issue.
    Confirmed(Issue),
    /// The move failed and the board was rebuilt from a canonical fetch.
    /// `reload_error` is set when that fetch failed too.
    RolledBack {
        error: TransitionError,
        reload_error: Option<String>,
    },
    /// A newer move of the same issue started first; this response was dropped.
    Superseded,
    /// The board view was torn down before the response was applied.
    Cancelled,
}

/// Handle to a move whose remote call may still be in flight.
#[derive(Debug)]
pub struct PendingMove {
    issue_id: IssueId,
    state: PendingState,
}

#[derive(Debug)]
enum PendingState {
    Ready(MoveOutcome),
    Waiting(oneshot::Receiver<MoveOutcome>),
}

impl PendingMove {
    fn ready(issue_id: IssueId, outcome: MoveOutcome) -> Self {
        Self {
            issue_id,
            state: PendingState::Ready(outcome),
        }
    }

    pub fn issue_id(&self) -> IssueId {
        self.issue_id
    }

    pub async fn outcome(self) -> MoveOutcome {
        match self.state {
            PendingState::Ready(outcome) => outcome,
            PendingState::Waiting(rx) => rx.await.unwrap_or(MoveOutcome::Cancelled),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoardColumn {
    pub state: WorkflowState,
    pub issues: Vec<Issue>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoardSnapshot {
    pub revision: u64,
    /// Set while the cache is discarded and not yet rebuilt.
    pub stale: bool,
    pub columns: Vec<BoardColumn>,
}

/// Moves of one issue whose responses have not been handled yet.
#[derive(Debug, Clone, Copy)]
struct InFlight {
    latest: u64,
    pending: usize,
}

struct BoardState {
    cache: BoardCache,
    revision: u64,
    stale: bool,
    torn_down: bool,
    next_move_seq: u64,
    in_flight: HashMap<IssueId, InFlight>,
    /// Only the reload holding the newest epoch may install its fetch.
    reload_epoch: u64,
    /// Confirmations that arrived while the cache was discarded; re-applied
    /// on top of the next rebuilt cache.
    held_confirmations: HashMap<IssueId, Issue>,
}

impl BoardState {
    fn bump(&mut self) -> u64 {
        self.revision += 1;
        self.revision
    }

    fn start_move(&mut self, issue_id: IssueId) -> u64 {
        self.next_move_seq += 1;
        let seq = self.next_move_seq;
        let entry = self.in_flight.entry(issue_id).or_insert(InFlight {
            latest: seq,
            pending: 0,
        });
        entry.latest = seq;
        entry.pending += 1;
        seq
    }

    /// Marks the response for `seq` as handled. Returns whether a newer move
    /// of the same issue was started after it.
    fn settle_move(&mut self, issue_id: IssueId, seq: u64) -> bool {
        let Some(entry) = self.in_flight.get_mut(&issue_id) else {
            return false;
        };
        let superseded = entry.latest > seq;
        entry.pending = entry.pending.saturating_sub(1);
        if entry.pending == 0 {
            self.in_flight.remove(&issue_id);
        }
        superseded
    }

    /// Re-applies held confirmations unless the fetched copy is newer.
    fn apply_held_confirmations(&mut self) {
        let held: Vec<Issue> = self
            .held_confirmations
            .drain()
            .map(|(_, issue)| issue)
            .collect();
        for confirmed in held {
            let fetched_newer = self
                .cache
                .issue(confirmed.id)
                .is_some_and(|cached| cached.updated_at > confirmed.updated_at);
            if fetched_newer {
                continue;
            }
            let key = confirmed.key.clone();
            if let Reconciled::ForeignState(state_id) = self.cache.reconcile(confirmed) {
                warn!(
                    issue = %key,
                    state = state_id.0,
                    "board: held confirmation outside this workflow"
                );
            }
        }
    }
}

pub struct BoardSynchronizer {
    project: ProjectId,
    graph: Arc<WorkflowGraph>,
    store: Arc<dyn IssueStore>,
    executor: TransitionExecutor,
    options: BoardOptions,
    inner: Mutex<BoardState>,
    cancel: CancelHandle,
    events: broadcast::Sender<BoardEvent>,
}

impl BoardSynchronizer {
    /// Fetches the workflow and the canonical issue list and builds the board.
    pub async fn load(
        store: Arc<dyn IssueStore>,
        project: ProjectId,
        options: BoardOptions,
    ) -> Result<Arc<Self>, BoardLoadError> {
        let workflow = store.fetch_workflow(project).await?;
        let graph = Arc::new(WorkflowGraph::new(workflow)?);
        let issues = store.fetch_issues(project).await?;
        let cache = BoardCache::build(&graph, issues)?;
        info!(
            project = project.0,
            states = graph.workflow().states.len(),
            issues = cache.len(),
            "board: loaded"
        );
        Ok(Self::with_cache(store, project, graph, cache, options))
    }

    fn with_cache(
        store: Arc<dyn IssueStore>,
        project: ProjectId,
        graph: Arc<WorkflowGraph>,
        cache: BoardCache,
        options: BoardOptions,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let executor = TransitionExecutor::new(
            Arc::clone(&store),
            Arc::clone(&graph),
            project,
            options.transition_policy,
        );
        let board = Arc::new(Self {
            project,
            graph,
            store,
            executor,
            options,
            inner: Mutex::new(BoardState {
                cache,
                revision: 1,
                stale: false,
                torn_down: false,
                next_move_seq: 0,
                in_flight: HashMap::new(),
                reload_epoch: 0,
                held_confirmations: HashMap::new(),
            }),
            cancel: CancelHandle::new(),
            events,
        });
        let _ = board.events.send(BoardEvent::Loaded { revision: 1 });
        board
    }

    pub fn project(&self) -> ProjectId {
        self.project
    }

    pub fn graph(&self) -> &Arc<WorkflowGraph> {
        &self.graph
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BoardEvent> {
        self.events.subscribe()
    }

    pub async fn revision(&self) -> u64 {
        self.inner.lock().await.revision
    }

    pub async fn bucket(&self, state_id: StateId) -> Vec<Issue> {
        self.inner.lock().await.cache.bucket(state_id).to_vec()
    }

    pub async fn issue(&self, issue_id: IssueId) -> Option<Issue> {
        self.inner.lock().await.cache.issue(issue_id).cloned()
    }

    pub async fn snapshot(&self) -> BoardSnapshot {
        let guard = self.inner.lock().await;
        BoardSnapshot {
            revision: guard.revision,
            stale: guard.stale,
            columns: self
                .graph
                .columns()
                .map(|state| BoardColumn {
                    state: state.clone(),
                    issues: guard.cache.bucket(state.id).to_vec(),
                })
                .collect(),
        }
    }

    /// Applies the move to the cache and starts persisting it. Returns before
    /// the remote store answers; await the [`PendingMove`] for the result.
    /// Moves refused by the local precheck leave the cache untouched.
    pub async fn move_issue(
        self: &Arc<Self>,
        issue_id: IssueId,
        target: StateId,
    ) -> Result<PendingMove, MoveError> {
        let target_state = self
            .graph
            .state(target)
            .cloned()
            .ok_or_else(|| TransitionError::Invalid {
                reason: format!("Unknown state {target}."),
            })?;

        let (issue, seq, from, revision) = {
            let mut guard = self.inner.lock().await;
            if guard.torn_down {
                return Err(MoveError::TornDown);
            }
            let issue = guard
                .cache
                .issue(issue_id)
                .cloned()
                .ok_or(MoveError::IssueNotOnBoard(issue_id))?;
            if issue.state.id == target {
                debug!(issue = %issue.key, state = target.0, "board: move to current state ignored");
                return Ok(PendingMove::ready(issue_id, MoveOutcome::Unchanged));
            }
            self.executor.precheck(&issue, target)?;

            let from = guard
                .cache
                .move_to(issue_id, &target_state)
                .ok_or(MoveError::IssueNotOnBoard(issue_id))?;
            let seq = guard.start_move(issue_id);
            let revision = guard.bump();
            (issue, seq, from, revision)
        };

        debug!(
            issue = %issue.key,
            from = from.0,
            to = target.0,
            seq,
            "board: optimistic move applied"
        );
        let _ = self.events.send(BoardEvent::OptimisticMove {
            issue_id,
            from,
            to: target,
            revision,
        });

        let (tx, rx) = oneshot::channel();
        let board = Arc::clone(self);
        let cancel = self.cancel.guard();
        tokio::spawn(async move {
            let outcome = board.persist(issue, target, seq, cancel).await;
            let _ = tx.send(outcome);
        });

        Ok(PendingMove {
            issue_id,
            state: PendingState::Waiting(rx),
        })
    }

    async fn persist(
        &self,
        issue: Issue,
        target: StateId,
        seq: u64,
        cancel: CancelGuard,
    ) -> MoveOutcome {
        let result = self.executor.execute(&issue, target, &cancel).await;
        if cancel.is_cancelled() || matches!(result, Err(TransitionError::Cancelled)) {
            return MoveOutcome::Cancelled;
        }

        let mut guard = self.inner.lock().await;
        if guard.torn_down {
            return MoveOutcome::Cancelled;
        }
        let superseded = guard.settle_move(issue.id, seq);
        if self.options.response_ordering == ResponseOrdering::LatestRequest && superseded {
            drop(guard);
            debug!(issue = %issue.key, seq, "board: stale response discarded");
            let _ = self
                .events
                .send(BoardEvent::ResponseDiscarded { issue_id: issue.id });
            return MoveOutcome::Superseded;
        }

        match result {
            Ok(confirmed) => {
                if guard.stale {
                    guard
                        .held_confirmations
                        .insert(confirmed.id, confirmed.clone());
                    drop(guard);
                    debug!(
                        issue = %confirmed.key,
                        "board: confirmation held until reload completes"
                    );
                    return MoveOutcome::Confirmed(confirmed);
                }
                let reconciled = guard.cache.reconcile(confirmed.clone());
                let revision = match reconciled {
                    Reconciled::InPlace | Reconciled::Relocated { .. } => Some(guard.bump()),
                    Reconciled::Missing | Reconciled::ForeignState(_) => None,
                };
                drop(guard);

                if let Some(revision) = revision {
                    let _ = self.events.send(BoardEvent::Reconciled {
                        issue_id: confirmed.id,
                        state_id: confirmed.state.id,
                        revision,
                    });
                }
                match reconciled {
                    Reconciled::ForeignState(state_id) => {
                        warn!(
                            issue = %confirmed.key,
                            state = state_id.0,
                            "board: server placed issue outside this workflow, reloading"
                        );
                        let _ = self.reload().await;
                    }
                    Reconciled::Missing => {
                        debug!(issue = %confirmed.key, "board: confirmed issue no longer cached");
                    }
                    _ if self.options.refetch_after_confirm => {
                        let _ = self.reload().await;
                    }
                    _ => {}
                }
                MoveOutcome::Confirmed(confirmed)
            }
            Err(error) => {
                drop(guard);
                warn!(issue = %issue.key, target = target.0, "board: move failed, reloading: {error}");
                let _ = self.events.send(BoardEvent::MoveFailed {
                    issue_id: issue.id,
                    error: error.clone(),
                });
                let reload_error = self.reload().await.err().map(|err| err.to_string());
                MoveOutcome::RolledBack {
                    error,
                    reload_error,
                }
            }
        }
    }

    /// Discards the cache and rebuilds it from a canonical fetch.
    pub async fn invalidate(&self) -> Result<(), BoardLoadError> {
        self.reload().await
    }

    async fn reload(&self) -> Result<(), BoardLoadError> {
        let epoch = {
            let mut guard = self.inner.lock().await;
            if guard.torn_down {
                return Ok(());
            }
            guard.reload_epoch += 1;
            guard.cache = BoardCache::empty(&self.graph);
            guard.stale = true;
            guard.bump();
            guard.reload_epoch
        };

        let rebuilt = match self.store.fetch_issues(self.project).await {
            Ok(issues) => BoardCache::build(&self.graph, issues),
            Err(err) => Err(err.into()),
        };

        let mut guard = self.inner.lock().await;
        if guard.torn_down {
            return Ok(());
        }
        if guard.reload_epoch != epoch {
            drop(guard);
            debug!(
                project = self.project.0,
                epoch,
                "board: reload superseded by a newer one"
            );
            return Ok(());
        }
        match rebuilt {
            Ok(cache) => {
                guard.cache = cache;
                guard.apply_held_confirmations();
                guard.stale = false;
                let revision = guard.bump();
                drop(guard);
                info!(project = self.project.0, revision, "board: reloaded from store");
                let _ = self.events.send(BoardEvent::Reloaded { revision });
                Ok(())
            }
            Err(err) => {
                drop(guard);
                warn!(project = self.project.0, "board: reload failed: {err}");
                let _ = self.events.send(BoardEvent::ReloadFailed {
                    reason: err.to_string(),
                });
                Err(err)
            }
        }
    }

    /// Cancels every in-flight move. Later responses leave the cache untouched.
    pub async fn teardown(&self) {
        self.cancel.cancel();
        let mut guard = self.inner.lock().await;
        if guard.torn_down {
            return;
        }
        guard.torn_down = true;
        guard.in_flight.clear();
        guard.held_confirmations.clear();
        drop(guard);
        info!(project = self.project.0, "board: torn down");
        let _ = self.events.send(BoardEvent::TornDown);
    }
}

#[cfg(test)]
#[path = "tests/synchronizer_tests.rs"]
mod tests;
