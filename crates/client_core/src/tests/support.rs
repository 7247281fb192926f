//! In-memory `IssueStore` double with scripted transition replies.

use std::{
    collections::VecDeque,
    sync::atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use shared::{
    domain::{
        Issue, IssueId, IssueKey, ProjectId, StateCategory, StateId, TransitionId, Workflow,
        WorkflowId, WorkflowState, WorkflowTransition,
    },
    error::ApiError,
};
use tokio::sync::{oneshot, Mutex};

use crate::{error::StoreError, store::IssueStore};

pub(crate) const TODO: StateId = StateId(1);
pub(crate) const IN_PROGRESS: StateId = StateId(2);
pub(crate) const DONE: StateId = StateId(3);

pub(crate) fn server_stamp() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0)
        .single()
        .expect("valid timestamp")
}

pub(crate) fn workflow_state(
    id: StateId,
    name: &str,
    category: StateCategory,
    order: i32,
    is_initial: bool,
) -> WorkflowState {
    WorkflowState {
        id,
        name: name.to_string(),
        category,
        order,
        is_initial,
        created_at: None,
    }
}

/// `To Do -> In Progress -> Done`, no other edges.
pub(crate) fn linear_workflow() -> Workflow {
    let todo = workflow_state(TODO, "To Do", StateCategory::Todo, 1, true);
    let doing = workflow_state(IN_PROGRESS, "In Progress", StateCategory::InProgress, 2, false);
    let done = workflow_state(DONE, "Done", StateCategory::Done, 3, false);
    Workflow {
        id: WorkflowId(1),
        name: "Default".into(),
        transitions: vec![
            WorkflowTransition {
                id: TransitionId(1),
                from_state: todo.clone(),
                to_state: doing.clone(),
                name: "Start".into(),
                created_at: None,
            },
            WorkflowTransition {
                id: TransitionId(2),
                from_state: doing.clone(),
                to_state: done.clone(),
                name: "Finish".into(),
                created_at: None,
            },
        ],
        states: vec![todo, doing, done],
        created_at: None,
        updated_at: None,
    }
}

pub(crate) fn state_of(workflow: &Workflow, id: StateId) -> WorkflowState {
    workflow
        .states
        .iter()
        .find(|state| state.id == id)
        .cloned()
        .expect("state in workflow")
}

pub(crate) fn issue(id: i64, key: &str, state: WorkflowState) -> Issue {
    Issue {
        id: IssueId(id),
        key: IssueKey::from(key),
        state,
        sequence: Some(id),
        title: format!("Issue {key}"),
        description: String::new(),
        issue_type: Some("task".into()),
        priority: Some("medium".into()),
        created_at: None,
        updated_at: None,
        resolved_at: None,
        extra: serde_json::Map::new(),
    }
}

pub(crate) enum Reply {
    /// Persist the requested target.
    Apply,
    /// Persist a different state than requested (server-side side effect).
    ApplyAs(StateId),
    Reject(&'static str),
    Unavailable,
    /// Wait for the sender to fire (or drop), then answer with the inner reply.
    Gated(oneshot::Receiver<()>, Box<Reply>),
}

pub(crate) struct ScriptedStore {
    workflow: Workflow,
    issues: Mutex<Vec<Issue>>,
    replies: Mutex<VecDeque<Reply>>,
    transition_calls: Mutex<Vec<(IssueKey, StateId)>>,
    issue_fetches: AtomicUsize,
    fetch_gates: Mutex<VecDeque<oneshot::Receiver<()>>>,
    fail_fetches: Mutex<bool>,
    unread: Mutex<Result<u64, String>>,
}

impl ScriptedStore {
    pub(crate) fn new(workflow: Workflow, issues: Vec<Issue>) -> Self {
        Self {
            workflow,
            issues: Mutex::new(issues),
            replies: Mutex::new(VecDeque::new()),
            transition_calls: Mutex::new(Vec::new()),
            issue_fetches: AtomicUsize::new(0),
            fetch_gates: Mutex::new(VecDeque::new()),
            fail_fetches: Mutex::new(false),
            unread: Mutex::new(Ok(0)),
        }
    }

    pub(crate) async fn push_reply(&self, reply: Reply) {
        self.replies.lock().await.push_back(reply);
    }

    pub(crate) async fn transition_calls(&self) -> Vec<(IssueKey, StateId)> {
        self.transition_calls.lock().await.clone()
    }

    /// The next issue fetch copies the canonical list, then waits for the
    /// returned sender to fire (or drop) before answering.
    pub(crate) async fn hold_next_fetch(&self) -> oneshot::Sender<()> {
        let (release, gate) = oneshot::channel();
        self.fetch_gates.lock().await.push_back(gate);
        release
    }

    /// Counts fetches whose snapshot has been taken.
    pub(crate) fn issue_fetches(&self) -> usize {
        self.issue_fetches.load(Ordering::SeqCst)
    }

    pub(crate) async fn canonical_issues(&self) -> Vec<Issue> {
        self.issues.lock().await.clone()
    }

    /// Simulates another client changing the canonical store.
    pub(crate) async fn set_canonical_state(&self, key: &str, state: StateId) {
        let state = state_of(&self.workflow, state);
        let mut issues = self.issues.lock().await;
        if let Some(issue) = issues.iter_mut().find(|issue| issue.key.as_str() == key) {
            issue.state = state;
        }
    }

    pub(crate) async fn set_fail_fetches(&self, fail: bool) {
        *self.fail_fetches.lock().await = fail;
    }

    pub(crate) async fn set_unread(&self, unread: Result<u64, String>) {
        *self.unread.lock().await = unread;
    }

    async fn persist(&self, key: &IssueKey, state: StateId) -> Result<Issue, StoreError> {
        let state = state_of(&self.workflow, state);
        let mut issues = self.issues.lock().await;
        let issue = issues
            .iter_mut()
            .find(|issue| &issue.key == key)
            .ok_or_else(|| StoreError::Api(ApiError::new(404, "Not found.")))?;
        issue.resolved_at = (state.category == StateCategory::Done).then(server_stamp);
        issue.state = state;
        issue.updated_at = Some(server_stamp());
        Ok(issue.clone())
    }
}

#[async_trait]
impl IssueStore for ScriptedStore {
    async fn fetch_workflow(&self, _project: ProjectId) -> Result<Workflow, StoreError> {
        Ok(self.workflow.clone())
    }

    async fn fetch_issues(&self, _project: ProjectId) -> Result<Vec<Issue>, StoreError> {
        let result = if *self.fail_fetches.lock().await {
            Err(StoreError::Transport("connection reset".into()))
        } else {
            Ok(self.issues.lock().await.clone())
        };
        self.issue_fetches.fetch_add(1, Ordering::SeqCst);
        let gate = self.fetch_gates.lock().await.pop_front();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        result
    }

    async fn transition_issue(
        &self,
        _project: ProjectId,
        key: &IssueKey,
        to_state: StateId,
    ) -> Result<Issue, StoreError> {
        self.transition_calls
            .lock()
            .await
            .push((key.clone(), to_state));
        let mut reply = self.replies.lock().await.pop_front().unwrap_or(Reply::Apply);
        while let Reply::Gated(gate, inner) = reply {
            let _ = gate.await;
            reply = *inner;
        }
        match reply {
            Reply::Apply => self.persist(key, to_state).await,
            Reply::ApplyAs(actual) => self.persist(key, actual).await,
            Reply::Reject(message) => Err(StoreError::Api(ApiError::new(400, message))),
            Reply::Unavailable => Err(StoreError::Transport("connection refused".into())),
            Reply::Gated(..) => unreachable!("gates are unwrapped above"),
        }
    }

    async fn unread_notification_count(&self) -> Result<u64, StoreError> {
        self.unread
            .lock()
            .await
            .clone()
            .map_err(StoreError::Transport)
    }

    async fn mark_all_notifications_read(&self) -> Result<u64, StoreError> {
        let mut unread = self.unread.lock().await;
        let marked = unread.clone().map_err(StoreError::Transport)?;
        *unread = Ok(0);
        Ok(marked)
    }
}
