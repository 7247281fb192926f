use shared::{
    domain::{IssueId, IssueKey, StateId},
    error::ApiError,
    workflow::MalformedWorkflowError,
};
use thiserror::Error;

/// Failure talking to the remote issue/workflow store.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("remote store error: {0}")]
    Api(#[from] ApiError),
    #[error("remote store unreachable: {0}")]
    Transport(String),
    #[error("malformed response from remote store: {0}")]
    Decode(String),
    #[error("invalid request url: {0}")]
    Url(#[from] url::ParseError),
}

impl From<reqwest::Error> for StoreError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_decode() {
            Self::Decode(value.to_string())
        } else {
            Self::Transport(value.to_string())
        }
    }
}

/// Outcome of a refused or failed state change for a single issue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    /// Client-detected or server-reported bad target (unknown state, no edge).
    #[error("invalid transition: {reason}")]
    Invalid { reason: String },
    /// The remote store refused the change (graph, permission or business rule).
    #[error("transition rejected: {reason}")]
    Rejected { reason: String },
    /// Network failure or server-side error; the change may not have applied.
    #[error("transition unavailable: {reason}")]
    Unavailable { reason: String },
    /// The board view that issued the move was torn down.
    #[error("transition cancelled")]
    Cancelled,
}

impl TransitionError {
    /// Human-readable detail suitable for a dismissible notification.
    pub fn reason(&self) -> &str {
        match self {
            Self::Invalid { reason } | Self::Rejected { reason } | Self::Unavailable { reason } => {
                reason
            }
            Self::Cancelled => "the board was closed before the move completed",
        }
    }
}

impl From<StoreError> for TransitionError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Api(api) => match api.status {
                404 => Self::Invalid {
                    reason: api.message,
                },
                429 | 500..=599 => Self::Unavailable {
                    reason: api.message,
                },
                _ => Self::Rejected {
                    reason: api.message,
                },
            },
            StoreError::Transport(reason) | StoreError::Decode(reason) => {
                Self::Unavailable { reason }
            }
            StoreError::Url(err) => Self::Invalid {
                reason: err.to_string(),
            },
        }
    }
}

/// Blocking failure while building a board; the board cannot render.
#[derive(Debug, Clone, Error)]
pub enum BoardLoadError {
    #[error("workflow is malformed: {0}")]
    MalformedWorkflow(#[from] MalformedWorkflowError),
    #[error("issue {key} is in state {state_id}, which is not part of the project workflow")]
    ForeignState { key: IssueKey, state_id: StateId },
    #[error("failed to fetch board: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoveError {
    #[error("issue {0} is not on this board")]
    IssueNotOnBoard(IssueId),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("board view has been torn down")]
    TornDown,
}
