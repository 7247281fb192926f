//! Client-side core of the issue board: workflow-governed transitions, the
//! optimistic board cache and the notification badge poller.

pub mod board;
pub mod cancel;
pub mod config;
pub mod error;
pub mod executor;
pub mod gesture;
pub mod notifications;
pub mod store;
pub mod synchronizer;

pub use board::BoardCache;
pub use cancel::{CancelGuard, CancelHandle};
pub use config::{load_settings, BoardOptions, ClientSettings, ResponseOrdering, TransitionPolicy};
pub use error::{BoardLoadError, MoveError, StoreError, TransitionError};
pub use executor::TransitionExecutor;
pub use gesture::{DragSession, MoveRequest};
pub use notifications::NotificationBadgePoller;
pub use store::{IssueStore, RestIssueStore, Session};
pub use synchronizer::{BoardEvent, BoardSnapshot, BoardSynchronizer, MoveOutcome, PendingMove};

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;
