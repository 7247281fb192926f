//! Drag-and-drop as a three-step protocol: pick up an issue, hover a column,
//! drop. Only a drop over a column produces a move request.

use std::sync::Arc;

use shared::domain::{IssueId, StateId};
use tracing::debug;

use crate::{
    error::MoveError,
    synchronizer::{BoardSynchronizer, PendingMove},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveRequest {
    pub issue_id: IssueId,
    pub target: StateId,
}

#[derive(Debug, Default)]
pub struct DragSession {
    carried: Option<IssueId>,
    over: Option<StateId>,
}

impl DragSession {
    pub fn pick_up(&mut self, issue_id: IssueId) {
        self.carried = Some(issue_id);
        self.over = None;
    }

    pub fn hover(&mut self, container: StateId) {
        if self.carried.is_some() {
            self.over = Some(container);
        }
    }

    /// The pointer left every column; a drop now is a no-op.
    pub fn leave(&mut self) {
        self.over = None;
    }

    pub fn cancel(&mut self) {
        self.carried = None;
        self.over = None;
    }

    pub fn is_dragging(&self) -> bool {
        self.carried.is_some()
    }

    /// Ends the gesture. Yields a request only when an issue was carried
    /// over a column.
    pub fn drop_item(&mut self) -> Option<MoveRequest> {
        let issue_id = self.carried.take()?;
        let target = self.over.take()?;
        Some(MoveRequest { issue_id, target })
    }
}

/// Forwards a dropped gesture to the board.
pub async fn dispatch(
    board: &Arc<BoardSynchronizer>,
    request: MoveRequest,
) -> Result<PendingMove, MoveError> {
    debug!(
        issue_id = request.issue_id.0,
        target = request.target.0,
        "gesture: drop"
    );
    board.move_issue(request.issue_id, request.target).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    use crate::{
        config::BoardOptions,
        store::IssueStore,
        synchronizer::MoveOutcome,
        test_support::{
            issue, linear_workflow, state_of, Reply, ScriptedStore, IN_PROGRESS, TODO,
        },
    };

    #[test]
    fn drop_over_column_yields_single_request() {
        let mut drag = DragSession::default();
        drag.pick_up(IssueId(4));
        drag.hover(StateId(1));
        drag.hover(StateId(2));
        assert_eq!(
            drag.drop_item(),
            Some(MoveRequest {
                issue_id: IssueId(4),
                target: StateId(2)
            })
        );
        assert!(!drag.is_dragging());
        assert_eq!(drag.drop_item(), None);
    }

    #[test]
    fn drop_outside_any_column_is_ignored() {
        let mut drag = DragSession::default();
        drag.pick_up(IssueId(4));
        drag.hover(StateId(2));
        drag.leave();
        assert_eq!(drag.drop_item(), None);
        assert!(!drag.is_dragging());
    }

    #[test]
    fn hover_without_pick_up_does_nothing() {
        let mut drag = DragSession::default();
        drag.hover(StateId(2));
        assert_eq!(drag.drop_item(), None);
    }

    #[test]
    fn cancel_discards_gesture() {
        let mut drag = DragSession::default();
        drag.pick_up(IssueId(4));
        drag.hover(StateId(2));
        drag.cancel();
        assert_eq!(drag.drop_item(), None);
    }

    #[tokio::test]
    async fn dispatched_drop_moves_issue_once() {
        let wf = linear_workflow();
        let store = Arc::new(ScriptedStore::new(
            wf.clone(),
            vec![issue(4, "WEB-4", state_of(&wf, TODO))],
        ));
        let (release, gate) = oneshot::channel();
        store
            .push_reply(Reply::Gated(gate, Box::new(Reply::Apply)))
            .await;
        let board = BoardSynchronizer::load(
            Arc::clone(&store) as Arc<dyn IssueStore>,
            shared::domain::ProjectId(7),
            BoardOptions::default(),
        )
        .await
        .expect("board");

        let mut drag = DragSession::default();
        drag.pick_up(IssueId(4));
        drag.hover(TODO);
        drag.hover(IN_PROGRESS);
        let request = drag.drop_item().expect("drop over column");
        let pending = dispatch(&board, request).await.expect("dispatch");
        assert_eq!(drag.drop_item(), None);

        assert!(board.bucket(TODO).await.is_empty());
        let placed = board.bucket(IN_PROGRESS).await;
        assert_eq!(placed.len(), 1);
        assert_eq!(placed[0].state.id, IN_PROGRESS);

        let _ = release.send(());
        assert!(matches!(pending.outcome().await, MoveOutcome::Confirmed(_)));
        assert_eq!(store.transition_calls().await.len(), 1);
    }
}
