//! Teardown signal shared between a board view and its in-flight moves.

use tokio::sync::watch;

/// Owning side; held by the board view.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

/// Observing side; threaded through `TransitionExecutor::execute`.
#[derive(Debug, Clone)]
pub struct CancelGuard {
    rx: watch::Receiver<bool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    pub fn guard(&self) -> CancelGuard {
        CancelGuard {
            rx: self.tx.subscribe(),
        }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelGuard {
    /// A guard that is never cancelled, for callers outside a board view.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested. Pends forever if the owning
    /// handle is dropped without cancelling.
    pub async fn cancelled(&mut self) {
        if self.rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn guard_observes_cancel() {
        let handle = CancelHandle::new();
        let mut guard = handle.guard();
        assert!(!guard.is_cancelled());

        handle.cancel();
        tokio::time::timeout(Duration::from_secs(1), guard.cancelled())
            .await
            .expect("cancelled resolves");
        assert!(guard.is_cancelled());
        assert!(handle.is_cancelled());
    }

    #[tokio::test]
    async fn never_guard_does_not_resolve() {
        let mut guard = CancelGuard::never();
        let waited = tokio::time::timeout(Duration::from_millis(50), guard.cancelled()).await;
        assert!(waited.is_err());
        assert!(!guard.is_cancelled());
    }
}
