//! Periodic refresh of the unread-notification badge.
//!
//! Independent of the board: it shares only the store client and never
//! touches a board cache.

use std::{
    sync::{Arc, Mutex, PoisonError, Weak},
    time::Duration,
};

use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tracing::{debug, warn};

use crate::{error::StoreError, store::IssueStore};

pub struct NotificationBadgePoller {
    store: Arc<dyn IssueStore>,
    interval: Duration,
    count: watch::Sender<Option<u64>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl NotificationBadgePoller {
    pub fn new(store: Arc<dyn IssueStore>, interval: Duration) -> Arc<Self> {
        let (count, _) = watch::channel(None);
        Arc::new(Self {
            store,
            interval: interval.max(Duration::from_millis(1)),
            count,
            task: Mutex::new(None),
        })
    }

    /// Latest known unread count; `None` until the first successful poll.
    pub fn unread(&self) -> Option<u64> {
        *self.count.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<u64>> {
        self.count.subscribe()
    }

    pub async fn refresh_now(&self) -> Result<u64, StoreError> {
        match self.store.unread_notification_count().await {
            Ok(count) => {
                self.count.send_if_modified(|current| {
                    let changed = *current != Some(count);
                    *current = Some(count);
                    changed
                });
                Ok(count)
            }
            Err(err) => {
                warn!("notifications: unread count refresh failed: {err}");
                Err(err)
            }
        }
    }

    pub async fn mark_all_read(&self) -> Result<u64, StoreError> {
        let marked = self.store.mark_all_notifications_read().await?;
        debug!(marked, "notifications: marked all read");
        self.count.send_replace(Some(0));
        Ok(marked)
    }

    /// Starts the background loop; a second call while running is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        let poller: Weak<Self> = Arc::downgrade(self);
        let period = self.interval;
        *task = Some(tokio::spawn(async move {
            let mut ticker = time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(poller) = poller.upgrade() else {
                    break;
                };
                let _ = poller.refresh_now().await;
            }
        }));
    }

    pub fn stop(&self) {
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for NotificationBadgePoller {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
#[path = "tests/notifications_tests.rs"]
mod tests;
