//! Notification feed — append-only read model over the notification table.
//!
//! Backfills once at spawn, then prepends push-delivered inserts into a
//! capacity-bounded deque. Update and delete events are ignored; entries
//! only ever age out of the back of the deque.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::FeedConfig;
use crate::domain::NotificationRecord;
use crate::store::{ChangeKind, ControlStore, WatchedTable};

const ARRIVAL_CHANNEL_CAPACITY: usize = 32;

struct FeedInner {
    entries: VecDeque<NotificationRecord>,
    capacity: usize,
}

impl FeedInner {
    fn prepend(&mut self, record: NotificationRecord) {
        if self.entries.iter().any(|e| e.id == record.id) {
            return;
        }
        self.entries.push_front(record);
        self.entries.truncate(self.capacity);
    }
}

/// Cloneable handle over the feed.
#[derive(Clone)]
pub struct NotificationFeedHandle {
    inner: Arc<Mutex<FeedInner>>,
    arrivals: broadcast::Sender<NotificationRecord>,
}

impl NotificationFeedHandle {
    fn lock(&self) -> MutexGuard<'_, FeedInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Newest-first view of the retained entries.
    pub fn recent(&self) -> Vec<NotificationRecord> {
        self.lock().entries.iter().cloned().collect()
    }

    pub fn unread_count(&self) -> usize {
        self.lock().entries.iter().filter(|e| !e.read).count()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Subscribe to entries as they arrive.
    pub fn subscribe(&self) -> broadcast::Receiver<NotificationRecord> {
        self.arrivals.subscribe()
    }

    fn deliver(&self, record: NotificationRecord) {
        self.lock().prepend(record.clone());
        let _ = self.arrivals.send(record);
    }
}

/// Guard over the listener task.
pub struct NotificationFeedRunner {
    task: Option<JoinHandle<()>>,
}

impl NotificationFeedRunner {
    pub fn shutdown(mut self) {
        self.abort();
    }

    fn abort(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for NotificationFeedRunner {
    fn drop(&mut self) {
        self.abort();
    }
}

pub struct NotificationFeed;

impl NotificationFeed {
    /// Backfill the feed, then follow the store's insert events.
    pub fn spawn(
        store: Arc<dyn ControlStore>,
        config: &FeedConfig,
    ) -> (NotificationFeedHandle, NotificationFeedRunner) {
        let (arrivals, _) = broadcast::channel(ARRIVAL_CHANNEL_CAPACITY);
        let handle = NotificationFeedHandle {
            inner: Arc::new(Mutex::new(FeedInner {
                entries: VecDeque::new(),
                capacity: config.capacity.max(1),
            })),
            arrivals,
        };

        let backfill_limit = config.backfill_limit;
        let task = {
            let handle = handle.clone();
            // Subscribe before the backfill so nothing can slip between.
            let mut changes = store.subscribe(WatchedTable::Notifications);
            tokio::spawn(async move {
                match store.fetch_notifications(backfill_limit).await {
                    Ok(rows) => {
                        let mut inner = handle.lock();
                        // Rows arrive newest-first; insert oldest-first so
                        // the deque ends up newest at the front.
                        for row in rows.into_iter().rev() {
                            inner.prepend(row);
                        }
                    }
                    Err(e) => warn!(error = %e, "notification backfill failed, starting empty"),
                }

                loop {
                    match changes.recv().await {
                        Ok(event) if event.kind == ChangeKind::Insert => {
                            match serde_json::from_value::<NotificationRecord>(event.record) {
                                Ok(record) => handle.deliver(record),
                                Err(e) => {
                                    warn!(error = %e, "undecodable notification insert, skipping")
                                }
                            }
                        }
                        // Append-only: updates and deletes never rewrite
                        // what the user already saw.
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!(missed, "notification feed lagged behind the push channel");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            debug!("notification push channel closed, feed frozen");
                            return;
                        }
                    }
                }
            })
        };

        (handle, NotificationFeedRunner { task: Some(task) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{NewNotification, NotificationKind};
    use crate::store::MemoryControlStore;
    use std::time::Duration;

    fn feed_config(capacity: usize) -> FeedConfig {
        FeedConfig {
            backfill_limit: 50,
            capacity,
        }
    }

    #[tokio::test]
    async fn backfill_then_live_inserts_newest_first() {
        let store = Arc::new(MemoryControlStore::new());
        store
            .insert_notification(NewNotification::new(
                NotificationKind::Info,
                "old",
                "backfilled",
            ))
            .await
            .expect("insert");

        let (handle, _runner) = NotificationFeed::spawn(store.clone(), &feed_config(10));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handle.len(), 1);

        store
            .insert_notification(NewNotification::new(
                NotificationKind::Warning,
                "new",
                "pushed",
            ))
            .await
            .expect("insert");
        tokio::time::sleep(Duration::from_millis(50)).await;

        let recent = handle.recent();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].title, "new");
        assert_eq!(recent[1].title, "old");
        assert_eq!(handle.unread_count(), 2);
    }

    #[tokio::test]
    async fn capacity_bounds_the_feed() {
        let store = Arc::new(MemoryControlStore::new());
        let (handle, _runner) = NotificationFeed::spawn(store.clone(), &feed_config(3));
        tokio::time::sleep(Duration::from_millis(20)).await;

        for i in 0..5 {
            store
                .insert_notification(NewNotification::new(
                    NotificationKind::Info,
                    &format!("n{i}"),
                    "msg",
                ))
                .await
                .expect("insert");
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        let recent = handle.recent();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].title, "n4");
        assert_eq!(recent[2].title, "n2");
    }

    #[tokio::test]
    async fn subscriber_sees_live_arrivals() {
        let store = Arc::new(MemoryControlStore::new());
        let (handle, _runner) = NotificationFeed::spawn(store.clone(), &feed_config(10));
        tokio::time::sleep(Duration::from_millis(20)).await;
        let mut rx = handle.subscribe();

        store
            .insert_notification(NewNotification::new(
                NotificationKind::Success,
                "filled",
                "order filled",
            ))
            .await
            .expect("insert");

        let record = tokio::time::timeout(Duration::from_millis(500), rx.recv())
            .await
            .expect("arrival within timeout")
            .expect("channel open");
        assert_eq!(record.title, "filled");
        assert_eq!(record.kind, NotificationKind::Success);
    }
}
