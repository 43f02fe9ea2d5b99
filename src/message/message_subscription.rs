use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::error::Result;

use super::message_models::Message;
use super::message_store::{MessageQuery, SharedMessageStore, StoreChange};

const SNAPSHOT_BUFFER: usize = 16;

/// Full result set of the watched query at one point in time, or the error
/// that prevented reading it.
pub type SnapshotEvent = Result<Vec<Message>>;

/// Live view over one store query.
///
/// Every delivered snapshot is the complete current result set, never a
/// diff. The first snapshot is sent as soon as the subscription starts.
/// Bursts of changes that overflow the change feed collapse into a single
/// re-query.
pub struct Subscription {
    store: SharedMessageStore,
    query: MessageQuery,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(store: SharedMessageStore, query: MessageQuery) -> Self {
        Self {
            store,
            query,
            task: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Starts watching. Restarting an active subscription stops the previous
    /// watcher first.
    pub fn start(&mut self) -> mpsc::Receiver<SnapshotEvent> {
        self.stop();

        let (tx, rx) = mpsc::channel(SNAPSHOT_BUFFER);
        // Listen before the first read so nothing written in between is lost.
        let changes = self.store.changes();
        let store = self.store.clone();
        let query = self.query.clone();

        self.task = Some(tokio::spawn(run_subscription(store, query, changes, tx)));
        rx
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            tracing::debug!("Subscription on {:?} stopped", self.query);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_subscription(
    store: SharedMessageStore,
    query: MessageQuery,
    mut changes: broadcast::Receiver<StoreChange>,
    tx: mpsc::Sender<SnapshotEvent>,
) {
    if tx.send(store.query_messages(&query).await).await.is_err() {
        return;
    }

    loop {
        match changes.recv().await {
            Ok(change) if change.affects(&query) => {}
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!("Subscription on {:?} lagged by {} changes", query, skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }

        let snapshot = store.query_messages(&query).await;
        if let Err(e) = &snapshot {
            tracing::warn!("Snapshot query for {:?} failed: {}", query, e);
        }
        if tx.send(snapshot).await.is_err() {
            break;
        }
    }
}
