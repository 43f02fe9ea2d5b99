use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::conversation::conversation_service::ConversationService;
use crate::error::Result;
use crate::message::message_dto::ConversationSummary;
use crate::message::message_store::{MessageQuery, StoreChange};

pub const DEFAULT_REFRESH_DEBOUNCE: Duration = Duration::from_millis(300);

/// Upper bound on one debounce, in debounce intervals.
const MAX_DEBOUNCE_WAITS: u32 = 10;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationListView {
    pub conversations: Vec<ConversationSummary>,
    pub error: Option<String>,
    /// Number of refreshes applied so far.
    pub revision: u64,
}

impl ConversationListView {
    pub fn total_unread(&self) -> u32 {
        self.conversations.iter().map(|c| c.unread_count).sum()
    }
}

/// Keeps the conversation list of one user current. Store changes that
/// involve the user are coalesced and trigger a full rebuild once the feed
/// has been quiet for the debounce interval.
pub struct ConversationListSession {
    user_id: String,
    service: ConversationService,
    view: Arc<watch::Sender<ConversationListView>>,
    debounce: Duration,
    task: Option<JoinHandle<()>>,
}

impl ConversationListSession {
    pub fn new(user_id: &str, service: ConversationService, debounce: Duration) -> Self {
        let (view, _) = watch::channel(ConversationListView::default());
        Self {
            user_id: user_id.to_string(),
            service,
            view: Arc::new(view),
            debounce,
            task: None,
        }
    }

    pub fn watch(&self) -> watch::Receiver<ConversationListView> {
        self.view.subscribe()
    }

    pub fn conversations(&self) -> Vec<ConversationSummary> {
        self.view.borrow().conversations.clone()
    }

    pub fn total_unread(&self) -> u32 {
        self.view.borrow().total_unread()
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub async fn refresh(&self) -> Result<Vec<ConversationSummary>> {
        refresh_view(&self.service, &self.user_id, &self.view).await
    }

    /// Marks the conversation with `partner_id` read. The local unread count
    /// drops to zero right away; the store write runs in the background.
    pub fn open_conversation(&self, partner_id: &str) {
        self.service
            .read_tracker()
            .spawn_mark_read(&self.user_id, partner_id);

        self.view.send_if_modified(|view| {
            match view
                .conversations
                .iter_mut()
                .find(|c| c.id == partner_id && c.unread_count > 0)
            {
                Some(summary) => {
                    summary.unread_count = 0;
                    true
                }
                None => false,
            }
        });
    }

    pub fn start(&mut self) {
        if self.is_running() {
            return;
        }
        // Subscribe before the first build so nothing written during it is missed.
        let changes = self.service.store().changes();
        self.task = Some(tokio::spawn(run_list_session(
            changes,
            self.service.clone(),
            self.user_id.clone(),
            self.view.clone(),
            self.debounce,
        )));
        tracing::debug!("Conversation list session started for {}", self.user_id);
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            tracing::debug!("Conversation list session stopped for {}", self.user_id);
        }
    }
}

impl Drop for ConversationListSession {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn refresh_view(
    service: &ConversationService,
    user_id: &str,
    view: &watch::Sender<ConversationListView>,
) -> Result<Vec<ConversationSummary>> {
    match service.build_conversation_list(user_id).await {
        Ok(conversations) => {
            view.send_modify(|view| {
                view.conversations = conversations.clone();
                view.error = None;
                view.revision += 1;
            });
            Ok(conversations)
        }
        Err(e) => {
            // Keep showing the last good list.
            view.send_modify(|view| {
                view.error = Some(e.to_string());
                view.revision += 1;
            });
            Err(e)
        }
    }
}

async fn run_list_session(
    mut changes: broadcast::Receiver<StoreChange>,
    service: ConversationService,
    user_id: String,
    view: Arc<watch::Sender<ConversationListView>>,
    debounce: Duration,
) {
    let query = MessageQuery::Involving(user_id.clone());

    if let Err(e) = refresh_view(&service, &user_id, &view).await {
        tracing::warn!("Initial conversation list for {} failed: {}", user_id, e);
    }

    loop {
        match changes.recv().await {
            Ok(change) if change.affects(&query) => {}
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!("List session for {} lagged by {} changes", user_id, skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }

        let feed_open = settle(&mut changes, &query, debounce).await;

        if let Err(e) = refresh_view(&service, &user_id, &view).await {
            tracing::warn!("Conversation list refresh for {} failed: {}", user_id, e);
        }
        if !feed_open {
            break;
        }
    }
}

/// Swallows further changes for `query` until none arrive for `debounce`,
/// but waits at most `MAX_DEBOUNCE_WAITS` debounce intervals in total.
/// Changes that do not affect `query` never extend the wait. Returns false
/// once the feed has closed.
async fn settle(
    changes: &mut broadcast::Receiver<StoreChange>,
    query: &MessageQuery,
    debounce: Duration,
) -> bool {
    let give_up = Instant::now() + debounce * MAX_DEBOUNCE_WAITS;
    let mut quiet_until = Instant::now() + debounce;

    loop {
        match tokio::time::timeout_at(quiet_until.min(give_up), changes.recv()).await {
            Err(_) => return true,
            Ok(Ok(change)) => {
                if change.affects(query) {
                    quiet_until = Instant::now() + debounce;
                }
            }
            Ok(Err(broadcast::error::RecvError::Lagged(_))) => {
                quiet_until = Instant::now() + debounce;
            }
            Ok(Err(broadcast::error::RecvError::Closed)) => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::conversation_service::tests::{message, seed, StubProfiles};
    use crate::conversation::read_tracker::ReadTracker;
    use crate::message::memory_store::InMemoryMessageStore;
    use crate::message::message_models::NewMessage;
    use crate::message::message_store::{MessageStore, SharedMessageStore};

    const DEBOUNCE: Duration = Duration::from_millis(100);

    fn list_session(store: Arc<InMemoryMessageStore>, user: &str) -> ConversationListSession {
        let shared: SharedMessageStore = store;
        let service = ConversationService::new(
            shared.clone(),
            Arc::new(StubProfiles { failing: vec![] }),
            ReadTracker::new(shared, Duration::from_secs(2)),
            "https://media.example.com",
        );
        ConversationListSession::new(user, service, DEBOUNCE)
    }

    async fn wait_for<F>(rx: &mut watch::Receiver<ConversationListView>, predicate: F) -> ConversationListView
    where
        F: Fn(&ConversationListView) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                {
                    let view = rx.borrow_and_update();
                    if predicate(&view) {
                        return view.clone();
                    }
                }
                rx.changed().await.expect("session dropped");
            }
        })
        .await
        .expect("condition not reached")
    }

    #[tokio::test]
    async fn test_start_publishes_initial_list() {
        let store = Arc::new(InMemoryMessageStore::new());
        seed(&store, &message("bob", "alice", "hi", 100)).await;
        seed(&store, &message("carol", "alice", "yo", 200)).await;

        let mut session = list_session(store, "alice");
        let mut rx = session.watch();
        session.start();

        let view = wait_for(&mut rx, |v| v.revision >= 1).await;
        let ids: Vec<&str> = view.conversations.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["carol", "bob"]);
        assert_eq!(view.total_unread(), 2);
    }

    #[tokio::test]
    async fn test_burst_of_changes_triggers_one_refresh() {
        let store = Arc::new(InMemoryMessageStore::new());
        let mut session = list_session(store.clone(), "alice");
        let mut rx = session.watch();
        session.start();
        wait_for(&mut rx, |v| v.revision == 1).await;

        for i in 0..5 {
            store
                .append_message(NewMessage::text("bob", "alice", &format!("msg {}", i)))
                .await
                .unwrap();
        }

        let view = wait_for(&mut rx, |v| v.revision == 2).await;
        assert_eq!(view.conversations.len(), 1);
        assert_eq!(view.conversations[0].unread_count, 5);

        tokio::time::sleep(DEBOUNCE * 3).await;
        assert_eq!(rx.borrow().revision, 2);
    }

    #[tokio::test]
    async fn test_unrelated_changes_are_ignored() {
        let store = Arc::new(InMemoryMessageStore::new());
        let mut session = list_session(store.clone(), "alice");
        let mut rx = session.watch();
        session.start();
        wait_for(&mut rx, |v| v.revision == 1).await;

        store
            .append_message(NewMessage::text("carol", "dave", "not for alice"))
            .await
            .unwrap();
        tokio::time::sleep(DEBOUNCE * 3).await;
        assert_eq!(rx.borrow().revision, 1);
    }

    fn spawn_traffic(
        store: Arc<InMemoryMessageStore>,
        sender: &'static str,
        recipient: &'static str,
        every: Duration,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            for i in 0..100 {
                let _ = store
                    .append_message(NewMessage::text(sender, recipient, &format!("tick {}", i)))
                    .await;
                tokio::time::sleep(every).await;
            }
        })
    }

    #[tokio::test]
    async fn test_unrelated_traffic_does_not_delay_refresh() {
        let store = Arc::new(InMemoryMessageStore::new());
        let mut session = list_session(store.clone(), "alice");
        let mut rx = session.watch();
        session.start();
        wait_for(&mut rx, |v| v.revision == 1).await;

        store
            .append_message(NewMessage::text("bob", "alice", "hi"))
            .await
            .unwrap();
        let traffic = spawn_traffic(store.clone(), "carol", "dave", DEBOUNCE / 5);

        let view = wait_for(&mut rx, |v| v.revision >= 2).await;
        traffic.abort();
        assert_eq!(view.conversations.len(), 1);
        assert_eq!(view.conversations[0].id, "bob");
    }

    #[tokio::test]
    async fn test_steady_relevant_traffic_still_refreshes() {
        let store = Arc::new(InMemoryMessageStore::new());
        let mut session = list_session(store.clone(), "alice");
        let mut rx = session.watch();
        session.start();
        wait_for(&mut rx, |v| v.revision == 1).await;

        // Arrives faster than the debounce interval for longer than the max wait.
        let traffic = spawn_traffic(store.clone(), "bob", "alice", DEBOUNCE / 2);

        let view = wait_for(&mut rx, |v| v.revision >= 2).await;
        traffic.abort();
        assert_eq!(view.conversations.len(), 1);
        assert!(view.conversations[0].unread_count > 0);
    }

    #[tokio::test]
    async fn test_open_conversation_zeroes_unread_immediately() {
        let store = Arc::new(InMemoryMessageStore::new());
        seed(&store, &message("bob", "alice", "one", 100)).await;
        seed(&store, &message("bob", "alice", "two", 200)).await;

        let session = list_session(store.clone(), "alice");
        let list = session.refresh().await.unwrap();
        assert_eq!(list[0].unread_count, 2);

        session.open_conversation("bob");
        assert_eq!(session.total_unread(), 0);

        // A refresh racing the write still shows the conversation read.
        let list = session.refresh().await.unwrap();
        assert_eq!(list[0].unread_count, 0);
    }

    #[tokio::test]
    async fn test_refresh_failure_keeps_last_list() {
        let store = Arc::new(InMemoryMessageStore::new());
        seed(&store, &message("bob", "alice", "hi", 100)).await;

        let session = list_session(store.clone(), "alice");
        session.refresh().await.unwrap();

        store.set_fail_message_queries(true);
        assert!(session.refresh().await.is_err());

        let view = session.watch().borrow().clone();
        assert_eq!(view.conversations.len(), 1);
        assert!(view.error.is_some());
    }

    #[tokio::test]
    async fn test_stop_ends_refreshes() {
        let store = Arc::new(InMemoryMessageStore::new());
        let mut session = list_session(store.clone(), "alice");
        let mut rx = session.watch();
        session.start();
        assert!(session.is_running());
        wait_for(&mut rx, |v| v.revision == 1).await;

        session.stop();
        assert!(!session.is_running());

        store
            .append_message(NewMessage::text("bob", "alice", "late"))
            .await
            .unwrap();
        tokio::time::sleep(DEBOUNCE * 3).await;
        assert_eq!(rx.borrow().revision, 1);
    }
}
