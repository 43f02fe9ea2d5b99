use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::conversation::read_tracker::ReadTracker;
use crate::error::{AppError, Result};
use crate::message::message_dto::SendMessageRequest;
use crate::message::message_models::{Message, MessageType};
use crate::message::message_service::MessageService;
use crate::message::message_store::{subscribe, MessageQuery};
use crate::message::message_subscription::{SnapshotEvent, Subscription};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Loading,
    Live,
    Closed,
}

/// What an observer of an open conversation sees.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationView {
    pub state: SessionState,
    pub messages: Vec<Message>,
}

/// Live view of one conversation between `user_id` and `partner_id`.
///
/// `open` paints the thread from a one-shot load, then the first snapshot of
/// the store subscription takes over: every snapshot replaces the thread
/// wholesale. After `close` nothing is applied any more.
pub struct ConversationSession {
    user_id: String,
    partner_id: String,
    messages: MessageService,
    read_tracker: ReadTracker,
    view: Arc<watch::Sender<ConversationView>>,
    subscription: Option<Subscription>,
    reconcile_task: Option<JoinHandle<()>>,
    initial_message_sent: AtomicBool,
}

impl ConversationSession {
    pub fn new(
        user_id: &str,
        partner_id: &str,
        messages: MessageService,
        read_tracker: ReadTracker,
    ) -> Self {
        let (view, _) = watch::channel(ConversationView {
            state: SessionState::Idle,
            messages: Vec::new(),
        });

        Self {
            user_id: user_id.to_string(),
            partner_id: partner_id.to_string(),
            messages,
            read_tracker,
            view: Arc::new(view),
            subscription: None,
            reconcile_task: None,
            initial_message_sent: AtomicBool::new(false),
        }
    }

    pub fn partner_id(&self) -> &str {
        &self.partner_id
    }

    pub fn state(&self) -> SessionState {
        self.view.borrow().state
    }

    pub fn messages(&self) -> Vec<Message> {
        self.view.borrow().messages.clone()
    }

    pub fn watch(&self) -> watch::Receiver<ConversationView> {
        self.view.subscribe()
    }

    /// Loads the thread, marks it read in the background and starts following
    /// store changes. A failed load is returned, but the subscription keeps
    /// running and may still bring the session live.
    pub async fn open(&mut self) -> Result<()> {
        if self.state() != SessionState::Idle {
            return Err(AppError::BadRequest(
                "Conversation session already opened".to_string(),
            ));
        }
        self.view.send_modify(|view| view.state = SessionState::Loading);
        tracing::debug!(
            "Opening conversation {} <-> {}",
            self.user_id,
            self.partner_id
        );

        self.read_tracker
            .spawn_mark_read(&self.user_id, &self.partner_id);

        let query = MessageQuery::Between(self.user_id.clone(), self.partner_id.clone());
        let mut subscription = subscribe(self.messages.store(), query);
        let snapshots = subscription.start();
        self.subscription = Some(subscription);
        self.reconcile_task = Some(tokio::spawn(reconcile(
            snapshots,
            self.view.clone(),
            self.user_id.clone(),
            self.partner_id.clone(),
        )));

        let thread = self
            .messages
            .load_thread(&self.user_id, &self.partner_id)
            .await?;

        // A snapshot that arrived first is newer than this load.
        self.view.send_if_modified(|view| {
            if view.state != SessionState::Loading {
                return false;
            }
            view.messages = thread;
            true
        });
        Ok(())
    }

    pub async fn send_message(&self, mut request: SendMessageRequest) -> Result<Message> {
        if self.state() == SessionState::Closed {
            return Err(AppError::BadRequest("Conversation is closed".to_string()));
        }
        request.recipient_id = self.partner_id.clone();
        self.messages.send_message(&self.user_id, request).await
    }

    /// Sends a pre-filled first message. Fires at most once per session and
    /// only into an empty thread; later calls return `Ok(None)`.
    pub async fn send_initial_message(&self, text: &str) -> Result<Option<Message>> {
        match self.state() {
            SessionState::Loading | SessionState::Live => {}
            SessionState::Idle | SessionState::Closed => return Ok(None),
        }
        if !self.view.borrow().messages.is_empty() {
            return Ok(None);
        }
        if self.initial_message_sent.swap(true, Ordering::SeqCst) {
            return Ok(None);
        }

        let request = SendMessageRequest {
            recipient_id: self.partner_id.clone(),
            text: text.to_string(),
            image_url: None,
            image_file_name: None,
            message_type: MessageType::Text,
        };
        self.send_message(request).await.map(Some)
    }

    pub fn close(&mut self) {
        if self.state() == SessionState::Closed {
            return;
        }
        self.view.send_modify(|view| view.state = SessionState::Closed);

        if let Some(mut subscription) = self.subscription.take() {
            subscription.stop();
        }
        if let Some(task) = self.reconcile_task.take() {
            task.abort();
        }
        tracing::debug!(
            "Closed conversation {} <-> {}",
            self.user_id,
            self.partner_id
        );
    }
}

impl Drop for ConversationSession {
    fn drop(&mut self) {
        self.close();
    }
}

async fn reconcile(
    mut snapshots: mpsc::Receiver<SnapshotEvent>,
    view: Arc<watch::Sender<ConversationView>>,
    user_id: String,
    partner_id: String,
) {
    while let Some(event) = snapshots.recv().await {
        let all = match event {
            Ok(all) => all,
            Err(e) => {
                tracing::warn!(
                    "Dropping failed snapshot for {} <-> {}: {}",
                    user_id,
                    partner_id,
                    e
                );
                continue;
            }
        };

        let thread: Vec<Message> = all
            .into_iter()
            .filter(|m| m.is_between(&user_id, &partner_id))
            .collect();

        let applied = view.send_if_modified(|view| {
            if view.state == SessionState::Closed {
                return false;
            }
            view.state = SessionState::Live;
            view.messages = thread;
            true
        });
        if !applied {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::conversation::conversation_service::tests::{message, seed};
    use crate::message::memory_store::InMemoryMessageStore;
    use crate::message::message_models::NewMessage;
    use crate::message::message_store::{MessageStore, SharedMessageStore};

    fn session(store: Arc<InMemoryMessageStore>, user: &str, partner: &str) -> ConversationSession {
        let shared: SharedMessageStore = store;
        ConversationSession::new(
            user,
            partner,
            MessageService::new(shared.clone()),
            ReadTracker::new(shared, Duration::from_secs(2)),
        )
    }

    async fn wait_for<F>(rx: &mut watch::Receiver<ConversationView>, predicate: F) -> ConversationView
    where
        F: Fn(&ConversationView) -> bool,
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
    async fn test_open_loads_thread_and_goes_live() {
        let store = Arc::new(InMemoryMessageStore::new());
        seed(&store, &message("alice", "bob", "hi", 100)).await;
        seed(&store, &message("bob", "alice", "hello", 200)).await;
        seed(&store, &message("carol", "alice", "noise", 150)).await;

        let mut session = session(store.clone(), "alice", "bob");
        assert_eq!(session.state(), SessionState::Idle);
        let mut rx = session.watch();

        session.open().await.unwrap();
        let view = wait_for(&mut rx, |v| v.state == SessionState::Live).await;
        let texts: Vec<&str> = view.messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["hi", "hello"]);
    }

    #[tokio::test]
    async fn test_snapshots_replace_thread() {
        let store = Arc::new(InMemoryMessageStore::new());
        let first = message("alice", "bob", "first", 100);
        seed(&store, &first).await;

        let mut session = session(store.clone(), "alice", "bob");
        let mut rx = session.watch();
        session.open().await.unwrap();
        wait_for(&mut rx, |v| v.state == SessionState::Live).await;

        store
            .append_message(NewMessage::text("bob", "alice", "second"))
            .await
            .unwrap();
        wait_for(&mut rx, |v| v.messages.len() == 2).await;

        store.delete_message(first.id).await.unwrap();
        let view = wait_for(&mut rx, |v| v.messages.len() == 1).await;
        assert_eq!(view.messages[0].text, "second");
    }

    #[tokio::test]
    async fn test_other_conversations_do_not_touch_view() {
        let store = Arc::new(InMemoryMessageStore::new());
        seed(&store, &message("alice", "bob", "hi", 100)).await;

        let mut session = session(store.clone(), "alice", "bob");
        let mut rx = session.watch();
        session.open().await.unwrap();
        wait_for(&mut rx, |v| v.state == SessionState::Live).await;

        for text in ["one", "two", "three"] {
            store
                .append_message(NewMessage::text("carol", "dave", text))
                .await
                .unwrap();
        }
        store
            .append_message(NewMessage::text("alice", "carol", "elsewhere"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(!rx.has_changed().unwrap());
        assert_eq!(session.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_open_marks_conversation_read() {
        let store = Arc::new(InMemoryMessageStore::new());
        seed(&store, &message("bob", "alice", "hello", 200)).await;

        let mut session = session(store.clone(), "alice", "bob");
        session.open().await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let statuses = store.query_read_statuses_for_user("alice").await.unwrap();
                if statuses.iter().any(|s| s.conversation_id == "bob") {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("read status never written");
    }

    #[tokio::test]
    async fn test_mark_read_failure_does_not_block_display() {
        let store = Arc::new(InMemoryMessageStore::new());
        seed(&store, &message("bob", "alice", "hello", 200)).await;
        store.set_fail_writes(true);

        let mut session = session(store.clone(), "alice", "bob");
        let mut rx = session.watch();
        session.open().await.unwrap();
        let view = wait_for(&mut rx, |v| v.state == SessionState::Live).await;
        assert_eq!(view.messages.len(), 1);
    }

    #[tokio::test]
    async fn test_no_updates_after_close() {
        let store = Arc::new(InMemoryMessageStore::new());
        seed(&store, &message("alice", "bob", "hi", 100)).await;

        let mut session = session(store.clone(), "alice", "bob");
        let mut rx = session.watch();
        session.open().await.unwrap();
        wait_for(&mut rx, |v| v.state == SessionState::Live).await;

        session.close();
        assert_eq!(session.state(), SessionState::Closed);

        store
            .append_message(NewMessage::text("bob", "alice", "after close"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(session.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_open_twice_is_rejected() {
        let store = Arc::new(InMemoryMessageStore::new());
        let mut session = session(store, "alice", "bob");
        session.open().await.unwrap();
        assert!(matches!(session.open().await, Err(AppError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_initial_message_sent_once_into_empty_thread() {
        let store = Arc::new(InMemoryMessageStore::new());
        let mut session = session(store.clone(), "alice", "bob");
        let mut rx = session.watch();
        session.open().await.unwrap();
        wait_for(&mut rx, |v| v.state == SessionState::Live).await;

        let sent = session
            .send_initial_message("Is the room still available?")
            .await
            .unwrap();
        assert!(sent.is_some());

        // Re-running before the snapshot lands must not resend.
        assert!(session
            .send_initial_message("Is the room still available?")
            .await
            .unwrap()
            .is_none());

        let view = wait_for(&mut rx, |v| !v.messages.is_empty()).await;
        assert_eq!(view.messages.len(), 1);
        assert_eq!(view.messages[0].message_type, MessageType::Text);
    }

    #[tokio::test]
    async fn test_initial_message_skipped_for_existing_thread() {
        let store = Arc::new(InMemoryMessageStore::new());
        seed(&store, &message("bob", "alice", "earlier", 100)).await;

        let mut session = session(store.clone(), "alice", "bob");
        let mut rx = session.watch();
        session.open().await.unwrap();
        wait_for(&mut rx, |v| v.state == SessionState::Live).await;

        assert!(session.send_initial_message("hello").await.unwrap().is_none());
        assert_eq!(
            MessageService::new(store).load_thread("alice", "bob").await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_send_message_targets_partner() {
        let store = Arc::new(InMemoryMessageStore::new());
        let mut session = session(store.clone(), "alice", "bob");
        session.open().await.unwrap();

        let sent = session
            .send_message(SendMessageRequest {
                recipient_id: "someone-else".to_string(),
                text: "hi".to_string(),
                image_url: None,
                image_file_name: None,
                message_type: MessageType::Text,
            })
            .await
            .unwrap();
        assert_eq!(sent.recipient_id, "bob");

        session.close();
        let request = SendMessageRequest {
            recipient_id: "bob".to_string(),
            text: "late".to_string(),
            image_url: None,
            image_file_name: None,
            message_type: MessageType::Text,
        };
        assert!(session.send_message(request).await.is_err());
    }
}
