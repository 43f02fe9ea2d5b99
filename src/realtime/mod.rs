pub mod conversation_list_session;
pub mod conversation_session;

pub use conversation_list_session::ConversationListSession;
pub use conversation_session::{ConversationSession, ConversationView, SessionState};
