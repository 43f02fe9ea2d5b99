pub mod conversation_handlers;
pub mod conversation_service;
pub mod read_tracker;

pub use conversation_service::ConversationService;
pub use read_tracker::ReadTracker;
