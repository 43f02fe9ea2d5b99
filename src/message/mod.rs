pub mod memory_store;
pub mod message_dto;
pub mod message_handlers;
pub mod message_models;
pub mod message_repository;
pub mod message_service;
pub mod message_store;
pub mod message_subscription;

pub use memory_store::InMemoryMessageStore;
pub use message_repository::MessageRepository;
pub use message_service::MessageService;
pub use message_store::SharedMessageStore;
