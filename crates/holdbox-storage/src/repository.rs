//! Repository layer for data access

pub mod messages;

// Re-export concrete repository implementations with simple names
pub use messages::DbMessageRepository as MessageRepository;

// Re-export repository traits
pub use messages::MessageRepository as MessageRepositoryTrait;
