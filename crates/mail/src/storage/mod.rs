//! Storage traits and implementations
//!
//! This module defines the storage abstraction layer for backed-up mail.
//! The trait-based design allows swapping between in-memory and SQLite
//! storage implementations.

mod memory;
mod sqlite;
mod traits;

pub use memory::InMemoryMailStore;
pub use sqlite::SqliteMailStore;
pub use traits::{AttachmentRepository, ContactRepository, MailStore, MessageRepository};
