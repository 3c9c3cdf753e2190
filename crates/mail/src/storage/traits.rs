//! Storage trait definitions
//!
//! One repository trait per entity. The ingest pipeline and the export and
//! query helpers depend only on these traits, never on a concrete backend.

use anyhow::Result;

use crate::models::{
    Attachment, AttachmentId, Contact, ContactId, EmailAddress, Message, MessageId, NewMessage,
};

/// Contact storage operations
pub trait ContactRepository {
    /// Look up a contact by exact address, inserting it when absent
    ///
    /// Returns the existing record untouched when the address is already
    /// stored, so the first-seen display name wins. A uniqueness conflict on
    /// insert (another writer got there first) is resolved by re-reading.
    fn upsert_contact(&self, address: &EmailAddress) -> Result<Contact>;

    /// Get a contact by ID
    fn get_contact(&self, id: ContactId) -> Result<Option<Contact>>;

    /// Find a contact by exact (case-sensitive) address
    fn find_contact(&self, address: &str) -> Result<Option<Contact>>;

    /// List contacts ordered by address
    fn list_contacts(&self, limit: usize, offset: usize) -> Result<Vec<Contact>>;

    /// Search contacts whose address or display name contains `text`
    ///
    /// Matching folds ASCII case only. Results are ordered by address.
    fn search_contacts(&self, text: &str, limit: usize) -> Result<Vec<Contact>>;

    /// Count stored contacts
    fn count_contacts(&self) -> Result<usize>;
}

/// Attachment storage operations
pub trait AttachmentRepository {
    /// Insert a new attachment record unconditionally
    fn insert_attachment(&self, filename: &str, size: u64) -> Result<Attachment>;

    /// Get an attachment by ID
    fn get_attachment(&self, id: AttachmentId) -> Result<Option<Attachment>>;

    /// Count stored attachments
    fn count_attachments(&self) -> Result<usize>;
}

/// Message storage operations
pub trait MessageRepository {
    /// Insert a message together with its recipient and attachment links
    ///
    /// Referenced contacts and attachments must already exist.
    fn insert_message(&self, message: NewMessage) -> Result<Message>;

    /// Get a message by ID, including its raw content
    fn get_message(&self, id: MessageId) -> Result<Option<Message>>;

    /// Get only the raw content of a message
    fn get_message_content(&self, id: MessageId) -> Result<Option<Vec<u8>>>;

    /// List messages ordered by date ascending
    ///
    /// Returned messages carry their associations but an empty `content`.
    fn list_messages(&self, limit: usize, offset: usize) -> Result<Vec<Message>>;

    /// Search messages whose subject or sender address contains `text`
    ///
    /// Matching folds ASCII case only, so `"ÉCHANGE"` does not match
    /// `"échange"`. Results are ordered by date ascending and carry an empty
    /// `content`.
    fn search_messages(&self, text: &str, limit: usize) -> Result<Vec<Message>>;

    /// Count stored messages
    fn count_messages(&self) -> Result<usize>;
}

/// Umbrella trait for a complete mail store
///
/// Implemented automatically for any type implementing all three
/// repositories.
pub trait MailStore: ContactRepository + AttachmentRepository + MessageRepository + Send + Sync {}

impl<T> MailStore for T where
    T: ContactRepository + AttachmentRepository + MessageRepository + Send + Sync
{
}
