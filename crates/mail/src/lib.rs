//! Mail crate - Business logic for IMAP mailbox backup
//!
//! This crate provides the backup functionality behind the `mailvault` CLI:
//! - Domain models (Contact, Attachment, Message, EmailAddress)
//! - IMAP connector, enumerator and fetcher
//! - RFC 822 parsing of fetched messages
//! - Storage trait abstractions with in-memory and SQLite backends
//! - Ingest engine with per-message failure isolation
//! - Query and export API for stored messages
//!
//! This crate has zero UI dependencies.

pub mod config;
pub mod credentials;
pub mod export;
pub mod imap;
pub mod ingest;
pub mod models;
pub mod parse;
pub mod query;
pub mod storage;

pub use config::MailvaultConfig;
pub use credentials::{CredentialError, CredentialProvider, CredentialSource, Password};
pub use export::{Export, ExportError, export_messages};
pub use imap::{ImapConnector, ImapError, MailSource, RemoteId, Security, ServerSettings};
pub use ingest::{
    FetchFailurePolicy, IngestError, IngestOptions, IngestReport, ItemError, ItemFailure,
    ingest_mailbox, ingest_message, run_backup,
};
pub use models::{
    Attachment, AttachmentId, Contact, ContactId, EmailAddress, Message, MessageId, NewMessage,
};
pub use parse::{ParseError, ParsedMessage};
pub use query::{
    MessageDetail, MessageSummary, format_size, get_message_detail, list_contacts,
    list_messages, search_contacts, search_messages,
};
pub use storage::{
    AttachmentRepository, ContactRepository, InMemoryMailStore, MailStore, MessageRepository,
    SqliteMailStore,
};
