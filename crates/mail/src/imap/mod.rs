//! IMAP access: connector, enumerator and fetcher
//!
//! The ingest pipeline talks to a [`MailSource`]; [`ImapConnector`] is the
//! production implementation on top of the `imap` crate.

mod client;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub use client::ImapConnector;

/// Identifier assigned to a message by the remote store (IMAP sequence number)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RemoteId(pub u32);

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors raised by the IMAP layer
#[derive(Debug, thiserror::Error)]
pub enum ImapError {
    #[error("cannot connect to {host}:{port}: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },
    #[error("TLS setup failed: {0}")]
    Tls(#[from] native_tls::Error),
    #[error("TLS handshake with {host} failed: {message}")]
    Handshake { host: String, message: String },
    #[error("no server greeting: {0}")]
    Greeting(String),
    #[error("cannot login as {user}: {message}")]
    Login { user: String, message: String },
    #[error("cannot select mailbox {mailbox}: {message}")]
    Select { mailbox: String, message: String },
    #[error("cannot search mailbox: {0}")]
    Search(String),
    #[error("cannot fetch message {id}: {message}")]
    Fetch { id: RemoteId, message: String },
    #[error("server returned no content for message {0}")]
    EmptyFetch(RemoteId),
    #[error("logout failed: {0}")]
    Logout(String),
    #[error("session already closed")]
    Closed,
}

/// How to secure the IMAP connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Security {
    /// Implicit TLS (IMAPS)
    #[default]
    Tls,
    /// Unencrypted IMAP
    Plain,
}

impl Security {
    pub fn default_port(self) -> u16 {
        match self {
            Security::Tls => 993,
            Security::Plain => 143,
        }
    }
}

/// Default bound on connect and on every socket read or write
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Where and how to connect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub security: Security,
    pub mailbox: String,
    /// Connect timeout, also applied to each read and write on the socket
    pub timeout: Duration,
}

impl ServerSettings {
    /// Settings for `host` with the default port for `security` and INBOX
    pub fn new(host: impl Into<String>, security: Security) -> Self {
        Self {
            host: host.into(),
            port: security.default_port(),
            security,
            mailbox: "INBOX".to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// A selected mailbox that can list and fetch raw messages
pub trait MailSource {
    /// List every message identifier in the mailbox, ascending
    fn list_all(&mut self) -> Result<Vec<RemoteId>, ImapError>;

    /// Fetch the complete raw message (headers, body and attachments)
    fn fetch_raw(&mut self, id: RemoteId) -> Result<Vec<u8>, ImapError>;
}
