//! Message model representing one backed-up email

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{AttachmentId, ContactId};

/// Store-assigned identifier for a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(pub i64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An email address with optional display name, as parsed from a header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailAddress {
    /// Display name (e.g., "John Doe")
    pub name: Option<String>,
    /// Email address (e.g., "john@example.com")
    pub email: String,
}

impl EmailAddress {
    /// Create a new email address with just the email
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            name: None,
            email: email.into(),
        }
    }

    /// Create a new email address with a display name
    pub fn with_name(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            email: email.into(),
        }
    }
}

/// A stored message with its associations
///
/// The raw content is immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    /// First address of the From header, if any
    pub sender: Option<ContactId>,
    /// Contacts from the To header
    pub recipients: Vec<ContactId>,
    pub subject: String,
    pub date: DateTime<Utc>,
    pub attachments: Vec<AttachmentId>,
    /// Raw RFC 822 bytes as fetched
    #[serde(skip)]
    pub content: Vec<u8>,
}

/// A message that has not been stored yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub sender: Option<ContactId>,
    pub recipients: Vec<ContactId>,
    pub subject: String,
    pub date: DateTime<Utc>,
    pub attachments: Vec<AttachmentId>,
    pub content: Vec<u8>,
}

impl NewMessage {
    /// Create a new message builder
    pub fn builder(date: DateTime<Utc>, content: Vec<u8>) -> MessageBuilder {
        MessageBuilder::new(date, content)
    }

    /// Attach the identifier assigned by the store
    pub fn into_stored(self, id: MessageId) -> Message {
        Message {
            id,
            sender: self.sender,
            recipients: self.recipients,
            subject: self.subject,
            date: self.date,
            attachments: self.attachments,
            content: self.content,
        }
    }
}

/// Builder for creating NewMessage instances
pub struct MessageBuilder {
    sender: Option<ContactId>,
    recipients: Vec<ContactId>,
    subject: String,
    date: DateTime<Utc>,
    attachments: Vec<AttachmentId>,
    content: Vec<u8>,
}

impl MessageBuilder {
    fn new(date: DateTime<Utc>, content: Vec<u8>) -> Self {
        Self {
            sender: None,
            recipients: Vec::new(),
            subject: String::new(),
            date,
            attachments: Vec::new(),
            content,
        }
    }

    pub fn sender(mut self, sender: Option<ContactId>) -> Self {
        self.sender = sender;
        self
    }

    pub fn recipients(mut self, recipients: Vec<ContactId>) -> Self {
        self.recipients = recipients;
        self
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn attachments(mut self, attachments: Vec<AttachmentId>) -> Self {
        self.attachments = attachments;
        self
    }

    /// Build the message, collapsing repeated recipients and attachments
    pub fn build(self) -> NewMessage {
        NewMessage {
            sender: self.sender,
            recipients: dedup_preserving_order(self.recipients),
            subject: self.subject,
            date: self.date,
            attachments: dedup_preserving_order(self.attachments),
            content: self.content,
        }
    }
}

/// Associations are sets; keep the first occurrence of each id
fn dedup_preserving_order<T: PartialEq + Copy>(items: Vec<T>) -> Vec<T> {
    let mut out: Vec<T> = Vec::with_capacity(items.len());
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let date = Utc::now();
        let message = NewMessage::builder(date, b"raw".to_vec()).build();
        assert_eq!(message.sender, None);
        assert!(message.recipients.is_empty());
        assert!(message.attachments.is_empty());
        assert_eq!(message.subject, "");
        assert_eq!(message.date, date);
    }

    #[test]
    fn test_builder_collapses_repeated_recipients() {
        let message = NewMessage::builder(Utc::now(), Vec::new())
            .recipients(vec![ContactId(2), ContactId(1), ContactId(2)])
            .build();
        assert_eq!(message.recipients, vec![ContactId(2), ContactId(1)]);
    }
}
