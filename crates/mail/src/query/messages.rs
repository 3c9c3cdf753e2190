//! Message query functions

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Attachment, Contact, ContactId, Message, MessageId};
use crate::storage::MailStore;

/// Summary information for displaying a message in a list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageSummary {
    pub id: MessageId,
    pub subject: String,
    /// Sender address, if the message had a From header
    pub sender: Option<String>,
    pub date: DateTime<Utc>,
    pub recipient_count: usize,
    pub attachment_count: usize,
}

/// Full message information with resolved contacts and attachments
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDetail {
    pub id: MessageId,
    pub subject: String,
    pub date: DateTime<Utc>,
    pub sender: Option<Contact>,
    pub recipients: Vec<Contact>,
    pub attachments: Vec<Attachment>,
    /// Size of the raw message in bytes
    pub size: u64,
}

/// List messages with pagination
///
/// Returns messages sorted by date ascending (oldest first).
///
/// # Arguments
/// * `store` - The storage backend
/// * `limit` - Maximum number of messages to return
/// * `offset` - Number of messages to skip
pub fn list_messages(
    store: &dyn MailStore,
    limit: usize,
    offset: usize,
) -> Result<Vec<MessageSummary>> {
    let messages = store.list_messages(limit, offset)?;
    summarize(store, messages)
}

/// Search messages by subject or sender address
pub fn search_messages(
    store: &dyn MailStore,
    text: &str,
    limit: usize,
) -> Result<Vec<MessageSummary>> {
    let messages = store.search_messages(text, limit)?;
    summarize(store, messages)
}

/// Get a message with its sender, recipients and attachments resolved
pub fn get_message_detail(store: &dyn MailStore, id: MessageId) -> Result<Option<MessageDetail>> {
    let Some(message) = store.get_message(id)? else {
        return Ok(None);
    };

    let sender = match message.sender {
        Some(id) => store.get_contact(id)?,
        None => None,
    };

    let mut recipients = Vec::with_capacity(message.recipients.len());
    for &id in &message.recipients {
        if let Some(contact) = store.get_contact(id)? {
            recipients.push(contact);
        }
    }

    let mut attachments = Vec::with_capacity(message.attachments.len());
    for &id in &message.attachments {
        if let Some(attachment) = store.get_attachment(id)? {
            attachments.push(attachment);
        }
    }

    Ok(Some(MessageDetail {
        id: message.id,
        subject: message.subject,
        date: message.date,
        sender,
        recipients,
        attachments,
        size: message.content.len() as u64,
    }))
}

/// List contacts ordered by address
pub fn list_contacts(store: &dyn MailStore, limit: usize, offset: usize) -> Result<Vec<Contact>> {
    store.list_contacts(limit, offset)
}

/// Search contacts by address or display name
pub fn search_contacts(store: &dyn MailStore, text: &str, limit: usize) -> Result<Vec<Contact>> {
    store.search_contacts(text, limit)
}

/// Format a byte count for display, e.g. `1.2 KB`
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

fn summarize(store: &dyn MailStore, messages: Vec<Message>) -> Result<Vec<MessageSummary>> {
    // Messages in a page often share a sender
    let mut senders: Vec<(ContactId, String)> = Vec::new();

    let mut summaries = Vec::with_capacity(messages.len());
    for message in messages {
        let sender = match message.sender {
            Some(id) => match senders.iter().find(|(cached, _)| *cached == id) {
                Some((_, address)) => Some(address.clone()),
                None => {
                    let address = store.get_contact(id)?.map(|c| c.address);
                    if let Some(address) = &address {
                        senders.push((id, address.clone()));
                    }
                    address
                }
            },
            None => None,
        };

        summaries.push(MessageSummary {
            id: message.id,
            subject: message.subject,
            sender,
            date: message.date,
            recipient_count: message.recipients.len(),
            attachment_count: message.attachments.len(),
        });
    }
    Ok(summaries)
}
