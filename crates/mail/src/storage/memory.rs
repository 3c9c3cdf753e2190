//! In-memory storage implementation
//!
//! Used by tests and as a reference for the semantics every backend must
//! honour. Identifiers are assigned sequentially starting at 1.

use anyhow::{Result, anyhow};
use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{AttachmentRepository, ContactRepository, MessageRepository};
use crate::models::{
    Attachment, AttachmentId, Contact, ContactId, EmailAddress, Message, MessageId, NewMessage,
};

#[derive(Default)]
struct Tables {
    contacts: BTreeMap<i64, Contact>,
    /// Unique index: address -> contact id
    contacts_by_address: HashMap<String, i64>,
    attachments: BTreeMap<i64, Attachment>,
    messages: BTreeMap<i64, Message>,
    next_contact_id: i64,
    next_attachment_id: i64,
    next_message_id: i64,
}

impl Tables {
    fn next_id(counter: &mut i64) -> i64 {
        *counter += 1;
        *counter
    }

    fn sender_address(&self, message: &Message) -> Option<&str> {
        message
            .sender
            .and_then(|id| self.contacts.get(&id.0))
            .map(|c| c.address.as_str())
    }
}

/// In-memory implementation of the mail store repositories
///
/// All tables live behind one RwLock so multi-table writes are atomic.
#[derive(Default)]
pub struct InMemoryMailStore {
    tables: RwLock<Tables>,
}

impl InMemoryMailStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| anyhow!("In-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| anyhow!("In-memory store lock poisoned"))
    }
}

/// Substring match folding ASCII case only, like SQLite's LOWER and LIKE
fn contains_folded(haystack: &str, needle: &str) -> bool {
    haystack
        .to_ascii_lowercase()
        .contains(&needle.to_ascii_lowercase())
}

/// Copy of a message without its raw content, for listings
fn without_content(message: &Message) -> Message {
    Message {
        content: Vec::new(),
        ..message.clone()
    }
}

/// Sort key matching the SQLite ordering: date, then id
fn by_date(messages: &mut [Message]) {
    messages.sort_by(|a, b| a.date.cmp(&b.date).then(a.id.cmp(&b.id)));
}

impl ContactRepository for InMemoryMailStore {
    fn upsert_contact(&self, address: &EmailAddress) -> Result<Contact> {
        let mut tables = self.write()?;

        if let Some(id) = tables.contacts_by_address.get(&address.email)
            && let Some(existing) = tables.contacts.get(id)
        {
            return Ok(existing.clone());
        }

        let id = Tables::next_id(&mut tables.next_contact_id);
        let contact = Contact {
            id: ContactId(id),
            address: address.email.clone(),
            name: address.name.clone(),
        };
        tables.contacts_by_address.insert(address.email.clone(), id);
        tables.contacts.insert(id, contact.clone());
        Ok(contact)
    }

    fn get_contact(&self, id: ContactId) -> Result<Option<Contact>> {
        Ok(self.read()?.contacts.get(&id.0).cloned())
    }

    fn find_contact(&self, address: &str) -> Result<Option<Contact>> {
        let tables = self.read()?;
        Ok(tables
            .contacts_by_address
            .get(address)
            .and_then(|id| tables.contacts.get(id))
            .cloned())
    }

    fn list_contacts(&self, limit: usize, offset: usize) -> Result<Vec<Contact>> {
        let tables = self.read()?;
        let mut contacts: Vec<Contact> = tables.contacts.values().cloned().collect();
        contacts.sort_by(|a, b| a.address.cmp(&b.address));
        Ok(contacts.into_iter().skip(offset).take(limit).collect())
    }

    fn search_contacts(&self, text: &str, limit: usize) -> Result<Vec<Contact>> {
        let tables = self.read()?;
        let mut contacts: Vec<Contact> = tables
            .contacts
            .values()
            .filter(|c| {
                contains_folded(&c.address, text)
                    || c.name.as_deref().is_some_and(|n| contains_folded(n, text))
            })
            .cloned()
            .collect();
        contacts.sort_by(|a, b| a.address.cmp(&b.address));
        contacts.truncate(limit);
        Ok(contacts)
    }

    fn count_contacts(&self) -> Result<usize> {
        Ok(self.read()?.contacts.len())
    }
}

impl AttachmentRepository for InMemoryMailStore {
    fn insert_attachment(&self, filename: &str, size: u64) -> Result<Attachment> {
        let mut tables = self.write()?;
        let id = Tables::next_id(&mut tables.next_attachment_id);
        let attachment = Attachment {
            id: AttachmentId(id),
            filename: filename.to_string(),
            size,
        };
        tables.attachments.insert(id, attachment.clone());
        Ok(attachment)
    }

    fn get_attachment(&self, id: AttachmentId) -> Result<Option<Attachment>> {
        Ok(self.read()?.attachments.get(&id.0).cloned())
    }

    fn count_attachments(&self) -> Result<usize> {
        Ok(self.read()?.attachments.len())
    }
}

impl MessageRepository for InMemoryMailStore {
    fn insert_message(&self, message: NewMessage) -> Result<Message> {
        let mut tables = self.write()?;

        // Mirror the foreign key checks of the SQLite schema
        if let Some(sender) = message.sender
            && !tables.contacts.contains_key(&sender.0)
        {
            return Err(anyhow!("Unknown sender contact {}", sender));
        }
        if let Some(missing) = message
            .recipients
            .iter()
            .find(|id| !tables.contacts.contains_key(&id.0))
        {
            return Err(anyhow!("Unknown recipient contact {}", missing));
        }
        if let Some(missing) = message
            .attachments
            .iter()
            .find(|id| !tables.attachments.contains_key(&id.0))
        {
            return Err(anyhow!("Unknown attachment {}", missing));
        }

        let id = Tables::next_id(&mut tables.next_message_id);
        let stored = message.into_stored(MessageId(id));
        tables.messages.insert(id, stored.clone());
        Ok(stored)
    }

    fn get_message(&self, id: MessageId) -> Result<Option<Message>> {
        Ok(self.read()?.messages.get(&id.0).cloned())
    }

    fn get_message_content(&self, id: MessageId) -> Result<Option<Vec<u8>>> {
        Ok(self.read()?.messages.get(&id.0).map(|m| m.content.clone()))
    }

    fn list_messages(&self, limit: usize, offset: usize) -> Result<Vec<Message>> {
        let tables = self.read()?;
        let mut messages: Vec<Message> = tables.messages.values().map(without_content).collect();
        by_date(&mut messages);
        Ok(messages.into_iter().skip(offset).take(limit).collect())
    }

    fn search_messages(&self, text: &str, limit: usize) -> Result<Vec<Message>> {
        let tables = self.read()?;
        let mut messages: Vec<Message> = tables
            .messages
            .values()
            .filter(|m| {
                contains_folded(&m.subject, text)
                    || tables
                        .sender_address(m)
                        .is_some_and(|a| contains_folded(a, text))
            })
            .map(without_content)
            .collect();
        by_date(&mut messages);
        messages.truncate(limit);
        Ok(messages)
    }

    fn count_messages(&self) -> Result<usize> {
        Ok(self.read()?.messages.len())
    }
}
