//! SQLite-based mail storage with zstd-compressed raw message content

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, SecondsFormat, Utc};
use log::debug;
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, params};
use rusqlite_migration::{M, Migrations};

use super::traits::{AttachmentRepository, ContactRepository, MessageRepository};
use crate::models::{
    Attachment, AttachmentId, Contact, ContactId, EmailAddress, Message, MessageId, NewMessage,
};

/// zstd level for message content (3 = good balance of speed vs compression)
const CONTENT_COMPRESSION_LEVEL: i32 = 3;

/// Database migrations
///
/// Each migration is applied in order. The user_version pragma tracks which
/// migrations have been applied.
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        // Migration 1: Initial schema
        M::up(
            r#"
            -- Contacts, unique by exact address (BINARY collation)
            CREATE TABLE contacts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                address TEXT NOT NULL UNIQUE,
                name TEXT
            );

            -- One row per attachment occurrence, never deduplicated
            CREATE TABLE attachments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                filename TEXT NOT NULL,
                size INTEGER NOT NULL CHECK (size >= 0)
            );

            -- Messages with zstd-compressed raw content
            CREATE TABLE messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                sender_id INTEGER,
                subject TEXT NOT NULL,
                date TEXT NOT NULL,
                content BLOB NOT NULL,
                FOREIGN KEY (sender_id) REFERENCES contacts(id) ON DELETE CASCADE
            );

            CREATE INDEX idx_messages_date ON messages(date ASC);
            CREATE INDEX idx_messages_sender ON messages(sender_id);

            -- Recipients (many-to-many)
            CREATE TABLE message_recipients (
                message_id INTEGER NOT NULL,
                contact_id INTEGER NOT NULL,
                position INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (message_id, contact_id),
                FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE,
                FOREIGN KEY (contact_id) REFERENCES contacts(id) ON DELETE CASCADE
            );

            -- Attachments on messages (many-to-many)
            CREATE TABLE message_attachments (
                message_id INTEGER NOT NULL,
                attachment_id INTEGER NOT NULL,
                position INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (message_id, attachment_id),
                FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE,
                FOREIGN KEY (attachment_id) REFERENCES attachments(id) ON DELETE CASCADE
            );
            "#,
        ),
    ])
}

/// SQLite-based mail storage
///
/// Runs in WAL mode so a browsing process can read while an ingest run
/// writes.
pub struct SqliteMailStore {
    conn: Mutex<Connection>,
}

impl SqliteMailStore {
    /// Open (or create) a SQLite mail store at `db_path` and migrate it
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;
        Self::from_connection(conn)
    }

    /// Create a store backed by a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::from_connection(conn)
    }

    fn from_connection(mut conn: Connection) -> Result<Self> {
        // WAL lets readers proceed while the ingest run writes; foreign_keys
        // is required for ON DELETE CASCADE and association checks.
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            PRAGMA foreign_keys = ON;
            "#,
        )?;
        conn.busy_timeout(Duration::from_secs(5))?;

        migrations()
            .to_latest(&mut conn)
            .context("Failed to run database migrations")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("SQLite connection lock poisoned"))
    }

    fn find_contact_with(conn: &Connection, address: &str) -> Result<Option<Contact>> {
        let contact = conn
            .query_row(
                "SELECT id, address, name FROM contacts WHERE address = ?",
                [address],
                contact_from_row,
            )
            .optional()?;
        Ok(contact)
    }

    /// Load recipient contact ids for a message, in header order
    fn load_recipient_ids(conn: &Connection, message_id: i64) -> Result<Vec<ContactId>> {
        let mut stmt = conn.prepare(
            "SELECT contact_id FROM message_recipients
             WHERE message_id = ?
             ORDER BY position",
        )?;

        let ids = stmt
            .query_map([message_id], |row| Ok(ContactId(row.get(0)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ids)
    }

    /// Load attachment ids for a message, in MIME order
    fn load_attachment_ids(conn: &Connection, message_id: i64) -> Result<Vec<AttachmentId>> {
        let mut stmt = conn.prepare(
            "SELECT attachment_id FROM message_attachments
             WHERE message_id = ?
             ORDER BY position",
        )?;

        let ids = stmt
            .query_map([message_id], |row| Ok(AttachmentId(row.get(0)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ids)
    }

    /// Run a message query and attach associations to each row
    ///
    /// The query must select `id, sender_id, subject, date` in that order.
    fn query_messages(
        conn: &Connection,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<Message>> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, Option<i64>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, sender_id, subject, date)| {
                Ok(Message {
                    id: MessageId(id),
                    sender: sender_id.map(ContactId),
                    recipients: Self::load_recipient_ids(conn, id)?,
                    subject,
                    date: parse_stored_date(&date)?,
                    attachments: Self::load_attachment_ids(conn, id)?,
                    content: Vec::new(),
                })
            })
            .collect()
    }
}

fn contact_from_row(row: &Row<'_>) -> rusqlite::Result<Contact> {
    Ok(Contact {
        id: ContactId(row.get(0)?),
        address: row.get(1)?,
        name: row.get(2)?,
    })
}

fn format_stored_date(date: &DateTime<Utc>) -> String {
    // Fixed-width UTC form keeps lexicographic order equal to time order
    date.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_stored_date(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Invalid stored date: {}", value))
}

/// Escape LIKE wildcards so user text matches literally
fn like_pattern(text: &str) -> String {
    let escaped = text
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

impl ContactRepository for SqliteMailStore {
    fn upsert_contact(&self, address: &EmailAddress) -> Result<Contact> {
        let conn = self.conn()?;

        if let Some(existing) = Self::find_contact_with(&conn, &address.email)? {
            return Ok(existing);
        }

        match conn.execute(
            "INSERT INTO contacts (address, name) VALUES (?, ?)",
            params![address.email, address.name],
        ) {
            Ok(_) => Ok(Contact {
                id: ContactId(conn.last_insert_rowid()),
                address: address.email.clone(),
                name: address.name.clone(),
            }),
            Err(e) if is_unique_violation(&e) => {
                // Another writer inserted the address first; read theirs
                debug!("Contact {} inserted concurrently, re-reading", address.email);
                Self::find_contact_with(&conn, &address.email)?
                    .with_context(|| format!("Contact {} missing after conflict", address.email))
            }
            Err(e) => Err(e).with_context(|| format!("Failed to insert contact {}", address.email)),
        }
    }

    fn get_contact(&self, id: ContactId) -> Result<Option<Contact>> {
        let conn = self.conn()?;
        let contact = conn
            .query_row(
                "SELECT id, address, name FROM contacts WHERE id = ?",
                [id.0],
                contact_from_row,
            )
            .optional()?;
        Ok(contact)
    }

    fn find_contact(&self, address: &str) -> Result<Option<Contact>> {
        let conn = self.conn()?;
        Self::find_contact_with(&conn, address)
    }

    fn list_contacts(&self, limit: usize, offset: usize) -> Result<Vec<Contact>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, address, name FROM contacts
             ORDER BY address
             LIMIT ? OFFSET ?",
        )?;

        let contacts = stmt
            .query_map(params![limit as i64, offset as i64], contact_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(contacts)
    }

    fn search_contacts(&self, text: &str, limit: usize) -> Result<Vec<Contact>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, address, name FROM contacts
             WHERE LOWER(address) LIKE LOWER(?1) ESCAPE '\\'
                OR LOWER(COALESCE(name, '')) LIKE LOWER(?1) ESCAPE '\\'
             ORDER BY address
             LIMIT ?2",
        )?;

        let contacts = stmt
            .query_map(params![like_pattern(text), limit as i64], contact_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(contacts)
    }

    fn count_contacts(&self) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM contacts", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

impl AttachmentRepository for SqliteMailStore {
    fn insert_attachment(&self, filename: &str, size: u64) -> Result<Attachment> {
        let stored_size = i64::try_from(size).context("Attachment size out of range")?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO attachments (filename, size) VALUES (?, ?)",
            params![filename, stored_size],
        )
        .with_context(|| format!("Failed to insert attachment {}", filename))?;

        Ok(Attachment {
            id: AttachmentId(conn.last_insert_rowid()),
            filename: filename.to_string(),
            size,
        })
    }

    fn get_attachment(&self, id: AttachmentId) -> Result<Option<Attachment>> {
        let conn = self.conn()?;
        let attachment = conn
            .query_row(
                "SELECT id, filename, size FROM attachments WHERE id = ?",
                [id.0],
                |row| {
                    Ok(Attachment {
                        id: AttachmentId(row.get(0)?),
                        filename: row.get(1)?,
                        size: row.get::<_, i64>(2)? as u64,
                    })
                },
            )
            .optional()?;
        Ok(attachment)
    }

    fn count_attachments(&self) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM attachments", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

impl MessageRepository for SqliteMailStore {
    fn insert_message(&self, message: NewMessage) -> Result<Message> {
        let compressed = zstd::encode_all(message.content.as_slice(), CONTENT_COMPRESSION_LEVEL)
            .context("Failed to compress message content")?;

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO messages (sender_id, subject, date, content) VALUES (?, ?, ?, ?)",
            params![
                message.sender.map(|id| id.0),
                message.subject,
                format_stored_date(&message.date),
                compressed,
            ],
        )
        .context("Failed to insert message")?;
        let id = tx.last_insert_rowid();

        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO message_recipients (message_id, contact_id, position)
                 VALUES (?, ?, ?)",
            )?;
            for (i, contact) in message.recipients.iter().enumerate() {
                stmt.execute(params![id, contact.0, i as i64])
                    .with_context(|| format!("Failed to link recipient {}", contact))?;
            }

            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO message_attachments (message_id, attachment_id, position)
                 VALUES (?, ?, ?)",
            )?;
            for (i, attachment) in message.attachments.iter().enumerate() {
                stmt.execute(params![id, attachment.0, i as i64])
                    .with_context(|| format!("Failed to link attachment {}", attachment))?;
            }
        }

        tx.commit()?;
        Ok(message.into_stored(MessageId(id)))
    }

    fn get_message(&self, id: MessageId) -> Result<Option<Message>> {
        let content = match self.get_message_content(id)? {
            Some(content) => content,
            None => return Ok(None),
        };

        let conn = self.conn()?;
        let mut messages = Self::query_messages(
            &conn,
            "SELECT id, sender_id, subject, date FROM messages WHERE id = ?",
            [id.0],
        )?;

        Ok(messages.pop().map(|m| Message { content, ..m }))
    }

    fn get_message_content(&self, id: MessageId) -> Result<Option<Vec<u8>>> {
        let conn = self.conn()?;
        let compressed: Option<Vec<u8>> = conn
            .query_row("SELECT content FROM messages WHERE id = ?", [id.0], |row| {
                row.get(0)
            })
            .optional()?;

        compressed
            .map(|data| {
                zstd::decode_all(data.as_slice())
                    .with_context(|| format!("Failed to decompress content of message {}", id))
            })
            .transpose()
    }

    fn list_messages(&self, limit: usize, offset: usize) -> Result<Vec<Message>> {
        let conn = self.conn()?;
        Self::query_messages(
            &conn,
            "SELECT id, sender_id, subject, date FROM messages
             ORDER BY date ASC, id ASC
             LIMIT ? OFFSET ?",
            params![limit as i64, offset as i64],
        )
    }

    fn search_messages(&self, text: &str, limit: usize) -> Result<Vec<Message>> {
        let conn = self.conn()?;
        let pattern = like_pattern(text);
        Self::query_messages(
            &conn,
            "SELECT m.id, m.sender_id, m.subject, m.date FROM messages m
             LEFT JOIN contacts c ON c.id = m.sender_id
             WHERE LOWER(m.subject) LIKE LOWER(?1) ESCAPE '\\'
                OR LOWER(c.address) LIKE LOWER(?1) ESCAPE '\\'
             ORDER BY m.date ASC, m.id ASC
             LIMIT ?2",
            params![pattern, limit as i64],
        )
    }

    fn count_messages(&self) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}
