//! Mailbox ingest implementation

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use crate::credentials::{CredentialError, CredentialProvider};
use crate::imap::{ImapConnector, ImapError, MailSource, RemoteId, ServerSettings};
use crate::models::{AttachmentId, Contact, EmailAddress, Message, NewMessage};
use crate::parse::{AttachmentPart, ParseError, ParsedMessage};
use crate::storage::MailStore;

/// What to do when fetching a single message fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchFailurePolicy {
    /// Abort the whole run
    #[default]
    Abort,
    /// Record a per-item failure and continue
    Skip,
}

/// Options for an ingest run
#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    pub on_fetch_error: FetchFailurePolicy,
    /// Set from another thread (e.g. a Ctrl-C handler) to stop between messages
    pub cancel: Option<Arc<AtomicBool>>,
}

impl IngestOptions {
    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }
}

/// Errors that abort an ingest run
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("cannot obtain password: {0}")]
    Credential(#[from] CredentialError),
    #[error("cannot open mailbox: {0}")]
    Connect(#[source] ImapError),
    #[error("cannot list messages: {0}")]
    Enumerate(#[source] ImapError),
    #[error("cannot fetch message {id}: {source}")]
    Fetch {
        id: RemoteId,
        #[source]
        source: ImapError,
    },
}

/// Why a single message was not stored
#[derive(Debug, thiserror::Error)]
pub enum ItemError {
    #[error("fetch failed: {0}")]
    Fetch(#[source] ImapError),
    #[error("parse failed: {0}")]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// A message that could not be stored
#[derive(Debug)]
pub struct ItemFailure {
    pub id: RemoteId,
    pub error: ItemError,
}

/// Outcome of an ingest run
#[derive(Debug, Default)]
pub struct IngestReport {
    /// Number of identifiers returned by the mailbox listing
    pub listed: usize,
    /// Number of messages stored
    pub stored: usize,
    /// Per-item failures, in mailbox order
    pub failures: Vec<ItemFailure>,
    /// Whether the run stopped early on request
    pub interrupted: bool,
    /// Duration of the run
    pub duration_ms: u64,
}

impl IngestReport {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    /// Number of messages handled, stored or failed
    pub fn processed(&self) -> usize {
        self.stored + self.failed()
    }

    /// Number of listed messages that were neither stored nor failed
    pub fn skipped(&self) -> usize {
        self.listed.saturating_sub(self.stored + self.failed())
    }
}

/// Connect, ingest the whole mailbox and log out
///
/// The password is requested from `credentials` and dropped right after
/// login. The session is closed on every exit path.
///
/// # Arguments
/// * `server` - IMAP host, port, security and mailbox
/// * `user` - IMAP login name
/// * `credentials` - Source of the password
/// * `store` - Storage backend
/// * `options` - Fetch failure policy and cancellation flag
/// * `progress` - Called with (processed, total) after each message
pub fn run_backup<F>(
    server: &ServerSettings,
    user: &str,
    credentials: &dyn CredentialProvider,
    store: &dyn MailStore,
    options: &IngestOptions,
    progress: F,
) -> Result<IngestReport, IngestError>
where
    F: FnMut(usize, usize),
{
    let mut connector = {
        let password = credentials.password(&server.host, user)?;
        ImapConnector::connect(server, user, &password).map_err(IngestError::Connect)?
    };

    let report = ingest_mailbox(&mut connector, store, options, progress)?;

    if let Err(e) = connector.logout() {
        warn!("{}", e);
    }
    Ok(report)
}

/// Ingest every message of an already selected mailbox
///
/// Always re-lists all messages. Contacts are upserted, so re-running is
/// safe for them, but every run stores a new copy of each message.
pub fn ingest_mailbox<F>(
    source: &mut dyn MailSource,
    store: &dyn MailStore,
    options: &IngestOptions,
    mut progress: F,
) -> Result<IngestReport, IngestError>
where
    F: FnMut(usize, usize),
{
    let start = Instant::now();
    let mut report = IngestReport::default();

    let ids = source.list_all().map_err(IngestError::Enumerate)?;
    report.listed = ids.len();
    info!("Found {} messages", ids.len());

    for (i, &id) in ids.iter().enumerate() {
        if options.cancelled() {
            warn!("Interrupted after {} of {} messages", i, ids.len());
            report.interrupted = true;
            break;
        }

        let outcome = match source.fetch_raw(id) {
            Ok(raw) => ingest_message(store, raw),
            Err(e) => match options.on_fetch_error {
                FetchFailurePolicy::Abort => {
                    return Err(IngestError::Fetch { id, source: e });
                }
                FetchFailurePolicy::Skip => Err(ItemError::Fetch(e)),
            },
        };

        match outcome {
            Ok(message) => {
                debug!("Stored message {} as #{}", id, message.id);
                report.stored += 1;
            }
            Err(e) => {
                error!("Error when saving message {}: {:#}", id, e);
                report.failures.push(ItemFailure { id, error: e });
            }
        }

        progress(i + 1, ids.len());
    }

    report.duration_ms = start.elapsed().as_millis() as u64;
    Ok(report)
}

/// Parse one raw message and persist it with its contacts and attachments
///
/// Contacts are upserted before the date is checked, so a message with a
/// missing date leaves its contacts stored even though the message is not.
pub fn ingest_message(store: &dyn MailStore, raw: Vec<u8>) -> Result<Message, ItemError> {
    let parsed = ParsedMessage::parse(&raw)?;

    let senders = upsert_contacts(store, &parsed.senders)?;
    let recipients = upsert_contacts(store, &parsed.recipients)?;
    let date = parsed.date()?;
    let attachments = insert_attachments(store, &parsed.attachments)?;

    if senders.len() > 1 {
        debug!(
            "From lists {} addresses; linking {} as sender",
            senders.len(),
            senders[0].address
        );
    }

    let message = NewMessage::builder(date, raw)
        .sender(senders.first().map(|c| c.id))
        .recipients(recipients.iter().map(|c| c.id).collect())
        .subject(parsed.subject)
        .attachments(attachments)
        .build();

    Ok(store.insert_message(message)?)
}

fn upsert_contacts(store: &dyn MailStore, addresses: &[EmailAddress]) -> anyhow::Result<Vec<Contact>> {
    addresses
        .iter()
        .map(|address| store.upsert_contact(address))
        .collect()
}

fn insert_attachments(
    store: &dyn MailStore,
    parts: &[AttachmentPart],
) -> anyhow::Result<Vec<AttachmentId>> {
    parts
        .iter()
        .map(|part| {
            store
                .insert_attachment(&part.filename, part.size)
                .map(|a| a.id)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{
        AttachmentRepository, ContactRepository, InMemoryMailStore, MessageRepository,
    };
    use std::collections::BTreeMap;

    /// Mailbox fake keyed by sequence number
    #[derive(Default)]
    struct FakeSource {
        messages: BTreeMap<u32, Vec<u8>>,
        broken: Vec<u32>,
        fail_listing: bool,
        fetched: Vec<RemoteId>,
    }

    impl FakeSource {
        fn with(messages: &[&str]) -> Self {
            Self {
                messages: messages
                    .iter()
                    .enumerate()
                    .map(|(i, m)| (i as u32 + 1, m.as_bytes().to_vec()))
                    .collect(),
                ..Self::default()
            }
        }
    }

    impl MailSource for FakeSource {
        fn list_all(&mut self) -> Result<Vec<RemoteId>, ImapError> {
            if self.fail_listing {
                return Err(ImapError::Search("BAD".to_string()));
            }
            Ok(self.messages.keys().map(|&k| RemoteId(k)).collect())
        }

        fn fetch_raw(&mut self, id: RemoteId) -> Result<Vec<u8>, ImapError> {
            self.fetched.push(id);
            if self.broken.contains(&id.0) {
                return Err(ImapError::EmptyFetch(id));
            }
            self.messages
                .get(&id.0)
                .cloned()
                .ok_or(ImapError::EmptyFetch(id))
        }
    }

    fn simple(from: &str, to: &str, subject: &str) -> String {
        format!(
            "From: {}\r\nTo: {}\r\nSubject: {}\r\nDate: Mon, 15 Jan 2024 09:30:00 +0000\r\n\r\nbody\r\n",
            from, to, subject
        )
    }

    #[test]
    fn test_ingest_message_links_first_sender() {
        let store = InMemoryMailStore::new();
        let raw = simple(
            "Alice <alice@example.com>, Zed <zed@example.com>",
            "bob@example.com",
            "Hi",
        );

        let message = ingest_message(&store, raw.clone().into_bytes()).unwrap();

        let alice = store.find_contact("alice@example.com").unwrap().unwrap();
        assert_eq!(message.sender, Some(alice.id));
        assert!(store.find_contact("zed@example.com").unwrap().is_some());
        assert_eq!(message.recipients.len(), 1);
        assert_eq!(message.content, raw.into_bytes());
    }

    #[test]
    fn test_ingest_message_without_from_has_no_sender() {
        let store = InMemoryMailStore::new();
        let raw = "To: bob@example.com\r\nDate: Mon, 15 Jan 2024 09:30:00 +0000\r\n\r\nbody\r\n";

        let message = ingest_message(&store, raw.as_bytes().to_vec()).unwrap();
        assert_eq!(message.sender, None);
        assert_eq!(store.count_messages().unwrap(), 1);
    }

    #[test]
    fn test_missing_date_keeps_contacts_but_not_message() {
        let store = InMemoryMailStore::new();
        let raw = "From: alice@example.com\r\nTo: bob@example.com\r\n\r\nbody\r\n";

        let err = ingest_message(&store, raw.as_bytes().to_vec()).unwrap_err();
        assert!(matches!(err, ItemError::Parse(ParseError::MissingDate)));
        assert_eq!(store.count_messages().unwrap(), 0);
        assert_eq!(store.count_contacts().unwrap(), 2);
    }

    #[test]
    fn test_ingest_mailbox_continues_after_item_failure() {
        let store = InMemoryMailStore::new();
        let mut source = FakeSource::with(&[
            &simple("a@example.com", "b@example.com", "one"),
            "From: c@example.com\r\n\r\nno date\r\n",
            &simple("d@example.com", "b@example.com", "three"),
        ]);
        let mut calls = Vec::new();

        let report = ingest_mailbox(&mut source, &store, &IngestOptions::default(), |done, total| {
            calls.push((done, total))
        })
        .unwrap();

        assert_eq!(report.listed, 3);
        assert_eq!(report.stored, 2);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.failures[0].id, RemoteId(2));
        assert!(!report.interrupted);
        assert_eq!(calls, vec![(1, 3), (2, 3), (3, 3)]);
        assert_eq!(store.count_messages().unwrap(), 2);
    }

    #[test]
    fn test_fetch_failure_aborts_by_default() {
        let store = InMemoryMailStore::new();
        let mut source = FakeSource::with(&[
            &simple("a@example.com", "b@example.com", "one"),
            &simple("a@example.com", "b@example.com", "two"),
            &simple("a@example.com", "b@example.com", "three"),
        ]);
        source.broken = vec![2];

        let err = ingest_mailbox(&mut source, &store, &IngestOptions::default(), |_, _| {})
            .unwrap_err();

        assert!(matches!(err, IngestError::Fetch { id: RemoteId(2), .. }));
        assert_eq!(store.count_messages().unwrap(), 1);
        assert_eq!(source.fetched, vec![RemoteId(1), RemoteId(2)]);
    }

    #[test]
    fn test_fetch_failure_can_be_skipped() {
        let store = InMemoryMailStore::new();
        let mut source = FakeSource::with(&[
            &simple("a@example.com", "b@example.com", "one"),
            &simple("a@example.com", "b@example.com", "two"),
        ]);
        source.broken = vec![1];
        let options = IngestOptions {
            on_fetch_error: FetchFailurePolicy::Skip,
            cancel: None,
        };

        let report = ingest_mailbox(&mut source, &store, &options, |_, _| {}).unwrap();

        assert_eq!(report.stored, 1);
        assert!(matches!(report.failures[0].error, ItemError::Fetch(_)));
    }

    #[test]
    fn test_listing_failure_is_fatal() {
        let store = InMemoryMailStore::new();
        let mut source = FakeSource {
            fail_listing: true,
            ..FakeSource::default()
        };

        let err = ingest_mailbox(&mut source, &store, &IngestOptions::default(), |_, _| {})
            .unwrap_err();
        assert!(matches!(err, IngestError::Enumerate(_)));
    }

    #[test]
    fn test_empty_mailbox_is_valid() {
        let store = InMemoryMailStore::new();
        let mut source = FakeSource::default();

        let report =
            ingest_mailbox(&mut source, &store, &IngestOptions::default(), |_, _| {}).unwrap();
        assert_eq!(report.listed, 0);
        assert_eq!(report.stored, 0);
    }

    #[test]
    fn test_cancel_stops_between_messages() {
        let store = InMemoryMailStore::new();
        let mut source = FakeSource::with(&[
            &simple("a@example.com", "b@example.com", "one"),
            &simple("a@example.com", "b@example.com", "two"),
        ]);
        let flag = Arc::new(AtomicBool::new(false));
        let options = IngestOptions {
            on_fetch_error: FetchFailurePolicy::Abort,
            cancel: Some(Arc::clone(&flag)),
        };

        let report = ingest_mailbox(&mut source, &store, &options, |_, _| {
            flag.store(true, Ordering::SeqCst)
        })
        .unwrap();

        assert!(report.interrupted);
        assert_eq!(report.stored, 1);
        assert_eq!(report.skipped(), 1);
    }

    #[test]
    fn test_processed_counts_failures() {
        let store = InMemoryMailStore::new();
        let mut source = FakeSource::with(&[
            "From: a@example.com\r\nSubject: undated\r\n\r\nbody\r\n",
            &simple("a@example.com", "b@example.com", "two"),
            &simple("a@example.com", "b@example.com", "three"),
        ]);
        let flag = Arc::new(AtomicBool::new(false));
        let options = IngestOptions {
            on_fetch_error: FetchFailurePolicy::Abort,
            cancel: Some(Arc::clone(&flag)),
        };

        let report = ingest_mailbox(&mut source, &store, &options, |done, _| {
            if done == 2 {
                flag.store(true, Ordering::SeqCst)
            }
        })
        .unwrap();

        assert!(report.interrupted);
        assert_eq!(report.stored, 1);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.processed(), 2);
        assert_eq!(report.skipped(), 1);
    }

    #[test]
    fn test_attachments_stored_per_occurrence() {
        let store = InMemoryMailStore::new();
        let raw = "From: a@example.com\r\n\
            Date: Mon, 15 Jan 2024 09:30:00 +0000\r\n\
            Content-Type: multipart/mixed; boundary=\"b\"\r\n\
            \r\n\
            --b\r\n\
            Content-Type: text/plain\r\n\
            \r\n\
            hi\r\n\
            --b\r\n\
            Content-Type: text/plain\r\n\
            Content-Disposition: attachment; filename=\"a.txt\"\r\n\
            \r\n\
            abc\r\n\
            --b--\r\n";

        ingest_message(&store, raw.as_bytes().to_vec()).unwrap();
        ingest_message(&store, raw.as_bytes().to_vec()).unwrap();

        assert_eq!(store.count_attachments().unwrap(), 2);
        assert_eq!(store.count_contacts().unwrap(), 1);
        assert_eq!(store.count_messages().unwrap(), 2);
    }
}
