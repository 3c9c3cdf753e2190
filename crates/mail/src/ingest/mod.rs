//! Ingest engine: fetch, parse and persist every message of a mailbox
//!
//! Each message is processed independently. Parse and storage failures are
//! recorded per item and the run continues; connection, login, select and
//! search failures abort the run.

mod pipeline;

pub use pipeline::{
    FetchFailurePolicy, IngestError, IngestOptions, IngestReport, ItemError, ItemFailure,
    ingest_mailbox, ingest_message, run_backup,
};
