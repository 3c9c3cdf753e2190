//! Export of stored messages as .eml files
//!
//! A single message is exported as its raw bytes; two or more are bundled
//! into a zip archive with one `message-<id>.eml` entry per message.

use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use log::debug;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::models::MessageId;
use crate::storage::MailStore;

pub const EML_CONTENT_TYPE: &str = "message/rfc822";
pub const ZIP_CONTENT_TYPE: &str = "application/zip";
pub const ARCHIVE_FILENAME: &str = "messages.zip";

/// Errors raised while exporting
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("no messages selected")]
    Empty,
    #[error("message {0} not found")]
    NotFound(MessageId),
    #[error("cannot build archive: {0}")]
    Archive(#[from] zip::result::ZipError),
    #[error("cannot write export: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// An export ready to be written or served
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Export {
    /// One message, verbatim
    Single { id: MessageId, content: Vec<u8> },
    /// Several messages bundled in a zip archive
    Archive { count: usize, bytes: Vec<u8> },
}

impl Export {
    /// Suggested file name
    pub fn filename(&self) -> String {
        match self {
            Export::Single { id, .. } => eml_filename(*id),
            Export::Archive { .. } => ARCHIVE_FILENAME.to_string(),
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Export::Single { .. } => EML_CONTENT_TYPE,
            Export::Archive { .. } => ZIP_CONTENT_TYPE,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        match self {
            Export::Single { content, .. } => content,
            Export::Archive { bytes, .. } => bytes,
        }
    }

    /// Write the export to `path`, or into `path` when it is a directory
    pub fn write_to(&self, path: &Path) -> Result<PathBuf, ExportError> {
        let target = if path.is_dir() {
            path.join(self.filename())
        } else {
            path.to_path_buf()
        };
        std::fs::write(&target, self.bytes())?;
        Ok(target)
    }
}

/// Entry name for a message, e.g. `message-42.eml`
pub fn eml_filename(id: MessageId) -> String {
    format!("message-{}.eml", id)
}

/// Export the selected messages
///
/// Repeated ids are exported once. Unknown ids fail the whole export.
pub fn export_messages(store: &dyn MailStore, ids: &[MessageId]) -> Result<Export, ExportError> {
    let mut selected: Vec<MessageId> = Vec::with_capacity(ids.len());
    for &id in ids {
        if !selected.contains(&id) {
            selected.push(id);
        }
    }

    match selected.as_slice() {
        [] => Err(ExportError::Empty),
        [id] => {
            let content = load_content(store, *id)?;
            Ok(Export::Single { id: *id, content })
        }
        many => {
            let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
            let options = SimpleFileOptions::default();

            for &id in many {
                let content = load_content(store, id)?;
                zip.start_file(eml_filename(id), options)?;
                zip.write_all(&content)?;
            }

            let bytes = zip.finish()?.into_inner();
            debug!("Bundled {} messages into {} bytes", many.len(), bytes.len());
            Ok(Export::Archive {
                count: many.len(),
                bytes,
            })
        }
    }
}

fn load_content(store: &dyn MailStore, id: MessageId) -> Result<Vec<u8>, ExportError> {
    store
        .get_message_content(id)?
        .ok_or(ExportError::NotFound(id))
}
