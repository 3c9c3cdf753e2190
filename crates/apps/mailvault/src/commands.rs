//! Subcommand implementations

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, bail};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use mail::credentials::StaticProvider;
use mail::{
    IngestOptions, IngestReport, MailvaultConfig, MessageId, SqliteMailStore, export_messages,
    format_size, get_message_detail, list_contacts, list_messages, run_backup, search_contacts,
    search_messages,
};

/// Load settings from `path`, or from the default location
pub fn load_settings(path: Option<&Path>) -> Result<MailvaultConfig> {
    match path {
        Some(path) => MailvaultConfig::from_file(path),
        None => MailvaultConfig::load(),
    }
}

fn open_store(database: &Path) -> Result<SqliteMailStore> {
    config::ensure_parent_dir(database)?;
    SqliteMailStore::new(database)
}

pub fn fetch_email(
    settings: &MailvaultConfig,
    database: &Path,
    host: &str,
    user: &str,
) -> Result<()> {
    let store = open_store(database)?;
    let server = settings.server(host);

    // Ask before installing the handler so Ctrl-C still aborts the prompt
    let password = settings.credential_provider().password(&server.host, user)?;
    let credentials = StaticProvider(password);

    let cancel = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancel);
    ctrlc::set_handler(move || {
        if interrupt(&flag) {
            std::process::exit(INTERRUPTED_EXIT_CODE);
        }
    })
    .context("Failed to install Ctrl-C handler")?;

    let options = IngestOptions {
        on_fetch_error: settings.on_fetch_error,
        cancel: Some(cancel),
    };

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
        )?
        .progress_chars("#>-"),
    );
    pb.set_message(format!("{}@{}/{}", user, server.host, server.mailbox));

    let result = run_backup(
        &server,
        user,
        &credentials,
        &store,
        &options,
        |done, total| {
            pb.set_length(total as u64);
            pb.set_position(done as u64);
        },
    );
    pb.finish_and_clear();

    let report = result?;
    print_report(&report);

    if report.interrupted {
        bail!(
            "Interrupted after {} of {} messages",
            report.processed(),
            report.listed
        );
    }
    Ok(())
}

/// Exit status used when a second Ctrl-C ends the process
const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Record a Ctrl-C; returns true when one was already pending
///
/// The first request lets the run stop between messages. A second one means
/// the run is stuck in a blocking call and the process should exit.
fn interrupt(flag: &AtomicBool) -> bool {
    if flag.swap(true, Ordering::SeqCst) {
        return true;
    }
    warn!("Stopping after the current message; press Ctrl-C again to quit now");
    false
}

fn print_report(report: &IngestReport) {
    println!(
        "Stored {} of {} messages in {:.1}s",
        report.stored,
        report.listed,
        report.duration_ms as f64 / 1000.0
    );
    if report.failed() > 0 {
        println!("{} messages failed:", report.failed());
        for failure in &report.failures {
            println!("  {}: {:#}", failure.id, failure.error);
        }
    }
    if report.skipped() > 0 {
        println!("{} messages not processed", report.skipped());
    }
}

pub fn list(
    database: &Path,
    limit: usize,
    offset: usize,
    search: Option<&str>,
    json: bool,
) -> Result<()> {
    let store = open_store(database)?;
    let summaries = match search {
        Some(text) => {
            if offset > 0 {
                warn!("--offset is ignored when searching");
            }
            search_messages(&store, text, limit)?
        }
        None => list_messages(&store, limit, offset)?,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }

    for summary in &summaries {
        let attachments = match summary.attachment_count {
            0 => String::new(),
            n => format!("  [{} attached]", n),
        };
        println!(
            "{:>6}  {}  {:<32}  {}{}",
            summary.id,
            summary.date.format("%Y-%m-%d %H:%M"),
            summary.sender.as_deref().unwrap_or("-"),
            summary.subject,
            attachments
        );
    }
    info!("{} messages", summaries.len());
    Ok(())
}

pub fn show(database: &Path, id: i64, json: bool) -> Result<()> {
    let store = open_store(database)?;
    let detail =
        get_message_detail(&store, MessageId(id))?.with_context(|| format!("Message {} not found", id))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&detail)?);
        return Ok(());
    }

    println!("Message {}", detail.id);
    println!("Date:    {}", detail.date.to_rfc2822());
    match &detail.sender {
        Some(sender) => println!("From:    {}", sender),
        None => println!("From:    -"),
    }
    let recipients: Vec<String> = detail.recipients.iter().map(ToString::to_string).collect();
    println!("To:      {}", recipients.join(", "));
    println!("Subject: {}", detail.subject);
    println!("Size:    {}", format_size(detail.size));
    for attachment in &detail.attachments {
        println!("  {} ({})", attachment.filename, format_size(attachment.size));
    }
    Ok(())
}

pub fn contacts(
    database: &Path,
    limit: usize,
    offset: usize,
    search: Option<&str>,
) -> Result<()> {
    let store = open_store(database)?;
    let contacts = match search {
        Some(text) => {
            if offset > 0 {
                warn!("--offset is ignored when searching");
            }
            search_contacts(&store, text, limit)?
        }
        None => list_contacts(&store, limit, offset)?,
    };

    for contact in contacts {
        println!("{:>6}  {}", contact.id, contact);
    }
    Ok(())
}

pub fn export(database: &Path, ids: &[i64], output: Option<&Path>) -> Result<()> {
    let store = open_store(database)?;
    let ids: Vec<MessageId> = ids.iter().copied().map(MessageId).collect();

    let export = export_messages(&store, &ids)?;
    let target = match output {
        Some(path) => path.to_path_buf(),
        None => PathBuf::from(export.filename()),
    };
    let written = export.write_to(&target)?;

    println!(
        "Wrote {} ({}, {})",
        written.display(),
        export.content_type(),
        format_size(export.bytes().len() as u64)
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_interrupt_requests_exit() {
        let flag = AtomicBool::new(false);

        assert!(!interrupt(&flag));
        assert!(flag.load(Ordering::SeqCst));
        assert!(interrupt(&flag));
    }
}
