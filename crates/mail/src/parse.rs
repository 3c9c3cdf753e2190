//! Raw RFC 822 message parsing
//!
//! Turns fetched bytes into the fields the persister needs: From and To
//! address lists, subject, date and attachment metadata.

use chrono::{DateTime, TimeZone, Utc};
use log::warn;
use mailparse::{DispositionType, MailAddr, MailHeaderMap, MailParseError, ParsedMail};

use crate::models::EmailAddress;

/// Errors raised while parsing a raw message
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("malformed MIME structure: {0}")]
    Mime(#[from] MailParseError),
    #[error("message has no Date header")]
    MissingDate,
    #[error("unparseable Date header: {0:?}")]
    InvalidDate(String),
    #[error("cannot decode attachment {filename:?}: {source}")]
    AttachmentBody {
        filename: String,
        #[source]
        source: MailParseError,
    },
}

/// Metadata for one attachment part
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentPart {
    pub filename: String,
    /// Length of the transfer-decoded content
    pub size: u64,
}

/// The fields of a message relevant for backup
#[derive(Debug, Clone)]
pub struct ParsedMessage {
    /// Every address in the From header, in order
    pub senders: Vec<EmailAddress>,
    /// Every address in the To header, in order
    pub recipients: Vec<EmailAddress>,
    /// Decoded subject, empty when absent
    pub subject: String,
    pub attachments: Vec<AttachmentPart>,
    date_header: Option<String>,
}

impl ParsedMessage {
    /// Parse raw message bytes
    ///
    /// Missing or unparseable From/To headers yield empty lists. The Date
    /// header is only validated by [`ParsedMessage::date`].
    pub fn parse(raw: &[u8]) -> Result<Self, ParseError> {
        let mail = mailparse::parse_mail(raw)?;

        let senders = address_list(&mail, "From");
        let recipients = address_list(&mail, "To");
        let subject = mail.headers.get_first_value("Subject").unwrap_or_default();
        let date_header = mail.headers.get_first_value("Date");

        let mut attachments = Vec::new();
        for part in &mail.subparts {
            collect_attachments(part, &mut attachments)?;
        }

        Ok(Self {
            senders,
            recipients,
            subject,
            attachments,
            date_header,
        })
    }

    /// The first sender, linked as the message's sender
    pub fn sender(&self) -> Option<&EmailAddress> {
        self.senders.first()
    }

    /// The Date header as a UTC timestamp
    pub fn date(&self) -> Result<DateTime<Utc>, ParseError> {
        let value = self
            .date_header
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or(ParseError::MissingDate)?;
        parse_date(value)
    }
}

/// Parse an RFC 2822 date, falling back to mailparse's lenient parser
pub fn parse_date(value: &str) -> Result<DateTime<Utc>, ParseError> {
    if let Ok(date) = DateTime::parse_from_rfc2822(value) {
        return Ok(date.with_timezone(&Utc));
    }

    mailparse::dateparse(value)
        .ok()
        .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
        .ok_or_else(|| ParseError::InvalidDate(value.to_string()))
}

/// Parse an address header into a flat list, groups expanded
fn address_list(mail: &ParsedMail<'_>, name: &str) -> Vec<EmailAddress> {
    let Some(header) = mail.headers.get_first_header(name) else {
        return Vec::new();
    };

    let list = match mailparse::addrparse_header(header) {
        Ok(list) => list,
        Err(e) => {
            warn!("Ignoring unparseable {} header: {}", name, e);
            return Vec::new();
        }
    };

    let mut addresses = Vec::new();
    for addr in list.iter() {
        match addr {
            MailAddr::Single(info) => addresses.push(EmailAddress {
                name: info.display_name.clone(),
                email: info.addr.clone(),
            }),
            MailAddr::Group(group) => {
                addresses.extend(group.addrs.iter().map(|info| EmailAddress {
                    name: info.display_name.clone(),
                    email: info.addr.clone(),
                }));
            }
        }
    }
    addresses.retain(|a| !a.email.is_empty());
    addresses
}

/// Walk MIME parts below the root, collecting named parts
///
/// Any leaf with a filename counts, whatever its disposition, so inline
/// images with a name are kept. Unnamed parts and named inline text bodies
/// are skipped.
fn collect_attachments(
    part: &ParsedMail<'_>,
    attachments: &mut Vec<AttachmentPart>,
) -> Result<(), ParseError> {
    if !part.subparts.is_empty() {
        for sub in &part.subparts {
            collect_attachments(sub, attachments)?;
        }
        return Ok(());
    }

    let disposition = part.get_content_disposition();
    let filename = disposition
        .params
        .get("filename")
        .or_else(|| part.ctype.params.get("name"))
        .map(|f| f.trim())
        .unwrap_or_default();
    if filename.is_empty() || is_body_text(part, &disposition.disposition) {
        return Ok(());
    }

    let body = part
        .get_body_raw()
        .map_err(|source| ParseError::AttachmentBody {
            filename: filename.to_string(),
            source,
        })?;

    attachments.push(AttachmentPart {
        filename: filename.to_string(),
        size: body.len() as u64,
    });
    Ok(())
}

fn is_body_text(part: &ParsedMail<'_>, disposition: &DispositionType) -> bool {
    *disposition != DispositionType::Attachment
        && matches!(part.ctype.mimetype.as_str(), "text/plain" | "text/html")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIMPLE: &str = "From: \"Alice Example\" <alice@example.com>\r\n\
        To: bob@example.com, Carol <carol@example.com>\r\n\
        Subject: Hello there\r\n\
        Date: Mon, 15 Jan 2024 09:30:00 +0100\r\n\
        \r\n\
        Just a plain body.\r\n";

    const WITH_ATTACHMENT: &str = "From: alice@example.com\r\n\
        To: bob@example.com\r\n\
        Subject: Report\r\n\
        Date: Tue, 16 Jan 2024 10:00:00 +0000\r\n\
        MIME-Version: 1.0\r\n\
        Content-Type: multipart/mixed; boundary=\"XYZ\"\r\n\
        \r\n\
        --XYZ\r\n\
        Content-Type: text/plain\r\n\
        \r\n\
        See attached.\r\n\
        --XYZ\r\n\
        Content-Type: application/octet-stream\r\n\
        Content-Disposition: attachment; filename=\"data.bin\"\r\n\
        Content-Transfer-Encoding: base64\r\n\
        \r\n\
        AAECAwQFBgcICQ==\r\n\
        --XYZ\r\n\
        Content-Type: image/png\r\n\
        Content-Disposition: attachment\r\n\
        Content-Transfer-Encoding: base64\r\n\
        \r\n\
        iVBORw0KGgo=\r\n\
        --XYZ\r\n\
        Content-Type: image/gif; name=\"inline.gif\"\r\n\
        Content-Disposition: inline\r\n\
        Content-Transfer-Encoding: base64\r\n\
        \r\n\
        R0lGODlh\r\n\
        --XYZ--\r\n";

    #[test]
    fn test_parse_addresses_subject_and_date() {
        let parsed = ParsedMessage::parse(SIMPLE.as_bytes()).unwrap();

        assert_eq!(
            parsed.senders,
            vec![EmailAddress::with_name("Alice Example", "alice@example.com")]
        );
        assert_eq!(
            parsed.recipients,
            vec![
                EmailAddress::new("bob@example.com"),
                EmailAddress::with_name("Carol", "carol@example.com"),
            ]
        );
        assert_eq!(parsed.subject, "Hello there");
        assert_eq!(
            parsed.date().unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 15, 8, 30, 0).unwrap()
        );
        assert!(parsed.attachments.is_empty());
    }

    #[test]
    fn test_only_named_parts_are_collected() {
        let parsed = ParsedMessage::parse(WITH_ATTACHMENT.as_bytes()).unwrap();

        assert_eq!(
            parsed.attachments,
            vec![
                AttachmentPart {
                    filename: "data.bin".to_string(),
                    size: 10,
                },
                AttachmentPart {
                    filename: "inline.gif".to_string(),
                    size: 6,
                },
            ]
        );
    }

    #[test]
    fn test_named_inline_and_undisposed_parts_are_attachments() {
        let raw = "From: alice@example.com\r\n\
            Date: Tue, 16 Jan 2024 10:00:00 +0000\r\n\
            MIME-Version: 1.0\r\n\
            Content-Type: multipart/mixed; boundary=\"B\"\r\n\
            \r\n\
            --B\r\n\
            Content-Type: text/plain\r\n\
            Content-Disposition: inline; filename=\"body.txt\"\r\n\
            \r\n\
            Hello\r\n\
            --B\r\n\
            Content-Type: image/jpeg\r\n\
            Content-Disposition: inline; filename=\"photo.jpg\"\r\n\
            Content-Transfer-Encoding: base64\r\n\
            \r\n\
            /9j/4AAQ\r\n\
            --B\r\n\
            Content-Type: application/pdf; name=\"invoice.pdf\"\r\n\
            Content-Transfer-Encoding: base64\r\n\
            \r\n\
            JVBERi0=\r\n\
            --B--\r\n";
        let parsed = ParsedMessage::parse(raw.as_bytes()).unwrap();

        assert_eq!(
            parsed.attachments,
            vec![
                AttachmentPart {
                    filename: "photo.jpg".to_string(),
                    size: 6,
                },
                AttachmentPart {
                    filename: "invoice.pdf".to_string(),
                    size: 5,
                },
            ]
        );
    }

    #[test]
    fn test_missing_headers_default_to_empty() {
        let raw = "Date: Mon, 15 Jan 2024 09:30:00 +0000\r\n\r\nbody\r\n";
        let parsed = ParsedMessage::parse(raw.as_bytes()).unwrap();

        assert!(parsed.senders.is_empty());
        assert!(parsed.sender().is_none());
        assert!(parsed.recipients.is_empty());
        assert_eq!(parsed.subject, "");
        assert!(parsed.date().is_ok());
    }

    #[test]
    fn test_missing_date_is_an_error() {
        let raw = "From: alice@example.com\r\nSubject: No date\r\n\r\nbody\r\n";
        let parsed = ParsedMessage::parse(raw.as_bytes()).unwrap();

        assert_eq!(parsed.senders.len(), 1);
        assert!(matches!(parsed.date(), Err(ParseError::MissingDate)));
    }

    #[test]
    fn test_garbage_date_is_an_error() {
        let raw = "From: alice@example.com\r\nDate: sometime last week\r\n\r\nbody\r\n";
        let parsed = ParsedMessage::parse(raw.as_bytes()).unwrap();

        assert!(matches!(parsed.date(), Err(ParseError::InvalidDate(_))));
    }

    #[test]
    fn test_multiple_senders_keep_order() {
        let raw = "From: first@example.com, second@example.com\r\n\
            Date: Mon, 15 Jan 2024 09:30:00 +0000\r\n\r\nbody\r\n";
        let parsed = ParsedMessage::parse(raw.as_bytes()).unwrap();

        assert_eq!(parsed.senders.len(), 2);
        assert_eq!(parsed.sender().unwrap().email, "first@example.com");
    }

    #[test]
    fn test_group_recipients_are_flattened() {
        let raw = "From: alice@example.com\r\n\
            To: Team: dan@example.com, erin@example.com;\r\n\
            Date: Mon, 15 Jan 2024 09:30:00 +0000\r\n\r\nbody\r\n";
        let parsed = ParsedMessage::parse(raw.as_bytes()).unwrap();

        let emails: Vec<&str> = parsed.recipients.iter().map(|a| a.email.as_str()).collect();
        assert_eq!(emails, vec!["dan@example.com", "erin@example.com"]);
    }

    #[test]
    fn test_encoded_subject_is_decoded() {
        let raw = "Subject: =?UTF-8?B?w4ljaGFuZ2U=?=\r\n\
            Date: Mon, 15 Jan 2024 09:30:00 +0000\r\n\r\nbody\r\n";
        let parsed = ParsedMessage::parse(raw.as_bytes()).unwrap();

        assert_eq!(parsed.subject, "\u{c9}change");
    }

    #[test]
    fn test_parse_date_accepts_rfc2822() {
        let date = parse_date("Wed, 07 Feb 2024 23:15:42 -0500").unwrap();
        assert_eq!(date, Utc.with_ymd_and_hms(2024, 2, 8, 4, 15, 42).unwrap());
    }
}
