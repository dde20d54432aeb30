//! Attachment extraction for a single message
//!
//! The processor parses a fetched message, walks its attachments in
//! order and saves the first one that passes the rule's filename filter
//! and does not collide with an existing file. Only after the file is
//! on disk is the message marked processed (and then moved, if the
//! rule says so). At most one attachment is saved per message.
//!
//! Nothing here is transactional: if the move fails after the marker
//! was stored, the marker stays.

use crate::error::{Error, Result};
use crate::filter::FilterRule;
use crate::marker::ProcessedMarker;
use crate::namer::compute_filename;
use crate::session::MailConnection;
use chrono::{DateTime, Local, NaiveDate};
use mail_parser::{MessageParser, MimeHeaders};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// What happened to one message.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProcessReport {
    /// Attachments found in the message.
    pub attachments: usize,
    /// Attachments rejected by the filename filter.
    pub skipped: usize,
    /// Output paths that already existed.
    pub collisions: Vec<PathBuf>,
    /// The file written, if any.
    pub saved: Option<PathBuf>,
}

impl ProcessReport {
    #[must_use]
    pub fn saved_count(&self) -> usize {
        usize::from(self.saved.is_some())
    }
}

/// An attachment pulled out of a parsed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: Option<String>,
    pub content: Vec<u8>,
}

/// The parts of a message the processor cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedMessage {
    pub sent_date: Option<NaiveDate>,
    pub attachments: Vec<Attachment>,
}

/// Parse raw RFC 5322 bytes into date and attachments.
///
/// The sent date is the `Date:` header's instant as a calendar date in
/// the local time zone.
///
/// # Errors
///
/// Returns [`Error::Parse`] if the bytes are not a message.
pub fn parse_message(raw: &[u8]) -> Result<ParsedMessage> {
    let message = MessageParser::default()
        .parse(raw)
        .ok_or_else(|| Error::Parse("not an RFC 5322 message".into()))?;

    let sent_date = message
        .date()
        .and_then(|dt| DateTime::from_timestamp(dt.to_timestamp(), 0))
        .map(|utc| utc.with_timezone(&Local).date_naive());

    let attachments = message
        .attachments()
        .map(|part| Attachment {
            filename: part.attachment_name().map(str::to_string),
            content: part.contents().to_vec(),
        })
        .collect();

    Ok(ParsedMessage {
        sent_date,
        attachments,
    })
}

/// Saves attachments of matched messages and marks them processed.
#[derive(Debug, Clone, Default)]
pub struct MessageProcessor {
    marker: ProcessedMarker,
}

impl MessageProcessor {
    #[must_use]
    pub const fn new(marker: ProcessedMarker) -> Self {
        Self { marker }
    }

    #[must_use]
    pub const fn marker(&self) -> &ProcessedMarker {
        &self.marker
    }

    /// Process one fetched message against `filter`.
    ///
    /// `conn` is the session's connection, used to store the marker
    /// and move the message once an attachment is saved.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be parsed, or if
    /// writing the file, storing the marker, or moving the message
    /// fails. Side effects already applied are kept.
    pub async fn process<C: MailConnection>(
        &self,
        conn: &mut C,
        uid: u32,
        raw: &[u8],
        filter: &FilterRule,
    ) -> Result<ProcessReport> {
        let parsed = parse_message(raw)?;
        let mut report = ProcessReport {
            attachments: parsed.attachments.len(),
            ..ProcessReport::default()
        };
        debug!(
            filter = %filter.name,
            uid,
            attachments = report.attachments,
            "Message parsed"
        );

        if parsed.attachments.is_empty() {
            info!(filter = %filter.name, uid, "No attachments found");
            return Ok(report);
        }

        let date = parsed
            .sent_date
            .unwrap_or_else(|| Local::now().date_naive());

        for attachment in &parsed.attachments {
            let original = attachment.filename.as_deref();
            if !filter.accepts_filename(original) {
                debug!(filter = %filter.name, uid, attachment = ?original, "Skipping attachment");
                report.skipped += 1;
                continue;
            }

            let safe_name = original.map(sanitize_name);
            let filename = compute_filename(&filter.rename_template, date, safe_name.as_deref());
            let path = filter.destination_path.join(&filename);

            if !write_new(&path, &attachment.content).await? {
                warn!(
                    filter = %filter.name,
                    uid,
                    path = %path.display(),
                    "File already exists"
                );
                report.collisions.push(path);
                continue;
            }

            conn.add_keyword(uid, self.marker.keyword()).await?;
            debug!(filter = %filter.name, uid, "Added processed marker");

            if let Some(done) = &filter.done_mailbox {
                conn.move_message(uid, done).await?;
                debug!(filter = %filter.name, uid, mailbox = %done, "Moved message");
            }

            info!(filter = %filter.name, uid, path = %path.display(), "Saved attachment");
            report.saved = Some(path);
            break;
        }

        Ok(report)
    }
}

/// Keep an attachment's name inside the destination directory.
fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | '\0') { '_' } else { c })
        .collect();
    match cleaned.trim() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}

/// Write `content` to a new file at `path`.
///
/// Returns `Ok(false)` without touching anything if the path already
/// exists.
async fn write_new(path: &Path, content: &[u8]) -> Result<bool> {
    let write_err = |source| Error::Write {
        path: path.to_path_buf(),
        source,
    };

    if fs::try_exists(path).await.map_err(write_err)? {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let mut file = match OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
    {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
        Err(e) => return Err(write_err(e)),
    };

    let written = async {
        file.write_all(content).await?;
        file.flush().await?;
        Ok::<(), std::io::Error>(())
    }
    .await;

    if let Err(e) = written {
        drop(file);
        fs::remove_file(path).await.ok();
        return Err(write_err(e));
    }
    Ok(true)
}
