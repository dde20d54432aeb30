//! Processed-message marker
//!
//! A message whose attachment has been saved gets a user keyword flag
//! on the server. The flag is only ever added, never removed, and
//! every sweep search excludes messages that carry it.

use crate::criteria::{self, SearchTerm};
use crate::error::Result;
use std::fmt;

/// Keyword used when the configuration does not name one.
pub const DEFAULT_KEYWORD: &str = "AttachmentSaved";

/// The IMAP keyword flag marking a message as already handled.
///
/// # Examples
///
/// ```
/// use imap_to_fs::ProcessedMarker;
///
/// let marker = ProcessedMarker::default();
/// assert_eq!(marker.keyword(), "AttachmentSaved");
/// assert_eq!(marker.processed_query(), "KEYWORD AttachmentSaved");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProcessedMarker {
    keyword: String,
}

impl ProcessedMarker {
    #[must_use]
    pub fn new(keyword: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
        }
    }

    /// The keyword as sent in `STORE` and `SEARCH` commands.
    #[must_use]
    pub fn keyword(&self) -> &str {
        &self.keyword
    }

    /// Search query matching messages that already carry the marker.
    #[must_use]
    pub fn processed_query(&self) -> String {
        format!("KEYWORD {}", self.keyword)
    }

    /// Search query matching unmarked messages that satisfy `criteria`.
    ///
    /// Non-ASCII criteria put `CHARSET UTF-8` in front of the query.
    ///
    /// # Errors
    ///
    /// Returns an error if `criteria` cannot be rendered.
    pub fn unprocessed_query(&self, criteria: &[SearchTerm]) -> Result<String> {
        let rest = criteria::render_all(criteria)?;
        let query = if rest.is_empty() {
            format!("UNKEYWORD {}", self.keyword)
        } else {
            format!("UNKEYWORD {} {rest}", self.keyword)
        };
        Ok(criteria::with_charset(query))
    }
}

impl Default for ProcessedMarker {
    fn default() -> Self {
        Self::new(DEFAULT_KEYWORD)
    }
}

impl fmt::Display for ProcessedMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.keyword)
    }
}
