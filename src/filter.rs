//! Filter rules
//!
//! A rule names which messages to pick (IMAP search criteria), where
//! their attachment goes, and what to do with the message afterwards.

use crate::criteria::SearchTerm;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Mailbox watched by rules that do not name one.
pub const DEFAULT_MAILBOX: &str = "INBOX";

/// One user-defined filter rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterRule {
    pub name: String,
    #[serde(default, alias = "rules")]
    pub criteria: Vec<SearchTerm>,
    #[serde(alias = "path")]
    pub destination_path: PathBuf,
    #[serde(default, alias = "renameRule")]
    pub rename_template: String,
    #[serde(default, alias = "mailBoxToWatch")]
    pub watched_mailbox: Option<String>,
    #[serde(default, alias = "mailBoxDone")]
    pub done_mailbox: Option<String>,
    #[serde(default, alias = "filterFilename")]
    pub filename_filter: Option<String>,
    #[serde(default)]
    pub disabled: bool,
}

impl FilterRule {
    /// Whether this rule applies to `mailbox`.
    ///
    /// Disabled rules match nothing. A rule without a watched mailbox
    /// applies to `INBOX` only.
    #[must_use]
    pub fn matches(&self, mailbox: &str) -> bool {
        if self.disabled {
            return false;
        }
        self.watched_mailbox.as_deref().unwrap_or(DEFAULT_MAILBOX) == mailbox
    }

    /// Whether an attachment named `filename` passes the filename
    /// filter. Attachments without a name never pass a set filter.
    #[must_use]
    pub fn accepts_filename(&self, filename: Option<&str>) -> bool {
        self.filename_filter
            .as_deref()
            .is_none_or(|needle| filename.is_some_and(|name| name.contains(needle)))
    }
}

/// The distinct mailboxes to watch for `filters`, in first-seen order.
///
/// Falls back to `INBOX` when no enabled rule exists.
#[must_use]
pub fn watched_mailboxes(filters: &[FilterRule]) -> Vec<String> {
    let mut mailboxes: Vec<String> = Vec::new();
    for filter in filters.iter().filter(|f| !f.disabled) {
        let name = filter.watched_mailbox.as_deref().unwrap_or(DEFAULT_MAILBOX);
        if !mailboxes.iter().any(|m| m == name) {
            mailboxes.push(name.to_string());
        }
    }
    if mailboxes.is_empty() {
        mailboxes.push(DEFAULT_MAILBOX.to_string());
    }
    mailboxes
}

#[cfg(test)]
pub(crate) fn rule(name: &str, watched: Option<&str>) -> FilterRule {
    FilterRule {
        name: name.to_string(),
        criteria: Vec::new(),
        destination_path: PathBuf::from("."),
        rename_template: String::new(),
        watched_mailbox: watched.map(str::to_string),
        done_mailbox: None,
        filename_filter: None,
        disabled: false,
    }
}
