//! Per-mailbox watch session
//!
//! A [`MailboxSession`] drives one mailbox through its lifetime: it
//! pulls [`SessionEvent`]s from its connection, sweeps the mailbox
//! once the box is open and again on every new-mail notification, and
//! returns when the connection ends or fails.

use crate::error::{Error, Result};
use crate::filter::FilterRule;
use crate::processor::MessageProcessor;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What a mailbox connection reports to its session.
#[derive(Debug)]
pub enum SessionEvent {
    /// Connected and authenticated.
    Ready,
    /// The watched mailbox is selected.
    BoxOpened { exists: u32 },
    /// The mailbox grew by this many messages.
    NewMail(u32),
    /// The connection failed. No further events follow.
    Error(Error),
    /// The connection closed cleanly. No further events follow.
    End,
}

/// The operations a session needs from its mailbox connection.
///
/// [`crate::connection::ImapConnection`] is the production
/// implementation; each connection is bound to one mailbox.
pub trait MailConnection: Send {
    /// Wait for the next lifecycle event.
    fn next_event(&mut self) -> impl Future<Output = SessionEvent> + Send;

    /// Run an IMAP `UID SEARCH` and return the matching UIDs in
    /// ascending order.
    fn search(&mut self, query: &str) -> impl Future<Output = Result<Vec<u32>>> + Send;

    /// Fetch the full raw message without setting `\Seen`.
    fn fetch_raw(&mut self, uid: u32) -> impl Future<Output = Result<Vec<u8>>> + Send;

    /// Add a keyword flag to a message.
    fn add_keyword(&mut self, uid: u32, keyword: &str)
    -> impl Future<Output = Result<()>> + Send;

    /// Move a message to another mailbox.
    fn move_message(&mut self, uid: u32, mailbox: &str)
    -> impl Future<Output = Result<()>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    BoxOpening,
    Watching,
    Sweeping,
    Ending,
    Errored,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::BoxOpening => "box-opening",
            Self::Watching => "watching",
            Self::Sweeping => "sweeping",
            Self::Ending => "ending",
            Self::Errored => "errored",
        };
        f.write_str(name)
    }
}

/// Totals for one sweep over a mailbox.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Filters whose search succeeded.
    pub filters: usize,
    /// Messages processed without error.
    pub messages: usize,
    /// Attachments written.
    pub saved: usize,
    /// Failed searches, fetches and messages.
    pub failures: usize,
}

/// Watches one mailbox and applies the filters that target it.
#[derive(Debug)]
pub struct MailboxSession {
    mailbox: String,
    filters: Arc<[FilterRule]>,
    processor: MessageProcessor,
    state: SessionState,
}

impl MailboxSession {
    #[must_use]
    pub fn new(
        mailbox: impl Into<String>,
        filters: Arc<[FilterRule]>,
        processor: MessageProcessor,
    ) -> Self {
        Self {
            mailbox: mailbox.into(),
            filters,
            processor,
            state: SessionState::Disconnected,
        }
    }

    #[must_use]
    pub fn mailbox(&self) -> &str {
        &self.mailbox
    }

    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(
            self.state,
            SessionState::BoxOpening | SessionState::Watching | SessionState::Sweeping
        )
    }

    /// Drive the session until its connection ends.
    ///
    /// # Errors
    ///
    /// Returns the connection's error if it fails. Search, fetch and
    /// per-message failures are logged and never end the session.
    pub async fn run<C: MailConnection>(&mut self, conn: &mut C) -> Result<()> {
        self.state = SessionState::Connecting;
        debug!(mailbox = %self.mailbox, "Session starting");

        loop {
            match conn.next_event().await {
                SessionEvent::Ready => {
                    info!(mailbox = %self.mailbox, "Connection ready");
                    self.state = SessionState::BoxOpening;
                }
                SessionEvent::BoxOpened { exists } => {
                    info!(mailbox = %self.mailbox, exists, "Mailbox opened");
                    self.log_processed(conn).await;
                    self.sweep(conn).await;
                }
                SessionEvent::NewMail(count) => {
                    if self.state == SessionState::Watching {
                        info!(mailbox = %self.mailbox, count, "New mail");
                        self.sweep(conn).await;
                    } else {
                        debug!(mailbox = %self.mailbox, state = %self.state, "Ignoring new mail");
                    }
                }
                SessionEvent::Error(e) => {
                    error!(mailbox = %self.mailbox, error = %e, "Connection error");
                    self.state = SessionState::Errored;
                    return Err(e);
                }
                SessionEvent::End => {
                    info!(mailbox = %self.mailbox, "Connection ended");
                    self.state = SessionState::Ending;
                    return Ok(());
                }
            }
        }
    }

    /// Search every applicable filter for unprocessed messages and
    /// process them one at a time.
    pub async fn sweep<C: MailConnection>(&mut self, conn: &mut C) -> SweepReport {
        self.state = SessionState::Sweeping;
        let mut report = SweepReport::default();

        for filter in self.filters.iter().filter(|f| f.matches(&self.mailbox)) {
            let uids = match self.search_filter(conn, filter).await {
                Ok(uids) => uids,
                Err(e) => {
                    error!(mailbox = %self.mailbox, filter = %filter.name, error = %e, "Search failed");
                    report.failures += 1;
                    continue;
                }
            };
            report.filters += 1;
            debug!(filter = %filter.name, matches = uids.len(), "Search complete");

            for uid in uids {
                let raw = match conn.fetch_raw(uid).await {
                    Ok(raw) => raw,
                    Err(e) => {
                        error!(filter = %filter.name, uid, error = %e, "Fetch failed");
                        report.failures += 1;
                        break;
                    }
                };

                match self.processor.process(conn, uid, &raw, filter).await {
                    Ok(outcome) => {
                        report.messages += 1;
                        report.saved += outcome.saved_count();
                    }
                    Err(e) => {
                        error!(filter = %filter.name, uid, error = %e, "Processing failed");
                        report.failures += 1;
                    }
                }
            }
        }

        info!(
            mailbox = %self.mailbox,
            filters = report.filters,
            messages = report.messages,
            saved = report.saved,
            failures = report.failures,
            "Sweep finished"
        );
        self.state = SessionState::Watching;
        report
    }

    async fn search_filter<C: MailConnection>(
        &self,
        conn: &mut C,
        filter: &FilterRule,
    ) -> Result<Vec<u32>> {
        let query = self.processor.marker().unprocessed_query(&filter.criteria)?;
        conn.search(&query).await
    }

    async fn log_processed<C: MailConnection>(&self, conn: &mut C) {
        match conn.search(&self.processor.marker().processed_query()).await {
            Ok(uids) => info!(mailbox = %self.mailbox, count = uids.len(), "Already processed"),
            Err(e) => warn!(mailbox = %self.mailbox, error = %e, "Processed search failed"),
        }
    }
}
