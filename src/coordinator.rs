//! Watching every configured mailbox at once
//!
//! The coordinator derives the mailboxes to watch from the filter
//! list and runs one [`MailboxSession`] per mailbox, each on its own
//! tokio task inside a `mailbox` span.

use crate::config::{Config, ImapConfig};
use crate::connection::ImapConnector;
use crate::error::{Error, Result};
use crate::filter::{FilterRule, watched_mailboxes};
use crate::processor::MessageProcessor;
use crate::session::{MailConnection, MailboxSession};
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use std::sync::Arc;
use tracing::{Instrument, error, info, info_span};

/// Opens the connection a session will own.
///
/// Connections are created lazily: nothing touches the network until
/// the session asks for its first event.
pub trait Connector {
    type Connection: MailConnection + 'static;

    fn connect(&self, mailbox: &str) -> Self::Connection;
}

/// Runs one session per watched mailbox.
#[derive(Debug)]
pub struct WatchCoordinator<K> {
    connector: K,
    filters: Arc<[FilterRule]>,
    processor: MessageProcessor,
}

impl WatchCoordinator<ImapConnector> {
    /// A coordinator for the IMAP server and filters in `config`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigMissing`] if the config has no IMAP
    /// section.
    pub fn from_config(config: &Config) -> Result<Self> {
        let imap = config.imap_config()?.clone();
        Ok(Self::new(
            ImapConnector::new(imap),
            config.filters().to_vec(),
            MessageProcessor::new(config.marker()),
        ))
    }
}

impl<K: Connector> WatchCoordinator<K> {
    #[must_use]
    pub fn new(connector: K, filters: Vec<FilterRule>, processor: MessageProcessor) -> Self {
        Self {
            connector,
            filters: filters.into(),
            processor,
        }
    }

    /// The distinct mailboxes this coordinator watches.
    #[must_use]
    pub fn mailboxes(&self) -> Vec<String> {
        watched_mailboxes(&self.filters)
    }

    /// Start every session and wait for them.
    ///
    /// Returns `Ok` once all sessions have ended cleanly. The first
    /// session to fail ends the wait with its error; the remaining
    /// sessions are not cancelled and keep running on their tasks.
    ///
    /// # Errors
    ///
    /// Returns the error of the first session that fails.
    pub async fn run(&self) -> Result<()> {
        let mailboxes = self.mailboxes();
        info!(count = mailboxes.len(), ?mailboxes, "Starting mailbox watch");

        let mut sessions: FuturesUnordered<_> = mailboxes
            .into_iter()
            .map(|mailbox| {
                let mut conn = self.connector.connect(&mailbox);
                let mut session = MailboxSession::new(
                    mailbox.clone(),
                    Arc::clone(&self.filters),
                    self.processor.clone(),
                );
                let span = info_span!("mailbox", name = %mailbox);
                tokio::spawn(async move { session.run(&mut conn).await }.instrument(span))
                    .map(move |joined| (mailbox, joined))
            })
            .collect();

        while let Some((mailbox, joined)) = sessions.next().await {
            let result = joined
                .unwrap_or_else(|e| Err(Error::Connection(format!("Session task failed: {e}"))));
            match result {
                Ok(()) => info!(mailbox = %mailbox, "Session finished"),
                Err(e) => {
                    error!(
                        mailbox = %mailbox,
                        error = %e,
                        remaining = sessions.len(),
                        "Session failed"
                    );
                    return Err(e);
                }
            }
        }

        info!("All sessions finished");
        Ok(())
    }
}

/// Watch every mailbox named by `filters` on the server in `imap`.
///
/// # Errors
///
/// Returns the error of the first session that fails.
pub async fn run(imap: &ImapConfig, filters: &[FilterRule]) -> Result<()> {
    WatchCoordinator::new(
        ImapConnector::new(imap.clone()),
        filters.to_vec(),
        MessageProcessor::default(),
    )
    .run()
    .await
}
