//! IMAP attachment saver
//!
//! Watches mailboxes on an IMAP server and saves the attachments of
//! messages matching user-defined filter rules into directories on
//! disk. Each saved message gets a keyword flag so it is never
//! processed twice, and may then be moved to a "done" mailbox.
//!
//! The pieces, leaves first:
//!
//! - [`FilterRule`] -- search criteria, destination and rename template
//! - [`compute_filename`] -- output name from a rename template
//! - [`MessageProcessor`] -- save one message's attachment, flag, move
//! - [`MailboxSession`] -- one mailbox's connection lifecycle and sweeps
//! - [`WatchCoordinator`] -- one session per watched mailbox

mod config;
mod connection;
mod coordinator;
mod criteria;
mod error;
mod filter;
mod marker;
mod namer;
mod processor;
mod session;


pub use config::{
    CONFIG_PATH_ENV, Config, DEFAULT_CONFIG_PATH, ImapConfig, LoggingConfig, Security,
};
pub use connection::{ImapConnection, ImapConnector, ImapSession, ImapStream, connect};
pub use coordinator::{Connector, WatchCoordinator, run};
pub use criteria::{SearchArg, SearchTerm, render_all, with_charset};
pub use error::{Error, Result};
pub use filter::{DEFAULT_MAILBOX, FilterRule, watched_mailboxes};
pub use marker::{DEFAULT_KEYWORD, ProcessedMarker};
pub use namer::{UNKNOWN_NAME, compute_filename};
pub use processor::{Attachment, MessageProcessor, ParsedMessage, ProcessReport, parse_message};
pub use session::{MailConnection, MailboxSession, SessionEvent, SessionState, SweepReport};
