//! Error types for imap-to-fs

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("No IMAP configuration found")]
    ConfigMissing,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Invalid search criteria: {0}")]
    Criteria(String),

    #[error("Search failed in {mailbox}: {reason}")]
    Search { mailbox: String, reason: String },

    #[error("Fetch of UID {uid} failed: {reason}")]
    Fetch { uid: u32, reason: String },

    #[error("Email parsing error: {0}")]
    Parse(String),

    #[error("Failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to flag UID {uid}: {reason}")]
    Flag { uid: u32, reason: String },

    #[error("Failed to move UID {uid} to {mailbox}: {reason}")]
    Move {
        uid: u32,
        mailbox: String,
        reason: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
