//! Configuration loading
//!
//! The configuration is a single JSON document holding IMAP
//! credentials, the ordered filter list and logging options. When the
//! document has no `imap` section the connection settings are read
//! from the environment instead.

use crate::criteria;
use crate::error::{Error, Result};
use crate::filter::FilterRule;
use crate::marker::{DEFAULT_KEYWORD, ProcessedMarker};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use std::{env, fmt};

/// Environment variable naming the config file.
pub const CONFIG_PATH_ENV: &str = "IMAP_TO_FS_CONFIG";

/// Config file used when neither `--config` nor the env var is given.
pub const DEFAULT_CONFIG_PATH: &str = "config.json";

/// How the TCP connection to the server is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Security {
    /// TLS from the first byte (usually port 993).
    Tls,
    /// Plain connection upgraded with `STARTTLS`.
    StartTls,
    /// No encryption at all.
    Plain,
}

/// IMAP connection configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImapConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(alias = "user")]
    pub username: String,
    pub password: String,
    #[serde(default = "default_true", alias = "useEncryption")]
    pub tls: bool,
    #[serde(default)]
    pub starttls: bool,
    #[serde(default)]
    pub accept_invalid_certs: bool,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

const fn default_port() -> u16 {
    993
}

const fn default_true() -> bool {
    true
}

/// RFC 2177 asks clients to re-issue IDLE at least every 29 minutes.
const fn default_idle_timeout() -> u64 {
    29 * 60
}

const fn default_poll_interval() -> u64 {
    60
}

impl ImapConfig {
    /// Load IMAP configuration from environment variables
    ///
    /// Reads from `.env` file if present. Required variables:
    /// - `IMAP_HOST`
    /// - `IMAP_USERNAME`
    /// - `IMAP_PASSWORD`
    ///
    /// Optional (with defaults):
    /// - `IMAP_PORT` (default: `993`)
    /// - `IMAP_TLS` (default: `true`)
    /// - `IMAP_STARTTLS` (default: `false`)
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigMissing`] when `IMAP_USERNAME` is unset
    /// and [`Error::Config`] for any other missing or invalid value.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let username = env::var("IMAP_USERNAME").map_err(|_| Error::ConfigMissing)?;

        Ok(Self {
            host: env::var("IMAP_HOST").map_err(|_| Error::Config("IMAP_HOST not set".into()))?,
            port: env::var("IMAP_PORT")
                .unwrap_or_else(|_| default_port().to_string())
                .parse()
                .map_err(|e| Error::Config(format!("Invalid IMAP_PORT: {e}")))?,
            username,
            password: env::var("IMAP_PASSWORD")
                .map_err(|_| Error::Config("IMAP_PASSWORD not set".into()))?,
            tls: env_flag("IMAP_TLS", true)?,
            starttls: env_flag("IMAP_STARTTLS", false)?,
            accept_invalid_certs: env_flag("IMAP_ACCEPT_INVALID_CERTS", false)?,
            idle_timeout_secs: default_idle_timeout(),
            poll_interval_secs: default_poll_interval(),
        })
    }

    #[must_use]
    pub const fn security(&self) -> Security {
        if self.tls {
            Security::Tls
        } else if self.starttls {
            Security::StartTls
        } else {
            Security::Plain
        }
    }

    #[must_use]
    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl fmt::Debug for ImapConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImapConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("security", &self.security())
            .field("accept_invalid_certs", &self.accept_invalid_certs)
            .finish_non_exhaustive()
    }
}

fn env_flag(name: &str, default: bool) -> Result<bool> {
    match env::var(name) {
        Err(_) => Ok(default),
        Ok(value) => match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(Error::Config(format!("Invalid {name}: {other}"))),
        },
    }
}

/// Logging options. Applied once by the binary at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    /// Enable debug output for this crate.
    #[serde(default)]
    pub debug: bool,
    /// Explicit `tracing` filter directive, e.g. `imap_to_fs=trace`.
    #[serde(default)]
    pub filter: Option<String>,
}

impl LoggingConfig {
    /// The filter directive to install when `RUST_LOG` is unset.
    #[must_use]
    pub fn directive(&self) -> String {
        self.filter.clone().unwrap_or_else(|| {
            if self.debug {
                "imap_to_fs=debug,info".to_string()
            } else {
                "info".to_string()
            }
        })
    }
}

/// The complete configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub imap: Option<ImapConfig>,
    #[serde(default)]
    pub filters: Vec<FilterRule>,
    #[serde(default, alias = "logger")]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub processed_keyword: Option<String>,
}

impl Config {
    /// Load the configuration from a JSON file.
    ///
    /// A missing `imap` section is filled from the environment when
    /// possible (see [`ImapConfig::from_env`]).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the file cannot be read or parsed,
    /// or if the environment fallback holds invalid values.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Cannot read {}: {e}", path.display())))?;
        let mut config = Self::from_json(&text)?;

        if config.imap.is_none() {
            match ImapConfig::from_env() {
                Ok(imap) => config.imap = Some(imap),
                Err(Error::ConfigMissing) => {}
                Err(e) => return Err(e),
            }
        }

        tracing::debug!(
            path = %path.display(),
            filters = config.filters.len(),
            "Config loaded"
        );
        Ok(config)
    }

    /// Parse a configuration document without touching the
    /// environment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the JSON is malformed or
    /// `processedKeyword` is not an IMAP atom.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| Error::Config(format!("Invalid config: {e}")))?;
        if let Some(keyword) = config
            .processed_keyword
            .as_deref()
            .filter(|k| !criteria::is_atom(k))
        {
            return Err(Error::Config(format!(
                "Invalid processedKeyword '{keyword}': must be a single IMAP atom"
            )));
        }
        Ok(config)
    }

    /// The config path from `IMAP_TO_FS_CONFIG`, else `config.json`.
    #[must_use]
    pub fn default_path() -> String {
        dotenvy::dotenv().ok();
        env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
    }

    /// The IMAP connection settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigMissing`] if no IMAP section was found.
    pub fn imap_config(&self) -> Result<&ImapConfig> {
        self.imap.as_ref().ok_or(Error::ConfigMissing)
    }

    /// The filter rules, in file order.
    #[must_use]
    pub fn filters(&self) -> &[FilterRule] {
        &self.filters
    }

    #[must_use]
    pub fn marker(&self) -> ProcessedMarker {
        ProcessedMarker::new(
            self.processed_keyword
                .as_deref()
                .unwrap_or(DEFAULT_KEYWORD),
        )
    }
}
