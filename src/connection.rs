//! IMAP connection and TLS helpers
//!
//! [`connect`] opens an authenticated session over plain TCP, implicit
//! TLS or STARTTLS. [`ImapConnection`] wraps such a session as the
//! event source a [`crate::session::MailboxSession`] consumes: the
//! first events report login and SELECT, after which the connection
//! waits in IDLE (or polls with NOOP) and reports new mail.

use crate::config::{ImapConfig, Security};
use crate::coordinator::Connector;
use crate::error::{Error, Result};
use crate::session::{MailConnection, SessionEvent};
use async_imap::Session;
use async_imap::extensions::idle::IdleResponse;
use async_imap::imap_proto::{MailboxDatum, Response, Status};
use async_imap::types::{Fetch, UnsolicitedResponse};
use futures::TryStreamExt;
use rustls::pki_types::ServerName;
use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};
use tracing::{debug, info};

/// A TCP stream, optionally wrapped in TLS.
#[derive(Debug)]
pub enum ImapStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for ImapStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            Self::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ImapStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            Self::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_flush(cx),
            Self::Tls(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            Self::Tls(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// An authenticated IMAP session.
pub type ImapSession = Session<Compat<ImapStream>>;

type ImapResult<T> = std::result::Result<T, async_imap::error::Error>;

/// Build a TLS connector.
///
/// Certificates are checked against the Mozilla root set unless
/// `accept_invalid_certs` is set, in which case anything is accepted
/// (local bridges with self-signed certificates).
fn tls_connector(accept_invalid_certs: bool) -> TlsConnector {
    let config = if accept_invalid_certs {
        rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(DangerousVerifier))
            .with_no_client_auth()
    } else {
        let roots = rustls::RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        };
        rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth()
    };
    TlsConnector::from(Arc::new(config))
}

async fn handshake(config: &ImapConfig, tcp: TcpStream) -> Result<ImapStream> {
    let server_name = ServerName::try_from(config.host.clone())
        .map_err(|e| Error::Tls(format!("Invalid server name: {e}")))?;
    let tls = tls_connector(config.accept_invalid_certs)
        .connect(server_name, tcp)
        .await
        .map_err(|e| Error::Tls(e.to_string()))?;
    Ok(ImapStream::Tls(Box::new(tls)))
}

async fn starttls(config: &ImapConfig, tcp: TcpStream) -> Result<ImapStream> {
    let mut client = async_imap::Client::new(tcp.compat());
    client
        .run_command_and_check_ok("STARTTLS", None)
        .await
        .map_err(|e| Error::Tls(format!("STARTTLS failed: {e}")))?;

    let tcp = client.into_inner().into_inner();
    handshake(config, tcp).await
}

/// Open a fresh authenticated IMAP session.
///
/// # Errors
///
/// Returns [`Error::Connection`] if the server cannot be reached or
/// rejects the login, and [`Error::Tls`] if the TLS setup fails.
pub async fn connect(config: &ImapConfig) -> Result<ImapSession> {
    let addr = format!("{}:{}", config.host, config.port);
    let security = config.security();
    debug!(%addr, ?security, "Connecting to IMAP server");

    let tcp = TcpStream::connect(&addr)
        .await
        .map_err(|e| Error::Connection(format!("Cannot reach {addr}: {e}")))?;

    let stream = match security {
        Security::Plain => ImapStream::Plain(tcp),
        Security::Tls => handshake(config, tcp).await?,
        Security::StartTls => starttls(config, tcp).await?,
    };

    let session = async_imap::Client::new(stream.compat())
        .login(&config.username, &config.password)
        .await
        .map_err(|(e, _)| Error::Connection(format!("Login failed: {e}")))?;

    info!(host = %config.host, "Connected to IMAP server");
    Ok(session)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Connect,
    Open,
    Watch,
    Closed,
}

/// Why a wait in the watch loop returned.
enum Wake {
    Quiet,
    NewMail(u32),
    Closed,
}

/// A connection bound to one mailbox, driven through
/// [`MailConnection::next_event`].
pub struct ImapConnection {
    config: ImapConfig,
    mailbox: String,
    session: Option<ImapSession>,
    stage: Stage,
    exists: u32,
    can_idle: bool,
    can_move: bool,
    can_uid_expunge: bool,
}

impl ImapConnection {
    #[must_use]
    pub fn new(config: ImapConfig, mailbox: impl Into<String>) -> Self {
        Self {
            config,
            mailbox: mailbox.into(),
            session: None,
            stage: Stage::Connect,
            exists: 0,
            can_idle: false,
            can_move: false,
            can_uid_expunge: false,
        }
    }

    #[must_use]
    pub fn mailbox(&self) -> &str {
        &self.mailbox
    }

    /// Whether the server advertised IDLE. Known after `Ready`.
    #[must_use]
    pub const fn supports_idle(&self) -> bool {
        self.can_idle
    }

    /// Whether the server advertised MOVE. Known after `Ready`.
    #[must_use]
    pub const fn supports_move(&self) -> bool {
        self.can_move
    }

    /// Whether the server advertised UIDPLUS. Known after `Ready`.
    #[must_use]
    pub const fn supports_uid_expunge(&self) -> bool {
        self.can_uid_expunge
    }

    /// Log out if a session is still open. Later events are `End`.
    async fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            match tokio::time::timeout(LOGOUT_TIMEOUT, session.logout()).await {
                Ok(Ok(())) => debug!(mailbox = %self.mailbox, "Logged out"),
                Ok(Err(e)) => debug!(mailbox = %self.mailbox, error = %e, "Logout failed"),
                Err(_) => debug!(mailbox = %self.mailbox, "Logout timed out"),
            }
        }
        self.stage = Stage::Closed;
    }

    async fn establish(&mut self) -> Result<()> {
        let mut session = connect(&self.config).await?;
        let capabilities = session
            .capabilities()
            .await
            .map_err(|e| Error::Connection(format!("CAPABILITY failed: {e}")))?;
        self.can_idle = capabilities.has_str("IDLE");
        self.can_move = capabilities.has_str("MOVE");
        self.can_uid_expunge = capabilities.has_str("UIDPLUS");
        debug!(
            idle = self.can_idle,
            uid_move = self.can_move,
            uidplus = self.can_uid_expunge,
            "Server capabilities"
        );

        self.session = Some(session);
        self.stage = Stage::Open;
        Ok(())
    }

    async fn open(&mut self) -> Result<u32> {
        let session = self.session.as_mut().ok_or_else(not_connected)?;
        let selected = session
            .select(&self.mailbox)
            .await
            .map_err(|e| Error::Connection(format!("Failed to select {}: {e}", self.mailbox)))?;

        self.exists = selected.exists;
        self.drain_unsolicited();
        self.stage = Stage::Watch;
        Ok(selected.exists)
    }

    async fn watch(&mut self) -> Result<SessionEvent> {
        loop {
            let grown = self.drain_unsolicited();
            if grown > 0 {
                return Ok(SessionEvent::NewMail(grown));
            }

            let wake = if self.can_idle {
                self.idle().await?
            } else {
                self.poll().await?
            };
            match wake {
                Wake::Quiet => {}
                Wake::NewMail(count) => return Ok(SessionEvent::NewMail(count)),
                Wake::Closed => {
                    self.session = None;
                    self.stage = Stage::Closed;
                    return Ok(SessionEvent::End);
                }
            }
        }
    }

    /// One IDLE round, ended by server data or the keep-alive timeout.
    async fn idle(&mut self) -> Result<Wake> {
        let session = self.session.take().ok_or_else(not_connected)?;
        let mut handle = session.idle();
        handle
            .init()
            .await
            .map_err(|e| Error::Connection(format!("IDLE failed: {e}")))?;

        let (wait, _stop) = handle.wait_with_timeout(self.config.idle_timeout());
        let response = match wait.await {
            Ok(response) => response,
            Err(e) if is_closed(&e) => return Ok(Wake::Closed),
            Err(e) => return Err(Error::Connection(format!("IDLE wait failed: {e}"))),
        };

        let mut wake = Wake::Quiet;
        if let IdleResponse::NewData(data) = &response {
            match data.parsed() {
                Response::MailboxData(MailboxDatum::Exists(n)) => {
                    let grown = grow(&mut self.exists, *n);
                    if grown > 0 {
                        wake = Wake::NewMail(grown);
                    }
                }
                Response::Expunge(_) => self.exists = self.exists.saturating_sub(1),
                Response::Data {
                    status: Status::Bye,
                    ..
                } => return Ok(Wake::Closed),
                other => debug!(?other, "IDLE data"),
            }
        }

        // A hangup mid-IDLE surfaces here: the wait reports an interrupt
        // and DONE finds the stream closed.
        match handle.done().await {
            Ok(session) => {
                self.session = Some(session);
                Ok(wake)
            }
            Err(e) if is_closed(&e) => Ok(Wake::Closed),
            Err(e) => Err(Error::Connection(format!("IDLE DONE failed: {e}"))),
        }
    }

    /// Sleep for the poll interval, then NOOP so the server can report
    /// changes.
    async fn poll(&mut self) -> Result<Wake> {
        tokio::time::sleep(self.config.poll_interval()).await;
        let session = self.session.as_mut().ok_or_else(not_connected)?;
        match session.noop().await {
            Ok(()) => Ok(Wake::Quiet),
            Err(e) if is_closed(&e) => Ok(Wake::Closed),
            Err(e) => Err(Error::Connection(format!("NOOP failed: {e}"))),
        }
    }

    /// Consume buffered untagged responses and return how many
    /// messages arrived.
    fn drain_unsolicited(&mut self) -> u32 {
        let Some(session) = self.session.as_ref() else {
            return 0;
        };
        let mut grown = 0;
        while let Ok(response) = session.unsolicited_responses.try_recv() {
            match response {
                UnsolicitedResponse::Exists(n) => grown += grow(&mut self.exists, n),
                UnsolicitedResponse::Expunge(_) => self.exists = self.exists.saturating_sub(1),
                other => debug!(?other, "Unsolicited response"),
            }
        }
        grown
    }
}

impl fmt::Debug for ImapConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImapConnection")
            .field("mailbox", &self.mailbox)
            .field("stage", &self.stage)
            .field("exists", &self.exists)
            .finish_non_exhaustive()
    }
}

impl MailConnection for ImapConnection {
    async fn next_event(&mut self) -> SessionEvent {
        let event = match self.stage {
            Stage::Connect => self.establish().await.map(|()| SessionEvent::Ready),
            Stage::Open => self
                .open()
                .await
                .map(|exists| SessionEvent::BoxOpened { exists }),
            Stage::Watch => self.watch().await,
            Stage::Closed => Ok(SessionEvent::End),
        };

        match event {
            Ok(event) => event,
            Err(e) => {
                self.close().await;
                SessionEvent::Error(e)
            }
        }
    }

    async fn search(&mut self, query: &str) -> Result<Vec<u32>> {
        let session = self.session.as_mut().ok_or_else(not_connected)?;
        let found = session
            .uid_search(query)
            .await
            .map_err(|e| Error::Search {
                mailbox: self.mailbox.clone(),
                reason: e.to_string(),
            })?;

        let mut uids: Vec<u32> = found.into_iter().collect();
        uids.sort_unstable();
        debug!(mailbox = %self.mailbox, query, matches = uids.len(), "UID SEARCH");
        Ok(uids)
    }

    async fn fetch_raw(&mut self, uid: u32) -> Result<Vec<u8>> {
        let fetch_err = move |e: async_imap::error::Error| Error::Fetch {
            uid,
            reason: e.to_string(),
        };
        let session = self.session.as_mut().ok_or_else(not_connected)?;
        let fetches: Vec<Fetch> = session
            .uid_fetch(uid.to_string(), "(UID BODY.PEEK[])")
            .await
            .map_err(fetch_err)?
            .try_collect()
            .await
            .map_err(fetch_err)?;

        fetches
            .iter()
            .find(|f| f.uid == Some(uid))
            .or_else(|| fetches.first())
            .and_then(Fetch::body)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| Error::Fetch {
                uid,
                reason: "no body in response".into(),
            })
    }

    async fn add_keyword(&mut self, uid: u32, keyword: &str) -> Result<()> {
        let flag_err = move |e: async_imap::error::Error| Error::Flag {
            uid,
            reason: e.to_string(),
        };
        let session = self.session.as_mut().ok_or_else(not_connected)?;
        session
            .uid_store(uid.to_string(), format!("+FLAGS ({keyword})"))
            .await
            .map_err(flag_err)?
            .try_collect::<Vec<Fetch>>()
            .await
            .map_err(flag_err)?;
        Ok(())
    }

    async fn move_message(&mut self, uid: u32, mailbox: &str) -> Result<()> {
        let move_err = |e: async_imap::error::Error| Error::Move {
            uid,
            mailbox: mailbox.to_string(),
            reason: e.to_string(),
        };
        let uid_set = uid.to_string();
        let session = self.session.as_mut().ok_or_else(not_connected)?;

        if self.can_move {
            session.uid_mv(&uid_set, mailbox).await.map_err(move_err)?;
            return Ok(());
        }

        session.uid_copy(&uid_set, mailbox).await.map_err(move_err)?;
        let removed = if self.can_uid_expunge {
            store_silent(session, &uid_set, "+FLAGS.SILENT (\\Deleted)")
                .await
                .map_err(move_err)?;
            session
                .uid_expunge(&uid_set)
                .await
                .map_err(move_err)?
                .try_collect::<Vec<u32>>()
                .await
                .map_err(move_err)?
                .len()
        } else {
            expunge_only(session, uid).await.map_err(move_err)?
        };

        let removed = u32::try_from(removed).unwrap_or(u32::MAX);
        self.exists = self.exists.saturating_sub(removed);
        Ok(())
    }
}

/// Expunge `uid` on a server without UIDPLUS.
///
/// Plain EXPUNGE removes every `\Deleted` message, so other messages
/// already marked deleted lose the flag for the duration and get it
/// back afterwards, whether or not the expunge succeeded.
async fn expunge_only(session: &mut ImapSession, uid: u32) -> ImapResult<usize> {
    let mut others: Vec<u32> = session
        .uid_search("DELETED")
        .await?
        .into_iter()
        .filter(|&other| other != uid)
        .collect();
    others.sort_unstable();
    let others = join_uids(&others);

    if let Some(set) = &others {
        debug!(uids = %set, "Shielding deleted messages from EXPUNGE");
        store_silent(session, set, "-FLAGS.SILENT (\\Deleted)").await?;
    }
    let expunged: ImapResult<Vec<u32>> = async {
        store_silent(session, &uid.to_string(), "+FLAGS.SILENT (\\Deleted)").await?;
        session.expunge().await?.try_collect::<Vec<u32>>().await
    }
    .await;
    if let Some(set) = &others {
        store_silent(session, set, "+FLAGS.SILENT (\\Deleted)").await?;
    }
    Ok(expunged?.len())
}

async fn store_silent(session: &mut ImapSession, set: &str, query: &str) -> ImapResult<()> {
    session
        .uid_store(set, query)
        .await?
        .try_collect::<Vec<Fetch>>()
        .await?;
    Ok(())
}

/// Comma-joined UID set, `None` when empty.
fn join_uids(uids: &[u32]) -> Option<String> {
    (!uids.is_empty()).then(|| {
        uids.iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",")
    })
}

/// Opens an [`ImapConnection`] per mailbox with shared settings.
#[derive(Debug, Clone)]
pub struct ImapConnector {
    config: ImapConfig,
}

impl ImapConnector {
    #[must_use]
    pub const fn new(config: ImapConfig) -> Self {
        Self { config }
    }
}

impl Connector for ImapConnector {
    type Connection = ImapConnection;

    fn connect(&self, mailbox: &str) -> ImapConnection {
        ImapConnection::new(self.config.clone(), mailbox)
    }
}

const LOGOUT_TIMEOUT: Duration = Duration::from_secs(5);

fn not_connected() -> Error {
    Error::Connection("not connected".into())
}

/// Record a new EXISTS count and return how much the mailbox grew.
fn grow(exists: &mut u32, reported: u32) -> u32 {
    let grown = reported.saturating_sub(*exists);
    *exists = reported;
    grown
}

fn is_closed(error: &async_imap::error::Error) -> bool {
    match error {
        async_imap::error::Error::ConnectionLost => true,
        async_imap::error::Error::Io(e) => matches!(
            e.kind(),
            io::ErrorKind::UnexpectedEof | io::ErrorKind::ConnectionReset
        ),
        _ => false,
    }
}

/// Certificate verifier that accepts all certificates.
#[derive(Debug)]
struct DangerousVerifier;

impl rustls::client::danger::ServerCertVerifier for DangerousVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
