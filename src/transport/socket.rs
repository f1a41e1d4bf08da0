//! TCP transport with an optional post-connect TLS upgrade.
//!
//! [`TcpTransport`] implements [`Transport`] by spawning one task per
//! connection attempt (a "link"). The link owns the socket; the transport
//! talks to it over a command channel and the link reports back as
//! [`TransportEvent`]s tagged with its attempt. Nothing here blocks the
//! caller.

use std::io::{self, BufReader};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rustls::pki_types::ServerName;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;

use crate::core::{
    AttemptId, ConnectionError, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_CHUNK_SIZE, Endpoint,
    TlsOptions, Transport, TransportEvent,
};

/// Whether `start_tls` performs a TLS handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsMode {
    /// Upgrade every connection with rustls.
    #[default]
    Enabled,
    /// Stay on plaintext TCP; `start_tls` is a no-op.
    Disabled,
}

/// Socket-level settings for [`TcpTransport`].
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// TLS upgrade behaviour.
    pub tls: TlsMode,
    /// Time allowed for the TCP connect, and again for the TLS handshake.
    pub connect_timeout: Duration,
    /// Maximum bytes delivered per read.
    pub read_chunk_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            tls: TlsMode::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
        }
    }
}

#[derive(Debug)]
enum LinkCommand {
    StartTls(TlsOptions),
    Write(Vec<u8>),
    ReadUntil,
}

#[derive(Debug)]
struct Link {
    attempt: AttemptId,
    commands: mpsc::UnboundedSender<LinkCommand>,
    task: JoinHandle<()>,
}

/// Tokio TCP implementation of [`Transport`].
#[derive(Debug)]
pub struct TcpTransport {
    config: TransportConfig,
    events: mpsc::UnboundedSender<TransportEvent>,
    link: Option<Link>,
}

impl TcpTransport {
    /// Create a transport reporting on `events`.
    pub fn new(config: TransportConfig, events: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self {
            config,
            events,
            link: None,
        }
    }

    /// Create a transport together with the receiver of its events.
    pub fn channel(config: TransportConfig) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(config, tx), rx)
    }

    /// Get the transport configuration.
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Attempt owning the live link, if any.
    pub fn active_attempt(&self) -> Option<AttemptId> {
        self.link.as_ref().map(|link| link.attempt)
    }

    fn command(&self, command: LinkCommand) {
        match &self.link {
            Some(link) => {
                if link.commands.send(command).is_err() {
                    tracing::debug!(attempt = %link.attempt, "link already finished");
                }
            }
            None => tracing::debug!(?command, "no active link"),
        }
    }
}

impl Transport for TcpTransport {
    fn connect(&mut self, attempt: AttemptId, endpoint: &Endpoint) -> Result<(), ConnectionError> {
        let handle =
            tokio::runtime::Handle::try_current().map_err(|_| ConnectionError::NoRuntime)?;

        if let Some(old) = self.link.take() {
            tracing::debug!(attempt = %old.attempt, "replacing link");
            old.task.abort();
        }

        let (commands, rx) = mpsc::unbounded_channel();
        let task = handle.spawn(run_link(
            attempt,
            endpoint.clone(),
            self.config.clone(),
            rx,
            self.events.clone(),
        ));
        self.link = Some(Link {
            attempt,
            commands,
            task,
        });
        Ok(())
    }

    fn start_tls(&mut self, options: &TlsOptions) {
        match self.config.tls {
            TlsMode::Enabled => self.command(LinkCommand::StartTls(options.clone())),
            TlsMode::Disabled => tracing::debug!("TLS disabled, staying on plaintext"),
        }
    }

    fn write(&mut self, bytes: Vec<u8>) {
        self.command(LinkCommand::Write(bytes));
    }

    fn read_until(&mut self, _delimiter: &'static [u8]) {
        // Chunks go to the codec as they arrive; it finds the boundaries.
        self.command(LinkCommand::ReadUntil);
    }

    fn disconnect(&mut self) {
        let Some(Link {
            attempt,
            commands,
            task,
        }) = self.link.take()
        else {
            return;
        };

        // A closed command channel tells the link to flush and report the close.
        drop(commands);
        let events = self.events.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(reap(attempt, task, self.config.connect_timeout, events));
            }
            Err(_) => {
                task.abort();
                let _ = events.send(TransportEvent::Closed {
                    attempt,
                    error: None,
                });
            }
        }
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        if let Some(link) = self.link.take() {
            link.task.abort();
        }
    }
}

enum Stream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl Stream {
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Stream::Plain(s) => s.read(buf).await,
            Stream::Tls(s) => s.read(buf).await,
        }
    }

    async fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        match self {
            Stream::Plain(s) => s.write_all(bytes).await,
            Stream::Tls(s) => s.write_all(bytes).await,
        }
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        match self {
            Stream::Plain(s) => s.shutdown().await,
            Stream::Tls(s) => s.shutdown().await,
        }
    }
}

async fn run_link(
    attempt: AttemptId,
    endpoint: Endpoint,
    config: TransportConfig,
    mut commands: mpsc::UnboundedReceiver<LinkCommand>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let closed = |error: Option<ConnectionError>| {
        let _ = events.send(TransportEvent::Closed { attempt, error });
    };

    // Nothing is sent before the connect is reported; a closed channel is a disconnect.
    let connect = tokio::time::timeout(
        config.connect_timeout,
        TcpStream::connect((endpoint.host(), endpoint.port())),
    );
    let tcp = tokio::select! {
        result = connect => match result {
            Ok(Ok(tcp)) => tcp,
            Ok(Err(err)) => return closed(Some(err.into())),
            Err(_) => return closed(Some(ConnectionError::Timeout)),
        },
        None = commands.recv() => return closed(None),
    };
    if let Err(err) = tcp.set_nodelay(true) {
        tracing::debug!(error = %err, "failed to set TCP_NODELAY");
    }
    if events.send(TransportEvent::Connected { attempt }).is_err() {
        return;
    }

    let mut stream = Stream::Plain(tcp);
    let mut buf = vec![0u8; config.read_chunk_size.max(1)];
    let mut read_armed = false;

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(LinkCommand::StartTls(options)) => {
                    let upgrading = handshake(
                        stream,
                        &options,
                        &endpoint,
                        config.connect_timeout,
                        &mut commands,
                        &mut read_armed,
                    );
                    match upgrading.await {
                        Ok(Handshake::Done(upgraded, queued)) => {
                            stream = upgraded;
                            for bytes in queued {
                                if let Err(err) = stream.write_all(&bytes).await {
                                    return closed(Some(err.into()));
                                }
                            }
                        }
                        Ok(Handshake::Cancelled) => return closed(None),
                        Err(err) => return closed(Some(err)),
                    }
                }
                Some(LinkCommand::Write(bytes)) => {
                    if let Err(err) = stream.write_all(&bytes).await {
                        return closed(Some(err.into()));
                    }
                }
                Some(LinkCommand::ReadUntil) => read_armed = true,
                None => {
                    let _ = stream.shutdown().await;
                    return closed(None);
                }
            },
            read = stream.read(&mut buf), if read_armed => match read {
                Ok(0) => return closed(None),
                Ok(n) => {
                    read_armed = false;
                    let chunk = Bytes::copy_from_slice(&buf[..n]);
                    if events.send(TransportEvent::Bytes { attempt, chunk }).is_err() {
                        return;
                    }
                }
                Err(err) => return closed(Some(err.into())),
            },
        }
    }
}

/// Wait out a link whose command channel was dropped, aborting it if it
/// does not finish within `grace`.
async fn reap(
    attempt: AttemptId,
    mut task: JoinHandle<()>,
    grace: Duration,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    if tokio::time::timeout(grace, &mut task).await.is_err() {
        tracing::debug!(%attempt, "link did not shut down, aborting");
        task.abort();
        let _ = events.send(TransportEvent::Closed {
            attempt,
            error: None,
        });
    }
}

enum Handshake {
    Done(Stream, Vec<Vec<u8>>),
    Cancelled,
}

/// Run the TLS upgrade under `limit` while still draining commands.
///
/// Writes issued during the handshake are held back and handed out with the
/// upgraded stream. A closed command channel cancels the handshake.
async fn handshake(
    stream: Stream,
    options: &TlsOptions,
    endpoint: &Endpoint,
    limit: Duration,
    commands: &mut mpsc::UnboundedReceiver<LinkCommand>,
    read_armed: &mut bool,
) -> Result<Handshake, ConnectionError> {
    let upgrading = tokio::time::timeout(limit, upgrade(stream, options, endpoint));
    tokio::pin!(upgrading);
    let mut queued = Vec::new();

    loop {
        tokio::select! {
            result = &mut upgrading => {
                return match result {
                    Ok(Ok(stream)) => Ok(Handshake::Done(stream, queued)),
                    Ok(Err(err)) => Err(err),
                    Err(_) => {
                        tracing::debug!(%endpoint, "TLS handshake timed out");
                        Err(ConnectionError::Timeout)
                    }
                };
            }
            command = commands.recv() => match command {
                Some(LinkCommand::Write(bytes)) => queued.push(bytes),
                Some(LinkCommand::ReadUntil) => *read_armed = true,
                Some(LinkCommand::StartTls(_)) => tracing::debug!("TLS handshake already running"),
                None => return Ok(Handshake::Cancelled),
            },
        }
    }
}

async fn upgrade(
    stream: Stream,
    options: &TlsOptions,
    endpoint: &Endpoint,
) -> Result<Stream, ConnectionError> {
    let tcp = match stream {
        Stream::Plain(tcp) => tcp,
        tls @ Stream::Tls(_) => {
            tracing::debug!("TLS already established");
            return Ok(tls);
        }
    };

    let name = options
        .server_name
        .clone()
        .unwrap_or_else(|| endpoint.host().to_owned());
    let server_name = ServerName::try_from(name.as_str())
        .map(|server_name| server_name.to_owned())
        .map_err(|_| ConnectionError::InvalidServerName(name.clone()))?;

    let connector = TlsConnector::from(Arc::new(tls_config(options)?));
    let tls = connector
        .connect(server_name, tcp)
        .await
        .map_err(|err| ConnectionError::Tls(err.to_string()))?;
    tracing::debug!(%endpoint, "TLS established");
    Ok(Stream::Tls(Box::new(tls)))
}

/// Build the rustls client config: webpki roots plus any roots in `ca_file`.
fn tls_config(options: &TlsOptions) -> Result<rustls::ClientConfig, ConnectionError> {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    if let Some(path) = &options.ca_file {
        let mut reader = BufReader::new(std::fs::File::open(path)?);
        for cert in rustls_pemfile::certs(&mut reader) {
            roots
                .add(cert?)
                .map_err(|err| ConnectionError::Tls(err.to_string()))?;
        }
    }

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|err| ConnectionError::Tls(err.to_string()))?
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(config)
}
