//! High-level async LDT client API.
//!
//! [`LdtClient`] is a cloneable handle to a driver task that owns one
//! [`ConnectionSupervisor`]. Public operations, transport events and cooldown
//! firings are all applied on that task, one at a time. An operation resolves
//! once the supervisor has applied it, not when the network completes.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use super::bootstrap::{ClientConfig, ConfigError};
use super::events::{ChannelSubscriber, ClientEvent};
use crate::core::{AttemptId, Endpoint, SupervisorError, SupervisorResult, TimerId, TransportEvent};
use crate::transport::{
    ConnectionState, ConnectionSupervisor, Subscriber, TcpTransport, TlsMode, TokioScheduler,
};

/// Depth of the command queue between handles and the driver.
const COMMAND_QUEUE: usize = 64;

/// Errors that can occur in the LDT client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// `connect` without an endpoint in the configuration.
    #[error("no endpoint configured")]
    NoEndpoint,

    /// Client created outside a tokio runtime.
    #[error("no tokio runtime available")]
    NoRuntime,

    /// Configuration rejected by [`ClientConfig::validate`].
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// Operation rejected by the supervisor.
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    /// Driver task is gone.
    #[error("client has shut down")]
    Shutdown,
}

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Point-in-time view of the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientStatus {
    /// Lifecycle state.
    pub state: ConnectionState,
    /// Whether a new attempt may start now.
    pub can_retry: bool,
    /// Endpoint of the last start.
    pub endpoint: Option<Endpoint>,
    /// Current (or last) attempt.
    pub attempt: AttemptId,
    /// Registered subscribers.
    pub subscribers: usize,
}

/// Builder for creating an `LdtClient`.
#[derive(Debug)]
pub struct LdtClientBuilder {
    config: ClientConfig,
}

impl LdtClientBuilder {
    /// Create a new client builder.
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
        }
    }

    /// Start from an existing configuration (e.g. [`ClientConfig::from_env`]).
    pub fn from_config(config: ClientConfig) -> Self {
        Self { config }
    }

    /// Set the endpoint used by [`LdtClient::connect`].
    pub fn endpoint(mut self, endpoint: Endpoint) -> Self {
        self.config.endpoint = Some(endpoint);
        self
    }

    /// Set the reconnect cooldown. Zero is rejected by `spawn`.
    pub fn cooldown(mut self, cooldown: Duration) -> Self {
        self.config.cooldown = cooldown;
        self
    }

    /// Set the connect and TLS handshake timeout. Zero is rejected by `spawn`.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Enable or disable the TLS upgrade.
    pub fn tls(mut self, mode: TlsMode) -> Self {
        self.config.tls = mode;
        self
    }

    /// Verify the server certificate against this name instead of the host.
    pub fn tls_server_name(mut self, name: impl Into<String>) -> Self {
        self.config.tls_options.server_name = Some(name.into());
        self
    }

    /// Trust the certificates in this PEM file in addition to the web roots.
    pub fn tls_ca_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.tls_options.ca_file = Some(path.into());
        self
    }

    /// Set the inbound buffering limit.
    pub fn max_buffered_bytes(mut self, max: usize) -> Self {
        self.config.max_buffered_bytes = max;
        self
    }

    /// Set the socket read size.
    pub fn read_chunk_size(mut self, size: usize) -> Self {
        self.config.read_chunk_size = size;
        self
    }

    /// Build the client configuration.
    pub fn build(self) -> ClientConfig {
        self.config
    }

    /// Build the configuration and spawn the client on the current runtime.
    pub fn spawn(self) -> ClientResult<LdtClient> {
        LdtClient::spawn(self.config)
    }
}

impl Default for LdtClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

type Reply<T> = oneshot::Sender<T>;

enum Command {
    Start(Endpoint, Reply<SupervisorResult<()>>),
    Stop(Reply<()>),
    Send(String, Reply<SupervisorResult<()>>),
    SendRequest(String, String, Reply<SupervisorResult<()>>),
    Subscribe(Arc<dyn Subscriber>, Reply<()>),
    Unsubscribe(Arc<dyn Subscriber>, Reply<()>),
    ResetRetry(Reply<SupervisorResult<()>>),
    Status(Reply<ClientStatus>),
    Shutdown(Reply<()>),
}

/// An LDT protocol client.
///
/// Cheap to clone; all clones drive the same connection. The connection is
/// torn down when the last clone is dropped or on [`LdtClient::shutdown`].
///
/// # Example
///
/// ```no_run
/// use ldt_client::prelude::*;
///
/// # async fn run() -> Result<(), ClientError> {
/// let endpoint = "live.example.com:7000"
///     .parse::<Endpoint>()
///     .map_err(SupervisorError::from)?;
/// let client = LdtClient::builder().endpoint(endpoint).spawn()?;
///
/// let mut events = client.events().await?;
/// client.connect().await?;
///
/// while let Some(event) = events.recv().await {
///     if let ClientEvent::Message { message, .. } = event {
///         println!("{}: {}", message.status_or_route(), message.body());
///     }
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct LdtClient {
    commands: mpsc::Sender<Command>,
    config: Arc<ClientConfig>,
}

impl LdtClient {
    /// Create a builder.
    pub fn builder() -> LdtClientBuilder {
        LdtClientBuilder::new()
    }

    /// Spawn the driver task on the current tokio runtime.
    ///
    /// Nothing connects until [`start`](Self::start) or
    /// [`connect`](Self::connect) is called.
    pub fn spawn(config: ClientConfig) -> ClientResult<Self> {
        config.validate()?;
        let handle = tokio::runtime::Handle::try_current().map_err(|_| ClientError::NoRuntime)?;

        let (transport, transport_events) = TcpTransport::channel(config.transport_config());
        let (scheduler, timers) = TokioScheduler::channel();
        let supervisor =
            ConnectionSupervisor::new(config.supervisor_config(), transport, scheduler);
        let (commands, rx) = mpsc::channel(COMMAND_QUEUE);

        let driver = Driver {
            supervisor,
            commands: rx,
            transport_events,
            timers,
        };
        handle.spawn(driver.run());
        tracing::debug!(endpoint = ?config.endpoint, tls = ?config.tls, "client spawned");

        Ok(Self {
            commands,
            config: Arc::new(config),
        })
    }

    /// Get the client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Start connecting to `endpoint`.
    ///
    /// No-op while connected, while an attempt is outstanding, or during the
    /// cooldown; the endpoint is remembered either way and used by the next
    /// retry. Returns an error only if the attempt could not be initiated, in
    /// which case the cooldown retry is already armed.
    pub async fn start(&self, endpoint: Endpoint) -> ClientResult<()> {
        self.call(|reply| Command::Start(endpoint, reply)).await??;
        Ok(())
    }

    /// Start connecting to the configured endpoint.
    pub async fn connect(&self) -> ClientResult<()> {
        let endpoint = self.config.endpoint.clone().ok_or(ClientError::NoEndpoint)?;
        self.start(endpoint).await
    }

    /// Disconnect without notifying subscribers and cancel any pending retry.
    pub async fn stop(&self) -> ClientResult<()> {
        self.call(Command::Stop).await
    }

    /// Send pre-formatted frame text; the delimiter is appended.
    pub async fn send(&self, text: impl Into<String>) -> ClientResult<()> {
        let text = text.into();
        self.call(|reply| Command::Send(text, reply)).await??;
        Ok(())
    }

    /// Send a `{route} / {data}` request frame.
    pub async fn send_request(
        &self,
        route: impl Into<String>,
        data: impl Into<String>,
    ) -> ClientResult<()> {
        let (route, data) = (route.into(), data.into());
        self.call(|reply| Command::SendRequest(route, data, reply))
            .await??;
        Ok(())
    }

    /// Register a subscriber. Registering the same `Arc` twice is a no-op.
    pub async fn subscribe(&self, subscriber: Arc<dyn Subscriber>) -> ClientResult<()> {
        self.call(|reply| Command::Subscribe(subscriber, reply))
            .await
    }

    /// Remove a subscriber. Unknown subscribers are ignored.
    pub async fn unsubscribe(&self, subscriber: Arc<dyn Subscriber>) -> ClientResult<()> {
        self.call(|reply| Command::Unsubscribe(subscriber, reply))
            .await
    }

    /// Subscribe a fresh [`ChannelSubscriber`] and return its receiver.
    ///
    /// Dropping the receiver releases the subscription.
    pub async fn events(&self) -> ClientResult<mpsc::UnboundedReceiver<ClientEvent>> {
        let (subscriber, rx) = ChannelSubscriber::channel();
        self.subscribe(subscriber).await?;
        Ok(rx)
    }

    /// Skip the remaining cooldown and retry the last endpoint now.
    pub async fn reset_retry(&self) -> ClientResult<()> {
        self.call(Command::ResetRetry).await??;
        Ok(())
    }

    /// Snapshot of the supervisor.
    pub async fn status(&self) -> ClientResult<ClientStatus> {
        self.call(Command::Status).await
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> ClientResult<ConnectionState> {
        Ok(self.status().await?.state)
    }

    /// Check if the client is connected.
    pub async fn is_connected(&self) -> bool {
        matches!(self.state().await, Ok(ConnectionState::Connected))
    }

    /// Stop the connection and end the driver task.
    ///
    /// Every clone fails with [`ClientError::Shutdown`] afterwards.
    pub async fn shutdown(&self) -> ClientResult<()> {
        self.call(Command::Shutdown).await
    }

    async fn call<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> ClientResult<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .await
            .map_err(|_| ClientError::Shutdown)?;
        rx.await.map_err(|_| ClientError::Shutdown)
    }
}

/// Owns the supervisor and serializes every input to it.
struct Driver {
    supervisor: ConnectionSupervisor<TcpTransport, TokioScheduler>,
    commands: mpsc::Receiver<Command>,
    transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    timers: mpsc::UnboundedReceiver<TimerId>,
}

impl Driver {
    async fn run(self) {
        let Driver {
            mut supervisor,
            mut commands,
            mut transport_events,
            mut timers,
        } = self;

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown(reply)) => {
                        supervisor.stop();
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => apply(&mut supervisor, command),
                    None => {
                        supervisor.stop();
                        break;
                    }
                },
                Some(event) = transport_events.recv() => supervisor.handle_event(event),
                Some(id) = timers.recv() => supervisor.on_cooldown_elapsed(id),
            }
        }
        tracing::debug!("client driver stopped");
    }
}

fn apply(supervisor: &mut ConnectionSupervisor<TcpTransport, TokioScheduler>, command: Command) {
    // A dropped reply receiver only means the caller stopped waiting.
    match command {
        Command::Start(endpoint, reply) => {
            let _ = reply.send(supervisor.start(endpoint));
        }
        Command::Stop(reply) => {
            supervisor.stop();
            let _ = reply.send(());
        }
        Command::Send(text, reply) => {
            let _ = reply.send(supervisor.send(&text));
        }
        Command::SendRequest(route, data, reply) => {
            let _ = reply.send(supervisor.send_request(&route, &data));
        }
        Command::Subscribe(subscriber, reply) => {
            supervisor.subscribe(subscriber);
            let _ = reply.send(());
        }
        Command::Unsubscribe(subscriber, reply) => {
            supervisor.unsubscribe(&subscriber);
            let _ = reply.send(());
        }
        Command::ResetRetry(reply) => {
            let _ = reply.send(supervisor.reset_retry());
        }
        Command::Status(reply) => {
            supervisor.prune_subscribers();
            let _ = reply.send(ClientStatus {
                state: supervisor.state(),
                can_retry: supervisor.can_retry(),
                endpoint: supervisor.endpoint().cloned(),
                attempt: supervisor.attempt(),
                subscribers: supervisor.subscriber_count(),
            });
        }
        Command::Shutdown(reply) => {
            supervisor.stop();
            let _ = reply.send(());
        }
    }
}
