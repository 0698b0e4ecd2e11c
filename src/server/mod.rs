//! TCP front end: accept loop, per-connection pipeline, reaper.

mod chooser;
mod connection;
mod door;
mod lobby;
mod reaper;

pub use chooser::{render_menu, TerminalChooser};
pub use connection::serve_connection;
pub use door::{Authenticator, Door, DoorContext, DoorError, DoorExit, Identity, OpenAuthenticator};
pub use lobby::{LobbyDoor, WelcomeDoor};
pub use reaper::spawn_reaper;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;

use crate::bus::{CloseReason, EventBus};
use crate::config::Config;
use crate::operator::OperatorConsole;
use crate::resume::ResumeNegotiator;
use crate::session::{ReapPolicy, SessionRegistry};
use crate::shutdown::ShutdownManager;
use crate::terminal::{CapabilityProber, TransportKind};

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("invalid bind address '{addr}': {source}")]
    InvalidAddress {
        addr: String,
        source: std::net::AddrParseError,
    },
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("bind() must be called before run()")]
    NotBound,
}

/// Shared state handed to every connection task.
#[derive(Clone)]
pub struct ServerContext {
    pub config: Arc<Config>,
    pub registry: SessionRegistry,
    pub prober: CapabilityProber,
    pub negotiator: ResumeNegotiator,
    pub console: OperatorConsole,
    pub authenticator: Arc<dyn Authenticator>,
    pub entry: Arc<dyn Door>,
    pub shutdown: ShutdownManager,
}

impl ServerContext {
    /// Wire up the core with the bundled guest login and lobby.
    pub fn new(config: Config) -> Self {
        let bus = EventBus::new(&config.bus);
        let registry = SessionRegistry::new(bus, &config.session);
        let lobby: Arc<dyn Door> = Arc::new(LobbyDoor::new());
        Self {
            prober: CapabilityProber::new(&config.terminal),
            negotiator: ResumeNegotiator::new(registry.clone(), &config.session),
            console: OperatorConsole::new(registry.clone()),
            authenticator: Arc::new(OpenAuthenticator::new(&config.server.operators)),
            entry: Arc::new(WelcomeDoor::new(lobby)),
            shutdown: ShutdownManager::new(),
            registry,
            config: Arc::new(config),
        }
    }

    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = authenticator;
        self
    }

    pub fn with_entry_door(mut self, door: Arc<dyn Door>) -> Self {
        self.entry = door;
        self
    }
}

pub struct DoorServer {
    addr: Option<SocketAddr>,
    /// Populated by bind(), consumed by run().
    listener: Option<TcpListener>,
    context: ServerContext,
}

impl DoorServer {
    pub fn new(context: ServerContext) -> Self {
        Self {
            addr: None,
            listener: None,
            context,
        }
    }

    pub fn context(&self) -> &ServerContext {
        &self.context
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.addr
    }

    /// Bind the configured address. The listener is held until run().
    pub async fn bind(&mut self) -> Result<SocketAddr, ServerError> {
        let configured = self.context.config.server.bind_addr.clone();
        let addr: SocketAddr = configured
            .parse()
            .map_err(|source| ServerError::InvalidAddress {
                addr: configured.clone(),
                source,
            })?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        let actual = listener
            .local_addr()
            .map_err(|source| ServerError::Bind { addr, source })?;
        tracing::info!(addr = %actual, "Door server bound");
        self.addr = Some(actual);
        self.listener = Some(listener);
        Ok(actual)
    }

    /// Accept connections until shutdown, then terminate every session and
    /// give connection tasks the grace period to unwind.
    pub async fn run(self) -> Result<(), ServerError> {
        let listener = self.listener.ok_or(ServerError::NotBound)?;
        let ctx = self.context;
        let shutdown = ctx.shutdown.clone();
        let max_connections = ctx.config.server.max_connections;

        let reaper = spawn_reaper(
            ctx.registry.clone(),
            ReapPolicy::from_config(&ctx.config.session),
            ctx.config.session.reap_interval(),
            shutdown.clone(),
        );

        loop {
            let (stream, peer) = tokio::select! {
                _ = shutdown.wait() => break,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::warn!(error = %e, "Accept failed");
                        continue;
                    }
                },
            };

            if shutdown.active_connections() >= max_connections {
                tracing::warn!(%peer, max_connections, "Connection refused, server full");
                tokio::spawn(async move {
                    let mut stream = stream;
                    let _ = stream.write_all(b"Too many users, try again later.\r\n").await;
                    let _ = stream.shutdown().await;
                });
                continue;
            }

            if let Err(e) = stream.set_nodelay(true) {
                tracing::debug!(%peer, error = %e, "Failed to set TCP_NODELAY");
            }
            let (reader, writer) = stream.into_split();
            let ctx = ctx.clone();
            shutdown.increment_connections();
            tokio::spawn(async move {
                let tracker = ctx.shutdown.clone();
                let _active = scopeguard::guard((), move |_| tracker.decrement_connections());
                serve_connection(ctx, TransportKind::Raw, Some(peer.to_string()), reader, writer).await;
            });
        }

        let terminated = ctx.registry.terminate_all(CloseReason::Shutdown);
        tracing::info!(terminated, "Sessions terminated for shutdown");
        shutdown
            .wait_for_connections(ctx.config.server.shutdown_grace())
            .await;
        let _ = reaper.await;
        Ok(())
    }
}
