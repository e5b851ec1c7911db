//! Modbus TCP server listener
//!
//! Owns the listening socket, the connection registry and the handler
//! tasks. `start` binds and spawns the accept loop; `stop` cancels every
//! handler and waits for all of them before returning.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::connection::{
    ConnectionHandler, ConnectionId, ConnectionInfo, ConnectionShared, DisconnectReason,
};
use crate::error::{MbSrvError, Result};
use crate::store::RegisterStore;

/// Capacity of the connect/disconnect event channel
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Back-off after a failed accept (e.g. file descriptor exhaustion)
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

pub type ConnectionRegistry = DashMap<ConnectionId, Arc<ConnectionShared>>;

/// Connection lifecycle notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    Connected {
        id: ConnectionId,
        peer: SocketAddr,
    },
    /// `id` is `None` for clients refused before registration
    Disconnected {
        id: Option<ConnectionId>,
        peer: SocketAddr,
        reason: DisconnectReason,
    },
}

/// Server counters
#[derive(Debug, Default)]
pub struct ServerStats {
    accepted: AtomicU64,
    rejected: AtomicU64,
    displaced: AtomicU64,
    requests: AtomicU64,
    exceptions: AtomicU64,
    protocol_errors: AtomicU64,
}

impl ServerStats {
    pub(crate) fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_displaced(&self) {
        self.displaced.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_exception(&self) {
        self.exceptions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, active: usize) -> StatsSnapshot {
        StatsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            displaced: self.displaced.load(Ordering::Relaxed),
            requests: self.requests.load(Ordering::Relaxed),
            exceptions: self.exceptions.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
            active,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub accepted: u64,
    pub rejected: u64,
    pub displaced: u64,
    pub requests: u64,
    pub exceptions: u64,
    pub protocol_errors: u64,
    pub active: usize,
}

/// State shared by the accept loop and every connection handler
pub(crate) struct ServerContext {
    pub(crate) store: Arc<RegisterStore>,
    pub(crate) stats: Arc<ServerStats>,
    pub(crate) registry: Arc<ConnectionRegistry>,
    pub(crate) events: broadcast::Sender<ServerEvent>,
    pub(crate) idle_timeout: Duration,
}

pub struct ModbusTcpServer {
    config: ServerConfig,
    ctx: Arc<ServerContext>,
    shutdown: CancellationToken,
    local_addr: Option<SocketAddr>,
    accept_task: Option<JoinHandle<()>>,
}

impl ModbusTcpServer {
    /// Validate `config` and build the register store from it
    pub fn new(config: ServerConfig) -> Result<Self> {
        config.validate()?;
        let store = RegisterStore::from_config(&config.tables)?;
        Ok(Self::with_store(config, Arc::new(store)))
    }

    /// Serve a store the caller keeps a handle to
    pub fn with_store(config: ServerConfig, store: Arc<RegisterStore>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let ctx = Arc::new(ServerContext {
            store,
            stats: Arc::new(ServerStats::default()),
            registry: Arc::new(DashMap::new()),
            events,
            idle_timeout: config.idle_timeout,
        });

        Self {
            config,
            ctx,
            shutdown: CancellationToken::new(),
            local_addr: None,
            accept_task: None,
        }
    }

    /// Bind the listener and start accepting clients
    ///
    /// Bind failures are returned immediately.
    pub async fn start(&mut self) -> Result<SocketAddr> {
        if self.accept_task.is_some() {
            return Err(MbSrvError::StateError("server already running".into()));
        }
        if self.shutdown.is_cancelled() {
            return Err(MbSrvError::StateError("server has been stopped".into()));
        }

        let listener = TcpListener::bind(&self.config.bind_address)
            .await
            .map_err(|source| MbSrvError::BindError {
                address: self.config.bind_address.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        info!(
            "Modbus TCP server listening on {} (max {} clients, idle timeout {:?})",
            local_addr, self.config.max_connections, self.config.idle_timeout
        );

        let acceptor = Acceptor {
            listener,
            ctx: Arc::clone(&self.ctx),
            shutdown: self.shutdown.clone(),
            max_connections: self.config.max_connections,
            displace_after: self.config.displace_after,
            next_id: 1,
        };
        self.accept_task = Some(tokio::spawn(acceptor.run()));
        self.local_addr = Some(local_addr);

        Ok(local_addr)
    }

    /// Stop accepting, cancel every handler and wait for all of them
    pub async fn stop(&mut self) -> Result<()> {
        self.shutdown.cancel();

        if let Some(task) = self.accept_task.take() {
            task.await
                .map_err(|e| MbSrvError::StateError(format!("accept task failed: {}", e)))?;
            info!("Modbus TCP server stopped");
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.accept_task.is_some() && !self.shutdown.is_cancelled()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn active_connections(&self) -> usize {
        self.ctx.registry.len()
    }

    pub fn connections(&self) -> Vec<ConnectionInfo> {
        let mut list: Vec<ConnectionInfo> =
            self.ctx.registry.iter().map(|entry| entry.info()).collect();
        list.sort_by_key(|info| info.id);
        list
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.ctx.stats.snapshot(self.active_connections())
    }

    /// Receive connect/disconnect events from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.ctx.events.subscribe()
    }
}

impl Drop for ModbusTcpServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// The accept loop; owns the listener and the handler tasks
struct Acceptor {
    listener: TcpListener,
    ctx: Arc<ServerContext>,
    shutdown: CancellationToken,
    max_connections: usize,
    displace_after: Duration,
    next_id: u64,
}

impl Acceptor {
    async fn run(mut self) {
        let mut handlers: JoinSet<DisconnectReason> = JoinSet::new();

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                Some(joined) = handlers.join_next(), if !handlers.is_empty() => {
                    if let Err(e) = joined {
                        error!("Connection handler failed: {}", e);
                    }
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.admit(stream, peer, &mut handlers),
                    Err(e) => {
                        warn!("Accept failed: {}", e);
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    },
                },
            }
        }

        // Close the listening socket before draining handlers
        drop(self.listener);

        // Child tokens are already cancelled through the parent
        debug!("Waiting for {} connection handlers", handlers.len());
        while let Some(joined) = handlers.join_next().await {
            if let Err(e) = joined {
                error!("Connection handler failed: {}", e);
            }
        }
    }

    fn admit(
        &mut self,
        stream: TcpStream,
        peer: SocketAddr,
        handlers: &mut JoinSet<DisconnectReason>,
    ) {
        let live = self
            .ctx
            .registry
            .iter()
            .filter(|entry| !entry.is_stopping())
            .count();

        if live >= self.max_connections {
            match self.displacement_candidate() {
                Some(victim) => {
                    info!(
                        "Displacing client {} ({}) idle for {:?} to admit {}",
                        victim.id(),
                        victim.peer(),
                        victim.idle_for(),
                        peer
                    );
                    victim.cancel_with(DisconnectReason::Displaced);
                    self.ctx.stats.record_displaced();
                },
                None => {
                    warn!(
                        "Refusing {}: all {} client slots busy",
                        peer, self.max_connections
                    );
                    self.ctx.stats.record_rejected();
                    let _ = self.ctx.events.send(ServerEvent::Disconnected {
                        id: None,
                        peer,
                        reason: DisconnectReason::NoFreeClient,
                    });
                    drop(stream);
                    return;
                },
            }
        }

        if let Err(e) = stream.set_nodelay(true) {
            debug!("set_nodelay failed for {}: {}", peer, e);
        }

        let id = ConnectionId(self.next_id);
        self.next_id += 1;

        let shared = Arc::new(ConnectionShared::new(id, peer, self.shutdown.child_token()));
        self.ctx.registry.insert(id, Arc::clone(&shared));
        self.ctx.stats.record_accepted();

        info!("Client {} connected from {}", id, peer);
        let _ = self.ctx.events.send(ServerEvent::Connected { id, peer });

        let handler = ConnectionHandler::new(stream, shared, Arc::clone(&self.ctx));
        handlers.spawn(handler.run());
    }

    /// Least-recently-active live connection, if it has idled long enough
    fn displacement_candidate(&self) -> Option<Arc<ConnectionShared>> {
        self.ctx
            .registry
            .iter()
            .filter(|entry| !entry.is_stopping())
            .map(|entry| (entry.idle_for(), Arc::clone(entry.value())))
            .max_by_key(|(idle, _)| *idle)
            .filter(|(idle, _)| *idle >= self.displace_after)
            .map(|(_, shared)| shared)
    }
}
