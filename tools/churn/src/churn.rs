//! Connection churn
//!
//! Every step may open one new connection, then probes each open connection
//! for a peer close, then may close one connection other than the newest.

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use mbsrv::protocol::{ClientCodec, MbapHeader, Request, Response};
use rand::Rng;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

/// How long a probe read waits for its single response
const PROBE_RESPONSE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct ChurnSettings {
    pub address: String,
    /// Percent chance per step to open a connection
    pub connect_chance: u8,
    /// Percent chance per step to close a connection
    pub disconnect_chance: u8,
    /// Read timeout used to tell an idle peer from a closed one
    pub probe_timeout: Duration,
    /// Issue a ReadHoldingRegisters on every new connection
    pub probe_read: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ChurnStats {
    pub connected: u64,
    pub connect_failed: u64,
    pub dropped_by_peer: u64,
    pub check_failed: u64,
    pub closed: u64,
    pub probes_ok: u64,
    pub probes_failed: u64,
}

struct TrackedConnection {
    id: u64,
    local: Option<SocketAddr>,
    stream: TcpStream,
}

pub struct ChurnClient<R: Rng> {
    settings: ChurnSettings,
    rng: R,
    connections: Vec<TrackedConnection>,
    next_id: u64,
    next_transaction: u16,
    stats: ChurnStats,
}

impl<R: Rng> ChurnClient<R> {
    pub fn new(settings: ChurnSettings, rng: R) -> Self {
        Self {
            settings,
            rng,
            connections: Vec::new(),
            next_id: 1,
            next_transaction: 1,
            stats: ChurnStats::default(),
        }
    }

    pub fn open_connections(&self) -> usize {
        self.connections.len()
    }

    pub fn stats(&self) -> ChurnStats {
        self.stats
    }

    /// One churn iteration
    pub async fn step(&mut self) {
        info!("connection count: {}", self.connections.len());

        if self.roll(self.settings.connect_chance) {
            match self.connect().await {
                Ok(connection) => self.connections.push(connection),
                Err(e) => {
                    warn!("connect to {} failed: {}", self.settings.address, e);
                    self.stats.connect_failed += 1;
                    return;
                },
            }
        }

        let mut alive = Vec::with_capacity(self.connections.len());
        for mut connection in std::mem::take(&mut self.connections) {
            if self.check(&mut connection).await {
                alive.push(connection);
            }
        }
        self.connections = alive;

        if self.roll(self.settings.disconnect_chance) && self.connections.len() > 1 {
            // never the newest
            let index = self.rng.gen_range(0..self.connections.len() - 1);
            let connection = self.connections.remove(index);
            info!("disconnecting #{} ({:?})", connection.id, connection.local);
            self.stats.closed += 1;
        }
    }

    fn roll(&mut self, chance: u8) -> bool {
        self.rng.gen_range(0..100u8) < chance
    }

    async fn connect(&mut self) -> std::io::Result<TrackedConnection> {
        debug!("connecting to {}", self.settings.address);
        let mut stream = TcpStream::connect(&self.settings.address).await?;

        let id = self.next_id;
        self.next_id += 1;
        let local = stream.local_addr().ok();
        info!("connected #{} ({:?})", id, local);
        self.stats.connected += 1;

        if self.settings.probe_read {
            stream = self.probe(id, stream).await?;
        }

        Ok(TrackedConnection { id, local, stream })
    }

    /// Send one read and expect exactly one well-formed reply
    async fn probe(&mut self, id: u64, stream: TcpStream) -> std::io::Result<TcpStream> {
        let transaction_id = self.next_transaction;
        self.next_transaction = self.next_transaction.wrapping_add(1);

        let mut framed = Framed::new(stream, ClientCodec);
        let request = Request::ReadHoldingRegisters {
            address: 0,
            quantity: 1,
        };

        let verdict = match framed.send((MbapHeader::new(transaction_id, 1), request)).await {
            Err(e) => Err(format!("send failed: {}", e)),
            Ok(()) => match timeout(PROBE_RESPONSE_TIMEOUT, framed.next()).await {
                Err(_) => Err("no response".to_string()),
                Ok(None) => Err("closed before responding".to_string()),
                Ok(Some(Err(e))) => Err(format!("bad response: {}", e)),
                Ok(Some(Ok(frame))) if frame.header.transaction_id != transaction_id => Err(
                    format!("transaction id {} != {}", frame.header.transaction_id, transaction_id),
                ),
                Ok(Some(Ok(frame))) => match frame.response {
                    Response::ReadHoldingRegisters(words) if words.len() == 1 => {
                        if framed.read_buffer().is_empty() {
                            Ok(words[0])
                        } else {
                            Err("trailing bytes after response".to_string())
                        }
                    },
                    other => Err(format!("unexpected response {:?}", other)),
                },
            },
        };

        match verdict {
            Ok(value) => {
                debug!("probe #{} read {}", id, value);
                self.stats.probes_ok += 1;
            },
            Err(reason) => {
                warn!("probe #{} failed: {}", id, reason);
                self.stats.probes_failed += 1;
            },
        }

        Ok(framed.into_inner())
    }

    /// False when the connection is gone
    async fn check(&mut self, connection: &mut TrackedConnection) -> bool {
        let mut byte = [0u8; 1];
        match timeout(self.settings.probe_timeout, connection.stream.read(&mut byte)).await {
            Err(_) => true,
            Ok(Ok(0)) => {
                info!("connection #{} disconnected by peer", connection.id);
                self.stats.dropped_by_peer += 1;
                false
            },
            Ok(Ok(_)) => {
                debug!("connection #{} has unsolicited data", connection.id);
                true
            },
            Ok(Err(e)) => {
                warn!("connection #{} check failed: {}", connection.id, e);
                self.stats.check_failed += 1;
                false
            },
        }
    }
}
