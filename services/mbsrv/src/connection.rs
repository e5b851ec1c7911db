//! Per-client connection handling
//!
//! Each accepted socket gets one [`ConnectionHandler`] task. The handler
//! reads into a growing buffer, decodes every complete frame it holds, and
//! writes each reply before looking at the next frame. It ends on peer
//! close, transport error, malformed input, idle timeout, or cancellation
//! from the listener; all of these go through the same close path.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::dispatcher::respond;
use crate::protocol::constants::RECEIVE_BUFFER_SIZE;
use crate::protocol::frame::{decode_request, encode};
use crate::protocol::{Exception, ExceptionCode, Pdu, RequestFrame, Response};
use crate::server::{ServerContext, ServerEvent};

/// Server-assigned connection identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Active,
    Closing,
    Closed,
}

/// Why a client went away (or was never admitted)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisconnectReason {
    /// Refused at accept time, every slot busy
    NoFreeClient,
    SocketReceiveFailed,
    SocketSendFailed,
    DisconnectedByPeer,
    /// Malformed frame; closed without a reply
    ProtocolError,
    /// Evicted to make room for a new client
    Displaced,
    /// No inbound data within the idle timeout
    Idle,
    ServerStopped,
}

impl DisconnectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoFreeClient => "no free client slot",
            Self::SocketReceiveFailed => "socket receive failed",
            Self::SocketSendFailed => "socket send failed",
            Self::DisconnectedByPeer => "disconnected by peer",
            Self::ProtocolError => "protocol error",
            Self::Displaced => "displaced by new client",
            Self::Idle => "idle timeout",
            Self::ServerStopped => "server stopped",
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Liveness handle shared between a handler task and the registry
#[derive(Debug)]
pub struct ConnectionShared {
    id: ConnectionId,
    peer: SocketAddr,
    connected_at: Instant,
    last_activity: Mutex<Instant>,
    state: Mutex<ConnectionState>,
    cancel: CancellationToken,
    stop_reason: Mutex<Option<DisconnectReason>>,
}

impl ConnectionShared {
    pub fn new(id: ConnectionId, peer: SocketAddr, cancel: CancellationToken) -> Self {
        let now = Instant::now();
        Self {
            id,
            peer,
            connected_at: now,
            last_activity: Mutex::new(now),
            state: Mutex::new(ConnectionState::Active),
            cancel,
            stop_reason: Mutex::new(None),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    /// True once a stop has been requested
    pub fn is_stopping(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Ask the handler to stop; the first recorded reason wins
    pub fn cancel_with(&self, reason: DisconnectReason) {
        self.stop_reason.lock().get_or_insert(reason);
        self.cancel.cancel();
    }

    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id,
            peer: self.peer,
            state: self.state(),
            connected_for: self.connected_at.elapsed(),
            idle_for: self.idle_for(),
        }
    }

    fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }

    // A parent-token cancellation leaves no reason behind
    fn cancel_reason(&self) -> DisconnectReason {
        self.stop_reason
            .lock()
            .unwrap_or(DisconnectReason::ServerStopped)
    }
}

/// Point-in-time view of one connection
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub peer: SocketAddr,
    pub state: ConnectionState,
    pub connected_for: Duration,
    pub idle_for: Duration,
}

pub(crate) struct ConnectionHandler {
    stream: TcpStream,
    shared: Arc<ConnectionShared>,
    ctx: Arc<ServerContext>,
    read_buf: BytesMut,
    write_buf: BytesMut,
}

impl ConnectionHandler {
    pub(crate) fn new(
        stream: TcpStream,
        shared: Arc<ConnectionShared>,
        ctx: Arc<ServerContext>,
    ) -> Self {
        Self {
            stream,
            shared,
            ctx,
            read_buf: BytesMut::with_capacity(RECEIVE_BUFFER_SIZE),
            write_buf: BytesMut::with_capacity(RECEIVE_BUFFER_SIZE),
        }
    }

    /// Serve until the connection ends, then close and deregister it
    pub(crate) async fn run(mut self) -> DisconnectReason {
        let reason = self.serve().await;
        self.close(reason).await;
        reason
    }

    async fn serve(&mut self) -> DisconnectReason {
        let idle_timeout = self.ctx.idle_timeout;

        loop {
            // Everything already buffered is handled before reading again
            loop {
                if self.shared.is_stopping() {
                    return self.shared.cancel_reason();
                }
                match decode_request(&mut self.read_buf) {
                    Ok(Some(frame)) => {
                        if let Err(reason) = self.process(frame).await {
                            return reason;
                        }
                    },
                    Ok(None) => break,
                    Err(e) => {
                        warn!(
                            "Client {} ({}) sent a malformed frame: {}",
                            self.shared.id, self.shared.peer, e
                        );
                        self.ctx.stats.record_protocol_error();
                        return DisconnectReason::ProtocolError;
                    },
                }
            }

            tokio::select! {
                biased;
                _ = self.shared.cancel.cancelled() => {
                    return self.shared.cancel_reason();
                }
                read = tokio::time::timeout(idle_timeout, self.stream.read_buf(&mut self.read_buf)) => {
                    match read {
                        Err(_) => return DisconnectReason::Idle,
                        Ok(Ok(0)) => return DisconnectReason::DisconnectedByPeer,
                        Ok(Ok(n)) => {
                            trace!("Client {} read {} bytes", self.shared.id, n);
                            self.shared.touch();
                        },
                        Ok(Err(e)) => {
                            debug!("Client {} receive failed: {}", self.shared.id, e);
                            return DisconnectReason::SocketReceiveFailed;
                        },
                    }
                }
            }
        }
    }

    async fn process(&mut self, frame: RequestFrame) -> Result<(), DisconnectReason> {
        self.ctx.stats.record_request();

        let response = respond(&frame.request, &self.ctx.store);
        if let Response::Exception(exception) = &response {
            self.ctx.stats.record_exception();
            debug!(
                "Client {} txn {} FC 0x{:02X} -> exception {}",
                self.shared.id, frame.header.transaction_id, exception.function_code, exception.code
            );
        }

        self.write_buf.clear();
        if let Err(e) = encode(frame.header, &response, &mut self.write_buf) {
            warn!("Client {} reply could not be encoded: {}", self.shared.id, e);
            let fallback = Response::Exception(Exception::new(
                response.function_code(),
                ExceptionCode::ServerDeviceFailure,
            ));
            encode(frame.header, &fallback, &mut self.write_buf)
                .map_err(|_| DisconnectReason::ProtocolError)?;
        }

        // Writes are bounded by the idle timeout as well
        let idle_timeout = self.ctx.idle_timeout;
        tokio::select! {
            biased;
            _ = self.shared.cancel.cancelled() => Err(self.shared.cancel_reason()),
            written = tokio::time::timeout(idle_timeout, self.stream.write_all(&self.write_buf)) => {
                match written {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => {
                        debug!("Client {} send failed: {}", self.shared.id, e);
                        Err(DisconnectReason::SocketSendFailed)
                    },
                    Err(_) => {
                        debug!(
                            "Client {} has not drained its replies for {:?}",
                            self.shared.id, idle_timeout
                        );
                        Err(DisconnectReason::Idle)
                    },
                }
            }
        }
    }

    async fn close(mut self, reason: DisconnectReason) {
        let id = self.shared.id;
        let peer = self.shared.peer;

        self.shared.set_state(ConnectionState::Closing);
        if let Err(e) = self.stream.shutdown().await {
            trace!("Client {} shutdown: {}", id, e);
        }
        self.shared.set_state(ConnectionState::Closed);
        self.ctx.registry.remove(&id);

        match reason {
            DisconnectReason::DisconnectedByPeer | DisconnectReason::ServerStopped => {
                info!("Client {} ({}) disconnected: {}", id, peer, reason);
            },
            _ => warn!("Client {} ({}) disconnected: {}", id, peer, reason),
        }

        // No subscribers is fine
        let _ = self.ctx.events.send(ServerEvent::Disconnected {
            id: Some(id),
            peer,
            reason,
        });
    }
}
