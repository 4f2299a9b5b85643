//! Registry of accepted inbound TCP connections awaiting a claimant.
//!
//! When a TCP server adapter accepts a connection, the connection is parked
//! here under a fresh process-wide id and announced to the client. The client
//! then claims it by creating a TCP connection adapter with that id. Bytes
//! that arrive before the claim are buffered in arrival order and replayed to
//! the claimant.
//!
//! The table is shared by every session of a server. Each operation takes the
//! lock once and never awaits while holding it, so `claim` is a single
//! check-and-set and at most one adapter can ever own a connection.

use crate::messaging::types::TcpConnectionId;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// Channel a claimant receives inbound connection bytes on.
pub type ChunkSender = mpsc::UnboundedSender<Vec<u8>>;

/// An accepted TCP connection tracked by the registry.
#[derive(Debug)]
struct PendingTcpConnection {
    /// Remote address of the accepted connection
    peer_addr: SocketAddr,

    /// Write side, moved out to the claimant
    writer: Option<OwnedWriteHalf>,

    /// Tells the connection's reader task to stop, moved out to the claimant
    kill_switch: Option<oneshot::Sender<()>>,

    /// Where inbound bytes go once the connection is claimed
    claimant: Option<ChunkSender>,

    /// Bytes received before the claim, oldest first
    buffered_data: Vec<Vec<u8>>,
}

/// The parts of a connection handed to a successful claimant.
#[derive(Debug)]
pub struct ClaimedConnection {
    pub connection_id: TcpConnectionId,
    pub peer_addr: SocketAddr,
    pub writer: Option<OwnedWriteHalf>,
    pub kill_switch: Option<oneshot::Sender<()>>,
}

/// Result of a claim attempt.
#[derive(Debug)]
pub enum ClaimOutcome {
    /// The caller now owns the connection; buffered bytes were replayed
    Claimed(ClaimedConnection),
    /// Another adapter already owns the connection; nothing was changed
    AlreadyClaimed,
    /// No such connection (never existed or already disconnected)
    NotFound,
}

/// What happened to a chunk handed to [`ConnectionRegistry::deliver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Forwarded,
    Buffered,
    Unknown,
}

/// Process-wide table of accepted TCP connections.
#[derive(Debug)]
pub struct ConnectionRegistry {
    /// Atomic counter for generating unique connection IDs
    next_id: AtomicU64,

    connections: Mutex<HashMap<TcpConnectionId, PendingTcpConnection>>,
}

impl ConnectionRegistry {
    /// Creates an empty registry whose first id is 1.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            connections: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TcpConnectionId, PendingTcpConnection>> {
        self.connections.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Parks a freshly accepted connection and returns its id.
    ///
    /// The entry exists before this returns, so the connection's reader task
    /// must be spawned afterwards to guarantee no byte is delivered to an
    /// unknown id.
    pub fn register(
        &self,
        peer_addr: SocketAddr,
        writer: OwnedWriteHalf,
        kill_switch: oneshot::Sender<()>,
    ) -> TcpConnectionId {
        let connection_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().insert(
            connection_id,
            PendingTcpConnection {
                peer_addr,
                writer: Some(writer),
                kill_switch: Some(kill_switch),
                claimant: None,
                buffered_data: Vec::new(),
            },
        );
        connection_id
    }

    /// Routes bytes read from a connection to its claimant, or buffers them.
    pub fn deliver(&self, connection_id: TcpConnectionId, chunk: Vec<u8>) -> Delivery {
        let mut connections = self.lock();
        let Some(entry) = connections.get_mut(&connection_id) else {
            return Delivery::Unknown;
        };
        match &entry.claimant {
            Some(claimant) => {
                if claimant.send(chunk).is_err() {
                    debug!("TCP Client ID #{}: claimant closed, data discarded", connection_id);
                }
                Delivery::Forwarded
            }
            None => {
                entry.buffered_data.push(chunk);
                Delivery::Buffered
            }
        }
    }

    /// Claims a connection for the adapter listening on `claimant`.
    ///
    /// On success every buffered chunk is sent into `claimant` in arrival
    /// order before any later chunk can be delivered.
    pub fn claim(&self, connection_id: TcpConnectionId, claimant: ChunkSender) -> ClaimOutcome {
        let mut connections = self.lock();
        let Some(entry) = connections.get_mut(&connection_id) else {
            return ClaimOutcome::NotFound;
        };
        if entry.claimant.is_some() {
            return ClaimOutcome::AlreadyClaimed;
        }
        for chunk in entry.buffered_data.drain(..) {
            let _ = claimant.send(chunk);
        }
        entry.claimant = Some(claimant);
        ClaimOutcome::Claimed(ClaimedConnection {
            connection_id,
            peer_addr: entry.peer_addr,
            writer: entry.writer.take(),
            kill_switch: entry.kill_switch.take(),
        })
    }

    /// Forgets a connection once it has closed. Returns whether it was known.
    ///
    /// Dropping the entry drops the claimant's chunk sender, which lets the
    /// claimant's relay task drain and finish.
    pub fn remove(&self, connection_id: TcpConnectionId) -> bool {
        self.lock().remove(&connection_id).is_some()
    }

    pub fn is_claimed(&self, connection_id: TcpConnectionId) -> bool {
        self.lock()
            .get(&connection_id)
            .is_some_and(|entry| entry.claimant.is_some())
    }

    pub fn contains(&self, connection_id: TcpConnectionId) -> bool {
        self.lock().contains_key(&connection_id)
    }

    /// Number of bytes buffered for an unclaimed connection.
    pub fn buffered_len(&self, connection_id: TcpConnectionId) -> usize {
        self.lock()
            .get(&connection_id)
            .map_or(0, |entry| entry.buffered_data.iter().map(Vec::len).sum())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
