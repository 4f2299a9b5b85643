//! Adapter bridging one accepted TCP connection to the client.
//!
//! TCP-to-client traffic is batched through a [`WriteCoalescer`] and flushed
//! on a fixed interval as `binary` messages with an empty payload.
//! Client-to-TCP traffic is written straight through by a dedicated writer
//! task.

use super::coalescer::WriteCoalescer;
use crate::config::ServerConfig;
use crate::connection::{ClaimOutcome, ConnectionRegistry, SocketOutbound};
use crate::error::RelayError;
use crate::messaging::types::{SocketHandle, TcpConnectionId};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

#[derive(Debug)]
pub struct TcpConnectionGameSocket {
    outbound: SocketOutbound,
    connection_id: Option<TcpConnectionId>,
    link: Option<ClaimedLink>,
}

/// Everything a successful claim keeps alive.
#[derive(Debug)]
struct ClaimedLink {
    to_peer: Option<mpsc::UnboundedSender<Vec<u8>>>,
    kill_switch: Option<oneshot::Sender<()>>,
    relay: JoinHandle<()>,
    writer: Option<JoinHandle<()>>,
}

impl TcpConnectionGameSocket {
    /// Claims accepted connection `connection_id` for this socket.
    ///
    /// A connection that is already owned by another socket is a protocol
    /// violation. A connection that does not exist (any more) yields an inert
    /// socket; only the server log learns about it.
    pub fn claim(
        outbound: SocketOutbound,
        registry: Arc<ConnectionRegistry>,
        connection_id: Option<TcpConnectionId>,
        config: &ServerConfig,
    ) -> Result<Self, RelayError> {
        let handle = outbound.handle();
        let Some(id) = connection_id else {
            error!("GameSocket #{}: No TCP connection id given; no communication will be possible.", handle);
            return Ok(Self::inert(outbound, None));
        };

        let (chunk_tx, chunk_rx) = mpsc::unbounded_channel();
        let claimed = match registry.claim(id, chunk_tx) {
            ClaimOutcome::Claimed(claimed) => claimed,
            ClaimOutcome::AlreadyClaimed => {
                return Err(RelayError::protocol(
                    "Only one GameSocket is permitted per TCP connection!",
                ))
            }
            ClaimOutcome::NotFound => {
                error!(
                    "GameSocket #{}: No TCP connection for {}; no communication will be possible.",
                    handle, id
                );
                return Ok(Self::inert(outbound, Some(id)));
            }
        };
        info!(
            "GameSocket #{}: claimed TCP Client ID #{} ({})",
            handle, claimed.connection_id, claimed.peer_addr
        );

        let relay = tokio::spawn(relay_to_client(
            chunk_rx,
            outbound.clone(),
            config.send_buffer_size,
            config.flush_interval(),
        ));
        let (to_peer, writer) = match claimed.writer {
            Some(write_half) => {
                let (tx, rx) = mpsc::unbounded_channel();
                let task = tokio::spawn(write_to_peer(write_half, rx, handle, id));
                (Some(tx), Some(task))
            }
            None => (None, None),
        };

        Ok(Self {
            outbound,
            connection_id: Some(id),
            link: Some(ClaimedLink {
                to_peer,
                kill_switch: claimed.kill_switch,
                relay,
                writer,
            }),
        })
    }

    fn inert(outbound: SocketOutbound, connection_id: Option<TcpConnectionId>) -> Self {
        Self {
            outbound,
            connection_id,
            link: None,
        }
    }

    pub fn connection_id(&self) -> Option<TcpConnectionId> {
        self.connection_id
    }

    /// Whether the claim succeeded and the connection is still being relayed.
    pub fn is_active(&self) -> bool {
        self.link
            .as_ref()
            .and_then(|link| link.to_peer.as_ref())
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Writes client bytes to the TCP peer, unbatched.
    pub fn on_binary_message(&mut self, data: &[u8]) {
        let Some(to_peer) = self.link.as_ref().and_then(|link| link.to_peer.as_ref()) else {
            trace!("GameSocket #{}: inert TCP connection, {} bytes dropped", self.outbound.handle(), data.len());
            return;
        };
        if to_peer.send(data.to_vec()).is_err() {
            debug!("GameSocket #{}: TCP connection already closed, data dropped", self.outbound.handle());
        }
    }

    /// Drops the TCP connection abruptly and stops the flush timer.
    pub fn close(self) {
        let Some(mut link) = self.link else {
            return;
        };
        link.relay.abort();
        if let Some(writer) = link.writer.take() {
            writer.abort();
        }
        if let Some(kill_switch) = link.kill_switch.take() {
            let _ = kill_switch.send(());
        }
        info!(
            "GameSocket #{}: TCP connection #{} closed.",
            self.outbound.handle(),
            self.connection_id.unwrap_or_default()
        );
    }
}

/// Batches inbound TCP bytes into `binary` messages.
///
/// Runs until the registry drops the chunk sender (peer disconnected), at
/// which point whatever is still buffered is flushed.
async fn relay_to_client(
    mut chunks: mpsc::UnboundedReceiver<Vec<u8>>,
    outbound: SocketOutbound,
    capacity: usize,
    flush_every: Duration,
) {
    let mut coalescer = WriteCoalescer::new(capacity);
    let flush_every = flush_every.max(Duration::from_millis(1));
    let mut ticker = interval_at(Instant::now() + flush_every, flush_every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            chunk = chunks.recv() => match chunk {
                Some(chunk) => {
                    for frame in coalescer.push(chunk) {
                        if !outbound.send_binary_message(frame, json!({})) {
                            return;
                        }
                    }
                }
                None => {
                    if let Some(frame) = coalescer.flush() {
                        outbound.send_binary_message(frame, json!({}));
                    }
                    return;
                }
            },
            _ = ticker.tick() => {
                if let Some(frame) = coalescer.flush() {
                    if !outbound.send_binary_message(frame, json!({})) {
                        return;
                    }
                }
            }
        }
    }
}

async fn write_to_peer(
    mut write_half: OwnedWriteHalf,
    mut data: mpsc::UnboundedReceiver<Vec<u8>>,
    handle: SocketHandle,
    connection_id: TcpConnectionId,
) {
    while let Some(bytes) = data.recv().await {
        if let Err(e) = write_half.write_all(&bytes).await {
            warn!(
                "GameSocket #{}: TCP Client ID #{} write failed: {}",
                handle, connection_id, e
            );
            break;
        }
    }
}
