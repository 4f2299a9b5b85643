//! TCP listening adapter.
//!
//! Accepted connections are parked in the [`ConnectionRegistry`] and
//! announced with `clientconnected`; the client then claims them with a
//! [`TcpConnectionGameSocket`](super::tcp_connection::TcpConnectionGameSocket).

use crate::connection::{ConnectionRegistry, Delivery, SocketOutbound};
use crate::messaging::types::{event, AddressInfo, TcpConnectionId};
use serde_json::json;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpSocket};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Read size for relayed TCP connections.
const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Pause after a failed accept so a persistent error (e.g. EMFILE) cannot spin.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(50);

#[derive(Debug)]
pub struct TcpServerGameSocket {
    outbound: SocketOutbound,
    registry: Arc<ConnectionRegistry>,
    nodelay: bool,
    port: Option<u16>,
    local_addr: Option<SocketAddr>,
    acceptor: Option<JoinHandle<()>>,
}

impl TcpServerGameSocket {
    pub fn new(outbound: SocketOutbound, registry: Arc<ConnectionRegistry>, nodelay: bool) -> Self {
        Self {
            outbound,
            registry,
            nodelay,
            port: None,
            local_addr: None,
            acceptor: None,
        }
    }

    /// Records the port for the following `listen`; TCP binds and listens in one step.
    pub fn bind(&mut self, port: u16) {
        self.port = Some(port);
    }

    /// Binds the recorded port (ephemeral if none) and starts accepting.
    pub fn listen(&mut self, backlog: u32) {
        let handle = self.outbound.handle();
        if self.acceptor.is_some() {
            warn!("GameSocket #{}: TCP server already listening, ignoring listen", handle);
            return;
        }
        let port = self.port.unwrap_or(0);

        let listener = match open_tcp_listener(port, backlog) {
            Ok(listener) => listener,
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                info!("TCP port {} is in use, signalling game client...", port);
                self.outbound.send_typed_message(event::BIND_FAIL, json!({ "port": port }));
                return;
            }
            Err(e) => {
                error!("GameSocket #{}: TCP Server socket error: {}", handle, e);
                return;
            }
        };

        match listener.local_addr() {
            Ok(local) => {
                info!(
                    "GameSocket #{}: TCP Server up and listening on {} (backlog {})",
                    handle, local, backlog
                );
                self.local_addr = Some(local);
                self.outbound
                    .send_typed_message(event::LISTENING, AddressInfo::from(local).to_payload());
            }
            Err(e) => warn!("GameSocket #{}: listener has no local address: {}", handle, e),
        }

        self.acceptor = Some(tokio::spawn(accept_connections(
            listener,
            self.outbound.clone(),
            self.registry.clone(),
            self.nodelay,
        )));
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn is_listening(&self) -> bool {
        self.acceptor.is_some()
    }

    /// Stops accepting. Connections already accepted live on until they
    /// close or their claimant closes them.
    pub fn close(self) {
        if let Some(acceptor) = self.acceptor {
            acceptor.abort();
            info!("GameSocket #{}: TCP Server closed.", self.outbound.handle());
        }
    }
}

fn open_tcp_listener(port: u16, backlog: u32) -> io::Result<TcpListener> {
    let socket = TcpSocket::new_v4()?;
    socket.set_reuseaddr(true)?;
    socket.bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))?;
    socket.listen(backlog)
}

async fn accept_connections(
    listener: TcpListener,
    outbound: SocketOutbound,
    registry: Arc<ConnectionRegistry>,
    nodelay: bool,
) {
    let handle = outbound.handle();
    loop {
        let (stream, peer_addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!("GameSocket #{}: failed to accept TCP connection: {}", handle, e);
                tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                continue;
            }
        };
        if nodelay {
            if let Err(e) = stream.set_nodelay(true) {
                debug!("GameSocket #{}: could not set TCP_NODELAY: {}", handle, e);
            }
        }

        // Clients see the accepted socket's own endpoint, not the peer's.
        let local_addr = stream
            .local_addr()
            .unwrap_or_else(|_| SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)));
        let (reader, writer) = stream.into_split();
        let (kill_switch, killed) = oneshot::channel();
        let connection_id = registry.register(peer_addr, writer, kill_switch);

        info!(
            "GameSocket #{}: TCP Client ID #{} connected from {}",
            handle, connection_id, peer_addr
        );
        outbound.send_typed_message(
            event::CLIENT_CONNECTED,
            json!({ "id": connection_id, "addr": AddressInfo::from(local_addr).to_payload() }),
        );

        tokio::spawn(read_connection(
            connection_id,
            reader,
            killed,
            outbound.clone(),
            registry.clone(),
        ));
    }
}

/// Pumps one accepted connection into the registry until it closes.
///
/// The connection ends on EOF, on a read error, or when its claimant fires
/// (or drops) the kill switch. Either way the registry entry is removed and
/// the client is told with `clientdisconnected`.
async fn read_connection(
    connection_id: TcpConnectionId,
    mut reader: OwnedReadHalf,
    mut killed: oneshot::Receiver<()>,
    outbound: SocketOutbound,
    registry: Arc<ConnectionRegistry>,
) {
    let handle = outbound.handle();
    let mut buffer = vec![0u8; READ_CHUNK_SIZE];
    loop {
        tokio::select! {
            read = reader.read(&mut buffer) => match read {
                Ok(0) => break,
                Ok(len) => {
                    if registry.deliver(connection_id, buffer[..len].to_vec()) == Delivery::Unknown {
                        debug!(
                            "GameSocket #{}: TCP Client ID #{} not found; message discarded.",
                            handle, connection_id
                        );
                    } else {
                        trace!("GameSocket #{}: TCP Client ID #{} received {} bytes", handle, connection_id, len);
                    }
                }
                Err(e) => {
                    warn!("GameSocket #{}: TCP Client ID #{} error: {}", handle, connection_id, e);
                    break;
                }
            },
            _ = &mut killed => break,
        }
    }

    info!("GameSocket #{}: TCP Client ID #{} disconnected.", handle, connection_id);
    registry.remove(connection_id);
    outbound.send_typed_message(event::CLIENT_DISCONNECTED, json!({ "id": connection_id }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::OutboundMessage;
    use crate::messaging::ServerMessage;
    use crate::sockets::test_support::{next_outbound, outbound_pair};
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;

    fn expect_typed(message: OutboundMessage) -> ServerMessage {
        match message {
            OutboundMessage::Typed(message) => message,
            other => panic!("expected typed message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_listen_accept_and_disconnect() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (outbound, mut rx) = outbound_pair(1);
        let mut server = TcpServerGameSocket::new(outbound, registry.clone(), true);
        server.bind(0);
        server.listen(5);

        let listening = expect_typed(next_outbound(&mut rx).await);
        assert_eq!(listening.kind, "listening");
        let port = server.local_addr().unwrap().port();
        assert_eq!(listening.payload["port"], port);

        let mut client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let connected = expect_typed(next_outbound(&mut rx).await);
        assert_eq!(connected.kind, "clientconnected");
        assert_eq!(connected.payload["id"], 1);
        assert_eq!(connected.payload["addr"]["family"], 2);
        assert_eq!(connected.payload["addr"]["addr"], "127.0.0.1");
        assert_eq!(connected.payload["addr"]["port"], port);
        assert_ne!(port, client.local_addr().unwrap().port());

        client.write_all(b"early").await.unwrap();
        client.flush().await.unwrap();
        drop(client);

        let disconnected = expect_typed(next_outbound(&mut rx).await);
        assert_eq!(disconnected.kind, "clientdisconnected");
        assert_eq!(disconnected.payload["id"], 1);
        assert!(registry.is_empty());
        server.close();
    }

    #[tokio::test]
    async fn test_unclaimed_data_is_buffered() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (outbound, mut rx) = outbound_pair(2);
        let mut server = TcpServerGameSocket::new(outbound, registry.clone(), true);
        server.listen(1);
        let _listening = next_outbound(&mut rx).await;
        let port = server.local_addr().unwrap().port();

        let mut client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let _connected = next_outbound(&mut rx).await;
        client.write_all(b"buffer me").await.unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while registry.buffered_len(1) < 9 {
            assert!(tokio::time::Instant::now() < deadline, "data never buffered");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!registry.is_claimed(1));
        server.close();
    }

    #[tokio::test]
    async fn test_listen_on_taken_port_reports_bindfail() {
        let occupant = std::net::TcpListener::bind("0.0.0.0:0").unwrap();
        let port = occupant.local_addr().unwrap().port();

        let registry = Arc::new(ConnectionRegistry::new());
        let (outbound, mut rx) = outbound_pair(3);
        let mut server = TcpServerGameSocket::new(outbound, registry, true);
        server.bind(port);
        server.listen(5);

        let message = expect_typed(next_outbound(&mut rx).await);
        assert_eq!(message.kind, "bindfail");
        assert_eq!(message.payload["port"], port);
        assert!(!server.is_listening());
    }

    #[tokio::test]
    async fn test_close_stops_accepting() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (outbound, mut rx) = outbound_pair(4);
        let mut server = TcpServerGameSocket::new(outbound, registry, true);
        server.listen(5);
        let _listening = next_outbound(&mut rx).await;
        let port = server.local_addr().unwrap().port();
        server.close();

        // The listener is dropped once the aborted acceptor is reaped.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if TcpStream::connect(("127.0.0.1", port)).await.is_err() {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "listener still accepting");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
