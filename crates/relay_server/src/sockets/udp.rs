//! UDP datagram adapter.

use crate::connection::SocketOutbound;
use crate::error::RelayError;
use crate::messaging::types::{event, AddressInfo, SocketHandle};
use serde_json::json;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Relays one IPv4 UDP socket.
///
/// The socket is opened on `bind`. Inbound datagrams from IPv4 senders are
/// forwarded as `binary` messages tagged with the sender address; outbound
/// binary frames go to the destination set by the last `binary` action.
#[derive(Debug)]
pub struct UdpGameSocket {
    outbound: SocketOutbound,
    reuse_address: bool,
    recv_buffer_size: usize,
    port: Option<u16>,
    bound: Option<BoundUdpSocket>,
}

#[derive(Debug)]
struct BoundUdpSocket {
    socket: Arc<UdpSocket>,
    to_network: mpsc::UnboundedSender<(SocketAddr, Vec<u8>)>,
    receiver: JoinHandle<()>,
    sender: JoinHandle<()>,
}

impl UdpGameSocket {
    pub fn new(outbound: SocketOutbound, reuse_address: bool, recv_buffer_size: usize) -> Self {
        Self {
            outbound,
            reuse_address,
            recv_buffer_size,
            port: None,
            bound: None,
        }
    }

    /// Binds `0.0.0.0:port` and starts relaying inbound datagrams.
    ///
    /// `EADDRINUSE` is reported to the client as `bindfail` so it can pick
    /// another port; other failures are only logged.
    pub fn bind(&mut self, port: u16) {
        let handle = self.outbound.handle();
        if self.bound.is_some() {
            warn!("GameSocket #{}: UDP socket already bound, ignoring bind to port {}", handle, port);
            return;
        }
        self.port = Some(port);

        match open_udp_socket(port, self.reuse_address) {
            Ok(socket) => self.start_receiving(socket),
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                info!("UDP port {} is in use, signalling game client...", port);
                self.outbound.send_typed_message(event::BIND_FAIL, json!({ "port": port }));
            }
            Err(e) => error!("GameSocket #{}: UDP socket error: {}", handle, e),
        }
    }

    fn start_receiving(&mut self, socket: UdpSocket) {
        let handle = self.outbound.handle();
        let socket = Arc::new(socket);
        match socket.local_addr() {
            Ok(local) => {
                info!("GameSocket #{}: UDP Server up and listening on {}", handle, local);
                self.outbound
                    .send_typed_message(event::LISTENING, AddressInfo::from(local).to_payload());
            }
            Err(e) => warn!("GameSocket #{}: bound UDP socket has no local address: {}", handle, e),
        }

        let receiver = tokio::spawn(receive_datagrams(
            socket.clone(),
            self.outbound.clone(),
            self.recv_buffer_size,
        ));
        let (to_network, datagrams) = mpsc::unbounded_channel();
        let sender = tokio::spawn(send_datagrams(socket.clone(), datagrams, handle));
        self.bound = Some(BoundUdpSocket {
            socket,
            to_network,
            receiver,
            sender,
        });
    }

    /// Queues one datagram for `destination`.
    ///
    /// Sending with no destination is a protocol violation. An unbound socket
    /// is first bound to an ephemeral port. Datagrams leave in the order they
    /// were queued.
    pub fn on_binary_message(
        &mut self,
        destination: Option<SocketAddr>,
        data: &[u8],
    ) -> Result<(), RelayError> {
        let Some(destination) = destination else {
            return Err(RelayError::protocol("Received binary data before destination address!"));
        };
        if self.bound.is_none() {
            self.bind(0);
        }
        let Some(bound) = &self.bound else {
            warn!("GameSocket #{}: UDP socket unavailable, datagram dropped", self.outbound.handle());
            return Ok(());
        };

        if bound.to_network.send((destination, data.to_vec())).is_err() {
            warn!("GameSocket #{}: UDP sender stopped, datagram dropped", self.outbound.handle());
        }
        Ok(())
    }

    /// The local address once bound.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.bound.as_ref().and_then(|bound| bound.socket.local_addr().ok())
    }

    /// The port requested by the last `bind`.
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Stops the receive loop and releases the socket.
    pub fn close(self) {
        if let Some(bound) = self.bound {
            bound.receiver.abort();
            bound.sender.abort();
            info!("GameSocket #{}: UDP Server closed.", self.outbound.handle());
        }
    }
}

fn open_udp_socket(port: u16, reuse_address: bool) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    if reuse_address {
        socket.set_reuse_address(true)?;
    }
    socket.set_nonblocking(true)?;
    socket.bind(&SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)).into())?;
    UdpSocket::from_std(socket.into())
}

async fn send_datagrams(
    socket: Arc<UdpSocket>,
    mut datagrams: mpsc::UnboundedReceiver<(SocketAddr, Vec<u8>)>,
    handle: SocketHandle,
) {
    while let Some((destination, data)) = datagrams.recv().await {
        match socket.send_to(&data, destination).await {
            Ok(sent) => trace!("GameSocket #{}: {} bytes sent to {}", handle, sent, destination),
            Err(e) => warn!("GameSocket #{}: failed to send datagram to {}: {}", handle, destination, e),
        }
    }
}

async fn receive_datagrams(socket: Arc<UdpSocket>, outbound: SocketOutbound, buffer_size: usize) {
    let mut buffer = vec![0u8; buffer_size.max(1)];
    loop {
        match socket.recv_from(&mut buffer).await {
            Ok((len, from @ SocketAddr::V4(_))) => {
                let payload = AddressInfo::from(from).to_payload();
                if !outbound.send_binary_message(buffer[..len].to_vec(), payload) {
                    break;
                }
            }
            // The client protocol has no way to express IPv6 senders.
            Ok((_, from)) => trace!("GameSocket #{}: ignoring datagram from {}", outbound.handle(), from),
            Err(e) => debug!("GameSocket #{}: UDP receive error: {}", outbound.handle(), e),
        }
    }
}
