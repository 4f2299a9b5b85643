//! End-to-end tests driving a live relay over a real WebSocket.

use crate::*;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

const STEP_TIMEOUT: Duration = Duration::from_secs(5);

struct Relay {
    server: Arc<RelayServer>,
    addr: SocketAddr,
    task: JoinHandle<Result<(), RelayError>>,
}

async fn start_relay() -> Relay {
    let server = Arc::new(create_server_with_config(ServerConfig {
        bind_address: "127.0.0.1:0".parse().unwrap(),
        flush_interval_ms: 10,
        ..Default::default()
    }));
    let listener = server.bind().unwrap();
    let addr = listener.local_addr().unwrap();
    let serving = server.clone();
    let task = tokio::spawn(async move { serving.serve(listener, None).await });
    Relay { server, addr, task }
}

struct TestClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TestClient {
    /// Connects and consumes the `hostname` greeting.
    async fn connect(relay: &Relay) -> Self {
        let (ws, _) = connect_async(format!("ws://{}", relay.addr)).await.unwrap();
        let mut client = Self { ws };
        let greeting = client.next_json().await;
        assert_eq!(greeting["type"], "hostname");
        assert!(greeting.get("socket").is_none());
        client
    }

    async fn send_json(&mut self, value: Value) {
        self.ws.send(Message::Text(value.to_string().into())).await.unwrap();
    }

    async fn send_binary(&mut self, data: &[u8]) {
        self.ws.send(Message::Binary(data.to_vec().into())).await.unwrap();
    }

    async fn next_frame(&mut self) -> Message {
        loop {
            let frame = tokio::time::timeout(STEP_TIMEOUT, self.ws.next())
                .await
                .expect("timed out waiting for a frame")
                .expect("stream ended")
                .expect("websocket error");
            match frame {
                Message::Ping(_) | Message::Pong(_) => continue,
                other => return other,
            }
        }
    }

    async fn next_json(&mut self) -> Value {
        match self.next_frame().await {
            Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    async fn next_binary(&mut self) -> (Value, Vec<u8>) {
        let header = self.next_json().await;
        assert_eq!(header["type"], "binary");
        match self.next_frame().await {
            Message::Binary(data) => (header, data.to_vec()),
            other => panic!("expected binary frame, got {other:?}"),
        }
    }

    async fn expect_close(&mut self) -> (u16, String) {
        match self.next_frame().await {
            Message::Close(Some(frame)) => (u16::from(frame.code), frame.reason.as_str().to_string()),
            other => panic!("expected close frame, got {other:?}"),
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_client_is_greeted_with_hostname() {
    let relay = start_relay().await;
    let (mut ws, _) = connect_async(format!("ws://{}", relay.addr)).await.unwrap();
    let frame = tokio::time::timeout(STEP_TIMEOUT, ws.next()).await.unwrap().unwrap().unwrap();
    let greeting: Value = serde_json::from_str(frame.to_text().unwrap()).unwrap();
    assert_eq!(greeting, json!({"type": "hostname", "payload": host_name()}));
    relay.server.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_ping_is_answered_exactly_once() {
    let relay = start_relay().await;
    let mut client = TestClient::connect(&relay).await;
    client.ws.send(Message::Ping(b"tick".to_vec().into())).await.unwrap();
    client.send_json(json!({"action": "create", "socket": 1, "payload": {"type": 1}})).await;
    client.send_json(json!({"action": "bind", "socket": 1, "payload": {"port": 0}})).await;

    let mut pongs = Vec::new();
    let mut listening = false;
    while let Ok(Some(frame)) = tokio::time::timeout(Duration::from_millis(300), client.ws.next()).await {
        match frame.unwrap() {
            Message::Pong(data) => pongs.push(data.to_vec()),
            Message::Text(text) => {
                let message: Value = serde_json::from_str(text.as_str()).unwrap();
                listening |= message["type"] == "listening";
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }
    assert!(listening);
    assert_eq!(pongs, vec![b"tick".to_vec()]);
    relay.server.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_malformed_json_rejects_session() {
    let relay = start_relay().await;
    let mut client = TestClient::connect(&relay).await;
    client.ws.send(Message::Text("{not json".into())).await.unwrap();
    let (code, reason) = client.expect_close().await;
    assert_eq!(code, 1002);
    assert_eq!(reason, "Malformed JSON message: {not json");
    relay.server.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unknown_socket_rejects_session() {
    let relay = start_relay().await;
    let mut client = TestClient::connect(&relay).await;
    client.send_json(json!({"action": "bind", "socket": 4, "payload": {"port": 0}})).await;
    assert_eq!(client.expect_close().await, (1002, "Socket ID not recognized: 4".to_string()));
    relay.server.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_invalid_bind_ports_are_rejected() {
    let relay = start_relay().await;
    for port in [json!(-1), json!("abc")] {
        let mut client = TestClient::connect(&relay).await;
        client.send_json(json!({"action": "create", "socket": 1, "payload": {"type": 1}})).await;
        client.send_json(json!({"action": "bind", "socket": 1, "payload": {"port": port}})).await;
        assert_eq!(
            client.expect_close().await,
            (1002, "Received bind command without valid port number!".to_string())
        );
    }
    relay.server.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_udp_relay_both_directions() {
    let relay = start_relay().await;
    let mut client = TestClient::connect(&relay).await;
    client.send_json(json!({"action": "create", "socket": 1, "payload": {"type": 1}})).await;
    client.send_json(json!({"action": "bind", "socket": 1, "payload": {"port": 0}})).await;

    let listening = client.next_json().await;
    assert_eq!(listening["type"], "listening");
    assert_eq!(listening["socket"], 1);
    assert_eq!(listening["payload"]["family"], 2);
    let port = listening["payload"]["port"].as_u64().unwrap() as u16;

    let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let peer_port = peer.local_addr().unwrap().port();
    peer.send_to(b"from-peer", ("127.0.0.1", port)).await.unwrap();

    let (header, data) = client.next_binary().await;
    assert_eq!(header["socket"], 1);
    assert_eq!(header["payload"], json!({"family": 2, "port": peer_port, "addr": "127.0.0.1"}));
    assert_eq!(data, b"from-peer");

    client
        .send_json(json!({"action": "binary", "socket": 1, "payload": {"addr": {"family": 2, "port": peer_port, "addr": "127.0.0.1"}}}))
        .await;
    client.send_binary(b"to-peer").await;

    let mut buffer = [0u8; 32];
    let (len, from) = tokio::time::timeout(STEP_TIMEOUT, peer.recv_from(&mut buffer))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buffer[..len], b"to-peer");
    assert_eq!(from.port(), port);
    relay.server.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_binary_frame_without_destination_rejects_session() {
    let relay = start_relay().await;
    let mut client = TestClient::connect(&relay).await;
    client.send_json(json!({"action": "create", "socket": 1, "payload": {"type": 1}})).await;
    client.send_binary(b"lost").await;
    assert_eq!(
        client.expect_close().await,
        (1002, "Received binary data before destination address!".to_string())
    );
    relay.server.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_binary_frames_never_cross_sockets() {
    let relay = start_relay().await;
    let mut client = TestClient::connect(&relay).await;
    let first = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let second = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    for (handle, peer) in [(1, &first), (2, &second)] {
        let port = peer.local_addr().unwrap().port();
        client.send_json(json!({"action": "create", "socket": handle, "payload": {"type": 1}})).await;
        client
            .send_json(json!({"action": "binary", "socket": handle, "payload": {"family": 2, "port": port, "addr": "127.0.0.1"}}))
            .await;
    }
    client.send_json(json!({"action": "binary", "socket": 1, "payload": {"family": 2, "port": first.local_addr().unwrap().port(), "addr": "127.0.0.1"}})).await;
    client.send_binary(b"one").await;
    client.send_json(json!({"action": "binary", "socket": 2, "payload": {"family": 2, "port": second.local_addr().unwrap().port(), "addr": "127.0.0.1"}})).await;
    client.send_binary(b"two").await;

    let mut buffer = [0u8; 16];
    let (len, _) = tokio::time::timeout(STEP_TIMEOUT, first.recv_from(&mut buffer)).await.unwrap().unwrap();
    assert_eq!(&buffer[..len], b"one");
    let (len, _) = tokio::time::timeout(STEP_TIMEOUT, second.recv_from(&mut buffer)).await.unwrap().unwrap();
    assert_eq!(&buffer[..len], b"two");

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(first.try_recv_from(&mut buffer).is_err());
    assert!(second.try_recv_from(&mut buffer).is_err());
    relay.server.shutdown();
}

/// Listens on an ephemeral port through the relay and returns that port.
async fn listen_tcp(client: &mut TestClient, handle: i64) -> u16 {
    client
        .send_json(json!({"action": "create", "socket": handle, "payload": {"type": 2, "tcpConnectionId": 0}}))
        .await;
    client.send_json(json!({"action": "bind", "socket": handle, "payload": {"port": 0}})).await;
    client.send_json(json!({"action": "listen", "socket": handle, "payload": 5})).await;
    let listening = client.next_json().await;
    assert_eq!(listening["type"], "listening");
    assert_eq!(listening["socket"], handle);
    listening["payload"]["port"].as_u64().unwrap() as u16
}

#[tokio::test(flavor = "multi_thread")]
async fn test_tcp_accept_claim_and_relay() {
    let relay = start_relay().await;
    let mut client = TestClient::connect(&relay).await;
    let port = listen_tcp(&mut client, 1).await;

    let mut peer = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let connected = client.next_json().await;
    assert_eq!(connected["type"], "clientconnected");
    assert_eq!(connected["socket"], 1);
    assert_eq!(connected["payload"]["id"], 1);
    assert_eq!(connected["payload"]["addr"]["port"], port);
    assert_eq!(connected["payload"]["addr"]["addr"], "127.0.0.1");

    // Sent before the claim, so it is buffered and replayed.
    peer.write_all(b"early").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    client
        .send_json(json!({"action": "create", "socket": 2, "payload": {"type": 2, "tcpConnectionId": 1}}))
        .await;
    let (header, data) = client.next_binary().await;
    assert_eq!(header["socket"], 2);
    assert_eq!(header["payload"], json!({}));
    assert_eq!(data, b"early");

    peer.write_all(b"late").await.unwrap();
    let (_, data) = client.next_binary().await;
    assert_eq!(data, b"late");

    client.send_json(json!({"action": "binary", "socket": 2, "payload": {}})).await;
    client.send_binary(b"reply").await;
    let mut buffer = [0u8; 5];
    tokio::time::timeout(STEP_TIMEOUT, peer.read_exact(&mut buffer)).await.unwrap().unwrap();
    assert_eq!(&buffer, b"reply");

    drop(peer);
    let disconnected = client.next_json().await;
    assert_eq!(disconnected["type"], "clientdisconnected");
    assert_eq!(disconnected["socket"], 1);
    assert_eq!(disconnected["payload"]["id"], 1);
    assert!(relay.server.registry().is_empty());
    relay.server.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_connection_ids_increase_across_sessions() {
    let relay = start_relay().await;
    let mut first_client = TestClient::connect(&relay).await;
    let mut second_client = TestClient::connect(&relay).await;
    let first_port = listen_tcp(&mut first_client, 1).await;
    let second_port = listen_tcp(&mut second_client, 1).await;

    let _a = TcpStream::connect(("127.0.0.1", first_port)).await.unwrap();
    assert_eq!(first_client.next_json().await["payload"]["id"], 1);
    let _b = TcpStream::connect(("127.0.0.1", second_port)).await.unwrap();
    assert_eq!(second_client.next_json().await["payload"]["id"], 2);
    relay.server.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_double_claim_rejects_second_session_only() {
    let relay = start_relay().await;
    let mut owner = TestClient::connect(&relay).await;
    let port = listen_tcp(&mut owner, 1).await;
    let mut peer = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let id = owner.next_json().await["payload"]["id"].clone();

    // Replaying the buffered bytes proves the owner's claim landed first.
    peer.write_all(b"hello").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    owner
        .send_json(json!({"action": "create", "socket": 2, "payload": {"type": 2, "tcpConnectionId": id}}))
        .await;
    assert_eq!(owner.next_binary().await.1, b"hello");

    let mut intruder = TestClient::connect(&relay).await;
    intruder
        .send_json(json!({"action": "create", "socket": 7, "payload": {"type": 2, "tcpConnectionId": id}}))
        .await;
    assert_eq!(
        intruder.expect_close().await,
        (1002, "Only one GameSocket is permitted per TCP connection!".to_string())
    );

    // The original claim still relays.
    peer.write_all(b"still mine").await.unwrap();
    let (header, data) = owner.next_binary().await;
    assert_eq!(header["socket"], 2);
    assert_eq!(data, b"still mine");
    relay.server.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_port_in_use_reports_bindfail_and_session_survives() {
    let relay = start_relay().await;
    let occupant = std::net::UdpSocket::bind("0.0.0.0:0").unwrap();
    let port = occupant.local_addr().unwrap().port();

    let mut client = TestClient::connect(&relay).await;
    client.send_json(json!({"action": "create", "socket": 3, "payload": {"type": 1}})).await;
    client.send_json(json!({"action": "bind", "socket": 3, "payload": {"port": port}})).await;
    let bindfail = client.next_json().await;
    assert_eq!(bindfail, json!({"type": "bindfail", "socket": 3, "payload": {"port": port}}));

    client.send_json(json!({"action": "create", "socket": 4, "payload": {"type": 1}})).await;
    client.send_json(json!({"action": "bind", "socket": 4, "payload": {"port": 0}})).await;
    assert_eq!(client.next_json().await["type"], "listening");
    relay.server.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_disconnect_releases_sockets() {
    let relay = start_relay().await;
    let mut client = TestClient::connect(&relay).await;
    client.send_json(json!({"action": "create", "socket": 1, "payload": {"type": 1}})).await;
    client.send_json(json!({"action": "bind", "socket": 1, "payload": {"port": 0}})).await;
    let port = client.next_json().await["payload"]["port"].as_u64().unwrap() as u16;
    client.ws.close(None).await.unwrap();
    drop(client);

    let deadline = tokio::time::Instant::now() + STEP_TIMEOUT;
    while std::net::UdpSocket::bind(("0.0.0.0", port)).is_err() {
        assert!(tokio::time::Instant::now() < deadline, "UDP port {port} never released");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    relay.server.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_shutdown_closes_sessions_with_going_away() {
    let relay = start_relay().await;
    let mut client = TestClient::connect(&relay).await;
    relay.server.shutdown();

    let (code, reason) = client.expect_close().await;
    assert_eq!(code, 1001);
    assert_eq!(reason, "Server shutting down");
    let result = tokio::time::timeout(STEP_TIMEOUT, relay.task).await.unwrap().unwrap();
    assert!(result.is_ok());
}
