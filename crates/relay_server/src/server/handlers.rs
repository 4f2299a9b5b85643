//! Connection handling logic for WebSocket clients.
//!
//! This module runs one client session from handshake to teardown: it feeds
//! inbound frames to the session's [`GameClient`] in arrival order and drains
//! the session's outbound queue into the WebSocket from a separate writer
//! task.

use crate::{
    config::ServerConfig,
    connection::{
        outbound::frames_or_log, ConnectionRegistry, GameClient, OutboundReceiver, CLOSE_GOING_AWAY,
    },
    error::RelayError,
};
use futures::{SinkExt, StreamExt};
use futures_util::stream::SplitSink;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::{accept_async, tungstenite::Message, WebSocketStream};
use tracing::{debug, error, info, trace, warn};

/// How long teardown waits for queued frames to reach the client.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// Handles a single client connection from establishment to cleanup.
///
/// # Connection Flow
///
/// 1. Perform the WebSocket handshake
/// 2. Start the writer task and greet the client (`hostname`)
/// 3. Route frames until the client closes, is rejected, or the server shuts down
/// 4. Close every socket the client created
/// 5. Let the writer drain what is still queued
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    registry: Arc<ConnectionRegistry>,
    config: Arc<ServerConfig>,
    mut shutdown_receiver: broadcast::Receiver<()>,
) -> Result<(), RelayError> {
    if config.tcp_nodelay {
        let _ = stream.set_nodelay(true);
    }
    let ws_stream = accept_async(stream)
        .await
        .map_err(|e| RelayError::Network(format!("WebSocket handshake failed: {e}")))?;
    info!("🔗 Accepted new connection from {}", addr);

    let (ws_sender, mut ws_receiver) = ws_stream.split();
    let (outbound_sender, outbound_receiver) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_frames(ws_sender, outbound_receiver, addr));

    let mut client = GameClient::new(addr, outbound_sender, registry, config);

    loop {
        tokio::select! {
            frame = ws_receiver.next() => {
                let result = match frame {
                    Some(Ok(Message::Text(text))) => client.on_websocket_message(text.as_bytes(), false),
                    Some(Ok(Message::Binary(data))) => client.on_websocket_message(&data, true),
                    // tungstenite queues the pong itself.
                    Some(Ok(Message::Ping(_))) => Ok(()),
                    Some(Ok(Message::Close(frame))) => {
                        match frame {
                            Some(frame) => debug!(
                                "🔌 Client {} closed: Code #{}, reason: {}",
                                addr, u16::from(frame.code), frame.reason.as_str()
                            ),
                            None => debug!("🔌 Client {} closed without a code", addr),
                        }
                        break;
                    }
                    Some(Ok(_)) => Ok(()),
                    Some(Err(e)) => {
                        client.on_websocket_error(&e);
                        break;
                    }
                    None => break,
                };

                match result {
                    Ok(()) => {}
                    Err(e) if e.is_protocol_violation() => {
                        client.reject(&e.close_reason());
                        break;
                    }
                    Err(e) => warn!("Session {}: {}", addr, e),
                }
            }
            _ = shutdown_receiver.recv() => {
                client.close(CLOSE_GOING_AWAY, "Server shutting down");
                break;
            }
        }
    }

    client.on_websocket_close();
    // Queue a normal close unless one is already pending, so the writer
    // drains and stops even while adapter tasks still hold senders.
    client.close(1000, "");
    drop(client);

    match tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Session {}: writer task failed: {}", addr, e),
        Err(_) => debug!("Session {}: writer did not drain in time", addr),
    }
    info!("👋 Connection {} finished", addr);
    Ok(())
}

/// Writes queued messages until a close frame goes out or the client is gone.
async fn write_frames(mut ws_sender: WsSink, mut outbound: OutboundReceiver, addr: SocketAddr) {
    while let Some(message) = outbound.recv().await {
        let closing = message.is_close();
        for frame in frames_or_log(message) {
            if let Err(e) = ws_sender.send(frame).await {
                trace!("Session {}: failed to send frame: {}", addr, e);
                return;
            }
        }
        if closing {
            break;
        }
    }
    let _ = ws_sender.close().await;
}
