//! The `/ws` endpoint: transport ownership for one connection.
//!
//! Each accepted socket runs three pieces: the reader loop (this
//! function), a writer task draining the connection's outbound channel
//! (one frame in flight, FIFO), and a heartbeat task probing liveness.
//! Everything above the transport goes through the orchestrator.

use crate::connection::{Connection, OutboundFrame};
use crate::orchestrator::{Orchestrator, CLOSE_POLICY};
use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket};
use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use docsync_engine::codec::{self, Frame};
use futures::{SinkExt, StreamExt};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Close code for a normal connection end.
const CLOSE_NORMAL: u16 = 1000;

/// Upgrades an HTTP request on `/ws` into a sync session.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(orchestrator): State<Arc<Orchestrator>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, addr.ip(), orchestrator))
}

async fn handle_socket(socket: WebSocket, ip: IpAddr, orchestrator: Arc<Orchestrator>) {
    let (connection, outbound_rx) = Connection::new(ip);
    let connection = Arc::new(connection);
    let (mut sink, mut stream) = socket.split();

    if let Err(reason) = orchestrator
        .register_connection(Arc::clone(&connection))
        .await
    {
        warn!("rejecting connection from {ip}: {reason}");
        let _ = sink
            .send(WsMessage::Close(Some(CloseFrame {
                code: CLOSE_POLICY,
                reason: reason.into(),
            })))
            .await;
        return;
    }

    let writer = spawn_writer(Arc::clone(&connection), outbound_rx, sink);
    let heartbeat = spawn_heartbeat(Arc::clone(&connection), &orchestrator);

    while let Some(Ok(ws_message)) = stream.next().await {
        match ws_message {
            WsMessage::Binary(bytes) => {
                orchestrator
                    .handle_frame(&connection, Frame::Binary(bytes.to_vec()))
                    .await;
            }
            WsMessage::Text(text) => {
                orchestrator
                    .handle_frame(&connection, Frame::Text(text.to_string()))
                    .await;
            }
            WsMessage::Pong(_) => connection.pong_received(),
            // The transport layer answers pings on its own.
            WsMessage::Ping(_) => {}
            WsMessage::Close(_) => break,
        }
    }

    debug!("connection {} read loop ended", connection.id());
    heartbeat.abort();
    connection.close(CLOSE_NORMAL, "connection closed");
    orchestrator.handle_close(&connection).await;
    let _ = writer.await;
}

fn spawn_writer(
    connection: Arc<Connection>,
    mut outbound_rx: mpsc::UnboundedReceiver<OutboundFrame>,
    mut sink: futures::stream::SplitSink<WebSocket, WsMessage>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            match frame {
                OutboundFrame::Message(message) => {
                    let mode = connection.protocol_mode().await;
                    match codec::encode(mode, &message) {
                        Ok(Frame::Binary(bytes)) => {
                            if sink.send(WsMessage::Binary(bytes.into())).await.is_err() {
                                break;
                            }
                        }
                        Ok(Frame::Text(text)) => {
                            if sink.send(WsMessage::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!("dropping unencodable outbound message: {e}");
                        }
                    }
                }
                OutboundFrame::Ping => {
                    if sink
                        .send(WsMessage::Ping(Vec::new().into()))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                OutboundFrame::Close { code, reason } => {
                    let _ = sink
                        .send(WsMessage::Close(Some(CloseFrame {
                            code,
                            reason: reason.into(),
                        })))
                        .await;
                    break;
                }
            }
        }
    })
}

fn spawn_heartbeat(
    connection: Arc<Connection>,
    orchestrator: &Arc<Orchestrator>,
) -> tokio::task::JoinHandle<()> {
    let interval = orchestrator.config().heartbeat_interval;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if !connection.begin_ping() {
                debug!("connection {} missed heartbeat, terminating", connection.id());
                connection.close(CLOSE_NORMAL, "heartbeat timeout");
                break;
            }
            if connection.send_ping().is_err() {
                break;
            }
        }
    })
}
