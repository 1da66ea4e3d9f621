//! Per-connection handling for client and admin sockets.
//!
//! The upgrade request carries the client identity in its query string
//! (`roomId`, `uuid`, `name`, `tags`, `textures`, `chatID`); token
//! validation happens upstream and is not re-done here. Regular clients
//! speak the tagged frame tree; sockets upgrading on `/admin` speak the
//! JSON envelope protocol instead.

use crate::client::{ClientFrame, ClientSession};
use crate::client::session::ClientIdentity;
use crate::batch::BatchConfig;
use crate::error::GatewayError;
use crate::front::router::route_client_message;
use crate::multiplexer::SessionMultiplexer;
use futures::{SinkExt, StreamExt};
use pusher_protocol::{AdminEnvelope, ClientId, ClientToPusherMessage};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, trace, warn};

/// Handles one upgraded socket from handshake to cleanup.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    mux: Arc<SessionMultiplexer>,
) -> Result<(), GatewayError> {
    // Capture the request URI during the handshake; identity rides in the
    // query string.
    let mut request_uri = String::new();
    let ws_stream = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, res: Response| {
        request_uri = req.uri().to_string();
        Ok(res)
    })
    .await
    .map_err(|e| GatewayError::Network(format!("WebSocket handshake failed: {e}")))?;

    if request_uri.starts_with("/admin") {
        return handle_admin_connection(ws_stream, addr, mux).await;
    }

    let identity = parse_identity(&request_uri, addr);
    let batch_config = BatchConfig {
        max_size: mux.config().batch_max_size,
        flush_interval: mux.config().batch_flush_interval(),
    };
    let (client, mut outbound_rx) = ClientSession::new(identity, batch_config);
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    // Outgoing task: drains the session's channel into the socket.
    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            match frame {
                ClientFrame::Message(message) => {
                    let text = match serde_json::to_string(&message) {
                        Ok(text) => text,
                        Err(e) => {
                            error!("Unserializable outbound frame: {}", e);
                            continue;
                        }
                    };
                    if ws_tx.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                ClientFrame::Close { code, reason } => {
                    let _ = ws_tx
                        .send(Message::Close(Some(CloseFrame {
                            code: CloseCode::from(code),
                            reason: reason.into(),
                        })))
                        .await;
                    break;
                }
            }
        }
    });

    // The join is part of session setup; a failure closes the socket with
    // the back-lost code.
    if let Err(e) = mux.handle_join_room(&client).await {
        error!("Join failed for {}: {}", addr, e);
        client.close(
            pusher_protocol::CLOSE_CODE_BACK_LOST,
            "Connection failed to back server",
        );
        let _ = writer.await;
        return Ok(());
    }

    // Incoming loop: decode and route until the socket closes.
    while let Some(next) = ws_rx.next().await {
        match next {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientToPusherMessage>(&text) {
                Ok(message) => {
                    if let Err(e) = route_client_message(&mux, &client, message).await {
                        trace!("Client {} op failed: {}", client.id(), e);
                        client.send_error(e.client_message());
                    }
                }
                Err(e) => {
                    // Unknown tag or malformed frame: protocol violation,
                    // drop the frame.
                    warn!("Undecodable frame from {}: {}", addr, e);
                }
            },
            Ok(Message::Close(_)) => {
                debug!("🔌 Client {} requested close", client.id());
                break;
            }
            Ok(Message::Ping(payload)) => {
                // The writer task owns the sink; queue a pong through it is
                // unnecessary - tungstenite answers pings itself.
                let _ = payload;
            }
            Ok(_) => {}
            Err(e) => {
                debug!("Socket error from {}: {}", addr, e);
                break;
            }
        }
    }

    mux.disconnect(&client).await;
    writer.abort();
    Ok(())
}

/// Pulls the identity fields out of the upgrade query string.
fn parse_identity(request_uri: &str, addr: SocketAddr) -> ClientIdentity {
    let mut identity = ClientIdentity {
        ip_address: addr.ip().to_string(),
        ..Default::default()
    };
    let Ok(parsed) = url::Url::parse(&format!("ws://pusher{request_uri}")) else {
        return identity;
    };
    for (key, value) in parsed.query_pairs() {
        match key.as_ref() {
            "roomId" => identity.room_id = value.into_owned(),
            "uuid" => identity.user_uuid = value.into_owned(),
            "name" => identity.name = value.into_owned(),
            "chatID" => identity.chat_id = value.into_owned(),
            "tags" => {
                identity.tags = value
                    .split(',')
                    .filter(|t| !t.is_empty())
                    .map(str::to_string)
                    .collect()
            }
            "textures" => {
                identity.character_texture_ids = value
                    .split(',')
                    .filter(|t| !t.is_empty())
                    .map(str::to_string)
                    .collect()
            }
            _ => {}
        }
    }
    identity
}

/// Commands an administrative listener may send.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", content = "data")]
enum AdminCommand {
    #[serde(rename = "listen")]
    Listen {
        #[serde(rename = "roomId")]
        room_id: String,
    },
}

/// Handles an `/admin` socket: envelope protocol, member join/leave feed.
async fn handle_admin_connection(
    ws_stream: tokio_tungstenite::WebSocketStream<TcpStream>,
    addr: SocketAddr,
    mux: Arc<SessionMultiplexer>,
) -> Result<(), GatewayError> {
    let listener_id = ClientId::new();
    let (envelope_tx, mut envelope_rx) = mpsc::unbounded_channel::<AdminEnvelope>();
    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    let mut listened_rooms: Vec<String> = Vec::new();

    debug!("👮 Admin listener {} connected from {}", listener_id, addr);

    loop {
        tokio::select! {
            envelope = envelope_rx.recv() => {
                let Some(envelope) = envelope else { break };
                let Ok(text) = serde_json::to_string(&envelope) else { continue };
                if ws_tx.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            next = ws_rx.next() => match next {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<AdminCommand>(&text) {
                    Ok(AdminCommand::Listen { room_id }) => {
                        mux.handle_admin_room(&room_id, listener_id, envelope_tx.clone());
                        listened_rooms.push(room_id);
                    }
                    Err(e) => {
                        let error = AdminEnvelope::Error { message: e.to_string() };
                        if let Ok(text) = serde_json::to_string(&error) {
                            let _ = ws_tx.send(Message::Text(text)).await;
                        }
                    }
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("Admin socket error from {}: {}", addr, e);
                    break;
                }
            }
        }
    }

    for room_id in listened_rooms {
        mux.remove_admin_listener(&room_id, listener_id);
    }
    debug!("👮 Admin listener {} disconnected", listener_id);
    Ok(())
}
