//! WebSocket-backed back-end transport.
//!
//! Each stream class maps to one WebSocket connection carrying the JSON
//! rendition of the tagged frames: `/joinRoom` (one per client),
//! `/watchSpace` (one per back-end), `/watchZone?room=...` (one per room).
//! The unary admin RPCs go over plain HTTP POST to the same host.

use super::{
    BackClient, BackConnector, BackStreamPair, RoomStreamPair, SpaceStreamPair, ZoneFeed,
    STREAM_BUFFER,
};
use crate::error::GatewayError;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use pusher_protocol::{AdminMessage, AdminRoomMessage, BackId, BanUserMessage};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

/// Dials back-end instances from a static endpoint list.
#[derive(Debug)]
pub struct WsBackConnector {
    /// One `ws://host:port` endpoint per back-end index
    endpoints: Vec<String>,
}

impl WsBackConnector {
    pub fn new(endpoints: Vec<String>) -> Self {
        Self { endpoints }
    }
}

#[async_trait]
impl BackConnector for WsBackConnector {
    async fn connect(&self, back: BackId) -> Result<Arc<dyn BackClient>, GatewayError> {
        let ws_base = self
            .endpoints
            .get(back.0 as usize)
            .ok_or_else(|| {
                GatewayError::BackUnreachable(back, "no endpoint configured".to_string())
            })?
            .trim_end_matches('/')
            .to_string();
        let http_base = ws_base
            .replacen("wss://", "https://", 1)
            .replacen("ws://", "http://", 1);
        Ok(Arc::new(WsBackClient {
            back,
            ws_base,
            http_base,
            http: reqwest::Client::new(),
        }))
    }
}

/// One back-end instance reached over WebSocket + HTTP.
#[derive(Debug)]
pub struct WsBackClient {
    back: BackId,
    ws_base: String,
    http_base: String,
    http: reqwest::Client,
}

impl WsBackClient {
    /// Opens one WebSocket and bridges it to a channel pair.
    async fn open_stream<In, Out>(
        &self,
        path: &str,
    ) -> Result<BackStreamPair<In, Out>, GatewayError>
    where
        In: Serialize + Send + 'static,
        Out: DeserializeOwned + Send + 'static,
    {
        let url = format!("{}{}", self.ws_base, path);
        let (stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| GatewayError::BackUnreachable(self.back, e.to_string()))?;
        let (mut ws_tx, mut ws_rx) = stream.split();

        let (in_tx, mut in_rx) = mpsc::channel::<In>(STREAM_BUFFER);
        let (out_tx, out_rx) = mpsc::channel::<Result<Out, GatewayError>>(STREAM_BUFFER);

        // Outbound bridge: channel -> socket. Ends when the write half is
        // dropped, which closes the socket and therefore the inbound bridge.
        tokio::spawn(async move {
            while let Some(frame) = in_rx.recv().await {
                let text = match serde_json::to_string(&frame) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Dropping unserializable frame: {}", e);
                        continue;
                    }
                };
                if ws_tx.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            let _ = ws_tx.close().await;
        });

        // Inbound bridge: socket -> channel. A transport error surfaces as
        // one Err item; a clean close just closes the channel.
        let back = self.back;
        tokio::spawn(async move {
            while let Some(next) = ws_rx.next().await {
                match next {
                    Ok(Message::Text(text)) => match serde_json::from_str::<Out>(&text) {
                        Ok(frame) => {
                            if out_tx.send(Ok(frame)).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            // Unknown tags are a protocol violation, not a
                            // reason to kill the stream.
                            warn!("Undecodable frame from {}: {}", back, e);
                        }
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        let _ = out_tx
                            .send(Err(GatewayError::Network(e.to_string())))
                            .await;
                        break;
                    }
                }
            }
            debug!("Stream to {} closed", back);
        });

        Ok(BackStreamPair {
            writer: in_tx,
            reader: out_rx,
        })
    }

    /// Issues one unary RPC as an HTTP POST.
    async fn unary<T: Serialize>(&self, method: &str, body: &T) -> Result<(), GatewayError> {
        let url = format!("{}/{}", self.http_base, method);
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| GatewayError::BackUnreachable(self.back, e.to_string()))?;
        if !response.status().is_success() {
            return Err(GatewayError::Network(format!(
                "{} returned {}",
                method,
                response.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl BackClient for WsBackClient {
    async fn join_room(&self) -> Result<RoomStreamPair, GatewayError> {
        self.open_stream("/joinRoom").await
    }

    async fn watch_space(&self) -> Result<SpaceStreamPair, GatewayError> {
        self.open_stream("/watchSpace").await
    }

    async fn watch_zones(&self, room_url: &str) -> Result<ZoneFeed, GatewayError> {
        let path = format!(
            "/watchZone?room={}",
            url::form_urlencoded::byte_serialize(room_url.as_bytes()).collect::<String>()
        );
        let url = format!("{}{}", self.ws_base, path);
        let (stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| GatewayError::BackUnreachable(self.back, e.to_string()))?;
        // Inbound-only: the write half is parked in the bridge task so the
        // socket stays open for as long as the feed is read.
        let (ws_tx, mut ws_rx) = stream.split();
        let (out_tx, out_rx) = mpsc::channel(STREAM_BUFFER);
        let back = self.back;
        tokio::spawn(async move {
            let _keepalive = ws_tx;
            while let Some(next) = ws_rx.next().await {
                match next {
                    Ok(Message::Text(text)) => match serde_json::from_str(&text) {
                        Ok(event) => {
                            if out_tx.send(Ok(event)).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("Undecodable zone event from {}: {}", back, e),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        let _ = out_tx.send(Err(GatewayError::Network(e.to_string()))).await;
                        break;
                    }
                }
            }
            debug!("Zone feed from {} closed", back);
        });
        Ok(ZoneFeed { reader: out_rx })
    }

    async fn send_admin_message(&self, message: AdminMessage) -> Result<(), GatewayError> {
        self.unary("sendAdminMessage", &message).await
    }

    async fn ban(&self, message: BanUserMessage) -> Result<(), GatewayError> {
        self.unary("ban", &message).await
    }

    async fn send_admin_message_to_room(
        &self,
        message: AdminRoomMessage,
    ) -> Result<(), GatewayError> {
        self.unary("sendAdminMessageToRoom", &message).await
    }
}
