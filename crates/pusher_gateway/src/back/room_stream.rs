//! Per-client room streams.
//!
//! Each client that joins a room gets its own bidirectional stream to the
//! room's back-end. Outbound frames are written through the handle stored
//! in the client's socket data; inbound frames are pumped by a dedicated
//! task that re-emits them to the client nearly verbatim, snooping only
//! `roomJoinedMessage` (to capture the assigned user id) and
//! `refreshRoomMessage` (to version-gate room refreshes).

use super::RoomStreamPair;
use crate::client::ClientSession;
use crate::error::GatewayError;
use crate::room::PusherRoom;
use pusher_protocol::{RoomInMessage, RoomOutMessage, CLOSE_CODE_BACK_LOST};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Write half of a client's room stream plus its pump task.
#[derive(Debug)]
pub struct RoomStreamHandle {
    writer: mpsc::Sender<RoomInMessage>,
    pump: JoinHandle<()>,
}

impl RoomStreamHandle {
    /// Wires a freshly opened stream to its client: spawns the inbound pump
    /// and returns the write handle.
    pub fn spawn(
        pair: RoomStreamPair,
        client: Arc<ClientSession>,
        room: Arc<PusherRoom>,
    ) -> Arc<Self> {
        let writer = pair.writer;
        let pump = tokio::spawn(pump_room_stream(pair.reader, client, room));
        Arc::new(Self { writer, pump })
    }

    /// Writes a frame toward the back.
    pub async fn write(&self, message: RoomInMessage) -> Result<(), GatewayError> {
        self.writer
            .send(message)
            .await
            .map_err(|_| GatewayError::BackStreamClosed)
    }

    /// Ends the stream: stops the pump; dropping the handle closes the
    /// write half.
    pub fn end(&self) {
        self.pump.abort();
    }
}

impl Drop for RoomStreamHandle {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

/// Forwards back→client frames until the stream ends or errors.
async fn pump_room_stream(
    mut reader: mpsc::Receiver<Result<RoomOutMessage, GatewayError>>,
    client: Arc<ClientSession>,
    room: Arc<PusherRoom>,
) {
    loop {
        match reader.recv().await {
            Some(Ok(frame)) => handle_room_frame(frame, &client, &room),
            Some(Err(err)) => {
                error!("Room stream error for client {}: {}", client.id(), err);
                break;
            }
            None => {
                debug!("Room stream ended for client {}", client.id());
                break;
            }
        }
    }

    if !client.is_disconnecting() {
        client.close(CLOSE_CODE_BACK_LOST, "Connection lost to back server");
    }
}

fn handle_room_frame(frame: RoomOutMessage, client: &Arc<ClientSession>, room: &Arc<PusherRoom>) {
    match frame {
        RoomOutMessage::RoomJoined {
            current_user_id,
            can_edit,
            tags,
        } => {
            let viewport = {
                let mut data = client.data_mut();
                data.user_id = Some(current_user_id);
                data.space_user.id = current_user_id;
                data.can_edit = can_edit;
                if !tags.is_empty() {
                    data.tags = tags.clone();
                    data.space_user.tags = tags.clone();
                }
                data.viewport
            };
            // The join is only complete now; replay the stored viewport so
            // the zone index computes the client's initial enter set.
            room.set_viewport(client, viewport);
            client.send(pusher_protocol::PusherToClientMessage::RoomJoined {
                current_user_id,
                can_edit,
                tags,
            });
        }
        RoomOutMessage::RefreshRoom {
            room_id,
            version_number,
        } => {
            // Stale refresh repeats are suppressed; the client reloads once
            // per version bump.
            if room.needs_update(version_number) {
                client.send(pusher_protocol::PusherToClientMessage::RefreshRoom {
                    room_id,
                    version_number,
                });
            }
        }
        other => client.send(other.into()),
    }
}
