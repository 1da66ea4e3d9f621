//! Per-room state and zone fan-out.
//!
//! A [`PusherRoom`] tracks the clients connected to one game world, the
//! viewport each reported last, and the entities the room's zone feed has
//! announced. Zone events are fanned out to exactly the clients whose
//! viewport overlaps, through the [`ZoneEventListener`].

pub mod listener;
pub mod zone_index;

pub use listener::{BatchZoneListener, ZoneEventListener};
pub use zone_index::{Delivery, EntityKey, ZoneDelta, ZoneEntity, ZoneIndex};

use crate::back::BackendDirectory;
use crate::client::ClientSession;
use crate::error::GatewayError;
use pusher_protocol::{ClientId, Viewport, ZoneEvent};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Clients and spatial bookkeeping, guarded together so that computing a
/// delta and delivering it is one atomic step. This is what preserves the
/// per-client enter-before-move ordering under concurrent viewport updates.
#[derive(Debug, Default)]
struct RoomState {
    clients: HashMap<ClientId, Arc<ClientSession>>,
    index: ZoneIndex,
}

/// One game world as seen by this gateway process.
#[derive(Debug)]
pub struct PusherRoom {
    room_url: String,
    state: Mutex<RoomState>,
    version: AtomicU32,
    closed: AtomicBool,
    listener: Arc<dyn ZoneEventListener>,
    zone_pump: Mutex<Option<JoinHandle<()>>>,
}

impl PusherRoom {
    /// Creates the room and opens its shared zone feed.
    pub async fn init(
        room_url: String,
        directory: &BackendDirectory,
        listener: Arc<dyn ZoneEventListener>,
    ) -> Result<Arc<Self>, GatewayError> {
        let back = directory.room_client(&room_url).await?;
        let mut feed = back.watch_zones(&room_url).await?;

        let room = Arc::new(Self {
            room_url: room_url.clone(),
            state: Mutex::new(RoomState::default()),
            version: AtomicU32::new(0),
            closed: AtomicBool::new(false),
            listener,
            zone_pump: Mutex::new(None),
        });

        let weak: Weak<PusherRoom> = Arc::downgrade(&room);
        let pump = tokio::spawn(async move {
            while let Some(event) = feed.reader.recv().await {
                let Some(room) = weak.upgrade() else { break };
                match event {
                    Ok(event) => room.handle_zone_event(event),
                    Err(err) => warn!("Zone feed error for {}: {}", room.room_url, err),
                }
            }
            debug!("Zone feed ended for {}", room_url);
        });
        *room.zone_pump.lock().expect("zone pump lock") = Some(pump);

        info!("🌍 Room {} created", room.room_url);
        Ok(room)
    }

    pub fn room_url(&self) -> &str {
        &self.room_url
    }

    /// Adds a client; idempotent. Returns false if the room already closed
    /// (the caller retries room creation).
    pub fn join(&self, client: Arc<ClientSession>) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        let mut state = self.state.lock().expect("room state lock");
        state.clients.insert(client.id(), client);
        true
    }

    /// Removes a client; no error if absent.
    pub fn leave(&self, client: ClientId) {
        let mut state = self.state.lock().expect("room state lock");
        state.clients.remove(&client);
        state.index.remove_client(client);
    }

    /// Records a client's viewport and delivers the resulting enter/leave
    /// deltas for entities crossing the boundary.
    pub fn set_viewport(&self, client: &Arc<ClientSession>, viewport: Viewport) {
        let mut state = self.state.lock().expect("room state lock");
        if !state.clients.contains_key(&client.id()) {
            state.clients.insert(client.id(), client.clone());
        }
        let deliveries = state.index.set_viewport(client.id(), viewport);
        self.dispatch(&state, deliveries);
    }

    /// Applies one zone-feed event and fans it out.
    pub fn handle_zone_event(&self, event: ZoneEvent) {
        let mut state = self.state.lock().expect("room state lock");
        let deliveries = match event {
            ZoneEvent::UserJoined(user) | ZoneEvent::UserMoved(user) => {
                state.index.upsert(ZoneEntity::User(user))
            }
            ZoneEvent::UserLeft { user_id } => state.index.remove(EntityKey::User(user_id)),
            ZoneEvent::GroupUpdate(group) => state.index.upsert(ZoneEntity::Group(group)),
            ZoneEvent::GroupDelete { group_id } => state.index.remove(EntityKey::Group(group_id)),
            ZoneEvent::Emote(emote) => state
                .index
                .clients_seeing_user(emote.actor_user_id)
                .into_iter()
                .map(|client| Delivery {
                    client,
                    delta: ZoneDelta::Emote(emote.clone()),
                })
                .collect(),
            ZoneEvent::PlayerDetailsUpdated { user_id, details } => state
                .index
                .clients_seeing_user(user_id)
                .into_iter()
                .map(|client| Delivery {
                    client,
                    delta: ZoneDelta::PlayerDetails {
                        user_id,
                        details: details.clone(),
                    },
                })
                .collect(),
            ZoneEvent::Error { message } => state
                .index
                .all_clients()
                .into_iter()
                .map(|client| Delivery {
                    client,
                    delta: ZoneDelta::Error(message.clone()),
                })
                .collect(),
        };
        self.dispatch(&state, deliveries);
    }

    fn dispatch(&self, state: &RoomState, deliveries: Vec<Delivery>) {
        for delivery in deliveries {
            let Some(client) = state.clients.get(&delivery.client) else {
                continue;
            };
            match delivery.delta {
                ZoneDelta::Enter(ZoneEntity::User(user)) => {
                    self.listener.on_user_enters(client, &user)
                }
                ZoneDelta::Move(ZoneEntity::User(user)) => {
                    self.listener.on_user_moves(client, &user)
                }
                ZoneDelta::Leave(EntityKey::User(user_id)) => {
                    self.listener.on_user_leaves(client, user_id)
                }
                ZoneDelta::Enter(ZoneEntity::Group(group)) => {
                    self.listener.on_group_enters(client, &group)
                }
                ZoneDelta::Move(ZoneEntity::Group(group)) => {
                    self.listener.on_group_moves(client, &group)
                }
                ZoneDelta::Leave(EntityKey::Group(group_id)) => {
                    self.listener.on_group_leaves(client, group_id)
                }
                ZoneDelta::Emote(emote) => self.listener.on_emote(client, &emote),
                ZoneDelta::PlayerDetails { user_id, details } => self
                    .listener
                    .on_player_details_updated(client, user_id, &details),
                ZoneDelta::Error(message) => self.listener.on_error(client, &message),
            }
        }
    }

    /// True iff no client remains.
    pub fn is_empty(&self) -> bool {
        self.state.lock().expect("room state lock").clients.is_empty()
    }

    /// Current members as (uuid, name, ip), for the admin listener protocol.
    pub fn member_list(&self) -> Vec<(String, String, String)> {
        let state = self.state.lock().expect("room state lock");
        state
            .clients
            .values()
            .map(|client| {
                let data = client.data();
                (
                    data.user_uuid.clone(),
                    data.name.clone(),
                    data.ip_address.clone(),
                )
            })
            .collect()
    }

    /// Version-gates a `refreshRoomMessage`: true exactly once per bump.
    pub fn needs_update(&self, version: u32) -> bool {
        let mut current = self.version.load(Ordering::SeqCst);
        loop {
            if version <= current {
                return false;
            }
            match self.version.compare_exchange(
                current,
                version,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    /// Releases the zone feed and refuses further joins.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Ok(mut guard) = self.zone_pump.lock() {
            if let Some(pump) = guard.take() {
                pump.abort();
            }
        }
        info!("🌍 Room {} closed", self.room_url);
    }
}

impl Drop for PusherRoom {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn needs_update_is_monotone_and_idempotent() {
        let room = PusherRoom {
            room_url: "room/x".to_string(),
            state: Mutex::new(RoomState::default()),
            version: AtomicU32::new(0),
            closed: AtomicBool::new(false),
            listener: Arc::new(BatchZoneListener),
            zone_pump: Mutex::new(None),
        };
        assert!(room.needs_update(1));
        assert!(!room.needs_update(1));
        assert!(room.needs_update(3));
        assert!(!room.needs_update(2));
    }
}
