//! Viewport/zone bookkeeping for one room.
//!
//! The index tracks every entity the zone feed reported (users and walking
//! groups, with positions), the last viewport each client reported, and the
//! set of entities each client currently sees. All three are needed to turn
//! a room-global event into the per-client enter/move/leave deltas the
//! protocol promises: for a given client, an enter always precedes moves of
//! the same entity, and a leave is final until the next enter.

use pusher_protocol::{ClientId, EmoteEvent, Position, SetPlayerDetails, SpaceUserId, Viewport, ZoneGroup, ZoneUser};
use std::collections::{HashMap, HashSet};

/// Identity of an indexed entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKey {
    User(SpaceUserId),
    Group(u32),
}

/// An indexed entity with its last known state.
#[derive(Debug, Clone)]
pub enum ZoneEntity {
    User(ZoneUser),
    Group(ZoneGroup),
}

impl ZoneEntity {
    pub fn key(&self) -> EntityKey {
        match self {
            ZoneEntity::User(user) => EntityKey::User(user.user_id),
            ZoneEntity::Group(group) => EntityKey::Group(group.group_id),
        }
    }

    pub fn position(&self) -> Position {
        match self {
            ZoneEntity::User(user) => user.position,
            ZoneEntity::Group(group) => group.position,
        }
    }
}

/// A per-client delta produced by the index.
#[derive(Debug, Clone)]
pub enum ZoneDelta {
    Enter(ZoneEntity),
    Move(ZoneEntity),
    Leave(EntityKey),
    Emote(EmoteEvent),
    PlayerDetails {
        user_id: SpaceUserId,
        details: SetPlayerDetails,
    },
    Error(String),
}

/// A delta addressed to one client.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub client: ClientId,
    pub delta: ZoneDelta,
}

/// The room's spatial bookkeeping. Not thread safe; the room serializes
/// access behind its state lock.
#[derive(Debug, Default)]
pub struct ZoneIndex {
    entities: HashMap<EntityKey, ZoneEntity>,
    viewports: HashMap<ClientId, Viewport>,
    visible: HashMap<ClientId, HashSet<EntityKey>>,
}

impl ZoneIndex {
    /// Records a client's new viewport and diffs its visibility set.
    pub fn set_viewport(&mut self, client: ClientId, viewport: Viewport) -> Vec<Delivery> {
        self.viewports.insert(client, viewport);
        let visible = self.visible.entry(client).or_default();

        let mut deliveries = Vec::new();
        for (key, entity) in &self.entities {
            let inside = viewport.contains(&entity.position());
            let was_visible = visible.contains(key);
            if inside && !was_visible {
                visible.insert(*key);
                deliveries.push(Delivery {
                    client,
                    delta: ZoneDelta::Enter(entity.clone()),
                });
            } else if !inside && was_visible {
                visible.remove(key);
                deliveries.push(Delivery {
                    client,
                    delta: ZoneDelta::Leave(*key),
                });
            }
        }
        deliveries
    }

    /// Inserts or moves an entity and diffs every client against it.
    pub fn upsert(&mut self, entity: ZoneEntity) -> Vec<Delivery> {
        let key = entity.key();
        let position = entity.position();
        self.entities.insert(key, entity.clone());

        let mut deliveries = Vec::new();
        for (client, viewport) in &self.viewports {
            let visible = self.visible.entry(*client).or_default();
            let inside = viewport.contains(&position);
            let was_visible = visible.contains(&key);
            match (was_visible, inside) {
                (false, true) => {
                    visible.insert(key);
                    deliveries.push(Delivery {
                        client: *client,
                        delta: ZoneDelta::Enter(entity.clone()),
                    });
                }
                (true, true) => deliveries.push(Delivery {
                    client: *client,
                    delta: ZoneDelta::Move(entity.clone()),
                }),
                (true, false) => {
                    visible.remove(&key);
                    deliveries.push(Delivery {
                        client: *client,
                        delta: ZoneDelta::Leave(key),
                    });
                }
                (false, false) => {}
            }
        }
        deliveries
    }

    /// Removes an entity; every client that saw it gets a leave.
    pub fn remove(&mut self, key: EntityKey) -> Vec<Delivery> {
        self.entities.remove(&key);
        let mut deliveries = Vec::new();
        for (client, visible) in self.visible.iter_mut() {
            if visible.remove(&key) {
                deliveries.push(Delivery {
                    client: *client,
                    delta: ZoneDelta::Leave(key),
                });
            }
        }
        deliveries
    }

    /// Clients that currently see the given user.
    pub fn clients_seeing_user(&self, user_id: SpaceUserId) -> Vec<ClientId> {
        let key = EntityKey::User(user_id);
        self.visible
            .iter()
            .filter(|(_, visible)| visible.contains(&key))
            .map(|(client, _)| *client)
            .collect()
    }

    /// Every client with a registered viewport.
    pub fn all_clients(&self) -> Vec<ClientId> {
        self.viewports.keys().copied().collect()
    }

    /// Drops a client's viewport and visibility set.
    pub fn remove_client(&mut self, client: ClientId) {
        self.viewports.remove(&client);
        self.visible.remove(&client);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_at(id: SpaceUserId, x: f64, y: f64) -> ZoneEntity {
        ZoneEntity::User(ZoneUser {
            user_id: id,
            user_uuid: format!("uuid-{id}"),
            name: format!("user-{id}"),
            position: Position::new(x, y),
            availability_status: Default::default(),
            character_texture_ids: vec![],
            visit_card_url: None,
        })
    }

    fn deltas_for(deliveries: &[Delivery], client: ClientId) -> Vec<&ZoneDelta> {
        deliveries
            .iter()
            .filter(|d| d.client == client)
            .map(|d| &d.delta)
            .collect()
    }

    #[test]
    fn viewport_update_emits_enters_and_leaves() {
        let mut index = ZoneIndex::default();
        let watcher = ClientId::new();
        index.upsert(user_at(1, 10.0, 10.0));
        index.upsert(user_at(2, 500.0, 500.0));

        let deliveries = index.set_viewport(watcher, Viewport::new(0.0, 0.0, 100.0, 100.0));
        let deltas = deltas_for(&deliveries, watcher);
        assert_eq!(deltas.len(), 1);
        assert!(matches!(deltas[0], ZoneDelta::Enter(_)));

        // Shift the viewport away: user 1 leaves, user 2 enters.
        let deliveries = index.set_viewport(watcher, Viewport::new(400.0, 400.0, 600.0, 600.0));
        let deltas = deltas_for(&deliveries, watcher);
        assert_eq!(deltas.len(), 2);
        assert!(deltas
            .iter()
            .any(|d| matches!(d, ZoneDelta::Leave(EntityKey::User(1)))));
        assert!(deltas.iter().any(|d| matches!(d, ZoneDelta::Enter(_))));
    }

    #[test]
    fn movement_transitions_between_enter_move_and_leave() {
        let mut index = ZoneIndex::default();
        let watcher = ClientId::new();
        index.set_viewport(watcher, Viewport::new(0.0, 0.0, 100.0, 100.0));

        // Outside: silence.
        assert!(index.upsert(user_at(1, 200.0, 200.0)).is_empty());
        // Walks in: enter.
        let deliveries = index.upsert(user_at(1, 50.0, 50.0));
        assert!(matches!(deliveries[0].delta, ZoneDelta::Enter(_)));
        // Moves inside: move.
        let deliveries = index.upsert(user_at(1, 60.0, 50.0));
        assert!(matches!(deliveries[0].delta, ZoneDelta::Move(_)));
        // Walks out: leave.
        let deliveries = index.upsert(user_at(1, 300.0, 50.0));
        assert!(matches!(
            deliveries[0].delta,
            ZoneDelta::Leave(EntityKey::User(1))
        ));
    }

    #[test]
    fn remove_notifies_only_seeing_clients() {
        let mut index = ZoneIndex::default();
        let near = ClientId::new();
        let far = ClientId::new();
        index.set_viewport(near, Viewport::new(0.0, 0.0, 100.0, 100.0));
        index.set_viewport(far, Viewport::new(1000.0, 1000.0, 1100.0, 1100.0));
        index.upsert(user_at(1, 50.0, 50.0));

        assert_eq!(index.clients_seeing_user(1), vec![near]);

        let deliveries = index.remove(EntityKey::User(1));
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].client, near);
    }
}
