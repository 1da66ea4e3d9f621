//! Per-space state: user mirror, metadata, watchers, and filters.
//!
//! A space is a lightweight presence/chat channel that can span worlds. The
//! gateway keeps a local mirror of the space's users and metadata, fed by
//! the shared back stream of the space's back-end, and fans every mutation
//! out to the watching clients - but only to those whose installed filters
//! admit the user in question. Admission is evaluated on both the old and
//! the new record so a watcher sees an `addSpaceUser` when a user becomes
//! visible to it and a `removeSpaceUser` when it stops being visible,
//! regardless of what the underlying mutation was.

use crate::back::BackSpaceConnection;
use crate::client::ClientSession;
use crate::error::GatewayError;
use pusher_protocol::filter::admits;
use pusher_protocol::{
    BackId, ClientId, FieldMask, PusherToClientMessage, SpaceFilter, SpaceInMessage, SpaceUser,
    SpaceUserId,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct SpaceState {
    users: HashMap<SpaceUserId, SpaceUser>,
    metadata: HashMap<String, serde_json::Value>,
    watchers: HashMap<ClientId, Arc<ClientSession>>,
    filters: HashMap<ClientId, Vec<SpaceFilter>>,
}

/// One space as mirrored by this gateway process.
#[derive(Debug)]
pub struct Space {
    name: String,
    local_name: String,
    back_id: BackId,
    stream: Arc<BackSpaceConnection>,
    state: Mutex<SpaceState>,
    closed: AtomicBool,
}

impl Space {
    /// Creates the local mirror. The caller announces it to the back with
    /// [`Space::announce`] exactly once, after winning the creation race.
    pub fn new(
        name: String,
        local_name: String,
        back_id: BackId,
        stream: Arc<BackSpaceConnection>,
    ) -> Self {
        info!("✨ Space {} created on {}", name, back_id);
        Self {
            name,
            local_name,
            back_id,
            stream,
            state: Mutex::new(SpaceState::default()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The client-facing alias the space was joined under.
    pub fn local_name(&self) -> &str {
        &self.local_name
    }

    pub fn back_id(&self) -> BackId {
        self.back_id
    }

    /// Tells the back this gateway now watches the space.
    pub async fn announce(&self) -> Result<(), GatewayError> {
        self.stream
            .write(SpaceInMessage::JoinSpace {
                space_name: self.name.clone(),
            })
            .await
    }

    /// Registers a watcher. Returns false if the space already closed (the
    /// caller retries space creation).
    pub fn add_watcher(&self, client: Arc<ClientSession>) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        let mut state = self.state.lock().expect("space state lock");
        state.watchers.insert(client.id(), client);
        true
    }

    /// Removes a watcher and its filters; no error if absent.
    pub fn remove_watcher(&self, client: ClientId) {
        let mut state = self.state.lock().expect("space state lock");
        state.watchers.remove(&client);
        state.filters.remove(&client);
    }

    /// True iff no watcher remains.
    pub fn is_empty(&self) -> bool {
        self.state.lock().expect("space state lock").watchers.is_empty()
    }

    /// The current watcher sessions (eviction needs them to repair the
    /// client-side space lists).
    pub fn watchers(&self) -> Vec<Arc<ClientSession>> {
        self.state
            .lock()
            .expect("space state lock")
            .watchers
            .values()
            .cloned()
            .collect()
    }

    /// Current metadata, for the join-time snapshot.
    pub fn metadata_snapshot(&self) -> HashMap<String, serde_json::Value> {
        self.state.lock().expect("space state lock").metadata.clone()
    }

    // ------------------------------------------------------------------
    // User mutations
    // ------------------------------------------------------------------

    /// Client-originated registration: mirror, fan out, and announce to the
    /// back on first registration.
    pub async fn add_user(&self, user: SpaceUser) -> Result<(), GatewayError> {
        let first_registration = {
            let mut state = self.state.lock().expect("space state lock");
            let first = !state.users.contains_key(&user.id);
            self.fan_add(&state, &user);
            state.users.insert(user.id, user.clone());
            first
        };
        if first_registration {
            self.stream
                .write(SpaceInMessage::AddSpaceUser {
                    space_name: self.name.clone(),
                    user,
                })
                .await?;
        }
        Ok(())
    }

    /// Remote-originated registration: mirror and fan out only.
    pub fn local_add_user(&self, user: SpaceUser) {
        let mut state = self.state.lock().expect("space state lock");
        self.fan_add(&state, &user);
        state.users.insert(user.id, user);
    }

    /// Remote-originated masked update: merge into the mirror and fan out
    /// admission transitions.
    pub fn local_update_user(&self, update: SpaceUser, mask: FieldMask) {
        let mut state = self.state.lock().expect("space state lock");
        let old = state.users.get(&update.id).cloned();
        let merged = match &old {
            Some(existing) => {
                let mut merged = existing.clone();
                merged.merge_masked(&update, &mask);
                merged
            }
            None => {
                // An update for a user we never saw; treat it as an add so
                // the mirror converges instead of diverging forever.
                debug!("Update for unknown user {} in {}; upserting", update.id, self.name);
                update.clone()
            }
        };
        state.users.insert(merged.id, merged.clone());
        self.fan_transitions(&state, old.as_ref(), &merged, &mask);
    }

    /// Remote-originated removal.
    pub fn local_remove_user(&self, user_id: SpaceUserId) {
        let mut state = self.state.lock().expect("space state lock");
        let Some(old) = state.users.remove(&user_id) else {
            return;
        };
        for (client_id, watcher) in &state.watchers {
            let filters = state.filters.get(client_id).map(Vec::as_slice).unwrap_or(&[]);
            if admits(filters, &old) {
                watcher.send(PusherToClientMessage::RemoveSpaceUser {
                    space_name: self.local_name.clone(),
                    user_id,
                });
            }
        }
    }

    /// Client-originated masked update: mirror, fan out, and forward.
    pub async fn update_user(
        &self,
        update: SpaceUser,
        mask: FieldMask,
    ) -> Result<(), GatewayError> {
        self.local_update_user(update.clone(), mask.clone());
        self.stream
            .write(SpaceInMessage::UpdateSpaceUser {
                space_name: self.name.clone(),
                user: update,
                update_mask: mask,
            })
            .await
    }

    /// Client-originated removal (leave flows): mirror, fan out, forward.
    pub async fn remove_user(&self, user_id: SpaceUserId) -> Result<(), GatewayError> {
        self.local_remove_user(user_id);
        self.stream
            .write(SpaceInMessage::RemoveSpaceUser {
                space_name: self.name.clone(),
                user_id,
            })
            .await
    }

    fn fan_add(&self, state: &SpaceState, user: &SpaceUser) {
        for (client_id, watcher) in &state.watchers {
            let filters = state.filters.get(client_id).map(Vec::as_slice).unwrap_or(&[]);
            if admits(filters, user) {
                watcher.send(PusherToClientMessage::AddSpaceUser {
                    space_name: self.local_name.clone(),
                    user: user.clone(),
                });
            }
        }
    }

    /// Sends each watcher the frame matching its admission transition: a
    /// newly admitted user arrives as an add (it was invisible before), a
    /// no-longer-admitted one as a remove, a still-admitted one as the
    /// masked update.
    fn fan_transitions(
        &self,
        state: &SpaceState,
        old: Option<&SpaceUser>,
        new: &SpaceUser,
        mask: &FieldMask,
    ) {
        for (client_id, watcher) in &state.watchers {
            let filters = state.filters.get(client_id).map(Vec::as_slice).unwrap_or(&[]);
            let admitted_before = old.map(|user| admits(filters, user)).unwrap_or(false);
            let admitted_now = admits(filters, new);
            match (admitted_before, admitted_now) {
                (false, true) => watcher.send(PusherToClientMessage::AddSpaceUser {
                    space_name: self.local_name.clone(),
                    user: new.clone(),
                }),
                (true, false) => watcher.send(PusherToClientMessage::RemoveSpaceUser {
                    space_name: self.local_name.clone(),
                    user_id: new.id,
                }),
                (true, true) => watcher.send(PusherToClientMessage::UpdateSpaceUser {
                    space_name: self.local_name.clone(),
                    user: new.clone(),
                    update_mask: mask.clone(),
                }),
                (false, false) => {}
            }
        }
    }

    // ------------------------------------------------------------------
    // Metadata
    // ------------------------------------------------------------------

    /// Merge-overwrites top-level metadata keys; `propagate` fans the new
    /// values out to every watcher (remote-originated updates do, local
    /// pre-merges before a forward do not).
    pub fn local_update_metadata(
        &self,
        metadata: HashMap<String, serde_json::Value>,
        propagate: bool,
    ) {
        let mut state = self.state.lock().expect("space state lock");
        for (key, value) in &metadata {
            state.metadata.insert(key.clone(), value.clone());
        }
        if propagate {
            for watcher in state.watchers.values() {
                watcher.send(PusherToClientMessage::UpdateSpaceMetadata {
                    space_name: self.local_name.clone(),
                    metadata: metadata.clone(),
                });
            }
        }
    }

    /// Forwards a metadata update to the back (the local merge happened
    /// separately, without propagation).
    pub async fn forward_metadata(
        &self,
        metadata: &HashMap<String, serde_json::Value>,
    ) -> Result<(), GatewayError> {
        let blob = serde_json::to_string(metadata)
            .map_err(|e| GatewayError::InvalidMetadata(e.to_string()))?;
        self.stream
            .write(SpaceInMessage::UpdateSpaceMetadata {
                space_name: self.name.clone(),
                metadata: blob,
            })
            .await
    }

    // ------------------------------------------------------------------
    // Filters
    // ------------------------------------------------------------------

    /// Installs a filter; idempotent by name. The watcher receives an add
    /// for every current user the new filter matches.
    pub fn handle_add_filter(&self, client: &Arc<ClientSession>, filter: SpaceFilter) {
        let mut state = self.state.lock().expect("space state lock");
        let filters = state.filters.entry(client.id()).or_default();
        if let Some(existing) = filters.iter_mut().find(|f| f.name == filter.name) {
            *existing = filter.clone();
        } else {
            filters.push(filter.clone());
        }
        for user in state.users.values() {
            if filter.matches(user) {
                client.send(PusherToClientMessage::AddSpaceUser {
                    space_name: self.local_name.clone(),
                    user: user.clone(),
                });
            }
        }
    }

    /// Replaces a filter by name. Returns false (and changes nothing) when
    /// no filter of that name is installed.
    pub fn handle_update_filter(&self, client: &Arc<ClientSession>, filter: SpaceFilter) -> bool {
        let mut state = self.state.lock().expect("space state lock");
        let Some(filters) = state.filters.get_mut(&client.id()) else {
            return false;
        };
        if !filters.iter().any(|f| f.name == filter.name) {
            return false;
        }
        let old_list = filters.clone();
        if let Some(slot) = filters.iter_mut().find(|f| f.name == filter.name) {
            *slot = filter;
        }
        let new_list = filters.clone();
        self.fan_filter_change(&state, client, &old_list, &new_list);
        true
    }

    /// Removes a filter by name; idempotent.
    pub fn handle_remove_filter(&self, client: &Arc<ClientSession>, filter_name: &str) {
        let mut state = self.state.lock().expect("space state lock");
        let Some(filters) = state.filters.get_mut(&client.id()) else {
            return;
        };
        let old_list = filters.clone();
        filters.retain(|f| f.name != filter_name);
        let new_list = filters.clone();
        if old_list.len() != new_list.len() {
            self.fan_filter_change(&state, client, &old_list, &new_list);
        }
    }

    /// Diffs one watcher's admission set across a filter change.
    fn fan_filter_change(
        &self,
        state: &SpaceState,
        client: &Arc<ClientSession>,
        old_list: &[SpaceFilter],
        new_list: &[SpaceFilter],
    ) {
        for user in state.users.values() {
            let before = admits(old_list, user);
            let now = admits(new_list, user);
            match (before, now) {
                (false, true) => client.send(PusherToClientMessage::AddSpaceUser {
                    space_name: self.local_name.clone(),
                    user: user.clone(),
                }),
                (true, false) => client.send(PusherToClientMessage::RemoveSpaceUser {
                    space_name: self.local_name.clone(),
                    user_id: user.id,
                }),
                _ => {}
            }
        }
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    /// Fans a public event out to every watcher.
    pub fn send_public_event(&self, sender_user_id: SpaceUserId, event: serde_json::Value) {
        let state = self.state.lock().expect("space state lock");
        for watcher in state.watchers.values() {
            watcher.send(PusherToClientMessage::PublicEvent {
                space_name: self.local_name.clone(),
                sender_user_id,
                space_event: event.clone(),
            });
        }
    }

    /// Delivers a private event to the watcher owning `receiver_user_id`.
    pub fn send_private_event(
        &self,
        sender_user_id: SpaceUserId,
        receiver_user_id: SpaceUserId,
        event: serde_json::Value,
    ) {
        let state = self.state.lock().expect("space state lock");
        for watcher in state.watchers.values() {
            if watcher.user_id() == Some(receiver_user_id) {
                watcher.send(PusherToClientMessage::PrivateEvent {
                    space_name: self.local_name.clone(),
                    sender_user_id,
                    receiver_user_id,
                    space_event: event.clone(),
                });
                return;
            }
        }
        debug!(
            "Private event for absent user {} in {}",
            receiver_user_id, self.name
        );
    }

    /// Forwards a kick to the back.
    pub async fn kick_off_user(&self, user_id: String) -> Result<(), GatewayError> {
        self.stream
            .write(SpaceInMessage::KickOff {
                space_name: self.name.clone(),
                user_id,
            })
            .await
    }

    /// Unicast to one watcher.
    pub fn notify_me(&self, client: &ClientSession, message: PusherToClientMessage) {
        client.send(message);
    }

    /// Forwards a client-originated public event to the back; the back
    /// echoes it to every watching gateway, including this one.
    pub async fn forward_public_event(
        &self,
        sender_user_id: SpaceUserId,
        event: serde_json::Value,
    ) -> Result<(), GatewayError> {
        self.stream
            .write(SpaceInMessage::PublicEvent {
                space_name: self.name.clone(),
                sender_user_id,
                space_event: event,
            })
            .await
    }

    /// Forwards a client-originated private event to the back.
    pub async fn forward_private_event(
        &self,
        sender_user_id: SpaceUserId,
        receiver_user_id: SpaceUserId,
        event: serde_json::Value,
    ) -> Result<(), GatewayError> {
        self.stream
            .write(SpaceInMessage::PrivateEvent {
                space_name: self.name.clone(),
                sender_user_id,
                receiver_user_id,
                space_event: event,
            })
            .await
    }

    /// Marks the space closed and tells the back this gateway stopped
    /// watching. Best effort: the stream may already be gone.
    pub async fn dispose(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Err(err) = self
            .stream
            .write(SpaceInMessage::LeaveSpace {
                space_name: self.name.clone(),
            })
            .await
        {
            warn!("Leave announcement for {} failed: {}", self.name, err);
        }
        info!("✨ Space {} disposed", self.name);
    }
}
