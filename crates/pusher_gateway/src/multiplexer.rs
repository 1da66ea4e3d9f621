//! The session multiplexer.
//!
//! One instance per process. Owns the three maps at the heart of the
//! gateway - rooms, spaces, and shared space streams - creates and destroys
//! their entries, handles every client event, and enforces the
//! empty-collection cleanup rules:
//!
//! * a room is destroyed when its last client leaves
//! * a space is destroyed when its last watcher leaves
//! * a shared space stream is disposed when no space references its
//!   back-end any more
//!
//! Rooms and space streams are stored as *shared futures*: the pending
//! creation is inserted synchronously under the map shard lock, so two
//! concurrent joins converge on a single creation instead of racing. A
//! failed creation removes the entry so the next joiner retries.

use crate::admin::{AdminService, PlayerReport};
use crate::back::room_stream::RoomStreamHandle;
use crate::back::{BackSpaceConnection, BackendDirectory};
use crate::client::{ClientSession, ClientState};
use crate::config::GatewayConfig;
use crate::embed::EmbeddableChecker;
use crate::error::GatewayError;
use crate::room::{BatchZoneListener, PusherRoom, ZoneEventListener};
use crate::space::Space;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use pusher_protocol::{
    AdminEnvelope, AdminRoomMessage, AnswerKind, BackId, BanUserMessage, ClientId, FieldMask,
    PusherToClientMessage, QueryKind, RoomInMessage, SetPlayerDetails, SpaceFilter,
    SpaceOutMessage, SpaceUser, UserMoves, Viewport,
};
use pusher_protocol::types::AvailabilityStatus;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

type SharedRoom = Shared<BoxFuture<'static, Result<Arc<PusherRoom>, Arc<GatewayError>>>>;
type SharedStream = Shared<BoxFuture<'static, Result<Arc<BackSpaceConnection>, Arc<GatewayError>>>>;

/// The top-level gateway object.
#[derive(Debug)]
pub struct SessionMultiplexer {
    directory: Arc<BackendDirectory>,
    admin: Arc<dyn AdminService>,
    embeddable: EmbeddableChecker,
    config: GatewayConfig,
    listener: Arc<dyn ZoneEventListener>,
    rooms: DashMap<String, SharedRoom>,
    spaces: DashMap<String, Arc<Space>>,
    space_streams: DashMap<BackId, SharedStream>,
    admin_watchers: DashMap<String, HashMap<ClientId, mpsc::UnboundedSender<AdminEnvelope>>>,
    /// Handed to spawned stream tasks; a dropped multiplexer tears its
    /// tasks down instead of leaking them.
    self_ref: Weak<SessionMultiplexer>,
}

impl SessionMultiplexer {
    pub fn new(
        directory: Arc<BackendDirectory>,
        admin: Arc<dyn AdminService>,
        embeddable: EmbeddableChecker,
        config: GatewayConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            directory,
            admin,
            embeddable,
            config,
            listener: Arc::new(BatchZoneListener),
            rooms: DashMap::new(),
            spaces: DashMap::new(),
            space_streams: DashMap::new(),
            admin_watchers: DashMap::new(),
            self_ref: self_ref.clone(),
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    // ==================================================================
    // Room lifecycle
    // ==================================================================

    /// Joins a client to its room: opens the per-client room stream, sends
    /// the join frame, and registers the client in the (possibly freshly
    /// created) room.
    pub async fn handle_join_room(&self, client: &Arc<ClientSession>) -> Result<(), GatewayError> {
        let (room_id, join_frame) = {
            let mut data = client.data_mut();
            data.state = ClientState::JoiningRoom;
            let frame = RoomInMessage::JoinRoom {
                room_id: data.room_id.clone(),
                user_uuid: data.user_uuid.clone(),
                name: data.name.clone(),
                tags: data.tags.clone(),
                character_texture_ids: data.character_texture_ids.clone(),
                viewport: data.viewport,
            };
            (data.room_id.clone(), frame)
        };

        let back = self.directory.room_client(&room_id).await?;
        let pair = back.join_room().await?;
        let room = self.get_or_create_room(&room_id).await?;

        let handle = RoomStreamHandle::spawn(pair, client.clone(), room.clone());
        handle.write(join_frame).await?;
        {
            let mut data = client.data_mut();
            data.room_stream = Some(handle);
            data.state = ClientState::InRoom;
        }

        if !room.join(client.clone()) {
            // The room emptied and closed between creation and join; one
            // retry gets a fresh instance.
            let room = self.get_or_create_room(&room_id).await?;
            room.join(client.clone());
        }

        self.notify_admin_watchers(
            &room_id,
            member_join_envelope(&room_id, client),
        );
        info!("👋 Client {} joined {}", client.id(), room_id);
        Ok(())
    }

    /// Stores the viewport and recomputes the client's zone visibility.
    pub async fn handle_viewport(
        &self,
        client: &Arc<ClientSession>,
        viewport: Viewport,
    ) -> Result<(), GatewayError> {
        let room_id = {
            let mut data = client.data_mut();
            data.viewport = viewport;
            data.room_id.clone()
        };
        if let Some(room) = self.resolved_room(&room_id) {
            room.set_viewport(client, viewport);
        }
        Ok(())
    }

    /// Forwards a movement and applies the embedded viewport.
    pub async fn handle_user_moves(
        &self,
        client: &Arc<ClientSession>,
        moves: UserMoves,
    ) -> Result<(), GatewayError> {
        let stream = self.room_stream(client)?;
        let viewport = moves.viewport;
        stream.write(RoomInMessage::UserMoves(moves)).await?;
        self.handle_viewport(client, viewport).await
    }

    /// Forwards player details to the back, then broadcasts a masked
    /// `updateUser` to every space the client is in - iff the diff against
    /// the canonical record is non-empty. Only `availabilityStatus`
    /// (changed and non-zero) and `chatID` (changed and non-empty) are
    /// diffable.
    pub async fn handle_set_player_details(
        &self,
        client: &Arc<ClientSession>,
        details: SetPlayerDetails,
    ) -> Result<(), GatewayError> {
        let stream = self.room_stream(client)?;
        stream
            .write(RoomInMessage::SetPlayerDetails(details.clone()))
            .await?;

        let (paths, chat_id_changed, updated_user, space_names, user_uuid) = {
            let mut data = client.data_mut();
            let mut paths = Vec::new();
            let mut chat_id_changed = false;
            if details.availability_status != AvailabilityStatus::Unchanged
                && details.availability_status != data.space_user.availability_status
            {
                data.space_user.availability_status = details.availability_status;
                paths.push("availabilityStatus".to_string());
            }
            if !details.chat_id.is_empty() && details.chat_id != data.space_user.chat_id {
                data.space_user.chat_id = details.chat_id.clone();
                data.chat_id = details.chat_id;
                paths.push("chatID".to_string());
                chat_id_changed = true;
            }
            (
                paths,
                chat_id_changed,
                data.space_user.clone(),
                data.spaces.clone(),
                data.user_uuid.clone(),
            )
        };

        if paths.is_empty() {
            return Ok(());
        }
        if chat_id_changed {
            // The admin service is the durable owner of chat ids; a failed
            // persist degrades to a warning, the session keeps the new id.
            if let Err(err) = self
                .admin
                .update_chat_id(&user_uuid, &updated_user.chat_id)
                .await
            {
                warn!("chatID persist for {} failed: {}", user_uuid, err);
            }
        }
        let mask = FieldMask::new(paths);
        for name in space_names {
            if let Some(space) = self.space(&name) {
                if let Err(err) = space.update_user(updated_user.clone(), mask.clone()).await {
                    warn!("updateUser to {} failed: {}", name, err);
                }
            }
        }
        Ok(())
    }

    /// Removes the client from its room and ends its room stream.
    pub async fn leave_room(&self, client: &Arc<ClientSession>) {
        let (room_id, stream) = {
            let mut data = client.data_mut();
            (data.room_id.clone(), data.room_stream.take())
        };
        if let Some(room) = self.resolved_room(&room_id) {
            room.leave(client.id());
        }
        self.delete_room_if_empty(&room_id);
        if let Some(stream) = stream {
            stream.end();
        }
        self.notify_admin_watchers(
            &room_id,
            AdminEnvelope::MemberLeave {
                uuid: client.data().user_uuid.clone(),
            },
        );
    }

    // ==================================================================
    // Space lifecycle
    // ==================================================================

    /// Joins a client to a space, creating the space (and the shared
    /// stream of its back-end) on first use.
    pub async fn handle_join_space(
        &self,
        client: &Arc<ClientSession>,
        space_name: String,
        local_name: String,
    ) -> Result<(), GatewayError> {
        let back_id = self.directory.index(&space_name);

        // Two attempts: the first can lose a race against a concurrent
        // delete-if-empty and find the space closed.
        let mut space = None;
        for _ in 0..2 {
            let stream = self.get_or_create_space_stream(back_id, &space_name).await?;
            let mut created = false;
            let candidate = self
                .spaces
                .entry(space_name.clone())
                .or_insert_with(|| {
                    created = true;
                    Arc::new(Space::new(
                        space_name.clone(),
                        local_name.clone(),
                        back_id,
                        stream.clone(),
                    ))
                })
                .clone();
            if created {
                candidate.announce().await?;
            }
            if candidate.add_watcher(client.clone()) {
                space = Some(candidate);
                break;
            }
            self.spaces.remove_if(&space_name, |_, s| Arc::ptr_eq(s, &candidate));
        }
        let space = space.ok_or_else(|| {
            GatewayError::Internal(format!("space {space_name} kept closing during join"))
        })?;

        {
            let mut data = client.data_mut();
            if !data.spaces.contains(&space_name) {
                data.spaces.push(space_name.clone());
            }
        }

        // Current metadata snapshot for the fresh watcher.
        space.notify_me(
            client,
            PusherToClientMessage::UpdateSpaceMetadata {
                space_name: local_name,
                metadata: space.metadata_snapshot(),
            },
        );

        // Publish presence once the room join has assigned an id; a client
        // may watch without publishing until then.
        if client.user_id().is_some() {
            let user = client.data().space_user.clone();
            space.add_user(user).await?;
        }
        Ok(())
    }

    /// Removes a client from one space.
    pub async fn handle_leave_space(
        &self,
        client: &Arc<ClientSession>,
        space_name: &str,
    ) -> Result<(), GatewayError> {
        let space = self.known_space(client, space_name)?;
        space.remove_watcher(client.id());
        if let Some(user_id) = client.user_id() {
            if let Err(err) = space.remove_user(user_id).await {
                debug!("removeUser on leave of {} failed: {}", space_name, err);
            }
        }
        {
            let mut data = client.data_mut();
            data.spaces.retain(|s| s != space_name);
            data.space_filters.remove(space_name);
        }
        self.delete_space_if_empty(space_name).await;
        Ok(())
    }

    /// Removes a client from every space it watches and resets its filter
    /// mirror.
    pub async fn leave_spaces(&self, client: &Arc<ClientSession>) {
        let names = {
            let mut data = client.data_mut();
            data.space_filters.clear();
            std::mem::take(&mut data.spaces)
        };
        for name in names {
            if let Some(space) = self.space(&name) {
                space.remove_watcher(client.id());
                if let Some(user_id) = client.user_id() {
                    if let Err(err) = space.remove_user(user_id).await {
                        debug!("removeUser on leave of {} failed: {}", name, err);
                    }
                }
                self.delete_space_if_empty(&name).await;
            }
        }
    }

    /// Full teardown for a closing socket.
    pub async fn disconnect(&self, client: &Arc<ClientSession>) {
        client.begin_disconnect();
        self.leave_room(client).await;
        self.leave_spaces(client).await;
        client.data_mut().state = ClientState::Closed;
        info!("👋 Client {} disconnected", client.id());
    }

    /// Local non-propagating merge plus forward to the back.
    pub async fn handle_update_space_metadata(
        &self,
        client: &Arc<ClientSession>,
        space_name: &str,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Result<(), GatewayError> {
        let space = self.known_space(client, space_name)?;
        space.local_update_metadata(metadata.clone(), false);
        space.forward_metadata(&metadata).await
    }

    /// Installs a filter; idempotent by name.
    pub fn handle_add_space_filter(
        &self,
        client: &Arc<ClientSession>,
        space_name: &str,
        filter: SpaceFilter,
    ) -> Result<(), GatewayError> {
        let space = self.known_space(client, space_name)?;
        {
            let mut data = client.data_mut();
            let mirror = data.space_filters.entry(space_name.to_string()).or_default();
            if let Some(slot) = mirror.iter_mut().find(|f| f.name == filter.name) {
                *slot = filter.clone();
            } else {
                mirror.push(filter.clone());
            }
        }
        space.handle_add_filter(client, filter);
        Ok(())
    }

    /// Updates a filter; the name must exist, otherwise the op is logged
    /// and dropped.
    pub fn handle_update_space_filter(
        &self,
        client: &Arc<ClientSession>,
        space_name: &str,
        filter: SpaceFilter,
    ) -> Result<(), GatewayError> {
        let space = self.known_space(client, space_name)?;
        let known = {
            let mut data = client.data_mut();
            match data.space_filters.get_mut(space_name) {
                Some(mirror) => match mirror.iter_mut().find(|f| f.name == filter.name) {
                    Some(slot) => {
                        *slot = filter.clone();
                        true
                    }
                    None => false,
                },
                None => false,
            }
        };
        if !known {
            warn!(
                "updateSpaceFilter for unknown filter '{}' on {}; dropped",
                filter.name, space_name
            );
            return Ok(());
        }
        space.handle_update_filter(client, filter);
        Ok(())
    }

    /// Removes a filter; idempotent.
    pub fn handle_remove_space_filter(
        &self,
        client: &Arc<ClientSession>,
        space_name: &str,
        filter_name: &str,
    ) -> Result<(), GatewayError> {
        let space = self.known_space(client, space_name)?;
        {
            let mut data = client.data_mut();
            if let Some(mirror) = data.space_filters.get_mut(space_name) {
                mirror.retain(|f| f.name != filter_name);
            }
        }
        space.handle_remove_filter(client, filter_name);
        Ok(())
    }

    /// Applies a masked update to the canonical record, then delegates to
    /// the space.
    pub async fn handle_update_space_user(
        &self,
        client: &Arc<ClientSession>,
        space_name: &str,
        update: SpaceUser,
        mask: FieldMask,
    ) -> Result<(), GatewayError> {
        let space = self.known_space(client, space_name)?;
        let merged = {
            let mut data = client.data_mut();
            data.space_user.merge_masked(&update, &mask);
            data.space_user.clone()
        };
        space.update_user(merged, mask).await
    }

    /// Stamps the sender and forwards a public event to the back.
    pub async fn handle_public_event(
        &self,
        client: &Arc<ClientSession>,
        space_name: &str,
        event: serde_json::Value,
    ) -> Result<(), GatewayError> {
        let space = self.known_space(client, space_name)?;
        let sender = client.user_id().ok_or(GatewayError::UserIdNotAssigned)?;
        space.forward_public_event(sender, event).await
    }

    /// Stamps the sender and forwards a private event to the back.
    pub async fn handle_private_event(
        &self,
        client: &Arc<ClientSession>,
        space_name: &str,
        receiver_user_id: u32,
        event: serde_json::Value,
    ) -> Result<(), GatewayError> {
        let space = self.known_space(client, space_name)?;
        let sender = client.user_id().ok_or(GatewayError::UserIdNotAssigned)?;
        space
            .forward_private_event(sender, receiver_user_id, event)
            .await
    }

    /// Forwards a kick. When the space is unknown locally the historical
    /// behavior (cross-front kick) is preserved behind a config flag: the
    /// kick still goes to the back owning the space, provided its shared
    /// stream is already up.
    pub async fn handle_kick_off_user(
        &self,
        client: &Arc<ClientSession>,
        space_name: &str,
        user_id: String,
    ) -> Result<(), GatewayError> {
        match self.known_space(client, space_name) {
            Ok(space) => space.kick_off_user(user_id).await,
            Err(_) if self.config.forward_unknown_space_kicks => {
                let back_id = self.directory.index(space_name);
                match self.resolved_space_stream(back_id) {
                    Some(stream) => {
                        stream
                            .write(pusher_protocol::SpaceInMessage::KickOff {
                                space_name: space_name.to_string(),
                                user_id,
                            })
                            .await
                    }
                    None => {
                        debug!("kick for unknown space {} with no stream; dropped", space_name);
                        Ok(())
                    }
                }
            }
            Err(err) => Err(err),
        }
    }

    // ==================================================================
    // Map editing and misc forwards
    // ==================================================================

    /// Map edits require the edit grant from the room join; without it the
    /// client gets an error frame and the op is dropped.
    pub async fn handle_edit_map(
        &self,
        client: &Arc<ClientSession>,
        id: String,
        command: serde_json::Value,
    ) -> Result<(), GatewayError> {
        if !client.data().can_edit {
            client.send_error("You are not allowed to edit this map");
            return Ok(());
        }
        let stream = self.room_stream(client)?;
        stream
            .write(RoomInMessage::EditMapCommand { id, command })
            .await
    }

    /// Opaque forward of an emote prompt.
    pub async fn handle_emote_prompt(
        &self,
        client: &Arc<ClientSession>,
        emote: String,
    ) -> Result<(), GatewayError> {
        let stream = self.room_stream(client)?;
        stream.write(RoomInMessage::EmotePrompt { emote }).await
    }

    /// Files a player report with the admin service.
    pub async fn handle_report_player(
        &self,
        client: &Arc<ClientSession>,
        reported_user_uuid: String,
        report_comment: String,
    ) -> Result<(), GatewayError> {
        let (reporter, room_url) = {
            let data = client.data();
            (data.user_uuid.clone(), data.room_id.clone())
        };
        self.admin
            .report_player(PlayerReport {
                reported_user_uuid,
                reporter_user_uuid: reporter,
                report_comment,
                room_url,
            })
            .await
    }

    // ==================================================================
    // Admin operations
    // ==================================================================

    /// Bans a user. Non-admin senders are rejected silently.
    pub async fn emit_ban(
        &self,
        sender: &Arc<ClientSession>,
        user_uuid: &str,
        user_name: &str,
        message: &str,
    ) -> Result<(), GatewayError> {
        if !sender.is_admin() {
            debug!("ban from non-admin {} ignored", sender.id());
            return Ok(());
        }
        let (room_id, by_uuid) = {
            let data = sender.data();
            (data.room_id.clone(), data.user_uuid.clone())
        };
        let back = self.directory.room_client(&room_id).await?;
        back.ban(BanUserMessage {
            uuid: user_uuid.to_string(),
            room_id: room_id.clone(),
            message: message.to_string(),
        })
        .await?;
        self.admin
            .ban_user_by_uuid(user_uuid, &room_id, user_name, message, &by_uuid)
            .await
    }

    /// Sends an admin message to one user.
    pub async fn emit_send_user_message(
        &self,
        sender: &Arc<ClientSession>,
        user_uuid: &str,
        message: &str,
    ) -> Result<(), GatewayError> {
        if !sender.is_admin() {
            return Err(GatewayError::NotAdmin);
        }
        let room_id = sender.data().room_id.clone();
        let back = self.directory.room_client(&room_id).await?;
        back.send_admin_message(pusher_protocol::AdminMessage {
            message: message.to_string(),
            recipient_uuid: user_uuid.to_string(),
            room_id,
            r#type: "message".to_string(),
        })
        .await
    }

    /// Broadcasts a global message to the sender's room, or - with
    /// `broadcast_to_world` - to every room of the same world, one unary
    /// call per room.
    pub async fn emit_play_global_message(
        &self,
        sender: &Arc<ClientSession>,
        content: &str,
        message_type: &str,
        broadcast_to_world: bool,
    ) -> Result<(), GatewayError> {
        if !sender.is_admin() {
            return Err(GatewayError::NotAdmin);
        }
        let room_id = sender.data().room_id.clone();
        let targets = if broadcast_to_world {
            self.admin.rooms_from_same_world(&room_id).await?
        } else {
            vec![room_id]
        };
        for room in targets {
            let back = self.directory.room_client(&room).await?;
            back.send_admin_message_to_room(AdminRoomMessage {
                message: content.to_string(),
                room_id: room.clone(),
                r#type: message_type.to_string(),
            })
            .await?;
        }
        Ok(())
    }

    /// Registers an administrative listener on a room and replays the
    /// current member list.
    pub fn handle_admin_room(
        &self,
        room_id: &str,
        listener_id: ClientId,
        sender: mpsc::UnboundedSender<AdminEnvelope>,
    ) {
        if let Some(room) = self.resolved_room(room_id) {
            for (uuid, name, ip_address) in room.member_list() {
                let _ = sender.send(AdminEnvelope::MemberJoin {
                    uuid,
                    name,
                    ip_address,
                    room_id: room_id.to_string(),
                });
            }
        }
        self.admin_watchers
            .entry(room_id.to_string())
            .or_default()
            .insert(listener_id, sender);
    }

    /// Drops an administrative listener.
    pub fn remove_admin_listener(&self, room_id: &str, listener_id: ClientId) {
        if let Some(mut watchers) = self.admin_watchers.get_mut(room_id) {
            watchers.remove(&listener_id);
        }
        self.admin_watchers.remove_if(room_id, |_, w| w.is_empty());
    }

    fn notify_admin_watchers(&self, room_id: &str, envelope: AdminEnvelope) {
        if let Some(watchers) = self.admin_watchers.get(room_id) {
            for sender in watchers.values() {
                let _ = sender.send(envelope.clone());
            }
        }
    }

    // ==================================================================
    // Queries
    // ==================================================================

    /// Executes a query and answers with the inbound query id.
    pub async fn handle_query(&self, client: &Arc<ClientSession>, id: u32, query: QueryKind) {
        let answer = match self.execute_query(client, query).await {
            Ok(answer) => answer,
            Err(err) => AnswerKind::Error {
                message: err.client_message(),
            },
        };
        client.send(PusherToClientMessage::Answer { id, answer });
    }

    async fn execute_query(
        &self,
        client: &Arc<ClientSession>,
        query: QueryKind,
    ) -> Result<AnswerKind, GatewayError> {
        let room_id = client.data().room_id.clone();
        match query {
            QueryKind::RoomTags => {
                // Degrade to an empty tag list when the admin service is
                // down; the client UI copes.
                let tags = self.admin.tags_list(&room_id).await.unwrap_or_else(|err| {
                    warn!("tags list failed: {}", err);
                    Vec::new()
                });
                Ok(AnswerKind::RoomTags { tags })
            }
            QueryKind::RoomsFromSameWorld => {
                let rooms = self.admin.rooms_from_same_world(&room_id).await?;
                Ok(AnswerKind::RoomsFromSameWorld { rooms })
            }
            QueryKind::SearchMember { search } => {
                let members = self.admin.search_members(&room_id, &search).await?;
                Ok(AnswerKind::SearchMember { members })
            }
            QueryKind::SearchTags { search } => {
                let tags = self.admin.search_tags(&room_id, &search).await?;
                Ok(AnswerKind::SearchTags { tags })
            }
            QueryKind::GetMember { uuid } => {
                let member = self.admin.get_member(&uuid).await?;
                Ok(AnswerKind::GetMember { member })
            }
            QueryKind::ChatMembers { search } => {
                let list = self.admin.world_chat_members(&room_id, &search).await?;
                Ok(AnswerKind::ChatMembers {
                    members: list.members,
                    total: list.total,
                })
            }
            QueryKind::EmbeddableWebsite { url } => {
                let verdict = self.embeddable.check(&url).await;
                Ok(AnswerKind::EmbeddableWebsite {
                    url,
                    embeddable: verdict.is_embeddable(),
                    state: verdict.is_reachable(),
                    message: verdict.message(),
                })
            }
            QueryKind::OauthRefreshToken { token } => {
                let refreshed = self.admin.refresh_oauth_token(&token).await?;
                Ok(AnswerKind::OauthRefreshToken {
                    token: refreshed.token,
                    message: refreshed.message,
                })
            }
        }
    }

    // ==================================================================
    // Inbound space-stream dispatch
    // ==================================================================

    /// Routes a demultiplexed space frame to its space's local mirror.
    /// Ping and kick-off frames never reach this point (the demux task
    /// answers them inline).
    pub fn dispatch_space_frame(&self, frame: SpaceOutMessage) {
        match frame {
            SpaceOutMessage::AddSpaceUser { space_name, user } => {
                if let Some(space) = self.space(&space_name) {
                    space.local_add_user(user);
                } else {
                    debug!("addSpaceUser for unknown space {}", space_name);
                }
            }
            SpaceOutMessage::UpdateSpaceUser {
                space_name,
                user,
                update_mask,
            } => {
                if let Some(space) = self.space(&space_name) {
                    space.local_update_user(user, update_mask);
                }
            }
            SpaceOutMessage::RemoveSpaceUser { space_name, user_id } => {
                if let Some(space) = self.space(&space_name) {
                    space.local_remove_user(user_id);
                }
            }
            SpaceOutMessage::UpdateSpaceMetadata {
                space_name,
                metadata,
            } => {
                let Some(space) = self.space(&space_name) else {
                    return;
                };
                match serde_json::from_str::<HashMap<String, serde_json::Value>>(&metadata) {
                    Ok(parsed) => space.local_update_metadata(parsed, true),
                    Err(err) => {
                        // Bad frame, healthy stream: report and carry on.
                        warn!("Invalid metadata for {} dropped: {}", space_name, err);
                    }
                }
            }
            SpaceOutMessage::PublicEvent {
                space_name,
                sender_user_id,
                space_event,
            } => {
                if let Some(space) = self.space(&space_name) {
                    space.send_public_event(sender_user_id, space_event);
                }
            }
            SpaceOutMessage::PrivateEvent {
                space_name,
                sender_user_id,
                receiver_user_id,
                space_event,
            } => {
                if let Some(space) = self.space(&space_name) {
                    space.send_private_event(sender_user_id, receiver_user_id, space_event);
                }
            }
            SpaceOutMessage::Ping | SpaceOutMessage::KickOff { .. } => {
                debug!("stream-level frame leaked into dispatch; dropped");
            }
        }
    }

    /// Drops the shared stream of a back-end and evicts every space living
    /// on it. Watcher sockets stay open - their next space op fails - but
    /// the client-side space lists are repaired so the bidirectional link
    /// invariant keeps holding.
    pub fn evict_back(&self, back_id: BackId) {
        if let Some((_, pending)) = self.space_streams.remove(&back_id) {
            if let Some(Ok(stream)) = pending.peek() {
                stream.end();
            }
        }
        let names: Vec<String> = self
            .spaces
            .iter()
            .filter(|entry| entry.value().back_id() == back_id)
            .map(|entry| entry.key().clone())
            .collect();
        for name in names {
            if let Some((_, space)) = self.spaces.remove(&name) {
                for watcher in space.watchers() {
                    let mut data = watcher.data_mut();
                    data.spaces.retain(|s| s != &name);
                    data.space_filters.remove(&name);
                }
                warn!("🧹 Space {} evicted after loss of {}", name, back_id);
            }
        }
    }

    // ==================================================================
    // Internals
    // ==================================================================

    async fn get_or_create_room(&self, room_url: &str) -> Result<Arc<PusherRoom>, GatewayError> {
        let pending = self
            .rooms
            .entry(room_url.to_string())
            .or_insert_with(|| {
                let directory = self.directory.clone();
                let listener = self.listener.clone();
                let url = room_url.to_string();
                async move {
                    PusherRoom::init(url, &directory, listener)
                        .await
                        .map_err(Arc::new)
                }
                .boxed()
                .shared()
            })
            .clone();

        match pending.await {
            Ok(room) => Ok(room),
            Err(err) => {
                self.rooms.remove(room_url);
                Err(GatewayError::Internal(format!(
                    "room {room_url} creation failed: {err}"
                )))
            }
        }
    }

    fn delete_room_if_empty(&self, room_url: &str) {
        let removed = self.rooms.remove_if(room_url, |_, pending| match pending.peek() {
            Some(Ok(room)) => room.is_empty(),
            Some(Err(_)) => true,
            None => false,
        });
        if let Some((_, pending)) = removed {
            if let Some(Ok(room)) = pending.peek() {
                room.close();
            }
        }
    }

    async fn get_or_create_space_stream(
        &self,
        back_id: BackId,
        space_name: &str,
    ) -> Result<Arc<BackSpaceConnection>, GatewayError> {
        let weak = self.self_ref.clone();
        let pending = self
            .space_streams
            .entry(back_id)
            .or_insert_with(|| {
                let directory = self.directory.clone();
                let name = space_name.to_string();
                async move {
                    let client = directory.space_client(&name).await.map_err(Arc::new)?;
                    let pair = client.watch_space().await.map_err(Arc::new)?;
                    Ok(BackSpaceConnection::spawn(back_id, pair, weak))
                }
                .boxed()
                .shared()
            })
            .clone();

        match pending.await {
            Ok(stream) => Ok(stream),
            Err(err) => {
                self.space_streams.remove(&back_id);
                Err(GatewayError::BackUnreachable(back_id, err.to_string()))
            }
        }
    }

    async fn delete_space_if_empty(&self, space_name: &str) {
        let removed = self.spaces.remove_if(space_name, |_, space| space.is_empty());
        if let Some((_, space)) = removed {
            space.dispose().await;
            let back_id = space.back_id();
            let still_referenced = self
                .spaces
                .iter()
                .any(|entry| entry.value().back_id() == back_id);
            if !still_referenced {
                if let Some((_, pending)) = self.space_streams.remove(&back_id) {
                    if let Some(Ok(stream)) = pending.peek() {
                        stream.end();
                    }
                    info!("🔌 Shared stream to {} disposed", back_id);
                }
            }
        }
    }

    fn room_stream(
        &self,
        client: &ClientSession,
    ) -> Result<Arc<RoomStreamHandle>, GatewayError> {
        let data = client.data();
        data.room_stream
            .clone()
            .ok_or_else(|| GatewayError::MissingBackConnection(data.room_id.clone()))
    }

    fn resolved_room(&self, room_url: &str) -> Option<Arc<PusherRoom>> {
        self.rooms
            .get(room_url)
            .and_then(|pending| match pending.peek() {
                Some(Ok(room)) => Some(room.clone()),
                _ => None,
            })
    }

    fn resolved_space_stream(&self, back_id: BackId) -> Option<Arc<BackSpaceConnection>> {
        self.space_streams
            .get(&back_id)
            .and_then(|pending| match pending.peek() {
                Some(Ok(stream)) => Some(stream.clone()),
                _ => None,
            })
    }

    /// The space by global name, if mirrored locally.
    pub fn space(&self, name: &str) -> Option<Arc<Space>> {
        self.spaces.get(name).map(|entry| entry.value().clone())
    }

    /// The space, but only if the client actually watches it; the error
    /// lists the spaces the client is known to be in.
    fn known_space(
        &self,
        client: &ClientSession,
        space_name: &str,
    ) -> Result<Arc<Space>, GatewayError> {
        let known = client.data().spaces.clone();
        if !known.iter().any(|s| s == space_name) {
            return Err(GatewayError::UnknownSpace {
                space: space_name.to_string(),
                known,
            });
        }
        self.space(space_name).ok_or(GatewayError::UnknownSpace {
            space: space_name.to_string(),
            known,
        })
    }

    // ==================================================================
    // Introspection (tests and gauges)
    // ==================================================================

    /// Number of live rooms (created or being created).
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// True when a room exists and has resolved.
    pub fn has_room(&self, room_url: &str) -> bool {
        self.resolved_room(room_url).is_some()
    }

    /// Number of live spaces.
    pub fn space_count(&self) -> usize {
        self.spaces.len()
    }

    /// Number of shared space streams.
    pub fn space_stream_count(&self) -> usize {
        self.space_streams.len()
    }

    /// True when the shared stream for a back-end exists.
    pub fn has_space_stream(&self, back_id: BackId) -> bool {
        self.space_streams.contains_key(&back_id)
    }

    /// Back-end index for a key, exposed for tests.
    pub fn back_index(&self, key: &str) -> BackId {
        self.directory.index(key)
    }
}

fn member_join_envelope(room_id: &str, client: &ClientSession) -> AdminEnvelope {
    let data = client.data();
    AdminEnvelope::MemberJoin {
        uuid: data.user_uuid.clone(),
        name: data.name.clone(),
        ip_address: data.ip_address.clone(),
        room_id: room_id.to_string(),
    }
}
