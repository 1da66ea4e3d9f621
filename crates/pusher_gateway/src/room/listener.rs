//! Zone event delivery to clients.

use crate::client::ClientSession;
use pusher_protocol::{
    BatchSubMessage, EmoteEvent, SetPlayerDetails, SpaceUserId, ZoneGroup, ZoneUser,
};

/// Capability the rooms call back on to deliver zone events to one client.
///
/// Every invocation targets a single client; the default implementation
/// routes through the client's batch emitter.
pub trait ZoneEventListener: Send + Sync + std::fmt::Debug {
    fn on_user_enters(&self, client: &ClientSession, user: &ZoneUser);
    fn on_user_moves(&self, client: &ClientSession, user: &ZoneUser);
    fn on_user_leaves(&self, client: &ClientSession, user_id: SpaceUserId);
    fn on_group_enters(&self, client: &ClientSession, group: &ZoneGroup);
    fn on_group_moves(&self, client: &ClientSession, group: &ZoneGroup);
    fn on_group_leaves(&self, client: &ClientSession, group_id: u32);
    fn on_emote(&self, client: &ClientSession, emote: &EmoteEvent);
    fn on_player_details_updated(
        &self,
        client: &ClientSession,
        user_id: SpaceUserId,
        details: &SetPlayerDetails,
    );
    fn on_error(&self, client: &ClientSession, message: &str);
}

/// The production listener: coalesces everything through the per-client
/// batch emitter. Group movement has no tag of its own and is encoded as a
/// `groupUpdateMessage`.
#[derive(Debug, Default)]
pub struct BatchZoneListener;

impl ZoneEventListener for BatchZoneListener {
    fn on_user_enters(&self, client: &ClientSession, user: &ZoneUser) {
        client.batch().push(BatchSubMessage::UserJoined(user.clone()));
    }

    fn on_user_moves(&self, client: &ClientSession, user: &ZoneUser) {
        client.batch().push(BatchSubMessage::UserMoved(user.clone()));
    }

    fn on_user_leaves(&self, client: &ClientSession, user_id: SpaceUserId) {
        client.batch().push(BatchSubMessage::UserLeft { user_id });
    }

    fn on_group_enters(&self, client: &ClientSession, group: &ZoneGroup) {
        client.batch().push(BatchSubMessage::GroupUpdate(group.clone()));
    }

    fn on_group_moves(&self, client: &ClientSession, group: &ZoneGroup) {
        client.batch().push(BatchSubMessage::GroupUpdate(group.clone()));
    }

    fn on_group_leaves(&self, client: &ClientSession, group_id: u32) {
        client.batch().push(BatchSubMessage::GroupDelete { group_id });
    }

    fn on_emote(&self, client: &ClientSession, emote: &EmoteEvent) {
        client.batch().push(BatchSubMessage::Emote(emote.clone()));
    }

    fn on_player_details_updated(
        &self,
        client: &ClientSession,
        user_id: SpaceUserId,
        details: &SetPlayerDetails,
    ) {
        client.batch().push(BatchSubMessage::PlayerDetailsUpdated {
            user_id,
            details: details.clone(),
        });
    }

    fn on_error(&self, client: &ClientSession, message: &str) {
        client.batch().push(BatchSubMessage::Error {
            message: message.to_string(),
        });
    }
}
