//! # Northbound Message Tree
//!
//! Frames exchanged with front-end clients over their WebSocket, plus the
//! JSON text envelopes of the administrative listener protocol.

use crate::back::{RoomOutMessage, SetPlayerDetails, UserMoves, ZoneGroup, ZoneUser};
use crate::filter::SpaceFilter;
use crate::space_user::{FieldMask, SpaceUser};
use crate::types::{EmoteEvent, SpaceUserId, Viewport};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Frames sent by a client to the pusher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "$case")]
pub enum ClientToPusherMessage {
    #[serde(rename = "viewportMessage")]
    Viewport { viewport: Viewport },
    #[serde(rename = "userMovesMessage")]
    UserMoves(UserMoves),
    #[serde(rename = "setPlayerDetailsMessage")]
    SetPlayerDetails(SetPlayerDetails),
    #[serde(rename = "emotePromptMessage")]
    EmotePrompt { emote: String },
    #[serde(rename = "editMapCommandMessage")]
    EditMapCommand { id: String, command: serde_json::Value },
    #[serde(rename = "joinSpaceMessage")]
    JoinSpace {
        #[serde(rename = "spaceName")]
        space_name: String,
        #[serde(rename = "localName")]
        local_name: String,
    },
    #[serde(rename = "leaveSpaceMessage")]
    LeaveSpace {
        #[serde(rename = "spaceName")]
        space_name: String,
    },
    #[serde(rename = "updateSpaceMetadataMessage")]
    UpdateSpaceMetadata {
        #[serde(rename = "spaceName")]
        space_name: String,
        metadata: HashMap<String, serde_json::Value>,
    },
    #[serde(rename = "addSpaceFilterMessage")]
    AddSpaceFilter {
        #[serde(rename = "spaceName")]
        space_name: String,
        filter: SpaceFilter,
    },
    #[serde(rename = "updateSpaceFilterMessage")]
    UpdateSpaceFilter {
        #[serde(rename = "spaceName")]
        space_name: String,
        filter: SpaceFilter,
    },
    #[serde(rename = "removeSpaceFilterMessage")]
    RemoveSpaceFilter {
        #[serde(rename = "spaceName")]
        space_name: String,
        #[serde(rename = "filterName")]
        filter_name: String,
    },
    #[serde(rename = "updateSpaceUserMessage")]
    UpdateSpaceUser {
        #[serde(rename = "spaceName")]
        space_name: String,
        user: SpaceUser,
        #[serde(rename = "updateMask")]
        update_mask: FieldMask,
    },
    #[serde(rename = "publicEvent")]
    PublicEvent {
        #[serde(rename = "spaceName")]
        space_name: String,
        #[serde(rename = "spaceEvent")]
        space_event: serde_json::Value,
    },
    #[serde(rename = "privateEvent")]
    PrivateEvent {
        #[serde(rename = "spaceName")]
        space_name: String,
        #[serde(rename = "receiverUserId")]
        receiver_user_id: SpaceUserId,
        #[serde(rename = "spaceEvent")]
        space_event: serde_json::Value,
    },
    #[serde(rename = "kickOffUserMessage")]
    KickOffUser {
        #[serde(rename = "spaceName")]
        space_name: String,
        #[serde(rename = "userId")]
        user_id: String,
    },
    #[serde(rename = "queryMessage")]
    Query { id: u32, query: QueryKind },
    #[serde(rename = "reportPlayerMessage")]
    ReportPlayer {
        #[serde(rename = "reportedUserUuid")]
        reported_user_uuid: String,
        #[serde(rename = "reportComment")]
        report_comment: String,
    },
    #[serde(rename = "banUserByUuidMessage")]
    BanUserByUuid {
        #[serde(rename = "userUuid")]
        user_uuid: String,
        #[serde(rename = "userName")]
        user_name: String,
        message: String,
    },
    #[serde(rename = "sendUserMessage")]
    SendUserMessage {
        #[serde(rename = "userUuid")]
        user_uuid: String,
        message: String,
    },
    #[serde(rename = "playGlobalMessage")]
    PlayGlobal {
        content: String,
        r#type: String,
        #[serde(rename = "broadcastToWorld")]
        broadcast_to_world: bool,
    },
}

/// Queries a client can issue; answered with an [`AnswerKind`] keyed by the
/// inbound query id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "$case")]
pub enum QueryKind {
    #[serde(rename = "roomTagsQuery")]
    RoomTags,
    #[serde(rename = "roomsFromSameWorldQuery")]
    RoomsFromSameWorld,
    #[serde(rename = "searchMemberQuery")]
    SearchMember { search: String },
    #[serde(rename = "searchTagsQuery")]
    SearchTags { search: String },
    #[serde(rename = "getMemberQuery")]
    GetMember { uuid: String },
    #[serde(rename = "chatMembersQuery")]
    ChatMembers { search: String },
    #[serde(rename = "embeddableWebsiteQuery")]
    EmbeddableWebsite { url: String },
    #[serde(rename = "oauthRefreshTokenQuery")]
    OauthRefreshToken { token: String },
}

/// A member record returned by admin-service lookups.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub uuid: String,
    pub name: String,
    pub email: Option<String>,
    #[serde(rename = "chatID")]
    pub chat_id: Option<String>,
}

/// Answers to client queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "$case")]
pub enum AnswerKind {
    #[serde(rename = "roomTagsAnswer")]
    RoomTags { tags: Vec<String> },
    #[serde(rename = "roomsFromSameWorldAnswer")]
    RoomsFromSameWorld { rooms: Vec<String> },
    #[serde(rename = "searchMemberAnswer")]
    SearchMember { members: Vec<Member> },
    #[serde(rename = "searchTagsAnswer")]
    SearchTags { tags: Vec<String> },
    #[serde(rename = "getMemberAnswer")]
    GetMember { member: Member },
    #[serde(rename = "chatMembersAnswer")]
    ChatMembers {
        members: Vec<Member>,
        total: u32,
    },
    #[serde(rename = "embeddableWebsiteAnswer")]
    EmbeddableWebsite {
        url: String,
        embeddable: bool,
        state: bool,
        message: Option<String>,
    },
    #[serde(rename = "oauthRefreshTokenAnswer")]
    OauthRefreshToken { token: String, message: String },
    #[serde(rename = "error")]
    Error { message: String },
}

/// Sub-messages coalesced into a `batchMessage` envelope by the per-client
/// emitter. The protocol has no group-move tag: group movement is encoded
/// as `groupUpdateMessage`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "$case")]
pub enum BatchSubMessage {
    #[serde(rename = "userJoinedMessage")]
    UserJoined(ZoneUser),
    #[serde(rename = "userMovedMessage")]
    UserMoved(ZoneUser),
    #[serde(rename = "userLeftMessage")]
    UserLeft {
        #[serde(rename = "userId")]
        user_id: SpaceUserId,
    },
    #[serde(rename = "groupUpdateMessage")]
    GroupUpdate(ZoneGroup),
    #[serde(rename = "groupDeleteMessage")]
    GroupDelete {
        #[serde(rename = "groupId")]
        group_id: u32,
    },
    #[serde(rename = "emoteEventMessage")]
    Emote(EmoteEvent),
    #[serde(rename = "playerDetailsUpdatedMessage")]
    PlayerDetailsUpdated {
        #[serde(rename = "userId")]
        user_id: SpaceUserId,
        details: SetPlayerDetails,
    },
    #[serde(rename = "errorMessage")]
    Error { message: String },
}

/// Frames sent by the pusher to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "$case")]
pub enum PusherToClientMessage {
    #[serde(rename = "batchMessage")]
    Batch { payload: Vec<BatchSubMessage> },
    #[serde(rename = "roomJoinedMessage")]
    RoomJoined {
        #[serde(rename = "currentUserId")]
        current_user_id: SpaceUserId,
        #[serde(rename = "canEdit")]
        can_edit: bool,
        tags: Vec<String>,
    },
    #[serde(rename = "refreshRoomMessage")]
    RefreshRoom {
        #[serde(rename = "roomId")]
        room_id: String,
        #[serde(rename = "versionNumber")]
        version_number: u32,
    },
    #[serde(rename = "teleportMessage")]
    Teleport { map: String },
    #[serde(rename = "errorMessage")]
    Error { message: String },
    #[serde(rename = "answerMessage")]
    Answer { id: u32, answer: AnswerKind },
    #[serde(rename = "addSpaceUserMessage")]
    AddSpaceUser {
        #[serde(rename = "spaceName")]
        space_name: String,
        user: SpaceUser,
    },
    #[serde(rename = "updateSpaceUserMessage")]
    UpdateSpaceUser {
        #[serde(rename = "spaceName")]
        space_name: String,
        user: SpaceUser,
        #[serde(rename = "updateMask")]
        update_mask: FieldMask,
    },
    #[serde(rename = "removeSpaceUserMessage")]
    RemoveSpaceUser {
        #[serde(rename = "spaceName")]
        space_name: String,
        #[serde(rename = "userId")]
        user_id: SpaceUserId,
    },
    #[serde(rename = "updateSpaceMetadataMessage")]
    UpdateSpaceMetadata {
        #[serde(rename = "spaceName")]
        space_name: String,
        metadata: HashMap<String, serde_json::Value>,
    },
    #[serde(rename = "publicEvent")]
    PublicEvent {
        #[serde(rename = "spaceName")]
        space_name: String,
        #[serde(rename = "senderUserId")]
        sender_user_id: SpaceUserId,
        #[serde(rename = "spaceEvent")]
        space_event: serde_json::Value,
    },
    #[serde(rename = "privateEvent")]
    PrivateEvent {
        #[serde(rename = "spaceName")]
        space_name: String,
        #[serde(rename = "senderUserId")]
        sender_user_id: SpaceUserId,
        #[serde(rename = "receiverUserId")]
        receiver_user_id: SpaceUserId,
        #[serde(rename = "spaceEvent")]
        space_event: serde_json::Value,
    },
    #[serde(rename = "kickedOffMessage")]
    KickedOff {
        #[serde(rename = "spaceName")]
        space_name: String,
    },
}

impl From<RoomOutMessage> for PusherToClientMessage {
    /// Re-wraps a room-stream frame for verbatim delivery to the client.
    fn from(msg: RoomOutMessage) -> Self {
        match msg {
            RoomOutMessage::RoomJoined {
                current_user_id,
                can_edit,
                tags,
            } => PusherToClientMessage::RoomJoined {
                current_user_id,
                can_edit,
                tags,
            },
            RoomOutMessage::RefreshRoom {
                room_id,
                version_number,
            } => PusherToClientMessage::RefreshRoom {
                room_id,
                version_number,
            },
            RoomOutMessage::Error { message } => PusherToClientMessage::Error { message },
            RoomOutMessage::Teleport { map } => PusherToClientMessage::Teleport { map },
        }
    }
}

// ============================================================================
// Admin listener protocol
// ============================================================================

/// JSON text envelope of the administrative listener protocol.
///
/// Administrative clients speak `{type, data}` text frames rather than the
/// tagged binary tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum AdminEnvelope {
    MemberJoin {
        uuid: String,
        name: String,
        #[serde(rename = "ipAddress")]
        ip_address: String,
        #[serde(rename = "roomId")]
        room_id: String,
    },
    MemberLeave {
        uuid: String,
    },
    Error {
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_envelope_round_trips() {
        let frame = PusherToClientMessage::Batch {
            payload: vec![
                BatchSubMessage::UserLeft { user_id: 3 },
                BatchSubMessage::Error {
                    message: "boom".to_string(),
                },
            ],
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains(r#""$case":"batchMessage""#));
        assert!(json.contains(r#""$case":"userLeftMessage""#));
        let back: PusherToClientMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, frame);
    }

    #[test]
    fn admin_envelope_uses_type_data_shape() {
        let envelope = AdminEnvelope::MemberLeave {
            uuid: "u-1".to_string(),
        };
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["type"], "MemberLeave");
        assert_eq!(json["data"]["uuid"], "u-1");
    }

    #[test]
    fn room_out_frames_rewrap_unchanged() {
        let snooped = RoomOutMessage::RefreshRoom {
            room_id: "room/x".to_string(),
            version_number: 4,
        };
        match PusherToClientMessage::from(snooped) {
            PusherToClientMessage::RefreshRoom {
                room_id,
                version_number,
            } => {
                assert_eq!(room_id, "room/x");
                assert_eq!(version_number, 4);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}
