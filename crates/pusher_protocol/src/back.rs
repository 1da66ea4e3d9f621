//! # Southbound Message Tree
//!
//! Frames exchanged with the back-end servers over the three stream classes:
//!
//! - **room streams** (one per client): [`RoomInMessage`] out,
//!   [`RoomOutMessage`] in, forwarded to the owning client nearly verbatim
//! - **space streams** (one shared per back-end): [`SpaceInMessage`] out,
//!   [`SpaceOutMessage`] in, demultiplexed per space by name
//! - **zone feeds** (one shared per room): [`ZoneEvent`] in only
//!
//! plus the payloads of the unary admin RPCs. Tag strings are the `$case`
//! names of the back's schema and must not be altered.

use crate::space_user::{FieldMask, SpaceUser};
use crate::types::{AvailabilityStatus, Direction, Position, SpaceUserId, Viewport};
use serde::{Deserialize, Serialize};

// ============================================================================
// Room streams (client-scoped)
// ============================================================================

/// A movement report: position, facing, and the viewport after the move.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserMoves {
    pub position: Position,
    pub direction: Direction,
    pub is_moving: bool,
    pub viewport: Viewport,
}

/// Player-detail fields a client may change mid-session. Zero values
/// (`Unchanged`, empty string) mean "leave as is".
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetPlayerDetails {
    pub availability_status: AvailabilityStatus,
    #[serde(rename = "chatID")]
    pub chat_id: String,
}

/// Frames written to a client's room stream (pusher → back).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "$case")]
pub enum RoomInMessage {
    #[serde(rename = "joinRoomMessage")]
    JoinRoom {
        #[serde(rename = "roomId")]
        room_id: String,
        #[serde(rename = "userUuid")]
        user_uuid: String,
        name: String,
        tags: Vec<String>,
        #[serde(rename = "characterTextureIds")]
        character_texture_ids: Vec<String>,
        viewport: Viewport,
    },
    #[serde(rename = "userMovesMessage")]
    UserMoves(UserMoves),
    #[serde(rename = "setPlayerDetailsMessage")]
    SetPlayerDetails(SetPlayerDetails),
    #[serde(rename = "editMapCommandMessage")]
    EditMapCommand { id: String, command: serde_json::Value },
    #[serde(rename = "emotePromptMessage")]
    EmotePrompt { emote: String },
}

/// Frames read from a client's room stream (back → pusher).
///
/// Every variant is re-emitted to the owning client unchanged; only
/// `roomJoinedMessage` and `refreshRoomMessage` are snooped on the way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "$case")]
pub enum RoomOutMessage {
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
    #[serde(rename = "errorMessage")]
    Error { message: String },
    #[serde(rename = "teleportMessage")]
    Teleport { map: String },
}

// ============================================================================
// Space streams (back-scoped, shared)
// ============================================================================

/// Frames written to a shared space stream (pusher → back).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "$case")]
pub enum SpaceInMessage {
    #[serde(rename = "joinSpaceMessage")]
    JoinSpace {
        #[serde(rename = "spaceName")]
        space_name: String,
    },
    #[serde(rename = "leaveSpaceMessage")]
    LeaveSpace {
        #[serde(rename = "spaceName")]
        space_name: String,
    },
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
        /// JSON object, serialized as a string on the wire
        metadata: String,
    },
    #[serde(rename = "pongMessage")]
    Pong,
    #[serde(rename = "kickOffMessage")]
    KickOff {
        #[serde(rename = "spaceName")]
        space_name: String,
        #[serde(rename = "userId")]
        user_id: String,
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
}

/// Frames read from a shared space stream (back → pusher), dispatched by tag
/// to the space named inside.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "$case")]
pub enum SpaceOutMessage {
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
        /// JSON object serialized as a string; invalid JSON drops the frame
        metadata: String,
    },
    #[serde(rename = "pingMessage")]
    Ping,
    #[serde(rename = "kickOffMessage")]
    KickOff {
        #[serde(rename = "spaceName")]
        space_name: String,
        #[serde(rename = "userId")]
        user_id: String,
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
}

// ============================================================================
// Zone feed (room-scoped, shared)
// ============================================================================

/// A user as seen by the zone subsystem: the presence record plus a position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneUser {
    pub user_id: SpaceUserId,
    pub user_uuid: String,
    pub name: String,
    pub position: Position,
    pub availability_status: AvailabilityStatus,
    pub character_texture_ids: Vec<String>,
    pub visit_card_url: Option<String>,
}

/// A walking group as seen by the zone subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneGroup {
    pub group_id: u32,
    pub position: Position,
    pub group_size: u32,
    pub locked: bool,
}

/// Events on the per-room zone feed.
///
/// The feed is room-global; the pusher decides per client which events are
/// relevant by intersecting positions with viewports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "$case")]
pub enum ZoneEvent {
    #[serde(rename = "userJoinedZoneMessage")]
    UserJoined(ZoneUser),
    #[serde(rename = "userMovedMessage")]
    UserMoved(ZoneUser),
    #[serde(rename = "userLeftZoneMessage")]
    UserLeft {
        #[serde(rename = "userId")]
        user_id: SpaceUserId,
    },
    #[serde(rename = "groupUpdateZoneMessage")]
    GroupUpdate(ZoneGroup),
    #[serde(rename = "groupLeftZoneMessage")]
    GroupDelete {
        #[serde(rename = "groupId")]
        group_id: u32,
    },
    #[serde(rename = "emoteEventMessage")]
    Emote(crate::types::EmoteEvent),
    #[serde(rename = "playerDetailsUpdatedMessage")]
    PlayerDetailsUpdated {
        #[serde(rename = "userId")]
        user_id: SpaceUserId,
        details: SetPlayerDetails,
    },
    #[serde(rename = "errorMessage")]
    Error { message: String },
}

// ============================================================================
// Unary admin RPCs
// ============================================================================

/// Payload of the `sendAdminMessage` unary RPC (message to one user).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminMessage {
    pub message: String,
    pub recipient_uuid: String,
    pub room_id: String,
    pub r#type: String,
}

/// Payload of the `ban` unary RPC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BanUserMessage {
    pub uuid: String,
    pub room_id: String,
    pub message: String,
}

/// Payload of the `sendAdminMessageToRoom` unary RPC (broadcast to a room).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminRoomMessage {
    pub message: String,
    pub room_id: String,
    pub r#type: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn space_frames_carry_exact_case_tags() {
        let frame = SpaceOutMessage::Ping;
        let json = serde_json::to_string(&frame).unwrap();
        assert_eq!(json, r#"{"$case":"pingMessage"}"#);

        let pong = SpaceInMessage::Pong;
        assert_eq!(
            serde_json::to_string(&pong).unwrap(),
            r#"{"$case":"pongMessage"}"#
        );
    }

    #[test]
    fn unknown_tag_is_a_decode_error() {
        let result: Result<SpaceOutMessage, _> =
            serde_json::from_str(r#"{"$case":"definitelyNotAMessage"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn room_joined_snoop_fields_decode() {
        let json = r#"{"$case":"roomJoinedMessage","currentUserId":42,"canEdit":true,"tags":["admin"]}"#;
        let frame: RoomOutMessage = serde_json::from_str(json).unwrap();
        match frame {
            RoomOutMessage::RoomJoined {
                current_user_id,
                can_edit,
                ref tags,
            } => {
                assert_eq!(current_user_id, 42);
                assert!(can_edit);
                assert_eq!(tags, &["admin".to_string()]);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}
