//! # Space Users and Field Masks
//!
//! The [`SpaceUser`] record is the canonical presence entry mirrored by
//! every pusher watching a space. The back never re-sends whole records on
//! update: mutations arrive as a partial record plus a [`FieldMask`] naming
//! the fields to replace, and the mirror merges them in place.

use crate::types::{AvailabilityStatus, SpaceUserId};
use serde::{Deserialize, Serialize};

/// Presence record for one user inside a space.
///
/// Field names follow the wire spelling (`camelCase`, with the historical
/// `chatID` capitalization) because mask paths refer to them literally.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpaceUser {
    /// Back-assigned numeric identifier, unique within the back-end
    pub id: SpaceUserId,
    /// Stable account identifier
    pub uuid: String,
    /// Display name
    pub name: String,
    /// Room URL the user is playing in
    pub play_uri: String,
    /// Human-readable room name
    pub room_name: String,
    /// Presence status
    pub availability_status: AvailabilityStatus,
    /// Whether the user is authenticated (as opposed to anonymous)
    pub is_logged: bool,
    /// Moderation/permission tags
    pub tags: Vec<String>,
    /// Webcam on/off
    pub camera_state: bool,
    /// Microphone on/off
    pub microphone_state: bool,
    /// Screen share on/off
    pub screen_sharing_state: bool,
    /// Megaphone (broadcast-to-space) on/off
    pub megaphone_state: bool,
    /// Jitsi conference participant id, when in a conference
    pub jitsi_participant_id: Option<String>,
    /// Link to the user's visit card, if any
    pub visit_card_url: Option<String>,
    /// External chat identifier
    #[serde(rename = "chatID")]
    pub chat_id: String,
}

/// An ordered list of dotted field paths selecting which fields of a
/// [`SpaceUser`] an update replaces.
///
/// Only top-level paths exist in this record; merging replaces the named
/// fields from the update and leaves every other field intact.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FieldMask {
    pub paths: Vec<String>,
}

impl FieldMask {
    /// Builds a mask from path strings.
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns true if the mask names no fields.
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Returns true if the mask names the given field.
    pub fn contains(&self, path: &str) -> bool {
        self.paths.iter().any(|p| p == path)
    }
}

impl SpaceUser {
    /// Merges the fields named by `mask` from `update` into `self`.
    ///
    /// Paths that name no known field are ignored; the back may speak a
    /// newer schema than this pusher and the unknown fields simply do not
    /// exist in the mirror.
    pub fn merge_masked(&mut self, update: &SpaceUser, mask: &FieldMask) {
        for path in &mask.paths {
            // Only the first segment matters: the record has no nested
            // message fields addressable from the pusher.
            match path.split('.').next().unwrap_or(path.as_str()) {
                "name" => self.name = update.name.clone(),
                "playUri" => self.play_uri = update.play_uri.clone(),
                "roomName" => self.room_name = update.room_name.clone(),
                "availabilityStatus" => self.availability_status = update.availability_status,
                "isLogged" => self.is_logged = update.is_logged,
                "tags" => self.tags = update.tags.clone(),
                "cameraState" => self.camera_state = update.camera_state,
                "microphoneState" => self.microphone_state = update.microphone_state,
                "screenSharingState" => self.screen_sharing_state = update.screen_sharing_state,
                "megaphoneState" => self.megaphone_state = update.megaphone_state,
                "jitsiParticipantId" => {
                    self.jitsi_participant_id = update.jitsi_participant_id.clone()
                }
                "visitCardUrl" => self.visit_card_url = update.visit_card_url.clone(),
                "chatID" => self.chat_id = update.chat_id.clone(),
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_user() -> SpaceUser {
        SpaceUser {
            id: 7,
            uuid: "uuid-7".to_string(),
            name: "alice".to_string(),
            availability_status: AvailabilityStatus::Online,
            chat_id: "alice@chat".to_string(),
            tags: vec!["member".to_string()],
            camera_state: true,
            ..Default::default()
        }
    }

    #[test]
    fn masked_merge_replaces_only_named_fields() {
        let mut mirror = sample_user();
        let update = SpaceUser {
            name: "alicia".to_string(),
            availability_status: AvailabilityStatus::Busy,
            chat_id: "other@chat".to_string(),
            ..Default::default()
        };

        mirror.merge_masked(&update, &FieldMask::new(["name", "availabilityStatus"]));

        assert_eq!(mirror.name, "alicia");
        assert_eq!(mirror.availability_status, AvailabilityStatus::Busy);
        // Fields outside the mask keep their pre-update values.
        assert_eq!(mirror.chat_id, "alice@chat");
        assert!(mirror.camera_state);
        assert_eq!(mirror.tags, vec!["member".to_string()]);
    }

    #[test]
    fn masked_merge_ignores_unknown_paths() {
        let mut mirror = sample_user();
        let before = mirror.clone();
        mirror.merge_masked(&SpaceUser::default(), &FieldMask::new(["nonexistentField"]));
        assert_eq!(mirror, before);
    }

    #[test]
    fn chat_id_uses_wire_spelling() {
        let mut mirror = sample_user();
        let update = SpaceUser {
            chat_id: "new@chat".to_string(),
            ..Default::default()
        };
        mirror.merge_masked(&update, &FieldMask::new(["chatID"]));
        assert_eq!(mirror.chat_id, "new@chat");
    }
}
