//! Per-client space filters.
//!
//! A filter is a named predicate a client installs on a space to subscribe
//! to a subset of its users. Filters are evaluated by the pusher on every
//! inbound user mutation; a watcher with no filters installed sees everyone.

use crate::space_user::SpaceUser;
use serde::{Deserialize, Serialize};

/// A named predicate over space users.
///
/// The name is unique within `(client, space)`; installing a filter with an
/// existing name replaces it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpaceFilter {
    pub name: String,
    #[serde(flatten)]
    pub kind: FilterKind,
}

/// The predicate itself, tagged the way the wire spells filter sub-messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "$case")]
pub enum FilterKind {
    /// Admits every user.
    #[serde(rename = "spaceFilterEverybody")]
    Everybody,
    /// Admits users whose display name contains the search string
    /// (case-insensitive).
    #[serde(rename = "spaceFilterContainName")]
    NameContains { search: String },
    /// Admits users carrying the given tag.
    #[serde(rename = "spaceFilterContainTag")]
    HasTag { tag: String },
    /// Admits users currently streaming (camera, screen share, or megaphone).
    #[serde(rename = "spaceFilterLiveStreaming")]
    LiveStreaming,
}

impl SpaceFilter {
    /// Evaluates the predicate against a user record.
    pub fn matches(&self, user: &SpaceUser) -> bool {
        match &self.kind {
            FilterKind::Everybody => true,
            FilterKind::NameContains { search } => {
                user.name.to_lowercase().contains(&search.to_lowercase())
            }
            FilterKind::HasTag { tag } => user.tags.iter().any(|t| t == tag),
            FilterKind::LiveStreaming => {
                user.camera_state || user.screen_sharing_state || user.megaphone_state
            }
        }
    }
}

/// Returns true if the filter list admits the user.
///
/// An empty list admits everyone; otherwise any matching filter admits.
pub fn admits(filters: &[SpaceFilter], user: &SpaceUser) -> bool {
    filters.is_empty() || filters.iter().any(|f| f.matches(user))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_with_tags(tags: &[&str]) -> SpaceUser {
        SpaceUser {
            name: "Guide Greta".to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn tag_filter_matches_membership() {
        let filter = SpaceFilter {
            name: "guides".to_string(),
            kind: FilterKind::HasTag {
                tag: "guide".to_string(),
            },
        };
        assert!(filter.matches(&user_with_tags(&["guide"])));
        assert!(!filter.matches(&user_with_tags(&["guest"])));
    }

    #[test]
    fn name_filter_is_case_insensitive() {
        let filter = SpaceFilter {
            name: "search".to_string(),
            kind: FilterKind::NameContains {
                search: "greta".to_string(),
            },
        };
        assert!(filter.matches(&user_with_tags(&[])));
    }

    #[test]
    fn empty_filter_list_admits_everyone() {
        assert!(admits(&[], &user_with_tags(&[])));
    }

    #[test]
    fn live_streaming_matches_any_media_state() {
        let filter = SpaceFilter {
            name: "live".to_string(),
            kind: FilterKind::LiveStreaming,
        };
        let mut user = user_with_tags(&[]);
        assert!(!filter.matches(&user));
        user.screen_sharing_state = true;
        assert!(filter.matches(&user));
    }

    #[test]
    fn filter_kind_round_trips_with_case_tag() {
        let filter = SpaceFilter {
            name: "live".to_string(),
            kind: FilterKind::LiveStreaming,
        };
        let json = serde_json::to_string(&filter).unwrap();
        assert!(json.contains("spaceFilterLiveStreaming"));
        let back: SpaceFilter = serde_json::from_str(&json).unwrap();
        assert_eq!(back, filter);
    }
}
