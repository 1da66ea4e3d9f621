//! # Core Type Definitions
//!
//! Fundamental types used throughout the pusher gateway: identifiers for
//! clients, space users, and back-end instances, plus the spatial primitives
//! (positions and viewport rectangles) the zone fan-out is computed over.
//!
//! ## Design Principles
//!
//! - **Type Safety**: wrapper types prevent ID confusion (a `ClientId` can
//!   never be passed where a `BackId` is expected)
//! - **Serialization**: every type that crosses a stream derives serde
//! - **Precision**: room coordinates are double precision, matching the
//!   world coordinate space of the back-end

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a connected front socket.
///
/// This is a wrapper around UUID that provides type safety and ensures a
/// socket identity cannot be confused with any other kind of ID. It is
/// assigned by the pusher at upgrade time and never leaves the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(pub Uuid);

impl ClientId {
    /// Creates a new random client ID using UUID v4.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a user within the space subsystem, assigned by the back
/// when the client completes its room join.
pub type SpaceUserId = u32;

/// Stable index of a back-end instance.
///
/// Derived from a room URL or space name by hashing modulo the configured
/// back-end count; stable for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackId(pub u32);

impl std::fmt::Display for BackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "back-{}", self.0)
    }
}

/// A 2D position in room coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    /// X coordinate (west-east axis)
    pub x: f64,
    /// Y coordinate (north-south axis, growing downward as on screen)
    pub y: f64,
}

impl Position {
    /// Creates a new position with the specified coordinates.
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Facing direction reported alongside user movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Default for Direction {
    fn default() -> Self {
        Direction::Down
    }
}

/// A rectangle in room coordinates describing what a client currently sees.
///
/// The viewport is reported by clients on every camera move and drives the
/// zone fan-out: only entities inside a client's viewport are delivered to
/// it. Coordinates follow the screen convention (`top` < `bottom`), but
/// [`Viewport::contains`] normalizes the edges so a malformed rectangle
/// still behaves sensibly.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Viewport {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

impl Viewport {
    /// Creates a viewport from its four edges.
    pub fn new(left: f64, top: f64, right: f64, bottom: f64) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Returns true if the position lies inside the rectangle (inclusive).
    pub fn contains(&self, position: &Position) -> bool {
        let (min_x, max_x) = ordered(self.left, self.right);
        let (min_y, max_y) = ordered(self.top, self.bottom);
        position.x >= min_x && position.x <= max_x && position.y >= min_y && position.y <= max_y
    }
}

fn ordered(a: f64, b: f64) -> (f64, f64) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Presence status of a user, carried in [`crate::SpaceUser`] records and
/// in player-detail updates.
///
/// `Unchanged` is the zero value of the original wire enum: a
/// `setPlayerDetails` carrying it means "no status change requested".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AvailabilityStatus {
    Unchanged,
    Online,
    Silent,
    Away,
    Jitsi,
    BbbMeeting,
    Denied,
    Busy,
    DoNotDisturb,
    BackInAMoment,
    Speaker,
}

impl Default for AvailabilityStatus {
    fn default() -> Self {
        AvailabilityStatus::Unchanged
    }
}

/// An emote played by a user, fanned out to every client that sees them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmoteEvent {
    /// The user playing the emote
    pub actor_user_id: SpaceUserId,
    /// Emote identifier (an emoji or sprite name, opaque to the pusher)
    pub emote: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewport_contains_is_inclusive() {
        let vp = Viewport::new(0.0, 0.0, 100.0, 50.0);
        assert!(vp.contains(&Position::new(0.0, 0.0)));
        assert!(vp.contains(&Position::new(100.0, 50.0)));
        assert!(vp.contains(&Position::new(50.0, 25.0)));
        assert!(!vp.contains(&Position::new(100.1, 25.0)));
        assert!(!vp.contains(&Position::new(50.0, 50.1)));
    }

    #[test]
    fn viewport_contains_normalizes_flipped_edges() {
        let flipped = Viewport::new(100.0, 50.0, 0.0, 0.0);
        assert!(flipped.contains(&Position::new(50.0, 25.0)));
    }
}
