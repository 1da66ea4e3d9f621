//! # Pusher Protocol
//!
//! Message tree and core data types shared between the gateway crates.
//! The wire format is a JSON rendition of the protobuf-shaped tagged-union
//! tree spoken by the back-end servers: every frame is an internally-tagged
//! object whose `$case` field selects the sub-message. The tag strings are
//! the contract; they must match the back's `$case` names exactly and are
//! therefore spelled out with `serde(rename)` on every variant.
//!
//! ## Key Types
//!
//! - [`ClientToPusherMessage`] / [`PusherToClientMessage`] - northbound frames
//! - [`RoomInMessage`] / [`RoomOutMessage`] - per-client room streams
//! - [`SpaceInMessage`] / [`SpaceOutMessage`] - shared per-back space streams
//! - [`ZoneEvent`] - the per-room zone feed consumed by the viewport fan-out
//! - [`SpaceUser`] - the canonical presence record, mutated via field masks
//! - [`SpaceFilter`] - named per-client predicates over space users

pub mod back;
pub mod client;
pub mod filter;
pub mod space_user;
pub mod types;

pub use back::{
    AdminMessage, AdminRoomMessage, BanUserMessage, RoomInMessage, RoomOutMessage,
    SetPlayerDetails, SpaceInMessage, SpaceOutMessage, UserMoves, ZoneEvent, ZoneGroup, ZoneUser,
};
pub use client::{
    AdminEnvelope, AnswerKind, BatchSubMessage, ClientToPusherMessage, PusherToClientMessage,
    QueryKind,
};
pub use filter::{FilterKind, SpaceFilter};
pub use space_user::{FieldMask, SpaceUser};
pub use types::{
    AvailabilityStatus, BackId, ClientId, Direction, EmoteEvent, Position, SpaceUserId, Viewport,
};

/// WebSocket close code used when the back-end connection is lost or errors.
pub const CLOSE_CODE_BACK_LOST: u16 = 1011;
