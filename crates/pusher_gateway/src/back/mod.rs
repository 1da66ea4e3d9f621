//! Southbound transport: the back-end RPC seam.
//!
//! The multiplexer never talks to a concrete transport; it sees
//! [`BackClient`], an async trait with the three stream-opening operations
//! and the unary admin RPCs. Production uses the WebSocket-backed
//! implementation in [`ws`]; the test-suite and local development use the
//! in-memory implementation in [`memory`].

pub mod directory;
pub mod memory;
pub mod room_stream;
pub mod space_stream;
pub mod ws;

pub use directory::BackendDirectory;
pub use space_stream::BackSpaceConnection;

use crate::error::GatewayError;
use async_trait::async_trait;
use pusher_protocol::{
    AdminMessage, AdminRoomMessage, BackId, BanUserMessage, RoomInMessage, RoomOutMessage,
    SpaceInMessage, SpaceOutMessage, ZoneEvent,
};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Capacity of the per-stream channel buffers. Writes apply backpressure
/// once a back-end falls this far behind.
pub const STREAM_BUFFER: usize = 64;

/// The two halves of a bidirectional back-end stream.
///
/// The reader yields `Err` exactly once, for a transport error; a clean end
/// closes the channel instead.
#[derive(Debug)]
pub struct BackStreamPair<In, Out> {
    pub writer: mpsc::Sender<In>,
    pub reader: mpsc::Receiver<Result<Out, GatewayError>>,
}

/// A client-scoped room stream.
pub type RoomStreamPair = BackStreamPair<RoomInMessage, RoomOutMessage>;

/// A back-scoped, shared space stream.
pub type SpaceStreamPair = BackStreamPair<SpaceInMessage, SpaceOutMessage>;

/// A room-scoped zone feed (inbound only).
#[derive(Debug)]
pub struct ZoneFeed {
    pub reader: mpsc::Receiver<Result<ZoneEvent, GatewayError>>,
}

/// RPC surface of one back-end instance.
#[async_trait]
pub trait BackClient: Send + Sync + std::fmt::Debug {
    /// Opens a fresh room stream. One per (client, room).
    async fn join_room(&self) -> Result<RoomStreamPair, GatewayError>;

    /// Opens the shared space stream. One per back-end, opened by the
    /// multiplexer on demand.
    async fn watch_space(&self) -> Result<SpaceStreamPair, GatewayError>;

    /// Opens the shared zone feed for one room.
    async fn watch_zones(&self, room_url: &str) -> Result<ZoneFeed, GatewayError>;

    /// Unary: deliver an admin message to one user.
    async fn send_admin_message(&self, message: AdminMessage) -> Result<(), GatewayError>;

    /// Unary: ban a user.
    async fn ban(&self, message: BanUserMessage) -> Result<(), GatewayError>;

    /// Unary: broadcast an admin message to every player of a room.
    async fn send_admin_message_to_room(
        &self,
        message: AdminRoomMessage,
    ) -> Result<(), GatewayError>;
}

/// Dials back-end instances by index.
#[async_trait]
pub trait BackConnector: Send + Sync + std::fmt::Debug {
    async fn connect(&self, back: BackId) -> Result<Arc<dyn BackClient>, GatewayError>;
}
