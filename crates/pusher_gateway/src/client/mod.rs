//! Client-session state and outbound delivery.
//!
//! This module owns the per-socket state the core reads and mutates: the
//! identity established at upgrade time, the routing state (room, viewport,
//! spaces, filters), and the outbound channel drained by the socket writer
//! task.

pub mod session;

pub use session::{ClientSession, ClientState, SocketData};

use pusher_protocol::PusherToClientMessage;

/// A frame queued for the socket writer task.
#[derive(Debug)]
pub enum ClientFrame {
    /// A protocol message to serialize and send
    Message(PusherToClientMessage),
    /// Close the WebSocket with the given code and reason
    Close { code: u16, reason: String },
}
