//! Front WebSocket server: the client-facing surface.
//!
//! Accepts client sockets, decodes the tagged frames, and drives the
//! multiplexer. Administrative listeners connect on the `/admin` path and
//! speak the JSON `{type, data}` envelope protocol instead.

pub mod handler;
pub mod router;
pub mod server;

pub use server::FrontServer;
