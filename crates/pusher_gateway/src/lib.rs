//! # Pusher Gateway - Session-Multiplexing Core
//!
//! A stateful fan-in/fan-out WebSocket gateway between front-end clients
//! (browsers running an interactive multiplayer world) and a pool of
//! authoritative back-end servers. Clients connect over WebSocket; the
//! gateway routes each of them to the back-end instance responsible for
//! their **room** (a game world) and for any **spaces** they join
//! (presence/chat channels that can span worlds), forwarding framed
//! messages bidirectionally and multiplexing many clients over a smaller
//! number of back-end streams.
//!
//! ## Architecture Overview
//!
//! ### Core Components
//!
//! * **Session Multiplexer** - owns the rooms/spaces/back-stream maps,
//!   handles every client event, enforces empty-collection cleanup
//! * **Pusher Rooms** - per-room client sets and the viewport/zone index
//!   driving user/group fan-out
//! * **Spaces** - per-space user mirrors, metadata, watchers, and
//!   per-client filters
//! * **Back Streams** - one room stream per client, one shared space
//!   stream per back-end (with a 60 s ping watchdog), one zone feed per room
//! * **Batch Emitter** - per-client coalescing of zone events into bounded
//!   batch envelopes
//!
//! ### Message Flow
//!
//! 1. A client socket delivers a tagged frame to the multiplexer
//! 2. The frame either mutates local state (viewport, filters) and writes
//!    to the client's room stream, or routes to the owning space (which
//!    writes to the shared space stream of its back-end)
//! 3. Inbound room frames are re-emitted to the owning client nearly
//!    verbatim; inbound space frames are demultiplexed per space, applied
//!    to the local mirrors, and fanned out to admitted watchers
//!
//! ## Concurrency Model
//!
//! The three multiplexer maps are sharded concurrent maps whose room and
//! stream entries hold *shared futures*: the pending creation is inserted
//! synchronously, so concurrent joiners converge on a single creation.
//! Client sessions carry a sticky `disconnecting` flag checked before
//! every outbound write.

pub use config::GatewayConfig;
pub use error::GatewayError;
pub use multiplexer::SessionMultiplexer;

pub mod admin;
pub mod back;
pub mod batch;
pub mod client;
pub mod config;
pub mod embed;
pub mod error;
pub mod front;
pub mod multiplexer;
pub mod room;
pub mod space;
