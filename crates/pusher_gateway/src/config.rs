//! Gateway configuration types and defaults.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Configuration for the gateway core and its front server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// The socket address the front WebSocket server binds to
    pub bind_address: SocketAddr,

    /// Maximum number of concurrent client connections allowed
    pub max_connections: usize,

    /// Whether to use SO_REUSEPORT for multi-threaded accept loops
    pub use_reuse_port: bool,

    /// Zone-event batching: flush when this many sub-messages are queued
    pub batch_max_size: usize,

    /// Zone-event batching: flush at least this often (milliseconds)
    pub batch_flush_interval_ms: u64,

    /// Forward `kickOffUser` to the back even when the space is unknown
    /// locally (cross-front kicks; matches the historical behavior)
    pub forward_unknown_space_kicks: bool,
}

impl GatewayConfig {
    /// Batch flush interval as a [`Duration`].
    pub fn batch_flush_interval(&self) -> Duration {
        Duration::from_millis(self.batch_flush_interval_ms)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".parse().expect("valid default bind address"),
            max_connections: 10_000,
            use_reuse_port: false,
            batch_max_size: 32,
            batch_flush_interval_ms: 100,
            forward_unknown_space_kicks: true,
        }
    }
}
