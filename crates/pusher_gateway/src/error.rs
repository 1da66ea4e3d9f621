//! Error types for the gateway.
//!
//! Every failure mode of the core is a variant here so callers can decide
//! between degrading, answering the client with an error frame, or closing
//! the socket. Fatal conditions never unwind through the runtime.

use pusher_protocol::BackId;

/// Enumeration of gateway errors.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Network-level failures: dial errors, handshake failures, bind errors
    #[error("network error: {0}")]
    Network(String),

    /// A back-end instance could not be reached or its stream could not open
    #[error("back-end {0} unreachable: {1}")]
    BackUnreachable(BackId, String),

    /// A write to a back stream that has already ended
    #[error("back stream closed")]
    BackStreamClosed,

    /// A client operation that requires a room stream arrived before the
    /// room join completed (or after teardown)
    #[error("client has no back connection for room '{0}'")]
    MissingBackConnection(String),

    /// A space-scoped client operation named a space the client is not in
    #[error("unknown space '{space}'; client is watching: {known:?}")]
    UnknownSpace {
        space: String,
        known: Vec<String>,
    },

    /// A space operation that needs the back-assigned user id ran before
    /// the room join assigned one
    #[error("user id not assigned yet")]
    UserIdNotAssigned,

    /// The operation requires the "admin" tag
    #[error("operation requires the admin tag")]
    NotAdmin,

    /// Space metadata received from the back was not a JSON object
    #[error("invalid space metadata: {0}")]
    InvalidMetadata(String),

    /// An admin-service HTTP call failed
    #[error("admin service error: {0}")]
    AdminService(String),

    /// Everything else
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Message suitable for an `errorMessage` frame to the client.
    pub fn client_message(&self) -> String {
        self.to_string()
    }
}
