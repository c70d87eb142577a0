//! Error taxonomy: one enum per layer.
//!
//! Negotiation collisions are not errors: they are resolved silently by
//! the polite/impolite rule and never appear here. Only terminal failures
//! surface to callers.

/// Transport-level relay failures. Recoverable by reopening the session;
/// reconnect policy belongs to the `RelayTransport` implementation.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("relay connect failed: {0}")]
    ConnectFailed(String),
    #[error("relay rejected identity: {0}")]
    Rejected(String),
    #[error("relay channel is down")]
    Disconnected,
}

/// Failures inside the connection primitive while driving a single link.
/// These never cross a link boundary; the owning link is closed and the
/// caller (if any is waiting) sees a `MeshError`.
#[derive(Debug, thiserror::Error)]
pub enum NegotiationError {
    #[error("connection primitive error: {0}")]
    Connector(String),
    #[error("link is closed")]
    LinkClosed,
}

/// Errors surfaced by the `MeshManager` public API.
#[derive(Debug, thiserror::Error)]
pub enum MeshError {
    #[error("timed out negotiating with peer {0}")]
    Timeout(String),
    #[error("peer {0} is unreachable")]
    PeerUnreachable(String),
    #[error("operation cancelled: mesh is closing")]
    Cancelled,
    #[error("mesh channels are not open")]
    AlreadyClosed,
    #[error(transparent)]
    Relay(#[from] RelayError),
}
