//! Error types for the event bus
//!
//! Defines connection-level errors and outbound-queue send errors.
//! Uses thiserror for ergonomic error definitions.

use thiserror::Error;

/// Connection-level errors
///
/// Every variant is terminal for the affected connection: the owning
/// pump exits and the transport is closed. Nothing is retried and no
/// error is reported back over the wire.
#[derive(Debug, Error)]
pub enum AppError {
    /// WebSocket protocol error (fatal)
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error (fatal)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The hub's control channel is closed (hub stopped)
    #[error("hub closed")]
    HubClosed,
}

/// Blocking emit errors
///
/// A directed emit waits for queue capacity, so the only failure is a
/// queue that has been closed by unregistration or eviction.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EmitError {
    /// The connection's outbound queue has been closed
    #[error("outbound queue closed")]
    Closed,
}

/// Non-blocking enqueue errors
///
/// Used only by the hub's global broadcast. `Full` is not surfaced as a
/// failure anywhere; it is the trigger for evicting the slow connection.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TryEmitError {
    /// The outbound queue is at capacity (slow consumer)
    #[error("outbound queue full")]
    Full,
    /// The outbound queue has been closed
    #[error("outbound queue closed")]
    Closed,
}
