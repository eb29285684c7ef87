//! In-process event bus for WebSocket clients
//!
//! Accepts socket connections, decodes framed JSON events of the shape
//! `{"eventName": ..., "data": ...}`, and routes them globally, to a
//! named room, or back to individual callers.
//!
//! # Features
//! - Named event handlers registered per connection
//! - Directed emit, caller-relative broadcast, and global broadcast
//! - Named rooms for scoped delivery
//! - Slow-consumer eviction on global broadcast
//! - Pluggable transport (tokio-tungstenite implementation included)
//!
//! # Architecture
//! Uses the Actor pattern with `mpsc` channels:
//! - `Hub` is the central actor owning the connection set and room table
//! - Each connection runs a read pump and a write pump as their own tasks
//! - No locks on shared state - all mutation goes through message passing
//!
//! Two backpressure policies coexist on purpose: the hub's global
//! broadcast never waits on a connection (a full outbound queue gets the
//! connection evicted), while a directed emit waits for capacity. The
//! first keeps the whole set live behind one slow reader; the second
//! favors reliable delivery to one named recipient.
//!
//! # Example
//! ```ignore
//! use tokio::net::TcpListener;
//! use wsevents::{accept, Hub, WsTransport};
//!
//! #[tokio::main]
//! async fn main() {
//!     let (hub, handle) = Hub::new();
//!     let hub = hub.on_connect(|conn| {
//!         conn.on("echo", |conn, data| async move {
//!             let _ = conn.emit("echo", data).await;
//!         });
//!     });
//!     tokio::spawn(hub.run());
//!
//!     let listener = TcpListener::bind("127.0.0.1:8080").await.unwrap();
//!     while let Ok((stream, _)) = listener.accept().await {
//!         let handle = handle.clone();
//!         tokio::spawn(async move {
//!             let ws = tokio_tungstenite::accept_async(stream).await?;
//!             accept(handle, WsTransport::new(ws)).await
//!         });
//!     }
//! }
//! ```

pub mod connection;
pub mod error;
pub mod event;
pub mod hub;
pub mod pump;
pub mod room;
pub mod transport;
pub mod types;

// Re-export main types for convenience
pub use connection::{Connection, HandlerFuture};
pub use error::{AppError, EmitError, TryEmitError};
pub use event::Event;
pub use hub::{Hub, HubCommand, HubHandle};
pub use pump::{accept, OUTBOUND_QUEUE_CAPACITY};
pub use room::Room;
pub use transport::{Transport, TransportRx, TransportTx, WsTransport};
pub use types::ConnectionId;
