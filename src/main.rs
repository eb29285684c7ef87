//! Event bus demo server - Entry Point
//!
//! Reference embedding: starts the hub actor, accepts TCP connections,
//! performs the WebSocket handshake, and hands each stream to the bus.
//! The on-connect callback installs `join_room` and `chat` handlers so
//! clients can group themselves and relay messages room-wide.

use std::env;

use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use wsevents::{accept, Hub, WsTransport};

/// Default server address
const DEFAULT_ADDR: &str = "127.0.0.1:8080";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=wsevents=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("wsevents=info")),
        )
        .init();

    // Get bind address from command line or use default
    let addr = env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_ADDR.to_string());

    // Create the hub and install default handlers for every connection
    let (hub, handle) = Hub::new();
    let hub = hub.on_connect(|conn| {
        conn.on("join_room", |conn, data| async move {
            let Some(room) = data.get("room").and_then(|r| r.as_str()).map(str::to_owned) else {
                warn!("join_room from {} without a room name", conn.id());
                return;
            };
            let _ = conn.hub().join_room(&room, &conn).await;
            let _ = conn.emit("room_joined", json!({ "room": room })).await;
        });
        conn.on("chat", |conn, data| async move {
            let Some(room) = data.get("room").and_then(|r| r.as_str()).map(str::to_owned) else {
                warn!("chat from {} without a room name", conn.id());
                return;
            };
            let _ = conn.hub().emit_room(&room, "chat", data).await;
        });
    });
    tokio::spawn(hub.run());

    info!("Hub actor started");

    // Start TCP listener
    let listener = TcpListener::bind(&addr).await?;
    info!("Event bus listening on {}", addr);

    // Connection accept loop
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                info!("New connection from {}", addr);
                let handle = handle.clone();

                // Handshake and serve each connection on its own task
                tokio::spawn(async move {
                    match tokio_tungstenite::accept_async(stream).await {
                        Ok(ws) => {
                            if let Err(e) = accept(handle, WsTransport::new(ws)).await {
                                error!("Connection error: {}", e);
                            }
                        }
                        Err(e) => {
                            error!("WebSocket handshake failed: {}", e);
                        }
                    }
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}
