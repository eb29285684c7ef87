//! Connection pumps
//!
//! One read pump and one write pump per connection, plus the `accept`
//! entry point that wires a freshly handshaken transport into the hub.
//! Each pump is its own task; they talk to the rest of the system only
//! through the connection's outbound queue and the hub's command channel.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::connection::Connection;
use crate::error::AppError;
use crate::event::Event;
use crate::hub::HubHandle;
use crate::transport::{Transport, TransportRx, TransportTx};

/// Capacity of each connection's outbound event queue
///
/// Bounds memory per connection and is how slow consumers are detected:
/// a global broadcast that finds this queue full evicts the connection.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Serve one transport for its whole lifetime
///
/// Supply this as the transport layer's connection callback. Registers
/// the connection (waiting until its default handlers are installed),
/// runs the pump pair, and unregisters on the way out no matter which
/// pump died first.
pub async fn accept<T: Transport>(hub: HubHandle, transport: T) -> Result<(), AppError> {
    let (rx, tx) = transport.split();
    let (queue_tx, queue_rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
    let conn = Connection::new(hub.clone(), queue_tx);
    let id = conn.id();

    info!("Connection {} accepted", id);
    hub.register(Arc::clone(&conn)).await?;

    let write_task = tokio::spawn(write_pump(tx, queue_rx));
    let read_task = tokio::spawn(read_pump(rx, Arc::clone(&conn)));

    // Whichever pump exits first takes the connection down; the other
    // follows once the queue or transport closes under it
    tokio::select! {
        _ = read_task => {
            debug!("Read pump completed for {}", id);
        }
        _ = write_task => {
            debug!("Write pump completed for {}", id);
        }
    }

    let _ = hub.unregister(&conn).await;
    info!("Connection {} closed", id);

    Ok(())
}

/// Turn inbound transport messages into dispatched events
///
/// Exits on transport error, clean close, or a malformed frame. A single
/// bad frame terminates the connection; there is no resynchronization.
async fn read_pump<R: TransportRx>(mut rx: R, conn: Arc<Connection>) {
    loop {
        match rx.receive().await {
            Ok(Some(text)) => match serde_json::from_str::<Event>(&text) {
                Ok(event) => conn.dispatch(event).await,
                Err(e) => {
                    warn!("Invalid event from {}: {}", conn.id(), e);
                    break;
                }
            },
            Ok(None) => {
                debug!("Peer closed connection {}", conn.id());
                break;
            }
            Err(e) => {
                debug!("Transport error on {}: {}", conn.id(), e);
                break;
            }
        }
    }
    debug!("Read pump ended for {}", conn.id());
}

/// Drain the outbound queue and transmit each event in order
///
/// Runs until the queue is closed; closing it is the shutdown signal.
/// An encode failure is fatal and non-retryable (the same data would
/// fail again); so is a transmit failure. The transport is closed on
/// every exit path.
async fn write_pump<T: TransportTx>(mut tx: T, mut queue: mpsc::Receiver<Event>) {
    while let Some(event) = queue.recv().await {
        let text = match serde_json::to_string(&event) {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to encode event '{}': {}", event.name, e);
                break;
            }
        };

        if let Err(e) = tx.send(text).await {
            debug!("Transport send failed: {}", e);
            break;
        }
    }

    debug!("Write pump ended");
    let _ = tx.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::Hub;
    use async_trait::async_trait;
    use serde_json::json;

    /// Channel-backed transport: the test side plays the remote peer
    struct MockTransport {
        rx: MockRx,
        tx: MockTx,
    }

    struct MockRx {
        incoming: mpsc::UnboundedReceiver<String>,
    }

    struct MockTx {
        outgoing: Option<mpsc::UnboundedSender<String>>,
    }

    impl Transport for MockTransport {
        type Rx = MockRx;
        type Tx = MockTx;

        fn split(self) -> (Self::Rx, Self::Tx) {
            (self.rx, self.tx)
        }
    }

    #[async_trait]
    impl TransportRx for MockRx {
        async fn receive(&mut self) -> Result<Option<String>, AppError> {
            Ok(self.incoming.recv().await)
        }
    }

    #[async_trait]
    impl TransportTx for MockTx {
        async fn send(&mut self, text: String) -> Result<(), AppError> {
            let sender = self
                .outgoing
                .as_ref()
                .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::BrokenPipe))?;
            sender
                .send(text)
                .map_err(|_| std::io::Error::from(std::io::ErrorKind::BrokenPipe))?;
            Ok(())
        }

        async fn close(&mut self) -> Result<(), AppError> {
            self.outgoing.take();
            Ok(())
        }
    }

    /// Returns the transport plus the peer's ends: a sender for inbound
    /// frames and a receiver for whatever the write pump transmits
    fn mock_transport() -> (
        MockTransport,
        mpsc::UnboundedSender<String>,
        mpsc::UnboundedReceiver<String>,
    ) {
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let transport = MockTransport {
            rx: MockRx { incoming: in_rx },
            tx: MockTx {
                outgoing: Some(out_tx),
            },
        };
        (transport, in_tx, out_rx)
    }

    #[tokio::test]
    async fn test_ping_round_trip() {
        let (hub, handle) = Hub::new();
        let hub = hub.on_connect(|conn| {
            conn.on("ping", |conn, data| async move {
                let _ = conn.emit("pong", data).await;
            });
        });
        tokio::spawn(hub.run());

        let (transport, peer_tx, mut peer_rx) = mock_transport();
        tokio::spawn(accept(handle, transport));

        peer_tx
            .send(r#"{"eventName":"ping","data":{"seq":1}}"#.to_string())
            .unwrap();

        let reply: Event = serde_json::from_str(&peer_rx.recv().await.unwrap()).unwrap();
        assert_eq!(reply, Event::new("pong", json!({"seq": 1})));
    }

    #[tokio::test]
    async fn test_malformed_frame_terminates_only_that_connection() {
        let (hub, handle) = Hub::new();
        tokio::spawn(hub.run());

        // A healthy bystander registered directly with the hub
        let (bystander_tx, mut bystander_rx) = mpsc::channel(8);
        let bystander = Connection::new(handle.clone(), bystander_tx);
        handle.register(Arc::clone(&bystander)).await.unwrap();

        let (transport, peer_tx, _peer_rx) = mock_transport();
        let serving = tokio::spawn(accept(handle.clone(), transport));

        peer_tx.send("{not json".to_string()).unwrap();

        // The bad frame takes the whole connection down
        serving.await.unwrap().unwrap();

        let live = handle.connections().await.unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].id(), bystander.id());

        // The bystander still sends and receives
        handle.broadcast("still_here", json!(true)).await.unwrap();
        assert_eq!(bystander_rx.recv().await.unwrap().name, "still_here");
        bystander.emit("out", json!(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_write_pump_transmits_in_order_then_closes() {
        let (hub, handle) = Hub::new();
        tokio::spawn(hub.run());

        let (transport, _peer_tx, mut peer_rx) = mock_transport();
        tokio::spawn(accept(handle.clone(), transport));

        // Fish the served connection out of the live set
        let conn = loop {
            let live = handle.connections().await.unwrap();
            if let Some(conn) = live.first() {
                break Arc::clone(conn);
            }
            tokio::task::yield_now().await;
        };

        conn.emit("a", json!(1)).await.unwrap();
        conn.emit("b", json!(2)).await.unwrap();
        conn.emit("c", json!(3)).await.unwrap();

        let names: Vec<String> = [
            peer_rx.recv().await.unwrap(),
            peer_rx.recv().await.unwrap(),
            peer_rx.recv().await.unwrap(),
        ]
        .iter()
        .map(|t| serde_json::from_str::<Event>(t).unwrap().name)
        .collect();
        assert_eq!(names, vec!["a", "b", "c"]);

        // Unregistration closes the queue; the write pump drains and
        // closes the transport
        handle.unregister(&conn).await.unwrap();
        assert!(peer_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_peer_close_unregisters_connection() {
        let (hub, handle) = Hub::new();
        tokio::spawn(hub.run());

        let (transport, peer_tx, _peer_rx) = mock_transport();
        let serving = tokio::spawn(accept(handle.clone(), transport));

        // Wait until registered, then hang up
        while handle.connections().await.unwrap().is_empty() {
            tokio::task::yield_now().await;
        }
        drop(peer_tx);

        serving.await.unwrap().unwrap();
        assert!(handle.connections().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_room_scenario_over_pumps() {
        let (hub, handle) = Hub::new();
        let hub = hub.on_connect(|conn| {
            conn.on("join_room", |conn, data| async move {
                if let Some(room) = data.get("room").and_then(|r| r.as_str()) {
                    let _ = conn.hub().join_room(room, &conn).await;
                }
            });
        });
        tokio::spawn(hub.run());

        let (ta, peer_a, mut out_a) = mock_transport();
        let (tb, peer_b, mut out_b) = mock_transport();
        let (tc, _peer_c, mut out_c) = mock_transport();
        tokio::spawn(accept(handle.clone(), ta));
        tokio::spawn(accept(handle.clone(), tb));
        tokio::spawn(accept(handle.clone(), tc));

        peer_a
            .send(r#"{"eventName":"join_room","data":{"room":"lobby"}}"#.to_string())
            .unwrap();
        peer_b
            .send(r#"{"eventName":"join_room","data":{"room":"lobby"}}"#.to_string())
            .unwrap();

        // Wait for both joins to land in the room table
        while handle.room_members("lobby").await.unwrap().len() < 2 {
            tokio::task::yield_now().await;
        }

        handle
            .emit_room("lobby", "announce", json!("welcome"))
            .await
            .unwrap();

        let ev_a: Event = serde_json::from_str(&out_a.recv().await.unwrap()).unwrap();
        let ev_b: Event = serde_json::from_str(&out_b.recv().await.unwrap()).unwrap();
        assert_eq!(ev_a.name, "announce");
        assert_eq!(ev_b.name, "announce");
        assert!(out_c.try_recv().is_err());
    }
}
