//! Connection struct definition
//!
//! Represents one connected client: its outbound queue handle, its private
//! registry of named event handlers, and a handle back to the hub. The
//! transport halves themselves are owned by the connection's two pumps,
//! not by this struct.
//!
//! Two deliberately different backpressure policies live here side by side:
//! a directed `emit` blocks until the outbound queue has room (reliability
//! to one named recipient), while the hub's global broadcast uses the
//! non-blocking `try_enqueue` and evicts a connection whose queue is full
//! (liveness of the whole connection set). Do not unify them.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, Weak};

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{AppError, EmitError, TryEmitError};
use crate::event::Event;
use crate::hub::HubHandle;
use crate::types::ConnectionId;

/// Boxed future returned by an event handler
pub type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// A registered event handler
///
/// Receives the connection it was registered on and the event payload.
/// The connection is passed as an argument rather than captured, so the
/// registry never holds a strong reference cycle back to its own
/// connection.
type Handler = Arc<dyn Fn(Arc<Connection>, Value) -> HandlerFuture + Send + Sync>;

/// One client's end of the bus
///
/// Created by [`accept`](crate::pump::accept) when a transport is handed
/// in, registered with the hub before any of its traffic is processed,
/// and shared via `Arc` between the hub's live set and the read pump.
pub struct Connection {
    /// Unique identifier for this connection
    id: ConnectionId,
    /// Handle to the hub's control loop
    hub: HubHandle,
    /// Weak self-reference handed to handlers on dispatch
    self_ref: Weak<Connection>,
    /// Outbound queue sender; `None` once the queue has been closed.
    /// Taking the sender out is the close signal: the write pump drains
    /// whatever is buffered and exits when all senders are gone.
    outbound: Mutex<Option<mpsc::Sender<Event>>>,
    /// Event name -> handlers, invoked in registration order
    handlers: Mutex<HashMap<String, Vec<Handler>>>,
}

impl Connection {
    /// Create a new connection around an outbound queue sender
    pub fn new(hub: HubHandle, outbound: mpsc::Sender<Event>) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            id: ConnectionId::new(),
            hub,
            self_ref: self_ref.clone(),
            outbound: Mutex::new(Some(outbound)),
            handlers: Mutex::new(HashMap::new()),
        })
    }

    /// This connection's identifier
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Handle to the hub this connection is registered with
    pub fn hub(&self) -> &HubHandle {
        &self.hub
    }

    /// Register a handler for a named event
    ///
    /// Appends to the ordered list for that name; re-registration never
    /// replaces an earlier handler. All handlers for a name run on
    /// dispatch, in the order they were registered.
    pub fn on<F, Fut>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(Arc<Connection>, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: Handler =
            Arc::new(move |conn, data| -> HandlerFuture { Box::pin(handler(conn, data)) });
        self.handlers
            .lock()
            .unwrap()
            .entry(name.into())
            .or_default()
            .push(handler);
    }

    /// Deliver a decoded event to this connection's registered handlers
    ///
    /// Handlers run sequentially on the caller's task (the read pump), so
    /// a slow handler stalls further reads from this connection only. An
    /// event with no registered handlers is dropped.
    pub async fn dispatch(&self, event: Event) {
        // Upgrading cannot fail while a caller holds the connection
        let Some(me) = self.self_ref.upgrade() else {
            return;
        };

        let matched = {
            let handlers = self.handlers.lock().unwrap();
            match handlers.get(&event.name) {
                Some(list) => list.clone(),
                None => {
                    debug!("No handler for event '{}' on {}", event.name, self.id);
                    return;
                }
            }
        };

        for handler in matched {
            handler(Arc::clone(&me), event.data.clone()).await;
        }
    }

    /// Emit an event to this one connection
    ///
    /// Blocking enqueue: waits for queue capacity rather than evicting.
    /// Fails only if the queue has been closed by unregistration or
    /// eviction.
    pub async fn emit(&self, name: impl Into<String>, data: Value) -> Result<(), EmitError> {
        self.emit_event(Event::new(name, data)).await
    }

    /// Enqueue an already-built envelope, waiting for capacity
    pub async fn emit_event(&self, event: Event) -> Result<(), EmitError> {
        let sender = {
            let guard = self.outbound.lock().unwrap();
            guard.clone().ok_or(EmitError::Closed)?
        };
        sender.send(event).await.map_err(|_| EmitError::Closed)
    }

    /// Enqueue without waiting
    ///
    /// The hub's global broadcast path. A `Full` result means this
    /// connection is not draining its queue and is about to be evicted.
    pub fn try_enqueue(&self, event: Event) -> Result<(), TryEmitError> {
        let sender = {
            let guard = self.outbound.lock().unwrap();
            guard.clone().ok_or(TryEmitError::Closed)?
        };
        sender.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TryEmitError::Full,
            mpsc::error::TrySendError::Closed(_) => TryEmitError::Closed,
        })
    }

    /// Emit an event to every other live connection
    ///
    /// Caller-relative fan-out: snapshots the hub's live set and runs the
    /// blocking single-target emit path for each peer except this one. A
    /// peer whose queue closed mid-iteration is skipped, not an error.
    pub async fn broadcast(&self, name: &str, data: Value) -> Result<(), AppError> {
        let peers = self.hub.connections().await?;
        for peer in peers {
            if peer.id() == self.id {
                continue;
            }
            if let Err(e) = peer.emit_event(Event::new(name, data.clone())).await {
                debug!("Skipping peer {} during broadcast: {}", peer.id(), e);
            }
        }
        Ok(())
    }

    /// Close the outbound queue
    ///
    /// Called by the hub on unregistration or eviction. The write pump
    /// drains any buffered events and then exits, closing the transport.
    /// Idempotent.
    pub(crate) fn close_queue(&self) {
        self.outbound.lock().unwrap().take();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").field("id", &self.id).finish()
    }
}
