//! Hub actor implementation
//!
//! The single authority over the live connection set and the room table.
//! Uses the Actor pattern with mpsc channels: all mutations of shared
//! state go through `Hub::run`'s command loop, one request at a time, so
//! no locking is needed anywhere in the hub.
//!
//! The loop never awaits a connection's outbound queue. Global broadcast
//! uses a non-blocking enqueue and treats a full queue as a dead peer:
//! the connection is evicted on the spot so one stalled reader can never
//! freeze delivery to the rest.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::connection::Connection;
use crate::error::AppError;
use crate::event::Event;
use crate::room::Room;
use crate::types::ConnectionId;

/// Buffer size of the hub's command channel
const COMMAND_BUFFER_SIZE: usize = 256;

/// Callback invoked inside the control loop for every new registration
type ConnectFn = Box<dyn Fn(&Arc<Connection>) + Send>;

/// Commands sent from pumps and application code to the hub actor
#[derive(Debug)]
pub enum HubCommand {
    /// New connection to add to the live set; acknowledged once the
    /// on-connect callback has run
    Register {
        conn: Arc<Connection>,
        ack: oneshot::Sender<()>,
    },
    /// Connection going away; removes it everywhere and closes its queue
    Unregister { conn: Arc<Connection> },
    /// Deliver an event to every live connection (non-blocking, evicting)
    Broadcast { event: Event },
    /// Add a connection to a named room, creating the room if absent
    JoinRoom {
        room: String,
        conn: Arc<Connection>,
    },
    /// Remove a connection from a named room
    LeaveRoom { room: String, id: ConnectionId },
    /// Snapshot of the live connection set
    Connections {
        reply: oneshot::Sender<Vec<Arc<Connection>>>,
    },
    /// Snapshot of a room's member list (empty if the room does not exist)
    RoomMembers {
        room: String,
        reply: oneshot::Sender<Vec<Arc<Connection>>>,
    },
    /// Names of the rooms currently in the table
    Rooms {
        reply: oneshot::Sender<Vec<String>>,
    },
}

/// The hub actor
///
/// Constructed once at process start; `run` is the control loop and must
/// be started before any connection is accepted.
pub struct Hub {
    /// All live connections: ConnectionId -> Connection
    connections: HashMap<ConnectionId, Arc<Connection>>,
    /// All rooms with at least one member: name -> Room
    rooms: HashMap<String, Room>,
    /// Optional callback run for every new registration
    connect_fn: Option<ConnectFn>,
    /// Command receiver channel
    receiver: mpsc::Receiver<HubCommand>,
}

impl Hub {
    /// Create a hub and the handle used to reach its control loop
    pub fn new() -> (Self, HubHandle) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER_SIZE);
        let hub = Self {
            connections: HashMap::new(),
            rooms: HashMap::new(),
            connect_fn: None,
            receiver: rx,
        };
        (hub, HubHandle { tx })
    }

    /// Install the on-connect callback
    ///
    /// One-time configuration; consuming `self` means it can only happen
    /// before `run` starts, so it can never race a registration. The
    /// callback typically installs a connection's default handlers.
    pub fn on_connect<F>(mut self, f: F) -> Self
    where
        F: Fn(&Arc<Connection>) + Send + 'static,
    {
        self.connect_fn = Some(Box::new(f));
        self
    }

    /// Run the hub control loop
    ///
    /// Continuously receives and processes commands until all handles are
    /// dropped. Must be invoked exactly once, before any connection is
    /// accepted.
    pub async fn run(mut self) {
        info!("Hub started");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!("Hub shutting down");
    }

    /// Process a single command
    fn handle_command(&mut self, cmd: HubCommand) {
        match cmd {
            HubCommand::Register { conn, ack } => {
                self.handle_register(conn, ack);
            }
            HubCommand::Unregister { conn } => {
                self.handle_unregister(&conn);
            }
            HubCommand::Broadcast { event } => {
                self.handle_broadcast(&event);
            }
            HubCommand::JoinRoom { room, conn } => {
                self.handle_join_room(room, conn);
            }
            HubCommand::LeaveRoom { room, id } => {
                self.handle_leave_room(&room, id);
            }
            HubCommand::Connections { reply } => {
                let _ = reply.send(self.connections.values().cloned().collect());
            }
            HubCommand::RoomMembers { room, reply } => {
                let members = self
                    .rooms
                    .get(&room)
                    .map(|r| r.members().to_vec())
                    .unwrap_or_default();
                let _ = reply.send(members);
            }
            HubCommand::Rooms { reply } => {
                let _ = reply.send(self.rooms.keys().cloned().collect());
            }
        }
    }

    /// Handle new connection registration
    ///
    /// The ack is sent only after the on-connect callback has run, so the
    /// caller knows default handlers are installed before it starts
    /// dispatching traffic.
    fn handle_register(&mut self, conn: Arc<Connection>, ack: oneshot::Sender<()>) {
        info!("Connection {} registered", conn.id());
        self.connections.insert(conn.id(), Arc::clone(&conn));

        if let Some(connect_fn) = &self.connect_fn {
            connect_fn(&conn);
        }

        let _ = ack.send(());
        debug!(
            "Total connections: {}, Total rooms: {}",
            self.connections.len(),
            self.rooms.len()
        );
    }

    /// Handle connection departure
    ///
    /// Removing an already-absent connection is a no-op, and the queue
    /// close is idempotent, so a double-unregister is harmless.
    fn handle_unregister(&mut self, conn: &Arc<Connection>) {
        let id = conn.id();
        if self.connections.remove(&id).is_some() {
            info!("Connection {} unregistered", id);
        }
        self.remove_from_rooms(id);
        conn.close_queue();
        debug!(
            "Total connections: {}, Total rooms: {}",
            self.connections.len(),
            self.rooms.len()
        );
    }

    /// Handle global broadcast
    ///
    /// Non-blocking enqueue onto every live connection. A connection whose
    /// queue is full (or already closed) is treated as unresponsive and
    /// evicted immediately; delivery to everyone else proceeds.
    fn handle_broadcast(&mut self, event: &Event) {
        debug!("Broadcast '{}' to {} connections", event.name, self.connections.len());

        let mut stalled = Vec::new();
        for (id, conn) in &self.connections {
            if conn.try_enqueue(event.clone()).is_err() {
                stalled.push(*id);
            }
        }

        for id in stalled {
            warn!("Evicting unresponsive connection {}", id);
            self.evict(id);
        }
    }

    /// Handle a room join
    ///
    /// Creates the room on first join. A join from a connection that is
    /// not in the live set is ignored; the room table must only ever
    /// reference live connections.
    fn handle_join_room(&mut self, room: String, conn: Arc<Connection>) {
        if !self.connections.contains_key(&conn.id()) {
            warn!("Ignoring room join from unregistered connection {}", conn.id());
            return;
        }

        let id = conn.id();
        let entry = self
            .rooms
            .entry(room.clone())
            .or_insert_with(|| Room::new(room.clone()));
        if entry.add(conn) {
            info!("Connection {} joined room {}", id, room);
        }
    }

    /// Handle a room leave
    fn handle_leave_room(&mut self, room: &str, id: ConnectionId) {
        let Some(entry) = self.rooms.get_mut(room) else {
            return;
        };

        if entry.remove(id) {
            self.rooms.remove(room);
            debug!("Room {} deleted (empty)", room);
        }
        info!("Connection {} left room {}", id, room);
    }

    /// Evict a connection from the live set, its rooms, and close its queue
    ///
    /// The dying write pump drains whatever is buffered and closes the
    /// transport; the hub never waits for that.
    fn evict(&mut self, id: ConnectionId) {
        if let Some(conn) = self.connections.remove(&id) {
            conn.close_queue();
        }
        self.remove_from_rooms(id);
    }

    /// Remove a connection from every room, pruning rooms left empty
    fn remove_from_rooms(&mut self, id: ConnectionId) {
        self.rooms.retain(|name, room| {
            if room.remove(id) {
                debug!("Room {} deleted (empty)", name);
                false
            } else {
                true
            }
        });
    }
}

/// Cloneable handle to the hub's control loop
///
/// All methods translate to commands on the hub's channel; the loop
/// processes them strictly one at a time.
#[derive(Debug, Clone)]
pub struct HubHandle {
    tx: mpsc::Sender<HubCommand>,
}

impl HubHandle {
    /// Register a connection with the hub
    ///
    /// Resolves only once the control loop has added the connection and
    /// run the on-connect callback. Callers must not dispatch any of the
    /// connection's traffic before this returns.
    pub async fn register(&self, conn: Arc<Connection>) -> Result<(), AppError> {
        let (ack, acked) = oneshot::channel();
        self.send(HubCommand::Register { conn, ack }).await?;
        acked.await.map_err(|_| AppError::HubClosed)
    }

    /// Unregister a connection
    pub async fn unregister(&self, conn: &Arc<Connection>) -> Result<(), AppError> {
        self.send(HubCommand::Unregister {
            conn: Arc::clone(conn),
        })
        .await
    }

    /// Broadcast an event to every live connection
    ///
    /// Delivery per connection is non-blocking; a connection with a full
    /// queue is evicted rather than waited on. Contrast with the blocking
    /// [`Connection::emit`] used for directed delivery.
    pub async fn broadcast(&self, name: &str, data: Value) -> Result<(), AppError> {
        self.send(HubCommand::Broadcast {
            event: Event::new(name, data),
        })
        .await
    }

    /// Add a connection to a named room, creating the room if absent
    pub async fn join_room(&self, room: &str, conn: &Arc<Connection>) -> Result<(), AppError> {
        self.send(HubCommand::JoinRoom {
            room: room.to_string(),
            conn: Arc::clone(conn),
        })
        .await
    }

    /// Remove a connection from a named room
    pub async fn leave_room(&self, room: &str, id: ConnectionId) -> Result<(), AppError> {
        self.send(HubCommand::LeaveRoom {
            room: room.to_string(),
            id,
        })
        .await
    }

    /// Snapshot of the live connection set
    pub async fn connections(&self) -> Result<Vec<Arc<Connection>>, AppError> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::Connections { reply }).await?;
        rx.await.map_err(|_| AppError::HubClosed)
    }

    /// Snapshot of a room's member list, in join order
    pub async fn room_members(&self, room: &str) -> Result<Vec<Arc<Connection>>, AppError> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::RoomMembers {
            room: room.to_string(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| AppError::HubClosed)
    }

    /// Names of the rooms currently in the table
    pub async fn rooms(&self) -> Result<Vec<String>, AppError> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::Rooms { reply }).await?;
        rx.await.map_err(|_| AppError::HubClosed)
    }

    /// Emit an event to every member of a room
    ///
    /// There is no atomic room broadcast: this snapshots the member list,
    /// then runs the blocking single-target emit for each member in join
    /// order. A member whose queue closed mid-iteration is skipped.
    pub async fn emit_room(&self, room: &str, name: &str, data: Value) -> Result<(), AppError> {
        let members = self.room_members(room).await?;
        for member in members {
            if let Err(e) = member.emit(name, data.clone()).await {
                debug!("Skipping room member {}: {}", member.id(), e);
            }
        }
        Ok(())
    }

    async fn send(&self, cmd: HubCommand) -> Result<(), AppError> {
        self.tx.send(cmd).await.map_err(|_| AppError::HubClosed)
    }
}
