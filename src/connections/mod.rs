//! Connection registry for live room connections
//!
//! Maps each identity token to the one live connection bound to it. The map
//! is guarded by a single mutex that is only held for structural changes
//! and for taking a snapshot; delivery to a snapshot happens outside the
//! lock. Each connection drains its own bounded queue, so a slow peer never
//! blocks delivery to anyone else: a full queue drops the event for that
//! peer, and a closed queue marks the connection dead so it is pruned after
//! the broadcast.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::token_prefix;
use crate::protocol::ServerEvent;

/// Close code: no identity token on the handshake
pub const CLOSE_MISSING_TOKEN: u16 = 4000;
/// Close code: identity token does not resolve to a membership
pub const CLOSE_INVALID_TOKEN: u16 = 4001;
/// Close code: a newer connection took over this identity
pub const CLOSE_SUPERSEDED: u16 = 4002;
/// Close code: too many consecutive processing failures
pub const CLOSE_TOO_MANY_FAILURES: u16 = 4003;
/// Close code: no inbound traffic within the idle window
pub const CLOSE_IDLE_TIMEOUT: u16 = 4004;

/// Items queued for a connection's writer
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Event(ServerEvent),
    /// Close the transport with this code and reason
    Close { code: u16, reason: String },
}

/// Why a delivery did not happen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// No connection registered for the identity
    Absent,
    /// Queue full; the event was dropped for this peer only
    Dropped,
    /// Connection is gone and has been unregistered
    Dead,
}

#[derive(Debug, Clone)]
struct ConnectionHandle {
    conn_id: Uuid,
    room_id: String,
    sender: mpsc::Sender<Outbound>,
}

/// A registered connection as seen by its owner
#[derive(Debug)]
pub struct Registration {
    pub conn_id: Uuid,
    pub receiver: mpsc::Receiver<Outbound>,
    /// True if this replaced an earlier connection for the same identity
    pub superseded: bool,
}

/// Live identity -> connection map
#[derive(Debug)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<String, ConnectionHandle>>,
    buffer: usize,
}

impl ConnectionRegistry {
    /// Create a registry whose per-connection queues hold `buffer` items
    pub fn new(buffer: usize) -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            buffer: buffer.max(1),
        }
    }

    /// Register a new connection for `identity` in `room_id`.
    ///
    /// Any connection already bound to the identity is told to close with
    /// [`CLOSE_SUPERSEDED`] and dropped from the map. Grace timers are not
    /// this type's concern; the caller cancels them before registering.
    pub fn connect(&self, identity: &str, room_id: &str) -> Registration {
        let (sender, receiver) = mpsc::channel(self.buffer);
        let conn_id = Uuid::new_v4();

        let previous = self.connections.lock().insert(
            identity.to_string(),
            ConnectionHandle {
                conn_id,
                room_id: room_id.to_string(),
                sender,
            },
        );

        let superseded = previous.is_some();
        if let Some(old) = previous {
            info!(
                identity = token_prefix(identity),
                "superseding existing connection"
            );
            // The old writer may be wedged on a full queue; dropping the
            // sender still ends its loop once it drains.
            let _ = old.sender.try_send(Outbound::Close {
                code: CLOSE_SUPERSEDED,
                reason: "Superseded by a newer connection".to_string(),
            });
        }

        info!(identity = token_prefix(identity), room_id, %conn_id, "connection registered");
        Registration {
            conn_id,
            receiver,
            superseded,
        }
    }

    /// Remove the identity's connection unconditionally
    pub fn disconnect(&self, identity: &str) {
        if self.connections.lock().remove(identity).is_some() {
            info!(identity = token_prefix(identity), "connection removed");
        }
    }

    /// Remove the identity's connection only if it is still `conn_id`.
    ///
    /// Returns false when a newer connection has taken over, in which case
    /// the caller must not treat this as the identity going away.
    pub fn release(&self, identity: &str, conn_id: Uuid) -> bool {
        let mut connections = self.connections.lock();
        match connections.get(identity) {
            Some(handle) if handle.conn_id == conn_id => {
                connections.remove(identity);
                debug!(identity = token_prefix(identity), %conn_id, "connection released");
                true
            }
            _ => false,
        }
    }

    /// True if `identity` currently has a registered connection
    pub fn is_connected(&self, identity: &str) -> bool {
        self.connections.lock().contains_key(identity)
    }

    /// Number of registered connections
    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver an event to one identity. Never fails the caller.
    pub fn send_personal(&self, identity: &str, event: ServerEvent) -> Delivery {
        let Some(handle) = self.connections.lock().get(identity).cloned() else {
            debug!(
                identity = token_prefix(identity),
                kind = event.kind(),
                "no connection for personal send"
            );
            return Delivery::Absent;
        };

        let delivery = deliver(identity, &handle, event);
        if delivery == Delivery::Dead {
            self.release(identity, handle.conn_id);
        }
        delivery
    }

    /// Deliver an event to every connection in `room_id` except `exclude`.
    ///
    /// Returns the number of connections the event was queued for.
    pub fn broadcast(&self, room_id: &str, event: ServerEvent, exclude: Option<&str>) -> usize {
        let snapshot: Vec<(String, ConnectionHandle)> = self
            .connections
            .lock()
            .iter()
            .filter(|(identity, handle)| {
                handle.room_id == room_id && Some(identity.as_str()) != exclude
            })
            .map(|(identity, handle)| (identity.clone(), handle.clone()))
            .collect();

        let mut sent = 0;
        let mut dead = Vec::new();
        for (identity, handle) in &snapshot {
            match deliver(identity, handle, event.clone()) {
                Delivery::Sent => sent += 1,
                Delivery::Dead => dead.push((identity.as_str(), handle.conn_id)),
                Delivery::Dropped | Delivery::Absent => {}
            }
        }

        if !dead.is_empty() {
            let mut connections = self.connections.lock();
            for (identity, conn_id) in dead {
                if connections.get(identity).is_some_and(|h| h.conn_id == conn_id) {
                    connections.remove(identity);
                    debug!(identity = token_prefix(identity), "pruned dead connection");
                }
            }
        }

        sent
    }

    /// Ask every connection to close (used at shutdown)
    pub fn close_all(&self, code: u16, reason: &str) {
        let drained: Vec<ConnectionHandle> =
            self.connections.lock().drain().map(|(_, h)| h).collect();
        for handle in drained {
            let _ = handle.sender.try_send(Outbound::Close {
                code,
                reason: reason.to_string(),
            });
        }
    }
}

fn deliver(identity: &str, handle: &ConnectionHandle, event: ServerEvent) -> Delivery {
    if handle.sender.is_closed() {
        return Delivery::Dead;
    }
    match handle.sender.try_send(Outbound::Event(event)) {
        Ok(()) => Delivery::Sent,
        Err(TrySendError::Full(Outbound::Event(event))) => {
            warn!(
                identity = token_prefix(identity),
                kind = event.kind(),
                "outbound queue full, dropping event"
            );
            Delivery::Dropped
        }
        Err(TrySendError::Full(_)) => Delivery::Dropped,
        Err(TrySendError::Closed(_)) => Delivery::Dead,
    }
}
