use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use tokio::sync::{Mutex, mpsc};
use tracing::{debug, warn};

use crate::message::{FrameError, RoomId, ServerEvent, encode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Encoded frames waiting to be written to one connection.
pub type Outbox = mpsc::Receiver<String>;

/// Room membership and fan-out for every live connection.
///
/// Each connection owns a bounded outbox. Delivery uses `try_send`, so a slow
/// reader loses frames instead of stalling the publisher or the rest of the
/// room.
pub struct RoomHub {
    state: Mutex<HubState>,
    next_id: AtomicU64,
    outbox_capacity: usize,
}

#[derive(Default)]
struct HubState {
    connections: HashMap<ConnectionId, Member>,
    rooms: HashMap<RoomId, HashSet<ConnectionId>>,
}

struct Member {
    outbox: mpsc::Sender<String>,
    rooms: HashSet<RoomId>,
}

impl RoomHub {
    pub fn new(outbox_capacity: usize) -> Self {
        Self {
            state: Mutex::new(HubState::default()),
            next_id: AtomicU64::new(1),
            outbox_capacity: outbox_capacity.max(1),
        }
    }

    pub async fn connect(&self) -> (ConnectionId, Outbox) {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (outbox, rx) = mpsc::channel(self.outbox_capacity);
        let mut state = self.state.lock().await;
        state.connections.insert(
            id,
            Member {
                outbox,
                rooms: HashSet::new(),
            },
        );
        (id, rx)
    }

    /// Forgets the connection and drops it from every room it had entered.
    pub async fn disconnect(&self, id: ConnectionId) -> Vec<RoomId> {
        let mut state = self.state.lock().await;
        let Some(member) = state.connections.remove(&id) else {
            return Vec::new();
        };

        let mut rooms: Vec<RoomId> = member.rooms.into_iter().collect();
        rooms.sort();
        for room in &rooms {
            state.remove_from_room(id, room);
        }
        rooms
    }

    /// Returns `true` if the connection was not already in the room.
    pub async fn join(&self, id: ConnectionId, room: &RoomId) -> bool {
        let mut state = self.state.lock().await;
        let Some(member) = state.connections.get_mut(&id) else {
            debug!(connection = %id, %room, "join from unknown connection ignored");
            return false;
        };
        if !member.rooms.insert(room.clone()) {
            return false;
        }
        state.rooms.entry(room.clone()).or_default().insert(id);
        true
    }

    /// Returns `true` if the connection was in the room.
    pub async fn leave(&self, id: ConnectionId, room: &RoomId) -> bool {
        let mut state = self.state.lock().await;
        let removed = state
            .connections
            .get_mut(&id)
            .is_some_and(|member| member.rooms.remove(room));
        if removed {
            state.remove_from_room(id, room);
        }
        removed
    }

    /// Delivers `event` to every current member of `room` and reports how many
    /// outboxes accepted it.
    pub async fn broadcast(&self, room: &RoomId, event: &ServerEvent) -> Result<usize, FrameError> {
        let frame = encode(event)?;
        let state = self.state.lock().await;
        let Some(members) = state.rooms.get(room) else {
            return Ok(0);
        };

        let delivered = members
            .iter()
            .filter(|id| state.deliver(**id, &frame))
            .count();
        Ok(delivered)
    }

    pub async fn send_to(&self, id: ConnectionId, event: &ServerEvent) -> Result<bool, FrameError> {
        let frame = encode(event)?;
        let state = self.state.lock().await;
        Ok(state.deliver(id, &frame))
    }

    pub async fn member_count(&self, room: &RoomId) -> usize {
        let state = self.state.lock().await;
        state.rooms.get(room).map_or(0, HashSet::len)
    }

    pub async fn room_count(&self) -> usize {
        self.state.lock().await.rooms.len()
    }

    pub async fn connection_count(&self) -> usize {
        self.state.lock().await.connections.len()
    }

    /// Drops every outbox so that all sessions observe a closed channel.
    pub async fn close_all(&self) -> usize {
        let mut state = self.state.lock().await;
        let closed = state.connections.len();
        state.connections.clear();
        state.rooms.clear();
        closed
    }
}

impl HubState {
    fn remove_from_room(&mut self, id: ConnectionId, room: &RoomId) {
        if let Some(members) = self.rooms.get_mut(room) {
            members.remove(&id);
            if members.is_empty() {
                self.rooms.remove(room);
            }
        }
    }

    fn deliver(&self, id: ConnectionId, frame: &str) -> bool {
        let Some(member) = self.connections.get(&id) else {
            return false;
        };
        match member.outbox.try_send(frame.to_string()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(connection = %id, "outbox full, dropping frame");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}
