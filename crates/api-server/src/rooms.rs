//! Room registry - maps room names to live subscriber handles
//!
//! Membership is ephemeral: join/leave/disconnect are the only
//! mutations and nothing survives a disconnect. A room entry exists
//! only while it has members; the last leave or eviction removes it,
//! so arbitrary join/leave churn cannot grow the registry. Delivery
//! to each subscriber is a bounded channel with a non-blocking send;
//! a slow subscriber loses events rather than stalling the publishing
//! path.

use crate::events::RoomEvent;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

pub type SubscriberId = u64;

/// Events buffered per subscriber before drops set in
const SUBSCRIBER_BUFFER: usize = 64;

struct Subscriber {
    sender: mpsc::Sender<RoomEvent>,
}

/// Registry of rooms and their current subscribers
pub struct RoomRegistry {
    rooms: DashMap<String, DashMap<SubscriberId, Subscriber>>,
    next_id: AtomicU64,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Join a room; returns the subscriber id and the event receiver
    pub fn join(&self, room: &str) -> (SubscriberId, mpsc::Receiver<RoomEvent>) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (sender, receiver) = mpsc::channel(SUBSCRIBER_BUFFER);

        self.rooms
            .entry(room.to_string())
            .or_default()
            .insert(id, Subscriber { sender });

        tracing::debug!(room, subscriber = id, "Subscriber joined room");
        (id, receiver)
    }

    /// Leave a room; returns false if the subscriber was not a member
    pub fn leave(&self, room: &str, id: SubscriberId) -> bool {
        let removed = match self.rooms.get(room) {
            Some(members) => members.remove(&id).is_some(),
            None => return false,
        };

        if removed {
            self.drop_room_if_empty(room);
            tracing::debug!(room, subscriber = id, "Subscriber left room");
        }
        removed
    }

    /// Remove the room entry once its last member is gone. The
    /// emptiness check runs under the shard lock, so a concurrent join
    /// keeps the entry alive.
    fn drop_room_if_empty(&self, room: &str) {
        self.rooms.remove_if(room, |_, members| members.is_empty());
    }

    /// Deliver an event to every subscriber in the room.
    ///
    /// Non-blocking per subscriber: a full buffer drops this event for
    /// that subscriber, a closed channel evicts them. Returns the
    /// number of successful deliveries.
    pub fn publish(&self, room: &str, event: &RoomEvent) -> usize {
        let Some(members) = self.rooms.get(room) else {
            return 0;
        };

        let mut delivered = 0;
        let mut dead: Vec<SubscriberId> = Vec::new();

        for entry in members.iter() {
            match entry.value().sender.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(
                        room,
                        subscriber = *entry.key(),
                        "Subscriber buffer full, dropping event"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    dead.push(*entry.key());
                }
            }
        }

        let evicted = !dead.is_empty();
        for id in dead {
            members.remove(&id);
        }
        let emptied = members.is_empty();
        drop(members);

        if evicted && emptied {
            self.drop_room_if_empty(room);
        }

        delivered
    }

    pub fn subscriber_count(&self, room: &str) -> usize {
        self.rooms.get(room).map(|m| m.len()).unwrap_or(0)
    }

    /// Rooms currently holding at least one subscriber
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}
