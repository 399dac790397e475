//! In-process peer transport.
//!
//! Every client sharing a [`LoopbackHub`] sees the others' room traffic.
//! Delivery is synchronous, straight into the member's sink.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use hqsync_types::RoomName;
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::{PeerLink, PeerTransport, TransportError, TransportEvent, TransportSink};
use crate::events::ConnectionStatus;

struct Member {
    id: u64,
    sink: TransportSink,
}

#[derive(Default)]
struct Rooms {
    next_id: u64,
    rooms: HashMap<RoomName, Vec<Member>>,
}

impl Rooms {
    fn sinks(&self, room: &RoomName, except: Option<u64>) -> Vec<TransportSink> {
        self.rooms
            .get(room)
            .map(|members| {
                members
                    .iter()
                    .filter(|m| Some(m.id) != except)
                    .map(|m| m.sink.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn count(&self, room: &RoomName) -> usize {
        self.rooms.get(room).map(Vec::len).unwrap_or(0)
    }
}

/// Shared in-process rendezvous for rooms.
#[derive(Clone, Default)]
pub struct LoopbackHub {
    inner: Arc<Mutex<Rooms>>,
    unreachable: Arc<AtomicBool>,
}

impl LoopbackHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an unreachable signaling server: joins fail while set.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn members(&self, room: &RoomName) -> usize {
        self.inner.lock().count(room)
    }

    fn announce_presence(&self, room: &RoomName) {
        let (sinks, count) = {
            let rooms = self.inner.lock();
            (rooms.sinks(room, None), rooms.count(room))
        };
        for sink in sinks {
            sink(TransportEvent::Presence(count));
        }
    }
}

#[async_trait]
impl PeerTransport for LoopbackHub {
    async fn join(&self, room: &RoomName, sink: TransportSink) -> Result<Box<dyn PeerLink>, TransportError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(TransportError::Unreachable(format!("cannot join {room}")));
        }

        let id = {
            let mut rooms = self.inner.lock();
            let id = rooms.next_id;
            rooms.next_id += 1;
            rooms.rooms.entry(room.clone()).or_default().push(Member {
                id,
                sink: sink.clone(),
            });
            id
        };
        debug!("member {} joined room {}", id, room);

        sink(TransportEvent::Status(ConnectionStatus::online(room)));
        self.announce_presence(room);

        Ok(Box::new(LoopbackLink {
            hub: self.clone(),
            room: room.clone(),
            id,
        }))
    }
}

struct LoopbackLink {
    hub: LoopbackHub,
    room: RoomName,
    id: u64,
}

impl PeerLink for LoopbackLink {
    fn room(&self) -> &RoomName {
        &self.room
    }

    fn broadcast(&self, update: &[u8]) -> Result<(), TransportError> {
        let sinks = self.hub.inner.lock().sinks(&self.room, Some(self.id));
        trace!("member {} broadcasting {} bytes to {} in {}", self.id, update.len(), sinks.len(), self.room);
        for sink in sinks {
            sink(TransportEvent::Update(update.to_vec()));
        }
        Ok(())
    }

    fn peers(&self) -> usize {
        self.hub.inner.lock().count(&self.room)
    }

    fn leave(self: Box<Self>) {
        {
            let mut rooms = self.hub.inner.lock();
            if let Some(members) = rooms.rooms.get_mut(&self.room) {
                members.retain(|m| m.id != self.id);
                if members.is_empty() {
                    rooms.rooms.remove(&self.room);
                }
            }
        }
        debug!("member {} left room {}", self.id, self.room);
        self.hub.announce_presence(&self.room);
    }
}
