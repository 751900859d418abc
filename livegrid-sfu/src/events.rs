//! Room event sink
//!
//! One single-method sink per room, wired at construction. Consumers that
//! need fan-out layer it themselves; the room never blocks on a listener.

use crate::types::{ParticipantId, RoomId, TrackId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomEvent {
    ParticipantJoined {
        room: RoomId,
        participant: ParticipantId,
    },
    ParticipantLeft {
        room: RoomId,
        participant: ParticipantId,
    },
    TrackPublished {
        room: RoomId,
        track: TrackId,
        owner: ParticipantId,
    },
    TrackUnpublished {
        room: RoomId,
        track: TrackId,
        owner: ParticipantId,
    },
    Subscribed {
        room: RoomId,
        track: TrackId,
        subscriber: ParticipantId,
    },
    Unsubscribed {
        room: RoomId,
        track: TrackId,
        subscriber: ParticipantId,
    },
}

pub trait RoomEventSink: Send + Sync {
    fn handle(&self, event: RoomEvent);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullRoomEventSink;

impl RoomEventSink for NullRoomEventSink {
    fn handle(&self, _event: RoomEvent) {}
}
