//! Room manager
//!
//! Authenticates joins with signed tokens and owns the room table. A room
//! comes into existence on the first authenticated join whose grant covers
//! it, and is torn down when its last participant leaves.

use dashmap::DashMap;
use std::sync::Arc;
use tracing::info;

use crate::config::SfuConfig;
use crate::events::RoomEventSink;
use crate::participant::{Capabilities, Participant};
use crate::room::Room;
use crate::token::TokenVerifier;
use crate::types::{ParticipantId, RoomId};
use crate::{Error, Result};

pub struct RoomManager {
    rooms: DashMap<RoomId, Arc<Room>>,
    verifier: TokenVerifier,
    config: SfuConfig,
    sink: Arc<dyn RoomEventSink>,
}

impl RoomManager {
    pub fn new(verifier: TokenVerifier, config: SfuConfig, sink: Arc<dyn RoomEventSink>) -> Self {
        Self {
            rooms: DashMap::new(),
            verifier,
            config,
            sink,
        }
    }

    /// Join a room with a signed token, creating the room on first join.
    ///
    /// Returns the room and the joined participant's id. The participant's
    /// capabilities mirror the token's video grant.
    pub fn join(&self, room_id: impl Into<RoomId>, token: &str) -> Result<(Arc<Room>, ParticipantId)> {
        let room_id = room_id.into();
        let claims = self.verifier.verify(token)?;
        let grant = claims.grant();

        if !grant.room_join {
            return Err(Error::PermissionDenied(
                "token does not grant room_join".to_string(),
            ));
        }
        if !grant.room.is_empty() && grant.room != room_id.as_str() {
            return Err(Error::PermissionDenied(format!(
                "token is scoped to room '{}', not '{room_id}'",
                grant.room
            )));
        }

        let participant = Participant::new(
            claims.sub.clone(),
            claims.name.clone().unwrap_or_else(|| claims.sub.clone()),
            Capabilities::from(&grant),
        );
        let participant_id = participant.id.clone();

        let room = self
            .rooms
            .entry(room_id.clone())
            .or_insert_with(|| {
                info!(room = %room_id, "creating room on first join");
                Arc::new(Room::new(
                    room_id.clone(),
                    room_id.as_str(),
                    self.config.clone(),
                    Arc::clone(&self.sink),
                ))
            })
            .clone();

        room.add_participant(participant)?;
        Ok((room, participant_id))
    }

    /// Remove a participant; the room is dropped once empty.
    pub fn leave(&self, room_id: &RoomId, participant_id: &ParticipantId) {
        if let Some(room) = self.rooms.get(room_id).map(|r| Arc::clone(&r)) {
            room.participant_left(participant_id);
            if room.is_empty() {
                self.rooms
                    .remove_if(room_id, |_, room| room.is_empty());
                info!(room = %room_id, "room removed after last participant left");
            }
        }
    }

    #[must_use]
    pub fn room(&self, room_id: &RoomId) -> Option<Arc<Room>> {
        self.rooms.get(room_id).map(|r| Arc::clone(&r))
    }

    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    #[must_use]
    pub fn room_ids(&self) -> Vec<RoomId> {
        self.rooms.iter().map(|r| r.key().clone()).collect()
    }
}
