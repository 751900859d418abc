//! SFU room: participants, tracks, subscriptions, forwarding
//!
//! All mutable state sits behind one write-biased room lock. Operations
//! are synchronous and never touch I/O; per-frame forwarding pushes into
//! bounded subscriber channels with `try_send`, so a slow subscriber loses
//! frames instead of stalling the publisher.

use indexmap::{IndexMap, IndexSet};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::SfuConfig;
use crate::events::{RoomEvent, RoomEventSink};
use crate::participant::Participant;
use crate::track::{Track, TrackFrame, TrackKind, TrackSource};
use crate::types::{ParticipantId, RoomId, TrackId};
use crate::{Error, Result};

#[derive(Default)]
struct RoomInner {
    /// Insertion-ordered so participant listings are stable.
    participants: IndexMap<ParticipantId, Participant>,
    tracks: HashMap<TrackId, Arc<Track>>,
    /// Publication order per participant.
    participant_tracks: HashMap<ParticipantId, IndexSet<TrackId>>,
    /// Subscribers per track, in subscription order.
    subscribers: HashMap<TrackId, IndexMap<ParticipantId, mpsc::Sender<TrackFrame>>>,
    /// Reverse index: which tracks a participant subscribes to.
    subscriptions: HashMap<ParticipantId, IndexSet<TrackId>>,
}

pub struct Room {
    pub id: RoomId,
    pub name: String,
    config: SfuConfig,
    inner: RwLock<RoomInner>,
    sink: Arc<dyn RoomEventSink>,
}

impl Room {
    pub fn new(
        id: impl Into<RoomId>,
        name: impl Into<String>,
        config: SfuConfig,
        sink: Arc<dyn RoomEventSink>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            config,
            inner: RwLock::new(RoomInner::default()),
            sink,
        }
    }

    pub fn add_participant(&self, participant: Participant) -> Result<()> {
        let participant_id = participant.id.clone();
        {
            let mut inner = self.inner.write();
            if inner.participants.contains_key(&participant_id) {
                return Err(Error::AlreadyExists(format!(
                    "participant '{participant_id}' is already in room '{}'",
                    self.id
                )));
            }
            inner.participants.insert(participant_id.clone(), participant);
        }
        info!(room = %self.id, participant = %participant_id, "participant joined");
        self.sink.handle(RoomEvent::ParticipantJoined {
            room: self.id.clone(),
            participant: participant_id,
        });
        Ok(())
    }

    /// Remove a participant and cascade: their published tracks go first,
    /// then their outgoing subscriptions, then the participant entry.
    /// Idempotent.
    pub fn participant_left(&self, participant_id: &ParticipantId) {
        let owned_tracks: Vec<TrackId> = {
            let inner = self.inner.read();
            if !inner.participants.contains_key(participant_id) {
                return;
            }
            inner
                .participant_tracks
                .get(participant_id)
                .map(|tracks| tracks.iter().cloned().collect())
                .unwrap_or_default()
        };

        for track_id in owned_tracks {
            let _ = self.unpublish_track(participant_id, &track_id);
        }

        let subscribed: Vec<TrackId> = {
            let inner = self.inner.read();
            inner
                .subscriptions
                .get(participant_id)
                .map(|tracks| tracks.iter().cloned().collect())
                .unwrap_or_default()
        };
        for track_id in subscribed {
            self.unsubscribe(participant_id, &track_id);
        }

        let removed = {
            let mut inner = self.inner.write();
            inner.participant_tracks.remove(participant_id);
            inner.subscriptions.remove(participant_id);
            inner.participants.shift_remove(participant_id).is_some()
        };

        if removed {
            info!(room = %self.id, participant = %participant_id, "participant left");
            self.sink.handle(RoomEvent::ParticipantLeft {
                room: self.id.clone(),
                participant: participant_id.clone(),
            });
        }
    }

    /// Publish a track. Requires the `can_publish` capability.
    pub fn publish_track(
        &self,
        participant_id: &ParticipantId,
        track_id: impl Into<TrackId>,
        kind: TrackKind,
        source: TrackSource,
    ) -> Result<TrackId> {
        let track_id = track_id.into();
        {
            let mut inner = self.inner.write();
            let participant = inner.participants.get(participant_id).ok_or_else(|| {
                Error::NotFound(format!("participant '{participant_id}' is not in the room"))
            })?;
            if !participant.capabilities.can_publish {
                return Err(Error::PermissionDenied(format!(
                    "participant '{participant_id}' may not publish"
                )));
            }
            if inner.tracks.contains_key(&track_id) {
                return Err(Error::AlreadyExists(format!(
                    "track '{track_id}' already exists"
                )));
            }

            let track = Arc::new(Track::new(
                track_id.clone(),
                participant_id.clone(),
                kind,
                source,
            ));
            inner.tracks.insert(track_id.clone(), track);
            inner
                .participant_tracks
                .entry(participant_id.clone())
                .or_default()
                .insert(track_id.clone());
            inner.subscribers.entry(track_id.clone()).or_default();
        }

        info!(room = %self.id, track = %track_id, owner = %participant_id, "track published");
        self.sink.handle(RoomEvent::TrackPublished {
            room: self.id.clone(),
            track: track_id.clone(),
            owner: participant_id.clone(),
        });
        Ok(track_id)
    }

    /// Remove a track and every subscription anchored on it.
    pub fn unpublish_track(
        &self,
        participant_id: &ParticipantId,
        track_id: &TrackId,
    ) -> Result<()> {
        {
            let mut inner = self.inner.write();
            let track = inner
                .tracks
                .get(track_id)
                .ok_or_else(|| Error::NotFound(format!("track '{track_id}' does not exist")))?;
            if &track.owner != participant_id {
                return Err(Error::PermissionDenied(format!(
                    "track '{track_id}' is not owned by '{participant_id}'"
                )));
            }

            // Dropping the senders closes every subscriber's receiver.
            if let Some(subscribers) = inner.subscribers.remove(track_id) {
                for subscriber_id in subscribers.keys() {
                    if let Some(subs) = inner.subscriptions.get_mut(subscriber_id) {
                        subs.shift_remove(track_id);
                    }
                }
            }
            inner.tracks.remove(track_id);
            if let Some(owned) = inner.participant_tracks.get_mut(participant_id) {
                owned.shift_remove(track_id);
            }
        }

        info!(room = %self.id, track = %track_id, "track unpublished");
        self.sink.handle(RoomEvent::TrackUnpublished {
            room: self.id.clone(),
            track: track_id.clone(),
            owner: participant_id.clone(),
        });
        Ok(())
    }

    /// Subscribe to a track. Requires the `can_subscribe` capability.
    /// Returns the receiving end of the subscriber's frame channel.
    pub fn subscribe(
        &self,
        subscriber_id: &ParticipantId,
        track_id: &TrackId,
    ) -> Result<mpsc::Receiver<TrackFrame>> {
        let receiver = {
            let mut inner = self.inner.write();
            let subscriber = inner.participants.get(subscriber_id).ok_or_else(|| {
                Error::NotFound(format!("participant '{subscriber_id}' is not in the room"))
            })?;
            if !subscriber.capabilities.can_subscribe {
                return Err(Error::PermissionDenied(format!(
                    "participant '{subscriber_id}' may not subscribe"
                )));
            }
            if !inner.tracks.contains_key(track_id) {
                return Err(Error::NotFound(format!("track '{track_id}' does not exist")));
            }

            let subscribers = inner.subscribers.entry(track_id.clone()).or_default();
            if subscribers.contains_key(subscriber_id) {
                return Err(Error::AlreadyExists(format!(
                    "'{subscriber_id}' already subscribes to '{track_id}'"
                )));
            }
            if subscribers.len() >= self.config.max_subscribers_per_stream {
                return Err(Error::CapacityExceeded(format!(
                    "track '{track_id}' is at its subscriber limit ({})",
                    self.config.max_subscribers_per_stream
                )));
            }

            let (tx, rx) = mpsc::channel(self.config.subscriber_channel_capacity);
            subscribers.insert(subscriber_id.clone(), tx);
            inner
                .subscriptions
                .entry(subscriber_id.clone())
                .or_default()
                .insert(track_id.clone());
            rx
        };

        debug!(room = %self.id, track = %track_id, subscriber = %subscriber_id, "subscribed");
        self.sink.handle(RoomEvent::Subscribed {
            room: self.id.clone(),
            track: track_id.clone(),
            subscriber: subscriber_id.clone(),
        });
        Ok(receiver)
    }

    /// Drop a subscription. Idempotent.
    pub fn unsubscribe(&self, subscriber_id: &ParticipantId, track_id: &TrackId) {
        let removed = {
            let mut inner = self.inner.write();
            let removed = inner
                .subscribers
                .get_mut(track_id)
                .is_some_and(|subs| subs.shift_remove(subscriber_id).is_some());
            if let Some(subs) = inner.subscriptions.get_mut(subscriber_id) {
                subs.shift_remove(track_id);
            }
            removed
        };

        if removed {
            self.sink.handle(RoomEvent::Unsubscribed {
                room: self.id.clone(),
                track: track_id.clone(),
                subscriber: subscriber_id.clone(),
            });
        }
    }

    /// Forward one frame to every current subscriber, at most once each.
    ///
    /// Frames racing a teardown are dropped for that subscriber. Returns
    /// the number of subscribers the frame was delivered to.
    pub fn publish_frame(&self, track_id: &TrackId, frame: &TrackFrame) -> usize {
        let inner = self.inner.read();
        let Some(track) = inner.tracks.get(track_id) else {
            return 0;
        };
        track.record_received(frame.payload.len());

        let Some(subscribers) = inner.subscribers.get(track_id) else {
            return 0;
        };

        let mut delivered = 0usize;
        let mut dropped = 0u64;
        for (subscriber_id, sender) in subscribers {
            match sender.try_send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    dropped += 1;
                    debug!(
                        room = %self.id,
                        track = %track_id,
                        subscriber = %subscriber_id,
                        "subscriber channel full, dropping frame"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => dropped += 1,
            }
        }
        track.record_forwarded(delivered as u64);
        track.record_dropped(dropped);
        delivered
    }

    #[must_use]
    pub fn participant(&self, participant_id: &ParticipantId) -> Option<Participant> {
        self.inner.read().participants.get(participant_id).cloned()
    }

    /// Participants in join order, hidden ones excluded.
    #[must_use]
    pub fn participants(&self) -> Vec<Participant> {
        self.inner
            .read()
            .participants
            .values()
            .filter(|p| !p.capabilities.hidden)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn participant_count(&self) -> usize {
        self.inner.read().participants.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().participants.is_empty()
    }

    #[must_use]
    pub fn track(&self, track_id: &TrackId) -> Option<Arc<Track>> {
        self.inner.read().tracks.get(track_id).cloned()
    }

    #[must_use]
    pub fn track_count(&self) -> usize {
        self.inner.read().tracks.len()
    }

    /// A participant's published tracks, in publication order.
    #[must_use]
    pub fn get_participant_tracks(&self, participant_id: &ParticipantId) -> Vec<Arc<Track>> {
        let inner = self.inner.read();
        inner
            .participant_tracks
            .get(participant_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.tracks.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Subscribers of a track, in subscription order.
    #[must_use]
    pub fn track_subscribers(&self, track_id: &TrackId) -> Vec<ParticipantId> {
        self.inner
            .read()
            .subscribers
            .get(track_id)
            .map(|subs| subs.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NullRoomEventSink;
    use crate::participant::Capabilities;
    use bytes::Bytes;

    fn room() -> Room {
        Room::new(
            "R1",
            "test room",
            SfuConfig::default(),
            Arc::new(NullRoomEventSink),
        )
    }

    fn member(id: &str, can_publish: bool, can_subscribe: bool) -> Participant {
        Participant::new(
            id,
            id,
            Capabilities {
                can_publish,
                can_subscribe,
                can_publish_data: false,
                hidden: false,
            },
        )
    }

    fn frame() -> TrackFrame {
        TrackFrame {
            kind: TrackKind::Video,
            timestamp: 40,
            payload: Bytes::from_static(&[1, 2, 3]),
        }
    }

    #[test]
    fn test_publish_requires_capability() {
        let room = room();
        room.add_participant(member("alice", false, true)).unwrap();

        let result = room.publish_track(
            &"alice".into(),
            "v1",
            TrackKind::Video,
            TrackSource::Camera,
        );
        assert!(matches!(result, Err(Error::PermissionDenied(_))));
        assert_eq!(room.track_count(), 0);
    }

    #[test]
    fn test_publish_and_list_tracks_in_order() {
        let room = room();
        room.add_participant(member("alice", true, true)).unwrap();

        room.publish_track(&"alice".into(), "v1", TrackKind::Video, TrackSource::Camera)
            .unwrap();
        room.publish_track(
            &"alice".into(),
            "a1",
            TrackKind::Audio,
            TrackSource::Microphone,
        )
        .unwrap();

        let tracks = room.get_participant_tracks(&"alice".into());
        let ids: Vec<&str> = tracks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["v1", "a1"]);
    }

    #[test]
    fn test_duplicate_track_id_rejected() {
        let room = room();
        room.add_participant(member("alice", true, true)).unwrap();
        room.publish_track(&"alice".into(), "v1", TrackKind::Video, TrackSource::Camera)
            .unwrap();

        let result =
            room.publish_track(&"alice".into(), "v1", TrackKind::Video, TrackSource::Screen);
        assert!(matches!(result, Err(Error::AlreadyExists(_))));
    }

    #[test]
    fn test_subscribe_requires_capability_and_track() {
        let room = room();
        room.add_participant(member("alice", true, true)).unwrap();
        room.add_participant(member("bob", false, false)).unwrap();
        room.publish_track(&"alice".into(), "v1", TrackKind::Video, TrackSource::Camera)
            .unwrap();

        assert!(matches!(
            room.subscribe(&"bob".into(), &"v1".into()),
            Err(Error::PermissionDenied(_))
        ));
        assert!(matches!(
            room.subscribe(&"alice".into(), &"missing".into()),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_subscriber_limit() {
        let room = Room::new(
            "R1",
            "small",
            SfuConfig {
                max_subscribers_per_stream: 1,
                ..Default::default()
            },
            Arc::new(NullRoomEventSink),
        );
        room.add_participant(member("alice", true, true)).unwrap();
        room.add_participant(member("bob", false, true)).unwrap();
        room.add_participant(member("carol", false, true)).unwrap();
        room.publish_track(&"alice".into(), "v1", TrackKind::Video, TrackSource::Camera)
            .unwrap();

        let _rx = room.subscribe(&"bob".into(), &"v1".into()).unwrap();
        assert!(matches!(
            room.subscribe(&"carol".into(), &"v1".into()),
            Err(Error::CapacityExceeded(_))
        ));
    }

    #[test]
    fn test_forwarding_delivers_once_per_subscriber() {
        let room = room();
        room.add_participant(member("alice", true, true)).unwrap();
        room.add_participant(member("bob", false, true)).unwrap();
        room.add_participant(member("carol", false, true)).unwrap();
        room.publish_track(&"alice".into(), "v1", TrackKind::Video, TrackSource::Camera)
            .unwrap();

        let mut bob_rx = room.subscribe(&"bob".into(), &"v1".into()).unwrap();
        let mut carol_rx = room.subscribe(&"carol".into(), &"v1".into()).unwrap();

        assert_eq!(room.publish_frame(&"v1".into(), &frame()), 2);

        assert_eq!(bob_rx.try_recv().unwrap().timestamp, 40);
        assert!(bob_rx.try_recv().is_err());
        assert_eq!(carol_rx.try_recv().unwrap().timestamp, 40);
    }

    #[test]
    fn test_forwarding_preserves_publisher_order() {
        let room = room();
        room.add_participant(member("alice", true, true)).unwrap();
        room.add_participant(member("bob", false, true)).unwrap();
        room.publish_track(&"alice".into(), "v1", TrackKind::Video, TrackSource::Camera)
            .unwrap();
        let mut rx = room.subscribe(&"bob".into(), &"v1".into()).unwrap();

        for timestamp in [10u32, 20, 30] {
            let frame = TrackFrame {
                kind: TrackKind::Video,
                timestamp,
                payload: Bytes::from_static(&[0]),
            };
            room.publish_frame(&"v1".into(), &frame);
        }

        assert_eq!(rx.try_recv().unwrap().timestamp, 10);
        assert_eq!(rx.try_recv().unwrap().timestamp, 20);
        assert_eq!(rx.try_recv().unwrap().timestamp, 30);
    }

    #[test]
    fn test_slow_subscriber_drops_frames() {
        let room = Room::new(
            "R1",
            "tiny buffers",
            SfuConfig {
                subscriber_channel_capacity: 1,
                ..Default::default()
            },
            Arc::new(NullRoomEventSink),
        );
        room.add_participant(member("alice", true, true)).unwrap();
        room.add_participant(member("bob", false, true)).unwrap();
        room.publish_track(&"alice".into(), "v1", TrackKind::Video, TrackSource::Camera)
            .unwrap();
        let _rx = room.subscribe(&"bob".into(), &"v1".into()).unwrap();

        assert_eq!(room.publish_frame(&"v1".into(), &frame()), 1);
        assert_eq!(room.publish_frame(&"v1".into(), &frame()), 0);

        let track = room.track(&"v1".into()).unwrap();
        assert_eq!(track.stats().frames_dropped, 1);
    }

    #[test]
    fn test_unpublish_cascades_subscriptions() {
        let room = room();
        room.add_participant(member("alice", true, true)).unwrap();
        room.add_participant(member("bob", false, true)).unwrap();
        room.publish_track(&"alice".into(), "v1", TrackKind::Video, TrackSource::Camera)
            .unwrap();
        let mut rx = room.subscribe(&"bob".into(), &"v1".into()).unwrap();

        room.unpublish_track(&"alice".into(), &"v1".into()).unwrap();

        assert_eq!(room.track_count(), 0);
        assert!(room.track_subscribers(&"v1".into()).is_empty());
        // Subscriber channel is closed.
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn test_unpublish_requires_ownership() {
        let room = room();
        room.add_participant(member("alice", true, true)).unwrap();
        room.add_participant(member("eve", true, true)).unwrap();
        room.publish_track(&"alice".into(), "v1", TrackKind::Video, TrackSource::Camera)
            .unwrap();

        assert!(matches!(
            room.unpublish_track(&"eve".into(), &"v1".into()),
            Err(Error::PermissionDenied(_))
        ));
    }

    #[test]
    fn test_participant_left_cascades_everything() {
        let room = room();
        room.add_participant(member("alice", true, true)).unwrap();
        room.add_participant(member("bob", true, true)).unwrap();
        room.publish_track(&"alice".into(), "v1", TrackKind::Video, TrackSource::Camera)
            .unwrap();
        room.publish_track(&"bob".into(), "b1", TrackKind::Audio, TrackSource::Microphone)
            .unwrap();
        let _alice_rx = room.subscribe(&"alice".into(), &"b1".into()).unwrap();
        let _bob_rx = room.subscribe(&"bob".into(), &"v1".into()).unwrap();

        room.participant_left(&"alice".into());

        // No track owned by alice, no subscription by alice.
        assert!(room.track(&"v1".into()).is_none());
        assert!(room.get_participant_tracks(&"alice".into()).is_empty());
        assert!(!room
            .track_subscribers(&"b1".into())
            .contains(&"alice".into()));
        assert!(room.participant(&"alice".into()).is_none());
        // Bob's own track survives.
        assert!(room.track(&"b1".into()).is_some());

        // Idempotent.
        room.participant_left(&"alice".into());
    }

    #[test]
    fn test_hidden_participants_are_not_listed() {
        let room = room();
        room.add_participant(member("alice", true, true)).unwrap();
        room.add_participant(Participant::new(
            "watcher",
            "watcher",
            Capabilities {
                can_publish: false,
                can_subscribe: true,
                can_publish_data: false,
                hidden: true,
            },
        ))
        .unwrap();

        let listed: Vec<String> = room
            .participants()
            .iter()
            .map(|p| p.id.to_string())
            .collect();
        assert_eq!(listed, vec!["alice"]);
        assert_eq!(room.participant_count(), 2);
    }
}
