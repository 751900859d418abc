//! Selective Forwarding Unit
//!
//! Rooms of participants publishing and subscribing to media tracks under
//! a capability model derived from signed join tokens. Frames are forwarded
//! unchanged; there is no transcoding and no reordering.

pub mod config;
pub mod error;
pub mod events;
pub mod manager;
pub mod participant;
pub mod room;
pub mod token;
pub mod track;
pub mod types;

pub use config::SfuConfig;
pub use error::{Error, Result};
pub use events::{NullRoomEventSink, RoomEvent, RoomEventSink};
pub use manager::RoomManager;
pub use participant::{Capabilities, Participant, ParticipantState};
pub use room::Room;
pub use token::{AccessToken, ApiCredentials, Claims, TokenVerifier, VideoGrant};
pub use track::{Track, TrackFrame, TrackKind, TrackSource};
pub use types::{ParticipantId, RoomId, TrackId};
