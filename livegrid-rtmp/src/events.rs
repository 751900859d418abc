//! Session event sink
//!
//! The protocol engine reports lifecycle transitions and media frames
//! through a single-method sink wired at construction. The forwarding
//! layer implements it; the engine never knows who is listening.

use bytes::Bytes;
use indexmap::IndexMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::amf0::Amf0Value;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum MediaKind {
    Audio,
    Video,
}

/// One opaque audio or video message as received from the publisher.
#[derive(Debug, Clone)]
pub struct MediaFrame {
    pub kind: MediaKind,
    pub timestamp: u32,
    pub payload: Bytes,
}

#[derive(Debug)]
pub enum SessionEvent {
    /// A publisher claimed `stream_key` and entered the publishing state.
    Published {
        session_id: Uuid,
        stream_key: String,
    },
    Unpublished {
        session_id: Uuid,
        stream_key: String,
    },
    /// A player started on `stream_key`. Frames pushed into `media` are
    /// written to the player's socket in order; the channel is bounded and
    /// the session drops the stream when it lags too far behind.
    Played {
        session_id: Uuid,
        stream_key: String,
        media: mpsc::Sender<MediaFrame>,
    },
    Stopped {
        session_id: Uuid,
        stream_key: String,
    },
    /// `@setDataFrame` metadata for a publishing stream.
    Metadata {
        stream_key: String,
        metadata: IndexMap<String, Amf0Value>,
    },
    /// A media frame from a publisher, delivered unchanged.
    Frame {
        stream_key: String,
        frame: MediaFrame,
    },
}

pub trait SessionEventSink: Send + Sync {
    fn handle(&self, event: SessionEvent);
}

/// Sink that discards everything; useful for tests and standalone ingest.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventSink;

impl SessionEventSink for NullEventSink {
    fn handle(&self, _event: SessionEvent) {}
}
