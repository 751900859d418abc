//! Published media tracks

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::types::{ParticipantId, TrackId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl From<&str> for TrackKind {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "audio" => Self::Audio,
            _ => Self::Video,
        }
    }
}

/// Where a track comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackSource {
    Camera,
    Microphone,
    Screen,
    ScreenAudio,
    Unknown,
}

impl From<&str> for TrackSource {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "camera" => Self::Camera,
            "microphone" => Self::Microphone,
            "screen" => Self::Screen,
            "screen_audio" => Self::ScreenAudio,
            _ => Self::Unknown,
        }
    }
}

/// One media frame flowing from a publisher to subscribers, unchanged.
#[derive(Debug, Clone)]
pub struct TrackFrame {
    pub kind: TrackKind,
    pub timestamp: u32,
    pub payload: Bytes,
}

/// Forwarding counters, updated with relaxed atomics off the frame path.
#[derive(Debug, Default)]
pub struct TrackStats {
    pub frames_received: AtomicU64,
    pub frames_forwarded: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub bytes_received: AtomicU64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackStatsSnapshot {
    pub frames_received: u64,
    pub frames_forwarded: u64,
    pub frames_dropped: u64,
    pub bytes_received: u64,
}

#[derive(Debug)]
pub struct Track {
    pub id: TrackId,
    pub owner: ParticipantId,
    pub kind: TrackKind,
    pub source: TrackSource,
    pub published_at: DateTime<Utc>,
    stats: TrackStats,
}

impl Track {
    pub fn new(
        id: impl Into<TrackId>,
        owner: impl Into<ParticipantId>,
        kind: TrackKind,
        source: TrackSource,
    ) -> Self {
        Self {
            id: id.into(),
            owner: owner.into(),
            kind,
            source,
            published_at: Utc::now(),
            stats: TrackStats::default(),
        }
    }

    pub(crate) fn record_received(&self, bytes: usize) {
        self.stats.frames_received.fetch_add(1, Ordering::Relaxed);
        self.stats
            .bytes_received
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_forwarded(&self, count: u64) {
        self.stats
            .frames_forwarded
            .fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self, count: u64) {
        self.stats.frames_dropped.fetch_add(count, Ordering::Relaxed);
    }

    #[must_use]
    pub fn stats(&self) -> TrackStatsSnapshot {
        TrackStatsSnapshot {
            frames_received: self.stats.frames_received.load(Ordering::Relaxed),
            frames_forwarded: self.stats.frames_forwarded.load(Ordering::Relaxed),
            frames_dropped: self.stats.frames_dropped.load(Ordering::Relaxed),
            bytes_received: self.stats.bytes_received.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_and_source_parsing() {
        assert_eq!(TrackKind::from("audio"), TrackKind::Audio);
        assert_eq!(TrackKind::from("VIDEO"), TrackKind::Video);
        assert_eq!(TrackSource::from("camera"), TrackSource::Camera);
        assert_eq!(TrackSource::from("hologram"), TrackSource::Unknown);
    }

    #[test]
    fn test_stats_accumulate() {
        let track = Track::new("t1", "alice", TrackKind::Video, TrackSource::Camera);
        track.record_received(100);
        track.record_forwarded(3);
        track.record_dropped(1);

        let snapshot = track.stats();
        assert_eq!(snapshot.frames_received, 1);
        assert_eq!(snapshot.frames_forwarded, 3);
        assert_eq!(snapshot.frames_dropped, 1);
        assert_eq!(snapshot.bytes_received, 100);
    }
}
