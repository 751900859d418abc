//! GOP frame cache
//!
//! Keeps the most recent group-of-pictures per stream so a late joiner can
//! be primed from the last keyframe instead of waiting for the next one.
//! The engine never inspects codec payloads, so the caller flags
//! keyframes.

use std::collections::VecDeque;

use crate::events::MediaFrame;

/// Frames kept per GOP; roughly a minute at 24 fps.
const MAX_FRAMES_PER_GOP: usize = 1500;

#[derive(Clone, Default)]
pub struct Gop {
    frames: Vec<MediaFrame>,
}

impl Gop {
    #[must_use]
    pub const fn new() -> Self {
        Self { frames: Vec::new() }
    }

    fn push(&mut self, frame: MediaFrame) {
        if self.frames.len() >= MAX_FRAMES_PER_GOP {
            return;
        }
        self.frames.push(frame);
    }

    #[must_use]
    pub fn frames(&self) -> &[MediaFrame] {
        &self.frames
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// Rolling window of the last `capacity` GOPs for one stream.
#[derive(Clone)]
pub struct GopCache {
    gops: VecDeque<Gop>,
    capacity: usize,
}

impl Default for GopCache {
    fn default() -> Self {
        Self::new(1)
    }
}

impl GopCache {
    /// `capacity` of 0 disables caching entirely.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            gops: VecDeque::from([Gop::new()]),
            capacity,
        }
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.capacity != 0
    }

    /// Record a frame. A keyframe rolls the window over to a fresh GOP.
    pub fn save(&mut self, frame: MediaFrame, is_key_frame: bool) {
        if !self.is_enabled() {
            return;
        }

        if is_key_frame {
            if self.gops.len() == self.capacity {
                self.gops.pop_front();
            }
            self.gops.push_back(Gop::new());
        }

        if let Some(gop) = self.gops.back_mut() {
            gop.push(frame);
        }
    }

    /// All cached frames, oldest GOP first, for priming a new subscriber.
    #[must_use]
    pub fn frames(&self) -> Vec<MediaFrame> {
        self.gops
            .iter()
            .flat_map(|gop| gop.frames().iter().cloned())
            .collect()
    }

    pub fn clear(&mut self) {
        self.gops.clear();
        self.gops.push_back(Gop::new());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MediaKind;
    use bytes::Bytes;

    fn frame(timestamp: u32) -> MediaFrame {
        MediaFrame {
            kind: MediaKind::Video,
            timestamp,
            payload: Bytes::from_static(&[0x17]),
        }
    }

    #[test]
    fn test_keyframe_rolls_the_window() {
        let mut cache = GopCache::new(1);
        cache.save(frame(0), true);
        cache.save(frame(40), false);
        cache.save(frame(80), false);

        // New keyframe evicts the previous GOP.
        cache.save(frame(120), true);
        cache.save(frame(160), false);

        let timestamps: Vec<u32> = cache.frames().iter().map(|f| f.timestamp).collect();
        assert_eq!(timestamps, vec![120, 160]);
    }

    #[test]
    fn test_multiple_gops_kept_in_order() {
        let mut cache = GopCache::new(2);
        cache.save(frame(0), true);
        cache.save(frame(40), false);
        cache.save(frame(80), true);
        cache.save(frame(120), false);

        let timestamps: Vec<u32> = cache.frames().iter().map(|f| f.timestamp).collect();
        assert_eq!(timestamps, vec![0, 40, 80, 120]);
    }

    #[test]
    fn test_disabled_cache_stores_nothing() {
        let mut cache = GopCache::new(0);
        cache.save(frame(0), true);
        assert!(cache.frames().is_empty());
        assert!(!cache.is_enabled());
    }

    #[test]
    fn test_clear() {
        let mut cache = GopCache::default();
        cache.save(frame(0), true);
        cache.clear();
        assert!(cache.frames().is_empty());
    }
}
