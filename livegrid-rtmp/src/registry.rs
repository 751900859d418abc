//! Live stream registry
//!
//! Tracks which session is publishing each stream key and enforces the
//! single-publisher invariant: a second publisher on a live key is rejected
//! and the incumbent keeps the stream.

use dashmap::DashMap;
use indexmap::IndexMap;
use std::time::Instant;
use thiserror::Error;
use uuid::Uuid;

use crate::amf0::Amf0Value;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("stream key '{0}' already has a publisher")]
    AlreadyPublishing(String),
}

#[derive(Debug, Clone)]
pub struct PublishedStream {
    pub session_id: Uuid,
    pub started_at: Instant,
    pub metadata: Option<IndexMap<String, Amf0Value>>,
}

#[derive(Debug, Default)]
pub struct StreamRegistry {
    streams: DashMap<String, PublishedStream>,
}

impl StreamRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a stream key for a publishing session.
    pub fn publish(&self, stream_key: &str, session_id: Uuid) -> Result<(), RegistryError> {
        let mut claimed = false;
        self.streams
            .entry(stream_key.to_string())
            .or_insert_with(|| {
                claimed = true;
                PublishedStream {
                    session_id,
                    started_at: Instant::now(),
                    metadata: None,
                }
            });
        if claimed {
            Ok(())
        } else {
            Err(RegistryError::AlreadyPublishing(stream_key.to_string()))
        }
    }

    /// Release a stream key. Only the owning session can release; stale
    /// unpublishes from dropped newcomers are ignored.
    pub fn unpublish(&self, stream_key: &str, session_id: Uuid) {
        self.streams
            .remove_if(stream_key, |_, stream| stream.session_id == session_id);
    }

    pub fn set_metadata(
        &self,
        stream_key: &str,
        session_id: Uuid,
        metadata: IndexMap<String, Amf0Value>,
    ) {
        if let Some(mut entry) = self.streams.get_mut(stream_key) {
            if entry.session_id == session_id {
                entry.metadata = Some(metadata);
            }
        }
    }

    #[must_use]
    pub fn metadata(&self, stream_key: &str) -> Option<IndexMap<String, Amf0Value>> {
        self.streams
            .get(stream_key)
            .and_then(|entry| entry.metadata.clone())
    }

    #[must_use]
    pub fn is_live(&self, stream_key: &str) -> bool {
        self.streams.contains_key(stream_key)
    }

    #[must_use]
    pub fn live_streams(&self) -> Vec<String> {
        self.streams.iter().map(|e| e.key().clone()).collect()
    }
}
