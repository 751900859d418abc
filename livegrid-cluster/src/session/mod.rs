//! Distributed session index
//!
//! One contract, two backends: a pure in-memory store (authoritative map
//! plus three inverted indexes) and a Redis-backed store (JSON blob whose
//! key TTL is authoritative, set-typed index keys). Every operation takes
//! a cancellation token and returns `Interrupted` promptly once it fires.

pub mod memory;
pub mod redis;

pub use memory::MemorySessionStore;
pub use redis::RedisSessionStore;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub stream_id: String,
    pub node_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub data: HashMap<String, String>,
}

impl Session {
    pub fn new(
        id: impl Into<String>,
        user_id: impl Into<String>,
        stream_id: impl Into<String>,
        node_id: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        let now = Utc::now();
        let ttl = ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::hours(1));
        Self {
            id: id.into(),
            user_id: user_id.into(),
            stream_id: stream_id.into(),
            node_id: node_id.into(),
            created_at: now,
            expires_at: now + ttl,
            last_seen: now,
            data: HashMap::new(),
        }
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Seconds until expiry, clamped to at least 1 for store TTLs.
    #[must_use]
    pub fn remaining_ttl_secs(&self, now: DateTime<Utc>) -> u64 {
        (self.expires_at - now).num_seconds().max(1) as u64
    }
}

/// Storage-agnostic session index contract.
///
/// Both backends satisfy the same pre/post-conditions: a live session is
/// reachable by id and through each of its non-empty inverted index
/// entries; a deleted or expired one is reachable through none.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert a new session. Empty ids are invalid; duplicates rejected.
    async fn create(&self, session: Session, cancel: &CancellationToken) -> Result<()>;

    /// Fetch a live session. Expired sessions are `NotFound`.
    async fn get(&self, id: &str, cancel: &CancellationToken) -> Result<Session>;

    /// Advance `last_seen` without extending the TTL.
    async fn touch(&self, id: &str, cancel: &CancellationToken) -> Result<()>;

    /// Advance `last_seen` and extend `expires_at` by `ttl` from now.
    async fn refresh(
        &self,
        id: &str,
        ttl: Duration,
        cancel: &CancellationToken,
    ) -> Result<Session>;

    /// Remove a session and detach it from every index. Idempotent.
    async fn delete(&self, id: &str, cancel: &CancellationToken) -> Result<()>;

    async fn by_user(&self, user_id: &str, cancel: &CancellationToken) -> Result<Vec<Session>>;

    async fn by_stream(&self, stream_id: &str, cancel: &CancellationToken)
        -> Result<Vec<Session>>;

    async fn by_node(&self, node_id: &str, cancel: &CancellationToken) -> Result<Vec<Session>>;

    /// Drop expired sessions (and stale index entries), returning the
    /// count removed.
    async fn cleanup_expired(&self, cancel: &CancellationToken) -> Result<usize>;
}
