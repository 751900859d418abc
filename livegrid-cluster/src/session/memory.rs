//! In-memory session store
//!
//! Authoritative session map plus three inverted indexes under one
//! read/write lock. Expiry is checked on every read; `cleanup_expired`
//! reclaims in bulk. Indexes hold ids only and dereference through the
//! primary map.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::{Session, SessionStore};
use crate::{Error, Result};

#[derive(Default)]
struct MemoryInner {
    sessions: HashMap<String, Session>,
    by_user: HashMap<String, HashSet<String>>,
    by_stream: HashMap<String, HashSet<String>>,
    by_node: HashMap<String, HashSet<String>>,
}

impl MemoryInner {
    fn index(&mut self, session: &Session) {
        self.by_user
            .entry(session.user_id.clone())
            .or_default()
            .insert(session.id.clone());
        self.by_stream
            .entry(session.stream_id.clone())
            .or_default()
            .insert(session.id.clone());
        self.by_node
            .entry(session.node_id.clone())
            .or_default()
            .insert(session.id.clone());
    }

    fn unindex(&mut self, session: &Session) {
        detach(&mut self.by_user, &session.user_id, &session.id);
        detach(&mut self.by_stream, &session.stream_id, &session.id);
        detach(&mut self.by_node, &session.node_id, &session.id);
    }

    fn remove(&mut self, id: &str) -> Option<Session> {
        let session = self.sessions.remove(id)?;
        self.unindex(&session);
        Some(session)
    }
}

fn detach(index: &mut HashMap<String, HashSet<String>>, key: &str, id: &str) {
    if let Some(ids) = index.get_mut(key) {
        ids.remove(id);
        if ids.is_empty() {
            index.remove(key);
        }
    }
}

#[derive(Default)]
pub struct MemorySessionStore {
    inner: RwLock<MemoryInner>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().sessions.is_empty()
    }

    fn collect_index(&self, ids: Option<&HashSet<String>>, inner: &MemoryInner) -> Vec<Session> {
        let now = Utc::now();
        ids.map(|ids| {
            ids.iter()
                .filter_map(|id| inner.sessions.get(id))
                .filter(|s| !s.is_expired(now))
                .cloned()
                .collect()
        })
        .unwrap_or_default()
    }
}

fn ensure_live(cancel: &CancellationToken, operation: &str) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(Error::Interrupted(format!("{operation} cancelled")));
    }
    Ok(())
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, session: Session, cancel: &CancellationToken) -> Result<()> {
        ensure_live(cancel, "create")?;
        if session.id.is_empty() {
            return Err(Error::InvalidArgument(
                "session id must not be empty".to_string(),
            ));
        }

        let mut inner = self.inner.write();
        if inner.sessions.contains_key(&session.id) {
            return Err(Error::AlreadyExists(format!("session '{}'", session.id)));
        }
        inner.index(&session);
        inner.sessions.insert(session.id.clone(), session);
        Ok(())
    }

    async fn get(&self, id: &str, cancel: &CancellationToken) -> Result<Session> {
        ensure_live(cancel, "get")?;
        let mut inner = self.inner.write();
        let Some(session) = inner.sessions.get(id) else {
            return Err(Error::NotFound(format!("session '{id}'")));
        };
        if session.is_expired(Utc::now()) {
            inner.remove(id);
            return Err(Error::NotFound(format!("session '{id}' expired")));
        }
        Ok(inner.sessions[id].clone())
    }

    async fn touch(&self, id: &str, cancel: &CancellationToken) -> Result<()> {
        ensure_live(cancel, "touch")?;
        let now = Utc::now();
        let mut inner = self.inner.write();
        let session = inner
            .sessions
            .get_mut(id)
            .filter(|s| !s.is_expired(now))
            .ok_or_else(|| Error::NotFound(format!("session '{id}'")))?;
        session.last_seen = now;
        Ok(())
    }

    async fn refresh(
        &self,
        id: &str,
        ttl: Duration,
        cancel: &CancellationToken,
    ) -> Result<Session> {
        ensure_live(cancel, "refresh")?;
        let now = Utc::now();
        let ttl = ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::hours(1));
        let mut inner = self.inner.write();
        let session = inner
            .sessions
            .get_mut(id)
            .filter(|s| !s.is_expired(now))
            .ok_or_else(|| Error::NotFound(format!("session '{id}'")))?;
        session.last_seen = now;
        session.expires_at = now + ttl;
        Ok(session.clone())
    }

    async fn delete(&self, id: &str, cancel: &CancellationToken) -> Result<()> {
        ensure_live(cancel, "delete")?;
        self.inner.write().remove(id);
        Ok(())
    }

    async fn by_user(&self, user_id: &str, cancel: &CancellationToken) -> Result<Vec<Session>> {
        ensure_live(cancel, "by_user")?;
        let inner = self.inner.read();
        Ok(self.collect_index(inner.by_user.get(user_id), &inner))
    }

    async fn by_stream(
        &self,
        stream_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<Session>> {
        ensure_live(cancel, "by_stream")?;
        let inner = self.inner.read();
        Ok(self.collect_index(inner.by_stream.get(stream_id), &inner))
    }

    async fn by_node(&self, node_id: &str, cancel: &CancellationToken) -> Result<Vec<Session>> {
        ensure_live(cancel, "by_node")?;
        let inner = self.inner.read();
        Ok(self.collect_index(inner.by_node.get(node_id), &inner))
    }

    async fn cleanup_expired(&self, cancel: &CancellationToken) -> Result<usize> {
        ensure_live(cancel, "cleanup_expired")?;
        let now = Utc::now();
        let mut inner = self.inner.write();
        let expired: Vec<String> = inner
            .sessions
            .values()
            .filter(|s| s.is_expired(now))
            .map(|s| s.id.clone())
            .collect();
        for id in &expired {
            inner.remove(id);
        }
        Ok(expired.len())
    }
}

#[cfg(test)]
mod tests {
    use super::super::contract_tests;
    use super::*;

    #[tokio::test]
    async fn test_create_get_round_trip() {
        contract_tests::create_get_round_trip(&MemorySessionStore::new()).await;
    }

    #[tokio::test]
    async fn test_empty_id_rejected() {
        contract_tests::empty_id_rejected(&MemorySessionStore::new()).await;
    }

    #[tokio::test]
    async fn test_duplicate_rejected() {
        contract_tests::duplicate_rejected(&MemorySessionStore::new()).await;
    }

    #[tokio::test]
    async fn test_indexes_follow_sessions() {
        contract_tests::indexes_follow_sessions(&MemorySessionStore::new()).await;
    }

    #[tokio::test]
    async fn test_expiry_hides_sessions() {
        contract_tests::expiry_hides_sessions(&MemorySessionStore::new()).await;
    }

    #[tokio::test]
    async fn test_refresh_extends_expiry() {
        contract_tests::refresh_extends_expiry(&MemorySessionStore::new()).await;
    }

    #[tokio::test]
    async fn test_touch_advances_last_seen() {
        contract_tests::touch_advances_last_seen(&MemorySessionStore::new()).await;
    }

    #[tokio::test]
    async fn test_cancelled_operations_interrupt() {
        contract_tests::cancelled_operations_interrupt(&MemorySessionStore::new()).await;
    }

    #[tokio::test]
    async fn test_cleanup_returns_count_and_detaches_indexes() {
        let store = MemorySessionStore::new();
        let cancel = CancellationToken::new();
        store
            .create(
                Session::new("gone", "alice", "stream-1", "n1", Duration::from_millis(10)),
                &cancel,
            )
            .await
            .expect("create");
        store
            .create(
                Session::new("kept", "alice", "stream-1", "n1", Duration::from_secs(60)),
                &cancel,
            )
            .await
            .expect("create");

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.cleanup_expired(&cancel).await.expect("cleanup"), 1);
        assert_eq!(store.len(), 1);

        let remaining = store.by_user("alice", &cancel).await.expect("by_user");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, "kept");
    }
}
