//! Redis-backed session store
//!
//! The session is a JSON blob under `{prefix}:session:{id}` whose key TTL
//! is authoritative; the inverted indexes are set-typed keys holding ids
//! only. A cached multiplexed connection is reused across operations, and
//! every round trip is bounded by a timeout and the caller's cancellation
//! token.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use redis::aio::MultiplexedConnection;
use redis::RedisResult;
use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{Session, SessionStore};
use crate::{Error, Result};

const DEFAULT_KEY_PREFIX: &str = "livegrid:sessions";
const OP_TIMEOUT: Duration = Duration::from_secs(5);

pub struct RedisSessionStore {
    client: redis::Client,
    cached_conn: tokio::sync::Mutex<Option<MultiplexedConnection>>,
    key_prefix: String,
}

impl RedisSessionStore {
    pub fn new(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| Error::Storage(format!("redis client: {e}")))?;
        Ok(Self {
            client,
            cached_conn: tokio::sync::Mutex::new(None),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        })
    }

    #[must_use]
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    fn session_key(&self, id: &str) -> String {
        format!("{}:session:{id}", self.key_prefix)
    }

    fn user_key(&self, user_id: &str) -> String {
        format!("{}:user:{user_id}", self.key_prefix)
    }

    fn stream_key(&self, stream_id: &str) -> String {
        format!("{}:stream:{stream_id}", self.key_prefix)
    }

    fn node_key(&self, node_id: &str) -> String {
        format!("{}:node:{node_id}", self.key_prefix)
    }

    /// `MultiplexedConnection` multiplexes concurrent requests and
    /// reconnects on its own, so one cached instance serves all callers.
    async fn conn(&self, cancel: &CancellationToken) -> Result<MultiplexedConnection> {
        let mut guard = self.cached_conn.lock().await;
        if let Some(ref conn) = *guard {
            return Ok(conn.clone());
        }
        let conn = self
            .guard("connect", cancel, self.client.get_multiplexed_async_connection())
            .await?;
        *guard = Some(conn.clone());
        Ok(conn)
    }

    /// Bound one Redis round trip by the op timeout and the caller's
    /// cancellation token.
    async fn guard<T>(
        &self,
        operation: &str,
        cancel: &CancellationToken,
        fut: impl Future<Output = RedisResult<T>>,
    ) -> Result<T> {
        tokio::select! {
            () = cancel.cancelled() => {
                Err(Error::Interrupted(format!("{operation} cancelled")))
            }
            outcome = tokio::time::timeout(OP_TIMEOUT, fut) => match outcome {
                Err(_) => Err(Error::Timeout(format!("redis {operation} timed out"))),
                Ok(Err(e)) => Err(Error::Storage(format!("redis {operation} failed: {e}"))),
                Ok(Ok(value)) => Ok(value),
            }
        }
    }

    async fn fetch(&self, id: &str, cancel: &CancellationToken) -> Result<Option<Session>> {
        let mut conn = self.conn(cancel).await?;
        let blob: Option<String> = self
            .guard(
                "get",
                cancel,
                redis::cmd("GET")
                    .arg(self.session_key(id))
                    .query_async(&mut conn),
            )
            .await?;
        blob.map(|json| serde_json::from_str(&json).map_err(Error::from))
            .transpose()
    }

    async fn store_blob(
        &self,
        session: &Session,
        keep_ttl: bool,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut conn = self.conn(cancel).await?;
        let json = serde_json::to_string(session)?;
        let key = self.session_key(&session.id);

        let mut cmd = redis::cmd("SET");
        cmd.arg(&key).arg(&json);
        if keep_ttl {
            cmd.arg("KEEPTTL");
        } else {
            cmd.arg("EX")
                .arg(session.remaining_ttl_secs(Utc::now()));
        }
        self.guard("set", cancel, cmd.query_async::<()>(&mut conn))
            .await
    }

    async fn index_members(
        &self,
        index_key: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<Session>> {
        let mut conn = self.conn(cancel).await?;
        let ids: Vec<String> = self
            .guard(
                "smembers",
                cancel,
                redis::cmd("SMEMBERS").arg(index_key).query_async(&mut conn),
            )
            .await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut mget = redis::cmd("MGET");
        for id in &ids {
            mget.arg(self.session_key(id));
        }
        let blobs: Vec<Option<String>> = self
            .guard("mget", cancel, mget.query_async(&mut conn))
            .await?;

        let now = Utc::now();
        let mut sessions = Vec::new();
        let mut stale: Vec<&String> = Vec::new();
        for (id, blob) in ids.iter().zip(blobs) {
            match blob {
                Some(json) => {
                    let session: Session = serde_json::from_str(&json)?;
                    if !session.is_expired(now) {
                        sessions.push(session);
                    }
                }
                // Blob TTL fired; drop the dangling index entry.
                None => stale.push(id),
            }
        }

        if !stale.is_empty() {
            let mut srem = redis::cmd("SREM");
            srem.arg(index_key);
            for id in &stale {
                srem.arg(id.as_str());
            }
            self.guard("srem", cancel, srem.query_async::<()>(&mut conn))
                .await?;
        }

        Ok(sessions)
    }

    /// Cursor-driven SCAN so large keyspaces never block the server.
    async fn scan_keys(&self, pattern: &str, cancel: &CancellationToken) -> Result<Vec<String>> {
        let mut conn = self.conn(cancel).await?;
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = self
                .guard(
                    "scan",
                    cancel,
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(pattern)
                        .arg("COUNT")
                        .arg(100)
                        .query_async(&mut conn),
                )
                .await?;
            cursor = next;
            keys.extend(batch);
            if cursor == 0 {
                return Ok(keys);
            }
        }
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn create(&self, session: Session, cancel: &CancellationToken) -> Result<()> {
        if session.id.is_empty() {
            return Err(Error::InvalidArgument(
                "session id must not be empty".to_string(),
            ));
        }

        let mut conn = self.conn(cancel).await?;
        let json = serde_json::to_string(&session)?;
        let created: Option<String> = self
            .guard(
                "create",
                cancel,
                redis::cmd("SET")
                    .arg(self.session_key(&session.id))
                    .arg(&json)
                    .arg("NX")
                    .arg("EX")
                    .arg(session.remaining_ttl_secs(Utc::now()))
                    .query_async(&mut conn),
            )
            .await?;
        if created.is_none() {
            return Err(Error::AlreadyExists(format!("session '{}'", session.id)));
        }

        let mut pipe = redis::pipe();
        pipe.cmd("SADD")
            .arg(self.user_key(&session.user_id))
            .arg(&session.id)
            .ignore()
            .cmd("SADD")
            .arg(self.stream_key(&session.stream_id))
            .arg(&session.id)
            .ignore()
            .cmd("SADD")
            .arg(self.node_key(&session.node_id))
            .arg(&session.id)
            .ignore();
        self.guard("index", cancel, pipe.query_async::<()>(&mut conn))
            .await?;

        debug!(session_id = %session.id, "session created in redis");
        Ok(())
    }

    async fn get(&self, id: &str, cancel: &CancellationToken) -> Result<Session> {
        let session = self
            .fetch(id, cancel)
            .await?
            .ok_or_else(|| Error::NotFound(format!("session '{id}'")))?;
        if session.is_expired(Utc::now()) {
            // Key TTL is authoritative but clocks can lag it slightly.
            self.delete(id, cancel).await?;
            return Err(Error::NotFound(format!("session '{id}' expired")));
        }
        Ok(session)
    }

    async fn touch(&self, id: &str, cancel: &CancellationToken) -> Result<()> {
        let mut session = self
            .fetch(id, cancel)
            .await?
            .ok_or_else(|| Error::NotFound(format!("session '{id}'")))?;
        session.last_seen = Utc::now();
        self.store_blob(&session, true, cancel).await
    }

    async fn refresh(
        &self,
        id: &str,
        ttl: Duration,
        cancel: &CancellationToken,
    ) -> Result<Session> {
        let mut session = self
            .fetch(id, cancel)
            .await?
            .ok_or_else(|| Error::NotFound(format!("session '{id}'")))?;
        let now = Utc::now();
        let ttl = ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::hours(1));
        session.last_seen = now;
        session.expires_at = now + ttl;
        self.store_blob(&session, false, cancel).await?;
        Ok(session)
    }

    async fn delete(&self, id: &str, cancel: &CancellationToken) -> Result<()> {
        let Some(session) = self.fetch(id, cancel).await? else {
            return Ok(());
        };

        let mut conn = self.conn(cancel).await?;
        let mut pipe = redis::pipe();
        pipe.cmd("DEL")
            .arg(self.session_key(id))
            .ignore()
            .cmd("SREM")
            .arg(self.user_key(&session.user_id))
            .arg(id)
            .ignore()
            .cmd("SREM")
            .arg(self.stream_key(&session.stream_id))
            .arg(id)
            .ignore()
            .cmd("SREM")
            .arg(self.node_key(&session.node_id))
            .arg(id)
            .ignore();
        self.guard("delete", cancel, pipe.query_async::<()>(&mut conn))
            .await
    }

    async fn by_user(&self, user_id: &str, cancel: &CancellationToken) -> Result<Vec<Session>> {
        self.index_members(&self.user_key(user_id), cancel).await
    }

    async fn by_stream(
        &self,
        stream_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<Session>> {
        self.index_members(&self.stream_key(stream_id), cancel).await
    }

    async fn by_node(&self, node_id: &str, cancel: &CancellationToken) -> Result<Vec<Session>> {
        self.index_members(&self.node_key(node_id), cancel).await
    }

    /// The blob TTL already reclaimed the sessions; this pass prunes
    /// index entries whose blob is gone and reports how many distinct
    /// sessions vanished.
    async fn cleanup_expired(&self, cancel: &CancellationToken) -> Result<usize> {
        let mut removed: HashSet<String> = HashSet::new();

        for pattern in [
            format!("{}:user:*", self.key_prefix),
            format!("{}:stream:*", self.key_prefix),
            format!("{}:node:*", self.key_prefix),
        ] {
            for index_key in self.scan_keys(&pattern, cancel).await? {
                let mut conn = self.conn(cancel).await?;
                let ids: Vec<String> = self
                    .guard(
                        "smembers",
                        cancel,
                        redis::cmd("SMEMBERS").arg(&index_key).query_async(&mut conn),
                    )
                    .await?;
                if ids.is_empty() {
                    continue;
                }

                let mut mget = redis::cmd("MGET");
                for id in &ids {
                    mget.arg(self.session_key(id));
                }
                let blobs: Vec<Option<String>> = self
                    .guard("mget", cancel, mget.query_async(&mut conn))
                    .await?;

                let stale: Vec<&String> = ids
                    .iter()
                    .zip(&blobs)
                    .filter(|(_, blob)| blob.is_none())
                    .map(|(id, _)| id)
                    .collect();
                if stale.is_empty() {
                    continue;
                }

                let mut srem = redis::cmd("SREM");
                srem.arg(&index_key);
                for id in &stale {
                    srem.arg(id.as_str());
                    removed.insert((*id).clone());
                }
                self.guard("srem", cancel, srem.query_async::<()>(&mut conn))
                    .await?;
            }
        }

        Ok(removed.len())
    }
}
