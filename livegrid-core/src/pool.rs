//! Generic connection pool
//!
//! Bounded idle and active counts with optional validation at borrow,
//! return, and while idle. Exhausted acquires park on a notify queue until
//! a connection is released, the wait deadline passes, or the caller's
//! cancellation token fires.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{Error, Result};

/// A connection the pool can hold
#[async_trait]
pub trait PoolableConnection: Send + 'static {
    /// Liveness probe. Invalid connections are dropped, never re-idled.
    async fn is_valid(&mut self) -> bool;
}

/// Creates fresh connections when the idle list is empty
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    type Connection: PoolableConnection;

    async fn connect(&self) -> Result<Self::Connection>;
}

#[derive(Debug, Clone)]
pub struct PoolOptions {
    pub max_idle: usize,
    /// 0 = unbounded.
    pub max_active: usize,
    pub max_lifetime: Option<Duration>,
    pub idle_timeout: Option<Duration>,
    pub wait_timeout: Duration,
    pub test_on_borrow: bool,
    pub test_on_return: bool,
    pub test_while_idle: bool,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_idle: 8,
            max_active: 64,
            max_lifetime: Some(Duration::from_secs(1800)),
            idle_timeout: Some(Duration::from_secs(300)),
            wait_timeout: Duration::from_secs(5),
            test_on_borrow: true,
            test_on_return: false,
            test_while_idle: false,
        }
    }
}

impl From<&crate::config::PoolConfig> for PoolOptions {
    fn from(config: &crate::config::PoolConfig) -> Self {
        let optional_secs = |secs: u64| (secs > 0).then(|| Duration::from_secs(secs));
        Self {
            max_idle: config.max_idle,
            max_active: config.max_active,
            max_lifetime: optional_secs(config.max_lifetime_secs),
            idle_timeout: optional_secs(config.idle_timeout_secs),
            wait_timeout: Duration::from_secs(config.wait_timeout_secs),
            test_on_borrow: config.test_on_borrow,
            test_on_return: config.test_on_return,
            test_while_idle: config.test_while_idle,
        }
    }
}

/// A borrowed connection. Hand it back with [`ConnectionPool::release`];
/// dropping it instead closes the connection and frees its active slot.
pub struct PooledConnection<C> {
    conn: C,
    id: String,
    created_at: Instant,
}

impl<C> std::fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .finish()
    }
}

impl<C> PooledConnection<C> {
    fn new(conn: C) -> Self {
        Self {
            conn,
            id: nanoid::nanoid!(),
            created_at: Instant::now(),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

impl<C> Deref for PooledConnection<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.conn
    }
}

impl<C> DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut C {
        &mut self.conn
    }
}

struct IdleConnection<C> {
    conn: PooledConnection<C>,
    idled_at: Instant,
}

struct PoolState<C> {
    idle: VecDeque<IdleConnection<C>>,
    active: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PoolStats {
    pub active: usize,
    pub idle: usize,
}

pub struct ConnectionPool<F: ConnectionFactory> {
    factory: F,
    options: PoolOptions,
    state: Mutex<PoolState<F::Connection>>,
    released: Notify,
}

enum Attempt<C> {
    Idle(PooledConnection<C>),
    Create,
    Wait,
}

impl<F: ConnectionFactory> ConnectionPool<F> {
    pub fn new(factory: F, options: PoolOptions) -> Self {
        Self {
            factory,
            options,
            state: Mutex::new(PoolState {
                idle: VecDeque::new(),
                active: 0,
            }),
            released: Notify::new(),
        }
    }

    /// Borrow a connection.
    ///
    /// Prefers an idle connection (validated when `test_on_borrow`), creates
    /// a fresh one while under `max_active`, and otherwise waits up to
    /// `wait_timeout` for a release. Returns `Timeout` when the deadline
    /// passes and `Interrupted` when `cancel` fires first.
    pub async fn acquire(
        &self,
        cancel: &CancellationToken,
    ) -> Result<PooledConnection<F::Connection>> {
        let deadline = tokio::time::Instant::now() + self.options.wait_timeout;

        loop {
            let attempt = {
                let mut state = self.state.lock();
                if let Some(idle) = state.idle.pop_front() {
                    state.active += 1;
                    Attempt::Idle(idle.conn)
                } else if self.options.max_active == 0 || state.active < self.options.max_active {
                    state.active += 1;
                    Attempt::Create
                } else {
                    Attempt::Wait
                }
            };

            match attempt {
                Attempt::Idle(mut conn) => {
                    if self.lifetime_exceeded(&conn) {
                        debug!(id = %conn.id(), "dropping idle connection past max lifetime");
                        self.free_active_slot();
                        continue;
                    }
                    if self.options.test_on_borrow && !conn.conn.is_valid().await {
                        debug!(id = %conn.id(), "dropping invalid idle connection on borrow");
                        self.free_active_slot();
                        continue;
                    }
                    return Ok(conn);
                }
                Attempt::Create => match self.factory.connect().await {
                    Ok(conn) => return Ok(PooledConnection::new(conn)),
                    Err(e) => {
                        self.free_active_slot();
                        return Err(e);
                    }
                },
                Attempt::Wait => {
                    tokio::select! {
                        () = self.released.notified() => {}
                        () = cancel.cancelled() => {
                            return Err(Error::Interrupted("pool acquire cancelled".to_string()));
                        }
                        () = tokio::time::sleep_until(deadline) => {
                            return Err(Error::Timeout(format!(
                                "no connection available within {:?}",
                                self.options.wait_timeout
                            )));
                        }
                    }
                }
            }
        }
    }

    /// Return a borrowed connection.
    ///
    /// The connection goes back on the idle list when it passes the
    /// `test_on_return` probe (if enabled), is within its lifetime, and the
    /// idle list has room; otherwise it is closed by dropping it.
    pub async fn release(&self, mut conn: PooledConnection<F::Connection>) {
        let within_lifetime = !self.lifetime_exceeded(&conn);
        let valid = if self.options.test_on_return && within_lifetime {
            conn.conn.is_valid().await
        } else {
            true
        };

        {
            let mut state = self.state.lock();
            state.active = state.active.saturating_sub(1);
            if within_lifetime && valid && state.idle.len() < self.options.max_idle {
                state.idle.push_back(IdleConnection {
                    conn,
                    idled_at: Instant::now(),
                });
            }
        }
        self.released.notify_one();
    }

    /// Drop idle connections past `idle_timeout` or `max_lifetime`, probing
    /// the remainder when `test_while_idle`. Returns the count closed.
    pub async fn sweep_idle(&self) -> usize {
        let now = Instant::now();
        let candidates: Vec<IdleConnection<F::Connection>> =
            { self.state.lock().idle.drain(..).collect() };

        let mut kept = Vec::with_capacity(candidates.len());
        let mut dropped = 0usize;

        for mut idle in candidates {
            let timed_out = self
                .options
                .idle_timeout
                .is_some_and(|timeout| now.duration_since(idle.idled_at) >= timeout);
            if timed_out || self.lifetime_exceeded(&idle.conn) {
                dropped += 1;
                continue;
            }
            if self.options.test_while_idle && !idle.conn.conn.is_valid().await {
                dropped += 1;
                continue;
            }
            kept.push(idle);
        }

        let mut state = self.state.lock();
        // Releases that happened while probing stay behind the survivors.
        for idle in kept.into_iter().rev() {
            state.idle.push_front(idle);
        }
        drop(state);

        if dropped > 0 {
            debug!(dropped, "pool sweep closed idle connections");
        }
        dropped
    }

    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            active: state.active,
            idle: state.idle.len(),
        }
    }

    fn lifetime_exceeded(&self, conn: &PooledConnection<F::Connection>) -> bool {
        self.options
            .max_lifetime
            .is_some_and(|lifetime| conn.age() >= lifetime)
    }

    fn free_active_slot(&self) {
        let mut state = self.state.lock();
        state.active = state.active.saturating_sub(1);
        drop(state);
        self.released.notify_one();
    }
}

impl<F: ConnectionFactory + Sync> ConnectionPool<F> {
    /// Spawn a background task that sweeps the idle list on an interval
    /// until the token is cancelled.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        pool.sweep_idle().await;
                    }
                }
            }
        })
    }
}
