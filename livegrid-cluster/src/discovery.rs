//! In-memory service discovery
//!
//! Primary map plus by-name and by-node indexes, kept consistent under one
//! write lock. Status changes fan out to watcher queues that are bounded
//! and lossy: a full queue drops the newest event, a closed one is pruned.
//! Watchers are advisory.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::balancer::Strategy;
use crate::{Error, Result};

/// Services silent for this long are swept to `Unhealthy`.
pub const STALE_AFTER: Duration = Duration::from_secs(120);

/// Watcher queue depth before events are dropped.
const WATCHER_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub id: String,
    pub name: String,
    pub address: String,
    pub node_id: String,
    pub status: ServiceStatus,
    pub version: String,
    pub tags: Vec<String>,
    pub start_time: DateTime<Utc>,
    pub last_health_check: DateTime<Utc>,
}

impl ServiceInfo {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        address: impl Into<String>,
        node_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            address: address.into(),
            node_id: node_id.into(),
            status: ServiceStatus::Healthy,
            version: String::new(),
            tags: Vec::new(),
            start_time: now,
            last_health_check: now,
        }
    }

    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    #[must_use]
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceEventKind {
    Registered,
    Deregistered,
    Updated,
    HealthChanged,
}

#[derive(Debug, Clone)]
pub struct ServiceEvent {
    pub kind: ServiceEventKind,
    pub service: ServiceInfo,
}

#[derive(Default)]
struct DiscoveryInner {
    services: HashMap<String, ServiceInfo>,
    by_name: HashMap<String, HashSet<String>>,
    by_node: HashMap<String, HashSet<String>>,
}

impl DiscoveryInner {
    fn index(&mut self, service: &ServiceInfo) {
        self.by_name
            .entry(service.name.clone())
            .or_default()
            .insert(service.id.clone());
        self.by_node
            .entry(service.node_id.clone())
            .or_default()
            .insert(service.id.clone());
    }

    fn unindex(&mut self, service: &ServiceInfo) {
        if let Some(ids) = self.by_name.get_mut(&service.name) {
            ids.remove(&service.id);
            if ids.is_empty() {
                self.by_name.remove(&service.name);
            }
        }
        if let Some(ids) = self.by_node.get_mut(&service.node_id) {
            ids.remove(&service.id);
            if ids.is_empty() {
                self.by_node.remove(&service.node_id);
            }
        }
    }
}

#[derive(Default)]
pub struct ServiceDiscovery {
    inner: RwLock<DiscoveryInner>,
    watchers: Mutex<Vec<mpsc::Sender<ServiceEvent>>>,
}

impl ServiceDiscovery {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, service: ServiceInfo) -> Result<()> {
        if service.id.is_empty() {
            return Err(Error::InvalidArgument(
                "service id must not be empty".to_string(),
            ));
        }
        {
            let mut inner = self.inner.write();
            if inner.services.contains_key(&service.id) {
                return Err(Error::AlreadyExists(format!(
                    "service '{}' is already registered",
                    service.id
                )));
            }
            inner.index(&service);
            inner.services.insert(service.id.clone(), service.clone());
        }
        debug!(service_id = %service.id, name = %service.name, "service registered");
        self.emit(ServiceEventKind::Registered, service);
        Ok(())
    }

    pub fn deregister(&self, service_id: &str) -> Result<()> {
        let service = {
            let mut inner = self.inner.write();
            let service = inner
                .services
                .remove(service_id)
                .ok_or_else(|| Error::NotFound(format!("service '{service_id}'")))?;
            inner.unindex(&service);
            service
        };
        debug!(service_id = %service_id, "service deregistered");
        self.emit(ServiceEventKind::Deregistered, service);
        Ok(())
    }

    /// Replace a registration in place (address, version, tags).
    ///
    /// Name and node changes re-index; status is preserved from the
    /// existing record, use [`set_status`](Self::set_status) for that.
    pub fn update(&self, mut service: ServiceInfo) -> Result<()> {
        {
            let mut inner = self.inner.write();
            let existing = inner
                .services
                .get(&service.id)
                .ok_or_else(|| Error::NotFound(format!("service '{}'", service.id)))?
                .clone();
            service.status = existing.status;
            inner.unindex(&existing);
            inner.index(&service);
            inner.services.insert(service.id.clone(), service.clone());
        }
        self.emit(ServiceEventKind::Updated, service);
        Ok(())
    }

    pub fn set_status(&self, service_id: &str, status: ServiceStatus) -> Result<()> {
        let changed = {
            let mut inner = self.inner.write();
            let service = inner
                .services
                .get_mut(service_id)
                .ok_or_else(|| Error::NotFound(format!("service '{service_id}'")))?;
            let changed = service.status != status;
            service.status = status;
            service.last_health_check = Utc::now();
            changed.then(|| service.clone())
        };
        if let Some(service) = changed {
            self.emit(ServiceEventKind::HealthChanged, service);
        }
        Ok(())
    }

    /// Record a heartbeat without changing status.
    pub fn heartbeat(&self, service_id: &str) -> Result<()> {
        let mut inner = self.inner.write();
        let service = inner
            .services
            .get_mut(service_id)
            .ok_or_else(|| Error::NotFound(format!("service '{service_id}'")))?;
        service.last_health_check = Utc::now();
        Ok(())
    }

    #[must_use]
    pub fn get(&self, service_id: &str) -> Option<ServiceInfo> {
        self.inner.read().services.get(service_id).cloned()
    }

    #[must_use]
    pub fn by_name(&self, name: &str) -> Vec<ServiceInfo> {
        let inner = self.inner.read();
        inner
            .by_name
            .get(name)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.services.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    #[must_use]
    pub fn by_node(&self, node_id: &str) -> Vec<ServiceInfo> {
        let inner = self.inner.read();
        inner
            .by_node
            .get(node_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.services.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    #[must_use]
    pub fn service_count(&self) -> usize {
        self.inner.read().services.len()
    }

    /// Subscribe to service change events.
    #[must_use]
    pub fn watch(&self) -> mpsc::Receiver<ServiceEvent> {
        let (tx, rx) = mpsc::channel(WATCHER_QUEUE_CAPACITY);
        self.watchers.lock().push(tx);
        rx
    }

    /// Mark services whose last heartbeat is older than [`STALE_AFTER`]
    /// unhealthy. Returns how many were flipped.
    pub fn sweep_stale(&self) -> usize {
        let stale_after =
            ChronoDuration::from_std(STALE_AFTER).unwrap_or_else(|_| ChronoDuration::seconds(120));
        let cutoff = Utc::now() - stale_after;

        let flipped: Vec<ServiceInfo> = {
            let mut inner = self.inner.write();
            inner
                .services
                .values_mut()
                .filter(|s| s.status != ServiceStatus::Unhealthy && s.last_health_check < cutoff)
                .map(|s| {
                    s.status = ServiceStatus::Unhealthy;
                    s.clone()
                })
                .collect()
        };

        for service in &flipped {
            warn!(service_id = %service.id, "service marked unhealthy by sweep");
            self.emit(ServiceEventKind::HealthChanged, service.clone());
        }
        flipped.len()
    }

    /// Run [`sweep_stale`](Self::sweep_stale) on an interval until cancelled.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let discovery = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        discovery.sweep_stale();
                    }
                }
            }
        })
    }

    /// Fan out to every live watcher; full queues lose this event and
    /// closed queues are pruned.
    fn emit(&self, kind: ServiceEventKind, service: ServiceInfo) {
        let mut watchers = self.watchers.lock();
        watchers.retain(|tx| {
            match tx.try_send(ServiceEvent {
                kind,
                service: service.clone(),
            }) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    debug!("watcher queue full, dropping event");
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }
}

/// Strategy-based selection over the healthy instances of a named service.
pub struct ServiceSelector {
    discovery: Arc<ServiceDiscovery>,
    strategy: Strategy,
    counter: AtomicUsize,
}

impl ServiceSelector {
    #[must_use]
    pub fn new(discovery: Arc<ServiceDiscovery>, strategy: Strategy) -> Self {
        Self {
            discovery,
            strategy,
            counter: AtomicUsize::new(0),
        }
    }

    /// Pick a healthy instance of `service_name`.
    ///
    /// Services carry no connection counters, so the connection- and
    /// weight-based strategies degrade to round robin here.
    pub fn select(&self, service_name: &str) -> Result<ServiceInfo> {
        self.pick(service_name, None)
    }

    pub fn select_with_key(&self, service_name: &str, key: &str) -> Result<ServiceInfo> {
        self.pick(service_name, Some(key))
    }

    fn pick(&self, service_name: &str, key: Option<&str>) -> Result<ServiceInfo> {
        let mut healthy: Vec<ServiceInfo> = self
            .discovery
            .by_name(service_name)
            .into_iter()
            .filter(|s| s.status == ServiceStatus::Healthy)
            .collect();
        if healthy.is_empty() {
            return Err(Error::Unavailable(format!(
                "no healthy instances of '{service_name}'"
            )));
        }
        // Index order is set-driven; sort for deterministic selection.
        healthy.sort_by(|a, b| a.id.cmp(&b.id));

        let index = match (self.strategy, key) {
            (Strategy::KeyHash, Some(key)) => {
                let mut hash = 0u64;
                for byte in key.bytes() {
                    hash = hash.wrapping_mul(31).wrapping_add(u64::from(byte));
                }
                (hash % healthy.len() as u64) as usize
            }
            (Strategy::KeyHash, None) => {
                return Err(Error::InvalidArgument(
                    "key-hash selection requires a client key".to_string(),
                ));
            }
            _ => self.counter.fetch_add(1, Ordering::Relaxed) % healthy.len(),
        };
        Ok(healthy.swap_remove(index))
    }
}
