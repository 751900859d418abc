//! Cluster nodes and their live metrics
//!
//! Metric counters are plain atomics so the balancer's bookkeeping never
//! takes the structural locks that guard node membership.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// EWMA smoothing: `new = 0.9 * old + 0.1 * sample`.
const EWMA_KEEP: f64 = 0.9;
const EWMA_SAMPLE: f64 = 0.1;

#[derive(Debug, Default)]
struct NodeMetrics {
    active_connections: AtomicUsize,
    total_requests: AtomicU64,
    failed_requests: AtomicU64,
    /// EWMA latency in microseconds.
    average_latency_us: AtomicU64,
}

#[derive(Debug)]
pub struct Node {
    pub id: String,
    pub address: String,
    weight: u32,
    /// 0 = unbounded.
    pub max_connections: usize,
    healthy: AtomicBool,
    metrics: NodeMetrics,
}

/// Point-in-time view of a node's metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeMetricsSnapshot {
    pub active_connections: usize,
    pub total_requests: u64,
    pub failed_requests: u64,
    pub average_latency_us: u64,
}

impl Node {
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            weight: 1,
            max_connections: 0,
            healthy: AtomicBool::new(true),
            metrics: NodeMetrics::default(),
        }
    }

    /// Weights below 1 are clamped up.
    #[must_use]
    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight.max(1);
        self
    }

    #[must_use]
    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    #[must_use]
    pub fn weight(&self) -> u32 {
        self.weight
    }

    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Release);
    }

    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.metrics.active_connections.load(Ordering::Relaxed)
    }

    pub fn connection_opened(&self) {
        self.metrics
            .active_connections
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        let _ = self.metrics.active_connections.fetch_update(
            Ordering::Relaxed,
            Ordering::Relaxed,
            |current| current.checked_sub(1),
        );
    }

    /// Record a completed request and fold its latency into the EWMA.
    pub fn record_request(&self, success: bool, latency: Duration) {
        let previous_total = self.metrics.total_requests.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.metrics.failed_requests.fetch_add(1, Ordering::Relaxed);
        }

        let sample = latency.as_micros() as f64;
        let updated = if previous_total == 0 {
            sample
        } else {
            let old = self.metrics.average_latency_us.load(Ordering::Relaxed) as f64;
            EWMA_KEEP * old + EWMA_SAMPLE * sample
        };
        self.metrics
            .average_latency_us
            .store(updated as u64, Ordering::Relaxed);
    }

    /// Healthy and below its connection cap.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.is_healthy()
            && (self.max_connections == 0 || self.active_connections() < self.max_connections)
    }

    #[must_use]
    pub fn metrics(&self) -> NodeMetricsSnapshot {
        NodeMetricsSnapshot {
            active_connections: self.active_connections(),
            total_requests: self.metrics.total_requests.load(Ordering::Relaxed),
            failed_requests: self.metrics.failed_requests.load(Ordering::Relaxed),
            average_latency_us: self.metrics.average_latency_us.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weight_clamped_to_one() {
        let node = Node::new("n1", "127.0.0.1:1935").with_weight(0);
        assert_eq!(node.weight(), 1);
    }

    #[test]
    fn test_connection_accounting_never_underflows() {
        let node = Node::new("n1", "127.0.0.1:1935");
        node.connection_closed();
        assert_eq!(node.active_connections(), 0);

        node.connection_opened();
        node.connection_opened();
        node.connection_closed();
        assert_eq!(node.active_connections(), 1);
    }

    #[test]
    fn test_availability_respects_cap_and_health() {
        let node = Node::new("n1", "127.0.0.1:1935").with_max_connections(1);
        assert!(node.is_available());

        node.connection_opened();
        assert!(!node.is_available());

        node.connection_closed();
        node.set_healthy(false);
        assert!(!node.is_available());
    }

    #[test]
    fn test_latency_ewma() {
        let node = Node::new("n1", "127.0.0.1:1935");
        node.record_request(true, Duration::from_micros(1000));
        assert_eq!(node.metrics().average_latency_us, 1000);

        node.record_request(false, Duration::from_micros(2000));
        let snapshot = node.metrics();
        // 0.9 * 1000 + 0.1 * 2000
        assert_eq!(snapshot.average_latency_us, 1100);
        assert_eq!(snapshot.total_requests, 2);
        assert_eq!(snapshot.failed_requests, 1);
    }
}
