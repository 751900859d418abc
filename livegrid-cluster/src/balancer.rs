//! Load balancing across cluster nodes
//!
//! Strategy selection over the healthy subset of registered nodes. Nodes
//! are excluded when unhealthy or at their connection cap. The health
//! checker periodically drives an implementation-supplied probe and flips
//! node health.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::node::Node;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    RoundRobin,
    LeastConnections,
    WeightedRoundRobin,
    KeyHash,
}

pub struct LoadBalancer {
    nodes: RwLock<Vec<Arc<Node>>>,
    strategy: Strategy,
    counter: AtomicUsize,
}

impl LoadBalancer {
    #[must_use]
    pub fn new(strategy: Strategy) -> Self {
        Self {
            nodes: RwLock::new(Vec::new()),
            strategy,
            counter: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn add_node(&self, node: Arc<Node>) -> Result<()> {
        let mut nodes = self.nodes.write();
        if nodes.iter().any(|n| n.id == node.id) {
            return Err(Error::AlreadyExists(format!(
                "node '{}' is already registered",
                node.id
            )));
        }
        nodes.push(node);
        Ok(())
    }

    pub fn remove_node(&self, node_id: &str) -> Result<()> {
        let mut nodes = self.nodes.write();
        let before = nodes.len();
        nodes.retain(|n| n.id != node_id);
        if nodes.len() == before {
            return Err(Error::NotFound(format!("node '{node_id}' is not registered")));
        }
        Ok(())
    }

    #[must_use]
    pub fn nodes(&self) -> Vec<Arc<Node>> {
        self.nodes.read().clone()
    }

    #[must_use]
    pub fn node(&self, node_id: &str) -> Option<Arc<Node>> {
        self.nodes.read().iter().find(|n| n.id == node_id).cloned()
    }

    /// Registered nodes that are healthy and under their connection cap,
    /// in registration order.
    #[must_use]
    pub fn available_nodes(&self) -> Vec<Arc<Node>> {
        self.nodes
            .read()
            .iter()
            .filter(|n| n.is_available())
            .cloned()
            .collect()
    }

    /// Pick a node. `KeyHash` needs a client key, use
    /// [`select_with_key`](Self::select_with_key) instead.
    pub fn select(&self) -> Result<Arc<Node>> {
        if self.strategy == Strategy::KeyHash {
            return Err(Error::InvalidArgument(
                "key-hash selection requires a client key".to_string(),
            ));
        }
        self.pick(None)
    }

    /// Pick a node for a client key. Strategies other than `KeyHash`
    /// ignore the key.
    pub fn select_with_key(&self, key: &str) -> Result<Arc<Node>> {
        self.pick(Some(key))
    }

    fn pick(&self, key: Option<&str>) -> Result<Arc<Node>> {
        let available = self.available_nodes();
        if available.is_empty() {
            return Err(Error::Unavailable("no healthy nodes".to_string()));
        }

        let selected = match self.strategy {
            Strategy::RoundRobin => self.round_robin(&available),
            Strategy::LeastConnections => least_connections(&available),
            Strategy::WeightedRoundRobin => self.weighted_round_robin(&available),
            Strategy::KeyHash => {
                let key = key.ok_or_else(|| {
                    Error::InvalidArgument("key-hash selection requires a client key".to_string())
                })?;
                key_hash(&available, key)
            }
        };
        Ok(selected)
    }

    fn round_robin(&self, available: &[Arc<Node>]) -> Arc<Node> {
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % available.len();
        Arc::clone(&available[index])
    }

    fn weighted_round_robin(&self, available: &[Arc<Node>]) -> Arc<Node> {
        let total_weight: u64 = available.iter().map(|n| u64::from(n.weight())).sum();
        if total_weight == 0 {
            return self.round_robin(available);
        }

        let target = (self.counter.fetch_add(1, Ordering::Relaxed) as u64) % total_weight;
        let mut accumulated = 0u64;
        for node in available {
            accumulated += u64::from(node.weight());
            if accumulated > target {
                return Arc::clone(node);
            }
        }
        // Unreachable while total_weight > 0; keep the last node as backstop.
        Arc::clone(&available[available.len() - 1])
    }
}

/// Minimum active connections; ties resolve to the first-seen node.
fn least_connections(available: &[Arc<Node>]) -> Arc<Node> {
    let node = available
        .iter()
        .min_by_key(|n| n.active_connections())
        .unwrap_or(&available[0]);
    Arc::clone(node)
}

/// Polynomial rolling hash of the client key.
fn key_hash(available: &[Arc<Node>], key: &str) -> Arc<Node> {
    let mut hash = 0u64;
    for byte in key.bytes() {
        hash = hash.wrapping_mul(31).wrapping_add(u64::from(byte));
    }
    Arc::clone(&available[(hash % available.len() as u64) as usize])
}

/// Node liveness probe supplied by the embedding system.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn check(&self, node: &Node) -> bool;
}

/// Periodically probes every registered node and flips its health flag.
pub struct HealthChecker {
    balancer: Arc<LoadBalancer>,
    probe: Arc<dyn HealthProbe>,
    interval: Duration,
}

impl HealthChecker {
    #[must_use]
    pub fn new(balancer: Arc<LoadBalancer>, probe: Arc<dyn HealthProbe>, interval: Duration) -> Self {
        Self {
            balancer,
            probe,
            interval,
        }
    }

    /// Run the probe loop until the token is cancelled.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        info!("health checker stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        for node in self.balancer.nodes() {
                            let healthy = self.probe.check(&node).await;
                            if healthy != node.is_healthy() {
                                debug!(node_id = %node.id, healthy, "node health changed");
                            }
                            node.set_healthy(healthy);
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicBool;

    fn balancer_with(strategy: Strategy, specs: &[(&str, u32)]) -> LoadBalancer {
        let balancer = LoadBalancer::new(strategy);
        for (id, weight) in specs {
            balancer
                .add_node(Arc::new(
                    Node::new(*id, format!("{id}.local:1935")).with_weight(*weight),
                ))
                .expect("add node");
        }
        balancer
    }

    #[test]
    fn test_round_robin_fairness() {
        let balancer = balancer_with(Strategy::RoundRobin, &[("n1", 1), ("n2", 1), ("n3", 1)]);

        let mut picks: HashMap<String, usize> = HashMap::new();
        for _ in 0..30 {
            let node = balancer.select().expect("select");
            *picks.entry(node.id.clone()).or_default() += 1;
        }
        assert_eq!(picks["n1"], 10);
        assert_eq!(picks["n2"], 10);
        assert_eq!(picks["n3"], 10);
    }

    #[test]
    fn test_least_connections_prefers_idle_node() {
        let balancer =
            balancer_with(Strategy::LeastConnections, &[("n1", 1), ("n2", 1)]);
        let n1 = balancer.node("n1").expect("n1");
        n1.connection_opened();
        n1.connection_opened();

        let selected = balancer.select().expect("select");
        assert_eq!(selected.id, "n2");

        // After the selection is accounted, no other node is lighter.
        selected.connection_opened();
        let lightest = balancer
            .available_nodes()
            .iter()
            .map(|n| n.active_connections())
            .min()
            .expect("nodes");
        assert!(selected.active_connections() <= lightest + 1);
    }

    #[test]
    fn test_least_connections_tie_breaks_first_seen() {
        let balancer =
            balancer_with(Strategy::LeastConnections, &[("n1", 1), ("n2", 1), ("n3", 1)]);
        assert_eq!(balancer.select().expect("select").id, "n1");
    }

    #[test]
    fn test_weighted_round_robin_follows_weights() {
        let balancer =
            balancer_with(Strategy::WeightedRoundRobin, &[("n1", 3), ("n2", 1)]);

        let mut picks: HashMap<String, usize> = HashMap::new();
        for _ in 0..40 {
            let node = balancer.select().expect("select");
            *picks.entry(node.id.clone()).or_default() += 1;
        }
        assert_eq!(picks["n1"], 30);
        assert_eq!(picks["n2"], 10);
    }

    #[test]
    fn test_key_hash_is_sticky() {
        let balancer = balancer_with(Strategy::KeyHash, &[("n1", 1), ("n2", 1), ("n3", 1)]);

        let first = balancer.select_with_key("viewer-77").expect("select").id.clone();
        for _ in 0..10 {
            assert_eq!(
                balancer.select_with_key("viewer-77").expect("select").id,
                first
            );
        }
        // Distinct keys spread across more than one node.
        let spread: HashSet<String> = (0..50)
            .map(|i| {
                balancer
                    .select_with_key(&format!("viewer-{i}"))
                    .expect("select")
                    .id
                    .clone()
            })
            .collect();
        assert!(spread.len() > 1);
    }

    #[test]
    fn test_key_hash_requires_key() {
        let balancer = balancer_with(Strategy::KeyHash, &[("n1", 1)]);
        assert!(matches!(
            balancer.select(),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_unhealthy_and_saturated_nodes_excluded() {
        let balancer = balancer_with(Strategy::RoundRobin, &[("n1", 1), ("n2", 1)]);
        balancer.node("n1").expect("n1").set_healthy(false);

        for _ in 0..5 {
            assert_eq!(balancer.select().expect("select").id, "n2");
        }

        balancer.node("n1").expect("n1").set_healthy(true);
        let capped = Arc::new(Node::new("n3", "n3.local:1935").with_max_connections(1));
        capped.connection_opened();
        balancer.add_node(capped).expect("add");
        let available: Vec<String> = balancer
            .available_nodes()
            .iter()
            .map(|n| n.id.clone())
            .collect();
        assert_eq!(available, vec!["n1", "n2"]);
    }

    #[test]
    fn test_no_healthy_nodes_is_unavailable() {
        let balancer = balancer_with(Strategy::RoundRobin, &[("n1", 1)]);
        balancer.node("n1").expect("n1").set_healthy(false);
        assert!(matches!(balancer.select(), Err(Error::Unavailable(_))));
    }

    struct FlagProbe {
        healthy: AtomicBool,
    }

    #[async_trait]
    impl HealthProbe for FlagProbe {
        async fn check(&self, _node: &Node) -> bool {
            self.healthy.load(Ordering::Relaxed)
        }
    }

    #[tokio::test]
    async fn test_health_checker_flips_nodes() {
        let balancer = Arc::new(balancer_with(Strategy::RoundRobin, &[("n1", 1)]));
        let probe = Arc::new(FlagProbe {
            healthy: AtomicBool::new(false),
        });
        let cancel = CancellationToken::new();

        let handle = HealthChecker::new(
            Arc::clone(&balancer),
            Arc::clone(&probe) as Arc<dyn HealthProbe>,
            Duration::from_millis(10),
        )
        .spawn(cancel.clone());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!balancer.node("n1").expect("n1").is_healthy());

        probe.healthy.store(true, Ordering::Relaxed);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(balancer.node("n1").expect("n1").is_healthy());

        cancel.cancel();
        handle.await.expect("health checker task");
    }
}
