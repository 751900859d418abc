//! Consistent-hash stream router
//!
//! Each physical node contributes `V` virtual points hashed from
//! `"{node_id}#{index}"` (decimal index, fixed for cross-version
//! stability). The ring is an immutable snapshot swapped on membership
//! change, so lookups only clone an `Arc`. Stream placement is CRC32-IEEE
//! over the UTF-8 stream id.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::node::Node;
use crate::{Error, Result};

pub const DEFAULT_VIRTUAL_NODES: usize = 150;

#[derive(Default)]
struct RingSnapshot {
    /// Sorted virtual point hashes.
    hashes: Vec<u32>,
    /// Virtual point hash -> owning node id.
    owners: HashMap<u32, String>,
}

impl RingSnapshot {
    fn build(node_ids: impl Iterator<Item = impl AsRef<str>>, virtual_nodes: usize) -> Self {
        let mut owners = HashMap::new();
        for node_id in node_ids {
            let node_id = node_id.as_ref();
            for index in 0..virtual_nodes {
                let point = hash_key(&format!("{node_id}#{index}"));
                owners.insert(point, node_id.to_string());
            }
        }
        let mut hashes: Vec<u32> = owners.keys().copied().collect();
        hashes.sort_unstable();
        Self { hashes, owners }
    }

    /// Index of the first virtual point at or after `hash`, wrapping.
    fn primary_index(&self, hash: u32) -> Option<usize> {
        if self.hashes.is_empty() {
            return None;
        }
        let at = self.hashes.partition_point(|&point| point < hash);
        Some(if at == self.hashes.len() { 0 } else { at })
    }

    fn owner_at(&self, index: usize) -> Option<&str> {
        self.hashes
            .get(index)
            .and_then(|point| self.owners.get(point))
            .map(String::as_str)
    }
}

/// A stream assignment that changed during a membership change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    pub stream_id: String,
    pub from: String,
    pub to: String,
}

pub struct ConsistentHashRouter {
    virtual_nodes: usize,
    nodes: RwLock<HashMap<String, Arc<Node>>>,
    ring: RwLock<Arc<RingSnapshot>>,
}

impl Default for ConsistentHashRouter {
    fn default() -> Self {
        Self::new(DEFAULT_VIRTUAL_NODES)
    }
}

impl ConsistentHashRouter {
    #[must_use]
    pub fn new(virtual_nodes: usize) -> Self {
        Self {
            virtual_nodes: virtual_nodes.max(1),
            nodes: RwLock::new(HashMap::new()),
            ring: RwLock::new(Arc::new(RingSnapshot::default())),
        }
    }

    pub fn add_node(&self, node: Arc<Node>) -> Result<()> {
        if node.id.is_empty() {
            return Err(Error::InvalidArgument("node id must not be empty".to_string()));
        }
        let mut nodes = self.nodes.write();
        if nodes.contains_key(&node.id) {
            return Err(Error::AlreadyExists(format!(
                "node '{}' is already on the ring",
                node.id
            )));
        }
        nodes.insert(node.id.clone(), node);
        self.rebuild(&nodes);
        Ok(())
    }

    pub fn remove_node(&self, node_id: &str) -> Result<()> {
        let mut nodes = self.nodes.write();
        if nodes.remove(node_id).is_none() {
            return Err(Error::NotFound(format!("node '{node_id}' is not on the ring")));
        }
        self.rebuild(&nodes);
        Ok(())
    }

    /// Rebuild off to the side, swap under a short write lock.
    fn rebuild(&self, nodes: &HashMap<String, Arc<Node>>) {
        let snapshot = Arc::new(RingSnapshot::build(nodes.keys(), self.virtual_nodes));
        debug!(
            nodes = nodes.len(),
            points = snapshot.hashes.len(),
            "hash ring rebuilt"
        );
        *self.ring.write() = snapshot;
    }

    /// The node owning `stream_id`. Stable while membership is unchanged.
    pub fn get_node(&self, stream_id: &str) -> Result<Arc<Node>> {
        let ring = Arc::clone(&self.ring.read());
        let index = ring
            .primary_index(hash_key(stream_id))
            .ok_or_else(|| Error::Unavailable("hash ring is empty".to_string()))?;
        let owner = ring
            .owner_at(index)
            .ok_or_else(|| Error::Unavailable("hash ring is empty".to_string()))?;
        self.node_by_id(owner)
    }

    /// Primary plus up to `replicas` distinct successors, in ring order.
    ///
    /// `replicas` is clamped to `N - 1` so the result is always pairwise
    /// distinct.
    pub fn get_node_with_replicas(
        &self,
        stream_id: &str,
        replicas: usize,
    ) -> Result<Vec<Arc<Node>>> {
        let ring = Arc::clone(&self.ring.read());
        let start = ring
            .primary_index(hash_key(stream_id))
            .ok_or_else(|| Error::Unavailable("hash ring is empty".to_string()))?;

        let node_count = self.nodes.read().len();
        let wanted = replicas.min(node_count.saturating_sub(1)) + 1;

        let mut selected: Vec<String> = Vec::with_capacity(wanted);
        for offset in 0..ring.hashes.len() {
            let index = (start + offset) % ring.hashes.len();
            let Some(owner) = ring.owner_at(index) else {
                continue;
            };
            if !selected.iter().any(|id| id == owner) {
                selected.push(owner.to_string());
                if selected.len() == wanted {
                    break;
                }
            }
        }

        selected.iter().map(|id| self.node_by_id(id)).collect()
    }

    /// Recompute ownership for every stream in `current` and report the
    /// ones that moved. On a single node add/remove only streams whose
    /// hash lies on the changed arcs show up here.
    #[must_use]
    pub fn rebalance(&self, current: &HashMap<String, String>) -> Vec<Migration> {
        let mut migrations = Vec::new();
        for (stream_id, old_node_id) in current {
            let Ok(new_node) = self.get_node(stream_id) else {
                continue;
            };
            if &new_node.id != old_node_id {
                migrations.push(Migration {
                    stream_id: stream_id.clone(),
                    from: old_node_id.clone(),
                    to: new_node.id.clone(),
                });
            }
        }
        migrations
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.read().len()
    }

    #[must_use]
    pub fn node_ids(&self) -> Vec<String> {
        self.nodes.read().keys().cloned().collect()
    }

    fn node_by_id(&self, node_id: &str) -> Result<Arc<Node>> {
        self.nodes
            .read()
            .get(node_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("node '{node_id}' is not on the ring")))
    }
}

/// Stable 32-bit placement hash (CRC32-IEEE over UTF-8 bytes).
#[must_use]
pub fn hash_key(key: &str) -> u32 {
    crc32fast::hash(key.as_bytes())
}
