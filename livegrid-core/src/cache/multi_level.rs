//! Two-level cache composition
//!
//! L1 is expected to be small and fast, L2 larger. A hit in L2 is promoted
//! into L1 so subsequent reads are served without touching L2.

use std::sync::Arc;

use super::Cache;

pub struct MultiLevelCache<V> {
    l1: Arc<Cache<V>>,
    l2: Arc<Cache<V>>,
}

impl<V: Clone + Send + Sync + 'static> MultiLevelCache<V> {
    #[must_use]
    pub fn new(l1: Arc<Cache<V>>, l2: Arc<Cache<V>>) -> Self {
        Self { l1, l2 }
    }

    /// L1 lookup first; an L2 hit is promoted to L1 before returning.
    pub fn get(&self, key: &str) -> Option<V> {
        if let Some(value) = self.l1.get(key) {
            return Some(value);
        }
        if let Some(value) = self.l2.get(key) {
            self.l1.set(key, value.clone());
            return Some(value);
        }
        None
    }

    /// Write through to both levels.
    pub fn set(&self, key: &str, value: V) {
        self.l1.set(key, value.clone());
        self.l2.set(key, value);
    }

    /// Remove from both levels. Returns whether either level held the key.
    pub fn delete(&self, key: &str) -> bool {
        let in_l1 = self.l1.delete(key);
        let in_l2 = self.l2.delete(key);
        in_l1 || in_l2
    }

    #[must_use]
    pub fn l1(&self) -> &Cache<V> {
        &self.l1
    }

    #[must_use]
    pub fn l2(&self) -> &Cache<V> {
        &self.l2
    }
}
