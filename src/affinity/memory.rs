use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{AffinityError, AffinityLookup, AffinityUpdater};
use crate::types::{ClusterId, ServerId};

/// In-process affinity store. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryAffinityStore {
    entries: Arc<RwLock<HashMap<ClusterId, ServerId>>>,
    writes: Arc<AtomicU64>,
}

impl MemoryAffinityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an entry without counting it as a write.
    pub fn insert(&self, cluster: ClusterId, server: ServerId) {
        self.entries.write().insert(cluster, server);
    }

    pub fn current(&self, cluster: &ClusterId) -> Option<ServerId> {
        self.entries.read().get(cluster).cloned()
    }

    /// Number of updates applied through [`AffinityUpdater::apply`].
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl AffinityLookup for MemoryAffinityStore {
    async fn lookup(&self, cluster: &ClusterId) -> Result<ServerId, AffinityError> {
        self.current(cluster)
            .ok_or_else(|| AffinityError::NoRecord { record: cluster.to_string() })
    }
}

#[async_trait]
impl AffinityUpdater for MemoryAffinityStore {
    async fn apply(&self, cluster: &ClusterId, server: &ServerId) -> Result<(), AffinityError> {
        self.entries.write().insert(cluster.clone(), server.clone());
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_clusters_are_independent() {
        let store = MemoryAffinityStore::new();
        store.apply(&ClusterId::from(1), &ServerId::new("a")).await.unwrap();
        store.apply(&ClusterId::from(2), &ServerId::new("b")).await.unwrap();

        assert_eq!(store.lookup(&ClusterId::from(1)).await.unwrap(), ServerId::new("a"));
        assert_eq!(store.lookup(&ClusterId::from(2)).await.unwrap(), ServerId::new("b"));
        assert!(matches!(
            store.lookup(&ClusterId::from(3)).await,
            Err(AffinityError::NoRecord { .. })
        ));
    }

    #[tokio::test]
    async fn test_clone_shares_state() {
        let store = MemoryAffinityStore::new();
        let other = store.clone();
        store.apply(&ClusterId::from(1), &ServerId::new("a")).await.unwrap();

        assert_eq!(other.current(&ClusterId::from(1)), Some(ServerId::new("a")));
        assert_eq!(other.write_count(), 1);
    }

    #[test]
    fn test_insert_is_not_a_write() {
        let store = MemoryAffinityStore::new();
        store.insert(ClusterId::from(1), ServerId::new("a"));
        assert_eq!(store.write_count(), 0);
    }
}
