//! Last known-good server per cluster, kept in an external store.
//!
//! Reads and writes are best effort. A failed lookup is treated as "no
//! hint" and a failed update is only logged; neither can fail a resolution.

pub mod command;
pub mod dns;
pub mod memory;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::types::{ClusterId, ServerId};

pub use command::CommandAffinityUpdater;
pub use dns::{DnsAffinityConfig, DnsAffinityLookup};
pub use memory::MemoryAffinityStore;

/// Upper bound on a single `get`, on top of whatever the backend enforces.
pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
pub enum AffinityError {
    #[error("affinity lookup for {record} failed: {source}")]
    Lookup {
        record: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("no affinity record {record}")]
    NoRecord { record: String },

    #[error("malformed affinity record {record}: {value:?}")]
    Malformed { record: String, value: String },

    #[error("affinity operation on {record} timed out after {after:?}")]
    Timeout { record: String, after: Duration },

    #[error("affinity update of cluster {cluster} failed: {reason}")]
    Update { cluster: ClusterId, reason: String },

    #[error("failed to run affinity update command {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Read side of an affinity backend.
#[async_trait]
pub trait AffinityLookup: Send + Sync {
    async fn lookup(&self, cluster: &ClusterId) -> Result<ServerId, AffinityError>;
}

/// Write side of an affinity backend. Application may be asynchronous:
/// a later lookup is not guaranteed to observe the write.
#[async_trait]
pub trait AffinityUpdater: Send + Sync {
    async fn apply(&self, cluster: &ClusterId, server: &ServerId) -> Result<(), AffinityError>;
}

/// Affinity cache over a pluggable lookup/update backend pair.
#[derive(Clone)]
pub struct AffinityCache {
    lookup: Arc<dyn AffinityLookup>,
    updater: Arc<dyn AffinityUpdater>,
    lookup_timeout: Duration,
    pending: TaskTracker,
}

impl AffinityCache {
    pub fn new(lookup: Arc<dyn AffinityLookup>, updater: Arc<dyn AffinityUpdater>) -> Self {
        Self { lookup, updater, lookup_timeout: DEFAULT_LOOKUP_TIMEOUT, pending: TaskTracker::new() }
    }

    /// Uses one store for both reads and writes.
    pub fn with_store<S>(store: S) -> Self
    where
        S: AffinityLookup + AffinityUpdater + 'static,
    {
        let store = Arc::new(store);
        Self::new(store.clone(), store)
    }

    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    /// Returns the cached server for `cluster`, or `None` if the lookup
    /// failed for any reason.
    pub async fn get(&self, cluster: &ClusterId) -> Option<ServerId> {
        let result = match tokio::time::timeout(self.lookup_timeout, self.lookup.lookup(cluster)).await {
            Ok(result) => result,
            Err(_) => Err(AffinityError::Timeout {
                record: cluster.to_string(),
                after: self.lookup_timeout,
            }),
        };

        match result {
            Ok(server) => {
                debug!(cluster = %cluster, server = %server, "affinity hint found");
                Some(server)
            }
            Err(e) => {
                warn!(cluster = %cluster, error = %e, "affinity lookup failed, continuing without hint");
                None
            }
        }
    }

    /// Records `server` as the cluster's known-good server.
    ///
    /// Runs detached on the tokio runtime and never reports failure to the
    /// caller. The handle is only useful to wait for completion.
    pub fn set(&self, cluster: &ClusterId, server: &ServerId) -> JoinHandle<()> {
        let updater = Arc::clone(&self.updater);
        let cluster = cluster.clone();
        let server = server.clone();

        self.pending.spawn(async move {
            match updater.apply(&cluster, &server).await {
                Ok(()) => debug!(cluster = %cluster, server = %server, "affinity updated"),
                Err(e) => {
                    warn!(cluster = %cluster, server = %server, error = %e, "affinity update failed")
                }
            }
        })
    }

    /// Waits until no update is in flight, e.g. before process exit.
    ///
    /// Safe to call concurrently from clones. The tracker stays closed,
    /// which only affects waiting; later `set` calls still run and are
    /// covered by the next wait.
    pub async fn wait_pending(&self) {
        self.pending.close();
        self.pending.wait().await;
    }
}
