use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use replica_failover::affinity::MemoryAffinityStore;
use replica_failover::catalog::CatalogEntry;
use replica_failover::{
    AffinityCache, Candidate, CandidateSet, ClusterId, ConnectionUrl, DialError, Dialer, Error,
    FailoverConnector, FileCatalog, RetryPolicy, ServerId, SiteContext, StaticCatalog, TcpDialer,
};
use tokio::net::TcpListener;
use tokio::time::Instant;

/// Dials succeed only for hosts listed as up.
#[derive(Default)]
struct HostDialer {
    up: Mutex<HashSet<String>>,
    dialed: Mutex<Vec<String>>,
}

impl HostDialer {
    fn with_up(hosts: &[&str]) -> Self {
        let dialer = Self::default();
        dialer.up.lock().extend(hosts.iter().map(|h| h.to_string()));
        dialer
    }

    fn dialed(&self) -> Vec<String> {
        self.dialed.lock().clone()
    }
}

#[async_trait]
impl Dialer for HostDialer {
    type Connection = ();

    async fn dial(&self, url: &ConnectionUrl) -> Result<(), DialError> {
        self.dialed.lock().push(url.host.clone());
        if self.up.lock().contains(&url.host) {
            Ok(())
        } else {
            Err(DialError::Rejected { address: url.socket_address(), reason: "down".into() })
        }
    }
}

fn candidate_set(entries: &[(&str, i64)]) -> CandidateSet {
    let mut set = CandidateSet::new();
    for (id, rank) in entries {
        let url = ConnectionUrl::parse(&format!("mysqli://site:pw@{id}:3306/sitedb")).unwrap();
        set.insert(Candidate::new(*id, *rank, url)).unwrap();
    }
    set
}

fn connector_with(store: &MemoryAffinityStore) -> FailoverConnector {
    FailoverConnector::new(
        AffinityCache::with_store(store.clone()),
        RetryPolicy::new(3, Duration::from_millis(500)),
    )
}

#[tokio::test(start_paused = true)]
async fn test_no_hint_prefers_rank_and_records_winner() {
    let store = MemoryAffinityStore::new();
    let connector = connector_with(&store);
    let dialer = HostDialer::with_up(&["2"]);
    let cluster = ClusterId::from(77);

    let started = Instant::now();
    let server = connector
        .resolve(&candidate_set(&[("1", 2), ("2", 1)]), &cluster, &dialer)
        .await
        .unwrap();
    connector.affinity().wait_pending().await;

    assert_eq!(server.id, ServerId::new("2"));
    assert_eq!(server.host, "2");
    assert_eq!(server.db, "sitedb");
    assert_eq!(dialer.dialed(), vec!["2"]);
    assert_eq!(started.elapsed(), Duration::ZERO);
    assert_eq!(store.current(&cluster), Some(ServerId::new("2")));
}

#[tokio::test(start_paused = true)]
async fn test_sticky_server_survives_rank_change() {
    let store = MemoryAffinityStore::new();
    let cluster = ClusterId::from(77);
    store.insert(cluster.clone(), ServerId::new("1"));
    let connector = connector_with(&store);
    let dialer = HostDialer::with_up(&["1", "2"]);

    let server = connector
        .resolve(&candidate_set(&[("1", 2), ("2", 1)]), &cluster, &dialer)
        .await
        .unwrap();
    connector.affinity().wait_pending().await;

    assert_eq!(server.id, ServerId::new("1"));
    assert_eq!(store.write_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stale_hint_falls_back_to_rank_order() {
    let store = MemoryAffinityStore::new();
    let cluster = ClusterId::from(77);
    store.insert(cluster.clone(), ServerId::new("decommissioned"));
    let connector = connector_with(&store);
    let dialer = HostDialer::with_up(&["a", "b"]);

    let server = connector
        .resolve(&candidate_set(&[("b", 1), ("a", 0)]), &cluster, &dialer)
        .await
        .unwrap();
    connector.affinity().wait_pending().await;

    assert_eq!(server.id, ServerId::new("a"));
    assert_eq!(store.current(&cluster), Some(ServerId::new("a")));
    assert_eq!(store.write_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_all_down_is_exhausted_after_full_backoff() {
    let store = MemoryAffinityStore::new();
    let connector = connector_with(&store);
    let dialer = HostDialer::default();

    let started = Instant::now();
    let err = connector
        .resolve(&candidate_set(&[("a", 0), ("b", 0), ("c", 0)]), &ClusterId::from(1), &dialer)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::ConnectionExhausted { candidates: 3, last_error: Some(_), .. }));
    assert_eq!(dialer.dialed().len(), 9);
    // three candidates, each sleeping 500ms + 1000ms
    assert_eq!(started.elapsed(), Duration::from_millis(4500));
    assert_eq!(store.write_count(), 0);
}

#[tokio::test]
async fn test_unknown_database_is_not_found() {
    let store = MemoryAffinityStore::new();
    let connector = connector_with(&store);
    let dialer = HostDialer::with_up(&["a"]);
    let catalog = StaticCatalog::new();

    let err = connector
        .resolve_database(&catalog, &SiteContext::new("acct", "prod"), "missing", &dialer)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::NotFound { .. }));
    assert!(dialer.dialed().is_empty());
}

#[tokio::test]
async fn test_catalog_scopes_by_stage() {
    let store = MemoryAffinityStore::new();
    let connector = connector_with(&store);
    let dialer = HostDialer::with_up(&["dev-1", "prod-1"]);

    let mut catalog = StaticCatalog::new();
    catalog.insert(
        SiteContext::new("acct", "dev"),
        "main",
        CatalogEntry { cluster_id: ClusterId::from(1), candidates: candidate_set(&[("dev-1", 0)]) },
    );
    catalog.insert(
        SiteContext::new("acct", "prod"),
        "main",
        CatalogEntry { cluster_id: ClusterId::from(2), candidates: candidate_set(&[("prod-1", 0)]) },
    );

    let server = connector
        .resolve_database(&catalog, &SiteContext::new("acct", "prod"), "main", &dialer)
        .await
        .unwrap();
    connector.affinity().wait_pending().await;

    assert_eq!(server.id, ServerId::new("prod-1"));
    assert_eq!(store.current(&ClusterId::from(2)), Some(ServerId::new("prod-1")));
    assert_eq!(store.current(&ClusterId::from(1)), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_resolutions_agree_on_live_server() {
    let store = MemoryAffinityStore::new();
    let connector = Arc::new(FailoverConnector::new(
        AffinityCache::with_store(store.clone()),
        RetryPolicy::new(1, Duration::ZERO),
    ));
    let dialer = Arc::new(HostDialer::with_up(&["b"]));
    let candidates = Arc::new(candidate_set(&[("a", 0), ("b", 1)]));
    let cluster = ClusterId::from(5);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let connector = Arc::clone(&connector);
        let dialer = Arc::clone(&dialer);
        let candidates = Arc::clone(&candidates);
        let cluster = cluster.clone();
        handles.push(tokio::spawn(async move {
            connector.resolve(&candidates, &cluster, dialer.as_ref()).await
        }));
    }

    for handle in handles {
        let server = handle.await.unwrap().unwrap();
        assert_eq!(server.id, ServerId::new("b"));
    }
    connector.affinity().wait_pending().await;
    assert_eq!(store.current(&cluster), Some(ServerId::new("b")));
}

#[tokio::test]
async fn test_file_catalog_and_tcp_dialer_end_to_end() {
    let live = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let live_port = live.local_addr().unwrap().port();
    let dead = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_port = dead.local_addr().unwrap().port();
    drop(dead);

    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("acct")).unwrap();
    std::fs::write(
        dir.path().join("acct").join("prod-main-credentials.json"),
        format!(
            r#"{{
                "cluster_id": 900,
                "servers": [
                    {{ "id": "ded-1", "url": "mysqli://acct:pw@127.0.0.1:{dead_port}/acctdb" }},
                    {{ "id": "ded-2", "url": "mysqli://acct:pw@127.0.0.1:{live_port}/acctdb" }}
                ]
            }}"#
        ),
    )
    .unwrap();

    let store = MemoryAffinityStore::new();
    let connector = FailoverConnector::new(
        AffinityCache::with_store(store.clone()),
        RetryPolicy::new(2, Duration::from_millis(10)),
    );
    let catalog = FileCatalog::new(dir.path());
    let site = SiteContext::new("acct", "prod");

    let server = connector
        .resolve_database(&catalog, &site, "main", &TcpDialer::new(Duration::from_secs(2)))
        .await
        .unwrap();
    connector.affinity().wait_pending().await;

    assert_eq!(server.id, ServerId::new("ded-2"));
    assert_eq!(server.port, live_port);
    assert_eq!(server.user, "acct");
    assert_eq!(server.pass, "pw");
    assert_eq!(store.current(&ClusterId::from(900)), Some(ServerId::new("ded-2")));
}
