use super::*;
use crate::config::ResilienceConfig;
use crate::error::OrchestratorError;
use crate::telemetry::NullSink;
use crate::types::{IndexStats, ScoredMatch, VectorRecord};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Mock vector transport for testing
struct MockVectorTransport {
    known_indexes: Vec<String>,
    /// Fail this many query calls before succeeding
    query_failures: AtomicU32,
    query_calls: AtomicU32,
    /// Fail this many host resolutions before succeeding
    resolve_failures: AtomicU32,
    resolve_calls: AtomicU32,
    upsert_calls: AtomicU32,
    stats_should_fail: AtomicBool,
    matches: Vec<ScoredMatch>,
}

impl MockVectorTransport {
    fn new(known_indexes: Vec<&str>) -> Self {
        Self {
            known_indexes: known_indexes.into_iter().map(String::from).collect(),
            query_failures: AtomicU32::new(0),
            query_calls: AtomicU32::new(0),
            resolve_failures: AtomicU32::new(0),
            resolve_calls: AtomicU32::new(0),
            upsert_calls: AtomicU32::new(0),
            stats_should_fail: AtomicBool::new(false),
            matches: vec![
                ScoredMatch {
                    id: "chunk-1".to_string(),
                    score: 0.92,
                    metadata: serde_json::json!({"source": "doc-a"}),
                },
                ScoredMatch {
                    id: "chunk-2".to_string(),
                    score: 0.85,
                    metadata: serde_json::json!({"source": "doc-b"}),
                },
            ],
        }
    }
}

#[async_trait]
impl VectorTransport for MockVectorTransport {
    async fn resolve_host(&self, index_name: &str) -> Result<String, OrchestratorError> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.resolve_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.resolve_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(OrchestratorError::TransientServer(
                "control plane 503".to_string(),
            ));
        }
        if self.known_indexes.iter().any(|n| n == index_name) {
            Ok(format!("{}.svc.vector.test", index_name))
        } else {
            Err(OrchestratorError::IndexNotFound(index_name.to_string()))
        }
    }

    async fn query(
        &self,
        _host: &str,
        request: &QueryRequest,
    ) -> Result<Vec<ScoredMatch>, OrchestratorError> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.query_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.query_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(OrchestratorError::TransientServer("mock 503".to_string()));
        }
        let mut matches = self.matches.clone();
        matches.truncate(request.top_k as usize);
        Ok(matches)
    }

    async fn upsert(
        &self,
        _host: &str,
        _namespace: Option<&str>,
        records: &[VectorRecord],
    ) -> Result<u64, OrchestratorError> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        Ok(records.len() as u64)
    }

    async fn delete(&self, _host: &str, _target: &DeleteTarget) -> Result<(), OrchestratorError> {
        Ok(())
    }

    async fn list_namespaces(&self, _host: &str) -> Result<Vec<String>, OrchestratorError> {
        Ok(vec!["default".to_string(), "archive".to_string()])
    }

    async fn describe_stats(&self, _host: &str) -> Result<IndexStats, OrchestratorError> {
        if self.stats_should_fail.load(Ordering::SeqCst) {
            return Err(OrchestratorError::TransientServer("stats down".to_string()));
        }
        Ok(IndexStats {
            dimension: 1536,
            total_vector_count: 100,
            namespaces: Default::default(),
        })
    }

    async fn health_check(&self, _host: &str) -> Result<(), OrchestratorError> {
        Ok(())
    }
}

fn fast_resilience(max_attempts: u32, threshold: u32) -> ResilienceConfig {
    ResilienceConfig {
        max_attempts,
        base_delay: Duration::from_millis(1),
        multiplier: 2.0,
        max_delay: Duration::from_millis(4),
        jitter_fraction: 0.0,
        rate_capacity: 1000.0,
        rate_refill_per_sec: 1000.0,
        rate_max_wait: Duration::from_secs(1),
        failure_threshold: threshold,
        base_cooldown: Duration::from_secs(60),
        max_cooldown: Duration::from_secs(60),
    }
}

fn client_with(
    transport: Arc<MockVectorTransport>,
    resilience: ResilienceConfig,
) -> VectorStoreClient {
    VectorStoreClient::new(transport, resilience, Arc::new(NullSink))
}

#[tokio::test]
async fn test_unknown_index_rejected() {
    let transport = Arc::new(MockVectorTransport::new(vec!["docs"]));
    let client = client_with(transport, fast_resilience(3, 5));

    let result = client.set_current_index("nope", None).await;
    assert!(matches!(result, Err(OrchestratorError::IndexNotFound(_))));
    assert!(client.current_index().await.is_none());
}

#[tokio::test]
async fn test_index_selection_resolves_host() {
    let transport = Arc::new(MockVectorTransport::new(vec!["docs"]));
    let client = client_with(transport, fast_resilience(3, 5));

    let context = client
        .set_current_index("docs", Some("default".to_string()))
        .await
        .unwrap();
    assert_eq!(context.host, "docs.svc.vector.test");
    assert_eq!(context.namespace.as_deref(), Some("default"));
    assert_eq!(client.current_index().await.unwrap(), context);
}

#[tokio::test]
async fn test_same_index_reselect_reuses_resolved_host() {
    let transport = Arc::new(MockVectorTransport::new(vec!["docs"]));
    let client = client_with(transport.clone(), fast_resilience(3, 5));

    // Namespace change on the same index does not re-resolve
    client.set_current_index("docs", None).await.unwrap();
    client
        .set_current_index("docs", Some("archive".to_string()))
        .await
        .unwrap();
    assert_eq!(transport.resolve_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_index_switch_evicts_prior_cached_host() {
    let transport = Arc::new(MockVectorTransport::new(vec!["docs", "notes"]));
    let client = client_with(transport.clone(), fast_resilience(3, 5));

    // Switching away drops the cached host, so coming back resolves
    // afresh and sees an index recreated on a new host
    client.set_current_index("docs", None).await.unwrap();
    client.set_current_index("notes", None).await.unwrap();
    client.set_current_index("docs", None).await.unwrap();
    assert_eq!(transport.resolve_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_host_resolution_retries_transient_failures() {
    let transport = Arc::new(MockVectorTransport::new(vec!["docs"]));
    transport.resolve_failures.store(2, Ordering::SeqCst);
    let client = client_with(transport.clone(), fast_resilience(3, 10));

    let context = client.set_current_index("docs", None).await.unwrap();
    assert_eq!(context.host, "docs.svc.vector.test");
    assert_eq!(transport.resolve_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_query_retries_transient_failures() {
    let transport = Arc::new(MockVectorTransport::new(vec!["docs"]));
    transport.query_failures.store(2, Ordering::SeqCst);
    let client = client_with(transport.clone(), fast_resilience(3, 10));

    client.set_current_index("docs", None).await.unwrap();
    let matches = client
        .query(Uuid::new_v4(), vec![0.1, 0.2], 2, None, None)
        .await
        .unwrap();

    assert_eq!(matches.len(), 2);
    assert_eq!(transport.query_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_query_without_index_fails() {
    let transport = Arc::new(MockVectorTransport::new(vec!["docs"]));
    let client = client_with(transport, fast_resilience(3, 5));

    let result = client.query(Uuid::new_v4(), vec![0.1], 1, None, None).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_upsert_survives_advisory_refresh_failure() {
    let transport = Arc::new(MockVectorTransport::new(vec!["docs"]));
    transport.stats_should_fail.store(true, Ordering::SeqCst);
    let client = client_with(transport.clone(), fast_resilience(1, 100));

    client.set_current_index("docs", None).await.unwrap();
    let count = client
        .upsert(
            Uuid::new_v4(),
            None,
            vec![VectorRecord {
                id: "r1".to_string(),
                values: vec![0.5; 4],
                metadata: None,
            }],
        )
        .await
        .unwrap();

    assert_eq!(count, 1);
    assert_eq!(transport.upsert_calls.load(Ordering::SeqCst), 1);
    // The failed refresh left no cached stats behind
    assert!(client.cached_stats().await.is_none());
}

#[tokio::test]
async fn test_refresh_populates_stats_cache() {
    let transport = Arc::new(MockVectorTransport::new(vec!["docs"]));
    let client = client_with(transport, fast_resilience(1, 100));

    client.set_current_index("docs", None).await.unwrap();
    client
        .delete(Uuid::new_v4(), DeleteTarget::Ids(vec!["chunk-1".to_string()]))
        .await
        .unwrap();

    let stats = client.cached_stats().await.unwrap();
    assert_eq!(stats.total_vector_count, 100);
}

#[tokio::test]
async fn test_index_switch_resets_circuit_state() {
    let transport = Arc::new(MockVectorTransport::new(vec!["docs", "notes"]));
    // Enough failures to trip a threshold-2 breaker with single-attempt calls
    transport.query_failures.store(10, Ordering::SeqCst);
    let client = client_with(transport.clone(), fast_resilience(1, 2));

    client.set_current_index("docs", None).await.unwrap();
    for _ in 0..2 {
        let _ = client.query(Uuid::new_v4(), vec![0.1], 1, None, None).await;
    }
    let result = client.query(Uuid::new_v4(), vec![0.1], 1, None, None).await;
    assert!(matches!(result, Err(OrchestratorError::CircuitOpen { .. })));

    // Switching index discards the tripped breaker
    transport.query_failures.store(0, Ordering::SeqCst);
    client.set_current_index("notes", None).await.unwrap();
    let matches = client
        .query(Uuid::new_v4(), vec![0.1], 1, None, None)
        .await
        .unwrap();
    assert_eq!(matches.len(), 1);
}

#[tokio::test]
async fn test_list_namespaces_updates_cache() {
    let transport = Arc::new(MockVectorTransport::new(vec!["docs"]));
    let client = client_with(transport, fast_resilience(1, 100));

    client.set_current_index("docs", None).await.unwrap();
    let namespaces = client.list_namespaces(Uuid::new_v4()).await.unwrap();
    assert_eq!(namespaces, vec!["default", "archive"]);
}
