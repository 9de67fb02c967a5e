/// Vector store client
///
/// Query/upsert/delete/stat operations against the vector backend. Every
/// network-bound operation goes through the per-index resilience executor;
/// the HTTP transport sits behind a trait so tests can substitute a mock.
use crate::config::{ResilienceConfig, VectorBackendConfig};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::resilience::ResilienceExecutor;
use crate::telemetry::TelemetrySink;
use crate::types::{IndexStats, ScoredMatch, VectorRecord};
use crate::vector::filter::MetadataFilter;
use crate::vector::index::{IndexContext, IndexHandle};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Query payload sent to the backend
#[derive(Debug, Clone, Serialize)]
pub struct QueryRequest {
    pub vector: Vec<f32>,
    #[serde(rename = "topK")]
    pub top_k: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<serde_json::Value>,
    #[serde(rename = "includeMetadata")]
    pub include_metadata: bool,
}

/// What a delete call targets
#[derive(Debug, Clone)]
pub enum DeleteTarget {
    /// Delete specific records by id
    Ids(Vec<String>),
    /// Delete everything in a namespace
    Namespace(String),
}

#[derive(Debug, Deserialize)]
struct QueryResponseBody {
    #[serde(default)]
    matches: Vec<ScoredMatch>,
}

#[derive(Debug, Deserialize)]
struct HostResolutionBody {
    host: String,
}

#[derive(Debug, Deserialize)]
struct ListNamespacesBody {
    #[serde(default)]
    namespaces: Vec<String>,
}

/// Wire seam for the vector backend
#[async_trait]
pub trait VectorTransport: Send + Sync {
    /// Resolve the data-plane host for an index name
    async fn resolve_host(&self, index_name: &str) -> OrchestratorResult<String>;
    async fn query(&self, host: &str, request: &QueryRequest)
        -> OrchestratorResult<Vec<ScoredMatch>>;
    async fn upsert(
        &self,
        host: &str,
        namespace: Option<&str>,
        records: &[VectorRecord],
    ) -> OrchestratorResult<u64>;
    async fn delete(&self, host: &str, target: &DeleteTarget) -> OrchestratorResult<()>;
    async fn list_namespaces(&self, host: &str) -> OrchestratorResult<Vec<String>>;
    async fn describe_stats(&self, host: &str) -> OrchestratorResult<IndexStats>;
    async fn health_check(&self, host: &str) -> OrchestratorResult<()>;
}

/// HTTP transport backed by reqwest
pub struct HttpVectorTransport {
    client: reqwest::Client,
    control_host: String,
    api_key: String,
    project_id: String,
}

impl HttpVectorTransport {
    pub fn new(config: &VectorBackendConfig) -> OrchestratorResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| OrchestratorError::Config(format!("HTTP client build failed: {}", e)))?;

        Ok(Self {
            client,
            control_host: config.control_host.clone(),
            api_key: config.api_key.clone(),
            project_id: config.project_id.clone(),
        })
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("Api-Key", &self.api_key)
            .header("X-Project-Id", &self.project_id)
    }

    async fn check_status(response: reqwest::Response) -> OrchestratorResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(OrchestratorError::from_status(status.as_u16(), &body))
        }
    }
}

#[async_trait]
impl VectorTransport for HttpVectorTransport {
    async fn resolve_host(&self, index_name: &str) -> OrchestratorResult<String> {
        let endpoint = format!("https://{}/databases/{}", self.control_host, index_name);
        let response = self.authed(self.client.get(&endpoint)).send().await?;

        if response.status().as_u16() == 404 {
            return Err(OrchestratorError::IndexNotFound(index_name.to_string()));
        }
        let body: HostResolutionBody = Self::check_status(response).await?.json().await?;

        // Validate that the backend handed us something URL-shaped
        url::Url::parse(&format!("https://{}", body.host)).map_err(|e| {
            OrchestratorError::MalformedResponse(format!("bad resolved host: {}", e))
        })?;
        Ok(body.host)
    }

    async fn query(
        &self,
        host: &str,
        request: &QueryRequest,
    ) -> OrchestratorResult<Vec<ScoredMatch>> {
        let endpoint = format!("https://{}/query", host);
        let response = self
            .authed(self.client.post(&endpoint))
            .json(request)
            .send()
            .await?;
        let body: QueryResponseBody = Self::check_status(response).await?.json().await?;
        Ok(body.matches)
    }

    async fn upsert(
        &self,
        host: &str,
        namespace: Option<&str>,
        records: &[VectorRecord],
    ) -> OrchestratorResult<u64> {
        let endpoint = format!("https://{}/vectors/upsert", host);
        let payload = serde_json::json!({
            "vectors": records,
            "namespace": namespace,
        });
        let response = self
            .authed(self.client.post(&endpoint))
            .json(&payload)
            .send()
            .await?;
        let body: serde_json::Value = Self::check_status(response).await?.json().await?;
        Ok(body["upsertedCount"].as_u64().unwrap_or(records.len() as u64))
    }

    async fn delete(&self, host: &str, target: &DeleteTarget) -> OrchestratorResult<()> {
        let endpoint = format!("https://{}/vectors/delete", host);
        let payload = match target {
            DeleteTarget::Ids(ids) => serde_json::json!({ "ids": ids }),
            DeleteTarget::Namespace(ns) => {
                serde_json::json!({ "deleteAll": true, "namespace": ns })
            }
        };
        let response = self
            .authed(self.client.post(&endpoint))
            .json(&payload)
            .send()
            .await?;
        Self::check_status(response).await?;
        Ok(())
    }

    async fn list_namespaces(&self, host: &str) -> OrchestratorResult<Vec<String>> {
        let endpoint = format!("https://{}/namespaces", host);
        let response = self.authed(self.client.get(&endpoint)).send().await?;
        let body: ListNamespacesBody = Self::check_status(response).await?.json().await?;
        Ok(body.namespaces)
    }

    async fn describe_stats(&self, host: &str) -> OrchestratorResult<IndexStats> {
        let endpoint = format!("https://{}/describe_index_stats", host);
        let response = self.authed(self.client.post(&endpoint)).send().await?;
        let stats: IndexStats = Self::check_status(response).await?.json().await?;
        Ok(stats)
    }

    async fn health_check(&self, host: &str) -> OrchestratorResult<()> {
        let endpoint = format!("https://{}/health", host);
        let response = self.authed(self.client.get(&endpoint)).send().await?;
        Self::check_status(response).await?;
        Ok(())
    }
}

/// Vector store client with per-index resilience state
pub struct VectorStoreClient {
    transport: Arc<dyn VectorTransport>,
    resilience: ResilienceConfig,
    telemetry: Arc<dyn TelemetrySink>,
    /// Guards control-plane calls (host resolution), which happen before
    /// any per-index executor exists
    control_executor: ResilienceExecutor,
    /// Resolved hosts by index name, dropped on switch-away
    host_cache: Mutex<HashMap<String, String>>,
    /// Currently selected index; replaced atomically on switch
    current: RwLock<Option<Arc<IndexHandle>>>,
}

impl VectorStoreClient {
    pub fn new(
        transport: Arc<dyn VectorTransport>,
        resilience: ResilienceConfig,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        let control_executor = ResilienceExecutor::from_config(&resilience, telemetry.clone());
        Self {
            transport,
            resilience,
            telemetry,
            control_executor,
            host_cache: Mutex::new(HashMap::new()),
            current: RwLock::new(None),
        }
    }

    /// Select an index, resolving its host and resetting resilience state
    ///
    /// The prior index's circuit and rate-limiter state is discarded along
    /// with its handle, and its cached host is evicted so re-selecting it
    /// later resolves afresh. Re-selecting the current index (e.g. to
    /// change namespace) reuses the resolved host.
    #[instrument(skip(self))]
    pub async fn set_current_index(
        &self,
        index_name: &str,
        namespace: Option<String>,
    ) -> OrchestratorResult<IndexContext> {
        let prior = self
            .current
            .read()
            .await
            .as_ref()
            .map(|h| h.context.index_name.clone());
        if let Some(prior) = prior {
            if prior != index_name {
                self.host_cache.lock().unwrap().remove(&prior);
            }
        }

        let host = self.resolve_host_cached(index_name).await?;
        let context = IndexContext {
            index_name: index_name.to_string(),
            host,
            namespace,
        };

        let handle = Arc::new(IndexHandle::new(
            context.clone(),
            ResilienceExecutor::from_config(&self.resilience, self.telemetry.clone()),
        ));
        *self.current.write().await = Some(handle);

        debug!("Selected index '{}'", index_name);
        Ok(context)
    }

    /// Currently selected index context, if any
    pub async fn current_index(&self) -> Option<IndexContext> {
        self.current.read().await.as_ref().map(|h| h.context.clone())
    }

    /// Ranked nearest-neighbor query against the current index
    pub async fn query(
        &self,
        correlation_id: Uuid,
        vector: Vec<f32>,
        top_k: u32,
        namespace: Option<String>,
        filter: Option<&MetadataFilter>,
    ) -> OrchestratorResult<Vec<ScoredMatch>> {
        let handle = self.require_index().await?;
        let request = QueryRequest {
            vector,
            top_k: top_k.max(1),
            namespace: namespace.or_else(|| handle.context.namespace.clone()),
            filter: filter.and_then(|f| f.to_query_json()),
            include_metadata: true,
        };

        let transport = self.transport.clone();
        let host = handle.context.host.clone();
        handle
            .executor
            .execute("vector.query", correlation_id, || {
                transport.query(&host, &request)
            })
            .await
    }

    /// Upsert records, then advisorily refresh cached stats
    pub async fn upsert(
        &self,
        correlation_id: Uuid,
        namespace: Option<String>,
        records: Vec<VectorRecord>,
    ) -> OrchestratorResult<u64> {
        let handle = self.require_index().await?;
        let transport = self.transport.clone();
        let host = handle.context.host.clone();
        let namespace = namespace.or_else(|| handle.context.namespace.clone());

        let count = handle
            .executor
            .execute("vector.upsert", correlation_id, || {
                transport.upsert(&host, namespace.as_deref(), &records)
            })
            .await?;

        self.refresh_stats_advisory(&handle, correlation_id).await;
        Ok(count)
    }

    /// Delete by ids or namespace, then advisorily refresh cached stats
    pub async fn delete(
        &self,
        correlation_id: Uuid,
        target: DeleteTarget,
    ) -> OrchestratorResult<()> {
        let handle = self.require_index().await?;
        let transport = self.transport.clone();
        let host = handle.context.host.clone();

        handle
            .executor
            .execute("vector.delete", correlation_id, || {
                transport.delete(&host, &target)
            })
            .await?;

        self.refresh_stats_advisory(&handle, correlation_id).await;
        Ok(())
    }

    /// List namespaces in the current index, updating the cached view
    pub async fn list_namespaces(&self, correlation_id: Uuid) -> OrchestratorResult<Vec<String>> {
        let handle = self.require_index().await?;
        let transport = self.transport.clone();
        let host = handle.context.host.clone();

        let namespaces = handle
            .executor
            .execute("vector.list_namespaces", correlation_id, || {
                transport.list_namespaces(&host)
            })
            .await?;

        *handle.cached_namespaces.lock().unwrap() = namespaces.clone();
        Ok(namespaces)
    }

    /// Describe index statistics, updating the cached view
    pub async fn describe_index_stats(
        &self,
        correlation_id: Uuid,
    ) -> OrchestratorResult<IndexStats> {
        let handle = self.require_index().await?;
        let transport = self.transport.clone();
        let host = handle.context.host.clone();

        let stats = handle
            .executor
            .execute("vector.describe_stats", correlation_id, || {
                transport.describe_stats(&host)
            })
            .await?;

        *handle.cached_stats.lock().unwrap() = Some(stats.clone());
        Ok(stats)
    }

    /// Cached stats from the last describe/refresh, if any
    pub async fn cached_stats(&self) -> Option<IndexStats> {
        let current = self.current.read().await;
        current
            .as_ref()
            .and_then(|h| h.cached_stats.lock().unwrap().clone())
    }

    /// On-demand health check; forces a half-open probe on an open circuit
    pub async fn health_check(&self, correlation_id: Uuid) -> OrchestratorResult<()> {
        let handle = self.require_index().await?;
        handle.executor.force_probe();

        let transport = self.transport.clone();
        let host = handle.context.host.clone();
        handle
            .executor
            .execute("vector.health_check", correlation_id, || {
                transport.health_check(&host)
            })
            .await
    }

    /// Circuit state of the current index, for observers
    pub async fn circuit_stats(&self) -> Option<crate::resilience::CircuitBreakerStats> {
        let current = self.current.read().await;
        current.as_ref().map(|h| h.executor.circuit_stats())
    }

    async fn require_index(&self) -> OrchestratorResult<Arc<IndexHandle>> {
        self.current
            .read()
            .await
            .clone()
            .ok_or_else(|| OrchestratorError::Internal("no index selected".to_string()))
    }

    async fn resolve_host_cached(&self, index_name: &str) -> OrchestratorResult<String> {
        if let Some(host) = self.host_cache.lock().unwrap().get(index_name) {
            return Ok(host.clone());
        }

        let transport = self.transport.clone();
        let host = self
            .control_executor
            .execute("vector.resolve_host", Uuid::new_v4(), || {
                transport.resolve_host(index_name)
            })
            .await?;

        self.host_cache
            .lock()
            .unwrap()
            .insert(index_name.to_string(), host.clone());
        Ok(host)
    }

    /// Repopulate cached namespace/stat views after a mutating call
    ///
    /// Advisory: failure is logged but never fails the mutation it follows.
    async fn refresh_stats_advisory(&self, handle: &Arc<IndexHandle>, correlation_id: Uuid) {
        let transport = self.transport.clone();
        let host = handle.context.host.clone();

        match handle
            .executor
            .execute("vector.refresh_stats", correlation_id, || {
                transport.describe_stats(&host)
            })
            .await
        {
            Ok(stats) => {
                let mut namespaces: Vec<String> = stats.namespaces.keys().cloned().collect();
                namespaces.sort();
                *handle.cached_namespaces.lock().unwrap() = namespaces;
                *handle.cached_stats.lock().unwrap() = Some(stats);
            }
            Err(e) => {
                warn!("Advisory stats refresh failed: {}", e);
            }
        }
    }
}
