/// Completion/embedding backend client
///
/// Batched embeddings, a non-streaming completion path used as the
/// no-deltas fallback, and a streaming completion path that decodes the
/// SSE response into an ordered event sequence with prompt cancellation.
use crate::completion::params::ModelParams;
use crate::completion::sse::SseDecoder;
use crate::config::CompletionBackendConfig;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::resilience::ResilienceExecutor;
use crate::types::StreamEvent;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::Serialize;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

/// One chat message in a completion request
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Completion request shared by the streaming and fallback paths
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub params: ModelParams,
    /// Server-side conversation identifier, present in server-managed mode
    pub conversation_id: Option<String>,
}

impl CompletionRequest {
    /// Wire body; `stream` selects between the two endpoints' behavior
    pub fn to_body(&self, stream: bool) -> serde_json::Value {
        let mut body = serde_json::Map::new();
        body.insert("model".to_string(), serde_json::json!(self.model));
        body.insert(
            "messages".to_string(),
            serde_json::to_value(&self.messages).unwrap_or_default(),
        );
        body.insert("stream".to_string(), serde_json::json!(stream));
        if let Some(id) = &self.conversation_id {
            body.insert("conversation_id".to_string(), serde_json::json!(id));
        }
        self.params.apply(&mut body);
        serde_json::Value::Object(body)
    }
}

/// Raw text chunks off the streaming connection
pub type TextChunkStream = Pin<Box<dyn Stream<Item = OrchestratorResult<String>> + Send>>;

/// Wire seam for the completion backend
#[async_trait]
pub trait CompletionTransport: Send + Sync {
    /// Batched embeddings: one vector per input text, same order
    async fn embed(&self, model: &str, texts: &[String]) -> OrchestratorResult<Vec<Vec<f32>>>;
    /// Single non-streaming completion
    async fn complete(&self, request: &CompletionRequest) -> OrchestratorResult<String>;
    /// Open a streaming completion connection
    async fn open_stream(&self, request: &CompletionRequest) -> OrchestratorResult<TextChunkStream>;
}

/// HTTP transport backed by reqwest
pub struct HttpCompletionTransport {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpCompletionTransport {
    pub fn new(config: &CompletionBackendConfig) -> OrchestratorResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| OrchestratorError::Config(format!("HTTP client build failed: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
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
impl CompletionTransport for HttpCompletionTransport {
    async fn embed(&self, model: &str, texts: &[String]) -> OrchestratorResult<Vec<Vec<f32>>> {
        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "model": model, "input": texts }))
            .send()
            .await?;
        let body: serde_json::Value = Self::check_status(response).await?.json().await?;

        let data = body["data"].as_array().ok_or_else(|| {
            OrchestratorError::MalformedResponse("embeddings response missing data".to_string())
        })?;
        data.iter()
            .map(|entry| {
                entry["embedding"]
                    .as_array()
                    .map(|values| {
                        values
                            .iter()
                            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                            .collect()
                    })
                    .ok_or_else(|| {
                        OrchestratorError::MalformedResponse(
                            "embedding entry missing vector".to_string(),
                        )
                    })
            })
            .collect()
    }

    async fn complete(&self, request: &CompletionRequest) -> OrchestratorResult<String> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request.to_body(false))
            .send()
            .await?;
        let body: serde_json::Value = Self::check_status(response).await?.json().await?;

        body["choices"][0]["message"]["content"]
            .as_str()
            .map(String::from)
            .ok_or_else(|| {
                OrchestratorError::MalformedResponse(
                    "completion response missing content".to_string(),
                )
            })
    }

    async fn open_stream(
        &self,
        request: &CompletionRequest,
    ) -> OrchestratorResult<TextChunkStream> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request.to_body(true))
            .send()
            .await?;
        let response = Self::check_status(response).await?;

        let stream = response.bytes_stream().map(|chunk| {
            chunk
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                .map_err(OrchestratorError::from)
        });
        Ok(Box::pin(stream))
    }
}

/// Streaming completion client
pub struct CompletionClient {
    transport: Arc<dyn CompletionTransport>,
    /// Guards embed, fallback completion, and stream opening
    executor: ResilienceExecutor,
    model: String,
    embedding_model: String,
}

impl CompletionClient {
    pub fn new(
        transport: Arc<dyn CompletionTransport>,
        executor: ResilienceExecutor,
        model: String,
        embedding_model: String,
    ) -> Self {
        Self {
            transport,
            executor,
            model,
            embedding_model,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Batched embeddings for query texts
    pub async fn embed(
        &self,
        correlation_id: Uuid,
        texts: &[String],
    ) -> OrchestratorResult<Vec<Vec<f32>>> {
        let transport = self.transport.clone();
        let model = self.embedding_model.clone();
        self.executor
            .execute("completion.embed", correlation_id, || {
                transport.embed(&model, texts)
            })
            .await
    }

    /// Single non-streaming completion, used as the no-deltas fallback
    pub async fn complete(
        &self,
        correlation_id: Uuid,
        request: &CompletionRequest,
    ) -> OrchestratorResult<String> {
        let transport = self.transport.clone();
        self.executor
            .execute("completion.complete", correlation_id, || {
                transport.complete(request)
            })
            .await
    }

    /// Open a streaming completion and decode it into an event sequence
    ///
    /// The returned stream ends after its terminal event. Triggering the
    /// cancel token drops the connection promptly and surfaces
    /// `Error(Canceled)`; an exhausted connection with no terminal event
    /// ends the stream without one, which callers treat as the signal for
    /// the non-streaming fallback.
    pub async fn stream_completion(
        &self,
        correlation_id: Uuid,
        request: CompletionRequest,
        cancel: CancellationToken,
    ) -> OrchestratorResult<ReceiverStream<StreamEvent>> {
        let transport = self.transport.clone();
        // Opening is safely retriable; the event sequence itself is not
        // restartable, so decoding happens outside the executor.
        let mut chunks = self
            .executor
            .execute("completion.open_stream", correlation_id, || {
                transport.open_stream(&request)
            })
            .await?;

        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            let mut decoder = SseDecoder::new();
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        debug!("Stream canceled by caller");
                        let _ = tx.send(StreamEvent::Error(OrchestratorError::Canceled)).await;
                        // Dropping `chunks` tears down the connection
                        return;
                    }
                    chunk = chunks.next() => match chunk {
                        Some(Ok(text)) => {
                            for event in decoder.feed(&text) {
                                let terminal = event.is_terminal();
                                if tx.send(event).await.is_err() {
                                    return;
                                }
                                if terminal {
                                    return;
                                }
                            }
                        }
                        Some(Err(e)) => {
                            warn!("Stream read failed: {}", e);
                            let _ = tx.send(StreamEvent::Error(e)).await;
                            return;
                        }
                        None => {
                            for event in decoder.finish() {
                                if tx.send(event).await.is_err() {
                                    return;
                                }
                            }
                            // A clean close with no terminal event simply
                            // ends the sequence; the caller decides on the
                            // fallback.
                            return;
                        }
                    }
                }
            }
        });

        Ok(ReceiverStream::new(rx))
    }
}
