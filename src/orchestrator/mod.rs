/// Search orchestrator
///
/// Drives one query at a time through the retrieval pipeline: embed the
/// query, search the vector index, assemble context and history, stream
/// the completion, finalize with citations. The pipeline runs in a spawned
/// task so callers can observe progress and cancel mid-flight.
use crate::completion::{ChatMessage, CompletionClient, CompletionRequest, ModelParams};
use crate::config::SettingsSnapshot;
use crate::conversation::ConversationManager;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::telemetry::{TelemetryEvent, TelemetrySink};
use crate::types::{Citation, Message, MessageStatus, ScoredMatch, SearchSession, StreamEvent};
use crate::vector::{IndexContext, MetadataFilter, VectorStoreClient};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;


/// Pipeline phase of the current (or most recent) query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryPhase {
    Idle,
    Embedding,
    VectorSearch,
    ContextAssembly,
    Streaming,
    Finalizing,
    Complete,
    Canceled,
    Failed,
}

impl QueryPhase {
    pub fn name(&self) -> &'static str {
        match self {
            QueryPhase::Idle => "idle",
            QueryPhase::Embedding => "embedding",
            QueryPhase::VectorSearch => "vector_search",
            QueryPhase::ContextAssembly => "context_assembly",
            QueryPhase::Streaming => "streaming",
            QueryPhase::Finalizing => "finalizing",
            QueryPhase::Complete => "complete",
            QueryPhase::Canceled => "canceled",
            QueryPhase::Failed => "failed",
        }
    }
}

/// Per-query knobs; defaults come from the settings snapshot
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub top_k: Option<u32>,
    pub namespace: Option<String>,
    pub filter: Option<MetadataFilter>,
    /// Restrict context assembly to these chunk ids out of the retrieved set
    pub selected_chunk_ids: Option<Vec<String>>,
}

struct ActiveQuery {
    assistant_id: Uuid,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct OrchestratorCore {
    vector: Arc<VectorStoreClient>,
    completion: Arc<CompletionClient>,
    conversation: ConversationManager,
    telemetry: Arc<dyn TelemetrySink>,
    settings: SettingsSnapshot,
    session: RwLock<SearchSession>,
    phase: std::sync::Mutex<QueryPhase>,
}

/// Session-scoped orchestrator; one active query at a time
pub struct SearchOrchestrator {
    core: Arc<OrchestratorCore>,
    active: Mutex<Option<ActiveQuery>>,
}

impl SearchOrchestrator {
    pub fn new(
        vector: Arc<VectorStoreClient>,
        completion: Arc<CompletionClient>,
        settings: SettingsSnapshot,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        let conversation = ConversationManager::new(
            settings.conversation_mode,
            settings.history_turn_budget,
        );
        let session = SearchSession::new(settings.conversation_mode);

        Self {
            core: Arc::new(OrchestratorCore {
                vector,
                completion,
                conversation,
                telemetry,
                settings,
                session: RwLock::new(session),
                phase: std::sync::Mutex::new(QueryPhase::Idle),
            }),
            active: Mutex::new(None),
        }
    }

    /// Select the vector index queries run against
    pub async fn select_index(
        &self,
        index_name: &str,
        namespace: Option<String>,
    ) -> OrchestratorResult<IndexContext> {
        self.core.vector.set_current_index(index_name, namespace).await
    }

    /// Re-select the index remembered in the settings snapshot
    ///
    /// Returns `None` when no index was remembered.
    pub async fn restore_index_selection(&self) -> OrchestratorResult<Option<IndexContext>> {
        match self.core.settings.last_index.clone() {
            Some(index_name) => {
                let namespace = self.core.settings.namespace.clone();
                Ok(Some(self.select_index(&index_name, namespace).await?))
            }
            None => Ok(None),
        }
    }

    /// Submit a query, canceling any query already in flight
    ///
    /// Returns the id of the assistant message that will receive the
    /// streamed answer. The pipeline itself runs in a background task.
    #[instrument(skip(self, options))]
    pub async fn submit_query(
        &self,
        query: &str,
        options: QueryOptions,
    ) -> OrchestratorResult<Uuid> {
        let query = query.trim().to_string();
        if query.is_empty() {
            return Err(OrchestratorError::EmptyQuery);
        }

        // One active query per session: the previous one is canceled and
        // fully settled before the new messages are appended.
        self.cancel_query().await;

        let correlation_id = Uuid::new_v4();
        let (user_id, assistant_id, history) = {
            let mut session = self.core.session.write().await;
            let history = self.core.conversation.assemble_history(&session);

            let mut user_message = Message::user(query.clone());
            user_message.correlation_id = Some(correlation_id);
            let user_id = session.push_message(user_message);

            let mut assistant_message = Message::assistant();
            assistant_message.correlation_id = Some(correlation_id);
            let assistant_id = session.push_message(assistant_message);

            (user_id, assistant_id, history)
        };

        info!(%correlation_id, "Query accepted");
        let cancel = CancellationToken::new();
        let core = self.core.clone();
        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            core.run_pipeline(
                correlation_id,
                user_id,
                assistant_id,
                query,
                options,
                history,
                task_cancel,
            )
            .await;
        });

        *self.active.lock().await = Some(ActiveQuery {
            assistant_id,
            cancel,
            handle,
        });
        Ok(assistant_id)
    }

    /// Cancel the in-flight query, if any, and wait for it to settle
    pub async fn cancel_query(&self) {
        let active = self.active.lock().await.take();
        if let Some(active) = active {
            debug!("Canceling active query");
            active.cancel.cancel();
            if active.handle.await.is_err() {
                warn!(assistant_id = %active.assistant_id, "Query task panicked");
            }
        }
    }

    /// Wait for the in-flight query to finish without canceling it
    pub async fn join_active(&self) {
        let active = self.active.lock().await.take();
        if let Some(active) = active {
            if active.handle.await.is_err() {
                warn!(assistant_id = %active.assistant_id, "Query task panicked");
            }
        }
    }

    /// Start a new topic: cancel in-flight work and discard thread state
    pub async fn new_topic(&self) {
        self.cancel_query().await;
        let mut session = self.core.session.write().await;
        self.core.conversation.new_topic(&mut session);
        *self.core.phase.lock().unwrap() = QueryPhase::Idle;
    }

    /// Current pipeline phase
    pub fn phase(&self) -> QueryPhase {
        *self.core.phase.lock().unwrap()
    }

    /// Snapshot of the session transcript
    pub async fn session_snapshot(&self) -> SearchSession {
        self.core.session.read().await.clone()
    }
}

impl OrchestratorCore {
    #[allow(clippy::too_many_arguments)]
    async fn run_pipeline(
        self: Arc<Self>,
        correlation_id: Uuid,
        user_id: Uuid,
        assistant_id: Uuid,
        query: String,
        options: QueryOptions,
        history: crate::conversation::AssembledHistory,
        cancel: CancellationToken,
    ) {
        let outcome = self
            .execute_pipeline(
                correlation_id,
                assistant_id,
                &query,
                options,
                history,
                &cancel,
            )
            .await;

        match outcome {
            Ok(citations) => {
                self.finalize(correlation_id, user_id, assistant_id, citations)
                    .await;
            }
            Err(OrchestratorError::Canceled) => {
                self.mark_canceled(correlation_id, user_id, assistant_id).await;
            }
            Err(e) => {
                self.mark_failed(correlation_id, user_id, assistant_id, e).await;
            }
        }
    }

    async fn execute_pipeline(
        &self,
        correlation_id: Uuid,
        assistant_id: Uuid,
        query: &str,
        options: QueryOptions,
        history: crate::conversation::AssembledHistory,
        cancel: &CancellationToken,
    ) -> OrchestratorResult<Vec<Citation>> {
        self.set_phase(QueryPhase::Embedding, correlation_id);
        let texts = vec![query.to_string()];
        let embeddings = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(OrchestratorError::Canceled),
            result = self.completion.embed(correlation_id, &texts) => result?,
        };
        let embedding = embeddings.into_iter().next().ok_or_else(|| {
            OrchestratorError::MalformedResponse("embedding response was empty".to_string())
        })?;

        self.set_phase(QueryPhase::VectorSearch, correlation_id);
        let top_k = options.top_k.unwrap_or(self.settings.default_top_k);
        // Saved filter presets apply when the caller passed no filter
        let filter = options.filter.clone().or_else(|| {
            if self.settings.filter_presets.is_empty() {
                None
            } else {
                Some(MetadataFilter::from_entries(
                    self.settings
                        .filter_presets
                        .iter()
                        .map(|(f, v)| (f.as_str(), v.as_str())),
                ))
            }
        });
        let matches = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(OrchestratorError::Canceled),
            result = self.vector.query(
                correlation_id,
                embedding,
                top_k,
                options.namespace.clone(),
                filter.as_ref(),
            ) => result?,
        };
        debug!(%correlation_id, matches = matches.len(), "Vector search returned");

        self.set_phase(QueryPhase::ContextAssembly, correlation_id);
        let context_matches = select_context(matches, options.selected_chunk_ids.as_deref());
        let citations: Vec<Citation> = context_matches
            .iter()
            .map(|m| Citation {
                chunk_id: m.id.clone(),
                score: m.score,
            })
            .collect();

        let model = self.completion.model().to_string();
        let request = CompletionRequest {
            params: ModelParams::for_model(&model),
            model,
            messages: build_prompt(&context_matches, &history.messages, query),
            conversation_id: history.conversation_id,
        };

        self.set_phase(QueryPhase::Streaming, correlation_id);
        let mut stream = self
            .completion
            .stream_completion(correlation_id, request.clone(), cancel.clone())
            .await?;

        let mut saw_terminal = false;
        while let Some(event) = stream.next().await {
            match event {
                StreamEvent::Delta(text) => {
                    let mut session = self.session.write().await;
                    if let Some(message) = session.message_mut(assistant_id) {
                        message.text.push_str(&text);
                    }
                }
                StreamEvent::Completed(full_text) => {
                    if let Some(full_text) = full_text {
                        let mut session = self.session.write().await;
                        if let Some(message) = session.message_mut(assistant_id) {
                            message.text = full_text;
                        }
                    }
                    saw_terminal = true;
                    break;
                }
                StreamEvent::Error(e) => return Err(e),
            }
        }

        let streamed_text = {
            let session = self.session.read().await;
            session
                .messages
                .iter()
                .find(|m| m.id == assistant_id)
                .map(|m| m.text.clone())
                .unwrap_or_default()
        };

        if !saw_terminal {
            if streamed_text.trim().is_empty() {
                // Stream closed with neither deltas nor a completion
                // marker: retry once through the non-streaming path
                // before giving up. A deltaless but properly completed
                // stream finalizes as-is.
                info!(%correlation_id, "Stream produced no events, using non-streaming fallback");
                self.record(correlation_id, "orchestrator.fallback", serde_json::json!({}));
                let answer = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(OrchestratorError::Canceled),
                    result = self.completion.complete(correlation_id, &request) => result?,
                };
                let mut session = self.session.write().await;
                if let Some(message) = session.message_mut(assistant_id) {
                    message.text = answer;
                }
            } else {
                // Tokens arrived but the connection dropped before the
                // completion marker; the partial answer is not trustworthy.
                return Err(OrchestratorError::MalformedResponse(
                    "stream closed before completion".to_string(),
                ));
            }
        }

        Ok(citations)
    }

    async fn finalize(
        &self,
        correlation_id: Uuid,
        user_id: Uuid,
        assistant_id: Uuid,
        citations: Vec<Citation>,
    ) {
        self.set_phase(QueryPhase::Finalizing, correlation_id);
        {
            let mut session = self.session.write().await;
            if let Some(message) = session.message_mut(user_id) {
                message.status = MessageStatus::Complete;
            }
            if let Some(message) = session.message_mut(assistant_id) {
                message.status = MessageStatus::Complete;
                message.citations = citations;
            }
        }
        self.set_phase(QueryPhase::Complete, correlation_id);
        info!(%correlation_id, "Query complete");
    }

    /// Canceled turns are excised from history: both sides of the turn are
    /// marked so neither is eligible next time.
    async fn mark_canceled(&self, correlation_id: Uuid, user_id: Uuid, assistant_id: Uuid) {
        {
            let mut session = self.session.write().await;
            if let Some(message) = session.message_mut(user_id) {
                message.status = MessageStatus::Canceled;
            }
            if let Some(message) = session.message_mut(assistant_id) {
                message.status = MessageStatus::Canceled;
            }
        }
        self.set_phase(QueryPhase::Canceled, correlation_id);
        info!(%correlation_id, "Query canceled");
    }

    async fn mark_failed(
        &self,
        correlation_id: Uuid,
        user_id: Uuid,
        assistant_id: Uuid,
        error: OrchestratorError,
    ) {
        warn!(%correlation_id, error = %error, "Query failed");
        {
            let mut session = self.session.write().await;
            if let Some(message) = session.message_mut(user_id) {
                message.status = MessageStatus::Error;
            }
            if let Some(message) = session.message_mut(assistant_id) {
                message.status = MessageStatus::Error;
                message.failure_summary = Some(error.user_summary());
            }
        }
        self.set_phase(QueryPhase::Failed, correlation_id);
        self.record(
            correlation_id,
            "orchestrator.failed",
            serde_json::json!({ "error": error.to_string() }),
        );
    }

    fn set_phase(&self, phase: QueryPhase, correlation_id: Uuid) {
        *self.phase.lock().unwrap() = phase;
        self.record(
            correlation_id,
            "orchestrator.phase",
            serde_json::json!({ "phase": phase.name() }),
        );
    }

    fn record(&self, correlation_id: Uuid, name: &'static str, fields: serde_json::Value) {
        self.telemetry.record(TelemetryEvent {
            correlation_id,
            name,
            fields,
        });
    }
}

/// Restrict retrieved matches to a caller-selected subset, preserving rank
/// order
fn select_context(matches: Vec<ScoredMatch>, selected: Option<&[String]>) -> Vec<ScoredMatch> {
    match selected {
        None => matches,
        Some(ids) => matches
            .into_iter()
            .filter(|m| ids.iter().any(|id| id == &m.id))
            .collect(),
    }
}

/// Build the prompt: grounding context, prior turns, then the query
fn build_prompt(
    matches: &[ScoredMatch],
    history: &[Message],
    query: &str,
) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);

    let system = if matches.is_empty() {
        "You are a retrieval-augmented assistant. No relevant context was \
         found for this question; answer from general knowledge and say so."
            .to_string()
    } else {
        let context = matches
            .iter()
            .enumerate()
            .map(|(i, m)| {
                let text = m
                    .metadata
                    .get("text")
                    .and_then(|v| v.as_str())
                    .unwrap_or("");
                format!("[{}] {}", i + 1, text)
            })
            .collect::<Vec<_>>()
            .join("\n\n");
        format!(
            "You are a retrieval-augmented assistant. Answer using the \
             numbered context chunks below; cite chunk numbers where they \
             support your answer.\n\n{}",
            context
        )
    };
    messages.push(ChatMessage::system(system));

    for message in history {
        match message.role {
            crate::types::MessageRole::User => {
                messages.push(ChatMessage::user(message.text.clone()))
            }
            crate::types::MessageRole::Assistant => {
                messages.push(ChatMessage::assistant(message.text.clone()))
            }
        }
    }

    messages.push(ChatMessage::user(query.to_string()));
    messages
}
