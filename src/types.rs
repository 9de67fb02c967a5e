use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role of a conversation message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

/// Lifecycle status of a message
///
/// Only `Complete` messages are eligible for history assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Streaming,
    Complete,
    Canceled,
    Error,
}

/// Reference to a source chunk that contributed to an answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    /// Identifier of the source chunk in the vector index
    pub chunk_id: String,
    /// Similarity score at retrieval time
    pub score: f32,
}

/// One message in a search session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub role: MessageRole,
    pub text: String,
    pub status: MessageStatus,
    pub citations: Vec<Citation>,
    /// Human-readable failure summary, set when status is `Error`
    pub failure_summary: Option<String>,
    /// Correlation id for cross-referencing operational logs
    pub correlation_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(MessageRole::User, text, MessageStatus::Pending)
    }

    pub fn assistant() -> Self {
        Self::new(MessageRole::Assistant, "", MessageStatus::Streaming)
    }

    fn new(role: MessageRole, text: impl Into<String>, status: MessageStatus) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            text: text.into(),
            status,
            citations: Vec::new(),
            failure_summary: None,
            correlation_id: None,
            created_at: Utc::now(),
        }
    }

    /// Whether the message may appear in assembled history
    pub fn is_history_eligible(&self) -> bool {
        self.status == MessageStatus::Complete && !self.text.trim().is_empty()
    }
}

/// How conversation history is maintained across turns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationMode {
    /// Thread state lives server-side, addressed by a conversation id
    Server,
    /// History is kept locally and bounded to a turn budget
    Local,
}

/// Per-user search session
///
/// The message list is appended/mutated only by the owning orchestrator
/// task; observers read it through a shared lock.
#[derive(Debug, Clone)]
pub struct SearchSession {
    pub session_id: Uuid,
    pub mode: ConversationMode,
    /// Server-managed thread id. Present only in `Server` mode, cleared on
    /// a new topic.
    pub conversation_id: Option<String>,
    pub messages: Vec<Message>,
}

impl SearchSession {
    pub fn new(mode: ConversationMode) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            mode,
            conversation_id: None,
            messages: Vec::new(),
        }
    }

    pub fn push_message(&mut self, message: Message) -> Uuid {
        let id = message.id;
        self.messages.push(message);
        id
    }

    pub fn message_mut(&mut self, id: Uuid) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| m.id == id)
    }
}

/// One ranked match from the vector backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredMatch {
    pub id: String,
    pub score: f32,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Record shape accepted by upsert
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub values: Vec<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Aggregate index statistics from describe-stats
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexStats {
    #[serde(default)]
    pub dimension: u32,
    #[serde(default)]
    pub total_vector_count: u64,
    #[serde(default)]
    pub namespaces: std::collections::HashMap<String, NamespaceStats>,
}

/// Per-namespace vector count
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NamespaceStats {
    #[serde(default)]
    pub vector_count: u64,
}

/// One event decoded from a completion stream
///
/// A stream is a finite ordered sequence terminated by exactly one
/// `Completed` or one `Error`.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Incremental token text, surfaced in exact arrival order
    Delta(String),
    /// Terminal completion, optionally carrying the full answer text
    /// (set by the non-streaming fallback path)
    Completed(Option<String>),
    /// Terminal failure, including cancellation
    Error(crate::error::OrchestratorError),
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamEvent::Delta(_))
    }
}
