use thiserror::Error;

/// Main error type for the query orchestrator
///
/// Variants map one-to-one onto the failure classes the resilience layer
/// distinguishes: only `Timeout` and `TransientServer` are retried, the
/// rest propagate unchanged to the orchestrator.
#[derive(Debug, Clone, Error)]
pub enum OrchestratorError {
    /// Bad credentials or rejected project id. Fatal, never retried.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Local rate limiter could not grant a permit within the wait ceiling,
    /// or the backend returned 429.
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Circuit breaker is open for the current index; no network call was made.
    #[error("Circuit open, retry after {retry_after_ms}ms")]
    CircuitOpen { retry_after_ms: u64 },

    /// Request or stream read timed out
    #[error("Request timeout: {0}")]
    Timeout(String),

    /// 5xx or connection-level failure, retried per policy
    #[error("Transient server error: {0}")]
    TransientServer(String),

    /// Response body did not match the expected shape. Surfaced, not retried.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Submitted query was empty after trimming
    #[error("Query is empty")]
    EmptyQuery,

    /// Index name is unknown to the vector backend
    #[error("Index not found: {0}")]
    IndexNotFound(String),

    /// Operation was canceled by the caller. A distinct terminal state,
    /// never counted as a failure by the circuit breaker.
    #[error("Canceled")]
    Canceled,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl OrchestratorError {
    /// Whether the resilience engine may retry this failure
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            OrchestratorError::Timeout(_) | OrchestratorError::TransientServer(_)
        )
    }

    /// Whether this outcome counts against the circuit breaker
    ///
    /// Only the transient classes do: a run of auth or validation failures
    /// says nothing about backend availability, and opening the circuit on
    /// them would misreport a credential problem as an outage.
    pub fn counts_as_failure(&self) -> bool {
        self.is_retriable()
    }

    /// Check if this is a cancellation
    pub fn is_canceled(&self) -> bool {
        matches!(self, OrchestratorError::Canceled)
    }

    /// Map an HTTP status and body excerpt to the taxonomy
    pub fn from_status(status: u16, body: &str) -> Self {
        match status {
            401 | 403 => OrchestratorError::Auth(format!("status {}: {}", status, body)),
            404 => OrchestratorError::IndexNotFound(body.to_string()),
            408 => OrchestratorError::Timeout(format!("status 408: {}", body)),
            429 => OrchestratorError::RateLimited(format!("status 429: {}", body)),
            s if s >= 500 => {
                OrchestratorError::TransientServer(format!("status {}: {}", s, body))
            }
            s => OrchestratorError::MalformedResponse(format!(
                "unexpected status {}: {}",
                s, body
            )),
        }
    }

    /// Short human-readable summary recorded on the affected message
    pub fn user_summary(&self) -> String {
        match self {
            OrchestratorError::Auth(_) => "Authentication failed. Check your API key.".to_string(),
            OrchestratorError::RateLimited(_) => {
                "The service is receiving too many requests. Try again shortly.".to_string()
            }
            OrchestratorError::CircuitOpen { retry_after_ms } => format!(
                "The search backend is temporarily unavailable. Retry in about {}s.",
                (retry_after_ms / 1000).max(1)
            ),
            OrchestratorError::Timeout(_) => "The request timed out.".to_string(),
            OrchestratorError::TransientServer(_) => {
                "The backend reported a temporary error.".to_string()
            }
            OrchestratorError::MalformedResponse(_) => {
                "Received an unexpected response from the backend.".to_string()
            }
            OrchestratorError::EmptyQuery => "Enter a question before searching.".to_string(),
            OrchestratorError::IndexNotFound(name) => format!("Index '{}' was not found.", name),
            OrchestratorError::Canceled => "The query was canceled.".to_string(),
            OrchestratorError::Config(_) => "The orchestrator is misconfigured.".to_string(),
            OrchestratorError::Internal(_) => "An internal error occurred.".to_string(),
        }
    }
}

/// Result type alias for orchestrator operations
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

impl From<reqwest::Error> for OrchestratorError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            OrchestratorError::Timeout(err.to_string())
        } else if err.is_connect() || err.is_request() {
            OrchestratorError::TransientServer(err.to_string())
        } else if err.is_decode() {
            OrchestratorError::MalformedResponse(err.to_string())
        } else {
            OrchestratorError::Internal(err.to_string())
        }
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        OrchestratorError::MalformedResponse(err.to_string())
    }
}
