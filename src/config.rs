use crate::error::{OrchestratorError, OrchestratorResult};
use crate::types::ConversationMode;
use std::env;
use std::time::Duration;

/// Orchestrator configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Vector backend configuration
    pub vector: VectorBackendConfig,
    /// Completion/embedding backend configuration
    pub completion: CompletionBackendConfig,
    /// Resilience tuning shared by both clients
    pub resilience: ResilienceConfig,
    /// Injected snapshot of persisted user settings
    pub settings: SettingsSnapshot,
}

/// Vector backend connection settings
#[derive(Debug, Clone)]
pub struct VectorBackendConfig {
    /// Control-plane host used for index host resolution
    pub control_host: String,
    /// Opaque API key
    pub api_key: String,
    /// Project identifier sent alongside the key
    pub project_id: String,
    /// Per-request timeout in milliseconds
    pub request_timeout_ms: u64,
}

/// Completion backend connection settings
#[derive(Debug, Clone)]
pub struct CompletionBackendConfig {
    /// Base URL of the completion/embedding API
    pub base_url: String,
    /// Opaque API key
    pub api_key: String,
    /// Chat model identifier
    pub model: String,
    /// Embedding model identifier
    pub embedding_model: String,
    /// Per-request timeout in milliseconds (streaming reads excluded)
    pub request_timeout_ms: u64,
}

/// Retry, rate-limit, and circuit-breaker tuning
#[derive(Debug, Clone)]
pub struct ResilienceConfig {
    /// Maximum attempts per operation (>= 1)
    pub max_attempts: u32,
    /// Base delay for exponential backoff
    pub base_delay: Duration,
    /// Backoff multiplier per attempt
    pub multiplier: f64,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Jitter fraction (0.0 to 1.0)
    pub jitter_fraction: f64,
    /// Token bucket capacity
    pub rate_capacity: f64,
    /// Token refill rate per second
    pub rate_refill_per_sec: f64,
    /// Ceiling on how long a caller may wait for a permit
    pub rate_max_wait: Duration,
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,
    /// Base cooldown when the circuit opens
    pub base_cooldown: Duration,
    /// Ceiling on the cooldown regardless of failure count
    pub max_cooldown: Duration,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100), // 100ms, 200ms, 400ms
            multiplier: 2.0,
            max_delay: Duration::from_secs(2),
            jitter_fraction: 0.1,
            rate_capacity: 10.0,
            rate_refill_per_sec: 5.0,
            rate_max_wait: Duration::from_secs(5),
            failure_threshold: 5,
            base_cooldown: Duration::from_secs(10),
            max_cooldown: Duration::from_secs(120),
        }
    }
}

/// Snapshot of persisted user settings, read at session start
///
/// Persistence itself is an external collaborator; this crate only
/// consumes the snapshot it is handed.
#[derive(Debug, Clone)]
pub struct SettingsSnapshot {
    /// Last-selected index, if any
    pub last_index: Option<String>,
    /// Last-selected namespace within the index
    pub namespace: Option<String>,
    /// Default number of matches requested per query
    pub default_top_k: u32,
    /// Conversation mode for new sessions
    pub conversation_mode: ConversationMode,
    /// Saved metadata filter presets as raw field/expression pairs
    pub filter_presets: Vec<(String, String)>,
    /// Completed-turn budget for local history
    pub history_turn_budget: usize,
}

impl Default for SettingsSnapshot {
    fn default() -> Self {
        Self {
            last_index: None,
            namespace: None,
            default_top_k: 5,
            conversation_mode: ConversationMode::Local,
            filter_presets: Vec::new(),
            history_turn_budget: 8,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> OrchestratorResult<Self> {
        // Load .env file if it exists
        if let Err(e) = dotenvy::dotenv() {
            tracing::debug!("Could not load .env file: {}", e);
        }

        let config = Config {
            vector: VectorBackendConfig {
                control_host: env::var("VECTOR_CONTROL_HOST").map_err(|_| {
                    OrchestratorError::Config("VECTOR_CONTROL_HOST is required".to_string())
                })?,
                api_key: env::var("VECTOR_API_KEY").map_err(|_| {
                    OrchestratorError::Config("VECTOR_API_KEY is required".to_string())
                })?,
                project_id: env::var("VECTOR_PROJECT_ID").unwrap_or_default(),
                request_timeout_ms: parse_env("VECTOR_REQUEST_TIMEOUT_MS", "10000")?,
            },
            completion: CompletionBackendConfig {
                base_url: env::var("COMPLETION_BASE_URL").map_err(|_| {
                    OrchestratorError::Config("COMPLETION_BASE_URL is required".to_string())
                })?,
                api_key: env::var("COMPLETION_API_KEY").map_err(|_| {
                    OrchestratorError::Config("COMPLETION_API_KEY is required".to_string())
                })?,
                model: env::var("COMPLETION_MODEL")
                    .unwrap_or_else(|_| "gpt-4o-mini".to_string()),
                embedding_model: env::var("EMBEDDING_MODEL")
                    .unwrap_or_else(|_| "text-embedding-3-small".to_string()),
                request_timeout_ms: parse_env("COMPLETION_REQUEST_TIMEOUT_MS", "30000")?,
            },
            resilience: ResilienceConfig {
                max_attempts: parse_env("RESILIENCE_MAX_ATTEMPTS", "3")?,
                base_delay: Duration::from_millis(parse_env("RESILIENCE_BASE_DELAY_MS", "100")?),
                multiplier: parse_env("RESILIENCE_MULTIPLIER", "2.0")?,
                max_delay: Duration::from_millis(parse_env("RESILIENCE_MAX_DELAY_MS", "2000")?),
                jitter_fraction: parse_env("RESILIENCE_JITTER", "0.1")?,
                rate_capacity: parse_env("RATE_LIMIT_CAPACITY", "10.0")?,
                rate_refill_per_sec: parse_env("RATE_LIMIT_REFILL_PER_SEC", "5.0")?,
                rate_max_wait: Duration::from_millis(parse_env("RATE_LIMIT_MAX_WAIT_MS", "5000")?),
                failure_threshold: parse_env("CIRCUIT_FAILURE_THRESHOLD", "5")?,
                base_cooldown: Duration::from_millis(parse_env("CIRCUIT_BASE_COOLDOWN_MS", "10000")?),
                max_cooldown: Duration::from_millis(parse_env("CIRCUIT_MAX_COOLDOWN_MS", "120000")?),
            },
            settings: SettingsSnapshot::default(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> OrchestratorResult<()> {
        if self.vector.control_host.is_empty() {
            return Err(OrchestratorError::Config(
                "Vector control host cannot be empty".to_string(),
            ));
        }
        if self.vector.api_key.is_empty() {
            return Err(OrchestratorError::Config(
                "Vector API key cannot be empty".to_string(),
            ));
        }
        if !self.completion.base_url.starts_with("http://")
            && !self.completion.base_url.starts_with("https://")
        {
            return Err(OrchestratorError::Config(
                "COMPLETION_BASE_URL must start with http:// or https://".to_string(),
            ));
        }
        if self.completion.api_key.is_empty() {
            return Err(OrchestratorError::Config(
                "Completion API key cannot be empty".to_string(),
            ));
        }
        if self.resilience.max_attempts == 0 {
            return Err(OrchestratorError::Config(
                "RESILIENCE_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.resilience.jitter_fraction) {
            return Err(OrchestratorError::Config(
                "RESILIENCE_JITTER must be between 0.0 and 1.0".to_string(),
            ));
        }
        if self.resilience.rate_capacity <= 0.0 || self.resilience.rate_refill_per_sec <= 0.0 {
            return Err(OrchestratorError::Config(
                "Rate limiter capacity and refill rate must be positive".to_string(),
            ));
        }
        if self.resilience.failure_threshold == 0 {
            return Err(OrchestratorError::Config(
                "CIRCUIT_FAILURE_THRESHOLD must be at least 1".to_string(),
            ));
        }
        if self.settings.default_top_k == 0 {
            return Err(OrchestratorError::Config(
                "Default topK must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            vector: VectorBackendConfig {
                control_host: "".to_string(),
                api_key: "".to_string(),
                project_id: "".to_string(),
                request_timeout_ms: 10_000,
            },
            completion: CompletionBackendConfig {
                base_url: "".to_string(),
                api_key: "".to_string(),
                model: "gpt-4o-mini".to_string(),
                embedding_model: "text-embedding-3-small".to_string(),
                request_timeout_ms: 30_000,
            },
            resilience: ResilienceConfig::default(),
            settings: SettingsSnapshot::default(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, default: &str) -> OrchestratorResult<T>
where
    T::Err: std::fmt::Display,
{
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|e| OrchestratorError::Config(format!("Invalid {}: {}", name, e)))
}
