pub mod completion;
pub mod config;
pub mod conversation;
pub mod error;
pub mod orchestrator;
pub mod resilience;
pub mod telemetry;
pub mod types;
pub mod vector;

pub use config::Config;
pub use error::{OrchestratorError, OrchestratorResult};
pub use types::*;

pub use completion::{CompletionClient, CompletionRequest, HttpCompletionTransport, ModelParams};
pub use conversation::{AssembledHistory, ConversationManager, HistoryStrategy};
pub use orchestrator::{QueryOptions, QueryPhase, SearchOrchestrator};
pub use resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState, ResilienceExecutor,
    RetryPolicy, TokenBucket,
};
pub use telemetry::{NullSink, TelemetryEvent, TelemetrySink, TracingSink};
pub use vector::{
    DeleteTarget, HttpVectorTransport, IndexContext, MetadataFilter, VectorStoreClient,
};
