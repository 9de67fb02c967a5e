/// Streaming completion client module
///
/// Embeddings, non-streaming fallback completions, and SSE-decoded
/// streaming completions with cancellation.
pub mod client;
pub mod params;
pub mod sse;


pub use client::{
    ChatMessage, CompletionClient, CompletionRequest, CompletionTransport,
    HttpCompletionTransport, TextChunkStream,
};
pub use params::{ModelParams, ReasoningEffort};
pub use sse::SseDecoder;
