/// Vector store client module
///
/// Index selection and host resolution, ranked queries with metadata
/// filters, mutations with advisory stat refresh. All network calls run
/// through the per-index resilience executor.
pub mod client;
pub mod filter;
pub mod index;

#[cfg(test)]
mod tests;

pub use client::{DeleteTarget, HttpVectorTransport, QueryRequest, VectorStoreClient, VectorTransport};
pub use filter::{FilterExpr, MetadataFilter};
pub use index::IndexContext;
