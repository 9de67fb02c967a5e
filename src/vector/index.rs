/// Index selection state
///
/// An `IndexContext` is created when the user switches index and replaced
/// atomically; resilience state is scoped to the handle that owns it, so a
/// switch discards the prior index's circuit and rate-limiter state.
use crate::resilience::ResilienceExecutor;
use crate::types::IndexStats;
use std::sync::Mutex;

/// Selected index, its resolved data-plane host, and optional namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexContext {
    pub index_name: String,
    pub host: String,
    pub namespace: Option<String>,
}

/// Per-index state owned by the vector store client
///
/// Holds the resilience executor guarding this index plus advisory caches
/// of namespace and stat views, repopulated after mutating calls.
pub(crate) struct IndexHandle {
    pub context: IndexContext,
    pub executor: ResilienceExecutor,
    pub cached_stats: Mutex<Option<IndexStats>>,
    pub cached_namespaces: Mutex<Vec<String>>,
}

impl IndexHandle {
    pub fn new(context: IndexContext, executor: ResilienceExecutor) -> Self {
        Self {
            context,
            executor,
            cached_stats: Mutex::new(None),
            cached_namespaces: Mutex::new(Vec::new()),
        }
    }
}
