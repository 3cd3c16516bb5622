use std::sync::Arc;

use kb_domain::config::Config;
use kb_memory::MemoryProvider;
use kb_observability::Tracer;
use kb_providers::ProviderRegistry;
use kb_sessions::ConversationStore;
use kb_tools::ToolRegistry;

use crate::runtime::BackendRegistry;

/// Shared application state passed to the ask pipeline and API handlers.
///
/// Every collaborator sits behind a trait object so tests can swap in
/// scripted providers and recording stores.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub providers: Arc<ProviderRegistry>,
    /// Model selectors resolved to provider, model, family and protocol.
    pub backends: Arc<BackendRegistry>,
    pub store: Arc<dyn ConversationStore>,
    pub memory: Arc<dyn MemoryProvider>,
    pub tracer: Arc<dyn Tracer>,
    pub tools: Arc<ToolRegistry>,
}
