//! AppState construction shared by `serve` and the one-shot `ask` command.

use std::sync::Arc;

use anyhow::Context;

use kb_domain::config::{Config, ConfigSeverity};
use kb_providers::ProviderRegistry;
use kb_tools::{GetCurrentTimeTool, KnowledgeSearchTool, ToolRegistry};

use crate::runtime::BackendRegistry;
use crate::state::AppState;

/// Validate config, initialize every collaborator and return a fully-wired
/// [`AppState`].
pub async fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    let error_count = issues
        .iter()
        .filter(|i| i.severity == ConfigSeverity::Error)
        .count();
    if error_count > 0 {
        anyhow::bail!("config validation failed with {error_count} error(s)");
    }

    // ── LLM providers and model backends ─────────────────────────────
    let providers = ProviderRegistry::from_config(&config.llm);
    if providers.is_empty() {
        tracing::warn!("no LLM provider initialised; every ask will be rejected");
    } else {
        tracing::info!(providers = ?providers.list_providers(), "LLM providers ready");
    }
    let backends = BackendRegistry::from_config(&config.llm, &providers);
    if backends.resolve(None).is_err() {
        tracing::warn!(
            selector = %config.llm.default_selector,
            "default model selector is unavailable"
        );
    }

    // ── Collaborators ────────────────────────────────────────────────
    let store = kb_sessions::from_config(&config.store).context("opening conversation store")?;
    tracing::info!(kind = store.kind(), "conversation store ready");

    let memory = kb_memory::from_config(&config.memory).context("initializing memory client")?;
    let tracer = kb_observability::from_config(&config.observability);

    // ── Tools ────────────────────────────────────────────────────────
    let mut tools = ToolRegistry::new();
    tools
        .register(Arc::new(GetCurrentTimeTool))
        .register(Arc::new(KnowledgeSearchTool::new(memory.clone())));
    tracing::info!(tools = ?tools.names(), "tool registry ready");

    Ok(AppState {
        config,
        providers: Arc::new(providers),
        backends: Arc::new(backends),
        store,
        memory,
        tracer,
        tools: Arc::new(tools),
    })
}
