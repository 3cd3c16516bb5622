//! Per-ask trace records.
//!
//! A trace is opened before the agent runs and updated once the answer has
//! been streamed; [`Tracer::flush`] then releases whatever the backend
//! buffered.

pub mod langfuse;
pub mod tracer;

pub use langfuse::LangfuseTracer;
pub use tracer::{LogTracer, TraceEnd, TraceHandle, TraceStart, Tracer};

use std::sync::Arc;

use kb_domain::config::ObservabilityConfig;

/// Langfuse when enabled and its keys resolve, otherwise the log tracer.
pub fn from_config(cfg: &ObservabilityConfig) -> Arc<dyn Tracer> {
    if !cfg.langfuse.enabled {
        return Arc::new(LogTracer);
    }
    match LangfuseTracer::from_config(&cfg.langfuse) {
        Ok(tracer) => {
            tracing::info!(host = %cfg.langfuse.host, "langfuse tracing enabled");
            Arc::new(tracer)
        }
        Err(e) => {
            tracing::warn!(error = %e, "langfuse disabled, falling back to log tracer");
            Arc::new(LogTracer)
        }
    }
}
