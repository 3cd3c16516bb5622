use async_trait::async_trait;
use serde::Serialize;

use kb_domain::error::Result;
use kb_domain::trace::TraceEvent;

/// What is known when an ask starts.
#[derive(Debug, Clone, Serialize)]
pub struct TraceStart {
    pub name: String,
    pub input: String,
    pub session_id: String,
    pub user: String,
    pub model: String,
}

/// What is recorded once the answer stream has closed.
#[derive(Debug, Clone, Serialize)]
pub struct TraceEnd {
    pub output: String,
    pub session_id: String,
    pub user: String,
    pub model: String,
    /// Raw token chunks received from the backend.
    pub tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceHandle {
    pub trace_id: String,
}

impl TraceHandle {
    pub fn new() -> Self {
        Self { trace_id: uuid::Uuid::new_v4().to_string() }
    }
}

impl Default for TraceHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Observability collaborator.
#[async_trait]
pub trait Tracer: Send + Sync {
    async fn begin(&self, start: TraceStart) -> Result<TraceHandle>;

    async fn update(&self, handle: &TraceHandle, end: TraceEnd) -> Result<()>;

    /// Push anything buffered to the backend.
    async fn flush(&self) -> Result<()>;
}

/// Writes trace records to the structured log only.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTracer;

#[async_trait]
impl Tracer for LogTracer {
    async fn begin(&self, start: TraceStart) -> Result<TraceHandle> {
        let handle = TraceHandle::new();
        tracing::debug!(
            trace_id = %handle.trace_id,
            session_id = %start.session_id,
            model = %start.model,
            "trace opened"
        );
        Ok(handle)
    }

    async fn update(&self, handle: &TraceHandle, end: TraceEnd) -> Result<()> {
        TraceEvent::TraceRecorded {
            trace_id: handle.trace_id.clone(),
            tokens: end.tokens,
        }
        .emit();
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}
