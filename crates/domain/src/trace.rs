use serde::Serialize;

/// Structured trace events emitted across all kbask crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    AskStarted {
        session_id: String,
        user: String,
        model: String,
        is_new: bool,
    },
    HistoryLoaded {
        session_id: String,
        turns: usize,
        owner_filtered: bool,
    },
    LlmRequest {
        provider: String,
        model: String,
        streaming: bool,
        duration_ms: u64,
        prompt_tokens: Option<u32>,
        completion_tokens: Option<u32>,
    },
    ToolExecuted {
        tool_name: String,
        call_id: String,
        is_error: bool,
        duration_ms: u64,
    },
    InlineSpanSuppressed {
        span_chars: usize,
        parsed: bool,
    },
    ConversationPersisted {
        session_id: String,
        mode: String,
        turns: usize,
    },
    MemoryWrite {
        endpoint: String,
        status: u16,
        duration_ms: u64,
    },
    TraceRecorded {
        trace_id: String,
        tokens: u64,
    },
    AskCompleted {
        session_id: String,
        outcome: String,
        output_chars: usize,
        tokens: u64,
        duration_ms: u64,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "kb_event");
    }
}
