//! Agent driver: submits the request, interprets the streamed response as
//! text or tool calls, executes tools, feeds results back and repeats until
//! the model answers without calling a tool.
//!
//! Entry point: [`spawn_driver`] runs the loop on its own task and returns a
//! channel of [`AgentEvent`]s. When the receiver is dropped the driver stops
//! pulling from the backend, drops the backend stream and abandons any tool
//! still running.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::Instrument;

use kb_domain::config::ToolProtocol;
use kb_domain::error::{Error, Result};
use kb_domain::stream::{StreamEvent, Usage};
use kb_domain::tool::{Message, ToolCall};
use kb_domain::trace::TraceEvent;
use kb_providers::ChatRequest;
use kb_tools::{ToolOutput, ToolRegistry};

use super::backend::ModelBackend;
use super::events::{AgentEvent, DriverState};
use super::inline::{self, InlineSpanFilter};

/// Everything one agent invocation needs.
pub struct DriverInput {
    pub backend: Arc<ModelBackend>,
    pub tools: Arc<ToolRegistry>,
    /// Fully assembled first request.
    pub request: ChatRequest,
    /// Inserted in place of each suppressed inline span.
    pub separator: String,
    pub max_tool_loops: usize,
    pub tokens: TokenCounter,
}

/// Raw text chunks received from the backend, across all rounds.
///
/// Shared with the completion side so the count survives a disconnect or a
/// failure, where no `Final` event carries it.
#[derive(Debug, Clone, Default)]
pub struct TokenCounter(Arc<AtomicU64>);

impl TokenCounter {
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    fn incr(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }
}

pub fn spawn_driver(input: DriverInput) -> mpsc::Receiver<AgentEvent> {
    let (tx, rx) = mpsc::channel::<AgentEvent>(64);
    let span = tracing::info_span!(
        "agent",
        selector = %input.backend.selector,
        protocol = ?input.backend.protocol,
    );
    tokio::spawn(AgentDriver::new(input, tx).run().instrument(span));
    rx
}

enum RoundEnd {
    /// No tool calls: the accumulated text is the answer.
    Final,
    /// Tools ran and their results were appended; go again.
    ToolsRan,
    /// The receiver is gone.
    Disconnected,
}

struct AgentDriver {
    backend: Arc<ModelBackend>,
    tools: Arc<ToolRegistry>,
    request: ChatRequest,
    separator: String,
    max_tool_loops: usize,
    tx: mpsc::Sender<AgentEvent>,
    state: DriverState,
    /// Caller-visible text across all rounds.
    text: String,
    tokens: TokenCounter,
    usage: Option<Usage>,
}

impl AgentDriver {
    fn new(input: DriverInput, tx: mpsc::Sender<AgentEvent>) -> Self {
        Self {
            backend: input.backend,
            tools: input.tools,
            request: input.request,
            separator: input.separator,
            max_tool_loops: input.max_tool_loops,
            tx,
            state: DriverState::Thinking,
            text: String::new(),
            tokens: input.tokens,
            usage: None,
        }
    }

    async fn run(mut self) {
        match self.drive().await {
            Ok(true) => {
                self.transition(DriverState::Done);
                let event = AgentEvent::Final {
                    text: std::mem::take(&mut self.text),
                    usage: self.usage,
                    tokens: self.tokens.get(),
                };
                let _ = self.tx.send(event).await;
            }
            Ok(false) => {
                tracing::debug!(tokens = self.tokens.get(), "receiver dropped; agent stopped");
            }
            Err(e) => {
                self.transition(DriverState::Failed);
                tracing::warn!(error = %e, "agent failed");
                let _ = self.tx.send(AgentEvent::Error { cause: e.to_string() }).await;
            }
        }
    }

    /// `Ok(true)` on a final answer, `Ok(false)` when the caller went away.
    async fn drive(&mut self) -> Result<bool> {
        for round in 0..self.max_tool_loops {
            if self.tx.is_closed() {
                return Ok(false);
            }
            self.transition(DriverState::Thinking);

            let span = tracing::info_span!(
                "llm.call",
                "otel.kind" = "CLIENT",
                round,
                provider = %self.backend.provider_id(),
                model = %self.backend.model,
            );
            let protocol = self.backend.protocol;
            let end = match protocol {
                ToolProtocol::Native => self.native_round().instrument(span).await?,
                ToolProtocol::InlineMarkup => self.inline_round(round).instrument(span).await?,
            };

            match end {
                RoundEnd::Final => return Ok(true),
                RoundEnd::Disconnected => return Ok(false),
                RoundEnd::ToolsRan => {}
            }
        }
        Err(Error::Other(format!(
            "tool loop limit reached after {} model rounds",
            self.max_tool_loops
        )))
    }

    // ── Native protocol ─────────────────────────────────────────────

    async fn native_round(&mut self) -> Result<RoundEnd> {
        let started = Instant::now();
        let mut stream = self.backend.invoke(self.request.clone()).await?;

        let mut round_text = String::new();
        let mut calls: Vec<ToolCall> = Vec::new();
        let mut round_usage = None;

        loop {
            let event = tokio::select! {
                event = stream.next() => event,
                _ = self.tx.closed() => return Ok(RoundEnd::Disconnected),
            };
            let Some(event) = event else { break };
            match event? {
                StreamEvent::Token { text } => {
                    self.tokens.incr();
                    self.transition(DriverState::Emitting);
                    round_text.push_str(&text);
                    if !self.emit_text(text).await {
                        return Ok(RoundEnd::Disconnected);
                    }
                }
                StreamEvent::ToolCallStarted { call_id, tool_name } => {
                    tracing::debug!(%call_id, %tool_name, "tool call started");
                }
                StreamEvent::ToolCallDelta { .. } => {}
                StreamEvent::ToolCallFinished { call_id, tool_name, arguments } => {
                    calls.push(ToolCall { call_id, tool_name, arguments });
                }
                StreamEvent::Done { usage, .. } => {
                    round_usage = usage;
                    break;
                }
                StreamEvent::Error { message } => return Err(self.backend_error(message)),
            }
        }
        self.record_round(started, round_usage);

        if calls.is_empty() {
            return Ok(RoundEnd::Final);
        }

        self.request
            .messages
            .push(Message::assistant_tool_calls(&round_text, &calls));
        for call in calls {
            let Some(output) = self.execute(&call).await else {
                return Ok(RoundEnd::Disconnected);
            };
            self.request
                .messages
                .push(Message::tool_result(call.call_id, output.content, output.is_error));
        }
        Ok(RoundEnd::ToolsRan)
    }

    // ── Inline-markup protocol ──────────────────────────────────────

    async fn inline_round(&mut self, round: usize) -> Result<RoundEnd> {
        let started = Instant::now();
        let mut stream = self.backend.invoke(self.request.clone()).await?;

        let mut filter = InlineSpanFilter::new(self.separator.clone());
        let mut raw = String::new();
        let mut calls: Vec<ToolCall> = Vec::new();
        let mut round_usage = None;

        loop {
            let event = tokio::select! {
                event = stream.next() => event,
                _ = self.tx.closed() => return Ok(RoundEnd::Disconnected),
            };
            let Some(event) = event else { break };
            match event? {
                StreamEvent::Token { text } => {
                    self.tokens.incr();
                    self.transition(DriverState::Emitting);
                    raw.push_str(&text);

                    let out = filter.push(&text);
                    for span in &out.spans {
                        let call_id = format!("inline_{round}_{}", calls.len());
                        if let Some(call) = parse_inline(span, call_id) {
                            calls.push(call);
                        }
                    }
                    if !out.visible.is_empty() && !self.emit_text(out.visible).await {
                        return Ok(RoundEnd::Disconnected);
                    }
                }
                StreamEvent::ToolCallStarted { tool_name, .. } => {
                    tracing::debug!(%tool_name, "native tool call ignored by inline backend");
                }
                StreamEvent::ToolCallDelta { .. } | StreamEvent::ToolCallFinished { .. } => {}
                StreamEvent::Done { usage, .. } => {
                    round_usage = usage;
                    break;
                }
                StreamEvent::Error { message } => return Err(self.backend_error(message)),
            }
        }

        if let Some(partial) = filter.finish() {
            let span_chars = partial.chars().count();
            tracing::warn!(span_chars, "unterminated inline tool span dropped");
            TraceEvent::InlineSpanSuppressed { span_chars, parsed: false }.emit();
        }
        self.record_round(started, round_usage);

        if calls.is_empty() {
            return Ok(RoundEnd::Final);
        }

        self.request.messages.push(Message::assistant(raw));
        for call in calls {
            let Some(output) = self.execute(&call).await else {
                return Ok(RoundEnd::Disconnected);
            };
            let verb = if output.is_error { "failed" } else { "returned" };
            self.request.messages.push(Message::user(format!(
                "Tool {} {verb}:\n{}",
                call.tool_name, output.content
            )));
        }
        Ok(RoundEnd::ToolsRan)
    }

    // ── Shared helpers ──────────────────────────────────────────────

    async fn execute(&mut self, call: &ToolCall) -> Option<ToolOutput> {
        self.transition(DriverState::ToolExecuting);
        let requested = AgentEvent::ToolCallRequested {
            call_id: call.call_id.clone(),
            tool_name: call.tool_name.clone(),
            arguments: call.arguments.clone(),
        };
        if self.tx.send(requested).await.is_err() {
            return None;
        }

        let started = Instant::now();
        let output = tokio::select! {
            output = self.tools.dispatch(&call.tool_name, call.arguments.clone()) => output,
            _ = self.tx.closed() => {
                tracing::debug!(tool = %call.tool_name, "receiver dropped; tool abandoned");
                return None;
            }
        };
        TraceEvent::ToolExecuted {
            tool_name: call.tool_name.clone(),
            call_id: call.call_id.clone(),
            is_error: output.is_error,
            duration_ms: started.elapsed().as_millis() as u64,
        }
        .emit();
        if output.is_error {
            tracing::warn!(
                tool = %call.tool_name,
                error = %output.content,
                "tool failed; result handed back to the model"
            );
        }

        let result = AgentEvent::ToolCallResult {
            call_id: call.call_id.clone(),
            tool_name: call.tool_name.clone(),
            content: output.content.clone(),
            is_error: output.is_error,
        };
        if self.tx.send(result).await.is_err() {
            return None;
        }
        Some(output)
    }

    async fn emit_text(&mut self, text: String) -> bool {
        self.text.push_str(&text);
        self.tx.send(AgentEvent::TextToken { text }).await.is_ok()
    }

    fn record_round(&mut self, started: Instant, usage: Option<Usage>) {
        if let Some(u) = &usage {
            self.usage.get_or_insert_with(Usage::default).accumulate(u);
        }
        TraceEvent::LlmRequest {
            provider: self.backend.provider_id().to_string(),
            model: self.backend.model.clone(),
            streaming: true,
            duration_ms: started.elapsed().as_millis() as u64,
            prompt_tokens: usage.map(|u| u.prompt_tokens),
            completion_tokens: usage.map(|u| u.completion_tokens),
        }
        .emit();
    }

    fn backend_error(&self, message: String) -> Error {
        Error::Provider { provider: self.backend.provider_id().to_string(), message }
    }

    fn transition(&mut self, next: DriverState) {
        if self.state != next {
            tracing::trace!(from = self.state.as_str(), to = next.as_str(), "agent state");
            self.state = next;
        }
    }
}

fn parse_inline(span: &str, call_id: String) -> Option<ToolCall> {
    let span_chars = span.chars().count();
    match inline::parse_span(span, call_id) {
        Ok(call) => {
            TraceEvent::InlineSpanSuppressed { span_chars, parsed: true }.emit();
            Some(call)
        }
        Err(e) => {
            tracing::warn!(error = %e, span_chars, "malformed inline tool span; text resumes");
            TraceEvent::InlineSpanSuppressed { span_chars, parsed: false }.emit();
            None
        }
    }
}
