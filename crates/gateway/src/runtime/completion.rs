//! Completion handler: runs once per ask after the demultiplexer returns.
//!
//! Writes the trailing marker, then persists the conversation, writes the
//! memory record and closes the trace. The three side effects run
//! concurrently and fail independently; failures are logged and never
//! reach the caller. The caller's stream is released last.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;

use kb_domain::conversation::{ConversationId, ConversationRecord, PersistedTurn};
use kb_domain::error::Result;
use kb_domain::trace::TraceEvent;
use kb_memory::{MemoryProvider, MemoryRecord};
use kb_observability::{TraceEnd, TraceHandle, TraceStart, Tracer};
use kb_sessions::ConversationStore;

use super::demux::{AskChunk, DemuxOutcome, Demultiplexed};
use super::driver::TokenCounter;

/// Per-ask state gathered before the agent ran.
pub struct CompletionContext {
    pub store: Arc<dyn ConversationStore>,
    pub memory: Arc<dyn MemoryProvider>,
    pub tracer: Arc<dyn Tracer>,
    pub trace: TraceHandle,
    pub session_id: ConversationId,
    /// Whether the caller supplied the id (as opposed to a fresh one).
    pub supplied_id: bool,
    pub history: Vec<PersistedTurn>,
    pub input: String,
    pub user: String,
    /// Model selector, stored on the row and in the memory record.
    pub model: String,
    pub no_cache: bool,
    /// Raw backend chunks, shared with the driver.
    pub tokens: TokenCounter,
    pub started: Instant,
}

/// How the conversation row was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistMode {
    Update,
    Upsert,
}

impl PersistMode {
    pub fn as_str(self) -> &'static str {
        match self {
            PersistMode::Update => "update",
            PersistMode::Upsert => "upsert",
        }
    }
}

/// The JSON object written after the answer text.
pub fn trailing_marker(id: ConversationId) -> String {
    serde_json::json!({ "conversationId": id.to_string() }).to_string()
}

/// A completed ask is always kept, even with an empty answer. A failed ask
/// leaves no turn behind; a disconnect keeps whatever was sent, if anything.
pub fn keep_turn(outcome: &DemuxOutcome, output: &str) -> bool {
    match outcome {
        DemuxOutcome::Completed { .. } => true,
        DemuxOutcome::Disconnected => !output.is_empty(),
        DemuxOutcome::Failed { .. } => false,
    }
}

/// Update by id only for a caller-supplied id with existing history;
/// everything else is an upsert.
pub fn persist_mode(supplied_id: bool, history: &[PersistedTurn]) -> PersistMode {
    if supplied_id && !history.is_empty() {
        PersistMode::Update
    } else {
        PersistMode::Upsert
    }
}

pub async fn complete(ctx: CompletionContext, result: Demultiplexed, sink: mpsc::Sender<AskChunk>) {
    let Demultiplexed { outcome, output } = result;

    if let DemuxOutcome::Completed { usage } = &outcome {
        if let Some(u) = usage {
            tracing::debug!(
                prompt_tokens = u.prompt_tokens,
                completion_tokens = u.completion_tokens,
                "provider usage"
            );
        }
        if sink.send(Ok(trailing_marker(ctx.session_id))).await.is_err() {
            tracing::debug!(session_id = %ctx.session_id, "caller gone before marker");
        }
    }
    let tokens = ctx.tokens.get();

    let output = output.into_string();
    let keep = keep_turn(&outcome, &output);

    let persist_turns = async {
        if keep {
            persist(&ctx, &output).await.map(Some)
        } else {
            Ok(None)
        }
    };
    let write_memory = async {
        if keep && !ctx.no_cache {
            remember(&ctx, &output).await.map(Some)
        } else {
            Ok(None)
        }
    };
    let finish_trace = close_trace(&ctx, &output, tokens);

    let (persisted, remembered, traced) =
        tokio::join!(persist_turns, write_memory, finish_trace);

    match persisted {
        Ok(Some(mode)) => TraceEvent::ConversationPersisted {
            session_id: ctx.session_id.to_string(),
            mode: mode.as_str().into(),
            turns: ctx.history.len() + 2,
        }
        .emit(),
        Ok(None) => tracing::info!(
            session_id = %ctx.session_id,
            outcome = outcome.as_str(),
            "nothing to persist"
        ),
        Err(e) => {
            tracing::error!(session_id = %ctx.session_id, error = %e, "persisting conversation failed")
        }
    }
    match remembered {
        Ok(Some(())) => tracing::debug!(session_id = %ctx.session_id, "memory record written"),
        Ok(None) => {}
        Err(e) => tracing::warn!(session_id = %ctx.session_id, error = %e, "memory write failed"),
    }
    if let Err(e) = traced {
        tracing::warn!(session_id = %ctx.session_id, error = %e, "trace update failed");
    }

    if let DemuxOutcome::Failed { cause } = &outcome {
        tracing::warn!(session_id = %ctx.session_id, %cause, "ask failed");
    }
    TraceEvent::AskCompleted {
        session_id: ctx.session_id.to_string(),
        outcome: outcome.as_str().into(),
        output_chars: output.chars().count(),
        tokens,
        duration_ms: ctx.started.elapsed().as_millis() as u64,
    }
    .emit();

    drop(sink);
}

async fn persist(ctx: &CompletionContext, output: &str) -> Result<PersistMode> {
    let mut turns = Vec::with_capacity(ctx.history.len() + 2);
    turns.extend(ctx.history.iter().cloned());
    turns.push(PersistedTurn::user(ctx.input.clone()));
    turns.push(PersistedTurn::assistant(output));

    let mode = persist_mode(ctx.supplied_id, &ctx.history);
    match mode {
        PersistMode::Update => ctx.store.update_messages(ctx.session_id, &turns).await?,
        PersistMode::Upsert => {
            ctx.store
                .upsert(&ConversationRecord {
                    id: ctx.session_id,
                    user: Some(ctx.user.clone()),
                    model: Some(ctx.model.clone()),
                    messages: turns,
                })
                .await?
        }
    }
    Ok(mode)
}

async fn remember(ctx: &CompletionContext, output: &str) -> Result<()> {
    ctx.memory
        .write(MemoryRecord {
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            input: ctx.input.clone(),
            output: output.to_string(),
            model: ctx.model.clone(),
            user: ctx.user.clone(),
        })
        .await
}

async fn close_trace(ctx: &CompletionContext, output: &str, tokens: u64) -> Result<()> {
    let end = TraceEnd {
        output: output.to_string(),
        session_id: ctx.session_id.to_string(),
        user: ctx.user.clone(),
        model: ctx.model.clone(),
        tokens,
    };
    let updated = ctx.tracer.update(&ctx.trace, end).await;
    // Flush even when the update failed so buffered events are released.
    let flushed = ctx.tracer.flush().await;
    updated?;
    flushed
}

/// Best-effort trace start; a tracer failure never blocks the ask.
pub async fn open_trace(tracer: &dyn Tracer, start: TraceStart) -> TraceHandle {
    match tracer.begin(start).await {
        Ok(handle) => handle,
        Err(e) => {
            tracing::warn!(error = %e, "trace start failed; continuing untraced");
            TraceHandle::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_needs_supplied_id_and_history() {
        let history = vec![PersistedTurn::user("a"), PersistedTurn::assistant("b")];
        assert_eq!(persist_mode(true, &history), PersistMode::Update);
        assert_eq!(persist_mode(true, &[]), PersistMode::Upsert);
        assert_eq!(persist_mode(false, &history), PersistMode::Upsert);
    }

    #[test]
    fn completed_turns_are_kept_even_when_empty() {
        assert!(keep_turn(&DemuxOutcome::Completed { usage: None }, ""));
        assert!(keep_turn(&DemuxOutcome::Disconnected, "partial"));
        assert!(!keep_turn(&DemuxOutcome::Disconnected, ""));
        assert!(!keep_turn(&DemuxOutcome::Failed { cause: "x".into() }, "partial"));
    }

    #[test]
    fn marker_carries_the_id_as_string() {
        let marker = trailing_marker(ConversationId::new(42));
        assert_eq!(marker, r#"{"conversationId":"42"}"#);
    }
}
