//! The ask pipeline.
//!
//! `ask` loads history, assembles the prompt and spawns two tasks: the
//! agent driver, and a pipeline task that demultiplexes driver events into
//! the caller's stream and then runs the completion handler. The caller
//! reads [`AskStream::chunks`] as text arrives.

pub mod backend;
pub mod completion;
pub mod demux;
pub mod driver;
pub mod events;
pub mod history;
pub mod inline;
pub mod prompt;

use std::time::Instant;

use tokio::sync::mpsc;
use tracing::Instrument;

use kb_domain::conversation::ConversationId;
use kb_domain::error::{Error, Result};
use kb_domain::trace::TraceEvent;
use kb_observability::TraceStart;

use crate::state::AppState;

pub use backend::{BackendRegistry, ModelBackend};
pub use demux::{AskChunk, OutputAccumulator};
pub use events::{AgentEvent, DriverState};

use completion::CompletionContext;
use driver::{DriverInput, TokenCounter};
use prompt::PromptSettings;

/// Optional parameters of an ask.
#[derive(Debug, Clone, Default)]
pub struct AskOptions {
    /// Owner of the conversation. Empty or absent means anonymous.
    pub user: Option<String>,
    /// Continue this conversation; a fresh id is generated when absent.
    pub conversation_id: Option<ConversationId>,
    /// Model selector; the configured default when absent.
    pub model: Option<String>,
    /// Skip the long-term memory write.
    pub no_cache: bool,
}

/// A running ask.
#[derive(Debug)]
pub struct AskStream {
    pub conversation_id: ConversationId,
    /// Answer text in emission order, then the trailing marker. An `Err`
    /// item means the ask failed; nothing follows it.
    pub chunks: mpsc::Receiver<AskChunk>,
}

/// Like [`ask`], with a missing or blank input replaced by the configured
/// default question.
pub async fn ask_question(
    state: &AppState,
    input: Option<String>,
    opts: AskOptions,
) -> Result<AskStream> {
    let input = input
        .filter(|i| !i.trim().is_empty())
        .unwrap_or_else(|| state.config.agent.default_question.clone());
    ask(state, input, opts).await
}

/// Answer `input` as a stream.
///
/// Errors returned here (unknown model, empty input, history load failure)
/// happen before anything is streamed. Later failures arrive as an `Err`
/// chunk.
pub async fn ask(state: &AppState, input: String, opts: AskOptions) -> Result<AskStream> {
    let started = Instant::now();
    if input.trim().is_empty() {
        return Err(Error::InvalidRequest("input must not be empty".into()));
    }

    let backend = state.backends.resolve(opts.model.as_deref())?;
    let agent_cfg = &state.config.agent;
    let user = opts
        .user
        .filter(|u| !u.trim().is_empty())
        .unwrap_or_else(|| agent_cfg.anonymous_user.clone());
    let (session_id, supplied_id) = match opts.conversation_id {
        Some(id) => (id, true),
        None => (ConversationId::generate(), false),
    };

    let span = tracing::info_span!(
        "ask",
        session_id = %session_id,
        model = %backend.selector,
    );

    let prepared = async {
        let history = if supplied_id {
            history::load_history(state.store.as_ref(), agent_cfg, session_id, &user).await?
        } else {
            Vec::new()
        };

        tracing::info!(
            input = %preview(&input, 100),
            turns = history.len(),
            "asking {}",
            backend.model
        );
        TraceEvent::AskStarted {
            session_id: session_id.to_string(),
            user: user.clone(),
            model: backend.selector.clone(),
            is_new: history.is_empty(),
        }
        .emit();

        let trace = completion::open_trace(
            state.tracer.as_ref(),
            TraceStart {
                name: "ask".into(),
                input: input.clone(),
                session_id: session_id.to_string(),
                user: user.clone(),
                model: backend.selector.clone(),
            },
        )
        .await;

        let settings = PromptSettings {
            system_suffix: agent_cfg.system_prompt_suffix.clone(),
            temperature: state.config.llm.temperature,
            max_tokens: state.config.llm.max_tokens,
        };
        let request = backend.assemble_prompt(&history, &input, &state.tools.definitions(), &settings);
        let tokens = TokenCounter::default();
        let events = driver::spawn_driver(DriverInput {
            backend: backend.clone(),
            tools: state.tools.clone(),
            request,
            separator: agent_cfg.separator.clone(),
            max_tool_loops: state.config.llm.max_tool_loops,
            tokens: tokens.clone(),
        });

        Ok::<_, Error>((history, trace, events, tokens))
    }
    .instrument(span.clone())
    .await?;
    let (history, trace, events, tokens) = prepared;

    let ctx = CompletionContext {
        store: state.store.clone(),
        memory: state.memory.clone(),
        tracer: state.tracer.clone(),
        trace,
        session_id,
        supplied_id,
        history,
        input,
        user,
        model: backend.selector.clone(),
        no_cache: opts.no_cache,
        tokens,
        started,
    };

    let (tx, rx) = mpsc::channel::<AskChunk>(64);
    tokio::spawn(
        async move {
            let result = demux::demultiplex(events, &tx).await;
            completion::complete(ctx, result, tx).await;
        }
        .instrument(span),
    );

    Ok(AskStream { conversation_id: session_id, chunks: rx })
}

fn preview(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
