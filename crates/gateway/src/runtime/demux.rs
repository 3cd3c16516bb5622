//! Stream demultiplexer: turns agent events into the caller-facing text
//! stream and records exactly what was sent.

use tokio::sync::mpsc;

use kb_domain::error::{Error, Result};
use kb_domain::stream::Usage;

use super::events::AgentEvent;

/// Items of the caller-facing stream. An `Err` is the explicit failure
/// signal; the stream ends right after it.
pub type AskChunk = Result<String>;

/// Concatenation of every text chunk handed to the caller.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct OutputAccumulator {
    text: String,
    chunks: u64,
}

impl OutputAccumulator {
    pub fn push(&mut self, chunk: &str) {
        self.text.push_str(chunk);
        self.chunks += 1;
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn chunks(&self) -> u64 {
        self.chunks
    }

    pub fn into_string(self) -> String {
        self.text
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DemuxOutcome {
    Completed { usage: Option<Usage> },
    /// The caller stopped reading.
    Disconnected,
    Failed { cause: String },
}

impl DemuxOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DemuxOutcome::Completed { .. } => "completed",
            DemuxOutcome::Disconnected => "disconnected",
            DemuxOutcome::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug)]
pub struct Demultiplexed {
    pub outcome: DemuxOutcome,
    pub output: OutputAccumulator,
}

/// Forward text tokens to `sink` in arrival order until a terminal event.
///
/// Returns early when the caller drops its receiver; dropping `events` on
/// return stops the driver from pulling further model output.
pub async fn demultiplex(
    mut events: mpsc::Receiver<AgentEvent>,
    sink: &mpsc::Sender<AskChunk>,
) -> Demultiplexed {
    let mut output = OutputAccumulator::default();

    loop {
        let event = tokio::select! {
            biased;
            event = events.recv() => event,
            _ = sink.closed() => {
                return Demultiplexed { outcome: DemuxOutcome::Disconnected, output };
            }
        };

        let Some(event) = event else { break };
        match event {
            AgentEvent::TextToken { text } => {
                if sink.send(Ok(text.clone())).await.is_err() {
                    return Demultiplexed { outcome: DemuxOutcome::Disconnected, output };
                }
                output.push(&text);
            }
            AgentEvent::ToolCallRequested { call_id, tool_name, .. } => {
                tracing::debug!(%call_id, %tool_name, "tool requested");
            }
            AgentEvent::ToolCallResult { call_id, tool_name, is_error, .. } => {
                tracing::debug!(%call_id, %tool_name, is_error, "tool result");
            }
            AgentEvent::Final { text, usage, .. } => {
                if text != output.as_str() {
                    tracing::warn!(
                        final_chars = text.len(),
                        streamed_chars = output.as_str().len(),
                        "final text differs from streamed output; keeping streamed"
                    );
                }
                return Demultiplexed { outcome: DemuxOutcome::Completed { usage }, output };
            }
            AgentEvent::Error { cause } => {
                let _ = sink.send(Err(Error::Other(cause.clone()))).await;
                return Demultiplexed { outcome: DemuxOutcome::Failed { cause }, output };
            }
        }
    }

    let cause = "agent stopped without a final answer".to_string();
    let _ = sink.send(Err(Error::Other(cause.clone()))).await;
    Demultiplexed { outcome: DemuxOutcome::Failed { cause }, output }
}
