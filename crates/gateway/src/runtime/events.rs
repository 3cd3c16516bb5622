//! Internal protocol between the agent driver and the stream side.

use serde::Serialize;
use serde_json::Value;

use kb_domain::stream::Usage;

/// Events emitted during one agent invocation.
///
/// `TextToken` payloads are already caller-visible: inline tool spans have
/// been removed and separators inserted before the event is sent.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    TextToken {
        text: String,
    },
    ToolCallRequested {
        call_id: String,
        tool_name: String,
        arguments: Value,
    },
    ToolCallResult {
        call_id: String,
        tool_name: String,
        content: String,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
    /// Terminal: the model produced a response with no further tool calls.
    Final {
        text: String,
        usage: Option<Usage>,
        /// Raw text chunks received from the backend across all rounds.
        tokens: u64,
    },
    /// Terminal: the backend failed or the tool loop limit was reached.
    Error {
        cause: String,
    },
}

impl AgentEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentEvent::Final { .. } | AgentEvent::Error { .. })
    }
}

/// Agent driver states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    /// Awaiting model output.
    Thinking,
    /// Tokens are arriving; they may still turn out to be tool markup.
    Emitting,
    ToolExecuting,
    Done,
    Failed,
}

impl DriverState {
    pub fn as_str(self) -> &'static str {
        match self {
            DriverState::Thinking => "thinking",
            DriverState::Emitting => "emitting",
            DriverState::ToolExecuting => "tool_executing",
            DriverState::Done => "done",
            DriverState::Failed => "failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_final_and_error_are_terminal() {
        assert!(AgentEvent::Error { cause: "x".into() }.is_terminal());
        assert!(AgentEvent::Final { text: String::new(), usage: None, tokens: 0 }.is_terminal());
        assert!(!AgentEvent::TextToken { text: "a".into() }.is_terminal());
    }

    #[test]
    fn serializes_with_snake_case_tag() {
        let json = serde_json::to_value(AgentEvent::TextToken { text: "hi".into() }).unwrap();
        assert_eq!(json["type"], "text_token");
        assert_eq!(json["text"], "hi");
    }
}
