//! Prompt assembly. Pure: the same family, protocol, history, input and
//! tools always produce the same request.

use std::fmt::Write as _;

use kb_domain::config::{ModelFamily, ToolProtocol};
use kb_domain::conversation::PersistedTurn;
use kb_domain::tool::{Message, ToolDefinition};
use kb_providers::ChatRequest;

/// Per-request knobs taken from config.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PromptSettings {
    pub system_suffix: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

const ANTHROPIC_PREAMBLE: &str = "You are a knowledgeable assistant answering questions about \
a knowledge base. Think about which tools can help before you answer. When you use a tool, \
wait for its result and base your answer on it. Answer in plain prose and say so when the \
knowledge base does not contain the answer.";

const OPENAI_PREAMBLE: &str = "You are a helpful assistant that answers questions about a \
knowledge base. Use the available tools to look up facts instead of guessing. Keep answers \
concise and say so when the knowledge base does not contain the answer.";

/// System instruction for a model family. Inline-markup backends also get
/// the tool catalogue and the span format, since no native tools are sent.
pub fn system_instruction(
    family: ModelFamily,
    protocol: ToolProtocol,
    tools: &[ToolDefinition],
    suffix: Option<&str>,
) -> String {
    let mut text = match family {
        ModelFamily::Anthropic => ANTHROPIC_PREAMBLE.to_string(),
        ModelFamily::OpenAi => OPENAI_PREAMBLE.to_string(),
    };

    if protocol == ToolProtocol::InlineMarkup && !tools.is_empty() {
        text.push_str(
            "\n\nTo call a tool, write a single flat JSON object on its own, for example \
{\"tool\": \"<name>\", \"<argument>\": \"<value>\"}, then stop and wait for the result. \
Never nest objects or braces inside it.\n\nTools:",
        );
        for tool in tools {
            let _ = write!(text, "\n- {}: {}", tool.name, tool.description);
            if let Some(props) = tool.parameters.get("properties").and_then(|p| p.as_object()) {
                let args: Vec<&str> = props.keys().map(String::as_str).collect();
                if !args.is_empty() {
                    let _ = write!(text, " (arguments: {})", args.join(", "));
                }
            }
        }
    }

    if let Some(suffix) = suffix.filter(|s| !s.trim().is_empty()) {
        text.push_str("\n\n");
        text.push_str(suffix.trim());
    }
    text
}

/// Build a model-ready request: system instruction, history in model-native
/// roles, then the new user input.
pub fn assemble(
    family: ModelFamily,
    protocol: ToolProtocol,
    history: &[PersistedTurn],
    input: &str,
    tools: &[ToolDefinition],
    settings: &PromptSettings,
) -> ChatRequest {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(Message::system(system_instruction(
        family,
        protocol,
        tools,
        settings.system_suffix.as_deref(),
    )));
    messages.extend(history.iter().map(PersistedTurn::to_message));
    messages.push(Message::user(input));

    let tools = match protocol {
        ToolProtocol::Native => tools.to_vec(),
        ToolProtocol::InlineMarkup => Vec::new(),
    };

    ChatRequest {
        messages,
        tools,
        temperature: settings.temperature,
        max_tokens: settings.max_tokens,
        model: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kb_domain::tool::Role;
    use serde_json::json;

    fn tools() -> Vec<ToolDefinition> {
        vec![ToolDefinition {
            name: "knowledge_search".into(),
            description: "Search the knowledge base.".into(),
            parameters: json!({"type": "object", "properties": {"query": {"type": "string"}}}),
        }]
    }

    fn history() -> Vec<PersistedTurn> {
        vec![PersistedTurn::user("hi"), PersistedTurn::assistant("hello")]
    }

    #[test]
    fn same_inputs_same_request() {
        let s = PromptSettings { temperature: Some(0.2), ..Default::default() };
        for family in [ModelFamily::Anthropic, ModelFamily::OpenAi] {
            for protocol in [ToolProtocol::Native, ToolProtocol::InlineMarkup] {
                let a = assemble(family, protocol, &history(), "q", &tools(), &s);
                let b = assemble(family, protocol, &history(), "q", &tools(), &s);
                assert_eq!(a, b);
            }
        }
    }

    #[test]
    fn history_maps_to_model_roles_in_order() {
        let req = assemble(
            ModelFamily::OpenAi,
            ToolProtocol::Native,
            &history(),
            "next",
            &tools(),
            &PromptSettings::default(),
        );
        let roles: Vec<Role> = req.messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant, Role::User]);
        assert_eq!(req.messages[3].content.text(), Some("next"));
        assert_eq!(req.tools.len(), 1);
    }

    #[test]
    fn inline_protocol_describes_tools_in_text_only() {
        let req = assemble(
            ModelFamily::OpenAi,
            ToolProtocol::InlineMarkup,
            &[],
            "q",
            &tools(),
            &PromptSettings::default(),
        );
        assert!(req.tools.is_empty());
        let system = req.messages[0].content.extract_all_text();
        assert!(system.contains("knowledge_search"));
        assert!(system.contains("arguments: query"));
    }

    #[test]
    fn families_get_different_instructions() {
        let a = system_instruction(ModelFamily::Anthropic, ToolProtocol::Native, &tools(), None);
        let o = system_instruction(ModelFamily::OpenAi, ToolProtocol::Native, &tools(), None);
        assert_ne!(a, o);
        let with_suffix =
            system_instruction(ModelFamily::OpenAi, ToolProtocol::Native, &[], Some("Be brief."));
        assert!(with_suffix.ends_with("Be brief."));
    }
}
