//! OpenAI-compatible chat completions adapter.
//!
//! Works with OpenAI and anything speaking the same contract (Ollama, vLLM,
//! LM Studio, Together). Used for both native tool calling and for
//! inline-markup backends, where `tools` is simply left empty.

use std::collections::BTreeMap;

use crate::traits::{ChatRequest, LlmProvider};
use crate::util::{from_reqwest, parse_tool_arguments, resolve_api_key, status_error};
use kb_domain::config::ProviderConfig;
use kb_domain::error::{Error, Result};
use kb_domain::stream::{BoxStream, StreamEvent, Usage};
use kb_domain::tool::{ContentPart, Message, MessageContent, Role, ToolDefinition};
use serde_json::{json, Value};

pub struct OpenAiCompatProvider {
    id: String,
    base_url: String,
    /// `None` for local servers that take no key.
    api_key: Option<String>,
    default_model: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// A missing key is only fatal when the config asked for one.
    pub fn from_config(cfg: &ProviderConfig, timeout: std::time::Duration) -> Result<Self> {
        let api_key = if cfg.auth.key.is_none() && cfg.auth.env.is_none() {
            None
        } else {
            Some(resolve_api_key(&cfg.auth)?)
        };
        let default_model = cfg.default_model.clone().unwrap_or_else(|| "gpt-4o".into());

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(from_reqwest)?;

        Ok(Self {
            id: cfg.id.clone(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key,
            default_model,
            client,
        })
    }

    fn build_body(&self, req: &ChatRequest) -> Value {
        let messages: Vec<Value> = req.messages.iter().flat_map(msg_to_openai).collect();

        let mut body = json!({
            "model": req.model.as_deref().unwrap_or(&self.default_model),
            "messages": messages,
            "stream": true,
            "stream_options": { "include_usage": true },
        });
        if !req.tools.is_empty() {
            body["tools"] = req.tools.iter().map(tool_to_openai).collect();
        }
        if let Some(temp) = req.temperature {
            body["temperature"] = json!(temp);
        }
        if let Some(max) = req.max_tokens {
            body["max_tokens"] = json!(max);
        }
        body
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request serialization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One internal message can fan out into several wire messages (one `tool`
/// message per tool result part).
fn msg_to_openai(msg: &Message) -> Vec<Value> {
    match msg.role {
        Role::Assistant => vec![assistant_to_openai(msg)],
        Role::Tool => tool_results_to_openai(msg),
        Role::System => vec![json!({ "role": "system", "content": msg.content.extract_all_text() })],
        Role::User => vec![json!({ "role": "user", "content": msg.content.extract_all_text() })],
    }
}

fn assistant_to_openai(msg: &Message) -> Value {
    let mut text_parts: Vec<&str> = Vec::new();
    let mut tool_calls: Vec<Value> = Vec::new();

    match &msg.content {
        MessageContent::Text(t) => text_parts.push(t),
        MessageContent::Parts(parts) => {
            for part in parts {
                match part {
                    ContentPart::Text { text } => text_parts.push(text),
                    ContentPart::ToolUse { id, name, input } => tool_calls.push(json!({
                        "id": id,
                        "type": "function",
                        "function": { "name": name, "arguments": input.to_string() },
                    })),
                    ContentPart::ToolResult { .. } => {}
                }
            }
        }
    }

    let mut obj = json!({ "role": "assistant" });
    obj["content"] = if text_parts.is_empty() {
        Value::Null
    } else {
        Value::String(text_parts.join("\n"))
    };
    if !tool_calls.is_empty() {
        obj["tool_calls"] = Value::Array(tool_calls);
    }
    obj
}

fn tool_results_to_openai(msg: &Message) -> Vec<Value> {
    match &msg.content {
        MessageContent::Text(t) => vec![json!({ "role": "tool", "tool_call_id": "", "content": t })],
        MessageContent::Parts(parts) => parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::ToolResult { tool_use_id, content, .. } => Some(json!({
                    "role": "tool",
                    "tool_call_id": tool_use_id,
                    "content": content,
                })),
                _ => None,
            })
            .collect(),
    }
}

fn tool_to_openai(tool: &ToolDefinition) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming response
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
struct PendingCall {
    call_id: String,
    tool_name: String,
    arguments: String,
}

/// Tool call fragments arrive keyed by `index`; only the first fragment
/// carries the id and name.
#[derive(Default)]
struct StreamState {
    pending: BTreeMap<u64, PendingCall>,
    finish_reason: Option<String>,
    usage: Option<Usage>,
}

impl StreamState {
    fn flush_tool_calls(&mut self, events: &mut Vec<Result<StreamEvent>>) {
        for (_, call) in std::mem::take(&mut self.pending) {
            let arguments = parse_tool_arguments(&call.tool_name, &call.arguments);
            events.push(Ok(StreamEvent::ToolCallFinished {
                call_id: call.call_id,
                tool_name: call.tool_name,
                arguments,
            }));
        }
    }
}

fn parse_usage(v: &Value) -> Option<Usage> {
    Some(Usage {
        prompt_tokens: v.get("prompt_tokens")?.as_u64()? as u32,
        completion_tokens: v.get("completion_tokens")?.as_u64()? as u32,
        total_tokens: v.get("total_tokens")?.as_u64()? as u32,
    })
}

fn parse_sse(data: &str, state: &mut StreamState) -> Vec<Result<StreamEvent>> {
    let mut events = Vec::new();

    if data == "[DONE]" {
        state.flush_tool_calls(&mut events);
        events.push(Ok(StreamEvent::Done {
            usage: state.usage,
            finish_reason: state.finish_reason.take().or_else(|| Some("stop".into())),
        }));
        return events;
    }

    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => return vec![Err(Error::Json(e))],
    };

    if let Some(message) = v.get("error").and_then(|e| e.get("message")).and_then(Value::as_str) {
        return vec![Ok(StreamEvent::Error { message: message.to_string() })];
    }

    if let Some(usage) = v.get("usage").and_then(parse_usage) {
        state.usage = Some(usage);
    }

    let Some(choice) = v.get("choices").and_then(Value::as_array).and_then(|a| a.first()) else {
        return events;
    };
    let delta = choice.get("delta").unwrap_or(&Value::Null);

    if let Some(text) = delta.get("content").and_then(Value::as_str) {
        if !text.is_empty() {
            events.push(Ok(StreamEvent::Token { text: text.to_string() }));
        }
    }

    for tc in delta.get("tool_calls").and_then(Value::as_array).into_iter().flatten() {
        let index = tc.get("index").and_then(Value::as_u64).unwrap_or(0);
        let call = state.pending.entry(index).or_default();
        if let Some(id) = tc.get("id").and_then(Value::as_str) {
            call.call_id = id.to_string();
        }
        let function = tc.get("function").unwrap_or(&Value::Null);
        if let Some(name) = function.get("name").and_then(Value::as_str) {
            call.tool_name.push_str(name);
            events.push(Ok(StreamEvent::ToolCallStarted {
                call_id: call.call_id.clone(),
                tool_name: call.tool_name.clone(),
            }));
        }
        if let Some(args) = function.get("arguments").and_then(Value::as_str) {
            if !args.is_empty() {
                call.arguments.push_str(args);
                events.push(Ok(StreamEvent::ToolCallDelta {
                    call_id: call.call_id.clone(),
                    delta: args.to_string(),
                }));
            }
        }
    }

    if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
        state.finish_reason = Some(reason.to_string());
        state.flush_tool_calls(&mut events);
    }

    events
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl LlmProvider for OpenAiCompatProvider {
    async fn chat_stream(
        &self,
        req: ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_body(&req);

        tracing::debug!(provider = %self.id, url = %url, "openai_compat stream request");

        let mut builder = self.client.post(&url).json(&body);
        if let Some(ref key) = self.api_key {
            builder = builder.bearer_auth(key);
        }
        let resp = builder.send().await.map_err(from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.map_err(from_reqwest)?;
            return Err(status_error(&self.id, status, &text));
        }

        let mut state = StreamState::default();
        Ok(crate::sse::sse_response_stream(resp, move |data| parse_sse(data, &mut state)))
    }

    fn provider_id(&self) -> &str {
        &self.id
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kb_domain::tool::ToolCall;

    fn feed(payloads: &[&str]) -> Vec<StreamEvent> {
        let mut state = StreamState::default();
        payloads
            .iter()
            .flat_map(|p| parse_sse(p, &mut state))
            .map(|e| e.unwrap())
            .collect()
    }

    #[test]
    fn unparseable_arguments_are_passed_through_raw() {
        let events = feed(&[
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_9","function":{"name":"knowledge_search","arguments":"{\"query\": \"refu"}}]}}]}"#,
            r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#,
            "[DONE]",
        ]);

        let arguments = events
            .iter()
            .find_map(|e| match e {
                StreamEvent::ToolCallFinished { arguments, .. } => Some(arguments.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(arguments["_raw"], r#"{"query": "refu"#);
        assert_ne!(arguments, json!({}));
    }

    #[test]
    fn tool_call_fragments_are_joined_by_index() {
        let events = feed(&[
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"get_current_time","arguments":""}}]}}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"timezone\":"}}]}}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"UTC\"}"}}]}}]}"#,
            r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#,
            r#"{"choices":[],"usage":{"prompt_tokens":5,"completion_tokens":7,"total_tokens":12}}"#,
            "[DONE]",
        ]);

        let finished: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::ToolCallFinished { call_id, tool_name, arguments } => Some(ToolCall {
                    call_id: call_id.clone(),
                    tool_name: tool_name.clone(),
                    arguments: arguments.clone(),
                }),
                _ => None,
            })
            .collect();
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].call_id, "call_1");
        assert_eq!(finished[0].arguments, json!({"timezone": "UTC"}));

        match events.last().unwrap() {
            StreamEvent::Done { usage, finish_reason } => {
                assert_eq!(finish_reason.as_deref(), Some("tool_calls"));
                assert_eq!(usage.unwrap().total_tokens, 12);
            }
            other => panic!("expected Done, got {other:?}"),
        }
    }

    #[test]
    fn content_deltas_become_tokens() {
        let events = feed(&[
            r#"{"choices":[{"delta":{"role":"assistant","content":""}}]}"#,
            r#"{"choices":[{"delta":{"content":"Hello "}}]}"#,
            r#"{"choices":[{"delta":{"content":"{tool:x}"}}]}"#,
        ]);
        let texts: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Token { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(texts, vec!["Hello ", "{tool:x}"]);
    }

    #[test]
    fn tool_results_fan_out_to_tool_messages() {
        let wire = msg_to_openai(&Message::tool_result("call_9", "42", false));
        assert_eq!(wire.len(), 1);
        assert_eq!(wire[0]["role"], "tool");
        assert_eq!(wire[0]["tool_call_id"], "call_9");
    }

    #[test]
    fn inline_requests_carry_no_tools() {
        let provider = OpenAiCompatProvider {
            id: "openai".into(),
            base_url: "http://localhost".into(),
            api_key: None,
            default_model: "gpt-test".into(),
            client: reqwest::Client::new(),
        };
        let body = provider.build_body(&ChatRequest {
            messages: vec![Message::user("hi")],
            ..Default::default()
        });
        assert!(body.get("tools").is_none());
        assert_eq!(body["model"], "gpt-test");
        assert_eq!(body["stream"], true);
    }
}
