//! Anthropic Messages API adapter (native tool calling).
//!
//! System text travels in the top-level `system` field; tool results go back
//! as `tool_result` blocks inside a user message.

use std::collections::HashMap;

use crate::traits::{ChatRequest, LlmProvider};
use crate::util::{from_reqwest, parse_tool_arguments, resolve_api_key, status_error};
use kb_domain::config::ProviderConfig;
use kb_domain::error::{Error, Result};
use kb_domain::stream::{BoxStream, StreamEvent, Usage};
use kb_domain::tool::{ContentPart, Message, MessageContent, Role, ToolDefinition};
use serde_json::{json, Value};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

pub struct AnthropicProvider {
    id: String,
    base_url: String,
    api_key: String,
    default_model: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn from_config(cfg: &ProviderConfig, timeout: std::time::Duration) -> Result<Self> {
        let api_key = resolve_api_key(&cfg.auth)?;
        let default_model = cfg
            .default_model
            .clone()
            .unwrap_or_else(|| "claude-3-5-sonnet-latest".into());

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
        let model = req.model.as_deref().unwrap_or(&self.default_model);

        let mut system_parts: Vec<String> = Vec::new();
        let mut messages: Vec<Value> = Vec::new();
        for msg in &req.messages {
            match msg.role {
                Role::System => system_parts.push(msg.content.extract_all_text()),
                _ => messages.push(message_to_anthropic(msg)),
            }
        }

        let mut body = json!({
            "model": model,
            "messages": messages,
            "stream": true,
            "max_tokens": req.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        });
        if !system_parts.is_empty() {
            body["system"] = Value::String(system_parts.join("\n\n"));
        }
        if !req.tools.is_empty() {
            body["tools"] = req.tools.iter().map(tool_to_anthropic).collect();
        }
        if let Some(temp) = req.temperature {
            body["temperature"] = json!(temp);
        }
        body
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request serialization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn message_to_anthropic(msg: &Message) -> Value {
    // Tool results are user-role messages on this API.
    let role = match msg.role {
        Role::Assistant => "assistant",
        _ => "user",
    };
    let content = match &msg.content {
        MessageContent::Text(t) if msg.role == Role::Tool => vec![json!({
            "type": "tool_result",
            "tool_use_id": "",
            "content": t,
        })],
        MessageContent::Text(t) => return json!({ "role": role, "content": t }),
        MessageContent::Parts(parts) => parts.iter().map(part_to_anthropic).collect(),
    };
    json!({ "role": role, "content": content })
}

fn part_to_anthropic(part: &ContentPart) -> Value {
    match part {
        ContentPart::Text { text } => json!({ "type": "text", "text": text }),
        ContentPart::ToolUse { id, name, input } => json!({
            "type": "tool_use",
            "id": id,
            "name": name,
            "input": input,
        }),
        ContentPart::ToolResult { tool_use_id, content, is_error } => json!({
            "type": "tool_result",
            "tool_use_id": tool_use_id,
            "content": content,
            "is_error": is_error,
        }),
    }
}

fn tool_to_anthropic(tool: &ToolDefinition) -> Value {
    json!({
        "name": tool.name,
        "description": tool.description,
        "input_schema": tool.parameters,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming response
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Partial `tool_use` block, keyed by content block index.
struct PendingToolUse {
    call_id: String,
    tool_name: String,
    input_json: String,
}

#[derive(Default)]
struct StreamState {
    pending: HashMap<u64, PendingToolUse>,
    usage: Option<Usage>,
    done_emitted: bool,
}

fn parse_usage(v: &Value) -> Option<Usage> {
    let input = v.get("input_tokens")?.as_u64()? as u32;
    let output = v.get("output_tokens").and_then(Value::as_u64).unwrap_or(0) as u32;
    Some(Usage {
        prompt_tokens: input,
        completion_tokens: output,
        total_tokens: input + output,
    })
}

fn map_stop_reason(reason: &str) -> String {
    match reason {
        "end_turn" => "stop".into(),
        "tool_use" => "tool_calls".into(),
        other => other.into(),
    }
}

fn str_field<'a>(v: &'a Value, key: &str) -> &'a str {
    v.get(key).and_then(Value::as_str).unwrap_or("")
}

fn parse_sse(data: &str, state: &mut StreamState) -> Vec<Result<StreamEvent>> {
    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => return vec![Err(Error::Json(e))],
    };
    let index = v.get("index").and_then(Value::as_u64).unwrap_or(0);
    let mut events = Vec::new();

    match str_field(&v, "type") {
        "message_start" => {
            state.usage = v.get("message").and_then(|m| m.get("usage")).and_then(parse_usage);
        }

        "content_block_start" => {
            let block = v.get("content_block").unwrap_or(&Value::Null);
            if str_field(block, "type") == "tool_use" {
                let call_id = str_field(block, "id").to_string();
                let tool_name = str_field(block, "name").to_string();
                events.push(Ok(StreamEvent::ToolCallStarted {
                    call_id: call_id.clone(),
                    tool_name: tool_name.clone(),
                }));
                state.pending.insert(
                    index,
                    PendingToolUse { call_id, tool_name, input_json: String::new() },
                );
            }
        }

        "content_block_delta" => {
            let delta = v.get("delta").unwrap_or(&Value::Null);
            match str_field(delta, "type") {
                "text_delta" => {
                    let text = str_field(delta, "text");
                    if !text.is_empty() {
                        events.push(Ok(StreamEvent::Token { text: text.to_string() }));
                    }
                }
                "input_json_delta" => {
                    let partial = str_field(delta, "partial_json");
                    if let Some(tc) = state.pending.get_mut(&index) {
                        tc.input_json.push_str(partial);
                        events.push(Ok(StreamEvent::ToolCallDelta {
                            call_id: tc.call_id.clone(),
                            delta: partial.to_string(),
                        }));
                    }
                }
                _ => {}
            }
        }

        "content_block_stop" => {
            if let Some(tc) = state.pending.remove(&index) {
                let arguments = parse_tool_arguments(&tc.tool_name, &tc.input_json);
                events.push(Ok(StreamEvent::ToolCallFinished {
                    call_id: tc.call_id,
                    tool_name: tc.tool_name,
                    arguments,
                }));
            }
        }

        "message_delta" => {
            let output = v
                .get("usage")
                .and_then(|u| u.get("output_tokens"))
                .and_then(Value::as_u64);
            if let (Some(output), Some(u)) = (output, state.usage.as_mut()) {
                u.completion_tokens = output as u32;
                u.total_tokens = u.prompt_tokens + u.completion_tokens;
            }
            let stop_reason = v
                .get("delta")
                .and_then(|d| d.get("stop_reason"))
                .and_then(Value::as_str)
                .map(map_stop_reason);
            if stop_reason.is_some() {
                state.done_emitted = true;
                events.push(Ok(StreamEvent::Done { usage: state.usage, finish_reason: stop_reason }));
            }
        }

        "message_stop" if !state.done_emitted => {
            state.done_emitted = true;
            events.push(Ok(StreamEvent::Done {
                usage: state.usage,
                finish_reason: Some("stop".into()),
            }));
        }

        "error" => {
            let message = v
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            events.push(Ok(StreamEvent::Error { message: message.to_string() }));
        }

        // ping and unknown event types
        _ => {}
    }

    events
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl LlmProvider for AnthropicProvider {
    async fn chat_stream(
        &self,
        req: ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = self.build_body(&req);

        tracing::debug!(provider = %self.id, url = %url, "anthropic stream request");

        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

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
