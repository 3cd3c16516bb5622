//! Inline-markup tool calls: a `{...}` span embedded in the text stream.
//!
//! The filter keeps a single "inside a span" flag toggled by `{` and `}`.
//! Nested braces inside tool arguments close the span early; models using
//! this protocol are prompted to emit flat spans only.

use serde_json::{Map, Value};

use kb_domain::error::{Error, Result};
use kb_domain::tool::ToolCall;

/// What one chunk contributed after filtering.
#[derive(Debug, Default, PartialEq)]
pub struct FilterOutput {
    /// Caller-visible text, separators included.
    pub visible: String,
    /// Completed spans, delimiters included.
    pub spans: Vec<String>,
}

#[derive(Debug)]
pub struct InlineSpanFilter {
    separator: String,
    in_span: bool,
    span: String,
}

impl InlineSpanFilter {
    pub fn new(separator: impl Into<String>) -> Self {
        Self { separator: separator.into(), in_span: false, span: String::new() }
    }

    pub fn in_span(&self) -> bool {
        self.in_span
    }

    /// Feed one raw token chunk.
    pub fn push(&mut self, chunk: &str) -> FilterOutput {
        let mut out = FilterOutput::default();
        for c in chunk.chars() {
            if self.in_span {
                self.span.push(c);
                if c == '}' {
                    self.in_span = false;
                    out.spans.push(std::mem::take(&mut self.span));
                    out.visible.push_str(&self.separator);
                }
            } else if c == '{' {
                self.in_span = true;
                self.span.push(c);
            } else {
                out.visible.push(c);
            }
        }
        out
    }

    /// End of stream. Returns the buffered text of an unterminated span,
    /// which is dropped rather than shown.
    pub fn finish(&mut self) -> Option<String> {
        self.in_span = false;
        if self.span.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.span))
        }
    }
}

/// Parse a suppressed span into a tool call.
///
/// Accepts a flat JSON object naming the tool under `tool` or `name`
/// (`{"tool": "knowledge_search", "query": "pricing"}`) or the loose
/// `{tool: knowledge_search, query: pricing}` form. Remaining keys become
/// the arguments.
pub fn parse_span(span: &str, call_id: impl Into<String>) -> Result<ToolCall> {
    let trimmed = span.trim();
    let inner = trimmed
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .ok_or_else(|| Error::MalformedToolSpan(format!("not a braced span: {trimmed:?}")))?;

    let mut fields = match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(map)) => map,
        _ => parse_loose(inner)?,
    };

    let tool_name = ["tool", "name"]
        .iter()
        .find_map(|k| match fields.remove(*k) {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
            _ => None,
        })
        .ok_or_else(|| Error::MalformedToolSpan(format!("no tool name in {trimmed:?}")))?;

    let arguments = match fields.remove("arguments") {
        Some(Value::Object(args)) => Value::Object(args),
        _ => Value::Object(fields),
    };

    Ok(ToolCall { call_id: call_id.into(), tool_name, arguments })
}

fn parse_loose(inner: &str) -> Result<Map<String, Value>> {
    let mut map = Map::new();
    for pair in inner.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (key, value) = pair
            .split_once(':')
            .ok_or_else(|| Error::MalformedToolSpan(format!("expected key:value, got {pair:?}")))?;
        let key = unquote(key);
        if key.is_empty() {
            return Err(Error::MalformedToolSpan(format!("empty key in {pair:?}")));
        }
        map.insert(key.to_string(), Value::String(unquote(value).to_string()));
    }
    Ok(map)
}

fn unquote(s: &str) -> &str {
    s.trim().trim_matches(|c| c == '"' || c == '\'').trim()
}
