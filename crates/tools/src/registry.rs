use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use tracing::Instrument;

use kb_domain::error::Result;
use kb_domain::tool::ToolDefinition;

/// A callable tool.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema for the arguments object.
    fn parameters_schema(&self) -> Value;

    async fn execute(&self, arguments: Value) -> Result<Value>;
}

/// Result of one dispatch: the text handed back to the model and whether it
/// describes a failure.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub content: String,
    pub is_error: bool,
}

impl ToolOutput {
    fn ok(value: Value) -> Self {
        let content = match value {
            Value::String(s) => s,
            other => other.to_string(),
        };
        Self { content, is_error: false }
    }

    fn error(message: String) -> Self {
        Self { content: message, is_error: true }
    }
}

#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any earlier one with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> &mut Self {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            tracing::warn!(tool = %name, "tool registered twice, keeping the latest");
        }
        self
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    /// Declarations in name order, so assembled prompts are stable.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .values()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect()
    }

    /// Run a tool by name. Unknown tools and executor errors become
    /// `is_error` outputs.
    pub async fn dispatch(&self, name: &str, arguments: Value) -> ToolOutput {
        let Some(tool) = self.tools.get(name).cloned() else {
            return ToolOutput::error(format!(
                "unknown tool '{name}'; available tools: {}",
                self.names().join(", ")
            ));
        };

        let span = tracing::info_span!("tool.call", tool = %name);
        async move {
            let start = Instant::now();
            let result = tool.execute(arguments).await;
            let duration_ms = start.elapsed().as_millis() as u64;
            match result {
                Ok(value) => {
                    tracing::debug!(duration_ms, "tool succeeded");
                    ToolOutput::ok(value)
                }
                Err(e) => {
                    tracing::warn!(duration_ms, error = %e, "tool failed");
                    ToolOutput::error(format!("tool '{name}' failed: {e}"))
                }
            }
        }
        .instrument(span)
        .await
    }
}
