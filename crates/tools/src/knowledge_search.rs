use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use kb_domain::error::{Error, Result};
use kb_memory::{MemoryProvider, MemorySearchRequest};

use crate::registry::Tool;

/// Searches earlier answers held by the memory service.
pub struct KnowledgeSearchTool {
    memory: Arc<dyn MemoryProvider>,
}

impl KnowledgeSearchTool {
    pub fn new(memory: Arc<dyn MemoryProvider>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl Tool for KnowledgeSearchTool {
    fn name(&self) -> &str {
        "knowledge_search"
    }

    fn description(&self) -> &str {
        "Search the knowledge base of previously answered questions. Returns the most relevant entries."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "What to look for" },
                "limit": { "type": "integer", "description": "Maximum results (default 5)" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, arguments: Value) -> Result<Value> {
        // Inline-markup calls may pass the query as a bare string.
        let query = match &arguments {
            Value::String(s) => s.clone(),
            other => other
                .get("query")
                .and_then(Value::as_str)
                .map(str::to_owned)
                .ok_or_else(|| Error::Tool {
                    tool: "knowledge_search".into(),
                    message: "missing required argument 'query'".into(),
                })?,
        };
        let limit = arguments.get("limit").and_then(Value::as_u64).unwrap_or(5) as u32;

        let hits = self
            .memory
            .search(MemorySearchRequest { query: query.clone(), user: None, limit })
            .await?;

        Ok(json!({
            "query": query,
            "count": hits.len(),
            "results": hits.iter().map(|h| json!({ "content": h.content, "score": h.score })).collect::<Vec<_>>(),
        }))
    }
}
