use async_trait::async_trait;
use serde_json::{json, Value};

use kb_domain::error::Result;

use crate::registry::Tool;

/// Current date and time in UTC.
pub struct GetCurrentTimeTool;

#[async_trait]
impl Tool for GetCurrentTimeTool {
    fn name(&self) -> &str {
        "get_current_time"
    }

    fn description(&self) -> &str {
        "Get the current date and time in UTC."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "format": {
                    "type": "string",
                    "enum": ["iso8601", "unix", "human"],
                    "description": "Output format. Defaults to 'iso8601'."
                }
            },
            "additionalProperties": false
        })
    }

    async fn execute(&self, arguments: Value) -> Result<Value> {
        let now = chrono::Utc::now();
        let format = arguments.get("format").and_then(Value::as_str).unwrap_or("iso8601");
        Ok(match format {
            "unix" => json!({ "timestamp": now.timestamp(), "timezone": "UTC" }),
            "human" => json!({
                "datetime": now.format("%A, %B %d, %Y at %H:%M:%S UTC").to_string(),
                "timezone": "UTC"
            }),
            _ => json!({ "datetime": now.to_rfc3339(), "timezone": "UTC" }),
        })
    }
}
