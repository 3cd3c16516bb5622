//! Wire types for the memory service.

use serde::{Deserialize, Serialize};

/// One completed exchange, written after the answer stream closes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Wall-clock completion time, milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    pub input: String,
    pub output: String,
    pub model: String,
    pub user: String,
}

/// POST /api/search request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemorySearchRequest {
    pub query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryHit {
    pub content: String,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub timestamp_ms: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemorySearchResponse {
    #[serde(default)]
    pub hits: Vec<MemoryHit>,
}
