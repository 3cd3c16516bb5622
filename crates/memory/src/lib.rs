//! Long-term memory / answer cache collaborator.
//!
//! Every completed ask is written here as `{timestamp_ms, input, output,
//! model, user}`; the `knowledge_search` tool reads it back.

pub mod provider;
pub mod rest;
pub mod types;

pub use provider::{MemoryProvider, NoopMemory};
pub use rest::RestMemoryClient;
pub use types::{MemoryHit, MemoryRecord, MemorySearchRequest};

use std::sync::Arc;

use kb_domain::config::MemoryConfig;
use kb_domain::error::Result;

/// REST client when `[memory] enabled`, otherwise the no-op provider.
pub fn from_config(cfg: &MemoryConfig) -> Result<Arc<dyn MemoryProvider>> {
    if cfg.enabled {
        Ok(Arc::new(RestMemoryClient::new(cfg)?))
    } else {
        tracing::info!("memory store disabled; cache writes are no-ops");
        Ok(Arc::new(NoopMemory))
    }
}
