use async_trait::async_trait;
use kb_domain::error::Result;

use crate::types::{MemoryHit, MemoryRecord, MemorySearchRequest};

/// Abstraction over the memory service. Implementations may talk to the real
/// REST API or be a test double.
#[async_trait]
pub trait MemoryProvider: Send + Sync {
    /// Store one completed exchange (POST /api/memories).
    async fn write(&self, record: MemoryRecord) -> Result<()>;

    /// Semantic search over stored exchanges (POST /api/search).
    async fn search(&self, req: MemorySearchRequest) -> Result<Vec<MemoryHit>>;
}

/// Used when the memory service is disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMemory;

#[async_trait]
impl MemoryProvider for NoopMemory {
    async fn write(&self, _record: MemoryRecord) -> Result<()> {
        Ok(())
    }

    async fn search(&self, _req: MemorySearchRequest) -> Result<Vec<MemoryHit>> {
        Ok(Vec::new())
    }
}
