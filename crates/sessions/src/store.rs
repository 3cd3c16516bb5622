//! Conversation store trait and the JSON-file backend.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;

use kb_domain::conversation::{ConversationId, ConversationRecord, PersistedTurn};
use kb_domain::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Persistence collaborator for conversations.
///
/// There is no cross-request locking: two asks finishing concurrently on the
/// same id both write, and the last write wins.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Fetch a conversation by id. With `owner` set, rows owned by someone
    /// else are invisible.
    async fn select(
        &self,
        id: ConversationId,
        owner: Option<&str>,
    ) -> Result<Option<ConversationRecord>>;

    /// Replace the message list of an existing row.
    async fn update_messages(&self, id: ConversationId, messages: &[PersistedTurn]) -> Result<()>;

    /// Insert or fully replace a row.
    async fn upsert(&self, record: &ConversationRecord) -> Result<()>;

    /// Short backend name for logs.
    fn kind(&self) -> &'static str;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// File store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Conversations held in memory and flushed to a single JSON file after
/// every write. With no path it never touches disk.
pub struct FileConversationStore {
    path: Option<PathBuf>,
    rows: RwLock<BTreeMap<ConversationId, ConversationRecord>>,
    /// Serialises flushes so an older snapshot never overwrites a newer one.
    flush_lock: tokio::sync::Mutex<()>,
}

impl FileConversationStore {
    /// Load `path` if it exists, creating parent directories as needed.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }

        let rows: Vec<ConversationRecord> = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            if raw.trim().is_empty() {
                Vec::new()
            } else {
                serde_json::from_str(&raw)?
            }
        } else {
            Vec::new()
        };

        tracing::info!(
            conversations = rows.len(),
            path = %path.display(),
            "conversation store loaded"
        );

        Ok(Self {
            path: Some(path.to_path_buf()),
            rows: RwLock::new(rows.into_iter().map(|r| (r.id, r)).collect()),
            flush_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            rows: RwLock::new(BTreeMap::new()),
            flush_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Snapshot of every stored row, ordered by id.
    pub fn list(&self) -> Vec<ConversationRecord> {
        self.rows.read().values().cloned().collect()
    }

    async fn flush(&self) -> Result<()> {
        let Some(ref path) = self.path else {
            return Ok(());
        };
        let _guard = self.flush_lock.lock().await;
        let json = {
            let rows = self.rows.read();
            let all: Vec<&ConversationRecord> = rows.values().collect();
            serde_json::to_string_pretty(&all)?
        };
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[async_trait]
impl ConversationStore for FileConversationStore {
    async fn select(
        &self,
        id: ConversationId,
        owner: Option<&str>,
    ) -> Result<Option<ConversationRecord>> {
        let rows = self.rows.read();
        Ok(rows
            .get(&id)
            .filter(|r| owner.map_or(true, |o| r.user.as_deref() == Some(o)))
            .cloned())
    }

    async fn update_messages(&self, id: ConversationId, messages: &[PersistedTurn]) -> Result<()> {
        {
            let mut rows = self.rows.write();
            let row = rows
                .get_mut(&id)
                .ok_or_else(|| Error::Persistence(format!("no conversation with id {id}")))?;
            row.messages = messages.to_vec();
        }
        self.flush().await
    }

    async fn upsert(&self, record: &ConversationRecord) -> Result<()> {
        self.rows.write().insert(record.id, record.clone());
        self.flush().await
    }

    fn kind(&self) -> &'static str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: i64, user: Option<&str>) -> ConversationRecord {
        ConversationRecord {
            id: ConversationId::new(id),
            user: user.map(str::to_owned),
            model: Some("openai".into()),
            messages: vec![PersistedTurn::user("q"), PersistedTurn::assistant("a")],
        }
    }

    #[tokio::test]
    async fn owner_filter_hides_other_users_rows() {
        let store = FileConversationStore::in_memory();
        store.upsert(&record(1, Some("alice"))).await.unwrap();

        let id = ConversationId::new(1);
        assert!(store.select(id, Some("alice")).await.unwrap().is_some());
        assert!(store.select(id, Some("bob")).await.unwrap().is_none());
        assert!(store.select(id, None).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn update_of_missing_row_is_a_persistence_error() {
        let store = FileConversationStore::in_memory();
        let err = store.update_messages(ConversationId::new(9), &[]).await.unwrap_err();
        assert!(matches!(err, Error::Persistence(_)));
    }

    #[tokio::test]
    async fn rows_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("conversations.json");

        let store = FileConversationStore::open(&path).unwrap();
        store.upsert(&record(7, None)).await.unwrap();
        let mut turns = record(7, None).messages;
        turns.push(PersistedTurn::user("follow-up"));
        turns.push(PersistedTurn::assistant("more"));
        store.update_messages(ConversationId::new(7), &turns).await.unwrap();
        drop(store);

        let reopened = FileConversationStore::open(&path).unwrap();
        let row = reopened.select(ConversationId::new(7), None).await.unwrap().unwrap();
        assert_eq!(row.messages, turns);

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"ai\""), "assistant turns are stored as ai");
    }
}
