//! Conversation persistence for kbask.
//!
//! A conversation row is `{id, user, model, messages}` keyed by an integer
//! id. Two backends implement [`ConversationStore`]: a JSON file (also usable
//! purely in memory) and a PostgREST table.

pub mod postgrest;
pub mod store;

pub use postgrest::PostgrestConversationStore;
pub use store::{ConversationStore, FileConversationStore};

use std::sync::Arc;

use kb_domain::config::{StoreConfig, StoreKind};
use kb_domain::error::Result;

/// Build the store selected by `[store] kind`.
pub fn from_config(cfg: &StoreConfig) -> Result<Arc<dyn ConversationStore>> {
    Ok(match cfg.kind {
        StoreKind::File => Arc::new(FileConversationStore::open(&cfg.path)?),
        StoreKind::Postgrest => Arc::new(PostgrestConversationStore::new(cfg)?),
    })
}
