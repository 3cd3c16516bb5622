//! History loading.
//!
//! Anonymous callers skip the owner filter: anyone holding the id of an
//! anonymous conversation can continue it.

use kb_domain::config::AgentConfig;
use kb_domain::conversation::{ConversationId, PersistedTurn};
use kb_domain::error::Result;
use kb_domain::trace::TraceEvent;
use kb_sessions::ConversationStore;

/// Load the prior turns of a conversation, oldest first. A missing row (or
/// one owned by someone else) is a new conversation: empty, not an error.
pub async fn load_history(
    store: &dyn ConversationStore,
    agent: &AgentConfig,
    id: ConversationId,
    user: &str,
) -> Result<Vec<PersistedTurn>> {
    let owner = (!agent.is_anonymous(user)).then_some(user);
    let turns = store
        .select(id, owner)
        .await?
        .map(|record| record.messages)
        .unwrap_or_default();

    tracing::debug!(
        session_id = %id,
        turns = turns.len(),
        store = store.kind(),
        "history loaded"
    );
    TraceEvent::HistoryLoaded {
        session_id: id.to_string(),
        turns: turns.len(),
        owner_filtered: owner.is_some(),
    }
    .emit();

    Ok(turns)
}
