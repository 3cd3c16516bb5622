//! Persisted conversation shapes.
//!
//! Stored turns use a two-role vocabulary (`user` / `ai`) that never leaks
//! model-specific role names; [`PersistedTurn::to_message`] is the single
//! mapping point onto model-native [`Message`]s.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};
use crate::tool::{Message, Role};

/// Largest id we hand out: ids must stay integer-parseable everywhere,
/// including consumers that store numbers as IEEE doubles.
const MAX_ID: u64 = (1 << 53) - 1;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ConversationId
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Integer session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ConversationId(i64);

impl ConversationId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Fresh random id in `1..2^53`.
    pub fn generate() -> Self {
        let bits = uuid::Uuid::new_v4().as_u128() as u64 & MAX_ID;
        Self(bits.max(1) as i64)
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ConversationId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.trim()
            .parse::<i64>()
            .map(Self)
            .map_err(|_| Error::InvalidRequest(format!("conversationId {s:?} is not an integer")))
    }
}

impl<'de> Deserialize<'de> for ConversationId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(i64),
            Str(String),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Int(n) => Ok(Self(n)),
            Raw::Str(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turns
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Stored role. Serialized as `"user"` / `"ai"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TurnRole {
    #[serde(rename = "user")]
    User,
    #[serde(rename = "ai")]
    Assistant,
}

impl TurnRole {
    /// Normalize a stored role label. `ai` and `assistant` are the assistant;
    /// anything else is treated as the user.
    pub fn from_label(label: &str) -> Self {
        match label {
            "ai" | "assistant" => TurnRole::Assistant,
            _ => TurnRole::User,
        }
    }
}

impl<'de> Deserialize<'de> for TurnRole {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let label = String::deserialize(deserializer)?;
        Ok(TurnRole::from_label(&label))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedTurn {
    pub role: TurnRole,
    pub content: String,
}

impl PersistedTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: TurnRole::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: TurnRole::Assistant, content: content.into() }
    }

    /// Map onto the model-native role vocabulary.
    pub fn to_message(&self) -> Message {
        let role = match self.role {
            TurnRole::User => Role::User,
            TurnRole::Assistant => Role::Assistant,
        };
        Message {
            role,
            content: crate::tool::MessageContent::Text(self.content.clone()),
        }
    }
}

/// A stored conversation row: `{id, user, model, messages}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub id: ConversationId,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub messages: Vec<PersistedTurn>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_positive_and_below_2_pow_53() {
        for _ in 0..1000 {
            let id = ConversationId::generate().get();
            assert!(id > 0);
            assert!((id as u64) <= MAX_ID);
        }
    }

    #[test]
    fn id_parses_from_string_or_number() {
        let a: ConversationId = serde_json::from_str("42").unwrap();
        let b: ConversationId = serde_json::from_str("\"42\"").unwrap();
        assert_eq!(a, b);
        assert!(serde_json::from_str::<ConversationId>("\"abc\"").is_err());
        assert!("x1".parse::<ConversationId>().is_err());
    }

    #[test]
    fn role_labels_normalize_to_two_values() {
        let turns: Vec<PersistedTurn> = serde_json::from_str(
            r#"[
                {"role":"user","content":"q"},
                {"role":"ai","content":"a"},
                {"role":"assistant","content":"b"},
                {"role":"human","content":"c"}
            ]"#,
        )
        .unwrap();
        let roles: Vec<TurnRole> = turns.iter().map(|t| t.role).collect();
        assert_eq!(
            roles,
            vec![TurnRole::User, TurnRole::Assistant, TurnRole::Assistant, TurnRole::User]
        );
    }

    #[test]
    fn assistant_is_stored_as_ai() {
        let json = serde_json::to_value(PersistedTurn::assistant("hi")).unwrap();
        assert_eq!(json["role"], "ai");
    }

    #[test]
    fn mapping_to_model_roles() {
        assert_eq!(PersistedTurn::user("q").to_message().role, Role::User);
        let msg = PersistedTurn::assistant("a").to_message();
        assert_eq!(msg.role, Role::Assistant);
        assert_eq!(msg.content.text(), Some("a"));
    }
}
