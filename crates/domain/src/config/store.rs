use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Conversation store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    File,
    Postgrest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub kind: StoreKind,
    /// JSON file used by the `file` store.
    #[serde(default = "d_path")]
    pub path: PathBuf,
    /// PostgREST root, e.g. `https://xyz.supabase.co/rest/v1`.
    #[serde(default)]
    pub base_url: String,
    #[serde(default = "d_table")]
    pub table: String,
    /// Env var holding the service key (sent as `apikey` and bearer token).
    #[serde(default = "d_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "d_10000u")]
    pub timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::File,
            path: d_path(),
            base_url: String::new(),
            table: d_table(),
            api_key_env: d_api_key_env(),
            timeout_ms: d_10000u(),
        }
    }
}

fn d_path() -> PathBuf {
    PathBuf::from("./data/conversations.json")
}
fn d_table() -> String {
    "conversations".into()
}
fn d_api_key_env() -> String {
    "KB_STORE_KEY".into()
}
fn d_10000u() -> u64 {
    10_000
}
