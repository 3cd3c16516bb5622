use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Long-term memory / answer cache
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// When false the no-op provider is used.
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "d_base_url")]
    pub base_url: String,
    /// Env var holding the bearer token, if the service needs one.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "d_5000u")]
    pub timeout_ms: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: d_base_url(),
            api_key_env: None,
            timeout_ms: d_5000u(),
        }
    }
}

fn d_base_url() -> String {
    "http://localhost:5000".into()
}
fn d_5000u() -> u64 {
    5_000
}
