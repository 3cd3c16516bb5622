use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM providers and model backends
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Registered HTTP providers.
    #[serde(default = "d_providers")]
    pub providers: Vec<ProviderConfig>,
    /// Model selectors callers can pass as `model`.
    #[serde(default = "d_backends")]
    pub backends: Vec<BackendConfig>,
    /// Selector used when a request names no model.
    #[serde(default = "d_default_selector")]
    pub default_selector: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// Upper bound on model rounds in one ask. Reaching it fails the request.
    #[serde(default = "d_25")]
    pub max_tool_loops: usize,
    #[serde(default = "d_60000u")]
    pub default_timeout_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            providers: d_providers(),
            backends: d_backends(),
            default_selector: d_default_selector(),
            temperature: None,
            max_tokens: None,
            max_tool_loops: d_25(),
            default_timeout_ms: d_60000u(),
        }
    }
}

impl LlmConfig {
    pub fn backend(&self, selector: &str) -> Option<&BackendConfig> {
        self.backends.iter().find(|b| b.selector == selector)
    }

    pub fn provider(&self, id: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.id == id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    pub kind: ProviderKind,
    pub base_url: String,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub default_model: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    OpenaiCompat,
    Anthropic,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    /// Env var containing the key.
    #[serde(default)]
    pub env: Option<String>,
    /// Direct key (for config-only setups; prefer env).
    #[serde(default)]
    pub key: Option<String>,
}

/// One model selector: which provider, which model, and how tools are called.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub selector: String,
    pub provider: String,
    /// Falls back to the provider's `default_model`.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub protocol: ToolProtocol,
    #[serde(default)]
    pub family: ModelFamily,
}

/// How the model requests tool invocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ToolProtocol {
    /// Structured tool calls separate from text deltas.
    #[default]
    Native,
    /// A `{...}` span embedded in the text stream.
    InlineMarkup,
}

/// Prompt family: decides the wording of the system instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
    Anthropic,
    #[default]
    OpenAi,
}

// ── serde default helpers ───────────────────────────────────────────

fn d_providers() -> Vec<ProviderConfig> {
    vec![
        ProviderConfig {
            id: "anthropic".into(),
            kind: ProviderKind::Anthropic,
            base_url: "https://api.anthropic.com".into(),
            auth: AuthConfig { env: Some("ANTHROPIC_API_KEY".into()), key: None },
            default_model: Some("claude-3-5-sonnet-latest".into()),
        },
        ProviderConfig {
            id: "openai".into(),
            kind: ProviderKind::OpenaiCompat,
            base_url: "https://api.openai.com/v1".into(),
            auth: AuthConfig { env: Some("OPENAI_API_KEY".into()), key: None },
            default_model: Some("gpt-4o".into()),
        },
    ]
}

fn d_backends() -> Vec<BackendConfig> {
    vec![
        BackendConfig {
            selector: "anthropic".into(),
            provider: "anthropic".into(),
            model: None,
            protocol: ToolProtocol::Native,
            family: ModelFamily::Anthropic,
        },
        BackendConfig {
            selector: "openai".into(),
            provider: "openai".into(),
            model: None,
            protocol: ToolProtocol::InlineMarkup,
            family: ModelFamily::OpenAi,
        },
        BackendConfig {
            selector: "openai-tools".into(),
            provider: "openai".into(),
            model: None,
            protocol: ToolProtocol::Native,
            family: ModelFamily::OpenAi,
        },
    ]
}

fn d_default_selector() -> String {
    "openai".into()
}
fn d_25() -> usize {
    25
}
fn d_60000u() -> u64 {
    60_000
}
