use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent / ask behaviour
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Question used by `ask_question` when the caller sends no input.
    #[serde(default = "d_default_question")]
    pub default_question: String,
    /// User sentinel that disables the owner filter on history load.
    #[serde(default = "d_anonymous")]
    pub anonymous_user: String,
    /// Marker streamed after a suppressed inline tool span.
    #[serde(default = "d_separator")]
    pub separator: String,
    /// Optional extra text appended to every system prompt.
    #[serde(default)]
    pub system_prompt_suffix: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            default_question: d_default_question(),
            anonymous_user: d_anonymous(),
            separator: d_separator(),
            system_prompt_suffix: None,
        }
    }
}

impl AgentConfig {
    /// Whether `user` should be applied as an owner filter.
    pub fn is_anonymous(&self, user: &str) -> bool {
        user.is_empty() || user == self.anonymous_user
    }
}

fn d_default_question() -> String {
    "What can you tell me about this knowledge base?".into()
}
fn d_anonymous() -> String {
    "anonymous".into()
}
fn d_separator() -> String {
    "\n\n---\n\n".into()
}
