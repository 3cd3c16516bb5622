//! Provider registry.
//!
//! Instantiates one adapter per configured provider at startup. Providers
//! that fail to initialise (usually a missing API key) are logged and
//! skipped so the gateway still boots.

use crate::anthropic::AnthropicProvider;
use crate::openai_compat::OpenAiCompatProvider;
use crate::traits::LlmProvider;
use kb_domain::config::{LlmConfig, ProviderKind};
use kb_domain::error::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    /// Init failures by provider id, reported by `/v1/models`.
    init_errors: HashMap<String, String>,
}

impl ProviderRegistry {
    pub fn from_config(config: &LlmConfig) -> Self {
        let timeout = Duration::from_millis(config.default_timeout_ms);
        let mut registry = Self::default();

        for pc in &config.providers {
            let result: Result<Arc<dyn LlmProvider>> = match pc.kind {
                ProviderKind::OpenaiCompat => OpenAiCompatProvider::from_config(pc, timeout)
                    .map(|p| Arc::new(p) as Arc<dyn LlmProvider>),
                ProviderKind::Anthropic => AnthropicProvider::from_config(pc, timeout)
                    .map(|p| Arc::new(p) as Arc<dyn LlmProvider>),
            };

            match result {
                Ok(provider) => {
                    tracing::info!(provider_id = %pc.id, kind = ?pc.kind, "registered LLM provider");
                    registry.providers.insert(pc.id.clone(), provider);
                }
                Err(e) => {
                    tracing::warn!(
                        provider_id = %pc.id,
                        kind = ?pc.kind,
                        error = %e,
                        "failed to initialize LLM provider, skipping"
                    );
                    registry.init_errors.insert(pc.id.clone(), e.to_string());
                }
            }
        }

        if registry.providers.is_empty() && !config.providers.is_empty() {
            tracing::warn!("no LLM providers initialized; asks will fail until auth is configured");
        }

        registry
    }

    /// Register an already-built provider (used by tests and embedders).
    pub fn insert(&mut self, provider: Arc<dyn LlmProvider>) {
        self.providers.insert(provider.provider_id().to_string(), provider);
    }

    pub fn get(&self, provider_id: &str) -> Option<Arc<dyn LlmProvider>> {
        self.providers.get(provider_id).cloned()
    }

    pub fn init_error(&self, provider_id: &str) -> Option<&str> {
        self.init_errors.get(provider_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// All registered provider ids, sorted.
    pub fn list_providers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.providers.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kb_domain::config::{AuthConfig, ProviderConfig};

    #[test]
    fn failed_providers_are_skipped_and_recorded() {
        let config = LlmConfig {
            providers: vec![
                ProviderConfig {
                    id: "local".into(),
                    kind: ProviderKind::OpenaiCompat,
                    base_url: "http://localhost:11434/v1".into(),
                    auth: AuthConfig::default(),
                    default_model: Some("llama3".into()),
                },
                ProviderConfig {
                    id: "anthropic".into(),
                    kind: ProviderKind::Anthropic,
                    base_url: "https://api.anthropic.com".into(),
                    auth: AuthConfig { env: Some("KB_TEST_MISSING_ANTHROPIC_KEY_31".into()), key: None },
                    default_model: None,
                },
            ],
            ..Default::default()
        };
        let registry = ProviderRegistry::from_config(&config);
        assert_eq!(registry.list_providers(), vec!["local".to_string()]);
        assert_eq!(registry.get("local").unwrap().default_model(), "llama3");
        assert!(registry.init_error("anthropic").unwrap().contains("KB_TEST_MISSING_ANTHROPIC_KEY_31"));
    }
}
