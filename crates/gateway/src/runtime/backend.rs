//! Model backends: a model selector resolved to a provider, a concrete model,
//! a prompt family and a tool-calling protocol.

use std::collections::BTreeMap;
use std::sync::Arc;

use kb_domain::config::{LlmConfig, ModelFamily, ToolProtocol};
use kb_domain::conversation::PersistedTurn;
use kb_domain::error::{Error, Result};
use kb_domain::stream::{BoxStream, StreamEvent};
use kb_domain::tool::ToolDefinition;
use kb_providers::{ChatRequest, LlmProvider, ProviderRegistry};

use super::prompt::{self, PromptSettings};

pub struct ModelBackend {
    pub selector: String,
    pub family: ModelFamily,
    pub protocol: ToolProtocol,
    pub provider: Arc<dyn LlmProvider>,
    pub model: String,
}

impl std::fmt::Debug for ModelBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelBackend")
            .field("selector", &self.selector)
            .field("family", &self.family)
            .field("protocol", &self.protocol)
            .field("provider", &self.provider.provider_id())
            .field("model", &self.model)
            .finish()
    }
}

impl ModelBackend {
    pub fn assemble_prompt(
        &self,
        history: &[PersistedTurn],
        input: &str,
        tools: &[ToolDefinition],
        settings: &PromptSettings,
    ) -> ChatRequest {
        let mut req =
            prompt::assemble(self.family, self.protocol, history, input, tools, settings);
        req.model = Some(self.model.clone());
        req
    }

    pub async fn invoke(
        &self,
        mut req: ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        if req.model.is_none() {
            req.model = Some(self.model.clone());
        }
        self.provider.chat_stream(req).await
    }

    pub fn provider_id(&self) -> &str {
        self.provider.provider_id()
    }
}

/// Backends keyed by model selector.
#[derive(Debug, Default, Clone)]
pub struct BackendRegistry {
    backends: BTreeMap<String, Arc<ModelBackend>>,
    default_selector: String,
}

impl BackendRegistry {
    pub fn new(default_selector: impl Into<String>) -> Self {
        Self { backends: BTreeMap::new(), default_selector: default_selector.into() }
    }

    /// Wire every configured backend whose provider initialised. Backends
    /// pointing at a missing provider are logged and left out.
    pub fn from_config(config: &LlmConfig, providers: &ProviderRegistry) -> Self {
        let mut registry = Self::new(config.default_selector.clone());
        for bc in &config.backends {
            let Some(provider) = providers.get(&bc.provider) else {
                tracing::warn!(
                    selector = %bc.selector,
                    provider = %bc.provider,
                    reason = providers.init_error(&bc.provider).unwrap_or("not configured"),
                    "backend unavailable: provider missing"
                );
                continue;
            };
            let model = bc
                .model
                .clone()
                .unwrap_or_else(|| provider.default_model().to_string());
            registry.insert(ModelBackend {
                selector: bc.selector.clone(),
                family: bc.family,
                protocol: bc.protocol,
                provider,
                model,
            });
        }
        tracing::info!(
            count = registry.len(),
            default = %registry.default_selector,
            "model backends ready"
        );
        registry
    }

    pub fn insert(&mut self, backend: ModelBackend) {
        self.backends.insert(backend.selector.clone(), Arc::new(backend));
    }

    /// Look up a selector, falling back to the default when none is given.
    pub fn resolve(&self, selector: Option<&str>) -> Result<Arc<ModelBackend>> {
        let selector = match selector.map(str::trim) {
            Some(s) if !s.is_empty() => s,
            _ => self.default_selector.as_str(),
        };
        self.backends.get(selector).cloned().ok_or_else(|| {
            Error::InvalidRequest(format!(
                "unknown model '{selector}'; available: {}",
                self.selectors().join(", ")
            ))
        })
    }

    pub fn selectors(&self) -> Vec<String> {
        self.backends.keys().cloned().collect()
    }

    pub fn default_selector(&self) -> &str {
        &self.default_selector
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use kb_domain::config::BackendConfig;

    struct Stub;

    #[async_trait]
    impl LlmProvider for Stub {
        async fn chat_stream(
            &self,
            _req: ChatRequest,
        ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
            Err(Error::Other("unused".into()))
        }
        fn provider_id(&self) -> &str {
            "stub"
        }
        fn default_model(&self) -> &str {
            "stub-model"
        }
    }

    fn config() -> LlmConfig {
        LlmConfig {
            providers: Vec::new(),
            backends: vec![
                BackendConfig {
                    selector: "fast".into(),
                    provider: "stub".into(),
                    model: None,
                    protocol: ToolProtocol::InlineMarkup,
                    family: ModelFamily::OpenAi,
                },
                BackendConfig {
                    selector: "orphan".into(),
                    provider: "missing".into(),
                    model: Some("m".into()),
                    protocol: ToolProtocol::Native,
                    family: ModelFamily::Anthropic,
                },
            ],
            default_selector: "fast".into(),
            ..LlmConfig::default()
        }
    }

    fn registry() -> BackendRegistry {
        let mut providers = ProviderRegistry::default();
        providers.insert(Arc::new(Stub));
        BackendRegistry::from_config(&config(), &providers)
    }

    #[test]
    fn missing_provider_skips_backend() {
        let reg = registry();
        assert_eq!(reg.selectors(), vec!["fast".to_string()]);
    }

    #[test]
    fn model_falls_back_to_provider_default() {
        let backend = registry().resolve(Some("fast")).unwrap();
        assert_eq!(backend.model, "stub-model");
        assert_eq!(backend.protocol, ToolProtocol::InlineMarkup);
    }

    #[test]
    fn empty_selector_uses_default_and_unknown_is_rejected() {
        let reg = registry();
        assert_eq!(reg.resolve(None).unwrap().selector, "fast");
        assert_eq!(reg.resolve(Some("  ")).unwrap().selector, "fast");
        let err = reg.resolve(Some("gpt-9")).unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }

    #[test]
    fn assembled_prompt_names_the_model() {
        let backend = registry().resolve(None).unwrap();
        let req = backend.assemble_prompt(&[], "q", &[], &PromptSettings::default());
        assert_eq!(req.model.as_deref(), Some("stub-model"));
    }
}
