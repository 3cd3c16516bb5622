use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Observability (OpenTelemetry + Langfuse) configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// When `otlp_endpoint` is `None` no OTel exporter is started and only
/// structured JSON logging is active.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// OTLP gRPC endpoint (e.g. `http://localhost:4317`).
    #[serde(default)]
    pub otlp_endpoint: Option<String>,

    /// The `service.name` resource attribute reported to the collector.
    #[serde(default = "d_service_name")]
    pub service_name: String,

    /// Trace sampling rate (`0.0` = never, `1.0` = always).
    #[serde(default = "d_sample_rate")]
    pub sample_rate: f64,

    /// Per-ask trace records. Disabled means traces only go to the log.
    #[serde(default)]
    pub langfuse: LangfuseConfig,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: None,
            service_name: d_service_name(),
            sample_rate: d_sample_rate(),
            langfuse: LangfuseConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LangfuseConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "d_langfuse_host")]
    pub host: String,
    #[serde(default = "d_public_key_env")]
    pub public_key_env: String,
    #[serde(default = "d_secret_key_env")]
    pub secret_key_env: String,
}

impl Default for LangfuseConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: d_langfuse_host(),
            public_key_env: d_public_key_env(),
            secret_key_env: d_secret_key_env(),
        }
    }
}

fn d_service_name() -> String {
    "kbask".into()
}
fn d_sample_rate() -> f64 {
    1.0
}
fn d_langfuse_host() -> String {
    "https://cloud.langfuse.com".into()
}
fn d_public_key_env() -> String {
    "LANGFUSE_PUBLIC_KEY".into()
}
fn d_secret_key_env() -> String {
    "LANGFUSE_SECRET_KEY".into()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_empty_uses_defaults() {
        let cfg: ObservabilityConfig = toml::from_str("").unwrap();
        assert!(cfg.otlp_endpoint.is_none());
        assert_eq!(cfg.service_name, "kbask");
        assert!((cfg.sample_rate - 1.0).abs() < f64::EPSILON);
        assert!(!cfg.langfuse.enabled);
    }

    #[test]
    fn deserialize_langfuse_section() {
        let toml_str = r#"
            otlp_endpoint = "http://localhost:4317"
            [langfuse]
            enabled = true
            host = "http://langfuse.internal:3000"
        "#;
        let cfg: ObservabilityConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.otlp_endpoint.as_deref(), Some("http://localhost:4317"));
        assert!(cfg.langfuse.enabled);
        assert_eq!(cfg.langfuse.host, "http://langfuse.internal:3000");
        assert_eq!(cfg.langfuse.public_key_env, "LANGFUSE_PUBLIC_KEY");
    }
}
