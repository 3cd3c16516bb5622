use kb_domain::config::{Config, ConfigSeverity, StoreKind};

#[test]
fn default_host_is_localhost() {
    let config = Config::default();
    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.server.port, 3000);
}

#[test]
fn empty_file_yields_working_config() {
    let config: Config = toml::from_str("").unwrap();
    assert_eq!(config.llm.default_selector, "openai");
    assert_eq!(config.store.kind, StoreKind::File);
    assert_eq!(config.agent.anonymous_user, "anonymous");
    assert_eq!(config.agent.separator, "\n\n---\n\n");
    let errors: Vec<_> = config
        .validate()
        .into_iter()
        .filter(|e| e.severity == ConfigSeverity::Error)
        .collect();
    assert!(errors.is_empty(), "unexpected errors: {errors:?}");
}

#[test]
fn default_cors_allows_only_localhost() {
    let config = Config::default();
    assert!(config.server.cors.allowed_origins.contains(&"http://localhost:*".to_string()));
    assert!(config.server.cors.allowed_origins.contains(&"http://127.0.0.1:*".to_string()));
}

#[test]
fn anonymous_sentinel_and_empty_user_skip_owner_filter() {
    let config = Config::default();
    assert!(config.agent.is_anonymous("anonymous"));
    assert!(config.agent.is_anonymous(""));
    assert!(!config.agent.is_anonymous("u-1"));
}

#[test]
fn validate_flags_backend_with_unknown_provider() {
    let toml_str = r#"
[llm]
default_selector = "local"

[[llm.backends]]
selector = "local"
provider = "missing"
model = "m"
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    let issues = config.validate();
    assert!(issues
        .iter()
        .any(|e| e.field == "llm.backends[0].provider" && e.severity == ConfigSeverity::Error));
}

#[test]
fn validate_flags_unknown_default_selector() {
    let toml_str = r#"
[llm]
default_selector = "gemini"
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert!(config.validate().iter().any(|e| e.field == "llm.default_selector"));
}

#[test]
fn postgrest_store_requires_base_url() {
    let toml_str = r#"
[store]
kind = "postgrest"
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert!(config.validate().iter().any(|e| e.field == "store.base_url"));
}

#[test]
fn wildcard_cors_is_a_warning() {
    let toml_str = r#"
[server.cors]
allowed_origins = ["*"]
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    let issue = config
        .validate()
        .into_iter()
        .find(|e| e.field == "server.cors.allowed_origins")
        .unwrap();
    assert_eq!(issue.severity, ConfigSeverity::Warning);
}
