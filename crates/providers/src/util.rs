//! Shared helpers for provider adapters.

use kb_domain::config::AuthConfig;
use kb_domain::error::{Error, Result};
use serde_json::{json, Value};

/// Timeouts become [`Error::Timeout`]; everything else [`Error::Http`].
pub(crate) fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}

/// Build the error for a non-2xx response, keeping the body short enough
/// to log.
pub(crate) fn status_error(provider: &str, status: reqwest::StatusCode, body: &str) -> Error {
    let mut snippet: String = body.chars().take(512).collect();
    if snippet.len() < body.len() {
        snippet.push('…');
    }
    Error::Provider {
        provider: provider.to_owned(),
        message: format!("HTTP {} - {}", status.as_u16(), snippet),
    }
}

/// Decode the accumulated argument JSON of a streamed tool call.
///
/// Empty input means no arguments. Text that does not parse is handed to the
/// tool as `{"_raw": .., "_error": ..}` so the failure shows up in the tool
/// result instead of the call running with no arguments.
pub(crate) fn parse_tool_arguments(tool_name: &str, raw: &str) -> Value {
    if raw.trim().is_empty() {
        return json!({});
    }
    match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(tool = %tool_name, raw, error = %e, "tool call arguments are not valid JSON");
            json!({ "_raw": raw, "_error": format!("invalid JSON arguments: {e}") })
        }
    }
}

/// Resolve the API key from an [`AuthConfig`].
///
/// A plaintext `key` wins (with a warning), then the `env` variable.
pub fn resolve_api_key(auth: &AuthConfig) -> Result<String> {
    if let Some(ref key) = auth.key {
        tracing::warn!("API key loaded from plaintext config field 'key'; prefer 'env'");
        return Ok(key.clone());
    }

    if let Some(ref env_var) = auth.env {
        return match std::env::var(env_var) {
            Ok(v) if !v.trim().is_empty() => Ok(v),
            _ => Err(Error::Auth(format!(
                "environment variable '{env_var}' not set or empty"
            ))),
        };
    }

    Err(Error::Auth("no API key configured: set 'key' or 'env' in auth".into()))
}
