use axum::http::header;
use axum::http::{HeaderValue, Method};
use tower_http::cors::{AllowOrigin, CorsLayer};

use kb_domain::config::CorsConfig;

/// Build a [`CorsLayer`] from the configured allowed origins.
///
/// `http://host:*` matches any numeric port on that host. A lone `"*"`
/// allows every origin (without credentials).
pub fn build_cors_layer(cors: &CorsConfig) -> CorsLayer {
    let methods = [Method::GET, Method::POST, Method::OPTIONS];
    let headers = [header::CONTENT_TYPE, header::AUTHORIZATION];

    if cors.allowed_origins.len() == 1 && cors.allowed_origins[0] == "*" {
        tracing::warn!("CORS configured with wildcard \"*\"; all origins allowed");
        return CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods(methods)
            .allow_headers(headers);
    }

    let (exact, wildcard_prefixes) = partition_origins(&cors.allowed_origins);

    let allow_origin = if wildcard_prefixes.is_empty() {
        AllowOrigin::list(exact)
    } else {
        AllowOrigin::predicate(move |origin, _| origin_allowed(&exact, &wildcard_prefixes, origin))
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(methods)
        .allow_headers(headers)
        .expose_headers([header::HeaderName::from_static("x-conversation-id")])
        .allow_credentials(true)
}

/// Split into exact origins and `scheme://host:` prefixes from `:*` entries.
fn partition_origins(origins: &[String]) -> (Vec<HeaderValue>, Vec<String>) {
    let mut exact = Vec::new();
    let mut wildcard_prefixes = Vec::new();
    for origin in origins {
        if let Some(prefix) = origin.strip_suffix('*').filter(|p| p.ends_with(':')) {
            wildcard_prefixes.push(prefix.to_owned());
        } else if let Ok(hv) = origin.parse::<HeaderValue>() {
            exact.push(hv);
        } else {
            tracing::warn!(origin = %origin, "invalid CORS origin, skipping");
        }
    }
    (exact, wildcard_prefixes)
}

fn origin_allowed(exact: &[HeaderValue], wildcard_prefixes: &[String], origin: &HeaderValue) -> bool {
    if exact.iter().any(|e| e.as_bytes() == origin.as_bytes()) {
        return true;
    }
    let Ok(origin) = origin.to_str() else {
        return false;
    };
    wildcard_prefixes.iter().any(|prefix| {
        origin
            .strip_prefix(prefix.as_str())
            .is_some_and(|port| !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()))
    })
}
