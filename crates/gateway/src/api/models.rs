use axum::extract::State;
use axum::response::{IntoResponse, Json};

use crate::state::AppState;

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// `GET /v1/models`: usable model selectors, plus providers that failed to
/// initialise.
pub async fn list_models(State(state): State<AppState>) -> impl IntoResponse {
    let unavailable: Vec<serde_json::Value> = state
        .config
        .llm
        .providers
        .iter()
        .filter_map(|p| {
            state.providers.init_error(&p.id).map(|reason| {
                serde_json::json!({ "provider": p.id, "reason": reason })
            })
        })
        .collect();

    Json(serde_json::json!({
        "default": state.backends.default_selector(),
        "models": state.backends.selectors(),
        "providers": state.providers.list_providers(),
        "unavailable": unavailable,
    }))
}
