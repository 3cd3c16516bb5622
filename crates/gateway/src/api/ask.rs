//! `POST /v1/ask`: streams the answer as chunked `text/plain`, followed by
//! the `{"conversationId": ...}` marker.

use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::header::{self, HeaderName};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use serde_json::Value;

use kb_domain::conversation::ConversationId;
use kb_domain::error::{Error, Result};

use crate::runtime::{self, AskOptions, AskStream};
use crate::state::AppState;

use super::api_error;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AskBody {
    /// Defaults to the configured question when absent.
    #[serde(default)]
    pub input: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    /// Number or numeric string. Validated by hand so a bad id is a 400.
    #[serde(default)]
    pub conversation_id: Option<Value>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub no_cache: bool,
}

pub async fn ask(
    State(state): State<AppState>,
    body: std::result::Result<Json<AskBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return api_error(StatusCode::BAD_REQUEST, rejection.body_text()),
    };

    let conversation_id = match parse_conversation_id(body.conversation_id.as_ref()) {
        Ok(id) => id,
        Err(e) => return api_error(StatusCode::BAD_REQUEST, e.to_string()),
    };

    let opts = AskOptions {
        user: body.user,
        conversation_id,
        model: body.model,
        no_cache: body.no_cache,
    };

    match runtime::ask_question(&state, body.input, opts).await {
        Ok(stream) => stream_response(stream),
        Err(Error::InvalidRequest(msg)) => api_error(StatusCode::BAD_REQUEST, msg),
        Err(e) => {
            tracing::error!(error = %e, "ask failed before streaming");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// Absent, null and empty string mean "start a new conversation".
pub fn parse_conversation_id(raw: Option<&Value>) -> Result<Option<ConversationId>> {
    match raw {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => s.parse().map(Some),
        Some(Value::Number(n)) => n
            .as_i64()
            .map(|id| Some(ConversationId::new(id)))
            .ok_or_else(|| Error::InvalidRequest(format!("invalid conversationId: {n}"))),
        Some(other) => Err(Error::InvalidRequest(format!("invalid conversationId: {other}"))),
    }
}

fn stream_response(stream: AskStream) -> Response {
    let AskStream { conversation_id, mut chunks } = stream;
    let body = async_stream::stream! {
        while let Some(chunk) = chunks.recv().await {
            yield chunk;
        }
    };

    (
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
            (HeaderName::from_static("x-conversation-id"), conversation_id.to_string()),
        ],
        Body::from_stream(body),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn conversation_id_accepts_numbers_and_numeric_strings() {
        assert_eq!(
            parse_conversation_id(Some(&json!(12))).unwrap(),
            Some(ConversationId::new(12))
        );
        assert_eq!(
            parse_conversation_id(Some(&json!("12"))).unwrap(),
            Some(ConversationId::new(12))
        );
        assert_eq!(parse_conversation_id(Some(&json!(""))).unwrap(), None);
        assert_eq!(parse_conversation_id(None).unwrap(), None);
    }

    #[test]
    fn conversation_id_rejects_garbage() {
        assert!(parse_conversation_id(Some(&json!("abc"))).is_err());
        assert!(parse_conversation_id(Some(&json!(1.5))).is_err());
        assert!(parse_conversation_id(Some(&json!({"id": 1}))).is_err());
    }

    #[test]
    fn body_uses_camel_case_fields() {
        let body: AskBody =
            serde_json::from_value(json!({"conversationId": 3, "noCache": true})).unwrap();
        assert!(body.no_cache);
        assert_eq!(body.conversation_id, Some(json!(3)));
        assert!(body.input.is_none());
    }
}
