//! Langfuse ingestion client.
//!
//! Traces are buffered as `trace-create` events and sent in one batch on
//! flush. Langfuse merges events sharing a trace id, so the completion
//! update is just a second `trace-create` carrying output and metadata.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;

use kb_domain::config::LangfuseConfig;
use kb_domain::error::{Error, Result};
use kb_domain::trace::TraceEvent;

use crate::tracer::{TraceEnd, TraceHandle, TraceStart, Tracer};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "body", rename_all = "kebab-case")]
enum IngestionEvent {
    TraceCreate(TraceBody),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct TraceBody {
    id: String,
    timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_id: Option<String>,
    session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    input: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    output: Option<serde_json::Value>,
    metadata: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
struct BatchItem {
    id: String,
    timestamp: DateTime<Utc>,
    #[serde(flatten)]
    event: IngestionEvent,
}

#[derive(Debug, Serialize)]
struct IngestionBatch<'a> {
    batch: &'a [BatchItem],
}

#[derive(Debug, Default, Deserialize)]
struct IngestionResponse {
    #[serde(default)]
    errors: Vec<IngestionError>,
}

#[derive(Debug, Deserialize)]
struct IngestionError {
    id: String,
    status: i32,
    #[serde(default)]
    message: Option<String>,
}

pub struct LangfuseTracer {
    client: Client,
    ingestion_url: String,
    auth_header: String,
    batch: Mutex<Vec<BatchItem>>,
}

impl LangfuseTracer {
    /// Resolves both keys from the environment variables named in `cfg`.
    pub fn from_config(cfg: &LangfuseConfig) -> Result<Self> {
        let public_key = read_env(&cfg.public_key_env)?;
        let secret_key = read_env(&cfg.secret_key_env)?;
        Self::new(&cfg.host, &public_key, &secret_key)
    }

    pub fn new(host: &str, public_key: &str, secret_key: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Trace(e.to_string()))?;
        Ok(Self {
            client,
            ingestion_url: format!("{}/api/public/ingestion", host.trim_end_matches('/')),
            auth_header: basic_auth(public_key, secret_key),
            batch: Mutex::new(Vec::new()),
        })
    }

    async fn enqueue(&self, body: TraceBody) {
        let item = BatchItem {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event: IngestionEvent::TraceCreate(body),
        };
        self.batch.lock().await.push(item);
    }

    async fn send_batch(&self, items: &[BatchItem]) -> Result<()> {
        tracing::debug!(url = %self.ingestion_url, batch_size = items.len(), "sending langfuse batch");

        let response = self
            .client
            .post(&self.ingestion_url)
            .header("Authorization", &self.auth_header)
            .json(&IngestionBatch { batch: items })
            .send()
            .await
            .map_err(|e| Error::Trace(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Trace(format!("langfuse ingestion HTTP {status}: {body}")));
        }

        let result: IngestionResponse = response.json().await.unwrap_or_default();
        for err in &result.errors {
            tracing::warn!(id = %err.id, status = err.status, message = ?err.message, "langfuse ingestion error");
        }
        Ok(())
    }
}

#[async_trait]
impl Tracer for LangfuseTracer {
    async fn begin(&self, start: TraceStart) -> Result<TraceHandle> {
        let handle = TraceHandle::new();
        self.enqueue(TraceBody {
            id: handle.trace_id.clone(),
            timestamp: Utc::now(),
            name: Some(start.name),
            user_id: Some(start.user.clone()),
            session_id: start.session_id,
            input: Some(json!(start.input)),
            output: None,
            metadata: json!({ "model": start.model, "user": start.user }),
        })
        .await;
        Ok(handle)
    }

    async fn update(&self, handle: &TraceHandle, end: TraceEnd) -> Result<()> {
        self.enqueue(TraceBody {
            id: handle.trace_id.clone(),
            timestamp: Utc::now(),
            name: None,
            user_id: None,
            session_id: end.session_id,
            input: None,
            output: Some(json!(end.output)),
            metadata: json!({ "model": end.model, "user": end.user, "tokens": end.tokens }),
        })
        .await;
        TraceEvent::TraceRecorded { trace_id: handle.trace_id.clone(), tokens: end.tokens }.emit();
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        let items = std::mem::take(&mut *self.batch.lock().await);
        if items.is_empty() {
            return Ok(());
        }
        self.send_batch(&items).await
    }
}

fn read_env(var: &str) -> Result<String> {
    std::env::var(var)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::Config(format!("environment variable '{var}' not set")))
}

fn basic_auth(public_key: &str, secret_key: &str) -> String {
    use base64::Engine;
    let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{public_key}:{secret_key}"));
    format!("Basic {encoded}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_auth_encodes_key_pair() {
        use base64::Engine;
        let header = basic_auth("pk-lf-test", "sk-lf-secret");
        let encoded = header.strip_prefix("Basic ").unwrap();
        let decoded = base64::engine::general_purpose::STANDARD.decode(encoded).unwrap();
        assert_eq!(String::from_utf8(decoded).unwrap(), "pk-lf-test:sk-lf-secret");
    }

    #[test]
    fn batch_items_serialize_as_trace_create() {
        let item = BatchItem {
            id: "evt-1".into(),
            timestamp: Utc::now(),
            event: IngestionEvent::TraceCreate(TraceBody {
                id: "trace-1".into(),
                timestamp: Utc::now(),
                name: Some("ask".into()),
                user_id: None,
                session_id: "42".into(),
                input: Some(json!("hi")),
                output: None,
                metadata: json!({ "model": "openai" }),
            }),
        };
        let v = serde_json::to_value(&item).unwrap();
        assert_eq!(v["type"], "trace-create");
        assert_eq!(v["body"]["sessionId"], "42");
        assert!(v["body"].get("output").is_none());
    }

    #[tokio::test]
    async fn begin_and_update_queue_two_events_for_one_trace() {
        let tracer = LangfuseTracer::new("http://127.0.0.1:1", "pk", "sk").unwrap();
        let handle = tracer
            .begin(TraceStart {
                name: "ask".into(),
                input: "q".into(),
                session_id: "1".into(),
                user: "anonymous".into(),
                model: "openai".into(),
            })
            .await
            .unwrap();
        tracer
            .update(
                &handle,
                TraceEnd {
                    output: "a".into(),
                    session_id: "1".into(),
                    user: "anonymous".into(),
                    model: "openai".into(),
                    tokens: 3,
                },
            )
            .await
            .unwrap();

        let batch = tracer.batch.lock().await;
        assert_eq!(batch.len(), 2);
        let ids: Vec<String> = batch
            .iter()
            .map(|i| match &i.event {
                IngestionEvent::TraceCreate(b) => b.id.clone(),
            })
            .collect();
        assert_eq!(ids[0], ids[1]);
    }

    #[tokio::test]
    async fn failed_flush_reports_a_trace_error() {
        let tracer = LangfuseTracer::new("http://127.0.0.1:1", "pk", "sk").unwrap();
        tracer.enqueue(TraceBody {
            id: "t".into(),
            timestamp: Utc::now(),
            name: None,
            user_id: None,
            session_id: "1".into(),
            input: None,
            output: None,
            metadata: json!({}),
        })
        .await;
        let err = tracer.flush().await.unwrap_err();
        assert!(matches!(err, Error::Trace(_)));
        assert!(tracer.batch.lock().await.is_empty());
    }
}
