//! REST implementation of [`MemoryProvider`].
//!
//! One attempt per call: the ask path never retries.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use uuid::Uuid;

use kb_domain::config::MemoryConfig;
use kb_domain::error::{Error, Result};
use kb_domain::trace::TraceEvent;

use crate::provider::MemoryProvider;
use crate::types::{MemoryHit, MemoryRecord, MemorySearchRequest, MemorySearchResponse};

#[derive(Debug, Clone)]
pub struct RestMemoryClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
}

impl RestMemoryClient {
    pub fn new(cfg: &MemoryConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;

        let api_key = cfg
            .api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|k| !k.is_empty());

        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_owned(),
            api_key,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn decorate(&self, rb: RequestBuilder) -> RequestBuilder {
        let rb = rb
            .header("X-Client-Type", "kbask")
            .header("X-Trace-Id", Uuid::new_v4().to_string());
        match self.api_key {
            Some(ref key) => rb.bearer_auth(key),
            None => rb,
        }
    }

    /// Send once, emit a `MemoryWrite` trace event, and map non-2xx to errors.
    async fn execute(&self, endpoint: &str, rb: RequestBuilder) -> Result<Response> {
        let start = Instant::now();
        let result = self.decorate(rb).send().await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let resp = match result {
            Ok(resp) => resp,
            Err(e) => {
                TraceEvent::MemoryWrite {
                    endpoint: endpoint.to_owned(),
                    status: e.status().map(|s| s.as_u16()).unwrap_or(0),
                    duration_ms,
                }
                .emit();
                return Err(if e.is_timeout() {
                    Error::Timeout(format!("{endpoint}: {e}"))
                } else {
                    Error::Memory(format!("{endpoint}: {e}"))
                });
            }
        };

        let status = resp.status();
        TraceEvent::MemoryWrite {
            endpoint: endpoint.to_owned(),
            status: status.as_u16(),
            duration_ms,
        }
        .emit();

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Auth(format!("{endpoint} auth failed ({status}): {body}")));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Memory(format!("{endpoint} returned {status}: {body}")));
        }
        Ok(resp)
    }
}

#[async_trait]
impl MemoryProvider for RestMemoryClient {
    async fn write(&self, record: MemoryRecord) -> Result<()> {
        let rb = self.http.post(self.url("/api/memories")).json(&record);
        self.execute("POST /api/memories", rb).await?;
        Ok(())
    }

    async fn search(&self, req: MemorySearchRequest) -> Result<Vec<MemoryHit>> {
        let rb = self.http.post(self.url("/api/search")).json(&req);
        let resp = self.execute("POST /api/search", rb).await?;
        let body = resp.text().await.map_err(|e| Error::Memory(e.to_string()))?;
        let parsed: MemorySearchResponse = serde_json::from_str(&body)
            .map_err(|e| Error::Memory(format!("failed to parse search response: {e}: {body}")))?;
        Ok(parsed.hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let cfg = MemoryConfig {
            enabled: true,
            base_url: "http://mem.local:5000/".into(),
            ..Default::default()
        };
        let client = RestMemoryClient::new(&cfg).unwrap();
        assert_eq!(client.url("/api/memories"), "http://mem.local:5000/api/memories");
    }

    #[tokio::test]
    async fn unreachable_service_is_reported_without_retry() {
        let cfg = MemoryConfig {
            enabled: true,
            base_url: "http://127.0.0.1:1".into(),
            timeout_ms: 500,
            ..Default::default()
        };
        let client = RestMemoryClient::new(&cfg).unwrap();
        let record = MemoryRecord {
            timestamp_ms: 0,
            input: "q".into(),
            output: "a".into(),
            model: "openai".into(),
            user: "anonymous".into(),
        };
        assert!(client.write(record).await.is_err());
    }
}
