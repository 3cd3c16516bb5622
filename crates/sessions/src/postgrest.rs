//! PostgREST-backed conversation store (Supabase-style REST table).

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde_json::json;

use kb_domain::config::StoreConfig;
use kb_domain::conversation::{ConversationId, ConversationRecord, PersistedTurn};
use kb_domain::error::{Error, Result};

use crate::store::ConversationStore;

#[derive(Debug, Clone)]
pub struct PostgrestConversationStore {
    http: Client,
    table_url: String,
    api_key: Option<String>,
}

impl PostgrestConversationStore {
    pub fn new(cfg: &StoreConfig) -> Result<Self> {
        if cfg.base_url.is_empty() {
            return Err(Error::Config("store.base_url is required for postgrest".into()));
        }
        let http = Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;

        let api_key = std::env::var(&cfg.api_key_env).ok().filter(|k| !k.is_empty());
        if api_key.is_none() {
            tracing::warn!(env = %cfg.api_key_env, "postgrest store key not set; sending anonymous requests");
        }

        Ok(Self {
            http,
            table_url: format!("{}/{}", cfg.base_url.trim_end_matches('/'), cfg.table),
            api_key,
        })
    }

    fn decorate(&self, rb: RequestBuilder) -> RequestBuilder {
        match self.api_key {
            Some(ref key) => rb.header("apikey", key).bearer_auth(key),
            None => rb,
        }
    }

    async fn send(&self, op: &str, rb: RequestBuilder) -> Result<Response> {
        let start = Instant::now();
        let resp = self
            .decorate(rb)
            .send()
            .await
            .map_err(|e| Error::Persistence(format!("{op}: {e}")))?;
        let status = resp.status();
        tracing::debug!(
            op,
            status = status.as_u16(),
            duration_ms = start.elapsed().as_millis() as u64,
            "postgrest call"
        );
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Persistence(format!("{op}: HTTP {} - {body}", status.as_u16())));
        }
        Ok(resp)
    }
}

#[async_trait]
impl ConversationStore for PostgrestConversationStore {
    async fn select(
        &self,
        id: ConversationId,
        owner: Option<&str>,
    ) -> Result<Option<ConversationRecord>> {
        let mut query = vec![("select", "*".to_string()), ("id", format!("eq.{id}"))];
        if let Some(owner) = owner {
            query.push(("user", format!("eq.{owner}")));
        }
        let rb = self.http.get(&self.table_url).query(&query);
        let resp = self.send("select", rb).await?;
        let rows: Vec<ConversationRecord> = resp
            .json()
            .await
            .map_err(|e| Error::Persistence(format!("select: decoding rows: {e}")))?;
        Ok(rows.into_iter().next())
    }

    async fn update_messages(&self, id: ConversationId, messages: &[PersistedTurn]) -> Result<()> {
        let rb = self
            .http
            .patch(&self.table_url)
            .query(&[("id", format!("eq.{id}"))])
            .header("Prefer", "return=representation")
            .json(&json!({ "messages": messages }));
        let resp = self.send("update", rb).await?;
        let updated: Vec<serde_json::Value> = resp.json().await.unwrap_or_default();
        if updated.is_empty() {
            return Err(Error::Persistence(format!("update: no conversation with id {id}")));
        }
        Ok(())
    }

    async fn upsert(&self, record: &ConversationRecord) -> Result<()> {
        let rb = self
            .http
            .post(&self.table_url)
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(record);
        self.send("upsert", rb).await?;
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "postgrest"
    }
}
