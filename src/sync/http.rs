//! HTTP Remote Client
//!
//! JSON client for the remote sync endpoints:
//!
//! - `POST {base}/sync/push` with a [`PushBatch`] body, answered by a [`PushResult`]
//! - `GET {base}/sync/pull?cursor=...` answered by a [`PullResult`]
//!
//! A configured bearer token is forwarded untouched; obtaining it is the
//! caller's business.

use crate::shared::config::AppConfig;
use crate::shared::error::SyncError;
use crate::sync::remote::{PullResult, PushBatch, PushResult, RemoteClient};
use async_trait::async_trait;
use reqwest::Client;

/// Remote collaborator over HTTP
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpRemote {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Build from configuration; `None` when no remote URL is set
    pub fn from_config(config: &AppConfig) -> Option<Self> {
        let url = config.remote_url.as_ref()?;
        let remote = Self::new(url.clone());
        Some(match &config.auth_token {
            Some(token) => remote.with_token(token.clone()),
            None => remote,
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.header("Authorization", format!("Bearer {}", token)),
            None => request,
        }
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
        what: &str,
    ) -> Result<T, SyncError> {
        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| status.to_string());
            return Err(SyncError::transport(format!(
                "{} failed: {} - {}",
                what, status, error_text
            )));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| SyncError::transport(format!("{} returned malformed body: {}", what, e)))
    }
}

#[async_trait]
impl RemoteClient for HttpRemote {
    async fn push(&self, batch: PushBatch) -> Result<PushResult, SyncError> {
        tracing::debug!(
            "POST {} ({} records)",
            self.api_url("/sync/push"),
            batch.len()
        );
        let response = self
            .authorize(self.client.post(self.api_url("/sync/push")))
            .json(&batch)
            .send()
            .await
            .map_err(|e| SyncError::transport(format!("Network error: {}", e)))?;
        Self::decode(response, "push").await
    }

    async fn pull(&self, cursor: Option<String>) -> Result<PullResult, SyncError> {
        let mut request = self.client.get(self.api_url("/sync/pull"));
        if let Some(cursor) = &cursor {
            request = request.query(&[("cursor", cursor)]);
        }
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| SyncError::transport(format!("Network error: {}", e)))?;
        Self::decode(response, "pull").await
    }
}
