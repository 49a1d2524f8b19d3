//! HTTP client for the daemon's control API.

use anyhow::Context;
use serde::de::DeserializeOwned;
use spm_state::{NewProvider, ProviderRecord};

use crate::api::{ApiResponse, RegistrationResponse};

/// Talks to a running `spmd run` over its control API.
#[derive(Clone)]
pub struct ApiClient {
    inner: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    /// `base_url` is the daemon root, e.g. `http://127.0.0.1:7070`.
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let inner = reqwest::Client::builder().build()?;
        Ok(Self {
            inner,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub async fn register(&self, new: &NewProvider) -> anyhow::Result<RegistrationResponse> {
        let resp = self.send(self.inner.post(self.url("")).json(new)).await?;
        Self::handle_response(resp).await
    }

    pub async fn list(&self, service_type: Option<&str>) -> anyhow::Result<Vec<ProviderRecord>> {
        let mut request = self.inner.get(self.url(""));
        if let Some(service_type) = service_type {
            request = request.query(&[("service_type", service_type)]);
        }
        let resp = self.send(request).await?;
        Self::handle_response(resp).await
    }

    /// Look a provider up by id or name.
    pub async fn get(&self, key: &str) -> anyhow::Result<ProviderRecord> {
        let resp = self.send(self.inner.get(self.url(key))).await?;
        Self::handle_response(resp).await
    }

    pub async fn update(&self, id: &str, update: &NewProvider) -> anyhow::Result<ProviderRecord> {
        let resp = self.send(self.inner.put(self.url(id)).json(update)).await?;
        Self::handle_response(resp).await
    }

    pub async fn delete(&self, id: &str) -> anyhow::Result<()> {
        let resp = self.send(self.inner.delete(self.url(id))).await?;
        let _: String = Self::handle_response(resp).await?;
        Ok(())
    }

    fn url(&self, key: &str) -> String {
        if key.is_empty() {
            format!("{}/api/v1/providers", self.base_url)
        } else {
            format!("{}/api/v1/providers/{key}", self.base_url)
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> anyhow::Result<reqwest::Response> {
        request
            .send()
            .await
            .with_context(|| format!("is spmd running? cannot reach {}", self.base_url))
    }

    async fn handle_response<T: DeserializeOwned>(resp: reqwest::Response) -> anyhow::Result<T> {
        let status = resp.status();
        let text = resp.text().await?;
        let body: ApiResponse<T> = match serde_json::from_str(&text) {
            Ok(body) => body,
            Err(_) if !status.is_success() => anyhow::bail!("{status}: {text}"),
            Err(e) => return Err(e).context("invalid response from spmd"),
        };
        if !status.is_success() || !body.success {
            anyhow::bail!(
                "{}: {}",
                status,
                body.error.unwrap_or_else(|| "request failed".to_string())
            );
        }
        body.data
            .ok_or_else(|| anyhow::anyhow!("{status}: response has no data"))
    }
}
