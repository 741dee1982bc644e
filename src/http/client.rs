//! Reference `VaultApi` transport built on `reqwest`.
//!
//! Grounded on the developer-tools `BlockchainClient` pattern: a thin
//! `reqwest::Client` wrapper that builds one URL per call and deserializes
//! a typed JSON response. Unlike that client, every call here goes through
//! [`translate`] so transport failures map onto the narrow [`HttpError`]
//! the rest of the crate understands, and a per-call timeout (default 10s,
//! per spec §5) is always applied.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::warn;

use super::api::{
    LoginResponse, ManifestEnvelopeResponse, PutManifestRequest, PutManifestResponse,
    RegisterResponse, SessionResponse, VaultApi, VaultSummary,
};
use super::HttpError;

/// Default HTTP call timeout, per spec §5.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct HttpVaultApi {
    client: Client,
    base_url: String,
}

impl HttpVaultApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client builds with static config");
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

fn translate(err: reqwest::Error) -> HttpError {
    if err.is_timeout() {
        HttpError::Timeout
    } else if let Some(status) = err.status() {
        HttpError::from_status(status.as_u16())
    } else {
        HttpError::Network(err.to_string())
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, HttpError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(HttpError::NotFound);
    }
    warn!(status = status.as_u16(), "vault api returned non-2xx");
    Err(HttpError::from_status(status.as_u16()))
}

#[async_trait]
impl VaultApi for HttpVaultApi {
    async fn register(&self, login: &str, password: &str) -> Result<RegisterResponse, HttpError> {
        let resp = self
            .client
            .post(self.url("/auth/register"))
            .json(&serde_json::json!({ "login": login, "password": password }))
            .send()
            .await
            .map_err(translate)?;
        check_status(resp).await?.json().await.map_err(translate)
    }

    async fn login(&self, login: &str, password: &str) -> Result<LoginResponse, HttpError> {
        let resp = self
            .client
            .post(self.url("/auth/login"))
            .json(&serde_json::json!({ "login": login, "password": password }))
            .send()
            .await
            .map_err(translate)?;
        check_status(resp).await?.json().await.map_err(translate)
    }

    async fn logout(&self, token: &str) -> Result<(), HttpError> {
        let resp = self
            .client
            .post(self.url("/auth/logout"))
            .bearer_auth(token)
            .send()
            .await
            .map_err(translate)?;
        // Per spec §6: a 401 here is treated as a successful logout.
        if resp.status() == StatusCode::UNAUTHORIZED {
            return Ok(());
        }
        check_status(resp).await?;
        Ok(())
    }

    async fn session(&self, token: &str) -> Result<SessionResponse, HttpError> {
        let resp = self
            .client
            .get(self.url("/auth/session"))
            .bearer_auth(token)
            .send()
            .await
            .map_err(translate)?;
        check_status(resp).await?.json().await.map_err(translate)
    }

    async fn upload_wmk(&self, token: &str, wrapped_mk: &str) -> Result<(), HttpError> {
        let resp = self
            .client
            .post(self.url("/user/wmk"))
            .bearer_auth(token)
            .json(&serde_json::json!({ "wrapped_mk": wrapped_mk }))
            .send()
            .await
            .map_err(translate)?;
        check_status(resp).await?;
        Ok(())
    }

    async fn get_vault(&self, token: &str) -> Result<VaultSummary, HttpError> {
        let resp = self
            .client
            .get(self.url("/vault"))
            .bearer_auth(token)
            .send()
            .await
            .map_err(translate)?;
        check_status(resp).await?.json().await.map_err(translate)
    }

    async fn get_manifest(&self, token: &str) -> Result<Option<ManifestEnvelopeResponse>, HttpError> {
        let resp = self
            .client
            .get(self.url("/vault/manifest"))
            .bearer_auth(token)
            .send()
            .await
            .map_err(translate)?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = check_status(resp).await?;
        let envelope = resp.json().await.map_err(translate)?;
        Ok(Some(envelope))
    }

    async fn put_manifest(
        &self,
        token: &str,
        if_match: Option<&str>,
        body: PutManifestRequest,
    ) -> Result<PutManifestResponse, HttpError> {
        let mut req = self
            .client
            .put(self.url("/vault/manifest"))
            .bearer_auth(token)
            .json(&body);
        if let Some(etag) = if_match {
            req = req.header("If-Match", etag);
        }
        let resp = req.send().await.map_err(translate)?;
        check_status(resp).await?.json().await.map_err(translate)
    }
}
