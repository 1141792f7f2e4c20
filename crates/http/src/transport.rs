//! HTTP request helper.
//!
//! Every request carries the `projectid` header; authenticated requests add
//! `Authorization: Bearer <token>` from a shared token slot. Mutations may
//! additionally await a caller-supplied header provider (bot-protection
//! tokens). Non-2xx responses decode into the typed error taxonomy;
//! connection failures surface as `NETWORK`.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;

use threadkit_client_common::error::ErrorBody;
use threadkit_client_common::{ClientConfig, Error, Result};

/// Header carrying the site's public API key.
pub const PROJECT_ID_HEADER: &str = "projectid";

/// Shared, interior-mutable bearer token. The auth manager writes it; the
/// transport reads it per request.
#[derive(Debug, Clone, Default)]
pub struct TokenSlot(Arc<RwLock<Option<String>>>);

impl TokenSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<String> {
        self.0.read().expect("token lock").clone()
    }

    pub fn set(&self, token: impl Into<String>) {
        *self.0.write().expect("token lock") = Some(token.into());
    }

    pub fn clear(&self) {
        *self.0.write().expect("token lock") = None;
    }
}

/// Capability for injecting extra headers on mutations only (bot-protection
/// tokens and the like). Called once per write, never per read.
#[async_trait]
pub trait PostHeaderProvider: Send + Sync {
    async fn post_headers(&self) -> HashMap<String, String>;
}

/// Outcome of a conditional GET.
#[derive(Debug)]
pub enum Fetched<T> {
    Fresh { value: T, etag: Option<String> },
    NotModified,
}

#[derive(Clone)]
pub struct Transport {
    http: reqwest::Client,
    base_url: String,
    project_id: String,
    token: TokenSlot,
    post_headers: Option<Arc<dyn PostHeaderProvider>>,
}

impl Transport {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.api_url.trim_end_matches('/').to_string(),
            project_id: config.project_id.clone(),
            token: TokenSlot::new(),
            post_headers: None,
        }
    }

    pub fn with_post_header_provider(mut self, provider: Arc<dyn PostHeaderProvider>) -> Self {
        self.post_headers = Some(provider);
        self
    }

    /// The slot this transport reads bearer tokens from.
    pub fn token_slot(&self) -> TokenSlot {
        self.token.clone()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn builder(&self, method: Method, path: &str, is_write: bool) -> RequestBuilder {
        let mut builder = self
            .http
            .request(method, self.url(path))
            .header(PROJECT_ID_HEADER, &self.project_id);

        if let Some(token) = self.token.get() {
            builder = builder.bearer_auth(token);
        }

        if is_write {
            if let Some(provider) = &self.post_headers {
                for (name, value) in provider.post_headers().await {
                    builder = builder.header(name, value);
                }
            }
        }

        builder
    }

    async fn send(&self, builder: RequestBuilder) -> Result<reqwest::Response> {
        builder
            .send()
            .await
            .map_err(|err| Error::network(err.to_string()))
    }

    /// Decode a response body, mapping non-2xx into the typed taxonomy.
    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|err| Error::network(format!("failed to decode response: {err}")));
        }
        Err(Self::decode_error(status, response).await)
    }

    async fn decode_error(status: StatusCode, response: reqwest::Response) -> Error {
        let raw = response.text().await.unwrap_or_default();
        let error = match serde_json::from_str::<ErrorBody>(&raw) {
            Ok(body) => Error::from_response(status.as_u16(), body.code.as_deref(), body.error),
            Err(_) => Error::from_response(status.as_u16(), None, raw),
        };
        tracing::debug!(status = status.as_u16(), kind = ?error.kind, "request failed");
        error
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let builder = self.builder(Method::GET, path, false).await.query(query);
        Self::decode(self.send(builder).await?).await
    }

    /// GET with `If-None-Match`; a 304 reports `NotModified` instead of a
    /// decoded body.
    pub async fn get_conditional<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        etag: Option<&str>,
    ) -> Result<Fetched<T>> {
        let mut builder = self.builder(Method::GET, path, false).await.query(query);
        if let Some(etag) = etag {
            builder = builder.header("If-None-Match", etag);
        }

        let response = self.send(builder).await?;
        if response.status() == StatusCode::NOT_MODIFIED {
            return Ok(Fetched::NotModified);
        }

        let status = response.status();
        if !status.is_success() {
            return Err(Self::decode_error(status, response).await);
        }

        let etag = response
            .headers()
            .get("ETag")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());
        let value = response
            .json::<T>()
            .await
            .map_err(|err| Error::network(format!("failed to decode response: {err}")))?;
        Ok(Fetched::Fresh { value, etag })
    }

    pub async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let builder = self.builder(Method::POST, path, true).await.json(body);
        Self::decode(self.send(builder).await?).await
    }

    /// POST whose success is a bodyless 2xx.
    pub async fn post_no_content<B: Serialize>(&self, path: &str, body: &B) -> Result<()> {
        let builder = self.builder(Method::POST, path, true).await.json(body);
        let response = self.send(builder).await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        Err(Self::decode_error(status, response).await)
    }

    pub async fn put<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let builder = self.builder(Method::PUT, path, true).await.json(body);
        Self::decode(self.send(builder).await?).await
    }

    /// DELETE with a JSON body; success is a bodyless 2xx.
    pub async fn delete<B: Serialize>(&self, path: &str, body: &B) -> Result<()> {
        let builder = self.builder(Method::DELETE, path, true).await.json(body);
        let response = self.send(builder).await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        Err(Self::decode_error(status, response).await)
    }
}
