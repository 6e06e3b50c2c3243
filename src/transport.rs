//! Network side of the core.
//!
//! [`Fetcher`] moves raw HTTP exchanges (implemented with reqwest by
//! [`ReqwestFetcher`], wrapped by the response cache, scripted in tests).
//! [`Backend`] is the REST contract the coordinator relies on: list a whole
//! collection and create a review.

use std::fmt::{Display, Formatter};
use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::app_error::{CoreError, CoreResult};
use crate::local_db_model::{Collection, Review};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
}

impl Display for Method {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Method::Get => f.write_str("GET"),
            Method::Post => f.write_str("POST"),
        }
    }
}

/// How an intermediary cache may treat a request, after the browser's
/// `RequestInit.cache` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    #[default]
    Default,
    /// Always go to the network; the answer may still refresh the cache.
    Reload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub body: Option<Vec<u8>>,
    pub cache_mode: CacheMode,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            body: None,
            cache_mode: CacheMode::Default,
        }
    }

    pub fn post_json(url: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            body: Some(body),
            cache_mode: CacheMode::Default,
        }
    }

    pub fn with_cache_mode(mut self, cache_mode: CacheMode) -> Self {
        self.cache_mode = cache_mode;
        self
    }

    /// Identity used by the response cache.
    pub fn cache_key(&self) -> String {
        format!("{} {}", self.method, self.url)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Turns a non-2xx response into [`CoreError::HttpStatus`].
    pub fn ensure_success(self, url: &str) -> CoreResult<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(CoreError::HttpStatus {
                status: self.status,
                url: url.to_string(),
            })
        }
    }
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Performs one exchange. Only failures to get any response at all are
    /// errors; HTTP status handling is left to the caller.
    async fn send(&self, request: HttpRequest) -> CoreResult<HttpResponse>;
}

#[async_trait]
impl<F: Fetcher + ?Sized> Fetcher for Arc<F> {
    async fn send(&self, request: HttpRequest) -> CoreResult<HttpResponse> {
        (**self).send(request).await
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReqwestFetcher {
    client: reqwest::Client,
}

impl ReqwestFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for ReqwestFetcher {
    async fn send(&self, request: HttpRequest) -> CoreResult<HttpResponse> {
        let builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self
                .client
                .post(&request.url)
                .header(reqwest::header::CONTENT_TYPE, "application/json"),
        };
        let builder = match request.body {
            Some(body) => builder.body(body),
            None => builder,
        };

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?.to_vec();
        debug!("{} {} -> {status}", request.method, request.url);
        Ok(HttpResponse { status, body })
    }
}

/// REST contract of the externally owned backend.
#[async_trait]
pub trait Backend: Send + Sync {
    /// JSON array holding the full collection. [`CacheMode::Reload`] asks
    /// for the server's current copy, never a cached one.
    async fn list(&self, collection: Collection, mode: CacheMode) -> CoreResult<Vec<u8>>;

    /// Posts a review and returns the stored copy.
    async fn create_review(&self, review: &Review) -> CoreResult<Review>;
}

pub struct RestBackend<F> {
    base_url: String,
    fetcher: F,
}

impl<F: Fetcher> RestBackend<F> {
    pub fn new(base_url: impl Into<String>, fetcher: F) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { base_url, fetcher }
    }

    pub fn endpoint(&self, collection: Collection) -> String {
        format!("{}/{}", self.base_url, collection.as_str())
    }
}

#[async_trait]
impl<F: Fetcher> Backend for RestBackend<F> {
    async fn list(&self, collection: Collection, mode: CacheMode) -> CoreResult<Vec<u8>> {
        let url = self.endpoint(collection);
        let request = HttpRequest::get(&url).with_cache_mode(mode);
        let response = self.fetcher.send(request).await?;
        Ok(response.ensure_success(&url)?.body)
    }

    async fn create_review(&self, review: &Review) -> CoreResult<Review> {
        let url = self.endpoint(Collection::Reviews);
        let request = HttpRequest::post_json(&url, review.to_request_body()?);
        let response = self.fetcher.send(request).await?.ensure_success(&url)?;
        Ok(serde_json::from_slice(&response.body)?)
    }
}
