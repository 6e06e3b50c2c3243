//! Response cache keyed by request identity (`METHOD URL`), sitting between
//! the backend client and the network the way a service worker sits between
//! a page and `fetch`.
//!
//! Only successful `GET` responses are stored. Requests marked
//! [`CacheMode::Reload`] always reach the network. Each named cache is its own
//! LMDB database inside `responses.lmdb`, so bumping the cache name starts
//! from an empty cache.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::app_error::{CoreError, CoreResult};
use crate::local_db_state::AppDbState;
use crate::transport::{CacheMode, Fetcher, HttpRequest, HttpResponse, Method};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStrategy {
    /// Serve a stored response when there is one, otherwise fetch and store.
    CacheFirst,
    /// Fetch and store; fall back to the stored response when the network
    /// cannot be reached.
    #[default]
    NetworkFirst,
}

pub struct ResponseCache {
    state: AppDbState,
    name: String,
}

impl ResponseCache {
    pub fn open(dir: impl AsRef<Path>, name: &str, map_size: usize) -> CoreResult<Self> {
        let state = AppDbState::init(dir.as_ref().join("responses.lmdb"), map_size)?;
        state.database(name)?;
        Ok(Self {
            state,
            name: name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn match_request(&self, request: &HttpRequest) -> CoreResult<Option<HttpResponse>> {
        if request.method != Method::Get {
            return Ok(None);
        }
        self.state
            .get(&self.name, request.cache_key().as_bytes())?
            .map(|bytes| decode_response(&bytes))
            .transpose()
    }

    /// Stores the response; returns false when it is not cacheable.
    pub fn put(&self, request: &HttpRequest, response: &HttpResponse) -> CoreResult<bool> {
        if request.method != Method::Get || !response.is_success() {
            return Ok(false);
        }
        let entry = (request.cache_key().into_bytes(), encode_response(response));
        self.state.put_many(&self.name, &[entry])?;
        Ok(true)
    }

    pub fn delete(&self, request: &HttpRequest) -> CoreResult<bool> {
        self.state.delete(&self.name, request.cache_key().as_bytes())
    }

    pub fn keys(&self) -> CoreResult<Vec<String>> {
        Ok(self
            .state
            .scan(&self.name)?
            .into_iter()
            .map(|(key, _)| String::from_utf8_lossy(&key).into_owned())
            .collect())
    }

    pub fn clear(&self) -> CoreResult<usize> {
        self.state.clear(&self.name)
    }

    /// Install step: fetches every URL and stores them all, or stores
    /// nothing if any fetch fails or answers with a non-success status.
    pub async fn precache<F: Fetcher + ?Sized>(&self, fetcher: &F, urls: &[String]) -> CoreResult<usize> {
        let mut fetched = Vec::with_capacity(urls.len());
        for url in urls {
            let request = HttpRequest::get(url.as_str());
            let response = fetcher.send(request.clone()).await?.ensure_success(url)?;
            fetched.push((request, response));
        }

        let entries: Vec<_> = fetched
            .iter()
            .map(|(request, response)| (request.cache_key().into_bytes(), encode_response(response)))
            .collect();
        self.state.put_many(&self.name, &entries)?;
        info!("Precached {} responses into '{}'", entries.len(), self.name);
        Ok(entries.len())
    }

    /// Miss on read errors; the cache is best-effort.
    fn lookup(&self, request: &HttpRequest) -> Option<HttpResponse> {
        match self.match_request(request) {
            Ok(hit) => hit,
            Err(e) => {
                warn!("Response cache read failed for {}: {e}", request.cache_key());
                None
            }
        }
    }

    fn store(&self, request: &HttpRequest, response: &HttpResponse) {
        if let Err(e) = self.put(request, response) {
            warn!("Response cache write failed for {}: {e}", request.cache_key());
        }
    }
}

fn encode_response(response: &HttpResponse) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(response.body.len() + 2);
    bytes.extend_from_slice(&response.status.to_be_bytes());
    bytes.extend_from_slice(&response.body);
    bytes
}

fn decode_response(bytes: &[u8]) -> CoreResult<HttpResponse> {
    if bytes.len() < 2 {
        return Err(CoreError::StorageReadFailed("truncated cached response".to_string()));
    }
    let status = u16::from_be_bytes([bytes[0], bytes[1]]);
    Ok(HttpResponse::new(status, &bytes[2..]))
}

/// A [`Fetcher`] that answers from, and feeds, a [`ResponseCache`].
pub struct CachingFetcher<F> {
    inner: F,
    cache: Arc<ResponseCache>,
    strategy: CacheStrategy,
}

impl<F: Fetcher> CachingFetcher<F> {
    pub fn new(inner: F, cache: Arc<ResponseCache>, strategy: CacheStrategy) -> Self {
        Self { inner, cache, strategy }
    }
}

#[async_trait]
impl<F: Fetcher> Fetcher for CachingFetcher<F> {
    async fn send(&self, request: HttpRequest) -> CoreResult<HttpResponse> {
        if request.method != Method::Get {
            return self.inner.send(request).await;
        }

        if request.cache_mode == CacheMode::Reload {
            let response = self.inner.send(request.clone()).await?;
            self.cache.store(&request, &response);
            return Ok(response);
        }

        match self.strategy {
            CacheStrategy::CacheFirst => {
                if let Some(hit) = self.cache.lookup(&request) {
                    debug!("Cache hit for {}", request.cache_key());
                    return Ok(hit);
                }
                let response = self.inner.send(request.clone()).await?;
                self.cache.store(&request, &response);
                Ok(response)
            }
            CacheStrategy::NetworkFirst => match self.inner.send(request.clone()).await {
                Ok(response) => {
                    self.cache.store(&request, &response);
                    Ok(response)
                }
                Err(e) if e.is_transport() => match self.cache.lookup(&request) {
                    Some(hit) => {
                        info!("Network unreachable, serving cached {}", request.cache_key());
                        Ok(hit)
                    }
                    None => Err(e),
                },
                Err(e) => Err(e),
            },
        }
    }
}
