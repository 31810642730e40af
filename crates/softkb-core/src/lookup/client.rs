//! JSON web client

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde_json::Value as Json;
use std::time::Duration;
use tracing::debug;

use super::cache::{SqliteLookupCache, cache_key};
use crate::error::{Error, Result};

/// A GET request with query parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    pub url: String,
    pub params: Vec<(String, String)>,
    /// Headers, not part of the cache key
    pub headers: Vec<(String, String)>,
}

impl ApiRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            params: Vec::new(),
            headers: Vec::new(),
        }
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Value of a query parameter
    pub fn get_param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn cache_key(&self) -> String {
        cache_key(&self.url, &self.params)
    }
}

/// Outcome of a request that reached the server
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    /// Parsed body of a successful response
    pub data: Option<Json>,
}

impl ApiResponse {
    pub fn ok(data: Json) -> Self {
        Self {
            status: 200,
            data: Some(data),
        }
    }

    pub fn failed(status: u16) -> Self {
        Self { status, data: None }
    }

    pub fn is_success(&self) -> bool {
        self.status == 200 && self.data.is_some()
    }
}

/// GET access to JSON web services
///
/// Responses with any HTTP status are returned as [`ApiResponse`]; transport
/// failures are errors.
#[async_trait]
pub trait WebApi: Send + Sync {
    async fn get(&self, request: &ApiRequest) -> Result<ApiResponse>;
}

/// [`WebApi`] over a reqwest client
#[derive(Debug, Clone)]
pub struct ReqwestWebApi {
    http_client: HttpClient,
}

impl ReqwestWebApi {
    pub fn new(timeout_secs: u64) -> Result<Self> {
        let http_client = HttpClient::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(Error::Network)?;
        Ok(Self { http_client })
    }
}

#[async_trait]
impl WebApi for ReqwestWebApi {
    async fn get(&self, request: &ApiRequest) -> Result<ApiResponse> {
        debug!(url = %request.url, params = request.params.len(), "Sending lookup request");

        let mut builder = self.http_client.get(&request.url).query(&request.params);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::lookup(&request.url, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Ok(ApiResponse::failed(status.as_u16()));
        }

        match response.json::<Json>().await {
            Ok(data) => Ok(ApiResponse {
                status: status.as_u16(),
                data: Some(data),
            }),
            Err(e) => {
                debug!(url = %request.url, error = %e, "Lookup response is not JSON");
                Ok(ApiResponse::failed(status.as_u16()))
            }
        }
    }
}

/// [`WebApi`] answering from the lookup cache before calling `inner`
///
/// Every response that reached the server is cached, so repeated misses do
/// not hit the network again.
pub struct CachedWebApi<A> {
    inner: A,
    cache: SqliteLookupCache,
}

impl<A: WebApi> CachedWebApi<A> {
    pub fn new(inner: A, cache: SqliteLookupCache) -> Self {
        Self { inner, cache }
    }

    pub fn cache(&self) -> &SqliteLookupCache {
        &self.cache
    }
}

#[async_trait]
impl<A: WebApi> WebApi for CachedWebApi<A> {
    async fn get(&self, request: &ApiRequest) -> Result<ApiResponse> {
        let key = request.cache_key();
        if let Some(cached) = self.cache.get(&key).await? {
            debug!(url = %request.url, key = %key, "Lookup cache hit");
            return Ok(cached);
        }

        let response = self.inner.get(request).await?;
        self.cache.put(&key, &request.url, &response).await?;
        Ok(response)
    }
}
