//! JSON-over-HTTP provider.
//!
//! Endpoints are resolved against a base URL:
//! `GET {base}/venues`, `{base}/maps`, `{base}/routes` and `{base}/blobs/{key}`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{header, Client};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{ProviderError, RemoteProvider};
use crate::models::{MapRecord, RouteRecord, VenueRecord};

/// HTTP request timeout in seconds.
/// 30s allows for slow mobile links while failing fast enough for a background sync.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting, doubled per retry.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// List endpoints answer with either a bare array or `{"data": [...]}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum ListResponse<T> {
    Bare(Vec<T>),
    Wrapped { data: Vec<T> },
}

impl<T> ListResponse<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            ListResponse::Bare(items) => items,
            ListResponse::Wrapped { data } => data,
        }
    }
}

/// Remote provider backed by a REST API.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpProvider {
    client: Client,
    base_url: Arc<str>,
    authorization: Option<header::HeaderValue>,
}

impl HttpProvider {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: Arc::from(base_url.trim_end_matches('/')),
            authorization: None,
        })
    }

    /// Copy of this provider that sends a bearer token, sharing the connection pool.
    pub fn with_token(&self, token: &str) -> Result<Self> {
        let mut authorization = header::HeaderValue::from_str(&format!("Bearer {}", token))
            .context("API token is not a valid header value")?;
        authorization.set_sensitive(true);
        Ok(Self {
            client: self.client.clone(),
            base_url: Arc::clone(&self.base_url),
            authorization: Some(authorization),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn auth_headers(&self) -> header::HeaderMap {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));
        if let Some(ref authorization) = self.authorization {
            headers.insert(header::AUTHORIZATION, authorization.clone());
        }
        headers
    }

    /// Returns Ok(Some(response)) for success, Ok(None) for rate limit (should retry),
    /// or Err for other errors.
    async fn check_response_for_retry(
        endpoint: &str,
        response: reqwest::Response,
    ) -> Result<Option<reqwest::Response>, ProviderError> {
        let status = response.status();
        if status.is_success() {
            Ok(Some(response))
        } else if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            Ok(None)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(ProviderError::from_response(endpoint, status, &body))
        }
    }

    async fn get_response(&self, endpoint: &str) -> Result<reqwest::Response, ProviderError> {
        let url = self.url(endpoint);
        let headers = self.auth_headers();
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let response = self
                .client
                .get(&url)
                .headers(headers.clone())
                .send()
                .await
                .map_err(|source| ProviderError::Transport {
                    endpoint: endpoint.to_string(),
                    source,
                })?;

            match Self::check_response_for_retry(endpoint, response).await? {
                Some(response) => return Ok(response),
                None => {
                    if retries == MAX_RATE_LIMIT_RETRIES {
                        return Err(ProviderError::RateLimited {
                            endpoint: endpoint.to_string(),
                            retries,
                        });
                    }
                    retries += 1;
                    warn!(endpoint, retry = retries, backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2;
                }
            }
        }
    }

    async fn get_list<T: DeserializeOwned>(&self, endpoint: &str) -> Result<Vec<T>, ProviderError> {
        let text = self
            .get_response(endpoint)
            .await?
            .text()
            .await
            .map_err(|source| ProviderError::Transport {
                endpoint: endpoint.to_string(),
                source,
            })?;

        let parsed: ListResponse<T> =
            serde_json::from_str(&text).map_err(|e| ProviderError::Malformed {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })?;
        let items = parsed.into_vec();
        debug!(endpoint, count = items.len(), "List fetched");
        Ok(items)
    }
}

#[async_trait]
impl RemoteProvider for HttpProvider {
    async fn fetch_venues(&self) -> Result<Vec<VenueRecord>> {
        Ok(self.get_list("venues").await?)
    }

    async fn fetch_maps(&self) -> Result<Vec<MapRecord>> {
        Ok(self.get_list("maps").await?)
    }

    async fn fetch_routes(&self) -> Result<Vec<RouteRecord>> {
        Ok(self.get_list("routes").await?)
    }

    async fn fetch_blob(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let endpoint = format!("blobs/{}", key);
        let response = match self.get_response(&endpoint).await {
            Ok(response) => response,
            Err(ProviderError::NotFound { .. }) => {
                debug!(key, "Blob not available from provider");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let bytes = response
            .bytes()
            .await
            .map_err(|source| ProviderError::Transport { endpoint, source })?;
        Ok(Some(bytes.to_vec()))
    }
}
