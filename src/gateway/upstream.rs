//! # Upstream Client
//!
//! HTTP client for the upstream metadata API. Every call appends the
//! server-held API key as the `api_key` query parameter and is bounded by a
//! timeout covering the whole exchange, body included.
//!
//! URLs are never logged, since they carry the key.

use crate::caching::UpstreamPayload;
use crate::core::config::UpstreamConfig;
use crate::core::error::{GatewayError, GatewayResult};
use crate::observability::metrics::{UPSTREAM_DURATION_SECONDS, UPSTREAM_REQUESTS_TOTAL};
use bytes::Bytes;
use metrics::{counter, histogram};
use serde_json::Value;
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use url::Url;

/// Raw upstream response relayed by the passthrough route
#[derive(Debug, Clone)]
pub struct PassthroughResponse {
    pub status: u16,
    pub content_type: String,
    pub body: Bytes,
}

/// Pooled client for the upstream API
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    client: reqwest::Client,
    config: UpstreamConfig,
}

impl UpstreamClient {
    pub fn new(config: UpstreamConfig) -> GatewayResult<Self> {
        let mut builder = reqwest::Client::builder()
            .user_agent(concat!("metadata-gateway/", env!("CARGO_PKG_VERSION")))
            .pool_idle_timeout(Duration::from_secs(90));

        if config.prefer_ipv4 {
            builder = builder.local_address(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        }

        let client = builder.build().map_err(|e| {
            GatewayError::config(format!("Failed to build upstream HTTP client: {}", e))
        })?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &UpstreamConfig {
        &self.config
    }

    /// The configured credential, if any
    pub fn api_key(&self) -> Option<&str> {
        self.config.api_key()
    }

    /// Build `<base>/<endpoint>` with the API key appended to its query.
    pub fn endpoint_url(&self, endpoint: &str, api_key: &str) -> GatewayResult<Url> {
        let raw = format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        );
        let mut url = Url::parse(&raw)
            .map_err(|e| GatewayError::client_input("endpoint", format!("Invalid endpoint: {}", e)))?;
        url.query_pairs_mut().append_pair("api_key", api_key);
        Ok(url)
    }

    /// Fetch a normalized endpoint and classify the body by content type.
    ///
    /// Non-2xx answers become [`GatewayError::Upstream`] carrying status,
    /// status text and body. Exceeding the timeout yields
    /// [`GatewayError::UpstreamTimeout`].
    pub async fn fetch(&self, endpoint: &str) -> GatewayResult<UpstreamPayload> {
        let api_key = self
            .api_key()
            .ok_or_else(|| GatewayError::server_config("TMDB API key is missing"))?;
        let url = self.endpoint_url(endpoint, api_key)?;

        let started = Instant::now();
        let result = self
            .bounded(self.config.timeout, self.fetch_payload(url))
            .await;
        let elapsed = started.elapsed();

        histogram!(UPSTREAM_DURATION_SECONDS).record(elapsed.as_secs_f64());
        counter!(UPSTREAM_REQUESTS_TOTAL, "outcome" => outcome_label(&result)).increment(1);

        match &result {
            Ok(_) => debug!(endpoint = %endpoint, elapsed_ms = elapsed.as_millis() as u64, "Upstream fetch succeeded"),
            Err(e) => warn!(endpoint = %endpoint, error = %e, elapsed_ms = elapsed.as_millis() as u64, "Upstream fetch failed"),
        }

        result
    }

    /// Forward `path` and the client's query string, returning the raw response.
    pub async fn passthrough(&self, path: &str, query: Option<&str>) -> GatewayResult<PassthroughResponse> {
        let api_key = self
            .api_key()
            .ok_or_else(|| GatewayError::server_config("Missing TMDB API key in env (TMDB_API_KEY)"))?;

        let mut url = self.endpoint_url(path, api_key)?;
        let client_query = query.filter(|q| !q.is_empty());
        if let Some(client_query) = client_query {
            let merged = match url.query() {
                Some(existing) => format!("{}&{}", client_query, existing),
                None => client_query.to_string(),
            };
            url.set_query(Some(&merged));
        }

        let result = self
            .bounded(self.config.passthrough_timeout, self.relay(url))
            .await;
        counter!(UPSTREAM_REQUESTS_TOTAL, "outcome" => match &result {
            Ok(_) => "passthrough",
            Err(_) => "passthrough_error",
        })
        .increment(1);

        if let Err(e) = &result {
            warn!(path = %path, error = %e, "Upstream passthrough failed");
        }
        result
    }

    async fn bounded<T, F>(&self, limit: Duration, fut: F) -> GatewayResult<T>
    where
        F: Future<Output = GatewayResult<T>>,
    {
        tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| GatewayError::UpstreamTimeout {
                timeout_ms: limit.as_millis() as u64,
            })?
    }

    async fn fetch_payload(&self, url: Url) -> GatewayResult<UpstreamPayload> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        let is_json = is_json_response(&response);

        if !status.is_success() {
            let body = if is_json {
                response.json::<Value>().await.ok()
            } else {
                Some(Value::String(response.text().await.unwrap_or_default()))
            };
            return Err(GatewayError::Upstream {
                status: status.as_u16(),
                status_text: status.canonical_reason().map(str::to_string),
                body,
            });
        }

        if is_json {
            Ok(UpstreamPayload::Json(response.json::<Value>().await?))
        } else {
            Ok(UpstreamPayload::Text(response.text().await?))
        }
    }

    async fn relay(&self, url: Url) -> GatewayResult<PassthroughResponse> {
        let response = self.client.get(url).send().await?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let body = response.bytes().await?;

        Ok(PassthroughResponse {
            status,
            content_type,
            body,
        })
    }
}

fn is_json_response(response: &reqwest::Response) -> bool {
    response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.contains("application/json"))
        .unwrap_or(false)
}

fn outcome_label(result: &GatewayResult<UpstreamPayload>) -> &'static str {
    match result {
        Ok(_) => "success",
        Err(GatewayError::Upstream { .. }) => "upstream_error",
        Err(GatewayError::UpstreamTimeout { .. }) => "timeout",
        Err(_) => "transport_error",
    }
}
