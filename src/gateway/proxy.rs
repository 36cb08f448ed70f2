//! # Proxy Orchestration
//!
//! The request path of the metadata proxy:
//!
//! 1. Validate the endpoint and the upstream credential
//! 2. Serve from cache (no rate-limit budget consumed)
//! 3. Join an in-flight fetch for the same key (no budget consumed)
//! 4. Consult the rate limiter, rejecting with 429 when exhausted
//! 5. Fetch from upstream as the single-flight leader
//! 6. On failure, fall back to stale cache data before surfacing the error

use crate::caching::{
    CacheKey, CacheStats, CacheStatus, InFlight, InFlightRegistry, InFlightWaiter, ResponseCache,
    StalePolicy, UpstreamPayload,
};
use crate::core::config::GatewayConfig;
use crate::core::error::{GatewayError, GatewayResult};
use crate::gateway::upstream::UpstreamClient;
use crate::middleware::rate_limiting::{FixedWindowRateLimiter, RateLimitMetricsSnapshot};
use crate::observability::metrics::{CACHE_RESULTS_TOTAL, RATE_LIMITED_TOTAL};
use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use metrics::counter;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, field, info_span, warn, Instrument, Span};
use uuid::Uuid;

pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");

/// Successful proxy answer
#[derive(Debug, Clone)]
pub struct ProxyResponse {
    pub payload: UpstreamPayload,
    pub cache_status: CacheStatus,
    /// Set whenever rate limiting was evaluated for the request
    pub rate_limit_remaining: Option<u32>,
}

impl IntoResponse for ProxyResponse {
    fn into_response(self) -> Response {
        let mut response = (StatusCode::OK, Json(self.payload)).into_response();
        let headers = response.headers_mut();
        headers.insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static(self.cache_status.cache_control()),
        );
        headers.insert(X_CACHE, HeaderValue::from_static(self.cache_status.as_str()));
        if let Some(remaining) = self.rate_limit_remaining {
            headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(remaining));
        }
        response
    }
}

/// Runtime statistics exposed by `/stats`
#[derive(Debug, Clone, Serialize)]
pub struct GatewayStats {
    pub cache: CacheStats,
    pub rate_limiter: RateLimitMetricsSnapshot,
    pub in_flight: usize,
}

/// Cache, in-flight registry, rate limiter and upstream client of one gateway instance
#[derive(Clone)]
pub struct ProxyGateway {
    cache: Arc<ResponseCache>,
    inflight: InFlightRegistry,
    limiter: Arc<FixedWindowRateLimiter>,
    upstream: UpstreamClient,
    namespace: String,
    stale_policy: StalePolicy,
}

impl ProxyGateway {
    pub fn new(config: &GatewayConfig) -> GatewayResult<Self> {
        let upstream = UpstreamClient::new(config.upstream.clone())?;
        Ok(Self {
            cache: Arc::new(ResponseCache::new(config.cache.clone())),
            inflight: InFlightRegistry::new(),
            limiter: Arc::new(FixedWindowRateLimiter::new(config.rate_limit.clone())),
            upstream,
            namespace: config.cache.namespace.clone(),
            stale_policy: StalePolicy::within(config.cache.serve_stale_for),
        })
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub fn limiter(&self) -> &Arc<FixedWindowRateLimiter> {
        &self.limiter
    }

    pub fn inflight(&self) -> &InFlightRegistry {
        &self.inflight
    }

    pub fn upstream(&self) -> &UpstreamClient {
        &self.upstream
    }

    /// Start the cache and rate-limiter sweepers
    pub fn spawn_maintenance(&self) -> Vec<JoinHandle<()>> {
        vec![self.cache.spawn_sweeper(), self.limiter.spawn_sweeper()]
    }

    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            cache: self.cache.stats(),
            rate_limiter: self.limiter.get_metrics(),
            in_flight: self.inflight.len(),
        }
    }

    /// Serve one proxy request for `endpoint` on behalf of `client_id`.
    pub async fn handle(&self, endpoint: Option<&str>, client_id: &str) -> GatewayResult<ProxyResponse> {
        let span = info_span!(
            "proxy_request",
            request_id = %Uuid::new_v4(),
            endpoint = field::Empty,
            cache_status = field::Empty,
        );

        let result = self.route(endpoint, client_id).instrument(span.clone()).await;

        match &result {
            Ok(response) => {
                span.record("cache_status", response.cache_status.as_str());
                counter!(CACHE_RESULTS_TOTAL, "status" => response.cache_status.as_str())
                    .increment(1);
            }
            Err(GatewayError::RateLimitExceeded { .. }) => {
                counter!(RATE_LIMITED_TOTAL).increment(1);
            }
            Err(e) => {
                span.in_scope(|| {
                    warn!(
                        error = %e,
                        status = e.status_code().as_u16(),
                        retryable = e.is_retryable(),
                        "Proxy request failed"
                    )
                });
            }
        }
        result
    }

    async fn route(&self, endpoint: Option<&str>, client_id: &str) -> GatewayResult<ProxyResponse> {
        let endpoint = endpoint
            .map(|e| e.trim_start_matches('/'))
            .filter(|e| !e.is_empty())
            .ok_or_else(|| GatewayError::client_input("endpoint", "Missing endpoint"))?;

        if self.upstream.api_key().is_none() {
            return Err(GatewayError::server_config("TMDB API key is missing"));
        }

        let key = CacheKey::for_endpoint(&self.namespace, endpoint);
        Span::current().record("endpoint", key.endpoint());

        if let Some(hit) = self.cache.lookup(key.as_str(), self.stale_policy) {
            let cache_status = if hit.is_stale() {
                CacheStatus::Stale
            } else {
                CacheStatus::Hit
            };
            debug!(
                status = %cache_status,
                age_ms = hit.entry.age_at(Instant::now()).as_millis() as u64,
                "Served from cache"
            );
            return Ok(ProxyResponse {
                payload: hit.into_value(),
                cache_status,
                rate_limit_remaining: Some(self.limiter.peek(client_id).remaining),
            });
        }

        if let Some(waiter) = self.inflight.get(key.as_str()) {
            return self.follow(&key, waiter).await;
        }

        let decision = self.limiter.check(client_id);
        if !decision.allowed {
            return Err(self.limiter.rejection(&decision));
        }

        match self.inflight.join_or_register(key.as_str()) {
            InFlight::Follower(waiter) => self.follow(&key, waiter).await,
            InFlight::Leader(guard) => {
                let waiter = guard.waiter();
                let upstream = self.upstream.clone();
                let cache = Arc::clone(&self.cache);
                let cache_key = key.clone();

                // Runs detached so followers still get a result if this request is dropped.
                tokio::spawn(
                    async move {
                        let outcome = upstream.fetch(cache_key.endpoint()).await;
                        if let Ok(payload) = &outcome {
                            cache.set(cache_key.as_str(), payload.clone());
                        }
                        guard.complete(outcome);
                    }
                    .instrument(Span::current()),
                );

                match waiter.wait().await {
                    Ok(payload) => Ok(ProxyResponse {
                        payload,
                        cache_status: CacheStatus::Miss,
                        rate_limit_remaining: Some(decision.remaining),
                    }),
                    Err(e) => self.recover(&key, e, Some(decision.remaining)),
                }
            }
        }
    }

    async fn follow(&self, key: &CacheKey, waiter: InFlightWaiter) -> GatewayResult<ProxyResponse> {
        debug!("Joined in-flight upstream fetch");
        match waiter.wait().await {
            Ok(payload) => Ok(ProxyResponse {
                payload,
                cache_status: CacheStatus::Deduped,
                rate_limit_remaining: None,
            }),
            Err(e) => self.recover(key, e, None),
        }
    }

    /// Serve stale data for `key` in place of a failed fetch, if any is left.
    fn recover(
        &self,
        key: &CacheKey,
        error: GatewayError,
        rate_limit_remaining: Option<u32>,
    ) -> GatewayResult<ProxyResponse> {
        if !error.is_upstream_failure() {
            return Err(error);
        }
        match self.cache.get(key.as_str(), true) {
            Some(stale) => {
                warn!(error = %error, "Upstream failed, serving stale cache entry");
                Ok(ProxyResponse {
                    payload: stale.into_value(),
                    cache_status: CacheStatus::StaleIfError,
                    rate_limit_remaining,
                })
            }
            None => Err(error),
        }
    }
}
