//! # Metadata Gateway Library
//!
//! A caching, rate-limiting proxy for a third-party metadata API. Clients
//! call one endpoint; the gateway serves cached responses when it can,
//! coalesces concurrent misses into one upstream call, limits upstream-bound
//! traffic per client, and falls back to stale data when the upstream fails.
//!
//! ## Module Layout
//! - `core`: error type and configuration
//! - `caching`: response cache, cache keys and the in-flight registry
//! - `middleware`: fixed-window rate limiter
//! - `gateway`: client identity, upstream client, proxy orchestration and HTTP server
//! - `observability`: logging and metrics setup

/// Error types and configuration
pub mod core;

/// Response cache and in-flight request coalescing
pub mod caching;

/// Per-client rate limiting
pub mod middleware;

/// Proxy orchestration and the HTTP server
pub mod gateway;

/// Structured logging and Prometheus metrics
pub mod observability;

pub use core::config::GatewayConfig;
pub use core::error::{GatewayError, GatewayResult};
pub use gateway::server::{build_router, GatewayServer};
pub use gateway::ProxyGateway;
