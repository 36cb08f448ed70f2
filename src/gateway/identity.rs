//! Client identity for rate limiting.
//!
//! The identity is taken from the first header in [`CLIENT_ID_EXTRACTORS`]
//! that yields a non-empty value. It feeds the rate limiter only; cache keys
//! never depend on it.

use axum::http::HeaderMap;

/// Identity used when no header identifies the client
pub const ANONYMOUS_CLIENT: &str = "anonymous";

type Extractor = fn(&HeaderMap) -> Option<String>;

/// Extractors in priority order
pub const CLIENT_ID_EXTRACTORS: [Extractor; 4] = [
    forwarded_for,
    real_ip,
    cdn_connecting_ip,
    user_agent,
];

/// Resolve the rate-limit identity of a request
pub fn client_id(headers: &HeaderMap) -> String {
    CLIENT_ID_EXTRACTORS
        .iter()
        .find_map(|extract| extract(headers))
        .unwrap_or_else(|| ANONYMOUS_CLIENT.to_string())
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// First address of `x-forwarded-for`
fn forwarded_for(headers: &HeaderMap) -> Option<String> {
    header_value(headers, "x-forwarded-for")
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn real_ip(headers: &HeaderMap) -> Option<String> {
    header_value(headers, "x-real-ip").map(str::to_string)
}

fn cdn_connecting_ip(headers: &HeaderMap) -> Option<String> {
    header_value(headers, "cf-connecting-ip").map(str::to_string)
}

fn user_agent(headers: &HeaderMap) -> Option<String> {
    header_value(headers, "user-agent").map(str::to_string)
}
