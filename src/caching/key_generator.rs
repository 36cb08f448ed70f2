//! # Cache Key Generation
//!
//! Cache keys are derived from the requested upstream endpoint only. Client
//! identity never takes part, so every client shares one cached copy.

use std::fmt;

/// Normalized, namespaced cache key (`<namespace>:<endpoint>`)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    key: String,
    namespace_len: usize,
}

impl CacheKey {
    /// Build the key for an endpoint, stripping any leading slashes.
    pub fn for_endpoint(namespace: &str, endpoint: &str) -> Self {
        let normalized = normalize_endpoint(endpoint);
        Self {
            key: format!("{}:{}", namespace, normalized),
            namespace_len: namespace.len(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.key
    }

    /// The endpoint part, without namespace
    pub fn endpoint(&self) -> &str {
        &self.key[self.namespace_len + 1..]
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

/// Strip the leading slashes the client may have sent
pub fn normalize_endpoint(endpoint: &str) -> &str {
    endpoint.trim_start_matches('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leading_slashes_are_stripped() {
        let key = CacheKey::for_endpoint("tmdb", "///movie/550");
        assert_eq!(key.as_str(), "tmdb:movie/550");
        assert_eq!(key.endpoint(), "movie/550");
    }

    #[test]
    fn test_equivalent_endpoints_share_a_key() {
        assert_eq!(
            CacheKey::for_endpoint("tmdb", "/movie/550"),
            CacheKey::for_endpoint("tmdb", "movie/550")
        );
        assert_ne!(
            CacheKey::for_endpoint("tmdb", "movie/550"),
            CacheKey::for_endpoint("other", "movie/550")
        );
    }

    #[test]
    fn test_query_string_is_part_of_the_key() {
        let key = CacheKey::for_endpoint("tmdb", "search/movie?query=fight");
        assert_eq!(key.endpoint(), "search/movie?query=fight");
        assert_ne!(key, CacheKey::for_endpoint("tmdb", "search/movie?query=club"));
    }
}
