//! Client configuration
//!
//! The API base address and cache windows are supplied by the embedding
//! app. Defaults suit a local development server.

use std::time::Duration;

use url::Url;

use crate::{Error, Result};

/// Default API base address
pub const DEFAULT_BASE_URL: &str = "http://localhost:3000/api";
/// Default connection/request timeout of the HTTP client
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);
/// Default lifetime of a cached GET response in the gateway
pub const DEFAULT_REQUEST_EXPIRATION: Duration = Duration::from_secs(5 * 60);
/// Default lifetime of the entry repository caches
pub const DEFAULT_ENTRY_EXPIRATION: Duration = Duration::from_secs(10 * 60);
/// Default lifetime of the region repository caches
pub const DEFAULT_REGION_EXPIRATION: Duration = Duration::from_secs(30 * 60);
/// Path probed by connection diagnostics
pub const DEFAULT_HEALTH_PATH: &str = "/regions";

/// Configuration shared by the gateway and repositories
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base address every request path is appended to
    pub base_url: String,
    /// Fixed timeout of the HTTP client
    pub timeout: Duration,
    /// Expiration window for cached GET responses
    pub request_expiration: Duration,
    /// Expiration window for entry lists held by the entry repository
    pub entry_expiration: Duration,
    /// Expiration window for regions held by the region repository
    pub region_expiration: Duration,
    /// Path requested by [`Gateway::diagnose`](crate::Gateway::diagnose)
    pub health_path: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            request_expiration: DEFAULT_REQUEST_EXPIRATION,
            entry_expiration: DEFAULT_ENTRY_EXPIRATION,
            region_expiration: DEFAULT_REGION_EXPIRATION,
            health_path: DEFAULT_HEALTH_PATH.to_string(),
        }
    }
}

impl ClientConfig {
    /// Build a configuration from `DICT_*` environment variables
    ///
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(base_url) = lookup("DICT_API_URL") {
            config.base_url = base_url;
        }
        if let Some(secs) = lookup("DICT_API_TIMEOUT_SECS") {
            config.timeout = parse_secs("DICT_API_TIMEOUT_SECS", &secs)?;
        }
        if let Some(secs) = lookup("DICT_REQUEST_CACHE_SECS") {
            config.request_expiration = parse_secs("DICT_REQUEST_CACHE_SECS", &secs)?;
        }
        if let Some(secs) = lookup("DICT_ENTRY_CACHE_SECS") {
            config.entry_expiration = parse_secs("DICT_ENTRY_CACHE_SECS", &secs)?;
        }
        if let Some(secs) = lookup("DICT_REGION_CACHE_SECS") {
            config.region_expiration = parse_secs("DICT_REGION_CACHE_SECS", &secs)?;
        }
        if let Some(path) = lookup("DICT_HEALTH_PATH") {
            config.health_path = path;
        }

        config.validate()?;
        Ok(config)
    }

    /// Replace the base address
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Replace the HTTP timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Check that the base address is an absolute http(s) URL
    pub fn validate(&self) -> Result<Url> {
        let url = Url::parse(&self.base_url)?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            scheme => Err(Error::InvalidConfig(format!(
                "unsupported scheme '{}' in {}",
                scheme, self.base_url
            ))),
        }
    }
}

fn parse_secs(key: &str, value: &str) -> Result<Duration> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|_| Error::InvalidConfig(format!("{key} must be a number of seconds, got '{value}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ClientConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.timeout, Duration::from_secs(15));
    }

    #[test]
    fn test_env_overrides() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("DICT_API_URL", "https://dict.example.org/api"),
            ("DICT_API_TIMEOUT_SECS", "5"),
            ("DICT_ENTRY_CACHE_SECS", " 60 "),
        ]))
        .unwrap();

        assert_eq!(config.base_url, "https://dict.example.org/api");
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.entry_expiration, Duration::from_secs(60));
        assert_eq!(config.region_expiration, DEFAULT_REGION_EXPIRATION);
    }

    #[test]
    fn test_invalid_number_is_rejected() {
        let err = ClientConfig::from_lookup(lookup(&[("DICT_REQUEST_CACHE_SECS", "soon")]))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_invalid_base_url_is_rejected() {
        let err = ClientConfig::from_lookup(lookup(&[("DICT_API_URL", "not a url")])).unwrap_err();
        assert!(matches!(err, Error::InvalidUrl(_)));

        let err = ClientConfig::default()
            .with_base_url("ftp://dict.example.org")
            .validate()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }
}
