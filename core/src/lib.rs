//! # regional-dict-core
//!
//! Client-side data-access layer for the Regional Dictionary App.
//!
//! This crate provides:
//! - A shared request gateway with response caching, GET supersession and
//!   stale-on-error fallback
//! - Repositories for dictionary entries and regions, each owning its caches
//! - An in-memory search index over dictionary entries
//! - C FFI exports for cross-platform integration (Android, iOS)
//!
//! ## Usage
//!
//! ```ignore
//! use regional_dict_core::{init, ClientConfig, EntryRepository};
//!
//! let handle = init(&ClientConfig::from_env()?)?;
//! let results = handle.entries.search("river").await?;
//! if let Some(entry) = results.first() {
//!     let region = handle.regions.get_by_id(&entry.region_id).await?;
//! }
//! ```

pub mod cache;
pub mod config;
pub mod entries;
pub mod ffi;
pub mod gateway;
pub mod models;
pub mod regions;
pub mod search;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use config::ClientConfig;
pub use entries::{CachedEntryRepository, EntryRepository};
pub use gateway::{Diagnostics, Fetched, Gateway, GetOptions, Settled};
pub use models::{DictionaryEntry, Region};
pub use regions::{CachedRegionRepository, RegionRepository};

/// Errors that can occur in regional-dict-core operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Network unavailable, check your internet connection and try again ({0})")]
    NetworkUnavailable(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Request to {path} failed with HTTP {status}")]
    Status { status: u16, path: String },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Client not initialized")]
    NotInitialized,
}

impl Error {
    /// Whether the failure means no response arrived at all
    pub fn is_network(&self) -> bool {
        matches!(self, Error::NetworkUnavailable(_) | Error::Timeout(_))
    }
}

/// Result type alias for regional-dict-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Both repositories wired to one gateway
///
/// The repositories are cheap to construct; all caching and request
/// supersession that must be global lives in the gateway they share.
pub struct DictHandle {
    pub entries: CachedEntryRepository,
    pub regions: CachedRegionRepository,
    gateway: Arc<Gateway>,
}

impl DictHandle {
    /// Build repositories on top of an existing gateway
    pub fn from_gateway(gateway: Arc<Gateway>, config: &ClientConfig) -> Self {
        Self {
            entries: CachedEntryRepository::new(Arc::clone(&gateway), config.entry_expiration),
            regions: CachedRegionRepository::new(Arc::clone(&gateway), config.region_expiration),
            gateway,
        }
    }

    /// The gateway underneath both repositories
    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    /// Drop every repository cache, the search index and all cached responses
    pub fn clear_all(&self) {
        self.entries.clear_cache();
        self.regions.clear_cache();
        self.gateway.clear_cache();
    }
}

/// Create a handle with its own gateway
///
/// The mobile bridge and the browse tool use this with the base URL they
/// are given; [`init_shared`] reuses the process-wide gateway instead.
///
/// # Example
///
/// ```ignore
/// let config = ClientConfig::default().with_base_url("https://dict.example.org/api");
/// let handle = regional_dict_core::init(&config)?;
/// ```
pub fn init(config: &ClientConfig) -> Result<DictHandle> {
    let gateway = Arc::new(Gateway::from_config(config)?);
    Ok(DictHandle::from_gateway(gateway, config))
}

/// Create a handle backed by the process-wide gateway
///
/// Every handle created this way shares one response cache and one
/// in-flight table, no matter how many exist.
pub fn init_shared() -> Result<DictHandle> {
    let config = ClientConfig::from_env()?;
    Ok(DictHandle::from_gateway(Gateway::shared()?, &config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::NotInitialized;
        assert_eq!(err.to_string(), "Client not initialized");

        let err = Error::Status {
            status: 404,
            path: "/regions/9".to_string(),
        };
        assert_eq!(err.to_string(), "Request to /regions/9 failed with HTTP 404");
    }

    #[test]
    fn test_network_errors_are_classified() {
        assert!(Error::NetworkUnavailable("refused".into()).is_network());
        assert!(Error::Timeout(Duration::from_secs(15)).is_network());
        assert!(!Error::MalformedResponse("not a list".into()).is_network());
    }

    #[test]
    fn test_shared_handles_share_one_gateway() {
        let first = init_shared().unwrap();
        let second = init_shared().unwrap();
        assert!(Arc::ptr_eq(first.gateway(), second.gateway()));
    }
}
