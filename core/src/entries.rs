//! Entry repository
//!
//! Fetches, caches, indexes and searches dictionary entries. The repository
//! keeps two caches with their own expiration window, independent of the
//! gateway's: one for the full list and one per region. The search index is
//! rebuilt from scratch every time the full list is fetched.
//!
//! When a fetch fails the last list seen for the same key is returned, even
//! if it expired; the error only reaches the caller when nothing was cached.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use url::form_urlencoded;

use crate::cache::ExpiringCache;
use crate::config::DEFAULT_ENTRY_EXPIRATION;
use crate::gateway::{Gateway, GetOptions, Settled};
use crate::models::{coerce_list, map_entries, DictionaryEntry};
use crate::search::{self, SearchIndex};
use crate::Result;

const ENTRIES_PATH: &str = "/entries";
const FULL_LIST: &str = "all";

/// Operations the UI layer uses to read dictionary entries
#[async_trait]
pub trait EntryRepository: Send + Sync {
    /// All entries
    async fn get_all(&self) -> Result<Arc<Vec<DictionaryEntry>>>;

    /// The entry with `id`, or `None` when no such entry exists
    async fn get_by_id(&self, id: &str) -> Result<Option<DictionaryEntry>>;

    /// Entries belonging to one region
    async fn get_by_region(&self, region_id: &str) -> Result<Arc<Vec<DictionaryEntry>>>;

    /// Entries matching `keyword`; every token of a longer keyword must match
    async fn search(&self, keyword: &str) -> Result<Vec<DictionaryEntry>>;

    /// Drop the full-list cache, every per-region cache and the search index
    fn clear_cache(&self);

    /// Drop the cached entries of one region
    fn clear_region_cache(&self, region_id: &str);
}

struct EntryState {
    all: ExpiringCache<Arc<Vec<DictionaryEntry>>>,
    by_region: ExpiringCache<Arc<Vec<DictionaryEntry>>>,
    index: SearchIndex,
}

/// [`EntryRepository`] backed by the request gateway
pub struct CachedEntryRepository {
    gateway: Arc<Gateway>,
    state: Mutex<EntryState>,
}

impl CachedEntryRepository {
    pub fn new(gateway: Arc<Gateway>, expiration: Duration) -> Self {
        Self {
            gateway,
            state: Mutex::new(EntryState {
                all: ExpiringCache::new(expiration),
                by_region: ExpiringCache::new(expiration),
                index: SearchIndex::default(),
            }),
        }
    }

    /// Repository with the default expiration window
    pub fn with_gateway(gateway: Arc<Gateway>) -> Self {
        Self::new(gateway, DEFAULT_ENTRY_EXPIRATION)
    }

    fn state(&self) -> MutexGuard<'_, EntryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Load a list, waiting out any newer load of the same path
    async fn fetch_list(&self, path: &str) -> Result<Settled<Vec<DictionaryEntry>>> {
        self.gateway
            .get_settled::<Value>(path, &[], GetOptions::default())
            .await?
            .try_map(|payload| Ok(map_entries(coerce_list(payload)?)))
    }
}

fn region_path(region_id: &str) -> String {
    let encoded: String = form_urlencoded::byte_serialize(region_id.as_bytes()).collect();
    format!("{ENTRIES_PATH}/region/{encoded}")
}

#[async_trait]
impl EntryRepository for CachedEntryRepository {
    async fn get_all(&self) -> Result<Arc<Vec<DictionaryEntry>>> {
        if let Some(entries) = self.state().all.get_fresh(FULL_LIST) {
            log::debug!("Entry list served from cache ({} entries)", entries.len());
            return Ok(entries);
        }

        log::info!("Fetching entry list");
        match self.fetch_list(ENTRIES_PATH).await {
            Ok(Settled::Live(entries)) => {
                let entries = Arc::new(entries);
                let mut state = self.state();
                state.index = SearchIndex::build(&entries);
                state.all.insert(FULL_LIST, Arc::clone(&entries));
                Ok(entries)
            }
            Ok(Settled::Stale(entries)) => {
                log::warn!("Entry list fetch failed, serving cached list");
                Ok(self
                    .state()
                    .all
                    .get_stale(FULL_LIST)
                    .unwrap_or_else(|| Arc::new(entries)))
            }
            Err(err) => match self.state().all.get_stale(FULL_LIST) {
                Some(entries) => {
                    log::warn!("Entry list fetch failed ({err}), serving cached list");
                    Ok(entries)
                }
                None => Err(err),
            },
        }
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<DictionaryEntry>> {
        if let Some(entries) = self.state().all.get_fresh(FULL_LIST) {
            if let Some(entry) = entries.iter().find(|e| e.id == id) {
                return Ok(Some(entry.clone()));
            }
        }

        let entries = self.get_all().await?;
        Ok(entries.iter().find(|e| e.id == id).cloned())
    }

    async fn get_by_region(&self, region_id: &str) -> Result<Arc<Vec<DictionaryEntry>>> {
        if let Some(entries) = self.state().by_region.get_fresh(region_id) {
            log::debug!("Entries of region {region_id} served from cache");
            return Ok(entries);
        }

        log::info!("Fetching entries of region {region_id}");
        match self.fetch_list(&region_path(region_id)).await {
            Ok(Settled::Live(entries)) => {
                let entries = Arc::new(entries);
                self.state()
                    .by_region
                    .insert(region_id, Arc::clone(&entries));
                Ok(entries)
            }
            Ok(Settled::Stale(entries)) => {
                log::warn!("Entries of region {region_id} failed to load, serving cached list");
                Ok(self
                    .state()
                    .by_region
                    .get_stale(region_id)
                    .unwrap_or_else(|| Arc::new(entries)))
            }
            Err(err) => match self.state().by_region.get_stale(region_id) {
                Some(entries) => {
                    log::warn!("Entries of region {region_id} failed to load ({err}), serving cached list");
                    Ok(entries)
                }
                None => Err(err),
            },
        }
    }

    async fn search(&self, keyword: &str) -> Result<Vec<DictionaryEntry>> {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return Ok(Vec::new());
        }

        let entries = self.get_all().await?;

        let mut state = self.state();
        if state.index.is_empty() && !entries.is_empty() {
            log::debug!("Search index empty, rebuilding");
            state.index = SearchIndex::build(&entries);
        }
        Ok(search::search_entries(&entries, &state.index, keyword))
    }

    fn clear_cache(&self) {
        {
            let mut state = self.state();
            state.all.clear();
            state.by_region.clear();
            state.index.clear();
        }
        self.gateway.invalidate_resource(ENTRIES_PATH);
    }

    fn clear_region_cache(&self, region_id: &str) {
        self.state().by_region.remove(region_id);
        self.gateway.invalidate_key(&region_path(region_id), &[]);
    }
}
