//! Region repository
//!
//! Keeps a full-list cache and a per-id cache. A successful full-list fetch
//! writes every region through to the per-id cache.
//!
//! Point lookups try, in order: the per-id cache, the valid full list, the
//! `/regions/{id}` endpoint and finally the full list fetched again. The
//! point endpoint is not available on every deployment, so its failure is
//! never reported to the caller.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use url::form_urlencoded;

use crate::cache::ExpiringCache;
use crate::config::DEFAULT_REGION_EXPIRATION;
use crate::gateway::{Gateway, GetOptions, Settled};
use crate::models::{coerce_list, decode_region, map_regions, Region};
use crate::{Error, Result};

const REGIONS_PATH: &str = "/regions";
const FULL_LIST: &str = "all";

/// Operations the UI layer uses to read regions
#[async_trait]
pub trait RegionRepository: Send + Sync {
    /// All regions
    async fn get_all(&self) -> Result<Arc<Vec<Region>>>;

    /// The region with `id`, or `None` when no such region exists
    async fn get_by_id(&self, id: &str) -> Result<Option<Region>>;

    /// Drop the full-list cache and every per-id entry
    fn clear_cache(&self);

    /// Drop the cached copy of one region
    fn clear_region_cache(&self, id: &str);
}

struct RegionState {
    all: ExpiringCache<Arc<Vec<Region>>>,
    by_id: ExpiringCache<Region>,
}

/// [`RegionRepository`] backed by the request gateway
pub struct CachedRegionRepository {
    gateway: Arc<Gateway>,
    state: Mutex<RegionState>,
}

impl CachedRegionRepository {
    pub fn new(gateway: Arc<Gateway>, expiration: Duration) -> Self {
        Self {
            gateway,
            state: Mutex::new(RegionState {
                all: ExpiringCache::new(expiration),
                by_id: ExpiringCache::new(expiration),
            }),
        }
    }

    pub fn with_gateway(gateway: Arc<Gateway>) -> Self {
        Self::new(gateway, DEFAULT_REGION_EXPIRATION)
    }

    fn state(&self) -> MutexGuard<'_, RegionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look in the per-id cache, then in the valid full list
    fn cached(&self, id: &str) -> Option<Region> {
        let mut state = self.state();
        if let Some(region) = state.by_id.get_fresh(id) {
            return Some(region);
        }

        let list = state.all.get_fresh(FULL_LIST)?;
        let region = list.iter().find(|r| r.id == id)?.clone();
        state.by_id.insert(id, region.clone());
        Some(region)
    }

    /// Request a single region
    ///
    /// `None` when the endpoint answers with nothing that carries `id`.
    async fn fetch_one(&self, id: &str) -> Result<Option<Region>> {
        let payload = self
            .gateway
            .get_settled::<Value>(&region_path(id), &[], GetOptions::default())
            .await?
            .into_inner();

        // some deployments answer with a one-element list
        let item = match payload {
            Value::Array(mut items) => match items.iter().position(|item| id_matches(item, id)) {
                Some(position) => items.swap_remove(position),
                None => return Ok(None),
            },
            Value::Object(_) if id_matches(&payload, id) => payload,
            Value::Null | Value::Object(_) => return Ok(None),
            _ => {
                return Err(Error::MalformedResponse(format!(
                    "expected a region record for {id}"
                )))
            }
        };

        decode_region(item).map(Some)
    }
}

fn region_path(id: &str) -> String {
    let encoded: String = form_urlencoded::byte_serialize(id.as_bytes()).collect();
    format!("{REGIONS_PATH}/{encoded}")
}

fn id_matches(item: &Value, id: &str) -> bool {
    match item.get("id") {
        Some(Value::String(s)) => s.trim() == id,
        Some(Value::Number(n)) => n.to_string() == id,
        _ => false,
    }
}

#[async_trait]
impl RegionRepository for CachedRegionRepository {
    async fn get_all(&self) -> Result<Arc<Vec<Region>>> {
        if let Some(regions) = self.state().all.get_fresh(FULL_LIST) {
            log::debug!("Region list served from cache ({} regions)", regions.len());
            return Ok(regions);
        }

        log::info!("Fetching region list");
        let fetched = self
            .gateway
            .get_settled::<Value>(REGIONS_PATH, &[], GetOptions::default())
            .await
            .and_then(|settled| {
                settled.try_map(|payload| Ok(map_regions(coerce_list(payload)?)))
            });

        match fetched {
            Ok(Settled::Live(regions)) => {
                let regions = Arc::new(regions);
                let mut state = self.state();
                for region in regions.iter() {
                    state.by_id.insert(region.id.clone(), region.clone());
                }
                state.all.insert(FULL_LIST, Arc::clone(&regions));
                Ok(regions)
            }
            Ok(Settled::Stale(regions)) => {
                log::warn!("Region list fetch failed, serving cached list");
                Ok(self
                    .state()
                    .all
                    .get_stale(FULL_LIST)
                    .unwrap_or_else(|| Arc::new(regions)))
            }
            Err(err) => match self.state().all.get_stale(FULL_LIST) {
                Some(regions) => {
                    log::warn!("Region list fetch failed ({err}), serving cached list");
                    Ok(regions)
                }
                None => Err(err),
            },
        }
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Region>> {
        if let Some(region) = self.cached(id) {
            log::debug!("Region {id} served from cache");
            return Ok(Some(region));
        }

        match self.fetch_one(id).await {
            Ok(Some(region)) => {
                self.state().by_id.insert(id, region.clone());
                return Ok(Some(region));
            }
            Ok(None) => log::debug!("Region {id} not returned by point lookup"),
            Err(err) => log::debug!("Point lookup of region {id} failed ({err}), trying full list"),
        }

        match self.get_all().await {
            Ok(regions) => Ok(regions.iter().find(|r| r.id == id).cloned()),
            Err(err) => match self.state().by_id.get_stale(id) {
                Some(region) => {
                    log::warn!("Region {id} could not be loaded ({err}), serving cached copy");
                    Ok(Some(region))
                }
                None => Err(err),
            },
        }
    }

    fn clear_cache(&self) {
        {
            let mut state = self.state();
            state.all.clear();
            state.by_id.clear();
        }
        self.gateway.invalidate_resource(REGIONS_PATH);
    }

    fn clear_region_cache(&self, id: &str) {
        self.state().by_id.remove(id);
        self.gateway.invalidate_key(&region_path(id), &[]);
    }
}
