//! Request gateway
//!
//! The single point of outbound HTTP traffic. It owns the raw response
//! cache and knows nothing about dictionary entries or regions.
//!
//! - GET responses are cached under `path + serialized query`
//! - At most one GET per path is in flight; a newer GET cancels the older one
//! - A failed GET falls back to the cached response for its key, valid or stale
//! - [`Gateway::get_settled`] waits out supersession instead of reporting it
//! - A successful POST/PUT/DELETE drops every cached GET of the same resource
//!
//! Cache and in-flight state sit behind a mutex that is never held across an
//! await point, so concurrent tasks only interleave at the network call.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{oneshot, watch};
use tokio::time::Instant;

use crate::cache::ExpiringCache;
use crate::config::ClientConfig;
use crate::transport::{ApiRequest, Method, ReqwestTransport, Transport};
use crate::Result;

/// Options for [`Gateway::get`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GetOptions {
    /// Always go to the network, even with a valid cached response
    pub skip_cache: bool,
    /// Lifetime of the cached response; the gateway default when `None`
    pub expiration: Option<Duration>,
}

impl GetOptions {
    pub fn skip_cache(mut self) -> Self {
        self.skip_cache = true;
        self
    }

    pub fn expiration(mut self, expiration: Duration) -> Self {
        self.expiration = Some(expiration);
        self
    }
}

/// Outcome of a GET
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched<T> {
    /// Received from the network just now
    Fresh(T),
    /// Served from a valid cache entry without a network call
    Cached(T),
    /// The network call failed and an earlier response was served instead
    Stale(T),
    /// A newer GET to the same path superseded this one
    Cancelled,
}

impl<T> Fetched<T> {
    pub fn into_data(self) -> Option<T> {
        match self {
            Fetched::Fresh(data) | Fetched::Cached(data) | Fetched::Stale(data) => Some(data),
            Fetched::Cancelled => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Fetched::Cancelled)
    }

    /// Convert the carried data, keeping the variant
    pub fn try_map<U>(self, f: impl FnOnce(T) -> Result<U>) -> Result<Fetched<U>> {
        Ok(match self {
            Fetched::Fresh(data) => Fetched::Fresh(f(data)?),
            Fetched::Cached(data) => Fetched::Cached(f(data)?),
            Fetched::Stale(data) => Fetched::Stale(f(data)?),
            Fetched::Cancelled => Fetched::Cancelled,
        })
    }
}

/// Outcome of [`Gateway::get_settled`]: a GET that was not superseded
#[derive(Debug, Clone, PartialEq)]
pub enum Settled<T> {
    /// Fresh from the network or served from a valid cache entry
    Live(T),
    /// The network call failed and an earlier response was served instead
    Stale(T),
}

impl<T> Settled<T> {
    pub fn into_inner(self) -> T {
        match self {
            Settled::Live(data) | Settled::Stale(data) => data,
        }
    }

    /// Convert the carried data, keeping the variant
    pub fn try_map<U>(self, f: impl FnOnce(T) -> Result<U>) -> Result<Settled<U>> {
        Ok(match self {
            Settled::Live(data) => Settled::Live(f(data)?),
            Settled::Stale(data) => Settled::Stale(f(data)?),
        })
    }
}

/// Result of a connection probe
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostics {
    pub base_url: String,
    pub reachable: bool,
    pub latency: Duration,
    pub error: Option<String>,
    pub cached_responses: usize,
    pub in_flight: usize,
}

struct InFlight {
    ticket: u64,
    cancel: oneshot::Sender<()>,
}

struct GatewayState {
    cache: ExpiringCache<Value>,
    in_flight: HashMap<String, InFlight>,
    next_ticket: u64,
    /// Bumped every time a path stops having a GET in flight
    settled: watch::Sender<u64>,
}

impl GatewayState {
    /// Register a GET for `path`, cancelling whichever one was outstanding
    fn begin(&mut self, path: &str) -> (u64, oneshot::Receiver<()>) {
        self.next_ticket += 1;
        let ticket = self.next_ticket;
        let (cancel, cancelled) = oneshot::channel();

        if let Some(previous) = self.in_flight.insert(path.to_string(), InFlight { ticket, cancel }) {
            log::debug!("Superseding in-flight GET {path}");
            let _ = previous.cancel.send(());
        }
        (ticket, cancelled)
    }

    /// Release `path` if `ticket` still owns it; false means it was superseded
    fn finish(&mut self, path: &str, ticket: u64) -> bool {
        match self.in_flight.get(path) {
            Some(current) if current.ticket == ticket => {
                self.in_flight.remove(path);
                self.settled.send_modify(|generation| *generation += 1);
                true
            }
            _ => false,
        }
    }
}

/// Releases an in-flight slot when a GET future is dropped before it finishes
struct InFlightSlot<'a> {
    gateway: &'a Gateway,
    path: &'a str,
    ticket: u64,
}

impl Drop for InFlightSlot<'_> {
    fn drop(&mut self) {
        // no-op once the GET finished or was superseded
        self.gateway.state().finish(self.path, self.ticket);
    }
}

static SHARED: Mutex<Option<Arc<Gateway>>> = Mutex::new(None);

/// Shared HTTP gateway with response caching and GET supersession
pub struct Gateway {
    transport: Arc<dyn Transport>,
    default_expiration: Duration,
    health_path: String,
    state: Mutex<GatewayState>,
}

impl Gateway {
    pub fn new(transport: Arc<dyn Transport>, default_expiration: Duration) -> Self {
        Self {
            transport,
            default_expiration,
            health_path: crate::config::DEFAULT_HEALTH_PATH.to_string(),
            state: Mutex::new(GatewayState {
                cache: ExpiringCache::new(default_expiration),
                in_flight: HashMap::new(),
                next_ticket: 0,
                settled: watch::channel(0).0,
            }),
        }
    }

    /// Build a gateway over a `reqwest` transport
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let transport = ReqwestTransport::new(config)?;
        let mut gateway = Self::new(Arc::new(transport), config.request_expiration);
        gateway.health_path = config.health_path.clone();
        Ok(gateway)
    }

    /// The process-wide gateway
    ///
    /// Built from [`ClientConfig::from_env`] on first use and kept for the
    /// lifetime of the process.
    pub fn shared() -> Result<Arc<Gateway>> {
        let mut guard = SHARED.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(gateway) = guard.as_ref() {
            return Ok(Arc::clone(gateway));
        }

        let gateway = Arc::new(Self::from_config(&ClientConfig::from_env()?)?);
        log::info!("Initialized shared gateway for {}", gateway.transport.base_url());
        *guard = Some(Arc::clone(&gateway));
        Ok(gateway)
    }

    fn state(&self) -> MutexGuard<'_, GatewayState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn base_url(&self) -> &str {
        self.transport.base_url()
    }

    /// Issue a cached, cancellable GET
    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
        options: GetOptions,
    ) -> Result<Fetched<T>> {
        self.get_value(path, query, options)
            .await?
            .try_map(|value| Ok(serde_json::from_value(value)?))
    }

    async fn get_value(
        &self,
        path: &str,
        query: &[(&str, &str)],
        options: GetOptions,
    ) -> Result<Fetched<Value>> {
        let key = cache_key(path, query);

        let (ticket, cancelled) = {
            let mut state = self.state();
            if !options.skip_cache {
                if let Some(value) = state.cache.get_fresh(&key) {
                    log::debug!("Cache hit for {key}");
                    return Ok(Fetched::Cached(value));
                }
            }
            state.begin(path)
        };
        let _slot = InFlightSlot {
            gateway: self,
            path,
            ticket,
        };

        let request = ApiRequest::get(path, query);
        let result = tokio::select! {
            biased;
            _ = cancelled => None,
            result = self.transport.send(request) => Some(result),
        };

        let mut state = self.state();
        let Some(result) = result.filter(|_| state.finish(path, ticket)) else {
            log::debug!("GET {key} was superseded, dropping its response");
            return Ok(Fetched::Cancelled);
        };

        match result {
            Ok(body) => {
                let ttl = options.expiration.unwrap_or(self.default_expiration);
                state.cache.insert_with_ttl(key, body.clone(), ttl);
                Ok(Fetched::Fresh(body))
            }
            Err(err) => match state.cache.get_stale(&key) {
                Some(stale) => {
                    log::warn!("GET {key} failed ({err}), serving cached response");
                    Ok(Fetched::Stale(stale))
                }
                None => Err(err),
            },
        }
    }

    /// Issue a GET like [`Gateway::get`], but never resolve as cancelled
    ///
    /// When a newer GET to the same path supersedes this one, wait until the
    /// path has nothing in flight and read again; the newer response is then
    /// served from the cache. If the newer request failed without a cached
    /// response to fall back on, the read goes to the network once more.
    pub async fn get_settled<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
        mut options: GetOptions,
    ) -> Result<Settled<T>> {
        loop {
            let settled = match self.get_value(path, query, options).await? {
                Fetched::Fresh(value) | Fetched::Cached(value) => Settled::Live(value),
                Fetched::Stale(value) => Settled::Stale(value),
                Fetched::Cancelled => {
                    log::debug!("GET {path} superseded, waiting for the newer request");
                    self.settled(path).await;
                    options.skip_cache = false;
                    continue;
                }
            };
            return settled.try_map(|value| Ok(serde_json::from_value(value)?));
        }
    }

    /// Resolve once no GET to `path` is in flight
    pub async fn settled(&self, path: &str) {
        loop {
            let mut generation = {
                let state = self.state();
                if !state.in_flight.contains_key(path) {
                    return;
                }
                state.settled.subscribe()
            };
            if generation.changed().await.is_err() {
                return;
            }
        }
    }

    pub async fn post<T: DeserializeOwned>(&self, path: &str, body: Option<Value>) -> Result<T> {
        self.mutate(Method::Post, path, body).await
    }

    pub async fn put<T: DeserializeOwned>(&self, path: &str, body: Option<Value>) -> Result<T> {
        self.mutate(Method::Put, path, body).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str, body: Option<Value>) -> Result<T> {
        self.mutate(Method::Delete, path, body).await
    }

    async fn mutate<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<T> {
        let response = self
            .transport
            .send(ApiRequest::mutation(method, path, body))
            .await?;

        let dropped = self.invalidate_resource(path);
        log::debug!(
            "{} {path} invalidated {dropped} cached responses",
            method.as_str()
        );

        Ok(serde_json::from_value(response)?)
    }

    /// Drop every cached GET whose leading path segment matches that of `path`
    pub fn invalidate_resource(&self, path: &str) -> usize {
        let segment = leading_segment(path).to_string();
        self.state()
            .cache
            .retain_keys(|key| leading_segment(key) != segment)
    }

    /// Drop the cached GET for exactly this path and query
    pub fn invalidate_key(&self, path: &str, query: &[(&str, &str)]) -> bool {
        self.state().cache.remove(&cache_key(path, query))
    }

    /// Drop all cached GET responses
    pub fn clear_cache(&self) {
        self.state().cache.clear();
        log::debug!("Cleared gateway cache");
    }

    /// Probe the API without touching the cache or the in-flight table
    pub async fn diagnose(&self) -> Diagnostics {
        let started = Instant::now();
        let result = self
            .transport
            .send(ApiRequest::get(&self.health_path, &[]))
            .await;
        let latency = started.elapsed();

        let state = self.state();
        Diagnostics {
            base_url: self.transport.base_url().to_string(),
            reachable: result.is_ok(),
            latency,
            error: result.err().map(|e| e.to_string()),
            cached_responses: state.cache.len(),
            in_flight: state.in_flight.len(),
        }
    }
}

/// Cache key for a GET: the path followed by its serialized query
pub fn cache_key(path: &str, query: &[(&str, &str)]) -> String {
    if query.is_empty() {
        return path.to_string();
    }

    let encoded = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(query.iter())
        .finish();
    format!("{path}?{encoded}")
}

/// First non-empty path segment, ignoring any query string
pub fn leading_segment(path: &str) -> &str {
    let path = path.split('?').next().unwrap_or_default();
    path.split('/').find(|s| !s.is_empty()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{gateway, FakeTransport};
    use crate::Error;
    use serde_json::json;

    #[test]
    fn test_cache_key() {
        assert_eq!(cache_key("/entries", &[]), "/entries");
        assert_eq!(
            cache_key("/entries", &[("q", "rio grande"), ("page", "2")]),
            "/entries?q=rio+grande&page=2"
        );
    }

    #[test]
    fn test_leading_segment() {
        assert_eq!(leading_segment("/entries"), "entries");
        assert_eq!(leading_segment("/entries/region/5"), "entries");
        assert_eq!(leading_segment("entries?q=x"), "entries");
        assert_eq!(leading_segment("/regions?page=2"), "regions");
        assert_eq!(leading_segment("/"), "");
    }

    #[tokio::test]
    async fn test_valid_cache_entry_skips_network() {
        let transport = FakeTransport::new();
        transport.respond("/regions", json!([{"id": 1}]));
        let gateway = gateway(&transport);

        let first: Fetched<Value> = gateway.get("/regions", &[], GetOptions::default()).await.unwrap();
        let second: Fetched<Value> = gateway.get("/regions", &[], GetOptions::default()).await.unwrap();

        assert_eq!(first, Fetched::Fresh(json!([{"id": 1}])));
        assert_eq!(second, Fetched::Cached(json!([{"id": 1}])));
        assert_eq!(transport.calls("/regions"), 1);
    }

    #[tokio::test]
    async fn test_skip_cache_and_query_keys() {
        let transport = FakeTransport::new();
        transport.respond("/entries", json!([]));
        let gateway = gateway(&transport);

        let _: Fetched<Value> = gateway.get("/entries", &[], GetOptions::default()).await.unwrap();
        let _: Fetched<Value> = gateway
            .get("/entries", &[], GetOptions::default().skip_cache())
            .await
            .unwrap();
        let _: Fetched<Value> = gateway
            .get("/entries", &[("page", "2")], GetOptions::default())
            .await
            .unwrap();

        assert_eq!(transport.calls("/entries"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_expiration() {
        let transport = FakeTransport::new();
        transport.respond("/regions", json!([]));
        let gateway = gateway(&transport);
        let options = GetOptions::default().expiration(Duration::from_secs(1));

        let _: Fetched<Value> = gateway.get("/regions", &[], options).await.unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        let again: Fetched<Value> = gateway.get("/regions", &[], options).await.unwrap();

        assert!(matches!(again, Fetched::Fresh(_)));
        assert_eq!(transport.calls("/regions"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_serves_stale_response() {
        let transport = FakeTransport::new();
        transport.respond("/regions", json!([{"id": 1}]));
        let gateway = gateway(&transport);

        let _: Fetched<Value> = gateway.get("/regions", &[], GetOptions::default()).await.unwrap();
        tokio::time::advance(Duration::from_secs(3600)).await;
        transport.fail("/regions");

        let stale: Fetched<Value> = gateway.get("/regions", &[], GetOptions::default()).await.unwrap();
        assert_eq!(stale, Fetched::Stale(json!([{"id": 1}])));
    }

    #[tokio::test]
    async fn test_failure_without_cache_propagates() {
        let transport = FakeTransport::new();
        transport.fail("/regions");
        let gateway = gateway(&transport);

        let err = gateway
            .get::<Value>("/regions", &[], GetOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NetworkUnavailable(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_get_supersedes_older() {
        let transport = FakeTransport::new();
        transport.respond("/entries", json!(["old"]));
        transport.delay("/entries", Duration::from_secs(5));
        let gateway = gateway(&transport);

        let first = {
            let gateway = Arc::clone(&gateway);
            tokio::spawn(async move {
                gateway
                    .get::<Value>("/entries", &[], GetOptions::default())
                    .await
            })
        };
        tokio::task::yield_now().await;
        assert_eq!(transport.calls("/entries"), 1);

        transport.respond("/entries", json!(["new"]));
        transport.clear_delay("/entries");
        let second = gateway
            .get::<Value>("/entries", &[], GetOptions::default().skip_cache())
            .await
            .unwrap();

        assert_eq!(first.await.unwrap().unwrap(), Fetched::Cancelled);
        assert_eq!(second, Fetched::Fresh(json!(["new"])));
        assert_eq!(transport.calls("/entries"), 2);

        let cached = gateway
            .get::<Value>("/entries", &[], GetOptions::default())
            .await
            .unwrap();
        assert_eq!(cached, Fetched::Cached(json!(["new"])));
    }

    #[tokio::test(start_paused = true)]
    async fn test_settled_get_waits_for_newer_request() {
        let transport = FakeTransport::new();
        transport.respond("/entries", json!(["old"]));
        transport.delay("/entries", Duration::from_secs(5));
        let gateway = gateway(&transport);

        let first = {
            let gateway = Arc::clone(&gateway);
            tokio::spawn(async move {
                gateway
                    .get_settled::<Value>("/entries", &[], GetOptions::default())
                    .await
            })
        };
        tokio::task::yield_now().await;

        transport.respond("/entries", json!(["new"]));
        transport.delay("/entries", Duration::from_secs(1));
        let second = gateway
            .get_settled::<Value>("/entries", &[], GetOptions::default().skip_cache())
            .await
            .unwrap();

        assert_eq!(second, Settled::Live(json!(["new"])));
        assert_eq!(first.await.unwrap().unwrap(), Settled::Live(json!(["new"])));
        assert_eq!(transport.calls("/entries"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_get_releases_in_flight_slot() {
        let transport = FakeTransport::new();
        transport.respond("/entries", json!([]));
        transport.delay("/entries", Duration::from_secs(5));
        let gateway = gateway(&transport);

        let abandoned = tokio::time::timeout(
            Duration::from_secs(1),
            gateway.get::<Value>("/entries", &[], GetOptions::default()),
        )
        .await;
        assert!(abandoned.is_err());

        assert_eq!(gateway.diagnose().await.in_flight, 0);
        gateway.settled("/entries").await;
    }

    #[tokio::test]
    async fn test_mutation_invalidates_resource() {
        let transport = FakeTransport::new();
        transport.respond("/entries", json!([]));
        transport.respond("/entries/region/5", json!([]));
        transport.respond("/regions", json!([]));
        transport.respond("/entries/", json!({"id": "9"}));
        let gateway = gateway(&transport);

        for path in ["/entries", "/entries/region/5", "/regions"] {
            let _: Fetched<Value> = gateway.get(path, &[], GetOptions::default()).await.unwrap();
        }

        let created: Value = gateway
            .post("/entries/", Some(json!({"term": "arroio"})))
            .await
            .unwrap();
        assert_eq!(created["id"], "9");

        for path in ["/entries", "/entries/region/5", "/regions"] {
            let _: Fetched<Value> = gateway.get(path, &[], GetOptions::default()).await.unwrap();
        }
        assert_eq!(transport.calls("/entries"), 2);
        assert_eq!(transport.calls("/entries/region/5"), 2);
        assert_eq!(transport.calls("/regions"), 1);
    }

    #[tokio::test]
    async fn test_failed_mutation_keeps_cache() {
        let transport = FakeTransport::new();
        transport.respond("/entries", json!([]));
        transport.status("/entries/3", 500);
        let gateway = gateway(&transport);

        let _: Fetched<Value> = gateway.get("/entries", &[], GetOptions::default()).await.unwrap();
        let err = gateway.delete::<Value>("/entries/3", None).await.unwrap_err();
        assert!(matches!(err, Error::Status { status: 500, .. }));

        let cached: Fetched<Value> = gateway.get("/entries", &[], GetOptions::default()).await.unwrap();
        assert!(matches!(cached, Fetched::Cached(_)));
    }

    #[tokio::test]
    async fn test_clear_cache_and_diagnostics() {
        let transport = FakeTransport::new();
        transport.respond("/regions", json!([]));
        let gateway = gateway(&transport);

        let _: Fetched<Value> = gateway.get("/regions", &[], GetOptions::default()).await.unwrap();
        let report = gateway.diagnose().await;
        assert!(report.reachable);
        assert_eq!(report.cached_responses, 1);
        assert_eq!(report.in_flight, 0);
        assert_eq!(report.base_url, "http://fake.test/api");

        gateway.clear_cache();
        let _: Fetched<Value> = gateway.get("/regions", &[], GetOptions::default()).await.unwrap();
        assert_eq!(transport.calls("/regions"), 3);

        transport.fail("/regions");
        let report = gateway.diagnose().await;
        assert!(!report.reachable);
        assert!(report.error.is_some());
    }
}
