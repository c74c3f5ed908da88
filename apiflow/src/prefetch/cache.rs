//! Cache collaborator for speculative fetches.

use crate::error::ApiError;
use crate::request::{ApiResponse, Call, EndpointId, Params};
use dashmap::DashMap;
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

/// Options passed along with every speculative fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrefetchOptions {
    /// How long a warmed result stays usable.
    pub ttl: Duration,
    /// The fetch was predicted, not requested.
    pub speculative: bool,
}

/// One speculative fetch handed to the cache.
#[derive(Clone)]
pub struct PrefetchRequest {
    pub endpoint: EndpointId,
    pub params: Params,
    pub options: PrefetchOptions,
    /// Issues the call for this endpoint and params.
    pub fetcher: Call,
}

impl fmt::Debug for PrefetchRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrefetchRequest")
            .field("endpoint", &self.endpoint)
            .field("params", &self.params)
            .field("options", &self.options)
            .finish()
    }
}

/// Cache that can be warmed ahead of real requests.
///
/// Enables different warming strategies to be swapped in behind the
/// prefetcher, including a no-op cache for tests.
pub trait PrefetchCache: Send + Sync {
    /// Issues the fetches and stores whatever succeeds.
    ///
    /// Returns the first failure, if any. Callers treat failures as
    /// best-effort and never surface them.
    fn prefetch(&self, requests: Vec<PrefetchRequest>) -> BoxFuture<'static, Result<(), ApiError>>;

    /// Removes and returns a warmed result, if one is still fresh.
    fn take(&self, endpoint: &EndpointId, params: &Params) -> Option<ApiResponse>;
}

/// Cache that never stores anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpPrefetchCache;

impl PrefetchCache for NoOpPrefetchCache {
    fn prefetch(&self, _requests: Vec<PrefetchRequest>) -> BoxFuture<'static, Result<(), ApiError>> {
        futures::future::ready(Ok(())).boxed()
    }

    fn take(&self, _endpoint: &EndpointId, _params: &Params) -> Option<ApiResponse> {
        None
    }
}

struct WarmEntry {
    value: ApiResponse,
    expires_at: Instant,
}

/// Key for one endpoint + params pair.
///
/// `serde_json` objects serialize with sorted keys, so equal params always
/// produce equal keys.
fn cache_key(endpoint: &EndpointId, params: &Params) -> String {
    format!("{}|{}", endpoint, params)
}

/// In-memory cache of speculatively fetched responses.
///
/// Cloning shares the same entries.
#[derive(Clone, Default)]
pub struct WarmCache {
    entries: Arc<DashMap<String, WarmEntry>>,
}

impl WarmCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a fresh warmed result without removing it.
    pub fn get(&self, endpoint: &EndpointId, params: &Params) -> Option<ApiResponse> {
        let key = cache_key(endpoint, params);
        let entry = self.entries.get(&key)?;
        if entry.expires_at > Instant::now() {
            Some(entry.value.clone())
        } else {
            drop(entry);
            self.entries.remove(&key);
            None
        }
    }

    /// Stores a value directly.
    pub fn insert(&self, endpoint: &EndpointId, params: &Params, value: ApiResponse, ttl: Duration) {
        self.entries.insert(
            cache_key(endpoint, params),
            WarmEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Returns true if a fresh entry exists.
    pub fn contains(&self, endpoint: &EndpointId, params: &Params) -> bool {
        self.entries
            .get(&cache_key(endpoint, params))
            .map_or(false, |entry| entry.expires_at > Instant::now())
    }

    /// Drops expired entries and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl PrefetchCache for WarmCache {
    fn prefetch(&self, requests: Vec<PrefetchRequest>) -> BoxFuture<'static, Result<(), ApiError>> {
        let cache = self.clone();
        async move {
            let pending: Vec<_> = requests
                .into_iter()
                .filter(|request| !cache.contains(&request.endpoint, &request.params))
                .collect();

            let outcomes = join_all(pending.into_iter().map(|request| async move {
                let result = (request.fetcher)().await;
                (request, result)
            }))
            .await;

            let mut first_error = None;
            for (request, result) in outcomes {
                match result {
                    Ok(value) => {
                        trace!(endpoint = %request.endpoint, "Warmed cache entry");
                        cache.insert(&request.endpoint, &request.params, value, request.options.ttl);
                    }
                    Err(error) => {
                        trace!(endpoint = %request.endpoint, error = %error, "Speculative fetch failed");
                        if first_error.is_none() {
                            first_error = Some(error);
                        }
                    }
                }
            }

            match first_error {
                Some(error) => Err(error),
                None => Ok(()),
            }
        }
        .boxed()
    }

    fn take(&self, endpoint: &EndpointId, params: &Params) -> Option<ApiResponse> {
        let (_, entry) = self.entries.remove(&cache_key(endpoint, params))?;
        (entry.expires_at > Instant::now()).then_some(entry.value)
    }
}

impl fmt::Debug for WarmCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WarmCache")
            .field("entries", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TTL: Duration = Duration::from_secs(60);

    fn request(endpoint: &str, value: ApiResponse) -> PrefetchRequest {
        PrefetchRequest {
            endpoint: EndpointId::new(endpoint),
            params: json!({ "id": 1 }),
            options: PrefetchOptions {
                ttl: TTL,
                speculative: true,
            },
            fetcher: Arc::new(move || futures::future::ready(Ok::<_, ApiError>(value.clone())).boxed()),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_prefetch_warms_entries() {
        let cache = WarmCache::new();
        cache
            .prefetch(vec![request("a", json!(1)), request("b", json!(2))])
            .await
            .expect("prefetch");

        let params = json!({ "id": 1 });
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&EndpointId::new("a"), &params), Some(json!(1)));
        assert_eq!(cache.take(&EndpointId::new("b"), &params), Some(json!(2)));
        assert_eq!(cache.take(&EndpointId::new("b"), &params), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let cache = WarmCache::new();
        let endpoint = EndpointId::new("a");
        let params = json!({});
        cache.insert(&endpoint, &params, json!("v"), Duration::from_secs(1));

        assert!(cache.contains(&endpoint, &params));
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!cache.contains(&endpoint, &params));
        assert_eq!(cache.purge_expired(), 1);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_reported_and_successes_kept() {
        let cache = WarmCache::new();
        let failing = PrefetchRequest {
            fetcher: Arc::new(|| {
                futures::future::ready(Err::<ApiResponse, _>(ApiError::new(
                    ErrorKind::Server { status: 500 },
                    "x",
                )))
                    .boxed()
            }),
            ..request("bad", json!(null))
        };

        let result = cache.prefetch(vec![failing, request("good", json!(1))]).await;
        assert!(result.is_err());
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_entries_not_refetched() {
        let cache = WarmCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let counted = PrefetchRequest {
            fetcher: Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                futures::future::ready(Ok::<_, ApiError>(json!(1))).boxed()
            }),
            ..request("a", json!(1))
        };

        cache.prefetch(vec![counted.clone()]).await.expect("first");
        cache.prefetch(vec![counted]).await.expect("second");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_param_order_does_not_matter() {
        let a: Params = serde_json::from_str(r#"{"x":1,"y":2}"#).expect("json");
        let b: Params = serde_json::from_str(r#"{"y":2,"x":1}"#).expect("json");
        let endpoint = EndpointId::new("e");
        assert_eq!(cache_key(&endpoint, &a), cache_key(&endpoint, &b));
    }
}
