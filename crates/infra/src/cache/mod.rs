//! TTL cache for expensive read models.
//!
//! ## Design
//!
//! - Entries carry the category they were cached under; each category has
//!   its own TTL
//! - Every read takes the caller's clock so expiry is testable and stores
//!   never consult wall time themselves
//! - A failed recompute leaves the previous entry untouched; serving it
//!   anyway is an explicit caller decision via `get_stale`
//! - Concurrent misses on one key are coalesced behind a per-key gate so a
//!   slow compute runs once, not once per caller
//!
//! ## Components
//!
//! - `TieredCache`: the store itself
//! - `CacheCategory`: TTL classes (merchant intel, dashboard summary)
//! - `CacheStatus`: freshness report for the cache-status endpoints

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// TTL class of a cached value.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum CacheCategory {
    /// Per-merchant intelligence reports. Expensive to compute and slow to
    /// go out of date.
    MerchantIntel,
    /// Dashboard rollups. Cheap but hot, and staleness shows immediately.
    DashboardSummary,
}

impl CacheCategory {
    pub const ALL: [CacheCategory; 2] =
        [CacheCategory::MerchantIntel, CacheCategory::DashboardSummary];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::MerchantIntel => "merchant-intel",
            Self::DashboardSummary => "dashboard-summary",
        }
    }

    pub fn default_ttl(self) -> Duration {
        match self {
            Self::MerchantIntel => Duration::hours(1),
            Self::DashboardSummary => Duration::seconds(30),
        }
    }

    /// Canonical cache key for an item in this category.
    pub fn key(self, suffix: &str) -> String {
        format!("{}:{suffix}", self.as_str())
    }
}

impl core::fmt::Display for CacheCategory {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// The compute callback failed; any previously cached value is intact.
    #[error("compute failed: {0}")]
    Compute(String),
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: serde_json::Value,
    category: CacheCategory,
    computed_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

/// Freshness of a key as reported by the cache-status endpoints. An absent
/// key reads as stale with no timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStatus {
    pub cached_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_stale: bool,
}

pub struct TieredCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    /// Per-key single-flight gates. A gate exists only while a compute for
    /// that key is in flight.
    gates: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    ttls: HashMap<CacheCategory, Duration>,
}

impl Default for TieredCache {
    fn default() -> Self {
        Self::new()
    }
}

impl TieredCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
            ttls: CacheCategory::ALL
                .into_iter()
                .map(|c| (c, c.default_ttl()))
                .collect(),
        }
    }

    /// Override one category's TTL. Tests use short TTLs; production keeps
    /// the defaults.
    pub fn with_ttl(mut self, category: CacheCategory, ttl: Duration) -> Self {
        self.ttls.insert(category, ttl);
        self
    }

    pub fn ttl(&self, category: CacheCategory) -> Duration {
        self.ttls
            .get(&category)
            .copied()
            .unwrap_or_else(|| category.default_ttl())
    }

    /// The cached value, if present and fresh at `now`.
    pub fn get(&self, key: &str, now: DateTime<Utc>) -> Option<serde_json::Value> {
        let entries = self.entries.read().unwrap();
        entries
            .get(key)
            .filter(|entry| now < entry.expires_at)
            .map(|entry| entry.value.clone())
    }

    /// The cached value regardless of freshness, with the time it was
    /// computed. Callers serving this must mark the response stale.
    pub fn get_stale(&self, key: &str) -> Option<(serde_json::Value, DateTime<Utc>)> {
        let entries = self.entries.read().unwrap();
        entries
            .get(key)
            .map(|entry| (entry.value.clone(), entry.computed_at))
    }

    /// Store `value` under `key`, replacing any previous entry.
    pub fn set(
        &self,
        key: &str,
        value: serde_json::Value,
        category: CacheCategory,
        now: DateTime<Utc>,
    ) {
        let entry = CacheEntry {
            value,
            category,
            computed_at: now,
            expires_at: now + self.ttl(category),
        };
        self.entries.write().unwrap().insert(key.to_owned(), entry);
    }

    /// Drop one key. Returns whether anything was removed.
    pub fn invalidate(&self, key: &str) -> bool {
        self.entries.write().unwrap().remove(key).is_some()
    }

    /// Drop every entry cached under `category`. Returns the count removed.
    pub fn invalidate_category(&self, category: CacheCategory) -> usize {
        let mut entries = self.entries.write().unwrap();
        let before = entries.len();
        entries.retain(|_, entry| entry.category != category);
        before - entries.len()
    }

    pub fn status(&self, key: &str, now: DateTime<Utc>) -> CacheStatus {
        let entries = self.entries.read().unwrap();
        match entries.get(key) {
            Some(entry) => CacheStatus {
                cached_at: Some(entry.computed_at),
                expires_at: Some(entry.expires_at),
                is_stale: now >= entry.expires_at,
            },
            None => CacheStatus {
                cached_at: None,
                expires_at: None,
                is_stale: true,
            },
        }
    }

    /// Return the fresh cached value or run `compute` to fill the key.
    ///
    /// Concurrent callers for the same key wait for the one compute in
    /// flight and then read its result. If the leader's compute fails, one
    /// waiter retries; a failure never evicts what was cached before.
    #[instrument(skip(self, compute, now), err)]
    pub async fn get_or_compute<F, Fut, E>(
        &self,
        key: &str,
        category: CacheCategory,
        now: DateTime<Utc>,
        compute: F,
    ) -> Result<serde_json::Value, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<serde_json::Value, E>>,
        E: core::fmt::Display,
    {
        if let Some(value) = self.get(key, now) {
            return Ok(value);
        }

        let gate = self.gate(key);
        let _held = gate.lock().await;

        // The compute that was in flight while we waited may have filled
        // the key already.
        if let Some(value) = self.get(key, now) {
            return Ok(value);
        }

        debug!(key, %category, "cache miss, computing");
        match compute().await {
            Ok(value) => {
                self.set(key, value.clone(), category, now);
                self.release_gate(key, &gate);
                Ok(value)
            }
            Err(e) => {
                warn!(key, %category, error = %e, "compute failed, cached value untouched");
                self.release_gate(key, &gate);
                Err(CacheError::Compute(e.to_string()))
            }
        }
    }

    fn gate(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut gates = self.gates.lock().unwrap();
        gates.entry(key.to_owned()).or_default().clone()
    }

    /// Remove the gate only if it is still the one this caller installed;
    /// a newer compute may have opened its own.
    fn release_gate(&self, key: &str, gate: &Arc<tokio::sync::Mutex<()>>) {
        let mut gates = self.gates.lock().unwrap();
        if let Some(current) = gates.get(key) {
            if Arc::ptr_eq(current, gate) {
                gates.remove(key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    fn t0() -> DateTime<Utc> {
        "2026-03-01T12:00:00Z".parse().unwrap()
    }

    #[test]
    fn fresh_until_ttl_then_expired() {
        let cache = TieredCache::new();
        let now = t0();
        cache.set("dashboard-summary:global", json!({"deals": 4}), CacheCategory::DashboardSummary, now);

        assert!(cache
            .get("dashboard-summary:global", now + Duration::seconds(29))
            .is_some());
        assert!(cache
            .get("dashboard-summary:global", now + Duration::seconds(30))
            .is_none());
    }

    #[test]
    fn categories_expire_on_their_own_clocks() {
        let cache = TieredCache::new();
        let now = t0();
        cache.set("merchant-intel:a", json!(1), CacheCategory::MerchantIntel, now);
        cache.set("dashboard-summary:global", json!(2), CacheCategory::DashboardSummary, now);

        let later = now + Duration::minutes(10);
        assert!(cache.get("merchant-intel:a", later).is_some());
        assert!(cache.get("dashboard-summary:global", later).is_none());
    }

    #[test]
    fn set_replaces_unconditionally() {
        let cache = TieredCache::new();
        let now = t0();
        cache.set("merchant-intel:a", json!("old"), CacheCategory::MerchantIntel, now);
        cache.set("merchant-intel:a", json!("new"), CacheCategory::MerchantIntel, now);
        assert_eq!(cache.get("merchant-intel:a", now), Some(json!("new")));
    }

    #[test]
    fn invalidate_takes_effect_immediately() {
        let cache = TieredCache::new();
        let now = t0();
        cache.set("merchant-intel:a", json!(1), CacheCategory::MerchantIntel, now);
        assert!(cache.invalidate("merchant-intel:a"));
        assert!(cache.get("merchant-intel:a", now).is_none());
        assert!(!cache.invalidate("merchant-intel:a"));
    }

    #[test]
    fn invalidate_category_leaves_other_categories_alone() {
        let cache = TieredCache::new();
        let now = t0();
        cache.set("merchant-intel:a", json!(1), CacheCategory::MerchantIntel, now);
        cache.set("merchant-intel:b", json!(2), CacheCategory::MerchantIntel, now);
        cache.set("dashboard-summary:global", json!(3), CacheCategory::DashboardSummary, now);

        assert_eq!(cache.invalidate_category(CacheCategory::MerchantIntel), 2);
        assert!(cache.get("merchant-intel:a", now).is_none());
        assert!(cache.get("merchant-intel:b", now).is_none());
        assert!(cache.get("dashboard-summary:global", now).is_some());
    }

    #[test]
    fn status_reflects_freshness_and_absence() {
        let cache = TieredCache::new();
        let now = t0();
        cache.set("merchant-intel:a", json!(1), CacheCategory::MerchantIntel, now);

        let fresh = cache.status("merchant-intel:a", now + Duration::minutes(59));
        assert_eq!(fresh.cached_at, Some(now));
        assert_eq!(fresh.expires_at, Some(now + Duration::hours(1)));
        assert!(!fresh.is_stale);

        let stale = cache.status("merchant-intel:a", now + Duration::hours(1));
        assert!(stale.is_stale);

        let absent = cache.status("merchant-intel:missing", now);
        assert_eq!(absent.cached_at, None);
        assert_eq!(absent.expires_at, None);
        assert!(absent.is_stale);
    }

    #[test]
    fn get_stale_serves_expired_entries() {
        let cache = TieredCache::new();
        let now = t0();
        cache.set("merchant-intel:a", json!("report"), CacheCategory::MerchantIntel, now);

        let much_later = now + Duration::days(2);
        assert!(cache.get("merchant-intel:a", much_later).is_none());
        assert_eq!(
            cache.get_stale("merchant-intel:a"),
            Some((json!("report"), now))
        );
    }

    #[tokio::test]
    async fn get_or_compute_runs_once_then_serves_cache() {
        let cache = TieredCache::new();
        let now = t0();
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let value = cache
                .get_or_compute("merchant-intel:a", CacheCategory::MerchantIntel, now, || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok::<_, String>(json!({"segment": "tires"})) }
                })
                .await
                .unwrap();
            assert_eq!(value, json!({"segment": "tires"}));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_compute_keeps_the_previous_entry() {
        let cache = TieredCache::new();
        let now = t0();
        cache.set("merchant-intel:a", json!("old report"), CacheCategory::MerchantIntel, now);

        let after_expiry = now + Duration::hours(2);
        assert!(cache.get("merchant-intel:a", after_expiry).is_none());

        let result = cache
            .get_or_compute(
                "merchant-intel:a",
                CacheCategory::MerchantIntel,
                after_expiry,
                || async { Err::<serde_json::Value, _>("upstream down") },
            )
            .await;
        assert_eq!(
            result,
            Err(CacheError::Compute("upstream down".to_owned()))
        );

        // The stale entry survives for callers that choose to serve it.
        assert_eq!(
            cache.get_stale("merchant-intel:a"),
            Some((json!("old report"), now))
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_misses_compute_once() {
        let cache = Arc::new(TieredCache::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let now = t0();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute("merchant-intel:a", CacheCategory::MerchantIntel, now, || {
                        let calls = Arc::clone(&calls);
                        async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                            Ok::<_, String>(json!("computed"))
                        }
                    })
                    .await
                    .unwrap()
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), json!("computed"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn ttl_override_shortens_expiry() {
        let cache = TieredCache::new().with_ttl(CacheCategory::MerchantIntel, Duration::seconds(1));
        let now = t0();
        cache
            .get_or_compute("merchant-intel:a", CacheCategory::MerchantIntel, now, || async {
                Ok::<_, String>(json!(1))
            })
            .await
            .unwrap();
        assert!(cache.get("merchant-intel:a", now).is_some());
        assert!(cache.get("merchant-intel:a", now + Duration::seconds(1)).is_none());
    }
}
