use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Eviction score weights. Popularity dominates recency so that a hot
/// entry survives colder contenders with longer TTLs.
const WEIGHT_POPULARITY: f64 = 10.0;
const WEIGHT_REMAINING_TTL: f64 = 1.0;
const WEIGHT_AGE: f64 = 0.5;

/// Cache tuning parameters, passed in at construction so tests can vary
/// the grace period or capacity in isolation.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Hard bound on entry count.
    pub max_size: usize,

    /// Stale-while-revalidate window after expiration.
    pub grace_period: Duration,

    /// Hit count at which an entry counts as popular.
    pub popularity_threshold: u64,

    /// Fraction of the TTL after which popular entries get prefetched.
    pub prefetch_threshold: f64,

    /// Cadence of the background sweep.
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 10_000,
            grace_period: Duration::from_secs(300),
            popularity_threshold: 5,
            prefetch_threshold: 0.8,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// A cached DNS response with its temporal state and popularity counter.
///
/// The only mutation after construction is the popularity bump, which is
/// atomic so concurrent readers holding the map's read lock never race.
#[derive(Debug)]
pub struct CacheEntry {
    response: Vec<u8>,
    created_at: Instant,
    expires_at: Instant,
    original_ttl: u32,
    popularity: AtomicU64,
}

impl CacheEntry {
    fn new(response: Vec<u8>, ttl: u32, now: Instant) -> Self {
        Self {
            response,
            created_at: now,
            expires_at: now + Duration::from_secs(ttl as u64),
            original_ttl: ttl,
            popularity: AtomicU64::new(0),
        }
    }

    /// Expired, but still inside the grace window: serve it and refresh.
    pub fn is_stale(&self, now: Instant, grace_period: Duration) -> bool {
        now >= self.expires_at && now < self.expires_at + grace_period
    }

    /// Past the grace window: the entry is dead and gets removed lazily.
    pub fn is_completely_expired(&self, now: Instant, grace_period: Duration) -> bool {
        now >= self.expires_at + grace_period
    }

    pub fn is_popular(&self, threshold: u64) -> bool {
        self.popularity.load(Ordering::Relaxed) >= threshold
    }

    /// Popular entries past the prefetch fraction of their TTL warm
    /// themselves before going stale.
    pub fn should_prefetch(&self, now: Instant, config: &CacheConfig) -> bool {
        if !self.is_popular(config.popularity_threshold) || self.is_stale(now, config.grace_period)
        {
            return false;
        }
        let threshold =
            Duration::from_secs_f64(self.original_ttl as f64 * config.prefetch_threshold);
        now >= self.created_at + threshold
    }

    pub fn increase_popularity(&self) {
        self.popularity.fetch_add(1, Ordering::Relaxed);
    }

    pub fn popularity(&self) -> u64 {
        self.popularity.load(Ordering::Relaxed)
    }

    fn remaining_ttl_secs(&self, now: Instant) -> f64 {
        self.expires_at
            .checked_duration_since(now)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }

    fn age_secs(&self, now: Instant) -> f64 {
        now.checked_duration_since(self.created_at)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }

    /// Lower means more evictable.
    fn eviction_score(&self, now: Instant) -> f64 {
        self.popularity() as f64 * WEIGHT_POPULARITY
            + self.remaining_ttl_secs(now) * WEIGHT_REMAINING_TTL
            - self.age_secs(now) * WEIGHT_AGE
    }
}

/// TTL-aware DNS response cache with stale-while-revalidate semantics.
///
/// The map is behind a reader-writer lock: lookups share the read lock
/// (popularity bumps are atomic and need no upgrade), while insertion,
/// eviction, and expired-entry removal take the write lock.
#[derive(Debug)]
pub struct DnsCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    config: CacheConfig,
}

impl DnsCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: RwLock::new(HashMap::with_capacity(config.max_size.min(1024))),
            config,
        }
    }

    /// Look up a cached response.
    ///
    /// Returns `(response, found, needs_refresh)`. A stale entry inside
    /// the grace window is still served with `needs_refresh = true`; a
    /// fresh entry raises the same signal once a popular entry passes
    /// the prefetch fraction of its TTL. Completely expired entries are
    /// removed and reported as a miss.
    pub fn get(&self, key: &str) -> (Option<Vec<u8>>, bool, bool) {
        let now = Instant::now();

        {
            let entries = self.entries.read();
            match entries.get(key) {
                None => return (None, false, false),
                Some(entry) if entry.is_completely_expired(now, self.config.grace_period) => {
                    // Fall through to removal under the write lock.
                }
                Some(entry) => {
                    entry.increase_popularity();
                    let needs_refresh = entry.is_stale(now, self.config.grace_period)
                        || entry.should_prefetch(now, &self.config);
                    trace!(key, stale = entry.is_stale(now, self.config.grace_period), "cache hit");
                    return (Some(entry.response.clone()), true, needs_refresh);
                }
            }
        }

        let mut entries = self.entries.write();
        if let Some(entry) = entries.get(key) {
            if entry.is_completely_expired(Instant::now(), self.config.grace_period) {
                entries.remove(key);
                debug!(key, "removed completely expired cache entry");
            }
        }
        (None, false, false)
    }

    /// Insert or overwrite an entry with a fresh TTL window.
    ///
    /// Eviction runs only when inserting a new key at capacity; updating
    /// an existing key never grows the map and never evicts. A TTL of 0
    /// is accepted and produces an entry born expired.
    pub fn set(&self, key: &str, response: Vec<u8>, ttl: u32) {
        let now = Instant::now();
        let mut entries = self.entries.write();

        if !entries.contains_key(key) && entries.len() >= self.config.max_size {
            self.evict_locked(&mut entries, now);
        }

        entries.insert(key.to_string(), CacheEntry::new(response, ttl, now));
        trace!(key, ttl, "cached response");
    }

    /// Remove the least valuable entry. Popular entries are protected
    /// while any non-popular candidate exists; when everything is
    /// popular, the entry with the least remaining TTL loses.
    fn evict_locked(&self, entries: &mut HashMap<String, CacheEntry>, now: Instant) {
        let threshold = self.config.popularity_threshold;

        let mut coldest: Option<(&String, f64, Instant)> = None;
        let mut popular_fallback: Option<(&String, f64)> = None;

        for (key, entry) in entries.iter() {
            if entry.is_popular(threshold) {
                let remaining = entry.remaining_ttl_secs(now);
                match popular_fallback {
                    Some((_, best)) if best <= remaining => {}
                    _ => popular_fallback = Some((key, remaining)),
                }
                continue;
            }

            let score = entry.eviction_score(now);
            match coldest {
                Some((_, best_score, best_created))
                    if score > best_score
                        || (score == best_score && entry.created_at >= best_created) => {}
                _ => coldest = Some((key, score, entry.created_at)),
            }
        }

        let victim = coldest
            .map(|(key, _, _)| key)
            .or(popular_fallback.map(|(key, _)| key))
            .cloned();

        if let Some(key) = victim {
            entries.remove(&key);
            debug!(key = %key, "evicted cache entry at capacity");
        }
    }

    /// Remove every completely expired entry. Invoked by the periodic
    /// sweep task.
    pub fn clean(&self) {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_completely_expired(now, self.config.grace_period));
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, "swept expired cache entries");
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }
}

impl Default for DnsCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}
