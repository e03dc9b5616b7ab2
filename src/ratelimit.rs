use std::time::Instant;

use dashmap::DashMap;

/// Token bucket parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitConfig {
    pub capacity: f64,
    pub refill_per_sec: f64,
}

impl RateLimitConfig {
    /// `burst` attempts at once, refilled at `per_minute`.
    pub fn per_minute(burst: u32, per_minute: u32) -> Self {
        Self {
            capacity: f64::from(burst),
            refill_per_sec: f64::from(per_minute) / 60.0,
        }
    }
}

/// Where bucket state lives. The server uses the in-memory store; a shared
/// store can be swapped in when several nodes front the same data.
pub trait RateLimitStore: Send + Sync {
    /// Take one token for `key` at `now`. Returns false when the bucket is empty.
    fn allow(&self, key: &str, now: Instant) -> bool;
}

/// Tracked keys before idle buckets are swept on the next `allow`.
pub const DEFAULT_MAX_TRACKED_KEYS: usize = 10_000;

#[derive(Debug, Clone)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn is_full(&self, config: RateLimitConfig, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens + elapsed * config.refill_per_sec >= config.capacity
    }
}

#[derive(Debug)]
pub struct InMemoryRateLimitStore {
    config: RateLimitConfig,
    max_tracked_keys: usize,
    buckets: DashMap<String, Bucket>,
}

impl InMemoryRateLimitStore {
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_max_tracked_keys(config, DEFAULT_MAX_TRACKED_KEYS)
    }

    pub fn with_max_tracked_keys(config: RateLimitConfig, max_tracked_keys: usize) -> Self {
        Self {
            config,
            max_tracked_keys,
            buckets: DashMap::new(),
        }
    }

    /// Drop buckets that have refilled to capacity. A dropped key starts
    /// over with a full bucket, so this never grants extra attempts.
    pub fn evict_idle(&self, now: Instant) {
        let cfg = self.config;
        self.buckets.retain(|_, bucket| !bucket.is_full(cfg, now));
    }

    pub fn tracked_keys(&self) -> usize {
        self.buckets.len()
    }
}

impl RateLimitStore for InMemoryRateLimitStore {
    fn allow(&self, key: &str, now: Instant) -> bool {
        let cfg = self.config;
        if self.buckets.len() >= self.max_tracked_keys && !self.buckets.contains_key(key) {
            self.evict_idle(now);
        }
        let mut bucket = self.buckets.entry(key.to_string()).or_insert_with(|| Bucket {
            tokens: cfg.capacity,
            last_refill: now,
        });
        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        bucket.last_refill = now;
        bucket.tokens = (bucket.tokens + elapsed * cfg.refill_per_sec).min(cfg.capacity);
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}
