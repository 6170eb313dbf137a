//! Dual-key token-bucket admission control for the collect endpoint.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;

/// Buckets untouched for this long are dropped by [`AdmissionController::evict_idle`].
pub const DEFAULT_EVICTION_WINDOW: Duration = Duration::from_secs(600);

const WINDOW_LABEL: &str = "1 minute";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LimitKind {
    Ip,
    ApiKey,
}

/// Result of an admission check. Callers must handle both branches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitOutcome {
    Allowed,
    Exceeded {
        kind: LimitKind,
        identifier: String,
        limit: u32,
        window: &'static str,
    },
}

impl RateLimitOutcome {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BucketStatus {
    pub remaining: f64,
    pub maximum: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AdmissionStatus {
    pub ip: BucketStatus,
    pub api_key: BucketStatus,
}

#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn full(capacity: u32, now: Instant) -> Self {
        Self {
            tokens: f64::from(capacity),
            last_refill: now,
        }
    }

    fn available_at(&self, capacity: u32, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        let rate_per_sec = f64::from(capacity) / 60.0;
        (self.tokens + elapsed * rate_per_sec).min(f64::from(capacity))
    }

    fn refill(&mut self, capacity: u32, now: Instant) {
        self.tokens = self.available_at(capacity, now);
        if now > self.last_refill {
            self.last_refill = now;
        }
    }

    fn try_take(&mut self, capacity: u32, now: Instant) -> bool {
        self.refill(capacity, now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// One family of buckets (all IPs, or all API keys) sharing a capacity.
#[derive(Debug)]
struct BucketScope {
    capacity: AtomicU32,
    buckets: DashMap<String, TokenBucket>,
}

impl BucketScope {
    fn new(capacity: u32) -> Self {
        Self {
            capacity: AtomicU32::new(capacity.max(1)),
            buckets: DashMap::new(),
        }
    }

    fn capacity(&self) -> u32 {
        self.capacity.load(Ordering::Relaxed)
    }

    /// Refill and take one token under the entry's shard lock, so two
    /// concurrent requests can never both spend the last token.
    fn try_take(&self, identifier: &str, now: Instant) -> bool {
        let capacity = self.capacity();
        let mut bucket = self
            .buckets
            .entry(identifier.to_string())
            .or_insert_with(|| TokenBucket::full(capacity, now));
        bucket.try_take(capacity, now)
    }

    fn status(&self, identifier: &str, now: Instant) -> BucketStatus {
        let capacity = self.capacity();
        let remaining = self
            .buckets
            .get(identifier)
            .map(|bucket| bucket.available_at(capacity, now))
            .unwrap_or(f64::from(capacity));
        BucketStatus {
            remaining,
            maximum: capacity,
        }
    }

    fn evict_idle(&self, now: Instant, idle_for: Duration) -> usize {
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| now.saturating_duration_since(bucket.last_refill) < idle_for);
        before.saturating_sub(self.buckets.len())
    }
}

/// Per-IP and per-API-key token buckets consulted before any event is accepted.
///
/// Capacity is the configured per-minute limit and refill is continuous at
/// `capacity / 60` tokens per second, computed lazily on each check. First-seen
/// identifiers start with a full bucket.
#[derive(Debug)]
pub struct AdmissionController {
    ip: BucketScope,
    api_key: BucketScope,
    eviction_window: Duration,
}

impl AdmissionController {
    pub fn new(ip_limit_per_minute: u32, api_key_limit_per_minute: u32) -> Self {
        Self {
            ip: BucketScope::new(ip_limit_per_minute),
            api_key: BucketScope::new(api_key_limit_per_minute),
            eviction_window: DEFAULT_EVICTION_WINDOW,
        }
    }

    pub fn with_eviction_window(mut self, window: Duration) -> Self {
        self.eviction_window = window;
        self
    }

    /// Apply new limits. Existing buckets keep their tokens, capped lazily
    /// at the new capacity on their next refill.
    pub fn reconfigure(&self, ip_limit_per_minute: u32, api_key_limit_per_minute: u32) {
        self.ip
            .capacity
            .store(ip_limit_per_minute.max(1), Ordering::Relaxed);
        self.api_key
            .capacity
            .store(api_key_limit_per_minute.max(1), Ordering::Relaxed);
    }

    pub fn check_admission(&self, ip: &str, api_key: &str) -> RateLimitOutcome {
        self.check_admission_at(ip, api_key, Instant::now())
    }

    /// The IP bucket is checked first; an IP-level rejection never consumes an
    /// API-key token. An API-key rejection does not refund the IP token.
    pub fn check_admission_at(&self, ip: &str, api_key: &str, now: Instant) -> RateLimitOutcome {
        if !self.ip.try_take(ip, now) {
            return RateLimitOutcome::Exceeded {
                kind: LimitKind::Ip,
                identifier: ip.to_string(),
                limit: self.ip.capacity(),
                window: WINDOW_LABEL,
            };
        }
        if !self.api_key.try_take(api_key, now) {
            return RateLimitOutcome::Exceeded {
                kind: LimitKind::ApiKey,
                identifier: api_key.to_string(),
                limit: self.api_key.capacity(),
                window: WINDOW_LABEL,
            };
        }
        RateLimitOutcome::Allowed
    }

    /// Remaining and maximum tokens for both scopes. Does not mutate state.
    pub fn status(&self, ip: &str, api_key: &str) -> AdmissionStatus {
        self.status_at(ip, api_key, Instant::now())
    }

    pub fn status_at(&self, ip: &str, api_key: &str, now: Instant) -> AdmissionStatus {
        AdmissionStatus {
            ip: self.ip.status(ip, now),
            api_key: self.api_key.status(api_key, now),
        }
    }

    /// Drop buckets not touched within the eviction window. Returns the
    /// number of buckets removed.
    pub fn evict_idle(&self) -> usize {
        self.evict_idle_at(Instant::now())
    }

    pub fn evict_idle_at(&self, now: Instant) -> usize {
        self.ip.evict_idle(now, self.eviction_window)
            + self.api_key.evict_idle(now, self.eviction_window)
    }

    pub fn tracked_buckets(&self) -> usize {
        self.ip.buckets.len() + self.api_key.buckets.len()
    }
}
