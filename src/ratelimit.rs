// src/ratelimit.rs

//! Per-registry throughput limiting
//!
//! Each registry gets one [`TokenBucket`], created lazily the first time a
//! batch touches that registry and kept for the lifetime of the owning
//! [`RateLimiterRegistry`]. Buckets are independently locked, so a busy
//! registry never serializes token checks for unrelated ones.
//!
//! Limits are written as `"N/unit"` with `unit` one of `second`, `minute`
//! or `hour`: the bucket holds `N` tokens and one token trickles back every
//! `unit / N`.

use crate::error::{Error, Result};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Limit applied when a registry has no (or an unparsable) setting
pub const DEFAULT_RATE_LIMIT: &str = "10/minute";

/// Fixed backoff between token polls
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Parsed `"N/unit"` rate limit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    /// Bucket size, i.e. the largest burst allowed
    pub capacity: u32,
    /// Time for one token to come back
    pub refill_interval: Duration,
}

impl RateLimit {
    pub fn new(capacity: u32, refill_interval: Duration) -> Self {
        Self {
            capacity,
            refill_interval,
        }
    }

    /// Parse a configured limit, falling back to [`DEFAULT_RATE_LIMIT`]
    ///
    /// A malformed value is logged and replaced rather than rejected.
    pub fn parse_or_default(spec: Option<&str>) -> Self {
        match spec.map(str::parse::<RateLimit>) {
            Some(Ok(limit)) => limit,
            Some(Err(e)) => {
                warn!("{}, using {}", e, DEFAULT_RATE_LIMIT);
                Self::default()
            }
            None => Self::default(),
        }
    }
}

impl Default for RateLimit {
    fn default() -> Self {
        // 10/minute
        Self::new(10, Duration::from_secs(6))
    }
}

impl FromStr for RateLimit {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::ParseError(format!("Invalid rate limit '{s}', expected N/unit"));

        let (count, unit) = s.split_once('/').ok_or_else(invalid)?;
        let count: u32 = count.trim().parse().map_err(|_| invalid())?;
        if count == 0 {
            return Err(invalid());
        }

        let period = match unit.trim().to_ascii_lowercase().as_str() {
            "second" | "seconds" => Duration::from_secs(1),
            "minute" | "minutes" => Duration::from_secs(60),
            "hour" | "hours" => Duration::from_secs(3600),
            _ => return Err(invalid()),
        };

        Ok(Self::new(count, period / count))
    }
}

struct BucketState {
    tokens: u32,
    last_refill: Instant,
}

/// Token bucket for one registry
pub struct TokenBucket {
    capacity: u32,
    refill_interval: Duration,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Create a full bucket
    pub fn new(capacity: u32, refill_interval: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            refill_interval: refill_interval.max(Duration::from_nanos(1)),
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn from_limit(limit: RateLimit) -> Self {
        Self::new(limit.capacity, limit.refill_interval)
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn refill_interval(&self) -> Duration {
        self.refill_interval
    }

    /// Tokens currently in the bucket, without refilling
    pub fn available(&self) -> u32 {
        self.state.lock().tokens
    }

    /// Take one token if one is available right now
    pub fn try_acquire(&self) -> bool {
        self.try_acquire_at(Instant::now())
    }

    fn try_acquire_at(&self, now: Instant) -> bool {
        let mut state = self.state.lock();
        self.refill(&mut state, now);

        if state.tokens > 0 {
            state.tokens -= 1;
            true
        } else {
            false
        }
    }

    /// Add whole tokens for the time elapsed since the last refill
    ///
    /// The refill timestamp only moves when at least one token was added,
    /// and then by exactly the intervals consumed, so frequent empty checks
    /// never eat the partial interval.
    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed = now.saturating_duration_since(state.last_refill);
        let whole = elapsed.as_nanos() / self.refill_interval.as_nanos();
        if whole == 0 {
            return;
        }

        if whole >= u128::from(self.capacity) {
            state.tokens = self.capacity;
            state.last_refill = now;
        } else {
            // whole < capacity, fits in u32
            let whole = whole as u32;
            state.tokens = (state.tokens + whole).min(self.capacity);
            state.last_refill += self.refill_interval * whole;
        }
    }

    /// Wait until a token is available, polling with [`POLL_INTERVAL`]
    ///
    /// Returns [`Error::Cancelled`] if `cancel` fires first.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<()> {
        loop {
            if self.try_acquire() {
                return Ok(());
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
            }
        }
    }
}

/// Lazily populated map of registry name to bucket
#[derive(Default)]
pub struct RateLimiterRegistry {
    buckets: DashMap<String, Arc<TokenBucket>>,
}

impl RateLimiterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the bucket for a registry, creating it from `limit` on first use
    ///
    /// `limit` is only evaluated when the bucket does not exist yet; later
    /// calls reuse the cached bucket.
    pub fn get_or_create(
        &self,
        registry: &str,
        limit: impl FnOnce() -> RateLimit,
    ) -> Arc<TokenBucket> {
        self.buckets
            .entry(registry.to_string())
            .or_insert_with(|| {
                let limit = limit();
                debug!(
                    "Created rate limiter for {}: {} tokens, refill every {:?}",
                    registry, limit.capacity, limit.refill_interval
                );
                Arc::new(TokenBucket::from_limit(limit))
            })
            .clone()
    }

    pub fn get(&self, registry: &str) -> Option<Arc<TokenBucket>> {
        self.buckets.get(registry).map(|b| b.clone())
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}
