//! Rate limiting for exchange and chain API calls.
//!
//! One bucket per API class. Each bucket enforces two independent limits:
//!
//! - `max_concurrent`: at most N calls in flight (tokio semaphore, FIFO)
//! - `min_time`: consecutive call *starts* at least this far apart
//!   (governor quota with burst 1)
//!
//! A widening mechanism temporarily stretches `min_time` when the upstream
//! answers 429 repeatedly; the bucket reverts on its own once the widening
//! window expires.

use governor::{
    clock::DefaultClock,
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovernorRateLimiter,
};
use nonzero_ext::nonzero;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::warn;

type Pacer = GovernorRateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

/// API classes with independent limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiClass {
    /// CLOB trading endpoints.
    Clob,
    /// Gamma market-metadata endpoints.
    Gamma,
    /// Data/profile/activity endpoints.
    Data,
    /// JSON-RPC chain calls.
    Onchain,
}

impl ApiClass {
    /// All classes, in bucket order.
    #[must_use]
    pub fn all() -> &'static [ApiClass] {
        &[Self::Clob, Self::Gamma, Self::Data, Self::Onchain]
    }

    fn index(self) -> usize {
        match self {
            Self::Clob => 0,
            Self::Gamma => 1,
            Self::Data => 2,
            Self::Onchain => 3,
        }
    }
}

/// Per-class limits.
#[derive(Debug, Clone, Copy)]
pub struct ClassLimits {
    /// Maximum calls in flight.
    pub max_concurrent: usize,
    /// Minimum interval between call starts.
    pub min_time: Duration,
}

/// Full limiter configuration, one entry per class.
#[derive(Debug, Clone, Copy)]
pub struct RateLimiterConfig {
    pub clob: ClassLimits,
    pub gamma: ClassLimits,
    pub data: ClassLimits,
    pub onchain: ClassLimits,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            clob: ClassLimits {
                max_concurrent: 5,
                min_time: Duration::from_millis(100),
            },
            gamma: ClassLimits {
                max_concurrent: 5,
                min_time: Duration::from_millis(200),
            },
            data: ClassLimits {
                max_concurrent: 3,
                min_time: Duration::from_millis(350),
            },
            onchain: ClassLimits {
                max_concurrent: 2,
                min_time: Duration::from_millis(250),
            },
        }
    }
}

impl RateLimiterConfig {
    fn limits(&self, class: ApiClass) -> ClassLimits {
        match class {
            ApiClass::Clob => self.clob,
            ApiClass::Gamma => self.gamma,
            ApiClass::Data => self.data,
            ApiClass::Onchain => self.onchain,
        }
    }
}

/// How many 429s within [`WIDEN_WINDOW`] trigger widening.
const WIDEN_AFTER_429S: usize = 3;
/// Window over which 429s are counted.
const WIDEN_WINDOW: Duration = Duration::from_secs(10);
/// Multiplier applied to `min_time` while widened.
const WIDEN_FACTOR: u32 = 2;
/// How long a widening lasts.
const WIDEN_DURATION: Duration = Duration::from_secs(30);

struct Bucket {
    semaphore: Arc<Semaphore>,
    pacer: Mutex<Arc<Pacer>>,
    base_min_time: Duration,
    widened_until: Mutex<Option<Instant>>,
    recent_429s: Mutex<VecDeque<Instant>>,
}

impl Bucket {
    fn new(limits: ClassLimits) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(limits.max_concurrent)),
            pacer: Mutex::new(Arc::new(make_pacer(limits.min_time))),
            base_min_time: limits.min_time,
            widened_until: Mutex::new(None),
            recent_429s: Mutex::new(VecDeque::new()),
        }
    }

    fn current_pacer(&self) -> Arc<Pacer> {
        // Revert an expired widening before handing out the pacer.
        let mut widened = self.widened_until.lock();
        if let Some(until) = *widened {
            if Instant::now() >= until {
                *widened = None;
                *self.pacer.lock() = Arc::new(make_pacer(self.base_min_time));
            }
        }
        self.pacer.lock().clone()
    }

    fn widen(&self) {
        let widened_min = self.base_min_time * WIDEN_FACTOR;
        *self.widened_until.lock() = Some(Instant::now() + WIDEN_DURATION);
        *self.pacer.lock() = Arc::new(make_pacer(widened_min));
    }
}

fn make_pacer(min_time: Duration) -> Pacer {
    // Burst of 1: each cell is one call start, spaced by min_time.
    let min_time = min_time.max(Duration::from_millis(1));
    let quota = Quota::with_period(min_time)
        .expect("min_time > 0")
        .allow_burst(nonzero!(1u32));
    GovernorRateLimiter::direct(quota)
}

/// Per-API-class rate limiter with bounded concurrency.
///
/// Cloning is cheap and all clones share the same buckets.
#[derive(Clone)]
pub struct RateLimiter {
    buckets: Arc<[Bucket; 4]>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimiterConfig::default())
    }
}

impl RateLimiter {
    /// Creates a limiter from explicit limits.
    #[must_use]
    pub fn new(config: RateLimiterConfig) -> Self {
        let buckets = [
            Bucket::new(config.limits(ApiClass::Clob)),
            Bucket::new(config.limits(ApiClass::Gamma)),
            Bucket::new(config.limits(ApiClass::Data)),
            Bucket::new(config.limits(ApiClass::Onchain)),
        ];
        Self {
            buckets: Arc::new(buckets),
        }
    }

    /// Runs `f` under the class's concurrency and pacing limits.
    ///
    /// Queued callers acquire in FIFO order. Dropping the returned future
    /// before acquisition skips the slot; an error inside `f` releases the
    /// slot and propagates unchanged.
    pub async fn execute<F, Fut, T>(&self, class: ApiClass, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let bucket = &self.buckets[class.index()];

        let _permit = bucket
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("rate limiter semaphore never closed");

        bucket.current_pacer().until_ready().await;

        f().await
        // permit dropped here, releasing the slot even on early return
    }

    /// Records a 429 for the class; widens the bucket after repeated hits.
    pub fn note_rate_limited(&self, class: ApiClass) {
        let bucket = &self.buckets[class.index()];
        let now = Instant::now();

        let mut hits = bucket.recent_429s.lock();
        hits.push_back(now);
        while let Some(front) = hits.front() {
            if now.duration_since(*front) > WIDEN_WINDOW {
                hits.pop_front();
            } else {
                break;
            }
        }

        if hits.len() >= WIDEN_AFTER_429S {
            hits.clear();
            drop(hits);
            warn!(?class, "repeated 429s, widening bucket interval");
            bucket.widen();
        }
    }

    /// Available concurrency slots for the class (diagnostics).
    #[must_use]
    pub fn available_permits(&self, class: ApiClass) -> usize {
        self.buckets[class.index()].semaphore.available_permits()
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter").finish_non_exhaustive()
    }
}
