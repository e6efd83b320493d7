use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Spacing between successive calls to one external service.
///
/// Call sites invoke `pause` between two paced operations, never before the
/// first one, so every `pause` must provide the whole gap on its own.
#[async_trait]
pub trait Pacer: Send + Sync {
    async fn pause(&self);
}

/// Waits the full interval on every call.
///
/// The lock is held across the sleep, so concurrent callers are serialized and
/// each of them gets its own gap.
#[derive(Debug)]
pub struct IntervalPacer {
    interval: Duration,
    turn: Mutex<()>,
}

impl IntervalPacer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            turn: Mutex::new(()),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

#[async_trait]
impl Pacer for IntervalPacer {
    async fn pause(&self) {
        let _turn = self.turn.lock().await;
        tokio::time::sleep(self.interval).await;
    }
}

/// Never waits. For tests and dry runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPacer;

#[async_trait]
impl Pacer for NoPacer {
    async fn pause(&self) {}
}

/// Burst-tolerant pacing: up to `burst` calls pass at once, then one call per
/// `period` as the allowance refills.
#[derive(Debug)]
pub struct TokenBucketPacer {
    burst: f64,
    period: Duration,
    bucket: Mutex<Allowance>,
}

#[derive(Debug)]
struct Allowance {
    available: f64,
    checked_at: Instant,
}

impl TokenBucketPacer {
    pub fn new(burst: u32, period: Duration) -> Self {
        let burst = f64::from(burst.max(1));
        Self {
            burst,
            period,
            bucket: Mutex::new(Allowance {
                available: burst,
                checked_at: Instant::now(),
            }),
        }
    }
}

#[async_trait]
impl Pacer for TokenBucketPacer {
    async fn pause(&self) {
        let mut bucket = self.bucket.lock().await;
        let now = Instant::now();
        if !self.period.is_zero() {
            let earned = now.duration_since(bucket.checked_at).as_secs_f64() / self.period.as_secs_f64();
            bucket.available = (bucket.available + earned).min(self.burst);
        } else {
            bucket.available = self.burst;
        }
        bucket.checked_at = now;

        if bucket.available < 1.0 {
            let missing = 1.0 - bucket.available;
            tokio::time::sleep(self.period.mul_f64(missing)).await;
            bucket.available = 1.0;
            bucket.checked_at = Instant::now();
        }
        bucket.available -= 1.0;
    }
}
