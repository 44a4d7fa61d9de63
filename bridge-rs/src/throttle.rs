//! Target API throttling
//!
//! The BigCommerce rate limit is shared by every run in the process, so all
//! target writes go through one [`TargetThrottle`]:
//! - Token bucket for the request rate
//! - Semaphore capping in-flight writes
//! - Exponential backoff on rate-limit and transient errors, bounded by a
//!   small attempt ceiling
//!
//! # Example
//! ```no_run
//! use bridge_rs::throttle::TargetThrottle;
//! use bridge_rs::config::ThrottleConfig;
//!
//! # async fn example() {
//! let throttle = TargetThrottle::new(&ThrottleConfig::default());
//! let result: Result<u64, _> = throttle
//!     .execute("Blue Hoodie", || async { Ok(42) })
//!     .await;
//! # }
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::clients::WriteError;
use crate::config::ThrottleConfig;

/// Upper bound for a single backoff sleep
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Token bucket for smooth rate limiting
#[derive(Debug, Clone)]
struct TokenBucket {
    /// Current number of tokens
    tokens: f64,
    /// Maximum number of tokens
    capacity: f64,
    /// Tokens added per second
    refill_rate: f64,
    /// Last refill time
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: u32, window: Duration) -> Self {
        let capacity = capacity.max(1) as f64;
        let refill_rate = capacity / window.as_secs_f64().max(0.001);
        Self {
            tokens: capacity,
            capacity,
            refill_rate,
            last_refill: Instant::now(),
        }
    }

    /// Take a token, or report how long until one is available
    fn try_consume(&mut self) -> Result<(), Duration> {
        self.refill();

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            let missing = 1.0 - self.tokens;
            Err(Duration::from_secs_f64(missing / self.refill_rate))
        }
    }

    /// Refill tokens based on elapsed time
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();

        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }
}

/// Process-wide gate for target writes
pub struct TargetThrottle {
    bucket: Mutex<TokenBucket>,
    in_flight: Semaphore,
    max_attempts: u32,
    base_backoff: Duration,
    retries: AtomicU64,
    waits: AtomicU64,
}

impl TargetThrottle {
    pub fn new(config: &ThrottleConfig) -> Self {
        Self {
            bucket: Mutex::new(TokenBucket::new(
                config.requests_per_window,
                Duration::from_secs(config.window_secs),
            )),
            in_flight: Semaphore::new(config.max_in_flight.max(1)),
            max_attempts: config.max_attempts.max(1),
            base_backoff: Duration::from_millis(config.base_backoff_ms),
            retries: AtomicU64::new(0),
            waits: AtomicU64::new(0),
        }
    }

    /// Wait for a request token
    async fn acquire_token(&self) {
        loop {
            let wait = match self.bucket.lock().await.try_consume() {
                Ok(()) => return,
                Err(wait) => wait,
            };
            self.waits.fetch_add(1, Ordering::Relaxed);
            debug!("Target rate limit reached, waiting {:?}", wait);
            sleep(wait).await;
        }
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn backoff_delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let exponential = self
            .base_backoff
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        exponential.max(retry_after.unwrap_or_default()).min(MAX_BACKOFF)
    }

    /// Run one target write under the rate limit, retrying retryable errors
    pub async fn execute<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, WriteError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, WriteError>>,
    {
        let mut attempt = 1;
        loop {
            let result = {
                let _permit = self
                    .in_flight
                    .acquire()
                    .await
                    .map_err(|_| WriteError::Transient("throttle closed".to_string()))?;
                self.acquire_token().await;
                op().await
            };

            match result {
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let retry_after = match &e {
                        WriteError::RateLimited { retry_after } => *retry_after,
                        _ => None,
                    };
                    let delay = self.backoff_delay(attempt, retry_after);
                    warn!(
                        "Write for {} failed (attempt {}/{}): {}; retrying in {:?}",
                        label, attempt, self.max_attempts, e, delay
                    );
                    self.retries.fetch_add(1, Ordering::Relaxed);
                    sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Retries performed since start
    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    /// Times a write had to wait for a token
    pub fn waits(&self) -> u64 {
        self.waits.load(Ordering::Relaxed)
    }
}
