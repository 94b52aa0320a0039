// Token-bucket rate limiter with burst smoothing, modeled on Guava's
// SmoothBursty limiter: permits accrue at a steady rate up to a configurable
// burst ceiling, and borrowing against future permits is priced in wait time
// rather than refused outright.

use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::trace;

use crate::error::{Result, ToolkitError};

const MAX_PERMITS_PER_SEC: f64 = 1_000_000.0;

/// A monotonic microsecond clock, injected so the limiter's admission math
/// can be tested without real sleeps. [`SteadyClock`] is the production
/// implementation; tests use a manually-advanced clock instead.
pub trait Clock: Send + Sync {
    fn now_micros(&self) -> i64;
}

/// Wall-clock implementation backed by [`std::time::Instant`].
pub struct SteadyClock {
    start: Instant,
}

impl SteadyClock {
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }
}

impl Default for SteadyClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SteadyClock {
    fn now_micros(&self) -> i64 {
        self.start.elapsed().as_micros() as i64
    }
}

struct Bucket {
    stable_interval_micros: f64,
    max_permits: f64,
    stored_permits: f64,
    next_free_micros: f64,
}

impl Bucket {
    /// Mints fresh permits for elapsed time since the last reservation,
    /// capped at `max_permits`, then fast-forwards `next_free_micros` to now.
    fn resync(&mut self, now_micros: i64) {
        let now = now_micros as f64;
        if now > self.next_free_micros {
            let new_permits = (now - self.next_free_micros) / self.stable_interval_micros;
            self.stored_permits = (self.stored_permits + new_permits).min(self.max_permits);
            self.next_free_micros = now;
        }
    }
}

/// Token-bucket admission controller. `permits_per_sec` sets the steady
/// refill rate; `max_burst_seconds` bounds how many permits can be banked
/// ahead of steady-state demand (`max_permits = rate * max_burst_seconds`).
pub struct RateLimiter<C: Clock = SteadyClock> {
    max_burst_seconds: f64,
    bucket: Mutex<Bucket>,
    clock: C,
}

impl RateLimiter<SteadyClock> {
    /// `max_burst_seconds` defaults to 1.0.
    pub fn new(permits_per_sec: f64) -> Result<Self> {
        Self::with_burst(permits_per_sec, 1.0)
    }

    pub fn with_burst(permits_per_sec: f64, max_burst_seconds: f64) -> Result<Self> {
        Self::with_clock(permits_per_sec, max_burst_seconds, SteadyClock::new())
    }
}

impl<C: Clock> RateLimiter<C> {
    pub fn with_clock(permits_per_sec: f64, max_burst_seconds: f64, clock: C) -> Result<Self> {
        if !(permits_per_sec > 0.0) || permits_per_sec > MAX_PERMITS_PER_SEC {
            return Err(ToolkitError::InvalidArgument(format!(
                "permits_per_sec must be in (0, {MAX_PERMITS_PER_SEC}], got {permits_per_sec}"
            )));
        }
        if !(max_burst_seconds > 0.0) {
            return Err(ToolkitError::InvalidArgument(format!(
                "max_burst_seconds must be positive, got {max_burst_seconds}"
            )));
        }
        let max_permits = permits_per_sec * max_burst_seconds;
        let now = clock.now_micros();
        Ok(Self {
            max_burst_seconds,
            bucket: Mutex::new(Bucket {
                stable_interval_micros: 1_000_000.0 / permits_per_sec,
                max_permits,
                stored_permits: 0.0,
                next_free_micros: now as f64,
            }),
            clock,
        })
    }

    /// Re-scales `stored_permits` so the stored *fraction* of burst capacity
    /// is preserved across a rate change: `new_stored = old_stored *
    /// new_max / old_max`. A rate change from a zero-capacity bucket (only
    /// possible before the first successful construction) sets
    /// `stored_permits = 0` explicitly rather than leaving it undefined.
    pub fn set_rate(&self, permits_per_sec: f64) -> Result<()> {
        if !(permits_per_sec > 0.0) || permits_per_sec > MAX_PERMITS_PER_SEC {
            return Err(ToolkitError::InvalidArgument(format!(
                "permits_per_sec must be in (0, {MAX_PERMITS_PER_SEC}], got {permits_per_sec}"
            )));
        }
        let now = self.clock.now_micros();
        let mut bucket = self.bucket.lock();
        bucket.resync(now);
        let old_max = bucket.max_permits;
        bucket.stable_interval_micros = 1_000_000.0 / permits_per_sec;
        bucket.max_permits = permits_per_sec * self.max_burst_seconds;
        bucket.stored_permits = if old_max == 0.0 {
            0.0
        } else {
            bucket.stored_permits * bucket.max_permits / old_max
        };
        trace!(permits_per_sec, max_permits = bucket.max_permits, "rate limiter rescaled");
        Ok(())
    }

    /// Reserves `permits`, sleeping outside any lock until they are
    /// available, and returns how long the caller waited, in microseconds
    /// (never negative).
    pub fn acquire(&self, permits: u32) -> Result<u64> {
        if permits == 0 {
            return Err(ToolkitError::InvalidArgument("permits must be positive".to_string()));
        }
        let now = self.clock.now_micros();
        let wait = self.reserve_and_get_wait(permits, now, None);
        if wait > 0 {
            thread::sleep(Duration::from_micros(wait as u64));
        }
        Ok(wait as u64)
    }

    /// Returns `true` and sleeps the required delay iff `permits` would
    /// become available within `timeout_micros`; otherwise returns `false`
    /// immediately without consuming any permits.
    pub fn try_acquire(&self, permits: u32, timeout_micros: u64) -> Result<bool> {
        if permits == 0 {
            return Err(ToolkitError::InvalidArgument("permits must be positive".to_string()));
        }
        let now = self.clock.now_micros();
        let wait = self.reserve_and_get_wait(permits, now, Some(timeout_micros as i64));
        match wait {
            w if w < 0 => Ok(false),
            0 => Ok(true),
            w => {
                thread::sleep(Duration::from_micros(w as u64));
                Ok(true)
            }
        }
    }

    /// Under lock: resyncs to `now`, decides whether the reservation fits
    /// within `timeout_micros` (`None` = infinite), and if so commits it.
    /// Returns the sleep length in microseconds, or `-1` if the reservation
    /// was refused because it would exceed the timeout.
    fn reserve_and_get_wait(&self, permits: u32, now_micros: i64, timeout_micros: Option<i64>) -> i64 {
        let mut bucket = self.bucket.lock();
        bucket.resync(now_micros);

        let next_free_before = bucket.next_free_micros;
        let use_stored = (permits as f64).min(bucket.stored_permits);
        let fresh = permits as f64 - use_stored;
        let wait_micros = fresh * bucket.stable_interval_micros;

        let fits = match timeout_micros {
            None => true,
            Some(timeout) => next_free_before <= now_micros as f64 + timeout as f64,
        };
        if !fits {
            return -1;
        }

        bucket.stored_permits -= use_stored;
        bucket.next_free_micros += wait_micros;
        drop(bucket);

        if next_free_before > now_micros as f64 {
            (next_free_before - now_micros as f64) as i64
        } else {
            0
        }
    }
}
