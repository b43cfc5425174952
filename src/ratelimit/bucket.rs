//! Token bucket implementation.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::rules::LimiterConfig;

/// A token bucket that refills continuously with elapsed time.
///
/// Credit is kept in nanoseconds of earned time: one token costs one refill
/// interval and the bucket holds at most `burst` intervals worth of credit.
/// Integer credit keeps refill exact, so waiting `n` intervals always yields
/// exactly `n` tokens (capped at the burst).
#[derive(Debug)]
pub struct TokenBucket {
    /// Time needed to earn one token
    refill_interval: Duration,
    /// Maximum number of tokens held
    burst: u32,
    /// Credit consumed per admission (nanoseconds)
    cost: u64,
    /// Credit ceiling (nanoseconds)
    capacity: u64,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    /// Earned, unspent credit in nanoseconds, always within `[0, capacity]`
    credit: u64,
    /// Instant up to which credit has been accounted
    last_refill: Instant,
}

impl TokenBucket {
    /// Create a bucket that starts full.
    pub fn new(config: &LimiterConfig, now: Instant) -> Self {
        let burst = config.burst.max(1);
        let cost = duration_nanos(config.refill_interval);
        let capacity = cost.saturating_mul(u64::from(burst));

        Self {
            refill_interval: config.refill_interval,
            burst,
            cost,
            capacity,
            state: Mutex::new(BucketState {
                credit: capacity,
                last_refill: now,
            }),
        }
    }

    /// Refill for the time elapsed up to `now`, then try to take one token.
    ///
    /// Returns `true` if the request is admitted.
    pub fn admit(&self, now: Instant) -> bool {
        let mut state = self.state.lock();
        self.refill(&mut state, now);

        if state.credit >= self.cost {
            state.credit -= self.cost;
            true
        } else {
            false
        }
    }

    /// Tokens available at `now`, without consuming any.
    pub fn tokens(&self, now: Instant) -> f64 {
        let state = self.state.lock();
        let elapsed = duration_nanos(now.saturating_duration_since(state.last_refill));
        let credit = state.credit.saturating_add(elapsed).min(self.capacity);

        if self.cost == 0 {
            return f64::from(self.burst);
        }
        credit as f64 / self.cost as f64
    }

    /// Get the burst capacity.
    pub fn burst(&self) -> u32 {
        self.burst
    }

    /// Get the time needed to earn one token.
    pub fn refill_interval(&self) -> Duration {
        self.refill_interval
    }

    /// Refill rate in tokens per second.
    pub fn refill_rate(&self) -> f64 {
        let secs = self.refill_interval.as_secs_f64();
        if secs == 0.0 {
            f64::INFINITY
        } else {
            1.0 / secs
        }
    }

    fn refill(&self, state: &mut BucketState, now: Instant) {
        // An earlier reading adds nothing and must not rewind the mark.
        let elapsed = now.saturating_duration_since(state.last_refill);
        if elapsed.is_zero() {
            return;
        }

        state.credit = state
            .credit
            .saturating_add(duration_nanos(elapsed))
            .min(self.capacity);
        state.last_refill = now;
    }
}

fn duration_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::thread;

    fn config(refill_secs: u64, burst: u32) -> LimiterConfig {
        LimiterConfig::new(
            Duration::from_secs(refill_secs),
            burst,
            Duration::from_secs(600),
        )
    }

    #[test]
    fn test_new_bucket_starts_full() {
        let now = Instant::now();
        let bucket = TokenBucket::new(&config(1, 5), now);

        assert_eq!(bucket.tokens(now), 5.0);
        assert_eq!(bucket.burst(), 5);
        assert_eq!(bucket.refill_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_burst_admission() {
        let now = Instant::now();
        let bucket = TokenBucket::new(&config(1, 3), now);

        for _ in 0..3 {
            assert!(bucket.admit(now));
        }
        // The 4th request at the same instant is rejected
        assert!(!bucket.admit(now));
        assert_eq!(bucket.tokens(now), 0.0);
    }

    #[test]
    fn test_refill_after_wait() {
        let start = Instant::now();
        let bucket = TokenBucket::new(&config(1, 10), start);

        for _ in 0..10 {
            assert!(bucket.admit(start));
        }
        assert!(!bucket.admit(start));

        // 3.5 intervals later exactly floor(3.5) = 3 more are admitted
        let later = start + Duration::from_millis(3500);
        for _ in 0..3 {
            assert!(bucket.admit(later));
        }
        assert!(!bucket.admit(later));
        assert_eq!(bucket.tokens(later), 0.5);
    }

    #[test]
    fn test_refill_is_capped_at_burst() {
        let start = Instant::now();
        let bucket = TokenBucket::new(&config(5, 2), start);

        assert!(bucket.admit(start));
        assert!(bucket.admit(start));

        let much_later = start + Duration::from_secs(3600);
        assert_eq!(bucket.tokens(much_later), 2.0);
        assert!(bucket.admit(much_later));
        assert!(bucket.admit(much_later));
        assert!(!bucket.admit(much_later));
    }

    #[test]
    fn test_slow_refill_interval() {
        // One request every 30 seconds
        let start = Instant::now();
        let bucket = TokenBucket::new(&config(30, 1), start);

        assert!(bucket.admit(start));
        assert!(!bucket.admit(start + Duration::from_secs(29)));
        assert!(bucket.admit(start + Duration::from_secs(30)));
        assert!((bucket.refill_rate() - 1.0 / 30.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_earlier_instant_is_clamped() {
        let start = Instant::now();
        let later = start + Duration::from_secs(10);
        let bucket = TokenBucket::new(&config(1, 1), later);

        assert!(bucket.admit(later));
        // A reading from before the last refill adds no tokens
        assert!(!bucket.admit(start));
        assert_eq!(bucket.tokens(start), 0.0);
        // and the refill mark did not move backwards
        assert!(bucket.admit(later + Duration::from_secs(1)));
    }

    #[test]
    fn test_zero_burst_is_treated_as_one() {
        let now = Instant::now();
        let bucket = TokenBucket::new(&config(1, 0), now);

        assert_eq!(bucket.burst(), 1);
        assert!(bucket.admit(now));
        assert!(!bucket.admit(now));
    }

    #[test]
    fn test_concurrent_admission_is_exact() {
        const CALLERS: usize = 32;

        for _ in 0..20 {
            let now = Instant::now();
            let bucket = Arc::new(TokenBucket::new(&config(60, (CALLERS - 1) as u32), now));
            let barrier = Arc::new(Barrier::new(CALLERS));

            let handles: Vec<_> = (0..CALLERS)
                .map(|_| {
                    let bucket = Arc::clone(&bucket);
                    let barrier = Arc::clone(&barrier);
                    thread::spawn(move || {
                        barrier.wait();
                        bucket.admit(now)
                    })
                })
                .collect();

            let admitted = handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|admitted| *admitted)
                .count();

            assert_eq!(admitted, CALLERS - 1);
        }
    }
}
