//! Rate limiting for rate-sensitive tools
//!
//! Token bucket shared by every call it gates (web search by default).
//! The limiter is constructed by the caller and handed to the tools that
//! need it, so independent instances can coexist.

use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::warn;

/// Token bucket rate limiter
pub struct RateLimiter {
    bucket: Mutex<Bucket>,
    /// Maximum tokens held at once
    capacity: u32,
    /// Time to regenerate one token
    refill_interval: Duration,
}

struct Bucket {
    tokens: u32,
    last_refill: Instant,
}

impl RateLimiter {
    /// Create a new rate limiter
    ///
    /// # Arguments
    /// * `capacity` - Maximum burst size, the bucket starts full
    /// * `refill_interval` - Time needed to regenerate a single token
    pub fn new(capacity: u32, refill_interval: Duration) -> Self {
        Self::starting_at(capacity, refill_interval, Instant::now())
    }

    /// Limiter admitting `max_requests` per minute, with the same burst size
    pub fn per_minute(max_requests: u32) -> Self {
        let max_requests = max_requests.max(1);
        Self::new(max_requests, Duration::from_secs(60) / max_requests)
    }

    /// Create a limiter whose clock starts at `start`
    pub fn starting_at(capacity: u32, refill_interval: Duration, start: Instant) -> Self {
        Self {
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: start,
            }),
            capacity,
            refill_interval,
        }
    }

    /// Check if a call is admitted and consume a token if so
    ///
    /// Returns `true` if the call is allowed, `false` if rate limited
    pub fn allow(&self) -> bool {
        self.allow_at(Instant::now())
    }

    /// Same as [`allow`](Self::allow) against an explicit clock reading
    pub fn allow_at(&self, now: Instant) -> bool {
        let mut bucket = self.lock();
        self.refill(&mut bucket, now);

        if bucket.tokens == 0 {
            warn!(
                capacity = self.capacity,
                refill_ms = self.refill_interval.as_millis() as u64,
                "Rate limit exceeded"
            );
            return false;
        }

        bucket.tokens -= 1;
        true
    }

    /// Tokens currently available (after refilling)
    pub fn remaining(&self) -> u32 {
        let mut bucket = self.lock();
        self.refill(&mut bucket, Instant::now());
        bucket.tokens
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn refill_interval(&self) -> Duration {
        self.refill_interval
    }

    fn refill(&self, bucket: &mut Bucket, now: Instant) {
        if self.refill_interval.is_zero() {
            bucket.tokens = self.capacity;
            bucket.last_refill = now;
            return;
        }

        let elapsed = now.saturating_duration_since(bucket.last_refill);
        if elapsed < self.refill_interval {
            return;
        }

        let generated = elapsed.as_nanos() / self.refill_interval.as_nanos();
        let generated = u32::try_from(generated).unwrap_or(u32::MAX);
        bucket.tokens = bucket.tokens.saturating_add(generated).min(self.capacity);

        if bucket.tokens == self.capacity {
            bucket.last_refill = now;
        } else {
            // Keep the partial interval so slow callers are not penalised
            bucket.last_refill += self.refill_interval * generated;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Bucket> {
        // The bucket holds plain integers, a poisoned lock is still consistent
        self.bucket.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        // Default: 5 web searches per minute
        Self::per_minute(5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_allows_up_to_capacity() {
        let start = Instant::now();
        let limiter = RateLimiter::starting_at(3, Duration::from_secs(60), start);
        assert!(limiter.allow_at(start));
        assert!(limiter.allow_at(start));
        assert!(limiter.allow_at(start));
        assert!(!limiter.allow_at(start)); // Should be blocked
    }

    #[test]
    fn test_five_per_minute_scenario() {
        let start = Instant::now();
        let limiter = RateLimiter::starting_at(5, Duration::from_secs(12), start);

        for _ in 0..5 {
            assert!(limiter.allow_at(start));
        }
        assert!(!limiter.allow_at(start + Duration::from_secs(11)));

        // One token regenerated after a full interval
        assert!(limiter.allow_at(start + Duration::from_secs(12)));
        assert!(!limiter.allow_at(start + Duration::from_secs(12)));
    }

    #[test]
    fn test_refill_capped_at_capacity() {
        let start = Instant::now();
        let limiter = RateLimiter::starting_at(2, Duration::from_secs(1), start);
        assert!(limiter.allow_at(start));
        assert!(limiter.allow_at(start));

        let later = start + Duration::from_secs(3600);
        assert!(limiter.allow_at(later));
        assert!(limiter.allow_at(later));
        assert!(!limiter.allow_at(later));
    }

    #[test]
    fn test_partial_interval_is_kept() {
        let start = Instant::now();
        let limiter = RateLimiter::starting_at(3, Duration::from_secs(10), start);
        for _ in 0..3 {
            assert!(limiter.allow_at(start));
        }

        // 15s: one token, 5s carried over
        assert!(limiter.allow_at(start + Duration::from_secs(15)));
        assert!(!limiter.allow_at(start + Duration::from_secs(15)));
        // 20s: the carried 5s completes a second token
        assert!(limiter.allow_at(start + Duration::from_secs(20)));
    }

    #[test]
    fn test_per_minute_interval() {
        let limiter = RateLimiter::per_minute(5);
        assert_eq!(limiter.capacity(), 5);
        assert_eq!(limiter.refill_interval(), Duration::from_secs(12));
        assert_eq!(limiter.remaining(), 5);
    }

    #[test]
    fn test_window_expiry_real_clock() {
        let limiter = RateLimiter::new(1, Duration::from_millis(50));
        assert!(limiter.allow());
        assert!(!limiter.allow());

        std::thread::sleep(Duration::from_millis(80));

        assert!(limiter.allow()); // Should be allowed again
    }

    #[test]
    fn test_shared_across_threads() {
        let limiter = Arc::new(RateLimiter::new(10, Duration::from_secs(3600)));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || (0..5).filter(|_| limiter.allow()).count())
            })
            .collect();

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 10);
    }
}
