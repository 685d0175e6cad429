use super::clock::Clock;
use super::types::{Admission, RateLimitPolicy};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

/// Slack for float drift when comparing the balance against a cost
const TOKEN_EPSILON: f64 = 1e-9;

/// Continuously refilling token bucket for one category
#[derive(Debug)]
pub struct TokenBucket {
    /// Immutable policy
    policy: RateLimitPolicy,
    /// Balance and last refill time, always updated together
    state: Mutex<BucketState>,
    clock: Arc<dyn Clock>,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_update: SystemTime,
}

impl TokenBucket {
    /// Create a full bucket
    pub fn new(policy: RateLimitPolicy, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            policy,
            state: Mutex::new(BucketState {
                tokens: f64::from(policy.burst),
                last_update: now,
            }),
            clock,
        }
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// Refill for the time elapsed since the last call, then try to take `cost` tokens
    pub fn try_consume(&self, cost: u32) -> Admission {
        let mut state = self.lock();
        let now = self.clock.now();

        // A clock that stepped backwards yields zero elapsed time
        let elapsed = now
            .duration_since(state.last_update)
            .unwrap_or(Duration::ZERO);
        state.last_update = now;

        if self.policy.is_unlimited() {
            return Admission::granted();
        }

        state.tokens = self.refilled(state.tokens, elapsed);

        let cost = f64::from(cost);
        if state.tokens + TOKEN_EPSILON >= cost {
            state.tokens = (state.tokens - cost).max(0.0);
            Admission::granted()
        } else {
            Admission::denied(wait_for(cost - state.tokens, self.policy.rate_per_second))
        }
    }

    /// Refill to burst capacity
    pub fn reset(&self) {
        let mut state = self.lock();
        state.tokens = f64::from(self.policy.burst);
        state.last_update = self.clock.now();
    }

    /// Balance as of now, without mutating the bucket
    pub fn available_tokens(&self) -> f64 {
        let state = self.lock();
        if self.policy.is_unlimited() {
            return f64::from(self.policy.burst);
        }
        let elapsed = self
            .clock
            .now()
            .duration_since(state.last_update)
            .unwrap_or(Duration::ZERO);
        self.refilled(state.tokens, elapsed)
    }

    fn refilled(&self, tokens: f64, elapsed: Duration) -> f64 {
        let added = elapsed.as_secs_f64() * self.policy.rate_per_second;
        (tokens + added).min(f64::from(self.policy.burst))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BucketState> {
        // The critical section never panics halfway through an update
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Time needed to accumulate `needed` tokens, rounded up to the next nanosecond
fn wait_for(needed: f64, rate_per_second: f64) -> Duration {
    let nanos = (needed / rate_per_second * 1e9).ceil();
    Duration::from_nanos(nanos as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::clock::ManualClock;

    fn bucket(rate: f64, burst: u32) -> (TokenBucket, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        let bucket = TokenBucket::new(RateLimitPolicy::new(rate, burst, 1.0), clock.clone());
        (bucket, clock)
    }

    #[test]
    fn test_fresh_bucket_grants_exactly_burst() {
        let (bucket, _clock) = bucket(5.0, 10);

        for i in 0..10 {
            assert!(bucket.try_consume(1).granted, "Request {} should be granted", i);
        }

        let denied = bucket.try_consume(1);
        assert!(!denied.granted);
        assert_eq!(denied.wait, Duration::from_millis(200));
        assert!(bucket.available_tokens() < TOKEN_EPSILON);
    }

    #[test]
    fn test_retry_after_wait_succeeds() {
        let (bucket, clock) = bucket(5.0, 10);
        for _ in 0..10 {
            bucket.try_consume(1);
        }

        let denied = bucket.try_consume(1);
        assert!(!denied.granted);

        clock.advance(denied.wait);
        assert!(bucket.try_consume(1).granted);
    }

    #[test]
    fn test_refill_is_capped_at_burst() {
        let (bucket, clock) = bucket(5.0, 10);
        bucket.try_consume(4);

        clock.advance(Duration::from_secs(3600));
        assert_eq!(bucket.available_tokens(), 10.0);

        for _ in 0..10 {
            assert!(bucket.try_consume(1).granted);
        }
        assert!(!bucket.try_consume(1).granted);
    }

    #[test]
    fn test_refill_is_proportional_to_elapsed_time() {
        let (bucket, clock) = bucket(2.0, 5);
        for _ in 0..5 {
            bucket.try_consume(1);
        }

        clock.advance(Duration::from_millis(1500));
        assert!((bucket.available_tokens() - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_backwards_clock_does_not_corrupt_balance() {
        let (bucket, clock) = bucket(5.0, 10);
        for _ in 0..10 {
            bucket.try_consume(1);
        }

        clock.rewind(Duration::from_secs(60));
        let denied = bucket.try_consume(1);
        assert!(!denied.granted);
        assert_eq!(denied.wait, Duration::from_millis(200));
        assert!(bucket.available_tokens() >= 0.0);

        // Refill resumes from the rewound instant
        clock.advance(Duration::from_millis(200));
        assert!(bucket.try_consume(1).granted);
    }

    #[test]
    fn test_multi_token_cost() {
        let (bucket, _clock) = bucket(1.0, 3);

        assert!(bucket.try_consume(2).granted);
        let denied = bucket.try_consume(2);
        assert!(!denied.granted);
        assert_eq!(denied.wait, Duration::from_secs(1));
        assert!(bucket.try_consume(1).granted);
    }

    #[test]
    fn test_zero_cost_always_granted() {
        let (bucket, _clock) = bucket(1.0, 1);
        bucket.try_consume(1);
        assert!(bucket.try_consume(0).granted);
    }

    #[test]
    fn test_unlimited_policy_always_grants() {
        let (bucket, _clock) = bucket(0.0, 0);
        for _ in 0..1000 {
            let admission = bucket.try_consume(1);
            assert!(admission.granted);
            assert_eq!(admission.wait, Duration::ZERO);
        }
    }

    #[test]
    fn test_reset_restores_burst() {
        let (bucket, _clock) = bucket(1.0, 3);
        for _ in 0..3 {
            bucket.try_consume(1);
        }
        assert!(!bucket.try_consume(1).granted);

        bucket.reset();
        assert_eq!(bucket.available_tokens(), 3.0);
        assert!(bucket.try_consume(1).granted);
    }

    #[test]
    fn test_concurrent_consumers_never_overdraw() {
        let clock = Arc::new(ManualClock::starting_now());
        let bucket = Arc::new(TokenBucket::new(
            RateLimitPolicy::new(1.0, 50, 0.0),
            clock,
        ));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let bucket = bucket.clone();
                std::thread::spawn(move || {
                    (0..20).filter(|_| bucket.try_consume(1).granted).count()
                })
            })
            .collect();

        let granted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(granted, 50);
        assert!(bucket.available_tokens() >= 0.0);
    }
}
