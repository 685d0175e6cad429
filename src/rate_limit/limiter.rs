use super::bucket::TokenBucket;
use super::clock::{epoch_secs, Clock, SystemClock};
use super::types::{Admission, CategoryStats, RateLimitCategory, RateLimitPolicy, MAX_COOLDOWN};
use crate::config::LimiterConfig;
use crate::error::{LimiterError, Result};
use crate::metrics;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

/// Number of grant timestamps kept per category for reporting
pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;

/// Window used for `recent_requests_last_minute`
const RECENT_WINDOW: Duration = Duration::from_secs(60);

/// Admission controller owning one token bucket per category
///
/// Meant to be built once and shared as `Arc<RateLimiter>` between every
/// outbound caller in the process.
#[derive(Debug)]
pub struct RateLimiter {
    /// Indexed by `RateLimitCategory::index`
    slots: [CategorySlot; 5],
    history_capacity: usize,
    clock: Arc<dyn Clock>,
}

#[derive(Debug)]
struct CategorySlot {
    bucket: TokenBucket,
    tracking: Mutex<Tracking>,
}

#[derive(Debug, Default)]
struct Tracking {
    cooldown_until: Option<SystemTime>,
    /// Grant timestamps, oldest first
    history: VecDeque<SystemTime>,
}

impl CategorySlot {
    fn tracking(&self) -> MutexGuard<'_, Tracking> {
        self.tracking.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Builder for a [`RateLimiter`] with custom policies or clock
#[derive(Debug)]
pub struct RateLimiterBuilder {
    policies: [RateLimitPolicy; 5],
    history_capacity: usize,
    clock: Arc<dyn Clock>,
}

impl RateLimiterBuilder {
    /// Override the policy of one category
    pub fn policy(mut self, category: RateLimitCategory, policy: RateLimitPolicy) -> Self {
        self.policies[category.index()] = policy;
        self
    }

    pub fn history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Validate every policy and build the limiter
    pub fn build(self) -> Result<RateLimiter> {
        for category in RateLimitCategory::ALL {
            self.policies[category.index()].validate(category)?;
        }
        if self.history_capacity == 0 {
            return Err(LimiterError::Config(
                "history_capacity must be > 0".to_string(),
            ));
        }

        Ok(RateLimiter::assemble(
            self.policies,
            self.history_capacity,
            self.clock,
        ))
    }
}

impl Default for RateLimiterBuilder {
    fn default() -> Self {
        Self {
            policies: RateLimitCategory::ALL.map(RateLimitPolicy::default_for),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            clock: Arc::new(SystemClock),
        }
    }
}

impl RateLimiter {
    /// Create a limiter with the built-in policies and the system clock
    pub fn new() -> Self {
        let defaults = RateLimiterBuilder::default();
        Self::assemble(defaults.policies, defaults.history_capacity, defaults.clock)
    }

    pub fn builder() -> RateLimiterBuilder {
        RateLimiterBuilder::default()
    }

    /// Create a limiter from file configuration, applying its overrides
    pub fn from_config(config: &LimiterConfig) -> Result<Self> {
        config
            .limits
            .iter()
            .fold(Self::builder(), |builder, (category, policy)| {
                builder.policy(*category, *policy)
            })
            .history_capacity(config.history_capacity)
            .build()
    }

    fn assemble(
        policies: [RateLimitPolicy; 5],
        history_capacity: usize,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let slots = policies.map(|policy| CategorySlot {
            bucket: TokenBucket::new(policy, clock.clone()),
            tracking: Mutex::new(Tracking::default()),
        });

        info!(
            categories = slots.len(),
            history_capacity, "Rate limiter initialized"
        );

        Self {
            slots,
            history_capacity,
            clock,
        }
    }

    fn slot(&self, category: RateLimitCategory) -> &CategorySlot {
        &self.slots[category.index()]
    }

    /// Policy in effect for a category
    pub fn policy(&self, category: RateLimitCategory) -> &RateLimitPolicy {
        self.slot(category).bucket.policy()
    }

    /// Check whether a request of `cost` tokens may go out now, consuming the tokens if so
    pub fn can_proceed(&self, category: RateLimitCategory, cost: u32) -> Admission {
        let slot = self.slot(category);
        // Held across the cooldown check and the consume so a concurrent
        // trigger_cooldown cannot slip in between them. Lock order is
        // tracking, then bucket.
        let mut tracking = slot.tracking();
        let now = self.clock.now();

        if let Some(remaining) = cooldown_remaining(&tracking, now) {
            debug!(
                category = %category,
                remaining_secs = remaining.as_secs_f64(),
                "Category cooling down, denying request"
            );
            metrics::record_admission(category, false);
            return Admission::denied(remaining);
        }

        let admission = slot.bucket.try_consume(cost);

        if admission.granted {
            if tracking.history.len() >= self.history_capacity {
                tracking.history.pop_front();
            }
            tracking.history.push_back(now);
            debug!(category = %category, "Rate limit check passed");
        } else {
            debug!(
                category = %category,
                wait_secs = admission.wait.as_secs_f64(),
                "Rate limited"
            );
        }

        metrics::record_admission(category, admission.granted);
        admission
    }

    /// Like [`RateLimiter::can_proceed`] for a category given by name
    ///
    /// Names that don't match any category are admitted so a typo in a
    /// caller never blocks it entirely.
    pub fn can_proceed_by_name(&self, name: &str, cost: u32) -> Admission {
        match name.parse::<RateLimitCategory>() {
            Ok(category) => self.can_proceed(category, cost),
            Err(_) => {
                warn!(category = %name, "Unknown rate limit category, allowing request");
                Admission::granted()
            }
        }
    }

    /// Suspend the current task until the request may go out
    ///
    /// Returns how long the task slept. Admission is not re-checked after
    /// waking.
    pub async fn wait_if_needed(&self, category: RateLimitCategory, cost: u32) -> Duration {
        let admission = self.can_proceed(category, cost);
        if admission.granted || admission.wait.is_zero() {
            return Duration::ZERO;
        }

        info!(
            category = %category,
            wait_secs = admission.wait.as_secs_f64(),
            "Rate limited, waiting"
        );
        tokio::time::sleep(admission.wait).await;
        admission.wait
    }

    /// Blocking variant of [`RateLimiter::wait_if_needed`] for worker threads
    pub fn wait_if_needed_blocking(&self, category: RateLimitCategory, cost: u32) -> Duration {
        let admission = self.can_proceed(category, cost);
        if admission.granted || admission.wait.is_zero() {
            return Duration::ZERO;
        }

        info!(
            category = %category,
            wait_secs = admission.wait.as_secs_f64(),
            "Rate limited, blocking"
        );
        std::thread::sleep(admission.wait);
        admission.wait
    }

    /// Deny every request for the category for `duration`
    ///
    /// `None` or a zero duration falls back to the category's default
    /// cooldown. Durations above [`MAX_COOLDOWN`] are clamped. Returns the
    /// cooldown that was applied.
    pub fn trigger_cooldown(
        &self,
        category: RateLimitCategory,
        duration: Option<Duration>,
    ) -> Duration {
        let slot = self.slot(category);
        let mut duration = duration
            .filter(|d| !d.is_zero())
            .unwrap_or_else(|| slot.bucket.policy().cooldown())
            .min(MAX_COOLDOWN);

        let now = self.clock.now();
        let until = match now.checked_add(duration) {
            Some(until) => until,
            // Only reachable with a clock near the end of SystemTime's range
            None => {
                duration = Duration::ZERO;
                now
            }
        };
        slot.tracking().cooldown_until = Some(until);

        warn!(
            category = %category,
            duration_secs = duration.as_secs_f64(),
            "Cooldown triggered"
        );
        metrics::record_cooldown(category);
        duration
    }

    /// Refill buckets and clear cooldowns and history, for one category or all of them
    pub fn reset_limits(&self, category: Option<RateLimitCategory>) {
        match category {
            Some(category) => {
                self.reset_slot(self.slot(category));
                info!(category = %category, "Reset rate limits");
            }
            None => {
                for slot in &self.slots {
                    self.reset_slot(slot);
                }
                info!("Reset all rate limits");
            }
        }
    }

    fn reset_slot(&self, slot: &CategorySlot) {
        let mut tracking = slot.tracking();
        slot.bucket.reset();
        tracking.cooldown_until = None;
        tracking.history.clear();
    }

    /// Usage report for one category; never consumes tokens
    pub fn stats(&self, category: RateLimitCategory) -> CategoryStats {
        let slot = self.slot(category);
        let policy = slot.bucket.policy();
        let tracking = slot.tracking();
        let available_tokens = slot.bucket.available_tokens();
        let now = self.clock.now();

        // Timestamps ahead of a rewound clock still count as recent
        let recent_requests_last_minute = tracking
            .history
            .iter()
            .filter(|at| now.duration_since(**at).map_or(true, |age| age <= RECENT_WINDOW))
            .count();

        CategoryStats {
            category,
            available_tokens,
            max_tokens: policy.burst,
            rate_per_second: policy.rate_per_second,
            recent_requests_last_minute,
            total_requests_recorded: tracking.history.len(),
            cooldown_remaining_secs: cooldown_remaining(&tracking, now)
                .map_or(0.0, |d| d.as_secs_f64()),
            last_request_timestamp: tracking.history.back().copied().map(epoch_secs),
        }
    }

    /// Usage reports for every category
    pub fn all_stats(&self) -> BTreeMap<RateLimitCategory, CategoryStats> {
        RateLimitCategory::ALL
            .into_iter()
            .map(|category| (category, self.stats(category)))
            .collect()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

fn cooldown_remaining(tracking: &Tracking, now: SystemTime) -> Option<Duration> {
    tracking
        .cooldown_until
        .and_then(|until| until.duration_since(now).ok())
        .filter(|remaining| !remaining.is_zero())
}
