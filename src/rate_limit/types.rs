use crate::error::{LimiterError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Longest cooldown the limiter will apply; longer requests are clamped
pub const MAX_COOLDOWN: Duration = Duration::from_secs(24 * 60 * 60);

/// Resource class an admission decision is scoped to
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitCategory {
    /// Webhook posts
    Webhook,
    /// Generic REST API calls
    ApiRequest,
    /// Outgoing chat messages
    MessageSend,
    /// Attachment downloads
    FileDownload,
    /// Gateway (websocket) commands
    Gateway,
}

impl RateLimitCategory {
    /// Every category, in declaration order
    pub const ALL: [RateLimitCategory; 5] = [
        RateLimitCategory::Webhook,
        RateLimitCategory::ApiRequest,
        RateLimitCategory::MessageSend,
        RateLimitCategory::FileDownload,
        RateLimitCategory::Gateway,
    ];

    /// Wire name of the category
    pub fn as_str(&self) -> &'static str {
        match self {
            RateLimitCategory::Webhook => "webhook",
            RateLimitCategory::ApiRequest => "api_request",
            RateLimitCategory::MessageSend => "message_send",
            RateLimitCategory::FileDownload => "file_download",
            RateLimitCategory::Gateway => "gateway",
        }
    }

    /// Position in `ALL`
    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for RateLimitCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RateLimitCategory {
    type Err = LimiterError;

    fn from_str(s: &str) -> Result<Self> {
        RateLimitCategory::ALL
            .into_iter()
            .find(|category| category.as_str() == s)
            .ok_or_else(|| LimiterError::UnknownCategory(s.to_string()))
    }
}

/// Admission policy for one category
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    /// Sustained refill rate; zero or negative means unlimited
    pub rate_per_second: f64,
    /// Token ceiling, i.e. how many requests may go out back to back
    pub burst: u32,
    /// Cooldown applied when none is given explicitly (in seconds)
    #[serde(default)]
    pub cooldown_secs: f64,
}

impl RateLimitPolicy {
    /// Create a policy
    pub fn new(rate_per_second: f64, burst: u32, cooldown_secs: f64) -> Self {
        Self {
            rate_per_second,
            burst,
            cooldown_secs,
        }
    }

    /// Built-in policy for a category
    pub fn default_for(category: RateLimitCategory) -> Self {
        match category {
            RateLimitCategory::Webhook => Self::new(5.0, 10, 1.0),
            RateLimitCategory::ApiRequest => Self::new(50.0, 100, 0.5),
            RateLimitCategory::MessageSend => Self::new(1.0, 3, 2.0),
            RateLimitCategory::FileDownload => Self::new(2.0, 5, 1.0),
            RateLimitCategory::Gateway => Self::new(120.0, 120, 0.1),
        }
    }

    /// Whether the policy never throttles
    pub fn is_unlimited(&self) -> bool {
        self.rate_per_second <= 0.0
    }

    /// Default cooldown as a Duration, clamped to [`MAX_COOLDOWN`]
    pub fn cooldown(&self) -> Duration {
        Duration::try_from_secs_f64(self.cooldown_secs)
            .map_or(MAX_COOLDOWN, |cooldown| cooldown.min(MAX_COOLDOWN))
    }

    /// Reject policies the bucket cannot honor
    pub fn validate(&self, category: RateLimitCategory) -> Result<()> {
        let invalid = |reason: &str| LimiterError::InvalidPolicy {
            category: category.to_string(),
            reason: reason.to_string(),
        };

        if !self.rate_per_second.is_finite() {
            return Err(invalid("rate_per_second must be finite"));
        }
        if !self.cooldown_secs.is_finite()
            || self.cooldown_secs < 0.0
            || self.cooldown_secs > MAX_COOLDOWN.as_secs_f64()
        {
            return Err(invalid(&format!(
                "cooldown_secs must be between 0 and {}",
                MAX_COOLDOWN.as_secs()
            )));
        }
        if !self.is_unlimited() && self.burst == 0 {
            return Err(invalid("burst must be > 0 for a throttled category"));
        }

        Ok(())
    }
}

/// Outcome of an admission check
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Admission {
    /// Whether the request may go out now
    pub granted: bool,
    /// How long to wait before retrying (zero when granted)
    pub wait: Duration,
}

impl Admission {
    /// Create a granted result
    pub fn granted() -> Self {
        Self {
            granted: true,
            wait: Duration::ZERO,
        }
    }

    /// Create a denied result
    pub fn denied(wait: Duration) -> Self {
        Self {
            granted: false,
            wait,
        }
    }
}

/// Point-in-time usage report for one category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryStats {
    pub category: RateLimitCategory,
    pub available_tokens: f64,
    pub max_tokens: u32,
    pub rate_per_second: f64,
    pub recent_requests_last_minute: usize,
    pub total_requests_recorded: usize,
    pub cooldown_remaining_secs: f64,
    /// Unix epoch seconds of the most recent grant
    pub last_request_timestamp: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_names_round_trip() {
        for category in RateLimitCategory::ALL {
            assert_eq!(category.as_str().parse::<RateLimitCategory>().unwrap(), category);
        }
        assert!("voice".parse::<RateLimitCategory>().is_err());
    }

    #[test]
    fn test_category_serde_snake_case() {
        let json = serde_json::to_string(&RateLimitCategory::FileDownload).unwrap();
        assert_eq!(json, "\"file_download\"");
    }

    #[test]
    fn test_default_policies() {
        let webhook = RateLimitPolicy::default_for(RateLimitCategory::Webhook);
        assert_eq!(webhook.rate_per_second, 5.0);
        assert_eq!(webhook.burst, 10);
        assert_eq!(webhook.cooldown(), Duration::from_secs(1));

        let gateway = RateLimitPolicy::default_for(RateLimitCategory::Gateway);
        assert_eq!(gateway.burst, 120);
        assert_eq!(gateway.cooldown(), Duration::from_millis(100));

        for category in RateLimitCategory::ALL {
            assert!(RateLimitPolicy::default_for(category).validate(category).is_ok());
        }
    }

    #[test]
    fn test_policy_validation() {
        let category = RateLimitCategory::ApiRequest;

        assert!(RateLimitPolicy::new(f64::NAN, 10, 1.0).validate(category).is_err());
        assert!(RateLimitPolicy::new(f64::INFINITY, 10, 1.0).validate(category).is_err());
        assert!(RateLimitPolicy::new(5.0, 10, -1.0).validate(category).is_err());
        assert!(RateLimitPolicy::new(5.0, 0, 1.0).validate(category).is_err());
        assert!(RateLimitPolicy::new(5.0, 10, 1e30).validate(category).is_err());
        assert!(RateLimitPolicy::new(5.0, 10, 86_400.0).validate(category).is_ok());

        // Unlimited policies don't need a burst
        let unlimited = RateLimitPolicy::new(0.0, 0, 0.0);
        assert!(unlimited.is_unlimited());
        assert!(unlimited.validate(category).is_ok());
        assert!(RateLimitPolicy::new(-1.0, 0, 0.0).is_unlimited());
    }

    #[test]
    fn test_cooldown_never_exceeds_cap() {
        // Built directly, skipping validation
        assert_eq!(RateLimitPolicy::new(5.0, 10, 1e30).cooldown(), MAX_COOLDOWN);
        assert_eq!(RateLimitPolicy::new(5.0, 10, 90_000.0).cooldown(), MAX_COOLDOWN);
        assert_eq!(
            RateLimitPolicy::new(5.0, 10, 2.5).cooldown(),
            Duration::from_millis(2500)
        );
    }

    #[test]
    fn test_admission() {
        let granted = Admission::granted();
        assert!(granted.granted);
        assert_eq!(granted.wait, Duration::ZERO);

        let denied = Admission::denied(Duration::from_millis(200));
        assert!(!denied.granted);
        assert_eq!(denied.wait, Duration::from_millis(200));
    }
}
