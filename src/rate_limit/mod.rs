//! Rate limiting module
//!
//! In-memory admission control for outbound traffic, one continuously
//! refilling token bucket per [`RateLimitCategory`]:
//!
//! - **Token bucket**: smooth rate limiting with burst support
//! - **Cooldowns**: deny a whole category for a while, e.g. after an upstream 429
//! - **History**: bounded log of recent grants, used only for reporting
//!
//! The limiter is process-local. Several processes each running their own
//! limiter add up their upstream request rates.
//!
//! # Example
//!
//! ```rust,no_run
//! use ratekeeper::rate_limit::{RateLimitCategory, RateLimiter};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let limiter = Arc::new(RateLimiter::new());
//!
//!     // Before each webhook post
//!     limiter.wait_if_needed(RateLimitCategory::Webhook, 1).await;
//!
//!     // Upstream answered 429 with Retry-After: 2
//!     limiter.trigger_cooldown(RateLimitCategory::Webhook, Some(Duration::from_secs(2)));
//! }
//! ```

pub mod bucket;
pub mod clock;
pub mod limiter;
pub mod types;

// Re-export commonly used types
pub use bucket::TokenBucket;
pub use clock::{Clock, ManualClock, SystemClock};
pub use limiter::{RateLimiter, RateLimiterBuilder, DEFAULT_HISTORY_CAPACITY};
pub use types::{Admission, CategoryStats, RateLimitCategory, RateLimitPolicy, MAX_COOLDOWN};
