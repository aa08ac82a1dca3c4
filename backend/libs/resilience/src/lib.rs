//! Resilience patterns for event consumers
//!
//! - **Retry**: capped exponential backoff for redelivering failed events
//!
//! # Example
//!
//! ```rust
//! use resilience::RetryPolicy;
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::new(3, Duration::from_millis(100), Duration::from_secs(5), 2.0)
//!     .expect("valid policy");
//!
//! assert_eq!(policy.backoff(0), Duration::from_millis(100));
//! assert_eq!(policy.backoff(2), Duration::from_millis(400));
//! assert!(!policy.should_retry(3));
//! ```

pub mod retry;

pub use retry::{RetryPolicy, RetryPolicyError};
