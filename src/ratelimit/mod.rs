//! Rate limiting algorithms and check orchestration.

mod backend;
mod key;
mod limiter;
mod policy;
mod result;
mod selector;
mod sliding_window;
mod token_bucket;

pub use backend::Limiter;
pub use key::CounterKey;
pub use limiter::{CheckOutcome, LimiterSettings, RateLimiter, DEFAULT_STORE_TIMEOUT};
pub use policy::{Algorithm, PolicyRecord, RateLimitPolicy};
pub use result::RateLimitResult;
pub use selector::LimiterSelector;
pub use sliding_window::{SlidingWindowLimiter, SlidingWindowLog, WindowEdge};
pub use token_bucket::{BucketState, TokenBucketLimiter};
