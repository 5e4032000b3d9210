//! Distributed rate limiting over Redis.
//!
//! Decisions run as atomic Lua scripts on the store, so concurrent
//! clients on different machines agree on every admission. Three
//! algorithms are built in: epoch-aligned fixed windows, continuously
//! refilled token buckets, and weighted sliding windows. All script
//! arithmetic is integral (counts scaled by 1000) to keep results
//! identical across script runtimes.
//!
//! ```no_run
//! use redlimit::{Algorithm, RateLimiter, RateLimiterConfig};
//!
//! # async fn demo() -> redlimit::Result<()> {
//! let limiter = RateLimiter::connect(RateLimiterConfig::default()).await?;
//!
//! let result = limiter
//!     .check_with_info("user:123", "100/minute", Some(Algorithm::SlidingWindow), None, 1)
//!     .await?;
//! if !result.allowed {
//!     println!("denied, retry in {}ms", result.retry_after_ms);
//! }
//! # Ok(())
//! # }
//! ```

pub mod algorithms;
pub mod config;
pub mod error;
pub mod keys;
pub mod limiter;
pub mod logging;
pub mod rate;
pub mod scripts;
pub mod storage;

#[cfg(test)]
mod tests;

// Re-export key components for convenience
pub use algorithms::{Algorithm, CheckResult, Usage, MAX_COST, SCALE};
pub use config::RateLimiterConfig;
pub use error::{RateLimiterError, Result, StorageError};
pub use limiter::RateLimiter;
pub use logging::init as init_logging;
pub use rate::Rate;
pub use storage::{MemoryClock, MemoryStorage, RedisStorage, StorageBackend};
