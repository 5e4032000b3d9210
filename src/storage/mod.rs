// src/storage/mod.rs

pub mod memory;
pub mod redis;

#[cfg(test)]
mod tests;

pub use memory::{MemoryClock, MemoryStorage};
pub use redis::RedisStorage;

use async_trait::async_trait;
use std::fmt::Debug;

use crate::algorithms::Algorithm;
use crate::error::{RateLimiterError, Result};

/// The integer triple every decision script returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptReply {
    pub allowed: bool,

    /// Remaining headroom, still scaled by 1000
    pub remaining: u64,

    pub retry_after_ms: u64,
}

impl ScriptReply {
    /// Validate the raw script reply. Anything other than a three-element
    /// integer array with a 0/1 flag is a script failure.
    pub fn from_triple(values: &[i64]) -> Result<Self> {
        if values.len() != 3 {
            return Err(RateLimiterError::Script(format!(
                "expected 3 reply values, got {}",
                values.len()
            )));
        }
        let allowed = match values[0] {
            0 => false,
            1 => true,
            other => {
                return Err(RateLimiterError::Script(format!(
                    "allowed flag out of range: {}",
                    other
                )))
            }
        };
        Ok(ScriptReply {
            allowed,
            remaining: values[1].max(0) as u64,
            retry_after_ms: values[2].max(0) as u64,
        })
    }
}

/// Persisted token bucket state, still scaled by 1000.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketState {
    pub tokens: u64,
    pub last_refill_ms: u64,
}

/// Seam between the engine and the store.
///
/// The Redis implementation executes the decision scripts atomically on
/// the server; the in-memory implementation runs the same semantics under
/// one lock. Everything here speaks scaled integers; rescaling to caller
/// units happens in the engine.
#[async_trait]
pub trait StorageBackend: Send + Sync + Debug {
    /// Execute the algorithm's decision script atomically with the given
    /// KEYS and integer ARGV.
    async fn run_decision(
        &self,
        algorithm: Algorithm,
        keys: &[String],
        argv: &[i64],
    ) -> Result<ScriptReply>;

    /// Read a window counter without mutating it.
    async fn fetch_counter(&self, key: &str) -> Result<Option<u64>>;

    /// Read a token bucket without mutating it.
    async fn fetch_bucket(&self, key: &str) -> Result<Option<BucketState>>;

    /// Delete keys; missing keys are not an error. Returns how many
    /// existed.
    async fn remove(&self, keys: &[String]) -> Result<u64>;

    /// Current time in epoch milliseconds, on the store's clock.
    async fn now_ms(&self) -> Result<u64>;

    /// Liveness probe.
    async fn ping(&self) -> Result<()>;
}

#[cfg(test)]
mod reply_tests {
    use super::*;

    #[test]
    fn parses_the_triple() {
        let reply = ScriptReply::from_triple(&[1, 99_000, 0]).unwrap();
        assert!(reply.allowed);
        assert_eq!(reply.remaining, 99_000);
        assert_eq!(reply.retry_after_ms, 0);
    }

    #[test]
    fn clamps_negative_values() {
        let reply = ScriptReply::from_triple(&[0, -5, -1]).unwrap();
        assert!(!reply.allowed);
        assert_eq!(reply.remaining, 0);
        assert_eq!(reply.retry_after_ms, 0);
    }

    #[test]
    fn rejects_bad_shapes() {
        assert!(matches!(
            ScriptReply::from_triple(&[1, 2]),
            Err(RateLimiterError::Script(_))
        ));
        assert!(matches!(
            ScriptReply::from_triple(&[2, 0, 0]),
            Err(RateLimiterError::Script(_))
        ));
        assert!(matches!(
            ScriptReply::from_triple(&[]),
            Err(RateLimiterError::Script(_))
        ));
    }
}
