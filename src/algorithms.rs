// src/algorithms.rs

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::RateLimiterError;

/// Fixed-point scale applied to every externally visible count before it
/// crosses the store boundary. All arithmetic inside decision scripts is
/// integral; counts are divided back down when reported to callers.
pub const SCALE: u64 = 1000;

/// Largest accepted per-request cost, in caller units.
pub const MAX_COST: u64 = 1_000_000;

/// The fixed set of rate-limiting algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    /// Epoch-aligned counter per window; counter expires at the boundary.
    FixedWindow,
    /// Continuously refilled bucket with millisecond-precision accounting.
    TokenBucket,
    /// Weighted average of the current and previous window counters.
    SlidingWindow,
}

impl Algorithm {
    pub const ALL: [Algorithm; 3] = [
        Algorithm::FixedWindow,
        Algorithm::TokenBucket,
        Algorithm::SlidingWindow,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::FixedWindow => "fixed_window",
            Algorithm::TokenBucket => "token_bucket",
            Algorithm::SlidingWindow => "sliding_window",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = RateLimiterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fixed_window" => Ok(Algorithm::FixedWindow),
            "token_bucket" => Ok(Algorithm::TokenBucket),
            "sliding_window" => Ok(Algorithm::SlidingWindow),
            other => Err(RateLimiterError::UnknownAlgorithm(other.to_string())),
        }
    }
}

/// Outcome of a rate limit decision, in caller units.
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    /// Whether the request was admitted
    pub allowed: bool,

    /// Maximum cost-weighted admissions per window
    pub limit: u64,

    /// Remaining headroom in the current window (0 when denied)
    pub remaining: u64,

    /// Milliseconds until a retry can succeed (0 when the bucket admits
    /// immediately; for windowed algorithms, time to the boundary)
    pub retry_after_ms: u64,

    /// Unix timestamp at which the window resets (or the bucket admits)
    pub reset_epoch: u64,
}

/// Read-only usage snapshot, in caller units. Produced without mutating
/// any stored state.
#[derive(Debug, Clone, Serialize)]
pub struct Usage {
    pub algorithm: Algorithm,

    /// Cost units currently counted against the limit
    pub current: u64,

    pub limit: u64,

    pub remaining: u64,

    pub window_secs: u64,

    /// Unix timestamp at which the window resets (for token buckets, when
    /// the bucket would be full again)
    pub reset_epoch: u64,
}
