// error taxonomy for the decision engine
use redis;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RateLimiterError {
    /// Rate string did not match `"<N>/<unit>"`
    #[error("malformed rate: {0}")]
    MalformedRate(String),

    /// Algorithm tag outside the fixed set
    #[error("unknown algorithm: {0}")]
    UnknownAlgorithm(String),

    /// Cost of zero, or above the per-request ceiling
    #[error("invalid cost: {0} (must be in 1..=1000000)")]
    InvalidCost(u64),

    /// The decision was deny. Expected outcome, not a fault; callers map
    /// this to a 429-equivalent response.
    #[error("rate limit exceeded: {limit} per window, retry after {retry_after_ms}ms")]
    LimitExceeded {
        limit: u64,
        remaining: u64,
        retry_after_ms: u64,
        reset_epoch: u64,
    },

    /// Store unreachable, timed out, or returned a protocol-level error
    #[error("backend unavailable: {0}")]
    Backend(StorageError),

    /// A decision script returned an unexpected shape, or failed again
    /// after the one allowed reload retry
    #[error("script failure: {0}")]
    Script(String),
}

impl RateLimiterError {
    /// True for the expected deny outcome, false for every fault.
    pub fn is_limit_exceeded(&self) -> bool {
        matches!(self, RateLimiterError::LimitExceeded { .. })
    }
}

/// Storage-level detail carried inside `Backend`
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("authentication error: {0}")]
    Auth(String),

    #[error("command error: {0}")]
    Command(String),

    #[error("timeout: {0}")]
    Timeout(String),
}

impl From<redis::RedisError> for RateLimiterError {
    fn from(err: redis::RedisError) -> Self {
        match err.kind() {
            redis::ErrorKind::AuthenticationFailed => {
                RateLimiterError::Backend(StorageError::Auth(err.to_string()))
            }
            redis::ErrorKind::IoError | redis::ErrorKind::ClientError => {
                RateLimiterError::Backend(StorageError::Connection(err.to_string()))
            }
            _ => RateLimiterError::Backend(StorageError::Command(err.to_string())),
        }
    }
}

// define a Result type alias for convenience
pub type Result<T> = std::result::Result<T, RateLimiterError>;
