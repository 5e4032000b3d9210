// src/limiter.rs

use tracing::debug;

use crate::algorithms::{Algorithm, CheckResult, Usage, MAX_COST, SCALE};
use crate::config::RateLimiterConfig;
use crate::decision_event;
use crate::error::{RateLimiterError, Result};
use crate::keys;
use crate::rate::Rate;
use crate::storage::{RedisStorage, ScriptReply, StorageBackend};

/// All recognized window sizes, for rate-less resets.
const ALL_WINDOWS: [u64; 4] = [1, 60, 3600, 86400];

/// The decision engine: parses the rate, derives keys, executes the
/// algorithm's script atomically on the store, and rescales the reply to
/// caller units. Holds no decision state of its own.
#[derive(Debug)]
pub struct RateLimiter<S: StorageBackend> {
    storage: S,
    config: RateLimiterConfig,
}

impl RateLimiter<RedisStorage> {
    /// Connect to Redis and register the decision scripts.
    pub async fn connect(config: RateLimiterConfig) -> Result<Self> {
        let storage = RedisStorage::connect(&config).await?;
        Ok(Self { storage, config })
    }

    /// Release the connection and invalidate cached script handles.
    pub async fn close(self) {
        self.storage.invalidate_scripts();
        debug!("rate limiter closed");
    }
}

impl<S: StorageBackend> RateLimiter<S> {
    /// Bind the engine to an already-constructed backend.
    pub fn with_storage(storage: S, config: RateLimiterConfig) -> Self {
        Self { storage, config }
    }

    /// Check whether a request may proceed, consuming `cost` units on
    /// admission. Fails with `LimitExceeded` on denial.
    pub async fn check(
        &self,
        id: &str,
        rate: &str,
        algorithm: Option<Algorithm>,
        tenant: Option<&str>,
        cost: u64,
    ) -> Result<()> {
        let result = self.check_with_info(id, rate, algorithm, tenant, cost).await?;
        if result.allowed {
            Ok(())
        } else {
            Err(RateLimiterError::LimitExceeded {
                limit: result.limit,
                remaining: result.remaining,
                retry_after_ms: result.retry_after_ms,
                reset_epoch: result.reset_epoch,
            })
        }
    }

    /// Like `check`, but a denial is a normal `CheckResult` rather than an
    /// error. One store round trip either way.
    pub async fn check_with_info(
        &self,
        id: &str,
        rate: &str,
        algorithm: Option<Algorithm>,
        tenant: Option<&str>,
        cost: u64,
    ) -> Result<CheckResult> {
        if cost == 0 || cost > MAX_COST {
            return Err(RateLimiterError::InvalidCost(cost));
        }
        let rate = Rate::parse(rate)?;
        let algorithm = algorithm.unwrap_or(self.config.default_algorithm);
        let tenant = tenant.unwrap_or(keys::DEFAULT_TENANT);

        let limit_fp = scaled(rate.limit)?;
        let cost_fp = (cost * SCALE) as i64;

        let now_ms = self.storage.now_ms().await?;
        let now_secs = now_ms / 1000;
        let prefix = &self.config.key_prefix;

        let (reply, reset_epoch) = match algorithm {
            Algorithm::FixedWindow => {
                let w_start = keys::window_start(now_secs, rate.window_secs);
                let w_end = w_start + rate.window_secs;
                let key = keys::fixed_window_key(prefix, id, tenant, w_start);
                let argv = [limit_fp, rate.window_secs as i64, w_end as i64, cost_fp];
                let reply = self
                    .storage
                    .run_decision(algorithm, &[key], &argv)
                    .await?;
                (reply, w_end)
            }
            Algorithm::TokenBucket => {
                let key = keys::token_bucket_key(prefix, id, tenant);
                let argv = [limit_fp, rate.window_secs as i64, now_ms as i64, cost_fp];
                let reply = self
                    .storage
                    .run_decision(algorithm, &[key], &argv)
                    .await?;
                let reset_epoch = now_secs + reply.retry_after_ms / 1000;
                (reply, reset_epoch)
            }
            Algorithm::SlidingWindow => {
                let w_start = keys::window_start(now_secs, rate.window_secs);
                let (current, previous) =
                    keys::sliding_window_keys(prefix, id, tenant, w_start, rate.window_secs);
                let argv = [limit_fp, rate.window_secs as i64, now_secs as i64, cost_fp];
                let reply = self
                    .storage
                    .run_decision(algorithm, &[current, previous], &argv)
                    .await?;
                (reply, w_start + rate.window_secs)
            }
        };

        let result = assemble(rate.limit, reply, reset_epoch);

        if self.config.metrics_enabled {
            decision_event!(
                algorithm.as_str(),
                tenant,
                result.allowed,
                result.remaining,
                result.retry_after_ms
            );
        }

        Ok(result)
    }

    /// Read-only usage snapshot for the algorithm's key(s). Never mutates
    /// stored state; a token bucket is refilled virtually.
    pub async fn get_usage(
        &self,
        id: &str,
        rate: &str,
        algorithm: Option<Algorithm>,
        tenant: Option<&str>,
    ) -> Result<Usage> {
        let rate = Rate::parse(rate)?;
        let algorithm = algorithm.unwrap_or(self.config.default_algorithm);
        let tenant = tenant.unwrap_or(keys::DEFAULT_TENANT);

        let limit_fp = scaled(rate.limit)? as u64;
        let now_ms = self.storage.now_ms().await?;
        let now_secs = now_ms / 1000;
        let prefix = &self.config.key_prefix;

        match algorithm {
            Algorithm::FixedWindow => {
                let w_start = keys::window_start(now_secs, rate.window_secs);
                let key = keys::fixed_window_key(prefix, id, tenant, w_start);
                let counted = self.storage.fetch_counter(&key).await?.unwrap_or(0);
                let current = counted / SCALE;
                Ok(Usage {
                    algorithm,
                    current,
                    limit: rate.limit,
                    remaining: rate.limit.saturating_sub(current),
                    window_secs: rate.window_secs,
                    reset_epoch: w_start + rate.window_secs,
                })
            }
            Algorithm::TokenBucket => {
                let key = keys::token_bucket_key(prefix, id, tenant);
                let tokens_fp = match self.storage.fetch_bucket(&key).await? {
                    Some(bucket) => {
                        let elapsed_ms = now_ms.saturating_sub(bucket.last_refill_ms);
                        let refill = (limit_fp as u128 * elapsed_ms as u128)
                            / (rate.window_secs as u128 * 1000);
                        (bucket.tokens as u128 + refill).min(limit_fp as u128) as u64
                    }
                    None => limit_fp,
                };
                let remaining = tokens_fp / SCALE;
                let missing_fp = limit_fp - tokens_fp;
                let secs_to_full = (missing_fp as u128 * rate.window_secs as u128)
                    .div_ceil(limit_fp as u128) as u64;
                Ok(Usage {
                    algorithm,
                    current: rate.limit.saturating_sub(remaining),
                    limit: rate.limit,
                    remaining,
                    window_secs: rate.window_secs,
                    reset_epoch: now_secs + secs_to_full,
                })
            }
            Algorithm::SlidingWindow => {
                let w_start = keys::window_start(now_secs, rate.window_secs);
                let (current_key, previous_key) =
                    keys::sliding_window_keys(prefix, id, tenant, w_start, rate.window_secs);
                let cur = self.storage.fetch_counter(&current_key).await?.unwrap_or(0);
                let prev = self.storage.fetch_counter(&previous_key).await?.unwrap_or(0);

                let elapsed = now_secs - w_start;
                let remaining_in_window = rate.window_secs - elapsed;
                let prev_weight = (remaining_in_window * 1000) / rate.window_secs;
                let weighted = cur + (prev as u128 * prev_weight as u128 / 1000) as u64;

                let current = weighted / SCALE;
                Ok(Usage {
                    algorithm,
                    current,
                    limit: rate.limit,
                    remaining: rate.limit.saturating_sub(current),
                    window_secs: rate.window_secs,
                    reset_epoch: w_start + rate.window_secs,
                })
            }
        }
    }

    /// Delete the rate limit state behind an identifier. With no rate, all
    /// recognized window sizes are swept; with no algorithm, all three
    /// algorithms are. Resetting absent keys is a no-op that succeeds.
    pub async fn reset(
        &self,
        id: &str,
        rate: Option<&str>,
        algorithm: Option<Algorithm>,
        tenant: Option<&str>,
    ) -> Result<bool> {
        let tenant = tenant.unwrap_or(keys::DEFAULT_TENANT);
        let windows: Vec<u64> = match rate {
            Some(rate) => vec![Rate::parse(rate)?.window_secs],
            None => ALL_WINDOWS.to_vec(),
        };
        let algorithms: Vec<Algorithm> = match algorithm {
            Some(algorithm) => vec![algorithm],
            None => Algorithm::ALL.to_vec(),
        };

        let now_secs = self.storage.now_ms().await? / 1000;
        let prefix = &self.config.key_prefix;
        let mut targets = Vec::new();

        for algorithm in algorithms {
            match algorithm {
                Algorithm::FixedWindow => {
                    for &window_secs in &windows {
                        let w_start = keys::window_start(now_secs, window_secs);
                        targets.push(keys::fixed_window_key(prefix, id, tenant, w_start));
                        targets.push(keys::fixed_window_key(
                            prefix,
                            id,
                            tenant,
                            w_start.saturating_sub(window_secs),
                        ));
                    }
                }
                Algorithm::TokenBucket => {
                    targets.push(keys::token_bucket_key(prefix, id, tenant));
                }
                Algorithm::SlidingWindow => {
                    for &window_secs in &windows {
                        let w_start = keys::window_start(now_secs, window_secs);
                        let (current, previous) =
                            keys::sliding_window_keys(prefix, id, tenant, w_start, window_secs);
                        targets.push(current);
                        targets.push(previous);
                    }
                }
            }
        }

        targets.dedup();
        let removed = self.storage.remove(&targets).await?;
        debug!(id, removed, "rate limit reset");
        Ok(removed > 0)
    }

    /// True when the backing store answers a liveness probe.
    pub async fn health_check(&self) -> bool {
        self.storage.ping().await.is_ok()
    }
}

fn assemble(limit: u64, reply: ScriptReply, reset_epoch: u64) -> CheckResult {
    CheckResult {
        allowed: reply.allowed,
        limit,
        remaining: reply.remaining / SCALE,
        retry_after_ms: reply.retry_after_ms,
        reset_epoch,
    }
}

fn scaled(limit: u64) -> Result<i64> {
    limit
        .checked_mul(SCALE)
        .filter(|fp| *fp <= i64::MAX as u64)
        .map(|fp| fp as i64)
        .ok_or_else(|| {
            RateLimiterError::MalformedRate(format!("limit {} too large to scale", limit))
        })
}
