// src/storage/memory.rs

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::algorithms::Algorithm;
use crate::error::{RateLimiterError, Result};
use crate::storage::{BucketState, ScriptReply, StorageBackend};

/// Clock driving the in-memory backend. `System` follows the wall clock;
/// `Manual` starts at a fixed instant and only moves when told to, which
/// is what scenario tests drive.
#[derive(Debug, Clone)]
pub enum MemoryClock {
    System,
    Manual(Arc<AtomicU64>),
}

impl MemoryClock {
    pub fn manual(start_ms: u64) -> Self {
        MemoryClock::Manual(Arc::new(AtomicU64::new(start_ms)))
    }

    pub fn now_ms(&self) -> u64 {
        match self {
            MemoryClock::System => SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or(Duration::from_secs(0))
                .as_millis() as u64,
            MemoryClock::Manual(ms) => ms.load(Ordering::SeqCst),
        }
    }

    /// Move a manual clock forward. No effect on the system clock.
    pub fn advance(&self, delta: Duration) {
        if let MemoryClock::Manual(ms) = self {
            ms.fetch_add(delta.as_millis() as u64, Ordering::SeqCst);
        }
    }

    /// Jump a manual clock to an absolute instant. No effect on the
    /// system clock.
    pub fn set_ms(&self, now_ms: u64) {
        if let MemoryClock::Manual(ms) = self {
            ms.store(now_ms, Ordering::SeqCst);
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct CounterEntry {
    value: i64,
    expires_at_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy)]
struct BucketEntry {
    tokens: i64,
    last_refill_ms: u64,
    expires_at_ms: u64,
}

#[derive(Debug, Default)]
struct MemoryState {
    counters: HashMap<String, CounterEntry>,
    buckets: HashMap<String, BucketEntry>,
}

/// In-process backend executing the same decision semantics as the Lua
/// scripts, under a single lock (the atomicity analogue of the store's
/// single-threaded script execution). Useful for development, tests, and
/// single-node deployments.
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    state: Arc<Mutex<MemoryState>>,
    clock: MemoryClock,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::with_clock(MemoryClock::System)
    }

    pub fn with_clock(clock: MemoryClock) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            clock,
        }
    }

    pub fn clock(&self) -> &MemoryClock {
        &self.clock
    }

    fn decide_fixed_window(
        state: &mut MemoryState,
        key: &str,
        argv: &[i64],
        now_ms: u64,
    ) -> ScriptReply {
        let (limit, window_secs, window_end, cost) = (argv[0], argv[1], argv[2], argv[3]);

        let entry = state
            .counters
            .entry(key.to_string())
            .or_insert(CounterEntry {
                value: 0,
                expires_at_ms: None,
            });
        entry.value += cost;

        if entry.value == cost {
            entry.expires_at_ms = Some(window_end as u64 * 1000);
        }

        let ttl_secs = match entry.expires_at_ms {
            Some(expires_at_ms) => {
                // Same rounding as a TTL reply: nearest second.
                (expires_at_ms.saturating_sub(now_ms) + 500) / 1000
            }
            None => {
                entry.expires_at_ms = Some(window_end as u64 * 1000);
                window_secs as u64
            }
        };

        let allowed = entry.value <= limit;
        ScriptReply {
            allowed,
            remaining: (limit - entry.value).max(0) as u64,
            retry_after_ms: ttl_secs * 1000,
        }
    }

    fn decide_token_bucket(
        state: &mut MemoryState,
        key: &str,
        argv: &[i64],
    ) -> ScriptReply {
        let (max_tokens, window_secs, now_ms, cost) = (argv[0], argv[1], argv[2], argv[3]);

        let entry = state.buckets.entry(key.to_string()).or_insert(BucketEntry {
            tokens: max_tokens,
            last_refill_ms: now_ms as u64,
            expires_at_ms: 0,
        });

        let elapsed_ms = (now_ms - entry.last_refill_ms as i64).max(0);
        let window_ms = window_secs as i128 * 1000;
        let refill = ((max_tokens as i128 * elapsed_ms as i128) / window_ms) as i64;

        // Sub-unit refill credit survives a denial: the clock advances
        // only by the time the granted whole refill consumed.
        let mut tokens = entry.tokens + refill;
        let mut refill_clock;
        if tokens >= max_tokens {
            tokens = max_tokens;
            refill_clock = now_ms as u64;
        } else {
            refill_clock = entry.last_refill_ms
                + ((refill as i128 * window_ms) / max_tokens as i128) as u64;
        }

        let mut allowed = false;
        let mut retry_after_ms = 0;
        if tokens >= cost {
            allowed = true;
            tokens -= cost;
            refill_clock = now_ms as u64;
        } else {
            let needed = (cost - tokens) as i128;
            retry_after_ms =
                ((needed * window_ms + max_tokens as i128 - 1) / max_tokens as i128) as u64;
        }

        entry.tokens = tokens;
        entry.last_refill_ms = refill_clock;
        entry.expires_at_ms = now_ms as u64 + (2 * window_secs as u64 + 60) * 1000;

        ScriptReply {
            allowed,
            remaining: tokens.max(0) as u64,
            retry_after_ms,
        }
    }

    fn decide_sliding_window(
        state: &mut MemoryState,
        keys: &[String],
        argv: &[i64],
        now_ms: u64,
    ) -> ScriptReply {
        let (limit, window_secs, now, cost) = (argv[0], argv[1], argv[2], argv[3]);

        let prev = state
            .counters
            .get(&keys[1])
            .map(|entry| entry.value)
            .unwrap_or(0);
        let cur = state
            .counters
            .get(&keys[0])
            .map(|entry| entry.value)
            .unwrap_or(0);

        let window_start = now - (now % window_secs);
        let elapsed = now - window_start;
        let remaining_in_window = window_secs - elapsed;

        let prev_weight = (remaining_in_window * 1000) / window_secs;
        let weighted_prev = (prev * prev_weight) / 1000;
        let weighted = cur + weighted_prev;

        if weighted + cost <= limit {
            let entry = state
                .counters
                .entry(keys[0].clone())
                .or_insert(CounterEntry {
                    value: 0,
                    expires_at_ms: None,
                });
            entry.value += cost;
            entry.expires_at_ms = Some(now_ms + 2 * window_secs as u64 * 1000);
            let weighted = entry.value + weighted_prev;
            ScriptReply {
                allowed: true,
                remaining: (limit - weighted).max(0) as u64,
                retry_after_ms: 0,
            }
        } else {
            let avail = limit - cost - cur;
            let retry_after_ms = if prev == 0 || avail < 0 {
                remaining_in_window as u64 * 1000
            } else {
                let target_elapsed_ms =
                    window_secs * 1000 - (avail * window_secs * 1000) / prev;
                let wait_ms = target_elapsed_ms - elapsed * 1000;
                wait_ms.max(1000).min(remaining_in_window * 1000) as u64
            };
            ScriptReply {
                allowed: false,
                remaining: (limit - weighted).max(0) as u64,
                retry_after_ms,
            }
        }
    }

    fn purge_counter(state: &mut MemoryState, key: &str, now_ms: u64) {
        if let Some(entry) = state.counters.get(key) {
            if matches!(entry.expires_at_ms, Some(expires) if expires <= now_ms) {
                state.counters.remove(key);
            }
        }
    }

    fn purge_bucket(state: &mut MemoryState, key: &str, now_ms: u64) {
        if let Some(entry) = state.buckets.get(key) {
            if entry.expires_at_ms <= now_ms {
                state.buckets.remove(key);
            }
        }
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn run_decision(
        &self,
        algorithm: Algorithm,
        keys: &[String],
        argv: &[i64],
    ) -> Result<ScriptReply> {
        let expected_keys = crate::scripts::key_count(algorithm);
        if keys.len() != expected_keys || argv.len() != 4 {
            return Err(RateLimiterError::Script(format!(
                "{}: expected {} keys and 4 args, got {} and {}",
                algorithm,
                expected_keys,
                keys.len(),
                argv.len()
            )));
        }

        let now_ms = self.clock.now_ms();
        let mut state = self.state.lock().unwrap();

        for key in keys {
            Self::purge_counter(&mut state, key, now_ms);
        }

        let reply = match algorithm {
            Algorithm::FixedWindow => {
                Self::decide_fixed_window(&mut state, &keys[0], argv, now_ms)
            }
            Algorithm::TokenBucket => {
                Self::purge_bucket(&mut state, &keys[0], now_ms);
                Self::decide_token_bucket(&mut state, &keys[0], argv)
            }
            Algorithm::SlidingWindow => {
                Self::decide_sliding_window(&mut state, keys, argv, now_ms)
            }
        };

        Ok(reply)
    }

    async fn fetch_counter(&self, key: &str) -> Result<Option<u64>> {
        let now_ms = self.clock.now_ms();
        let mut state = self.state.lock().unwrap();
        Self::purge_counter(&mut state, key, now_ms);
        Ok(state.counters.get(key).map(|entry| entry.value.max(0) as u64))
    }

    async fn fetch_bucket(&self, key: &str) -> Result<Option<BucketState>> {
        let now_ms = self.clock.now_ms();
        let mut state = self.state.lock().unwrap();
        Self::purge_bucket(&mut state, key, now_ms);
        Ok(state.buckets.get(key).map(|entry| BucketState {
            tokens: entry.tokens.max(0) as u64,
            last_refill_ms: entry.last_refill_ms,
        }))
    }

    async fn remove(&self, keys: &[String]) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        let mut removed = 0;
        for key in keys {
            if state.counters.remove(key).is_some() {
                removed += 1;
            }
            if state.buckets.remove(key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn now_ms(&self) -> Result<u64> {
        Ok(self.clock.now_ms())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
