// src/scripts.rs
//
// The three decision kernels, each executed as one atomic Lua script on
// Redis. Every ARGV is an integer scaled by 1000; scripts divide last and
// never produce a fractional intermediate that crosses the store boundary.

use crate::algorithms::Algorithm;

/// Number of KEYS each script expects.
pub fn key_count(algorithm: Algorithm) -> usize {
    match algorithm {
        Algorithm::FixedWindow | Algorithm::TokenBucket => 1,
        Algorithm::SlidingWindow => 2,
    }
}

/// Lua source for the given algorithm.
pub fn source(algorithm: Algorithm) -> &'static str {
    match algorithm {
        Algorithm::FixedWindow => FIXED_WINDOW,
        Algorithm::TokenBucket => TOKEN_BUCKET,
        Algorithm::SlidingWindow => SLIDING_WINDOW,
    }
}

// KEYS: [counter_key]
// ARGV: [max_requests (scaled), window_seconds, window_end_epoch, cost (scaled)]
//
// A denied request still contributes to the counter; admission is the
// contract, accounting settles at window expiry. Expiry is bound to the
// window boundary with EXPIREAT, not to insertion time, so nodes inserting
// at slightly different moments agree on when the counter dies.
const FIXED_WINDOW: &str = r#"
local key = KEYS[1]
local max_requests = tonumber(ARGV[1])
local window_seconds = tonumber(ARGV[2])
local window_end = tonumber(ARGV[3])
local cost = tonumber(ARGV[4]) or 1000

local current = redis.call('INCRBY', key, cost)

if current == cost then
    redis.call('EXPIREAT', key, window_end)
end

local ttl = redis.call('TTL', key)
if ttl < 0 then
    ttl = window_seconds
    redis.call('EXPIREAT', key, window_end)
end

local allowed = 0
local remaining = 0

if current <= max_requests then
    allowed = 1
    remaining = max_requests - current
end

return {allowed, remaining, ttl * 1000}
"#;

// KEYS: [bucket_key]
// ARGV: [max_tokens (scaled), window_seconds, now_ms, cost (scaled)]
//
// Refill is computed in the millisecond domain straight from capacity and
// window: a pre-truncated tokens-per-second rate is zero whenever the
// window exceeds the scaled capacity (1/hour), which would starve the
// bucket forever. A missing key is a full bucket.
const TOKEN_BUCKET: &str = r#"
local key = KEYS[1]
local max_tokens = tonumber(ARGV[1])
local window_seconds = tonumber(ARGV[2])
local now_ms = tonumber(ARGV[3])
local cost = tonumber(ARGV[4]) or 1000

local state = redis.call('HMGET', key, 'tokens', 'last_refill_ms')
local tokens = tonumber(state[1])
local last_refill_ms = tonumber(state[2])

if tokens == nil or last_refill_ms == nil then
    tokens = max_tokens
    last_refill_ms = now_ms
end

local elapsed_ms = now_ms - last_refill_ms
if elapsed_ms < 0 then
    elapsed_ms = 0
end

local window_ms = window_seconds * 1000
local refill = math.floor((max_tokens * elapsed_ms) / window_ms)

-- Advance the refill clock only by the time the granted whole refill
-- actually consumed, so sub-unit credit survives a denial; a full bucket
-- has no credit to retain.
local refill_clock
tokens = tokens + refill
if tokens >= max_tokens then
    tokens = max_tokens
    refill_clock = now_ms
else
    refill_clock = last_refill_ms + math.floor((refill * window_ms) / max_tokens)
end

local allowed = 0
local retry_after_ms = 0

if tokens >= cost then
    allowed = 1
    tokens = tokens - cost
    refill_clock = now_ms
else
    local needed = cost - tokens
    retry_after_ms = math.ceil((needed * window_ms) / max_tokens)
end

redis.call('HSET', key, 'tokens', tokens, 'last_refill_ms', refill_clock)
redis.call('EXPIRE', key, 2 * window_seconds + 60)

return {allowed, tokens, retry_after_ms}
"#;

// KEYS: [current_key, previous_key]
// ARGV: [max_requests (scaled), window_seconds, now_secs, cost (scaled)]
//
// The previous window's counter decays linearly as the current window
// elapses: weighted = cur + prev * (W - elapsed) / W, in thousandths. A
// denied request does not increment. The retry hint solves for the
// earliest moment the decayed previous contribution frees enough headroom,
// clamped to [1s, end of window].
const SLIDING_WINDOW: &str = r#"
local current_key = KEYS[1]
local previous_key = KEYS[2]
local max_requests = tonumber(ARGV[1])
local window_seconds = tonumber(ARGV[2])
local now = tonumber(ARGV[3])
local cost = tonumber(ARGV[4]) or 1000

local cur = tonumber(redis.call('GET', current_key)) or 0
local prev = tonumber(redis.call('GET', previous_key)) or 0

local window_start = now - (now % window_seconds)
local elapsed = now - window_start
local remaining_in_window = window_seconds - elapsed

local prev_weight = math.floor((remaining_in_window * 1000) / window_seconds)
local weighted_prev = math.floor((prev * prev_weight) / 1000)
local weighted = cur + weighted_prev

local allowed = 0
local remaining = 0
local retry_after_ms = 0

if weighted + cost <= max_requests then
    allowed = 1
    cur = redis.call('INCRBY', current_key, cost)
    redis.call('EXPIRE', current_key, 2 * window_seconds)
    weighted = cur + weighted_prev
    remaining = max_requests - weighted
    if remaining < 0 then
        remaining = 0
    end
else
    remaining = max_requests - weighted
    if remaining < 0 then
        remaining = 0
    end
    local avail = max_requests - cost - cur
    if prev == 0 or avail < 0 then
        retry_after_ms = remaining_in_window * 1000
    else
        local target_elapsed_ms = window_seconds * 1000
            - math.floor((avail * window_seconds * 1000) / prev)
        retry_after_ms = target_elapsed_ms - elapsed * 1000
        if retry_after_ms < 1000 then
            retry_after_ms = 1000
        end
        local boundary_ms = remaining_in_window * 1000
        if retry_after_ms > boundary_ms then
            retry_after_ms = boundary_ms
        end
    end
end

return {allowed, remaining, retry_after_ms}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_algorithm_has_a_script() {
        for algorithm in Algorithm::ALL {
            assert!(!source(algorithm).trim().is_empty());
        }
    }

    #[test]
    fn key_counts_match_the_protocol() {
        assert_eq!(key_count(Algorithm::FixedWindow), 1);
        assert_eq!(key_count(Algorithm::TokenBucket), 1);
        assert_eq!(key_count(Algorithm::SlidingWindow), 2);
    }

    #[test]
    fn scripts_keep_arithmetic_integral() {
        // Divisions inside the kernels must be floored or ceiled to an
        // integer before use; a bare '/' result crossing into a redis
        // reply would reintroduce float drift.
        for algorithm in Algorithm::ALL {
            let body = source(algorithm);
            assert!(!body.contains("tostring("));
            assert!(body.contains("tonumber(ARGV[1])"));
        }
    }
}
