// src/keys.rs

use sha2::{Digest, Sha256};

/// Composed keys longer than this are collapsed to a readable prefix plus
/// a hash tail; very long keys hurt store performance.
pub const MAX_KEY_LEN: usize = 200;

/// Hex characters of the SHA-256 digest kept in the tail of a bounded key.
const HASH_TAIL_LEN: usize = 16;

/// Tenant tag used when the caller supplies none.
pub const DEFAULT_TENANT: &str = "default";

/// Align a timestamp to the start of its window: `τ − (τ mod W)`.
pub fn window_start(now_secs: u64, window_secs: u64) -> u64 {
    now_secs - (now_secs % window_secs)
}

/// Key for the fixed-window counter of the window starting at `w_start`.
pub fn fixed_window_key(prefix: &str, id: &str, tenant: &str, w_start: u64) -> String {
    bound_length(format!(
        "{}:{}:{}:{}",
        prefix,
        sanitize(id),
        sanitize(tenant),
        w_start
    ))
}

/// Key for the token bucket hash. Not window-indexed; the bucket carries
/// its own refill clock.
pub fn token_bucket_key(prefix: &str, id: &str, tenant: &str) -> String {
    bound_length(format!(
        "{}:{}:{}:bucket",
        prefix,
        sanitize(id),
        sanitize(tenant)
    ))
}

/// Keys for the sliding-window pair: (current window, previous window).
pub fn sliding_window_keys(
    prefix: &str,
    id: &str,
    tenant: &str,
    w_start: u64,
    window_secs: u64,
) -> (String, String) {
    let sid = sanitize(id);
    let st = sanitize(tenant);
    let previous_start = w_start.saturating_sub(window_secs);
    let current = bound_length(format!("{}:{}:{}:sliding:{}", prefix, sid, st, w_start));
    let previous = bound_length(format!("{}:{}:{}:sliding:{}", prefix, sid, st, previous_start));
    (current, previous)
}

/// Substitute `:` and whitespace so caller-supplied identifiers cannot
/// change the key shape.
fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| if c == ':' || c.is_whitespace() { '_' } else { c })
        .collect()
}

/// Collapse keys beyond `MAX_KEY_LEN`: keep the first half human-readable
/// and replace the tail with a SHA-256 prefix over the full composed key.
fn bound_length(key: String) -> String {
    if key.len() <= MAX_KEY_LEN {
        return key;
    }

    let digest = Sha256::digest(key.as_bytes());
    let mut tail = String::with_capacity(HASH_TAIL_LEN);
    for byte in digest.iter().take(HASH_TAIL_LEN / 2) {
        tail.push_str(&format!("{:02x}", byte));
    }

    let mut cut = MAX_KEY_LEN / 2;
    while !key.is_char_boundary(cut) {
        cut -= 1;
    }

    format!("{}{}", &key[..cut], tail)
}
