// src/storage/tests/redis_tests.rs
//
// Tests against a real Redis at localhost:6379. Each test skips itself
// when no store answers, so the suite stays green on machines without
// one.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::algorithms::Algorithm;
use crate::config::RateLimiterConfig;
use crate::error::RateLimiterError;
use crate::storage::{RedisStorage, StorageBackend};

fn test_config() -> RateLimiterConfig {
    RateLimiterConfig {
        store_url: "redis://localhost:6379".to_string(),
        connect_timeout: Duration::from_millis(500),
        call_timeout: Duration::from_millis(1000),
        ..RateLimiterConfig::default()
    }
}

async fn connect_or_skip() -> Option<RedisStorage> {
    match RedisStorage::connect(&test_config()).await {
        Ok(storage) => Some(storage),
        Err(_) => {
            println!("redis not available, skipping test");
            None
        }
    }
}

// Unique key namespace per test run so parallel runs never collide.
fn unique_key(label: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .subsec_nanos();
    format!("redlimit:test:{}:{}:{}", label, std::process::id(), nanos)
}

#[tokio::test]
async fn connect_fails_fast_on_bad_endpoint() {
    let config = RateLimiterConfig {
        store_url: "redis://nonexistent.invalid:6379".to_string(),
        connect_timeout: Duration::from_millis(200),
        ..RateLimiterConfig::default()
    };

    let result = RedisStorage::connect(&config).await;
    assert!(matches!(
        result,
        Err(RateLimiterError::Backend(_))
    ));
}

#[tokio::test]
async fn scripts_register_and_decide() {
    let Some(storage) = connect_or_skip().await else { return };

    let key = unique_key("fw");
    let now_secs = (storage.server_time_ms().await.unwrap() / 1000) as i64;
    let window_end = now_secs + 60;

    let first = storage
        .run_decision(
            Algorithm::FixedWindow,
            &[key.clone()],
            &[3_000, 60, window_end, 1_000],
        )
        .await
        .unwrap();
    assert!(first.allowed);
    assert_eq!(first.remaining, 2_000);
    // The script bound an expiry in the same execution.
    assert!(first.retry_after_ms > 0);

    assert_eq!(storage.fetch_counter(&key).await.unwrap(), Some(1_000));

    let removed = storage.remove(&[key]).await.unwrap();
    assert_eq!(removed, 1);
}

#[tokio::test]
async fn bucket_round_trips_through_the_hash() {
    let Some(storage) = connect_or_skip().await else { return };

    let key = unique_key("tb");
    let now_ms = storage.server_time_ms().await.unwrap() as i64;

    let reply = storage
        .run_decision(
            Algorithm::TokenBucket,
            &[key.clone()],
            &[5_000, 60, now_ms, 2_000],
        )
        .await
        .unwrap();
    assert!(reply.allowed);
    assert_eq!(reply.remaining, 3_000);

    let bucket = storage.fetch_bucket(&key).await.unwrap().unwrap();
    assert_eq!(bucket.tokens, 3_000);
    assert_eq!(bucket.last_refill_ms, now_ms as u64);

    storage.remove(&[key]).await.unwrap();
}

#[tokio::test]
async fn sliding_pair_spans_two_keys() {
    let Some(storage) = connect_or_skip().await else { return };

    let current = unique_key("sw-cur");
    let previous = unique_key("sw-prev");
    let now_secs = (storage.server_time_ms().await.unwrap() / 1000) as i64;

    let reply = storage
        .run_decision(
            Algorithm::SlidingWindow,
            &[current.clone(), previous.clone()],
            &[10_000, 60, now_secs, 1_000],
        )
        .await
        .unwrap();
    assert!(reply.allowed);

    assert_eq!(storage.fetch_counter(&current).await.unwrap(), Some(1_000));
    assert_eq!(storage.fetch_counter(&previous).await.unwrap(), None);

    storage.remove(&[current, previous]).await.unwrap();
}

// A flushed script cache (failover, FLUSHALL) must recover transparently
// through the reload-and-retry path.
#[tokio::test]
async fn noscript_recovers_via_reload() {
    let Some(storage) = connect_or_skip().await else { return };

    let client = redis::Client::open("redis://localhost:6379").unwrap();
    let mut conn = client.get_multiplexed_async_connection().await.unwrap();
    let _: () = redis::cmd("SCRIPT")
        .arg("FLUSH")
        .query_async(&mut conn)
        .await
        .unwrap();

    let key = unique_key("reload");
    let now_secs = (storage.server_time_ms().await.unwrap() / 1000) as i64;

    let reply = storage
        .run_decision(
            Algorithm::FixedWindow,
            &[key.clone()],
            &[3_000, 60, now_secs + 60, 1_000],
        )
        .await
        .unwrap();
    assert!(reply.allowed);

    storage.remove(&[key]).await.unwrap();
}

// Ten tasks race on one hourly window; the script's atomicity means
// exactly the limit is admitted.
#[tokio::test]
async fn concurrent_decisions_admit_exactly_the_limit() {
    let Some(storage) = connect_or_skip().await else { return };

    let key = unique_key("race");
    let now_secs = (storage.server_time_ms().await.unwrap() / 1000) as i64;
    let window_end = now_secs + 3_600;

    let mut handles = Vec::with_capacity(10);
    for _ in 0..10 {
        let storage = storage.clone();
        let key = key.clone();
        handles.push(tokio::spawn(async move {
            let mut admitted = 0;
            for _ in 0..10 {
                let reply = storage
                    .run_decision(
                        Algorithm::FixedWindow,
                        &[key.clone()],
                        &[50_000, 3_600, window_end, 1_000],
                    )
                    .await
                    .unwrap();
                if reply.allowed {
                    admitted += 1;
                }
            }
            admitted
        }));
    }

    let results = futures::future::join_all(handles).await;
    let admitted: i32 = results.into_iter().map(|r| r.unwrap()).sum();
    assert_eq!(admitted, 50, "exactly the limit should be admitted");

    storage.remove(&[key]).await.unwrap();
}

#[tokio::test]
async fn ping_and_server_time() {
    let Some(storage) = connect_or_skip().await else { return };

    storage.ping().await.unwrap();

    let server_ms = storage.server_time_ms().await.unwrap();
    let reported = storage.now_ms().await.unwrap();
    // The offset-adjusted clock tracks the server clock closely.
    assert!(server_ms.abs_diff(reported) < 5_000);
}
