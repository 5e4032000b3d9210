// src/bin/ratelimit_cli.rs

use std::time::{Duration, Instant};
use structopt::StructOpt;
use tokio::time;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use redlimit::{
    Algorithm, MemoryStorage, RateLimiter, RateLimiterConfig, RateLimiterError, StorageBackend,
};

#[derive(Debug, StructOpt)]
#[structopt(
    name = "ratelimit_cli",
    about = "Drive the rate limiting engine against a memory or redis backend"
)]
struct Opt {
    /// Rate limiting algorithm to use
    #[structopt(short, long, possible_values = &["fixed_window", "token_bucket", "sliding_window"], default_value = "fixed_window")]
    algorithm: String,

    /// Rate policy, e.g. "100/minute"
    #[structopt(short, long, default_value = "10/minute")]
    rate: String,

    /// Identifier to rate limit
    #[structopt(short, long, default_value = "demo_user")]
    key: String,

    /// Tenant tag (isolates state per tenant)
    #[structopt(long)]
    tenant: Option<String>,

    /// Cost charged per request
    #[structopt(long, default_value = "1")]
    cost: u64,

    /// Storage backend to use
    #[structopt(short, long, possible_values = &["memory", "redis"], default_value = "memory")]
    storage: String,

    /// Redis URL (when using the redis backend)
    #[structopt(long, default_value = "redis://localhost:6379")]
    redis_url: String,

    /// Traffic pattern to simulate
    #[structopt(long, possible_values = &["burst", "steady"], default_value = "burst")]
    simulation: String,

    /// Number of requests to simulate
    #[structopt(short = "n", long, default_value = "20")]
    num_requests: usize,

    /// Time between requests in milliseconds (steady mode)
    #[structopt(short = "t", long, default_value = "100")]
    request_interval_ms: u64,

    /// Verbosity level
    #[structopt(short, long, parse(from_occurrences))]
    verbose: usize,

    /// Disable logs
    #[structopt(long)]
    disable_logs: bool,
}

#[derive(Debug, serde::Serialize)]
struct Summary {
    algorithm: Algorithm,
    rate: String,
    requests: usize,
    admitted: usize,
    denied: usize,
    elapsed_ms: u64,
    last_retry_after_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    let opt = Opt::from_args();

    if !opt.disable_logs {
        let log_level = match opt.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(EnvFilter::new(format!("redlimit={},warn", log_level)))
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    let algorithm: Algorithm = opt.algorithm.parse()?;
    let config = RateLimiterConfig {
        store_url: opt.redis_url.clone(),
        default_algorithm: algorithm,
        ..RateLimiterConfig::default()
    };

    let summary = match opt.storage.as_str() {
        "redis" => {
            info!(url = %opt.redis_url, "using redis backend");
            let limiter = RateLimiter::connect(config).await?;
            let summary = run_simulation(&limiter, &opt, algorithm).await?;
            limiter.close().await;
            summary
        }
        _ => {
            info!("using in-memory backend");
            let limiter = RateLimiter::with_storage(MemoryStorage::new(), config);
            run_simulation(&limiter, &opt, algorithm).await?
        }
    };

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn run_simulation<S: StorageBackend>(
    limiter: &RateLimiter<S>,
    opt: &Opt,
    algorithm: Algorithm,
) -> Result<Summary, RateLimiterError> {
    let started = Instant::now();
    let mut admitted = 0;
    let mut denied = 0;
    let mut last_retry_after_ms = 0;

    for i in 0..opt.num_requests {
        let result = limiter
            .check_with_info(
                &opt.key,
                &opt.rate,
                Some(algorithm),
                opt.tenant.as_deref(),
                opt.cost,
            )
            .await?;

        if result.allowed {
            admitted += 1;
            info!(
                request = i + 1,
                remaining = result.remaining,
                "admitted"
            );
        } else {
            denied += 1;
            last_retry_after_ms = result.retry_after_ms;
            warn!(
                request = i + 1,
                retry_after_ms = result.retry_after_ms,
                "denied"
            );
        }

        if opt.simulation == "steady" && i + 1 < opt.num_requests {
            time::sleep(Duration::from_millis(opt.request_interval_ms)).await;
        }
    }

    Ok(Summary {
        algorithm,
        rate: opt.rate.clone(),
        requests: opt.num_requests,
        admitted,
        denied,
        elapsed_ms: started.elapsed().as_millis() as u64,
        last_retry_after_ms,
    })
}
