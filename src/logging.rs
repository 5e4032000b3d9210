use std::sync::Once;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// Ensure initialization happens only once
static INIT: Once = Once::new();

/// Initialize the logging system with sensible defaults.
///
/// Log level can be set using the RUST_LOG environment variable.
/// Example: RUST_LOG=debug,redlimit=trace
pub fn init() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_line_number(true),
            )
            .init();

        tracing::debug!("logging initialized");
    });
}

/// Structured event emitted per decision when `metrics_enabled` is set.
/// An external exporter tails these; the core never aggregates.
#[macro_export]
macro_rules! decision_event {
    ($algorithm:expr, $tenant:expr, $allowed:expr, $remaining:expr, $retry_after_ms:expr) => {
        tracing::info!(
            algorithm = $algorithm,
            tenant = $tenant,
            allowed = $allowed,
            remaining = $remaining,
            retry_after_ms = $retry_after_ms,
            "rate limit decision"
        )
    };
}

/// Debug-level trace of a raw store operation with timing.
#[macro_export]
macro_rules! store_op {
    ($operation:expr, $key:expr, $elapsed_ms:expr) => {
        tracing::debug!(
            operation = $operation,
            key = $key,
            elapsed_ms = $elapsed_ms,
            "store operation"
        )
    };
}
