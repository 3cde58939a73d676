//! Bootstrap utilities for the relay binary.
//!
//! Shared initialization code: tracing, backend connection retry and the
//! shutdown signal.

use std::future::Future;

use backon::Retryable;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use super::retry::connection_backoff;

/// Environment variable holding the log filter.
pub const LOG_ENV_VAR: &str = "SHIKSHA_LOG";

/// Environment variable selecting the log format (`json` or text).
pub const LOG_FORMAT_ENV_VAR: &str = "SHIKSHA_LOG_FORMAT";

/// Initialize tracing with the SHIKSHA_LOG environment variable.
///
/// Defaults to "info" level if SHIKSHA_LOG is not set. Set
/// SHIKSHA_LOG_FORMAT=json for structured output.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let json = std::env::var(LOG_FORMAT_ENV_VAR)
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Connect to a backend with exponential backoff retry.
///
/// # Arguments
/// * `service_name` - Human-readable name for logging (e.g., "redis")
/// * `address` - The address being connected to
/// * `connect` - Async function that attempts to establish a connection
///
/// # Returns
/// The connection on success, or the last error after max retries.
pub async fn connect_with_retry<T, E, F, Fut>(
    service_name: &str,
    address: &str,
    connect: F,
) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let connection = connect
        .retry(connection_backoff())
        .notify(|e, delay| {
            warn!(
                service = %service_name,
                address = %address,
                error = %e,
                retry_in = ?delay,
                "Connection failed, retrying"
            );
        })
        .await?;

    info!(service = %service_name, address = %address, "Connected");
    Ok(connection)
}

/// Resolve when the process receives SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!(signal = "SIGINT", "Shutdown signal received"),
        _ = terminate => info!(signal = "SIGTERM", "Shutdown signal received"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_connect_with_retry_eventually_succeeds() {
        let attempts = AtomicUsize::new(0);

        let result: Result<&str, String> = connect_with_retry("test", "mem://", || async {
            if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                Err("not yet".to_string())
            } else {
                Ok("connected")
            }
        })
        .await;

        assert_eq!(result.unwrap(), "connected");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
