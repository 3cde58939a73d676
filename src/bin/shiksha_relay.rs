//! shiksha-relay: runs the side-effect consumers until a shutdown signal.
//!
//! ## Configuration
//! ```yaml
//! messaging:
//!   type: kafka
//!   kafka:
//!     bootstrap_servers: localhost:9092
//! documents:
//!   type: mongodb
//!   uri: mongodb://localhost:27017
//! cache:
//!   type: redis
//!   url: redis://localhost:6379
//! queue:
//!   type: sqs
//!   queue_name: ingestion-jobs
//! consumers:
//!   enabled: [enrollment, cache_invalidator, course_cleanup, content, notifier]
//! ```
//!
//! The config file path may be given as the first argument or through
//! `SHIKSHA_CONFIG`. Any key can be overridden with `SHIKSHA__SECTION__KEY`.

use tracing::{error, info, warn};

use shiksha_relay::config::Config;
use shiksha_relay::runtime::Runtime;
use shiksha_relay::utils::bootstrap::init_tracing;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config_path = std::env::args().nth(1);
    let config = Config::load(config_path.as_deref()).map_err(|e| {
        error!(error = %e, "Failed to load configuration");
        e
    })?;

    let runtime = Runtime::build(config).await.map_err(|e| {
        error!(error = %e, "Failed to start");
        e
    })?;

    info!(
        consumers = ?runtime.config().consumers.enabled,
        "shiksha-relay started"
    );

    let report = runtime.run_until_shutdown().await?;
    for (resource, failure) in &report.failed {
        warn!(resource = %resource, error = %failure, "Resource did not close cleanly");
    }
    info!(
        closed = report.closed,
        failed = report.failed.len(),
        "shiksha-relay stopped"
    );
    Ok(())
}
