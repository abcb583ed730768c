//! Model server binary: serves the bundled brightness classifier.
//!
//! Environment:
//! - `HOST`, `PORT` - bind address (default `0.0.0.0:8989`)
//! - `NUM_OF_IMAGES` - budget is 1000 predictions per image (default 100)
//! - `MAX_BODY_BYTES` - request body cap
//! - `CHANNEL_AXIS` - 1 for channels-first, 3 for channels-last
//! - `LOG_FORMAT` - `text` or `json`
//! - `RUST_LOG` - tracing filter

use std::sync::Arc;

use model_server::{config::ServerConfig, metrics, serve, telemetry, IntensityModel};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env()?;
    telemetry::init_tracing("model_server", config.log_format);

    if let Err(e) = metrics::init_metrics() {
        warn!(error = %e, "Prometheus recorder unavailable, /metrics will be empty");
    }

    let model = IntensityModel::from_env()?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        budget = config.prediction_budget(),
        "Starting model server"
    );

    serve(Arc::new(model), &config).await?;
    Ok(())
}
