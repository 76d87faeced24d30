//! Broker bootstrap: selects the configured persistence backend, prepares it
//! and reports what the stored configuration contains.

mod summary;

use std::io;

use thiserror::Error;
use tracing::{debug, info};
use usb_domain::config::{ConfigError, ProviderConfig};
use usb_domain::services::telemetry::{init_telemetry, TelemetryConfig, TelemetryError};
use usb_storage::{select_provider, StorageError};

use summary::ConfigSummary;

#[derive(Debug, Error)]
enum BootstrapError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error("failed to render summary: {0}")]
    Render(#[from] serde_json::Error),
}

#[tokio::main]
async fn main() -> io::Result<()> {
    if let Err(err) = bootstrap().await {
        eprintln!("[broker] bootstrap failed: {err}");
        return Err(io::Error::other(err.to_string()));
    }

    Ok(())
}

async fn bootstrap() -> Result<(), BootstrapError> {
    let config = ProviderConfig::load_from_env()?;
    let telemetry_config = TelemetryConfig::from_env("BROKER");
    let telemetry = init_telemetry(&telemetry_config)?;

    let provider = select_provider(&config).await?;
    provider.initialize_configuration().await?;
    let loaded = provider.load_configuration().await?;

    let summary = ConfigSummary::from_config(&loaded);
    info!(
        backend = %config.backend(),
        instances = summary.instances.len(),
        dials = summary.dial_count(),
        "configuration loaded"
    );
    println!("{}", serde_json::to_string_pretty(&summary)?);

    let counters = telemetry.provider_metrics();
    if telemetry.dump_metrics() {
        eprint!("{counters}");
    } else {
        debug!(%counters, "provider operations");
    }
    Ok(())
}
