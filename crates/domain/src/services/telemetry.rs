//! Logging and metrics for broker binaries. Providers count every operation
//! through the `metrics` facade; this module installs the subscriber and the
//! Prometheus recorder those events land in.

use std::env;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use crate::config::hydrate_env_file;
use crate::storage::OPERATIONS_METRIC;

const DEFAULT_LOG_FILTER: &str = "info";

static SUBSCRIBER: OnceCell<()> = OnceCell::new();
static RECORDER: OnceCell<PrometheusHandle> = OnceCell::new();

/// Observability knobs read from `<PREFIX>_*` variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    log_filter: String,
    dump_metrics: bool,
}

impl TelemetryConfig {
    /// Reads `<PREFIX>_LOG_FILTER` and `<PREFIX>_DUMP_METRICS`. Unset or blank
    /// values keep the defaults (`info`, no dump).
    pub fn from_env(prefix: &str) -> Self {
        let _ = hydrate_env_file();
        let log_filter = prefixed_var(prefix, "LOG_FILTER")
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());
        let dump_metrics = prefixed_var(prefix, "DUMP_METRICS")
            .is_some_and(|raw| matches!(raw.to_ascii_lowercase().as_str(), "1" | "true" | "yes"));
        Self {
            log_filter,
            dump_metrics,
        }
    }

    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Whether the binary should print provider counters before exiting.
    pub fn dump_metrics(&self) -> bool {
        self.dump_metrics
    }
}

fn prefixed_var(prefix: &str, suffix: &str) -> Option<String> {
    let key = format!("{}_{suffix}", prefix.trim().to_ascii_uppercase());
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Access to the installed recorder.
#[derive(Clone)]
pub struct TelemetryGuard {
    recorder: PrometheusHandle,
    dump_metrics: bool,
}

impl TelemetryGuard {
    /// Prometheus text of the provider operation counters recorded so far.
    pub fn provider_metrics(&self) -> String {
        provider_lines(&self.recorder.render())
    }

    pub fn dump_metrics(&self) -> bool {
        self.dump_metrics
    }
}

fn provider_lines(rendered: &str) -> String {
    rendered
        .lines()
        .filter(|line| line.contains(OPERATIONS_METRIC))
        .fold(String::new(), |mut out, line| {
            out.push_str(line);
            out.push('\n');
            out
        })
}

/// Installs the log subscriber and the metrics recorder. Later calls reuse
/// whatever the first call installed.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    if SUBSCRIBER.get().is_none() {
        let filter = EnvFilter::try_new(config.log_filter())
            .map_err(|err| TelemetryError::LogFilter(err.to_string()))?;
        if SUBSCRIBER.set(()).is_ok() {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(true)
                .try_init()
                .map_err(|err| TelemetryError::Subscriber(err.to_string()))?;
        }
    }

    let recorder = RECORDER
        .get_or_try_init(|| {
            PrometheusBuilder::new()
                .install_recorder()
                .map_err(|err| TelemetryError::Recorder(err.to_string()))
        })?
        .clone();

    Ok(TelemetryGuard {
        recorder,
        dump_metrics: config.dump_metrics(),
    })
}

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("invalid log filter: {0}")]
    LogFilter(String),
    #[error("failed to install log subscriber: {0}")]
    Subscriber(String),
    #[error("failed to install metrics recorder: {0}")]
    Recorder(String),
}
