//! Logging and metrics setup plus the metric names the pipeline emits.

use std::net::SocketAddr;

use anyhow::Context;
use flashsale_core::Outcome;
use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Outcomes produced, labelled `tier` and `outcome`.
pub const OUTCOMES_TOTAL: &str = "flashsale_outcomes_total";
/// Work dropped at a stage, labelled `stage` and `reason`.
pub const DROPPED_TOTAL: &str = "flashsale_dropped_total";
/// End-to-end duration of front-tier purchase calls.
pub const CALL_DURATION_SECONDS: &str = "flashsale_call_duration_seconds";

const DEFAULT_FILTER: &str = "info";

/// Installs the global `tracing` subscriber.
///
/// The filter comes from `RUST_LOG` and falls back to `info`.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_tracing(json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .try_init()
            .context("installing JSON tracing subscriber")?;
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .try_init()
            .context("installing tracing subscriber")?;
    }
    Ok(())
}

/// Starts the Prometheus scrape listener on `addr` and registers descriptions.
///
/// Must be called from inside a tokio runtime.
///
/// # Errors
///
/// Returns an error if the exporter cannot be built or a recorder is
/// already installed.
pub fn install_metrics(addr: SocketAddr) -> anyhow::Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            Matcher::Suffix("duration_seconds".to_string()),
            &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
        )
        .context("configuring histogram buckets")?
        .install()
        .context("installing Prometheus exporter")?;

    describe_metrics();
    tracing::info!(%addr, "metrics listener started");
    Ok(())
}

fn describe_metrics() {
    describe_counter!(OUTCOMES_TOTAL, "Purchase outcomes by tier and outcome code");
    describe_counter!(DROPPED_TOTAL, "Work items dropped by a pipeline stage");
    describe_histogram!(CALL_DURATION_SECONDS, "Front-tier purchase call duration");
}

/// Counts one outcome produced by `tier` (`app` or `core`).
pub fn record_outcome(tier: &'static str, outcome: Outcome) {
    metrics::counter!(OUTCOMES_TOTAL, "tier" => tier, "outcome" => outcome.as_str()).increment(1);
}

/// Counts one item dropped by `stage` for `reason`.
pub fn record_drop(stage: &'static str, reason: &'static str) {
    metrics::counter!(DROPPED_TOTAL, "stage" => stage, "reason" => reason).increment(1);
}
