//! Prometheus metrics for pipeline runs
//!
//! Exposes metrics for:
//! - Stage failures
//! - Transaction submission and inclusion outcomes
//! - Gas used and inclusion latency
//!
//! A one-shot process has nothing to scrape, so metrics are written in text
//! exposition format to a file (node_exporter textfile collector style).

use crate::chain::InclusionStatus;
use crate::error::Stage;

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};
use std::path::Path;
use tracing::info;

lazy_static! {
    pub static ref STAGE_FAILURES: CounterVec = register_counter_vec!(
        "pool_admin_stage_failures_total",
        "Calls aborted, by the stage that failed",
        &["network", "stage"]
    ).unwrap();

    // Transaction metrics
    pub static ref TX_SUBMITTED: CounterVec = register_counter_vec!(
        "pool_admin_transactions_submitted_total",
        "Transactions accepted by the node",
        &["network"]
    ).unwrap();

    pub static ref TX_OUTCOMES: CounterVec = register_counter_vec!(
        "pool_admin_transaction_outcomes_total",
        "Observed transaction outcomes (included, rejected, timed_out)",
        &["network", "outcome"]
    ).unwrap();

    pub static ref GAS_USED: HistogramVec = register_histogram_vec!(
        "pool_admin_gas_used",
        "Gas used by mined transactions",
        &["network"],
        vec![21_000.0, 50_000.0, 100_000.0, 200_000.0, 500_000.0, 1_000_000.0]
    ).unwrap();

    pub static ref TX_LATENCY: HistogramVec = register_histogram_vec!(
        "pool_admin_inclusion_latency_seconds",
        "Time from broadcast to a terminal inclusion status",
        &["network"],
        vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]
    ).unwrap();
}

pub fn record_stage_failure(network: &str, stage: Stage) {
    STAGE_FAILURES
        .with_label_values(&[network, stage.as_str()])
        .inc();
}

pub fn record_tx_submitted(network: &str) {
    TX_SUBMITTED.with_label_values(&[network]).inc();
}

pub fn record_inclusion(network: &str, status: &InclusionStatus, latency_secs: f64) {
    TX_OUTCOMES
        .with_label_values(&[network, status.label()])
        .inc();
    TX_LATENCY
        .with_label_values(&[network])
        .observe(latency_secs);

    if let Some(gas_used) = status.receipt().and_then(|r| r.gas_used) {
        GAS_USED
            .with_label_values(&[network])
            .observe(gas_used.low_u64() as f64);
    }
}

/// Render every registered metric in text exposition format
pub fn render() -> Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .context("Failed to encode metrics")?;
    String::from_utf8(buffer).context("Metrics are not valid UTF-8")
}

/// Write all metrics to `path`, replacing it atomically
pub fn write_textfile(path: &Path) -> Result<()> {
    let rendered = render()?;
    let staging = path.with_extension("prom.tmp");

    std::fs::write(&staging, rendered)
        .with_context(|| format!("Failed to write metrics to {:?}", staging))?;
    std::fs::rename(&staging, path)
        .with_context(|| format!("Failed to move metrics into {:?}", path))?;

    info!("Wrote metrics to {:?}", path);
    Ok(())
}
