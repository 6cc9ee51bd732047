// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize telemetry (logs + metrics). Safe to call more than once.
pub fn init_telemetry() {
    // 1. Logs
    let logs = tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "ferry_node=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .try_init();
    if logs.is_err() {
        tracing::warn!("Tracing subscriber already installed");
    }

    // 2. Metrics
    if PROM_HANDLE.get().is_some() {
        tracing::warn!("Prometheus recorder already installed. Telemetry re-initialized?");
        return;
    }
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            let _ = PROM_HANDLE.set(handle);
        }
        Err(e) => {
            tracing::warn!("Failed to install Prometheus recorder: {}", e);
            return;
        }
    }

    metrics::describe_counter!("ferry_blocks_received_total", "Blocks received from providers");
    metrics::describe_counter!("ferry_bytes_received_total", "Bytes received from providers");
    metrics::describe_counter!("ferry_vouchers_issued_total", "Payment vouchers issued");
    metrics::describe_counter!("ferry_voucher_shortfalls_total", "Voucher requests refused for lack of funds");
    metrics::describe_counter!("ferry_deals_completed_total", "Deals that reached Completed");
    metrics::describe_counter!("ferry_deals_failed_total", "Deals that ended Rejected or in Failure");
    metrics::describe_counter!("ferry_exchange_requests_total", "Block-exchange requests opened");
    metrics::describe_histogram!("ferry_retrieval_duration_seconds", "Time from resolve to a terminal deal state");

    metrics::gauge!("ferry_node_up", 1.0);
}

/// Get the Prometheus handle to render metrics
pub fn get_metrics() -> String {
    if let Some(handle) = PROM_HANDLE.get() {
        handle.render()
    } else {
        "# metrics not initialized".to_string()
    }
}
