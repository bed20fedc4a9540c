//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Swaps and liquidity changes
//! - Cross-chain operation lifecycle
//! - Transport failures and failovers
//! - Rejected calls

use crate::error::{ExchangeError, ExchangeResult};
use crate::events::ExchangeEvent;

use axum::{routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Event metrics
    pub static ref EVENTS_EMITTED: CounterVec = register_counter_vec!(
        "dex_events_emitted_total",
        "Total events emitted by type",
        &["event_type"]
    ).unwrap();

    // Swap metrics
    pub static ref SWAPS_EXECUTED: CounterVec = register_counter_vec!(
        "dex_swaps_executed_total",
        "Total swaps executed per pool kind",
        &["pool_kind"]
    ).unwrap();

    pub static ref CALLS_REJECTED: CounterVec = register_counter_vec!(
        "dex_calls_rejected_total",
        "Total rejected calls by error kind",
        &["kind"]
    ).unwrap();

    // Cross-chain metrics
    pub static ref OPERATIONS: CounterVec = register_counter_vec!(
        "dex_cross_chain_operations_total",
        "Cross-chain operation transitions by state",
        &["state"]
    ).unwrap();

    pub static ref OPERATIONS_PENDING: GaugeVec = register_gauge_vec!(
        "dex_cross_chain_operations_pending",
        "Cross-chain operations currently pending",
        &[]
    ).unwrap();

    pub static ref DISPATCH_FAILURES: CounterVec = register_counter_vec!(
        "dex_dispatch_failures_total",
        "Message dispatch failures per provider",
        &["provider"]
    ).unwrap();

    pub static ref TRANSPORT_FAILOVERS: CounterVec = register_counter_vec!(
        "dex_transport_failovers_total",
        "Dispatches moved to the fallback provider",
        &["from", "to"]
    ).unwrap();

    pub static ref DISPATCH_LATENCY: HistogramVec = register_histogram_vec!(
        "dex_dispatch_latency_seconds",
        "Message dispatch latency",
        &["provider"],
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0]
    ).unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> ExchangeResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| ExchangeError::Internal(format!("bind {}: {}", addr, e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| ExchangeError::Internal(e.to_string()))?;

        Ok(())
    }
}

async fn metrics_handler() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

// Helper functions to record metrics

pub fn record_event(event: &ExchangeEvent) {
    EVENTS_EMITTED.with_label_values(&[event.name()]).inc();
}

pub fn record_swap(pool_kind: &str) {
    SWAPS_EXECUTED.with_label_values(&[pool_kind]).inc();
}

pub fn record_rejection(error: &ExchangeError) {
    let kind = format!("{:?}", error.kind()).to_lowercase();
    CALLS_REJECTED.with_label_values(&[&kind]).inc();
}

pub fn record_operation_state(state: &str) {
    OPERATIONS.with_label_values(&[state]).inc();
}

pub fn record_pending_operations(count: u64) {
    OPERATIONS_PENDING.with_label_values(&[]).set(count as f64);
}

pub fn record_dispatch_failure(provider: &str) {
    DISPATCH_FAILURES.with_label_values(&[provider]).inc();
}

pub fn record_failover(from: &str, to: &str) {
    TRANSPORT_FAILOVERS.with_label_values(&[from, to]).inc();
}

pub fn record_dispatch_latency(provider: &str, latency_secs: f64) {
    DISPATCH_LATENCY
        .with_label_values(&[provider])
        .observe(latency_secs);
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::Address;

    #[test]
    fn test_rejections_are_labelled_by_kind() {
        let before = CALLS_REJECTED.with_label_values(&["reentrancy"]).get();
        record_rejection(&ExchangeError::ReentrantCall);
        record_rejection(&ExchangeError::ReentrantCall);
        let after = CALLS_REJECTED.with_label_values(&["reentrancy"]).get();
        assert!(after - before >= 2.0);
    }

    #[tokio::test]
    async fn test_handler_exposes_registered_metrics() {
        record_event(&ExchangeEvent::Paused {
            account: Address::repeat_byte(1),
        });
        record_failover("alpha", "beta");
        record_pending_operations(3);

        let body = metrics_handler().await;
        assert!(body.contains("dex_events_emitted_total"));
        assert!(body.contains("dex_transport_failovers_total"));
        assert!(body.contains("dex_cross_chain_operations_pending 3"));
    }
}
