use anyhow::Result;
use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;

pub fn describe() {
    describe_counter!(
        "pmwatch_trades_fetched_total",
        "Trades returned by the Data API across all pages."
    );
    describe_counter!(
        "pmwatch_trades_skipped_total",
        "Fetched trades skipped by the dedup gate, by reason."
    );
    describe_counter!(
        "pmwatch_alerts_emitted_total",
        "Alerts emitted, by scoring strategy."
    );
    describe_counter!("pmwatch_api_requests_total", "Number of API requests made.");
    describe_counter!(
        "pmwatch_api_errors_total",
        "Failed API requests, by endpoint and error kind."
    );
    describe_histogram!(
        "pmwatch_api_latency_ms",
        "API request latency in milliseconds."
    );
    describe_counter!(
        "pmwatch_notify_failures_total",
        "Webhook notifications that could not be delivered."
    );
    describe_counter!(
        "pmwatch_state_records_dropped_total",
        "Malformed persisted records dropped while loading state."
    );
    describe_counter!(
        "pmwatch_log_errors_total",
        "ERROR-level log events emitted."
    );
    describe_counter!(
        "pmwatch_iterations_total",
        "Completed watcher iterations, by status."
    );
}

pub fn install_prometheus(port: u16) -> Result<PrometheusHandle> {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    Ok(PrometheusBuilder::new()
        .with_http_listener(addr)
        .install_recorder()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prometheus_handle_renders_metric_names() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            describe();
            metrics::counter!("pmwatch_alerts_emitted_total", "strategy" => "trade").increment(2);
            metrics::counter!("pmwatch_iterations_total", "status" => "completed").increment(1);
        });

        let rendered = handle.render();
        assert!(rendered.contains("pmwatch_alerts_emitted_total"));
        assert!(rendered.contains("strategy=\"trade\""));
        assert!(rendered.contains("pmwatch_iterations_total"));
    }
}
