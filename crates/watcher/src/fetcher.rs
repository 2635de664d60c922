use anyhow::Result;
use common::error::ApiError;
use common::polymarket::PolymarketClient;
use common::types::{Market, Trade};
use std::time::Instant;

/// Where a pass gets its trades and market snapshots from.
pub trait TradeSource {
    fn fetch_recent_trades(
        &self,
        limit: u32,
        offset: u32,
    ) -> impl std::future::Future<Output = Result<Vec<Trade>>> + Send;

    fn fetch_market(
        &self,
        condition_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<Market>>> + Send;
}

fn observe<T>(endpoint: &'static str, started: Instant, res: Result<T, ApiError>) -> Result<T> {
    let ms = started.elapsed().as_secs_f64() * 1000.0;
    metrics::histogram!("pmwatch_api_latency_ms", "endpoint" => endpoint).record(ms);
    match res {
        Ok(v) => {
            metrics::counter!("pmwatch_api_requests_total", "endpoint" => endpoint, "status" => "ok").increment(1);
            Ok(v)
        }
        Err(e) => {
            metrics::counter!("pmwatch_api_requests_total", "endpoint" => endpoint, "status" => "error").increment(1);
            metrics::counter!(
                "pmwatch_api_errors_total",
                "endpoint" => endpoint,
                "kind" => e.kind().as_str()
            )
            .increment(1);
            Err(e.into())
        }
    }
}

impl TradeSource for PolymarketClient {
    async fn fetch_recent_trades(&self, limit: u32, offset: u32) -> Result<Vec<Trade>> {
        let start = Instant::now();
        let res = PolymarketClient::fetch_recent_trades(self, limit, offset).await;
        observe("trades", start, res)
    }

    async fn fetch_market(&self, condition_id: &str) -> Result<Option<Market>> {
        let start = Instant::now();
        let res = self.fetch_market_by_condition_id(condition_id).await;
        observe("markets", start, res)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusBuilder;

    #[test]
    fn test_observe_counts_errors_by_kind() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        metrics::with_local_recorder(&recorder, || {
            let ok: Result<u32> = observe("trades", Instant::now(), Ok(1));
            assert_eq!(ok.unwrap(), 1);
            let err: Result<u32> = observe(
                "markets",
                Instant::now(),
                Err(ApiError::Status {
                    status: 503,
                    url: "https://gamma-api.polymarket.com/markets".to_string(),
                    retry_after_secs: None,
                }),
            );
            assert!(err.is_err());
        });
        let rendered = handle.render();
        let line_with = |parts: &[&str]| {
            rendered
                .lines()
                .any(|l| !l.starts_with('#') && parts.iter().all(|p| l.contains(p)))
        };
        assert!(line_with(&["pmwatch_api_requests_total", "endpoint=\"trades\"", "status=\"ok\""]));
        assert!(line_with(&["pmwatch_api_requests_total", "endpoint=\"markets\"", "status=\"error\""]));
        assert!(line_with(&["pmwatch_api_errors_total", "kind=\"server_error\""]));
        assert!(line_with(&["pmwatch_api_latency_ms", "endpoint=\"trades\""]));
    }
}
