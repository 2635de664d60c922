use crate::config;
use crate::error::ApiError;
use crate::types::{ApiTrade, GammaMarket, Market, Trade};
use reqwest::Url;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Hard page size cap enforced by the Data API.
pub const MAX_TRADES_LIMIT: u32 = 500;

pub struct PolymarketClient {
    http: reqwest::Client,
    data_api_url: String,
    gamma_api_url: String,
    min_interval: Duration,
    max_retries: u32,
    backoff_base: Duration,
    last_request: Mutex<Option<Instant>>,
}

/// Parse `raw` and require an absolute `https://` URL with a host.
pub fn validate_https_url(raw: &str) -> Result<Url, ApiError> {
    let url = Url::parse(raw).map_err(|e| ApiError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    if !url.scheme().eq_ignore_ascii_case("https") {
        return Err(ApiError::InvalidUrl {
            url: raw.to_string(),
            reason: "only https:// URLs are allowed".to_string(),
        });
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(ApiError::InvalidUrl {
            url: raw.to_string(),
            reason: "URL must include a hostname".to_string(),
        });
    }
    Ok(url)
}

fn secs(v: f64) -> Duration {
    if v.is_finite() && v > 0.0 {
        Duration::from_secs_f64(v)
    } else {
        Duration::ZERO
    }
}

impl PolymarketClient {
    pub fn new(settings: &config::Polymarket) -> Result<Self, ApiError> {
        let data_api_url = settings.data_api_url.trim_end_matches('/').to_string();
        let gamma_api_url = settings.gamma_api_url.trim_end_matches('/').to_string();
        validate_https_url(&data_api_url)?;
        validate_https_url(&gamma_api_url)?;

        let http = reqwest::Client::builder()
            .timeout(secs(settings.timeout_secs))
            .user_agent(settings.user_agent.clone())
            .build()?;

        Ok(Self {
            http,
            data_api_url,
            gamma_api_url,
            min_interval: secs(settings.min_request_interval_secs),
            max_retries: settings.max_retries,
            backoff_base: secs(settings.backoff_base_secs),
            last_request: Mutex::new(None),
        })
    }

    pub fn trades_url(&self, limit: u32, offset: u32) -> Result<Url, ApiError> {
        let mut url = validate_https_url(&format!("{}/trades", self.data_api_url))?;
        url.query_pairs_mut()
            .append_pair("limit", &limit.min(MAX_TRADES_LIMIT).to_string())
            .append_pair("offset", &offset.to_string());
        Ok(url)
    }

    pub fn market_url(&self, condition_id: &str) -> Result<Url, ApiError> {
        let mut url = validate_https_url(&format!("{}/markets", self.gamma_api_url))?;
        url.query_pairs_mut()
            .append_pair("condition_ids", condition_id)
            .append_pair("limit", "1")
            .append_pair("offset", "0");
        Ok(url)
    }

    /// Most recent trades across all markets, newest first as returned by the API.
    pub async fn fetch_recent_trades(&self, limit: u32, offset: u32) -> Result<Vec<Trade>, ApiError> {
        let url = self.trades_url(limit, offset)?;
        let body = self.get_json(url).await?;
        Ok(parse_trades(body))
    }

    pub async fn fetch_market_by_condition_id(
        &self,
        condition_id: &str,
    ) -> Result<Option<Market>, ApiError> {
        let url = self.market_url(condition_id)?;
        let body = self.get_json(url).await?;
        Ok(parse_market(body, condition_id))
    }

    async fn wait_turn(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    fn backoff_for(&self, attempt: u32, err: &ApiError) -> Duration {
        let exp = 2f64.powi(attempt.min(16) as i32);
        let mut delay = self.backoff_base.mul_f64(exp);
        if let Some(retry_after) = err.retry_after_secs() {
            delay = delay.max(secs(retry_after));
        }
        delay
    }

    async fn get_json(&self, url: Url) -> Result<serde_json::Value, ApiError> {
        let mut attempt = 0;
        loop {
            self.wait_turn().await;
            match self.get_once(&url).await {
                Ok(body) => return Ok(body),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    let delay = self.backoff_for(attempt, &e);
                    tracing::warn!(
                        url = %url,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying request"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn get_once(&self, url: &Url) -> Result<serde_json::Value, ApiError> {
        let resp = self.http.get(url.clone()).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let retry_after_secs = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<f64>().ok())
                .filter(|s| s.is_finite() && *s >= 0.0);
            return Err(ApiError::Status {
                status: status.as_u16(),
                url: url.to_string(),
                retry_after_secs,
            });
        }
        let body = resp.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

/// Turn a `/trades` response into trades, skipping anything that is not an object.
pub fn parse_trades(body: serde_json::Value) -> Vec<Trade> {
    let serde_json::Value::Array(items) = body else {
        return Vec::new();
    };
    items
        .into_iter()
        .filter_map(ApiTrade::from_value)
        .map(Trade::from)
        .collect()
}

/// First market of a Gamma `/markets` response, if it is an object.
pub fn parse_market(body: serde_json::Value, condition_id: &str) -> Option<Market> {
    let serde_json::Value::Array(items) = body else {
        return None;
    };
    let first = items.into_iter().next().filter(serde_json::Value::is_object)?;
    let gamma: GammaMarket = serde_json::from_value(first).ok()?;
    Some(Market::from_gamma(gamma, condition_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> config::Polymarket {
        config::Polymarket::default()
    }

    #[test]
    fn test_client_constructs_trades_url() {
        let client = PolymarketClient::new(&settings()).unwrap();
        let url = client.trades_url(100, 0).unwrap().to_string();
        assert!(url.starts_with("https://data-api.polymarket.com/trades"));
        assert!(url.contains("limit=100"));
        assert!(url.contains("offset=0"));
    }

    #[test]
    fn test_trades_url_caps_limit() {
        let client = PolymarketClient::new(&settings()).unwrap();
        let url = client.trades_url(10_000, 500).unwrap().to_string();
        assert!(url.contains("limit=500"));
        assert!(url.contains("offset=500"));
    }

    #[test]
    fn test_market_url_filters_by_condition_id() {
        let client = PolymarketClient::new(&settings()).unwrap();
        let url = client.market_url("0xabc").unwrap().to_string();
        assert!(url.starts_with("https://gamma-api.polymarket.com/markets"));
        assert!(url.contains("condition_ids=0xabc"));
        assert!(url.contains("limit=1"));
    }

    #[test]
    fn test_rejects_non_https_base() {
        let mut s = settings();
        s.data_api_url = "http://data-api.polymarket.com".to_string();
        let err = PolymarketClient::new(&s).err().unwrap();
        assert!(matches!(err, ApiError::InvalidUrl { .. }));
    }

    #[test]
    fn test_validate_https_url() {
        assert!(validate_https_url("https://example.com/hook").is_ok());
        assert!(validate_https_url("ftp://example.com").is_err());
        assert!(validate_https_url("not a url").is_err());
    }

    #[test]
    fn test_backoff_doubles_and_honours_retry_after() {
        let client = PolymarketClient::new(&settings()).unwrap();
        let plain = ApiError::Status {
            status: 503,
            url: "u".to_string(),
            retry_after_secs: None,
        };
        assert_eq!(client.backoff_for(0, &plain), Duration::from_millis(500));
        assert_eq!(client.backoff_for(2, &plain), Duration::from_secs(2));

        let throttled = ApiError::Status {
            status: 429,
            url: "u".to_string(),
            retry_after_secs: Some(5.0),
        };
        assert_eq!(client.backoff_for(0, &throttled), Duration::from_secs(5));
    }

    #[test]
    fn test_parse_trades_skips_non_objects() {
        let body = serde_json::json!([
            {"proxyWallet": "0xabc", "conditionId": "0xdef", "size": "10", "price": "0.50", "timestamp": 1_700_000_000},
            "garbage",
            42
        ]);
        let trades = parse_trades(body);
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].proxy_wallet, "0xabc");
        assert!((trades[0].notional() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_parse_trades_non_list_is_empty() {
        assert!(parse_trades(serde_json::json!({"error": "nope"})).is_empty());
    }

    #[test]
    fn test_parse_market_empty_is_none() {
        assert!(parse_market(serde_json::json!([]), "0x1").is_none());
        assert!(parse_market(serde_json::json!(["x"]), "0x1").is_none());
    }

    #[test]
    fn test_parse_fixture_trades() {
        let json = include_str!("../../../tests/fixtures/trades_sample.json");
        let trades = parse_trades(serde_json::from_str(json).unwrap());
        assert!(!trades.is_empty());
        assert!(trades.iter().all(|t| t.trade_id.len() == 64));
    }

    #[test]
    fn test_parse_fixture_gamma_market() {
        let json = include_str!("../../../tests/fixtures/gamma_markets_sample.json");
        let market = parse_market(serde_json::from_str(json).unwrap(), "0xfixture").unwrap();
        assert_eq!(market.outcomes.len(), market.outcome_prices.len());
        assert!(market.liquidity_num.is_some());
    }
}
