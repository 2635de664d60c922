use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: General,
    pub state: State,
    pub polymarket: Polymarket,
    pub ingestion: Ingestion,
    pub scoring: Scoring,
    pub feed: Feed,
    pub output: Output,
    pub notify: Notify,
    pub observability: Observability,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Json,
    Text,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "text" => Ok(Self::Text),
            other => Err(format!("unknown log format '{other}' (expected json or text)")),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct General {
    pub log_level: String,
    pub log_format: LogFormat,
    pub poll_interval_secs: u64,
}

impl Default for General {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Json,
            poll_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateBackend {
    #[default]
    Json,
    Sqlite,
}

impl StateBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Sqlite => "sqlite",
        }
    }
}

impl FromStr for StateBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(format!("unknown state backend '{other}' (expected json or sqlite)")),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct State {
    pub backend: StateBackend,
    pub path: String,
    pub max_seen: usize,
    pub keep_seconds: i64,
    pub market_events_keep_seconds: i64,
    pub market_events_max_per_market: usize,
}

impl Default for State {
    fn default() -> Self {
        Self {
            backend: StateBackend::Json,
            path: "state/state.json".to_string(),
            max_seen: 5000,
            keep_seconds: 14 * 24 * 60 * 60,
            market_events_keep_seconds: 6 * 60 * 60,
            market_events_max_per_market: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Polymarket {
    pub data_api_url: String,
    pub gamma_api_url: String,
    pub user_agent: String,
    pub timeout_secs: f64,
    pub min_request_interval_secs: f64,
    pub max_retries: u32,
    pub backoff_base_secs: f64,
}

impl Default for Polymarket {
    fn default() -> Self {
        Self {
            data_api_url: "https://data-api.polymarket.com".to_string(),
            gamma_api_url: "https://gamma-api.polymarket.com".to_string(),
            user_agent: concat!("pmwatch/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout_secs: 10.0,
            min_request_interval_secs: 0.1,
            max_retries: 3,
            backoff_base_secs: 0.5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Ingestion {
    pub limit: u32,
    pub max_pages: u32,
}

impl Default for Ingestion {
    fn default() -> Self {
        Self {
            limit: 500,
            max_pages: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringStrategy {
    /// Score every qualifying trade on its own.
    #[default]
    Trade,
    /// Score each touched market over the fast and accumulation windows.
    MarketWindow,
}

impl ScoringStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trade => "trade",
            Self::MarketWindow => "market_window",
        }
    }

    pub fn default_min_score(&self) -> u32 {
        match self {
            Self::Trade => 3,
            Self::MarketWindow => 7,
        }
    }

    pub fn default_cooldown_seconds(&self) -> i64 {
        match self {
            Self::Trade => 60 * 60,
            Self::MarketWindow => 6 * 60 * 60,
        }
    }
}

impl FromStr for ScoringStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "trade" => Ok(Self::Trade),
            "market_window" => Ok(Self::MarketWindow),
            other => Err(format!(
                "unknown strategy '{other}' (expected trade or market_window)"
            )),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Scoring {
    pub strategy: ScoringStrategy,
    pub min_notional: f64,
    /// Unset means the strategy's own default.
    pub min_score: Option<u32>,
    /// Unset means the strategy's own default.
    pub cooldown_seconds: Option<i64>,
    pub fast_window_seconds: i64,
    pub accum_window_seconds: i64,
}

impl Default for Scoring {
    fn default() -> Self {
        Self {
            strategy: ScoringStrategy::Trade,
            min_notional: 2000.0,
            min_score: None,
            cooldown_seconds: None,
            fast_window_seconds: 30 * 60,
            accum_window_seconds: 6 * 60 * 60,
        }
    }
}

impl Scoring {
    pub fn effective_min_score(&self) -> u32 {
        self.min_score
            .unwrap_or_else(|| self.strategy.default_min_score())
    }

    pub fn effective_cooldown_seconds(&self) -> i64 {
        self.cooldown_seconds
            .unwrap_or_else(|| self.strategy.default_cooldown_seconds())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Feed {
    pub enabled: bool,
    pub out_path: String,
    pub out_jsonl_path: String,
    pub archive_dir: String,
    pub max_alerts: usize,
    /// Zero disables the per-day cap.
    pub max_alerts_per_day: usize,
    /// Falls back to the `GITHUB_REPOSITORY` environment variable.
    pub repo: Option<String>,
}

impl Default for Feed {
    fn default() -> Self {
        Self {
            enabled: true,
            out_path: "docs/alerts.json".to_string(),
            out_jsonl_path: "docs/alerts.jsonl".to_string(),
            archive_dir: "archive".to_string(),
            max_alerts: 200,
            max_alerts_per_day: 5,
            repo: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown output format '{other}' (expected text or json)")),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Output {
    pub format: OutputFormat,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Notify {
    pub webhook_url: Option<String>,
    pub max_chars: usize,
}

impl Default for Notify {
    fn default() -> Self {
        Self {
            webhook_url: None,
            max_chars: 1900,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Observability {
    /// Zero disables the Prometheus exporter.
    pub prometheus_port: u16,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("failed to parse config {}", path.display()))
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Reject values that would make a polling pass meaningless.
    pub fn validate(&self) -> Result<()> {
        if self.general.poll_interval_secs == 0 {
            bail!("general.poll_interval_secs must be > 0");
        }
        if self.state.path.trim().is_empty() {
            bail!("state.path must not be empty");
        }
        if self.state.max_seen == 0 {
            bail!("state.max_seen must be > 0");
        }
        if self.state.keep_seconds <= 0 {
            bail!("state.keep_seconds must be > 0");
        }
        if self.state.market_events_keep_seconds <= 0 {
            bail!("state.market_events_keep_seconds must be > 0");
        }
        if self.state.market_events_max_per_market == 0 {
            bail!("state.market_events_max_per_market must be > 0");
        }
        if self.ingestion.limit == 0 {
            bail!("ingestion.limit must be > 0");
        }
        if self.ingestion.max_pages == 0 {
            bail!("ingestion.max_pages must be > 0");
        }
        if !self.scoring.min_notional.is_finite() || self.scoring.min_notional < 0.0 {
            bail!("scoring.min_notional must be a finite value >= 0");
        }
        if self.scoring.effective_cooldown_seconds() < 0 {
            bail!("scoring.cooldown_seconds must be >= 0");
        }
        if self.scoring.fast_window_seconds <= 0 || self.scoring.accum_window_seconds <= 0 {
            bail!("scoring window lengths must be > 0");
        }
        if self.feed.enabled && self.feed.max_alerts == 0 {
            bail!("feed.max_alerts must be > 0 when the feed is enabled");
        }
        if !self.polymarket.timeout_secs.is_finite() || self.polymarket.timeout_secs <= 0.0 {
            bail!("polymarket.timeout_secs must be > 0");
        }
        if let Some(url) = self.notify.webhook_url.as_deref() {
            if !url.trim().is_empty() && !url.trim_start().starts_with("https://") {
                bail!("notify.webhook_url must be an https:// URL");
            }
        }
        Ok(())
    }
}

impl FromStr for Config {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::from_toml_str(s)
    }
}
