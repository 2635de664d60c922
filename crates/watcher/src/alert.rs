//! Alert records and their text / JSON renderings.

use crate::scoring::market_rubric::{EventType, MarketSignal, Windows};
use crate::state::wallet::WalletStats;
use crate::window_stats::Direction;
use common::types::{Market, Trade};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertKind {
    #[serde(rename = "alert")]
    Alert,
}

/// Window values behind a market-window alert. Key names are part of the
/// published feed format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertMetrics {
    pub event_type: EventType,
    pub fast_window_s: i64,
    pub notional_fast_window: f64,
    pub unique_wallets_fast_window: usize,
    pub price_range_fast_window: Option<f64>,
    pub accum_window_s: i64,
    pub price_range_accum_window: Option<f64>,
    pub top_wallet_accum_window: Option<String>,
    pub top_wallet_notional_accum_window: f64,
    pub top_wallet_share_accum_window: Option<f64>,
    pub top_wallet_trades_accum_window: usize,
    pub top_net_wallet_accum_window: Option<String>,
    pub top_net_wallet_notional_accum_window: f64,
    pub top_net_wallet_direction_accum_window: Option<Direction>,
    pub top_net_wallet_share_of_wallet_accum_window: Option<f64>,
    pub top_net_wallet_share_of_market_accum_window: Option<f64>,
    pub top_net_wallet_trades_accum_window: usize,
}

impl AlertMetrics {
    pub fn from_signal(signal: &MarketSignal, windows: Windows) -> Self {
        let top = signal.accum.top_wallet.as_ref();
        let net = signal.accum.top_net_wallet.as_ref();
        Self {
            event_type: signal.event_type(),
            fast_window_s: windows.fast_seconds,
            notional_fast_window: signal.fast.notional_sum,
            unique_wallets_fast_window: signal.fast.unique_wallets,
            price_range_fast_window: signal.fast.price_range,
            accum_window_s: windows.accum_seconds,
            price_range_accum_window: signal.accum.price_range,
            top_wallet_accum_window: top.map(|w| w.wallet.clone()),
            top_wallet_notional_accum_window: top.map_or(0.0, |w| w.notional),
            top_wallet_share_accum_window: top.and_then(|w| w.share),
            top_wallet_trades_accum_window: top.map_or(0, |w| w.trades),
            top_net_wallet_accum_window: net.map(|w| w.wallet.clone()),
            top_net_wallet_notional_accum_window: net.map_or(0.0, |w| w.net_notional),
            top_net_wallet_direction_accum_window: net.map(|w| w.direction),
            top_net_wallet_share_of_wallet_accum_window: net.map(|w| w.share_of_wallet),
            top_net_wallet_share_of_market_accum_window: net.and_then(|w| w.share_of_market),
            top_net_wallet_trades_accum_window: net.map_or(0, |w| w.trades),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    #[serde(rename = "type")]
    pub kind: AlertKind,
    pub score: u32,
    pub reasons: Vec<String>,
    pub notional: f64,
    pub url: String,
    pub trade: Trade,
    pub wallet_stats: WalletStats,
    pub market: Option<Market>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<AlertMetrics>,
}

pub fn market_url(trade: &Trade, market: Option<&Market>) -> String {
    let slug = if trade.slug.is_empty() {
        market.map_or("", |m| m.slug.as_str())
    } else {
        trade.slug.as_str()
    };
    if slug.is_empty() {
        "https://polymarket.com".to_string()
    } else {
        format!("https://polymarket.com/market/{slug}")
    }
}

impl AlertRecord {
    pub fn new(
        score: u32,
        reasons: Vec<String>,
        notional: f64,
        trade: Trade,
        wallet_stats: WalletStats,
        market: Option<Market>,
        metrics: Option<AlertMetrics>,
    ) -> Self {
        let url = market_url(&trade, market.as_ref());
        Self {
            kind: AlertKind::Alert,
            score,
            reasons,
            notional,
            url,
            trade,
            wallet_stats,
            market,
            metrics,
        }
    }

    /// Feed dedup label: the window event type, or `trade` for per-trade alerts.
    pub fn event_label(&self) -> &'static str {
        self.metrics
            .as_ref()
            .map_or("trade", |m| m.event_type.as_str())
    }
}

/// `1234567.891` -> `1,234,567.89`.
fn money(value: f64) -> String {
    let fixed = format!("{:.2}", value.abs());
    let (int_part, frac) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));
    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    let sign = if value < 0.0 { "-" } else { "" };
    format!("{sign}{grouped}.{frac}")
}

fn iso_utc(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0).map_or_else(|| ts.to_string(), |d| d.to_rfc3339())
}

pub fn render_text(alert: &AlertRecord) -> String {
    let t = &alert.trade;
    let w = &alert.wallet_stats;
    let title = if t.title.is_empty() {
        alert.market.as_ref().map_or("", |m| m.question.as_str())
    } else {
        t.title.as_str()
    };

    let mut lines = vec![
        format!("ALERT score={} notional=${}", alert.score, money(alert.notional)),
        format!("wallet={} ({})", t.proxy_wallet, t.display_ident()),
        format!(
            "side={} outcome={} price={} size={}",
            t.side, t.outcome, t.price, t.size
        ),
        format!("market={title}"),
        format!("url={}", alert.url),
        format!("ts={} tx={}", iso_utc(t.timestamp), t.transaction_hash),
        format!("reasons={}", alert.reasons.join(",")),
        format!(
            "wallet_stats=trades_total={} unique_markets_total={} trades_7d={} unique_markets_7d={} avg_notional_7d=${}",
            w.trades_total,
            w.unique_markets_total,
            w.trades_7d,
            w.unique_markets_7d,
            money(w.avg_notional_7d)
        ),
    ];
    if let Some(m) = &alert.market {
        lines.push(format!(
            "market_stats=liquidity=${} volume24hr=${}",
            money(m.liquidity_num.unwrap_or(0.0)),
            money(m.volume24hr.unwrap_or(0.0))
        ));
    }
    if let Some(m) = &alert.metrics {
        lines.push(format!(
            "window=event_type={} notional_{}s=${} unique_wallets_{}s={} top_net_wallet_{}s={}",
            m.event_type.as_str(),
            m.fast_window_s,
            money(m.notional_fast_window),
            m.fast_window_s,
            m.unique_wallets_fast_window,
            m.accum_window_s,
            m.top_net_wallet_accum_window.as_deref().unwrap_or("-"),
        ));
    }
    lines.join("\n")
}

/// Compact single-line JSON with sorted keys.
pub fn render_json(alert: &AlertRecord) -> serde_json::Result<String> {
    // Value maps are ordered, so a round trip through Value sorts the keys.
    let value = serde_json::to_value(alert)?;
    serde_json::to_string(&value)
}
