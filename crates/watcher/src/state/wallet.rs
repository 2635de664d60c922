use common::types::{value_as_f64, value_as_i64, Trade};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

/// Wallet activity is only kept for a rolling week.
pub const WALLET_WINDOW_SECS: i64 = 7 * 24 * 60 * 60;
pub const MAX_WALLET_EVENTS: usize = 400;
pub const MAX_WALLET_MARKETS: usize = 500;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletEvent {
    pub ts: i64,
    pub market_id: String,
    pub notional: f64,
}

impl WalletEvent {
    /// Accepts `{ts, market_id, notional}` or a legacy `[ts, market_id, notional]` row.
    pub fn parse(v: &Value) -> Option<Self> {
        let (ts, market_id, notional) = match v {
            Value::Array(row) if row.len() >= 3 => (&row[0], &row[1], &row[2]),
            Value::Object(obj) => (obj.get("ts")?, obj.get("market_id")?, obj.get("notional")?),
            _ => return None,
        };
        Some(Self {
            ts: value_as_i64(ts)?,
            market_id: market_id.as_str()?.to_string(),
            notional: value_as_f64(notional).filter(|n| *n >= 0.0)?,
        })
    }
}

/// Snapshot of a wallet's history used by the per-trade rubric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletStats {
    pub proxy_wallet: String,
    pub first_seen_ts: Option<i64>,
    pub trades_total: u64,
    pub unique_markets_total: usize,
    pub trades_7d: usize,
    pub unique_markets_7d: usize,
    pub avg_notional_7d: f64,
}

impl WalletStats {
    pub fn empty(wallet: &str) -> Self {
        Self {
            proxy_wallet: wallet.to_string(),
            first_seen_ts: None,
            trades_total: 0,
            unique_markets_total: 0,
            trades_7d: 0,
            unique_markets_7d: 0,
            avg_notional_7d: 0.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WalletState {
    first_seen_ts: Option<i64>,
    last_seen_ts: Option<i64>,
    trades_total: u64,
    events: Vec<WalletEvent>,
    markets: Vec<String>,
}

impl WalletState {
    pub fn from_parts(
        first_seen_ts: Option<i64>,
        last_seen_ts: Option<i64>,
        trades_total: u64,
        events: Vec<WalletEvent>,
        markets: Vec<String>,
    ) -> Self {
        Self {
            first_seen_ts,
            last_seen_ts,
            trades_total,
            events,
            markets,
        }
    }

    pub fn first_seen_ts(&self) -> Option<i64> {
        self.first_seen_ts
    }

    pub fn last_seen_ts(&self) -> Option<i64> {
        self.last_seen_ts
    }

    pub fn trades_total(&self) -> u64 {
        self.trades_total
    }

    pub fn events(&self) -> &[WalletEvent] {
        &self.events
    }

    pub fn markets(&self) -> &[String] {
        &self.markets
    }

    /// Last time this wallet did anything we kept.
    pub fn last_activity_ts(&self) -> Option<i64> {
        self.last_seen_ts
            .or_else(|| self.events.last().map(|e| e.ts))
    }

    pub fn record(&mut self, trade: &Trade, notional: f64, now: i64) {
        if self.first_seen_ts.is_none() {
            self.first_seen_ts = Some(trade.timestamp);
        }
        self.last_seen_ts = Some(trade.timestamp);
        self.trades_total += 1;
        self.events.push(WalletEvent {
            ts: trade.timestamp,
            market_id: trade.condition_id.clone(),
            notional,
        });
        if !trade.condition_id.is_empty() && !self.markets.contains(&trade.condition_id) {
            self.markets.push(trade.condition_id.clone());
        }
        self.prune(now);
    }

    /// Drop events older than a week and enforce the event and market caps.
    pub fn prune(&mut self, now: i64) {
        let cutoff = now - WALLET_WINDOW_SECS;
        self.events.retain(|e| e.ts >= cutoff);
        if self.events.len() > MAX_WALLET_EVENTS {
            let excess = self.events.len() - MAX_WALLET_EVENTS;
            self.events.drain(..excess);
        }
        if self.markets.len() > MAX_WALLET_MARKETS {
            let excess = self.markets.len() - MAX_WALLET_MARKETS;
            self.markets.drain(..excess);
        }
    }

    pub fn stats(&self, wallet: &str, now: i64, min_notional: f64) -> WalletStats {
        let events: Vec<&WalletEvent> = self
            .events
            .iter()
            .filter(|e| e.notional >= min_notional)
            .collect();

        let cutoff = now - WALLET_WINDOW_SECS;
        let recent: Vec<&WalletEvent> = events.iter().copied().filter(|e| e.ts >= cutoff).collect();
        let avg_notional_7d = if recent.is_empty() {
            0.0
        } else {
            recent.iter().map(|e| e.notional).sum::<f64>() / recent.len() as f64
        };
        let unique_markets_7d = recent
            .iter()
            .map(|e| e.market_id.as_str())
            .collect::<HashSet<_>>()
            .len();
        let unique_markets_total = self.markets.iter().collect::<HashSet<_>>().len();

        WalletStats {
            proxy_wallet: wallet.to_string(),
            first_seen_ts: self
                .first_seen_ts
                .or_else(|| events.iter().map(|e| e.ts).min()),
            trades_total: self.trades_total.max(events.len() as u64),
            unique_markets_total,
            trades_7d: recent.len(),
            unique_markets_7d,
            avg_notional_7d,
        }
    }
}
