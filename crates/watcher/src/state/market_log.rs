use common::types::{known_outcome, value_as_f64, value_as_i64, Side, Trade};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One recorded trade in a market's rolling log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketEvent {
    pub ts: i64,
    pub wallet: String,
    pub price: f64,
    pub notional: f64,
    pub outcome_index: Option<i64>,
    pub side: Option<Side>,
}

impl MarketEvent {
    pub fn from_trade(trade: &Trade, notional: f64) -> Self {
        Self {
            ts: trade.timestamp,
            wallet: trade.proxy_wallet.clone(),
            price: trade.price,
            notional,
            outcome_index: known_outcome(trade.outcome_index),
            side: Some(trade.side),
        }
    }

    /// Accepts the record form or legacy `[ts, wallet, price, notional, outcome?, side?]`
    /// rows. Missing or unparseable outcome/side become unknown.
    pub fn parse(v: &Value) -> Option<Self> {
        match v {
            Value::Array(row) if row.len() >= 4 => Some(Self {
                ts: value_as_i64(&row[0])?,
                wallet: wallet_str(&row[1])?,
                price: value_as_f64(&row[2])?,
                notional: value_as_f64(&row[3])?,
                outcome_index: row.get(4).and_then(parse_outcome),
                side: row.get(5).and_then(parse_side),
            }),
            Value::Object(obj) => Some(Self {
                ts: value_as_i64(obj.get("ts")?)?,
                wallet: wallet_str(obj.get("wallet")?)?,
                price: value_as_f64(obj.get("price")?)?,
                notional: value_as_f64(obj.get("notional")?)?,
                outcome_index: obj.get("outcome_index").and_then(parse_outcome),
                side: obj.get("side").and_then(parse_side),
            }),
            _ => None,
        }
    }
}

fn wallet_str(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Null => Some(String::new()),
        _ => None,
    }
}

/// Older logs wrote -1 for an unknown outcome.
fn parse_outcome(v: &Value) -> Option<i64> {
    known_outcome(value_as_i64(v))
}

fn parse_side(v: &Value) -> Option<Side> {
    v.as_str().and_then(Side::from_str_loose)
}

/// Age- and count-bounded event sequence for a single market.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarketEventLog {
    events: Vec<MarketEvent>,
}

impl MarketEventLog {
    pub fn from_events(events: Vec<MarketEvent>) -> Self {
        Self { events }
    }

    pub fn events(&self) -> &[MarketEvent] {
        &self.events
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn push(&mut self, event: MarketEvent, now: i64, keep_seconds: i64, max_events: usize) {
        self.events.push(event);
        self.prune(now, keep_seconds, max_events);
    }

    pub fn prune(&mut self, now: i64, keep_seconds: i64, max_events: usize) {
        let cutoff = now - keep_seconds;
        self.events.retain(|e| e.ts >= cutoff);
        if self.events.len() > max_events {
            let excess = self.events.len() - max_events;
            self.events.drain(..excess);
        }
    }
}
