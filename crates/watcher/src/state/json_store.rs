use super::checkpoint::FetchCheckpoint;
use super::cooldown::CooldownLedger;
use super::market_log::{MarketEvent, MarketEventLog};
use super::seen::SeenTradeSet;
use super::wallet::{WalletEvent, WalletState};
use super::{LoadReport, StateStore, WatchState, STATE_VERSION};
use crate::files::atomic_write;
use common::error::StateError;
use common::types::{value_as_f64, value_as_i64, Market};
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Whole-document JSON state, rewritten atomically on every save.
pub struct JsonStore {
    path: PathBuf,
}

impl JsonStore {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    fn quarantine(&self, reason: &str) -> Result<String, StateError> {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".corrupt");
        let aside = self.path.with_file_name(name);
        std::fs::copy(&self.path, &aside).map_err(|e| StateError::io(&aside, e))?;
        tracing::warn!(
            path = %self.path.display(),
            moved_to = %aside.display(),
            reason,
            "state document unreadable; starting from empty state"
        );
        Ok(aside.display().to_string())
    }
}

impl StateStore for JsonStore {
    fn load(&mut self, max_seen: usize) -> Result<(WatchState, LoadReport), StateError> {
        let raw = match std::fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok((WatchState::new(max_seen), LoadReport::default()));
            }
            Err(e) => return Err(StateError::io(&self.path, e)),
        };

        let doc = match serde_json::from_slice::<Value>(&raw) {
            Ok(Value::Object(doc)) => doc,
            Ok(_) => {
                let mut report = LoadReport::default();
                report.quarantined = Some(self.quarantine("top-level value is not an object")?);
                return Ok((WatchState::new(max_seen), report));
            }
            Err(e) => {
                let mut report = LoadReport::default();
                report.quarantined = Some(self.quarantine(&e.to_string())?);
                return Ok((WatchState::new(max_seen), report));
            }
        };

        decode_document(&doc, max_seen)
    }

    fn save(&mut self, state: &WatchState) -> Result<(), StateError> {
        let mut text = serde_json::to_string_pretty(&encode_document(state))?;
        text.push('\n');
        atomic_write(&self.path, text.as_bytes()).map_err(|e| StateError::io(&self.path, e))
    }
}

pub fn encode_document(state: &WatchState) -> Value {
    let wallets: Map<String, Value> = state
        .wallets()
        .map(|(address, w)| {
            (
                address.to_string(),
                json!({
                    "first_seen_ts": w.first_seen_ts(),
                    "last_seen_ts": w.last_seen_ts(),
                    "trades_total": w.trades_total(),
                    "events": w.events(),
                    "markets": w.markets(),
                }),
            )
        })
        .collect();

    let markets: Map<String, Value> = state
        .markets()
        .map(|(id, cached)| {
            let mut v = serde_json::to_value(&cached.market).unwrap_or_else(|_| json!({}));
            if let Value::Object(obj) = &mut v {
                obj.insert("updated_ts".to_string(), json!(cached.updated_ts));
            }
            (id.to_string(), v)
        })
        .collect();

    let market_events: Map<String, Value> = state
        .market_event_logs()
        .map(|(id, log)| (id.to_string(), json!(log.events())))
        .collect();

    let cooldowns: Map<String, Value> = state
        .cooldowns()
        .iter()
        .map(|(k, ts)| (k.to_string(), json!(ts)))
        .collect();

    json!({
        "version": STATE_VERSION,
        "updated_at": state.updated_at(),
        "wallets": wallets,
        "markets": markets,
        "market_events": market_events,
        "seen_trade_ids": state.seen().iter().collect::<Vec<_>>(),
        "alerts": cooldowns,
        "last_fetched_trade_ts": state.checkpoint().last_ts(),
        "last_fetched_trade_ids": state.checkpoint().ids_at_last_ts(),
    })
}

/// Validate a parsed document into state. Invalid records are dropped and counted;
/// missing sections are treated as empty.
pub fn decode_document(
    doc: &Map<String, Value>,
    max_seen: usize,
) -> Result<(WatchState, LoadReport), StateError> {
    if let Some(version) = doc.get("version").and_then(value_as_i64) {
        if version > STATE_VERSION {
            return Err(StateError::UnsupportedVersion(version));
        }
    }

    let mut state = WatchState::new(max_seen);
    let mut report = LoadReport::default();
    let updated_at = doc.get("updated_at").and_then(value_as_i64);
    if let Some(ts) = updated_at {
        state.set_updated_at(ts);
    }

    for (address, raw) in object_entries(doc, "wallets", &mut report) {
        match decode_wallet(raw, &mut report) {
            Some(w) => state.insert_wallet(address.clone(), w),
            None => report.drop_record("wallet"),
        }
    }

    for (id, raw) in object_entries(doc, "markets", &mut report) {
        match decode_market(id, raw, updated_at.unwrap_or(0)) {
            Some((market, updated_ts)) => state.cache_market(id.clone(), market, updated_ts),
            None => report.drop_record("market"),
        }
    }

    for (id, raw) in object_entries(doc, "market_events", &mut report) {
        let Value::Array(rows) = raw else {
            report.drop_record("market_log");
            continue;
        };
        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            match MarketEvent::parse(row) {
                Some(e) => events.push(e),
                None => report.drop_record("market_event"),
            }
        }
        state.insert_market_log(id.clone(), MarketEventLog::from_events(events));
    }

    let seen_ids = strings(doc.get("seen_trade_ids"), "seen_trade_id", &mut report);
    state.set_seen(SeenTradeSet::from_ids(seen_ids, max_seen));

    let cooldowns: CooldownLedger = object_entries(doc, "alerts", &mut report)
        .filter_map(|(key, raw)| match value_as_i64(raw) {
            Some(ts) => Some((key.clone(), ts)),
            None => {
                report.drop_record("cooldown");
                None
            }
        })
        .collect();
    state.set_cooldowns(cooldowns);

    let last_ts = doc.get("last_fetched_trade_ts").and_then(value_as_i64);
    let last_ids: BTreeSet<String> = strings(doc.get("last_fetched_trade_ids"), "checkpoint_id", &mut report)
        .into_iter()
        .collect();
    state.set_checkpoint(FetchCheckpoint::new(last_ts, last_ids));

    Ok((state, report))
}

/// Entries of an object-valued section. A present but non-object section counts
/// as one dropped record.
fn object_entries<'a>(
    doc: &'a Map<String, Value>,
    key: &'static str,
    report: &mut LoadReport,
) -> impl Iterator<Item = (&'a String, &'a Value)> {
    let section = match doc.get(key) {
        Some(Value::Object(obj)) => Some(obj),
        None | Some(Value::Null) => None,
        Some(_) => {
            report.drop_record(key);
            None
        }
    };
    section.into_iter().flat_map(|obj| obj.iter())
}

fn strings(v: Option<&Value>, entity: &'static str, report: &mut LoadReport) -> Vec<String> {
    match v {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) if !s.is_empty() => Some(s.clone()),
                _ => {
                    report.drop_record(entity);
                    None
                }
            })
            .collect(),
        None | Some(Value::Null) => Vec::new(),
        Some(_) => {
            report.drop_record(entity);
            Vec::new()
        }
    }
}

fn decode_wallet(raw: &Value, report: &mut LoadReport) -> Option<WalletState> {
    let obj = raw.as_object()?;
    let mut events = Vec::new();
    if let Some(Value::Array(rows)) = obj.get("events") {
        for row in rows {
            match WalletEvent::parse(row) {
                Some(e) => events.push(e),
                None => report.drop_record("wallet_event"),
            }
        }
    }
    let markets = strings(obj.get("markets"), "wallet_market", report);
    let trades_total = obj
        .get("trades_total")
        .and_then(value_as_i64)
        .and_then(|n| u64::try_from(n).ok())
        .unwrap_or(0);
    Some(WalletState::from_parts(
        obj.get("first_seen_ts").and_then(value_as_i64),
        obj.get("last_seen_ts").and_then(value_as_i64),
        trades_total,
        events,
        markets,
    ))
}

fn decode_market(id: &str, raw: &Value, fallback_ts: i64) -> Option<(Market, i64)> {
    let obj = raw.as_object()?;
    let text = |key: &str| {
        obj.get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    let non_negative = |key: &str| {
        obj.get(key)
            .and_then(value_as_f64)
            .filter(|v| *v >= 0.0)
    };
    let outcomes = obj
        .get("outcomes")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    let outcome_prices = obj
        .get("outcome_prices")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(value_as_f64).collect())
        .unwrap_or_default();
    let condition_id = match text("condition_id") {
        s if s.is_empty() => id.to_string(),
        s => s,
    };
    let market = Market {
        condition_id,
        question: text("question"),
        slug: text("slug"),
        liquidity_num: non_negative("liquidity_num"),
        volume24hr: non_negative("volume24hr"),
        outcomes,
        outcome_prices,
    };
    let updated_ts = obj
        .get("updated_ts")
        .and_then(value_as_i64)
        .unwrap_or(fallback_ts);
    Some((market, updated_ts))
}
