//! Public alert feed: a capped JSON document, the same set as JSONL, and an
//! uncapped monthly archive of every new alert.
//!
//! Prior feed entries are handled as raw JSON so that entries written by older
//! versions (or edited by hand) survive a merge untouched.

use crate::alert::AlertRecord;
use crate::files::{append_lines, atomic_write};
use anyhow::{Context, Result};
use common::config::Config;
use common::types::{value_as_f64, value_as_i64};
use serde_json::{json, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct FeedSettings {
    pub out_path: PathBuf,
    pub out_jsonl_path: PathBuf,
    pub archive_dir: PathBuf,
    pub max_alerts: usize,
    pub max_alerts_per_day: usize,
    pub min_notional: f64,
    pub repo: String,
}

impl FeedSettings {
    pub fn from_config(cfg: &Config) -> Self {
        let repo = cfg
            .feed
            .repo
            .clone()
            .filter(|r| !r.is_empty())
            .or_else(|| std::env::var("GITHUB_REPOSITORY").ok())
            .unwrap_or_default();
        Self {
            out_path: PathBuf::from(&cfg.feed.out_path),
            out_jsonl_path: PathBuf::from(&cfg.feed.out_jsonl_path),
            archive_dir: PathBuf::from(&cfg.feed.archive_dir),
            max_alerts: cfg.feed.max_alerts,
            max_alerts_per_day: cfg.feed.max_alerts_per_day,
            min_notional: cfg.scoring.min_notional,
            repo,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishOutcome {
    pub feed_len: usize,
    pub new_in_feed: usize,
    pub archived: usize,
    /// Wallets and markets the published feed refers to; state pruning keeps them.
    pub keep_wallets: HashSet<String>,
    pub keep_markets: HashSet<String>,
}

fn trade_field<'a>(alert: &'a Value, key: &str) -> Option<&'a Value> {
    alert.get("trade")?.get(key)
}

fn trade_ts(alert: &Value) -> i64 {
    trade_field(alert, "timestamp")
        .and_then(value_as_i64)
        .unwrap_or(0)
}

fn trade_str<'a>(alert: &'a Value, key: &str) -> &'a str {
    trade_field(alert, key).and_then(Value::as_str).unwrap_or("")
}

fn number(alert: &Value, key: &str) -> f64 {
    alert.get(key).and_then(value_as_f64).unwrap_or(0.0)
}

fn event_label(alert: &Value) -> &str {
    alert
        .get("metrics")
        .and_then(|m| m.get("event_type"))
        .and_then(Value::as_str)
        .unwrap_or("trade")
}

fn utc_day(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map_or_else(String::new, |d| d.format("%Y-%m-%d").to_string())
}

fn archive_path(archive_dir: &Path, ts: i64) -> PathBuf {
    let month = chrono::DateTime::from_timestamp(ts, 0)
        .map_or_else(|| "unknown".to_string(), |d| d.format("%Y-%m").to_string());
    archive_dir.join(format!("alerts-{month}.jsonl"))
}

fn newest_first(a: &Value, b: &Value) -> Ordering {
    trade_ts(b).cmp(&trade_ts(a))
}

/// Entries of the existing feed document. Missing or unreadable feeds are empty.
pub fn load_feed(path: &Path) -> Vec<Value> {
    let Ok(raw) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    match serde_json::from_str::<Value>(&raw) {
        Ok(Value::Object(mut doc)) => match doc.remove("alerts") {
            Some(Value::Array(alerts)) => alerts,
            _ => Vec::new(),
        },
        Ok(_) => Vec::new(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable alert feed");
            Vec::new()
        }
    }
}

/// Keep the top `max_per_day` per UTC day by (score, notional, timestamp),
/// returned newest first.
fn cap_per_day(alerts: Vec<Value>, max_per_day: usize) -> Vec<Value> {
    let mut by_day: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    for a in alerts {
        by_day.entry(utc_day(trade_ts(&a))).or_default().push(a);
    }

    let mut kept = Vec::new();
    for (_, mut day) in by_day.into_iter().rev() {
        day.sort_by(|a, b| {
            number(b, "score")
                .total_cmp(&number(a, "score"))
                .then_with(|| number(b, "notional").total_cmp(&number(a, "notional")))
                .then_with(|| newest_first(a, b))
        });
        day.truncate(max_per_day);
        kept.extend(day);
    }
    kept.sort_by(newest_first);
    kept
}

/// Merge prior feed entries with this run's alerts and apply the caps.
pub fn merge_feed(
    prior: Vec<Value>,
    new_alerts: &[Value],
    min_notional: f64,
    max_alerts: usize,
    max_alerts_per_day: usize,
) -> Vec<Value> {
    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut combined: Vec<Value> = prior
        .into_iter()
        .filter(|a| a.is_object() && number(a, "notional") >= min_notional)
        .filter(|a| {
            seen.insert((
                trade_str(a, "trade_id").to_string(),
                event_label(a).to_string(),
            ))
        })
        .collect();
    combined.extend(new_alerts.iter().cloned());
    combined.sort_by(newest_first);

    if max_alerts_per_day > 0 {
        combined = cap_per_day(combined, max_alerts_per_day);
    }
    combined.truncate(max_alerts);
    combined
}

/// Write the feed, its JSONL twin and the archive for this run's alerts.
pub fn publish(settings: &FeedSettings, new_alerts: &[AlertRecord], now: i64) -> Result<PublishOutcome> {
    let new_values = new_alerts
        .iter()
        .map(serde_json::to_value)
        .collect::<Result<Vec<_>, _>>()
        .context("failed to encode alerts")?;

    let prior = load_feed(&settings.out_path);
    let feed = merge_feed(
        prior,
        &new_values,
        settings.min_notional,
        settings.max_alerts,
        settings.max_alerts_per_day,
    );

    let new_ids: HashSet<&str> = new_alerts.iter().map(|a| a.trade.trade_id.as_str()).collect();
    let new_in_feed = feed
        .iter()
        .filter(|a| new_ids.contains(trade_str(a, "trade_id")))
        .count();

    let doc = json!({
        "generated_at": now,
        "repo": settings.repo,
        "alerts": feed,
        "new_alerts": new_in_feed,
    });
    let mut body = serde_json::to_string_pretty(&doc).context("failed to encode feed")?;
    body.push('\n');
    atomic_write(&settings.out_path, body.as_bytes())
        .with_context(|| format!("failed to write feed {}", settings.out_path.display()))?;

    let mut ascending = feed.clone();
    ascending.sort_by_key(trade_ts);
    let mut jsonl = ascending
        .iter()
        .map(serde_json::to_string)
        .collect::<Result<Vec<_>, _>>()
        .context("failed to encode feed lines")?
        .join("\n");
    jsonl.push('\n');
    atomic_write(&settings.out_jsonl_path, jsonl.as_bytes()).with_context(|| {
        format!("failed to write feed {}", settings.out_jsonl_path.display())
    })?;

    let mut batches: BTreeMap<PathBuf, Vec<String>> = BTreeMap::new();
    for v in &new_values {
        let ts = trade_ts(v);
        let path = archive_path(&settings.archive_dir, if ts > 0 { ts } else { now });
        batches
            .entry(path)
            .or_default()
            .push(serde_json::to_string(v).context("failed to encode archive line")?);
    }
    for (path, lines) in &batches {
        append_lines(path, lines)
            .with_context(|| format!("failed to append archive {}", path.display()))?;
    }

    let keep = |key: &str| -> HashSet<String> {
        feed.iter()
            .map(|a| trade_str(a, key))
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    };
    let outcome = PublishOutcome {
        feed_len: feed.len(),
        new_in_feed,
        archived: new_values.len(),
        keep_wallets: keep("proxy_wallet"),
        keep_markets: keep("condition_id"),
    };
    tracing::info!(
        feed_len = outcome.feed_len,
        new_in_feed = outcome.new_in_feed,
        archived = outcome.archived,
        "alert feed published"
    );
    Ok(outcome)
}
