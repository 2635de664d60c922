//! In-memory watcher state and its two persistence backends.
//!
//! [`WatchState`] is loaded at the start of every iteration, mutated by one
//! polling pass and written back by a [`StateStore`].

pub mod checkpoint;
pub mod cooldown;
pub mod json_store;
pub mod market_log;
pub mod seen;
pub mod sqlite_store;
pub mod wallet;

use common::config::StateBackend;
use common::error::StateError;
use common::types::{Market, Trade};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use checkpoint::FetchCheckpoint;
use cooldown::CooldownLedger;
use market_log::{MarketEvent, MarketEventLog};
use seen::SeenTradeSet;
use wallet::{WalletState, WalletStats};

/// Current persisted document / schema version.
pub const STATE_VERSION: i64 = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct CachedMarket {
    pub market: Market,
    /// When the snapshot was fetched.
    pub updated_ts: i64,
}

/// Age and size limits applied while recording and at end-of-iteration pruning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retention {
    pub state_keep_seconds: i64,
    pub market_events_keep_seconds: i64,
    pub market_events_max_per_market: usize,
}

impl Retention {
    pub fn from_config(cfg: &common::config::State) -> Self {
        Self {
            state_keep_seconds: cfg.keep_seconds,
            market_events_keep_seconds: cfg.market_events_keep_seconds,
            market_events_max_per_market: cfg.market_events_max_per_market,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WatchState {
    wallets: BTreeMap<String, WalletState>,
    markets: BTreeMap<String, CachedMarket>,
    market_events: BTreeMap<String, MarketEventLog>,
    seen: SeenTradeSet,
    cooldowns: CooldownLedger,
    checkpoint: FetchCheckpoint,
    updated_at: Option<i64>,
}

impl WatchState {
    pub fn new(max_seen: usize) -> Self {
        Self {
            wallets: BTreeMap::new(),
            markets: BTreeMap::new(),
            market_events: BTreeMap::new(),
            seen: SeenTradeSet::new(max_seen),
            cooldowns: CooldownLedger::default(),
            checkpoint: FetchCheckpoint::default(),
            updated_at: None,
        }
    }

    // --- wallets ---

    #[cfg(test)]
    pub fn wallet(&self, address: &str) -> Option<&WalletState> {
        self.wallets.get(address)
    }

    pub fn wallets(&self) -> impl Iterator<Item = (&str, &WalletState)> {
        self.wallets.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn insert_wallet(&mut self, address: String, wallet: WalletState) {
        self.wallets.insert(address, wallet);
    }

    pub fn record_wallet_event(&mut self, trade: &Trade, notional: f64, now: i64) {
        self.wallets
            .entry(trade.proxy_wallet.clone())
            .or_default()
            .record(trade, notional, now);
    }

    /// Stats for `address`; an unknown wallet yields zeros.
    pub fn wallet_stats(&self, address: &str, now: i64, min_notional: f64) -> WalletStats {
        self.wallets.get(address).map_or_else(
            || WalletStats::empty(address),
            |w| w.stats(address, now, min_notional),
        )
    }

    // --- market cache ---

    pub fn cached_market(&self, condition_id: &str) -> Option<&Market> {
        self.markets.get(condition_id).map(|c| &c.market)
    }

    pub fn markets(&self) -> impl Iterator<Item = (&str, &CachedMarket)> {
        self.markets.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn cache_market(&mut self, condition_id: String, market: Market, updated_ts: i64) {
        self.markets
            .insert(condition_id, CachedMarket { market, updated_ts });
    }

    // --- market event logs ---

    pub fn market_events(&self, market_id: &str) -> &[MarketEvent] {
        self.market_events
            .get(market_id)
            .map(MarketEventLog::events)
            .unwrap_or_default()
    }

    pub fn market_event_logs(&self) -> impl Iterator<Item = (&str, &MarketEventLog)> {
        self.market_events.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn insert_market_log(&mut self, market_id: String, log: MarketEventLog) {
        self.market_events.insert(market_id, log);
    }

    pub fn record_market_event(
        &mut self,
        trade: &Trade,
        notional: f64,
        now: i64,
        retention: &Retention,
    ) {
        self.market_events
            .entry(trade.condition_id.clone())
            .or_default()
            .push(
                MarketEvent::from_trade(trade, notional),
                now,
                retention.market_events_keep_seconds,
                retention.market_events_max_per_market,
            );
    }

    // --- dedup / cooldown / checkpoint ---

    pub fn seen(&self) -> &SeenTradeSet {
        &self.seen
    }

    pub fn seen_mut(&mut self) -> &mut SeenTradeSet {
        &mut self.seen
    }

    pub fn set_seen(&mut self, seen: SeenTradeSet) {
        self.seen = seen;
    }

    pub fn cooldowns(&self) -> &CooldownLedger {
        &self.cooldowns
    }

    pub fn cooldowns_mut(&mut self) -> &mut CooldownLedger {
        &mut self.cooldowns
    }

    pub fn set_cooldowns(&mut self, cooldowns: CooldownLedger) {
        self.cooldowns = cooldowns;
    }

    pub fn checkpoint(&self) -> &FetchCheckpoint {
        &self.checkpoint
    }

    pub fn checkpoint_mut(&mut self) -> &mut FetchCheckpoint {
        &mut self.checkpoint
    }

    pub fn set_checkpoint(&mut self, checkpoint: FetchCheckpoint) {
        self.checkpoint = checkpoint;
    }

    pub fn updated_at(&self) -> Option<i64> {
        self.updated_at
    }

    pub fn set_updated_at(&mut self, ts: i64) {
        self.updated_at = Some(ts);
    }

    /// End-of-iteration cleanup. Wallets and markets referenced by the published
    /// feed are always kept.
    pub fn prune(
        &mut self,
        now: i64,
        retention: &Retention,
        keep_wallets: &HashSet<String>,
        keep_markets: &HashSet<String>,
    ) -> PruneReport {
        let cutoff = now - retention.state_keep_seconds;
        let mut report = PruneReport::default();

        let before = self.wallets.len();
        self.wallets.retain(|address, w| {
            keep_wallets.contains(address) || w.last_activity_ts().is_some_and(|ts| ts >= cutoff)
        });
        report.wallets = before - self.wallets.len();
        for w in self.wallets.values_mut() {
            w.prune(now);
        }

        let before = self.market_events.len();
        self.market_events.retain(|market_id, log| {
            log.prune(
                now,
                retention.market_events_keep_seconds,
                retention.market_events_max_per_market,
            );
            !log.is_empty() || keep_markets.contains(market_id)
        });
        report.market_logs = before - self.market_events.len();

        let before = self.markets.len();
        let market_events = &self.market_events;
        self.markets.retain(|condition_id, cached| {
            keep_markets.contains(condition_id)
                || market_events
                    .get(condition_id)
                    .is_some_and(|log| !log.is_empty())
                || cached.updated_ts >= cutoff
        });
        report.markets = before - self.markets.len();

        let before = self.cooldowns.len();
        self.cooldowns.prune(cutoff);
        report.cooldowns = before - self.cooldowns.len();

        report
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub wallets: usize,
    pub markets: usize,
    pub market_logs: usize,
    pub cooldowns: usize,
}

/// Records dropped while validating persisted state, per entity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    dropped: BTreeMap<&'static str, usize>,
    /// Set when an unreadable document was moved aside.
    pub quarantined: Option<String>,
}

impl LoadReport {
    pub fn drop_record(&mut self, entity: &'static str) {
        *self.dropped.entry(entity).or_insert(0) += 1;
    }

    #[cfg(test)]
    pub fn dropped(&self, entity: &str) -> usize {
        self.dropped.get(entity).copied().unwrap_or(0)
    }

    pub fn total_dropped(&self) -> usize {
        self.dropped.values().sum()
    }

    /// Log and export drop counts.
    pub fn emit(&self) {
        for (entity, count) in &self.dropped {
            metrics::counter!("pmwatch_state_records_dropped_total", "entity" => *entity)
                .increment(*count as u64);
            tracing::warn!(entity = *entity, count = *count, "dropped malformed state records");
        }
    }
}

pub trait StateStore {
    fn load(&mut self, max_seen: usize) -> Result<(WatchState, LoadReport), StateError>;
    fn save(&mut self, state: &WatchState) -> Result<(), StateError>;
}

pub fn open_store(
    backend: StateBackend,
    path: &Path,
) -> Result<Box<dyn StateStore + Send>, StateError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| StateError::io(parent, e))?;
    }
    Ok(match backend {
        StateBackend::Json => Box::new(json_store::JsonStore::new(path)),
        StateBackend::Sqlite => Box::new(sqlite_store::SqliteStore::open(path)?),
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use common::types::{Side, Trade};

    pub fn trade(id: &str, wallet: &str, market: &str, ts: i64) -> Trade {
        Trade {
            trade_id: id.to_string(),
            proxy_wallet: wallet.to_string(),
            side: Side::Buy,
            asset: format!("{market}-yes"),
            condition_id: market.to_string(),
            size: 10_000.0,
            price: 0.5,
            timestamp: ts,
            title: format!("Market {market}"),
            slug: format!("slug-{market}"),
            event_slug: String::new(),
            outcome: "Yes".to_string(),
            outcome_index: Some(0),
            transaction_hash: format!("0xtx-{id}"),
            name: None,
            pseudonym: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::trade;
    use super::*;

    const NOW: i64 = 1_700_000_000;
    const DAY: i64 = 24 * 60 * 60;

    fn retention() -> Retention {
        Retention {
            state_keep_seconds: 14 * DAY,
            market_events_keep_seconds: 6 * 60 * 60,
            market_events_max_per_market: 500,
        }
    }

    fn market(id: &str) -> Market {
        Market {
            condition_id: id.to_string(),
            question: String::new(),
            slug: String::new(),
            liquidity_num: None,
            volume24hr: None,
            outcomes: Vec::new(),
            outcome_prices: Vec::new(),
        }
    }

    #[test]
    fn test_unknown_wallet_yields_zero_stats() {
        let state = WatchState::new(10);
        let stats = state.wallet_stats("0xnobody", NOW, 2000.0);
        assert_eq!(stats.trades_total, 0);
        assert_eq!(stats.first_seen_ts, None);
        assert!(state.market_events("m").is_empty());
    }

    #[test]
    fn test_prune_removes_stale_unreferenced_entities() {
        let mut state = WatchState::new(10);
        let r = retention();
        state.record_wallet_event(&trade("t1", "0xold", "m-old", NOW - 20 * DAY), 5000.0, NOW - 20 * DAY);
        state.record_wallet_event(&trade("t2", "0xkept", "m-old", NOW - 20 * DAY), 5000.0, NOW - 20 * DAY);
        state.record_wallet_event(&trade("t3", "0xnew", "m-new", NOW - 60), 5000.0, NOW);
        state.record_market_event(&trade("t3", "0xnew", "m-new", NOW - 60), 5000.0, NOW, &r);
        state.record_market_event(&trade("t4", "0xold", "m-gone", NOW - DAY), 5000.0, NOW - DAY, &r);
        state.cache_market("m-old".to_string(), market("m-old"), NOW - 20 * DAY);
        state.cache_market("m-feed".to_string(), market("m-feed"), NOW - 20 * DAY);
        state.cache_market("m-new".to_string(), market("m-new"), NOW - 20 * DAY);
        state.cache_market("m-fresh".to_string(), market("m-fresh"), NOW - DAY);
        state.cooldowns_mut().mark("old-key", NOW - 15 * DAY);
        state.cooldowns_mut().mark("new-key", NOW - DAY);

        let keep_wallets: HashSet<String> = ["0xkept".to_string()].into_iter().collect();
        let keep_markets: HashSet<String> = ["m-feed".to_string()].into_iter().collect();
        let report = state.prune(NOW, &r, &keep_wallets, &keep_markets);

        assert!(state.wallet("0xold").is_none());
        assert!(state.wallet("0xkept").is_some());
        assert!(state.wallet("0xnew").is_some());

        assert!(state.cached_market("m-old").is_none());
        assert!(state.cached_market("m-feed").is_some());
        assert!(state.cached_market("m-new").is_some(), "market with live events is kept");
        assert!(state.cached_market("m-fresh").is_some());

        assert!(state.market_event_logs().all(|(id, _)| id != "m-gone"));
        assert_eq!(state.market_events("m-new").len(), 1);

        assert_eq!(state.cooldowns().iter().collect::<Vec<_>>(), vec![("new-key", NOW - DAY)]);
        assert_eq!(report.wallets, 1);
        assert_eq!(report.cooldowns, 1);
        assert_eq!(report.market_logs, 1);
        assert_eq!(report.markets, 1);
    }

    #[test]
    fn test_load_report_counts() {
        let mut report = LoadReport::default();
        report.drop_record("wallet_event");
        report.drop_record("wallet_event");
        report.drop_record("seen_trade_id");
        assert_eq!(report.dropped("wallet_event"), 2);
        assert_eq!(report.dropped("market"), 0);
        assert_eq!(report.total_dropped(), 3);
    }
}
