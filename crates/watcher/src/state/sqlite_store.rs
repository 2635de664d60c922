use super::checkpoint::FetchCheckpoint;
use super::cooldown::CooldownLedger;
use super::market_log::{MarketEvent, MarketEventLog};
use super::seen::SeenTradeSet;
use super::wallet::{WalletEvent, WalletState};
use super::{LoadReport, StateStore, WatchState, STATE_VERSION};
use common::db::Database;
use common::error::StateError;
use common::types::{Market, Side};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// SQLite-backed state. Every save rewrites all tables inside one transaction.
pub struct SqliteStore {
    db: Database,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StateError> {
        let db = Database::open(&path.to_string_lossy())
            .and_then(|db| db.run_migrations().map(|()| db))
            .map_err(|e| match e.downcast::<rusqlite::Error>() {
                Ok(sql) => StateError::Database(sql),
                Err(other) => StateError::io(
                    path,
                    std::io::Error::other(other.to_string()),
                ),
            })?;
        Ok(Self { db })
    }

    #[cfg(test)]
    fn conn(&self) -> &Connection {
        &self.db.conn
    }
}

fn meta(conn: &Connection, key: &str) -> Result<Option<String>, rusqlite::Error> {
    conn.query_row(
        "SELECT value FROM state_meta WHERE key = ?1",
        [key],
        |row| row.get(0),
    )
    .optional()
}

fn finite_non_negative(v: f64) -> Option<f64> {
    (v.is_finite() && v >= 0.0).then_some(v)
}

impl StateStore for SqliteStore {
    fn load(&mut self, max_seen: usize) -> Result<(WatchState, LoadReport), StateError> {
        let conn = &self.db.conn;
        let mut state = WatchState::new(max_seen);
        let mut report = LoadReport::default();

        if let Some(version) = meta(conn, "version")?.and_then(|v| v.parse::<i64>().ok()) {
            if version > STATE_VERSION {
                return Err(StateError::UnsupportedVersion(version));
            }
        }
        if let Some(ts) = meta(conn, "updated_at")?.and_then(|v| v.parse::<i64>().ok()) {
            state.set_updated_at(ts);
        }

        // wallet_events and wallet_markets are grouped first so each wallet is built once.
        let mut events_by_wallet: BTreeMap<String, Vec<WalletEvent>> = BTreeMap::new();
        {
            let mut stmt = conn.prepare(
                "SELECT address, ts, market_id, notional FROM wallet_events ORDER BY address, id",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, f64>(3)?,
                ))
            })?;
            for row in rows {
                match row {
                    Ok((address, ts, market_id, notional)) => {
                        match finite_non_negative(notional) {
                            Some(notional) => events_by_wallet.entry(address).or_default().push(
                                WalletEvent {
                                    ts,
                                    market_id,
                                    notional,
                                },
                            ),
                            None => report.drop_record("wallet_event"),
                        }
                    }
                    Err(_) => report.drop_record("wallet_event"),
                }
            }
        }

        let mut markets_by_wallet: BTreeMap<String, Vec<String>> = BTreeMap::new();
        {
            let mut stmt = conn.prepare(
                "SELECT address, market_id FROM wallet_markets ORDER BY address, position",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            for row in rows {
                match row {
                    Ok((address, market_id)) => {
                        markets_by_wallet.entry(address).or_default().push(market_id);
                    }
                    Err(_) => report.drop_record("wallet_market"),
                }
            }
        }

        {
            let mut stmt = conn.prepare(
                "SELECT address, first_seen_ts, last_seen_ts, trades_total FROM wallets ORDER BY address",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<i64>>(1)?,
                    row.get::<_, Option<i64>>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })?;
            for row in rows {
                let Ok((address, first_seen, last_seen, trades_total)) = row else {
                    report.drop_record("wallet");
                    continue;
                };
                let events = events_by_wallet.remove(&address).unwrap_or_default();
                let markets = markets_by_wallet.remove(&address).unwrap_or_default();
                state.insert_wallet(
                    address,
                    WalletState::from_parts(
                        first_seen,
                        last_seen,
                        u64::try_from(trades_total).unwrap_or(0),
                        events,
                        markets,
                    ),
                );
            }
        }
        // Orphaned child rows.
        for events in events_by_wallet.values() {
            for _ in events {
                report.drop_record("wallet_event");
            }
        }

        {
            let mut stmt = conn.prepare(
                "SELECT condition_id, question, slug, liquidity_num, volume24hr,
                        outcomes_json, outcome_prices_json, updated_ts
                 FROM markets ORDER BY condition_id",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<f64>>(3)?,
                    row.get::<_, Option<f64>>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, i64>(7)?,
                ))
            })?;
            for row in rows {
                let Ok((id, question, slug, liquidity, volume, outcomes, prices, updated_ts)) = row
                else {
                    report.drop_record("market");
                    continue;
                };
                let (Ok(outcomes), Ok(outcome_prices)) = (
                    serde_json::from_str::<Vec<String>>(&outcomes),
                    serde_json::from_str::<Vec<f64>>(&prices),
                ) else {
                    report.drop_record("market");
                    continue;
                };
                let market = Market {
                    condition_id: id.clone(),
                    question,
                    slug,
                    liquidity_num: liquidity.and_then(finite_non_negative),
                    volume24hr: volume.and_then(finite_non_negative),
                    outcomes,
                    outcome_prices,
                };
                state.cache_market(id, market, updated_ts);
            }
        }

        {
            let mut logs: BTreeMap<String, Vec<MarketEvent>> = BTreeMap::new();
            let mut stmt = conn.prepare(
                "SELECT market_id, ts, wallet, price, notional, outcome_index, side
                 FROM market_events ORDER BY market_id, id",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, f64>(4)?,
                    row.get::<_, Option<i64>>(5)?,
                    row.get::<_, Option<String>>(6)?,
                ))
            })?;
            for row in rows {
                match row {
                    Ok((market_id, ts, wallet, price, notional, outcome_index, side))
                        if price.is_finite() && notional.is_finite() =>
                    {
                        logs.entry(market_id).or_default().push(MarketEvent {
                            ts,
                            wallet,
                            price,
                            notional,
                            outcome_index: outcome_index.filter(|i| *i >= 0),
                            side: side.as_deref().and_then(Side::from_str_loose),
                        });
                    }
                    _ => report.drop_record("market_event"),
                }
            }
            for (market_id, events) in logs {
                state.insert_market_log(market_id, MarketEventLog::from_events(events));
            }
        }

        {
            let mut stmt = conn.prepare("SELECT trade_id FROM seen_trades ORDER BY seq")?;
            let ids: Vec<String> = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .filter_map(|r| match r {
                    Ok(id) => Some(id),
                    Err(_) => {
                        report.drop_record("seen_trade_id");
                        None
                    }
                })
                .collect();
            state.set_seen(SeenTradeSet::from_ids(ids, max_seen));
        }

        {
            let mut stmt = conn.prepare("SELECT alert_key, last_alert_ts FROM alert_cooldowns")?;
            let ledger: CooldownLedger = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
                .filter_map(|r| match r {
                    Ok(entry) => Some(entry),
                    Err(_) => {
                        report.drop_record("cooldown");
                        None
                    }
                })
                .collect();
            state.set_cooldowns(ledger);
        }

        let last_ts = meta(conn, "last_fetched_trade_ts")?.and_then(|v| v.parse::<i64>().ok());
        let last_ids: BTreeSet<String> = match meta(conn, "last_fetched_trade_ids")? {
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(ids) => ids,
                Err(_) => {
                    report.drop_record("checkpoint_id");
                    BTreeSet::new()
                }
            },
            None => BTreeSet::new(),
        };
        state.set_checkpoint(FetchCheckpoint::new(last_ts, last_ids));

        Ok((state, report))
    }

    fn save(&mut self, state: &WatchState) -> Result<(), StateError> {
        let tx = self.db.conn.transaction()?;
        tx.execute_batch(
            "DELETE FROM wallets;
             DELETE FROM wallet_events;
             DELETE FROM wallet_markets;
             DELETE FROM markets;
             DELETE FROM market_events;
             DELETE FROM seen_trades;
             DELETE FROM alert_cooldowns;
             DELETE FROM state_meta;",
        )?;
        {
            let mut insert_wallet = tx.prepare(
                "INSERT INTO wallets (address, first_seen_ts, last_seen_ts, trades_total)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            let mut insert_event = tx.prepare(
                "INSERT INTO wallet_events (address, ts, market_id, notional) VALUES (?1, ?2, ?3, ?4)",
            )?;
            let mut insert_market_ref = tx.prepare(
                "INSERT OR IGNORE INTO wallet_markets (address, position, market_id) VALUES (?1, ?2, ?3)",
            )?;
            for (address, w) in state.wallets() {
                insert_wallet.execute(params![
                    address,
                    w.first_seen_ts(),
                    w.last_seen_ts(),
                    i64::try_from(w.trades_total()).unwrap_or(i64::MAX),
                ])?;
                for e in w.events() {
                    insert_event.execute(params![address, e.ts, e.market_id, e.notional])?;
                }
                for (position, market_id) in w.markets().iter().enumerate() {
                    insert_market_ref.execute(params![address, position as i64, market_id])?;
                }
            }

            let mut insert_cached = tx.prepare(
                "INSERT INTO markets (condition_id, question, slug, liquidity_num, volume24hr,
                                      outcomes_json, outcome_prices_json, updated_ts)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for (id, cached) in state.markets() {
                let m = &cached.market;
                insert_cached.execute(params![
                    id,
                    m.question,
                    m.slug,
                    m.liquidity_num,
                    m.volume24hr,
                    serde_json::to_string(&m.outcomes)?,
                    serde_json::to_string(&m.outcome_prices)?,
                    cached.updated_ts,
                ])?;
            }

            let mut insert_market_event = tx.prepare(
                "INSERT INTO market_events (market_id, ts, wallet, price, notional, outcome_index, side)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for (market_id, log) in state.market_event_logs() {
                for e in log.events() {
                    insert_market_event.execute(params![
                        market_id,
                        e.ts,
                        e.wallet,
                        e.price,
                        e.notional,
                        e.outcome_index,
                        e.side.as_ref().map(Side::as_str),
                    ])?;
                }
            }

            let mut insert_seen =
                tx.prepare("INSERT OR IGNORE INTO seen_trades (seq, trade_id) VALUES (?1, ?2)")?;
            for (seq, id) in state.seen().iter().enumerate() {
                insert_seen.execute(params![seq as i64, id])?;
            }

            let mut insert_cooldown = tx
                .prepare("INSERT INTO alert_cooldowns (alert_key, last_alert_ts) VALUES (?1, ?2)")?;
            for (key, ts) in state.cooldowns().iter() {
                insert_cooldown.execute(params![key, ts])?;
            }

            let mut insert_meta = tx.prepare("INSERT INTO state_meta (key, value) VALUES (?1, ?2)")?;
            insert_meta.execute(params!["version", STATE_VERSION.to_string()])?;
            if let Some(ts) = state.updated_at() {
                insert_meta.execute(params!["updated_at", ts.to_string()])?;
            }
            if let Some(ts) = state.checkpoint().last_ts() {
                insert_meta.execute(params!["last_fetched_trade_ts", ts.to_string()])?;
            }
            insert_meta.execute(params![
                "last_fetched_trade_ids",
                serde_json::to_string(state.checkpoint().ids_at_last_ts())?,
            ])?;
        }
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::trade;
    use crate::state::Retention;

    const NOW: i64 = 1_700_000_000;

    fn retention() -> Retention {
        Retention {
            state_keep_seconds: 14 * 24 * 3600,
            market_events_keep_seconds: 6 * 3600,
            market_events_max_per_market: 500,
        }
    }

    #[test]
    fn test_save_then_load_preserves_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SqliteStore::open(&dir.path().join("state.db")).unwrap();

        let mut state = WatchState::new(100);
        let mut unknown_outcome = trade("t2", "0xother", "m1", NOW - 10);
        unknown_outcome.outcome_index = None;
        for t in [trade("t1", "0xw", "m1", NOW - 20), unknown_outcome] {
            state.record_wallet_event(&t, 4000.0, NOW);
            state.record_market_event(&t, 4000.0, NOW, &retention());
            state.seen_mut().insert(t.trade_id.clone());
        }
        state.cooldowns_mut().mark("0xw:m1", NOW);
        state.checkpoint_mut().advance(&[trade("t2", "0xother", "m1", NOW - 10)]);
        state.cache_market(
            "m1".to_string(),
            Market {
                condition_id: "m1".to_string(),
                question: "Q?".to_string(),
                slug: "q".to_string(),
                liquidity_num: None,
                volume24hr: Some(12.5),
                outcomes: vec!["Yes".to_string(), "No".to_string()],
                outcome_prices: vec![0.3, 0.7],
            },
            NOW,
        );
        state.set_updated_at(NOW);
        store.save(&state).unwrap();

        let (loaded, report) = store.load(100).unwrap();
        assert_eq!(report.total_dropped(), 0);
        assert_eq!(loaded.wallet("0xw"), state.wallet("0xw"));
        assert_eq!(loaded.wallet("0xother"), state.wallet("0xother"));
        assert_eq!(loaded.market_events("m1"), state.market_events("m1"));
        assert_eq!(loaded.market_events("m1")[1].outcome_index, None);
        assert_eq!(loaded.seen().iter().collect::<Vec<_>>(), vec!["t1", "t2"]);
        assert_eq!(loaded.cooldowns(), state.cooldowns());
        assert_eq!(loaded.checkpoint(), state.checkpoint());
        assert_eq!(loaded.cached_market("m1"), state.cached_market("m1"));
        assert_eq!(loaded.updated_at(), Some(NOW));
    }

    #[test]
    fn test_save_replaces_previous_contents() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SqliteStore::open(&dir.path().join("state.db")).unwrap();

        let mut state = WatchState::new(10);
        state.seen_mut().insert("old".to_string());
        store.save(&state).unwrap();

        let mut state = WatchState::new(10);
        state.seen_mut().insert("new".to_string());
        store.save(&state).unwrap();

        let (loaded, _) = store.load(10).unwrap();
        assert_eq!(loaded.seen().iter().collect::<Vec<_>>(), vec!["new"]);
    }

    #[test]
    fn test_malformed_rows_are_dropped_and_counted() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SqliteStore::open(&dir.path().join("state.db")).unwrap();
        store
            .conn()
            .execute_batch(
                "INSERT INTO wallets (address, first_seen_ts, last_seen_ts, trades_total) VALUES ('0xw', 1, 2, 3);
                 INSERT INTO wallet_events (address, ts, market_id, notional) VALUES ('0xw', 'later', 'm1', 10.0);
                 INSERT INTO wallet_events (address, ts, market_id, notional) VALUES ('0xw', 5, 'm1', 10.0);
                 INSERT INTO markets (condition_id, question, slug, outcomes_json, outcome_prices_json, updated_ts)
                     VALUES ('m1', 'Q', 's', 'not json', '[]', 1);
                 INSERT INTO market_events (market_id, ts, wallet, price, notional, outcome_index, side)
                     VALUES ('m1', 1, '0xw', 'abc', 1.0, 0, 'BUY');",
            )
            .unwrap();

        let (state, report) = store.load(10).unwrap();
        assert_eq!(state.wallet("0xw").unwrap().events().len(), 1);
        assert_eq!(state.wallet("0xw").unwrap().trades_total(), 3);
        assert!(state.cached_market("m1").is_none());
        assert_eq!(report.dropped("wallet_event"), 1);
        assert_eq!(report.dropped("market"), 1);
        assert_eq!(report.dropped("market_event"), 1);
    }
}
