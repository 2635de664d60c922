//! Rolling aggregation of admitted trades into wallet and market state, plus
//! the per-pass bookkeeping the market-window rubric needs.

use crate::state::{Retention, WatchState};
use common::types::Trade;
use std::collections::HashMap;

/// Markets touched by recorded trades during one pass.
#[derive(Debug, Default)]
pub struct PassActivity {
    /// First-touched order.
    order: Vec<String>,
    latest_by_market: HashMap<String, Trade>,
    latest_by_market_wallet: HashMap<String, HashMap<String, Trade>>,
}

/// Later trades win timestamp ties.
fn supersedes(trade: &Trade, prev: Option<&Trade>) -> bool {
    prev.is_none_or(|prev| trade.timestamp >= prev.timestamp)
}

impl PassActivity {
    pub fn touch(&mut self, trade: &Trade) {
        let market = &trade.condition_id;
        if market.is_empty() {
            return;
        }
        if !self.latest_by_market.contains_key(market) {
            self.order.push(market.clone());
        }

        if supersedes(trade, self.latest_by_market.get(market)) {
            self.latest_by_market.insert(market.clone(), trade.clone());
        }

        let per_wallet = self.latest_by_market_wallet.entry(market.clone()).or_default();
        if supersedes(trade, per_wallet.get(&trade.proxy_wallet)) {
            per_wallet.insert(trade.proxy_wallet.clone(), trade.clone());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Touched markets with their latest trade, in first-touched order.
    pub fn markets(&self) -> impl Iterator<Item = (&str, &Trade)> {
        self.order.iter().filter_map(|m| {
            self.latest_by_market
                .get(m)
                .map(|trade| (m.as_str(), trade))
        })
    }

    pub fn latest_for_wallet(&self, market: &str, wallet: &str) -> Option<&Trade> {
        self.latest_by_market_wallet.get(market)?.get(wallet)
    }
}

/// Record an admitted trade. Trades below `min_notional` are never stored.
/// Returns whether the trade was recorded.
pub fn record(
    state: &mut WatchState,
    activity: &mut PassActivity,
    trade: &Trade,
    notional: f64,
    min_notional: f64,
    now: i64,
    retention: &Retention,
) -> bool {
    if notional < min_notional {
        return false;
    }
    state.record_wallet_event(trade, notional, now);
    if !trade.condition_id.is_empty() {
        state.record_market_event(trade, notional, now, retention);
    }
    activity.touch(trade);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::trade;

    const RETENTION: Retention = Retention {
        state_keep_seconds: 14 * 86_400,
        market_events_keep_seconds: 21_600,
        market_events_max_per_market: 500,
    };

    #[test]
    fn test_small_trades_are_not_recorded() {
        let mut state = WatchState::new(10);
        let mut activity = PassActivity::default();
        let t = trade("t1", "0xw", "m1", 1_000);
        assert!(!record(&mut state, &mut activity, &t, 1_999.0, 2_000.0, 1_000, &RETENTION));
        assert!(state.wallet("0xw").is_none());
        assert!(state.market_events("m1").is_empty());
        assert!(activity.is_empty());
    }

    #[test]
    fn test_record_updates_wallet_market_and_activity() {
        let mut state = WatchState::new(10);
        let mut activity = PassActivity::default();
        let t = trade("t1", "0xw", "m1", 1_000);
        assert!(record(&mut state, &mut activity, &t, 5_000.0, 2_000.0, 1_000, &RETENTION));
        assert_eq!(state.wallet("0xw").map(|w| w.trades_total()), Some(1));
        assert_eq!(state.market_events("m1").len(), 1);
        assert_eq!(
            activity.markets().map(|(m, t)| (m, t.trade_id.as_str())).collect::<Vec<_>>(),
            vec![("m1", "t1")]
        );
    }

    #[test]
    fn test_latest_trade_ties_go_to_later_trade() {
        let mut activity = PassActivity::default();
        activity.touch(&trade("a", "0xw", "m1", 100));
        activity.touch(&trade("b", "0xw", "m1", 100));
        activity.touch(&trade("c", "0xv", "m1", 99));
        let (_, latest) = activity.markets().next().unwrap();
        assert_eq!(latest.trade_id, "b");
        assert_eq!(activity.latest_for_wallet("m1", "0xw").unwrap().trade_id, "b");
        assert_eq!(activity.latest_for_wallet("m1", "0xv").unwrap().trade_id, "c");
        assert!(activity.latest_for_wallet("m1", "0xu").is_none());
    }

    #[test]
    fn test_markets_in_first_touched_order() {
        let mut activity = PassActivity::default();
        activity.touch(&trade("a", "0xw", "zeta", 100));
        activity.touch(&trade("b", "0xw", "alpha", 101));
        activity.touch(&trade("c", "0xw", "zeta", 102));
        let order: Vec<&str> = activity.markets().map(|(m, _)| m).collect();
        assert_eq!(order, vec!["zeta", "alpha"]);
    }

    #[test]
    fn test_trade_without_market_only_updates_wallet() {
        let mut state = WatchState::new(10);
        let mut activity = PassActivity::default();
        let t = trade("t1", "0xw", "", 1_000);
        assert!(record(&mut state, &mut activity, &t, 5_000.0, 2_000.0, 1_000, &RETENTION));
        assert!(state.wallet("0xw").is_some());
        assert_eq!(state.market_event_logs().count(), 0);
        assert!(activity.is_empty());
    }
}
