//! Windowed market statistics over a market's recorded events.
//!
//! Prices are canonicalized to the implied probability of outcome 0 so trades on
//! the two sides of a binary market compare directly. Any event on an outcome
//! other than 0 or 1 marks the window as multi-outcome, which leaves the
//! canonical price range and every net-direction field undefined.

use crate::state::market_log::MarketEvent;
use common::types::Side;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Bought outcome 0 or sold outcome 1.
    #[serde(rename = "pro0")]
    Pro0,
    #[serde(rename = "anti0")]
    Anti0,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pro0 => "pro0",
            Self::Anti0 => "anti0",
        }
    }

    fn of(outcome_index: i64, side: Side) -> Self {
        match (outcome_index, side) {
            (0, Side::Buy) | (1, Side::Sell) => Self::Pro0,
            _ => Self::Anti0,
        }
    }
}

/// Largest wallet by gross notional.
#[derive(Debug, Clone, PartialEq)]
pub struct TopWallet {
    pub wallet: String,
    pub notional: f64,
    /// Share of the window's total notional.
    pub share: Option<f64>,
    pub trades: usize,
}

/// Wallet with the largest one-directional imbalance.
#[derive(Debug, Clone, PartialEq)]
pub struct TopNetWallet {
    pub wallet: String,
    /// `|pro - anti|`.
    pub net_notional: f64,
    pub direction: Direction,
    /// Net divided by the wallet's own directional volume.
    pub share_of_wallet: f64,
    /// Net divided by the window's total notional; absent when that is zero.
    pub share_of_market: Option<f64>,
    /// Trades in the dominant direction.
    pub trades: usize,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct WindowStats {
    pub notional_sum: f64,
    pub unique_wallets: usize,
    /// Canonical (outcome-0) price range.
    pub price_range: Option<f64>,
    pub price_range_raw: Option<f64>,
    pub top_wallet: Option<TopWallet>,
    pub top_net_wallet: Option<TopNetWallet>,
    pub multi_outcome: bool,
}

#[derive(Default)]
struct WalletTally {
    gross: f64,
    trades: usize,
    pro: f64,
    anti: f64,
    pro_trades: usize,
    anti_trades: usize,
}

fn range(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let (min, max) = values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(*v), hi.max(*v)));
    Some(max - min)
}

/// Statistics over `events` with `ts >= since_ts`.
pub fn compute(events: &[MarketEvent], since_ts: i64) -> WindowStats {
    let mut notional_sum = 0.0;
    let mut raw_prices = Vec::new();
    let mut p0_prices = Vec::new();
    let mut multi_outcome = false;
    // First-seen order decides ties.
    let mut order: Vec<&str> = Vec::new();
    let mut tallies: HashMap<&str, WalletTally> = HashMap::new();

    for e in events.iter().filter(|e| e.ts >= since_ts) {
        notional_sum += e.notional;
        raw_prices.push(e.price);

        let tally = tallies.entry(e.wallet.as_str()).or_insert_with(|| {
            order.push(e.wallet.as_str());
            WalletTally::default()
        });
        tally.gross += e.notional;
        tally.trades += 1;

        let Some(outcome) = e.outcome_index else {
            continue;
        };
        if outcome != 0 && outcome != 1 {
            multi_outcome = true;
            continue;
        }
        let p0 = if outcome == 0 { e.price } else { 1.0 - e.price };
        p0_prices.push(p0.clamp(0.0, 1.0));

        if let Some(side) = e.side {
            match Direction::of(outcome, side) {
                Direction::Pro0 => {
                    tally.pro += e.notional;
                    tally.pro_trades += 1;
                }
                Direction::Anti0 => {
                    tally.anti += e.notional;
                    tally.anti_trades += 1;
                }
            }
        }
    }

    let mut top_wallet: Option<TopWallet> = None;
    for wallet in &order {
        let t = &tallies[wallet];
        let best = top_wallet.as_ref().map_or(0.0, |w| w.notional);
        if t.gross > best {
            top_wallet = Some(TopWallet {
                wallet: (*wallet).to_string(),
                notional: t.gross,
                share: None,
                trades: t.trades,
            });
        }
    }
    if let Some(top) = top_wallet.as_mut() {
        top.share = (notional_sum > 0.0).then(|| top.notional / notional_sum);
    }

    let mut top_net_wallet: Option<TopNetWallet> = None;
    if !multi_outcome {
        for wallet in &order {
            let t = &tallies[wallet];
            let total = t.pro + t.anti;
            if total <= 0.0 {
                continue;
            }
            let net = (t.pro - t.anti).abs();
            let best = top_net_wallet.as_ref().map_or(0.0, |w| w.net_notional);
            if net <= best {
                continue;
            }
            let (direction, trades) = if t.pro >= t.anti {
                (Direction::Pro0, t.pro_trades)
            } else {
                (Direction::Anti0, t.anti_trades)
            };
            top_net_wallet = Some(TopNetWallet {
                wallet: (*wallet).to_string(),
                net_notional: net,
                direction,
                share_of_wallet: net / total,
                share_of_market: (notional_sum > 0.0).then(|| net / notional_sum),
                trades,
            });
        }
    }

    WindowStats {
        notional_sum,
        unique_wallets: order.len(),
        price_range: if multi_outcome { None } else { range(&p0_prices) },
        price_range_raw: range(&raw_prices),
        top_wallet,
        top_net_wallet,
        multi_outcome,
    }
}
