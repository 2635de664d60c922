//! Per-market window rubric: a fast window catches sharp repricing and bursts
//! of activity, an accumulation window catches a single wallet building a
//! one-directional position.

use super::{Reason, Score};
use crate::state::market_log::MarketEvent;
use crate::window_stats::{self, WindowStats};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    FastMove,
    Accumulation,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FastMove => "fast_move",
            Self::Accumulation => "accumulation",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Windows {
    pub fast_seconds: i64,
    pub accum_seconds: i64,
}

impl Windows {
    pub fn from_config(cfg: &common::config::Scoring) -> Self {
        Self {
            fast_seconds: cfg.fast_window_seconds,
            accum_seconds: cfg.accum_window_seconds,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarketSignal {
    pub fast: WindowStats,
    pub accum: WindowStats,
    pub fast_points: u32,
    pub accum_points: u32,
    pub score: Score,
}

impl MarketSignal {
    pub fn event_type(&self) -> EventType {
        if self.fast_points >= self.accum_points {
            EventType::FastMove
        } else {
            EventType::Accumulation
        }
    }

    /// Fast-window notional for a fast move, top-net notional for accumulation.
    pub fn alert_notional(&self) -> f64 {
        match self.event_type() {
            EventType::FastMove => self.fast.notional_sum,
            EventType::Accumulation => self
                .accum
                .top_net_wallet
                .as_ref()
                .map_or(0.0, |w| w.net_notional),
        }
    }

    pub fn top_net_wallet(&self) -> Option<&str> {
        self.accum
            .top_net_wallet
            .as_ref()
            .map(|w| w.wallet.as_str())
            .filter(|w| !w.is_empty())
    }
}

fn score_fast(stats: &WindowStats, score: &mut Score) -> u32 {
    let before = score.points;

    if let Some(range) = stats.price_range {
        if range >= 0.15 {
            score.add(6, Reason::MarketPriceMove30m);
        } else if range >= 0.08 {
            score.add(4, Reason::MarketPriceMove30m);
        }
    }

    if stats.notional_sum >= 50_000.0 {
        score.add(4, Reason::MarketHeat30m);
    } else if stats.notional_sum >= 20_000.0 {
        score.add(2, Reason::MarketHeat30m);
    }

    if stats.unique_wallets >= 20 {
        score.add(2, Reason::MarketParticipation30m);
    } else if stats.unique_wallets >= 5 {
        score.add(1, Reason::MarketParticipation30m);
    }

    score.points - before
}

fn score_accumulation(stats: &WindowStats, score: &mut Score) -> u32 {
    let before = score.points;
    let Some(net) = stats.top_net_wallet.as_ref() else {
        return 0;
    };
    if net.trades < 2 || net.share_of_wallet < 0.6 {
        return 0;
    }

    if net.net_notional >= 50_000.0 {
        score.add(6, Reason::WhaleAccumulation6h);
    } else if net.net_notional >= 25_000.0 {
        score.add(4, Reason::WhaleAccumulation6h);
    } else {
        return 0;
    }

    match net.share_of_market {
        Some(share) if share >= 0.8 => score.add(2, Reason::ConcentratedFlow6h),
        Some(share) if share >= 0.6 => score.add(1, Reason::ConcentratedFlow6h),
        _ => {}
    }

    if stats.price_range.is_some_and(|r| r <= 0.05) {
        score.add(1, Reason::QuietPrice6h);
    }

    score.points - before
}

/// Evaluate one market's event log at `now`.
pub fn evaluate(events: &[MarketEvent], now: i64, windows: Windows) -> MarketSignal {
    let fast = window_stats::compute(events, now - windows.fast_seconds);
    let accum = window_stats::compute(events, now - windows.accum_seconds);

    let mut score = Score::default();
    let fast_points = score_fast(&fast, &mut score);
    let accum_points = score_accumulation(&accum, &mut score);

    MarketSignal {
        fast,
        accum,
        fast_points,
        accum_points,
        score,
    }
}
