//! Deterministic heuristic rubrics. Each rule that fires adds points and
//! appends its reason label, so the same inputs always yield the same
//! `(score, reasons)`.

pub mod market_rubric;
pub mod trade_rubric;

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reason {
    LargeTrade,
    NewWalletToSystem,
    ConcentratedActivity7d,
    LargeVsLiquidity,
    LowLiquidityMarket,
    LargeVs24hVolume,
    Low24hVolumeMarket,
    ExtremePrice,
    RecentTrade,
    MarketPriceMove30m,
    MarketHeat30m,
    MarketParticipation30m,
    WhaleAccumulation6h,
    ConcentratedFlow6h,
    QuietPrice6h,
}

impl Reason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LargeTrade => "large_trade",
            Self::NewWalletToSystem => "new_wallet_to_system",
            Self::ConcentratedActivity7d => "concentrated_activity_7d",
            Self::LargeVsLiquidity => "large_vs_liquidity",
            Self::LowLiquidityMarket => "low_liquidity_market",
            Self::LargeVs24hVolume => "large_vs_24h_volume",
            Self::Low24hVolumeMarket => "low_24h_volume_market",
            Self::ExtremePrice => "extreme_price",
            Self::RecentTrade => "recent_trade",
            Self::MarketPriceMove30m => "market_price_move_30m",
            Self::MarketHeat30m => "market_heat_30m",
            Self::MarketParticipation30m => "market_participation_30m",
            Self::WhaleAccumulation6h => "whale_accumulation_6h",
            Self::ConcentratedFlow6h => "concentrated_flow_6h",
            Self::QuietPrice6h => "quiet_price_6h",
        }
    }

    /// Trade-rubric reasons that are copied onto market-window alerts as context.
    pub fn is_context_tag(&self) -> bool {
        matches!(
            self,
            Self::NewWalletToSystem | Self::ConcentratedActivity7d | Self::ExtremePrice
        )
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accumulated points and the ordered reasons that produced them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Score {
    pub points: u32,
    pub reasons: Vec<Reason>,
}

impl Score {
    pub fn add(&mut self, points: u32, reason: Reason) {
        self.points += points;
        self.reasons.push(reason);
    }

    #[cfg(test)]
    pub fn has(&self, reason: Reason) -> bool {
        self.reasons.contains(&reason)
    }

    pub fn reason_labels(&self) -> Vec<String> {
        self.reasons.iter().map(|r| r.as_str().to_string()).collect()
    }
}
