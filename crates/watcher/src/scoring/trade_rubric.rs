use super::{Reason, Score};
use crate::state::wallet::WalletStats;
use common::types::{Market, Trade};

const LIQUIDITY_FRACTION: f64 = 0.01;
const LOW_LIQUIDITY: f64 = 50_000.0;
const VOLUME_FRACTION: f64 = 0.05;
const LOW_VOLUME_24H: f64 = 25_000.0;
const RECENT_SECS: i64 = 60;

pub fn is_extreme_price(price: f64) -> bool {
    price <= 0.05 || price >= 0.95
}

/// Score one trade against its wallet history and market snapshot.
pub fn score_trade(
    trade: &Trade,
    notional: f64,
    wallet: &WalletStats,
    market: Option<&Market>,
    min_notional: f64,
    now: i64,
) -> Score {
    let mut score = Score::default();

    if notional >= min_notional {
        score.add(1, Reason::LargeTrade);
    }

    if wallet.trades_total <= 1 {
        score.add(2, Reason::NewWalletToSystem);
    }

    if wallet.trades_7d >= 3 && wallet.unique_markets_7d <= 3 {
        score.add(1, Reason::ConcentratedActivity7d);
    }

    if let Some(liquidity) = market.and_then(|m| m.liquidity_num) {
        if liquidity > 0.0 && notional / liquidity >= LIQUIDITY_FRACTION {
            score.add(1, Reason::LargeVsLiquidity);
        }
        if liquidity < LOW_LIQUIDITY {
            score.add(1, Reason::LowLiquidityMarket);
        }
    }

    if let Some(volume) = market.and_then(|m| m.volume24hr) {
        if volume > 0.0 && notional / volume >= VOLUME_FRACTION {
            score.add(1, Reason::LargeVs24hVolume);
        }
        if volume < LOW_VOLUME_24H {
            score.add(1, Reason::Low24hVolumeMarket);
        }
    }

    if is_extreme_price(trade.price) {
        score.add(1, Reason::ExtremePrice);
    }

    // Tag only.
    if now - trade.timestamp <= RECENT_SECS {
        score.add(0, Reason::RecentTrade);
    }

    score
}

/// A trade alerts only when it clears both the notional floor and the score floor.
pub fn should_alert(score: &Score, notional: f64, min_notional: f64, min_score: u32) -> bool {
    notional >= min_notional && score.points >= min_score
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::trade;

    fn stats(trades_total: u64, trades_7d: usize, unique_markets_7d: usize) -> WalletStats {
        WalletStats {
            trades_total,
            trades_7d,
            unique_markets_7d,
            ..WalletStats::empty("0xw")
        }
    }

    fn market(liquidity: Option<f64>, volume: Option<f64>) -> Market {
        Market {
            condition_id: "m1".to_string(),
            question: "Will it?".to_string(),
            slug: "will-it".to_string(),
            liquidity_num: liquidity,
            volume24hr: volume,
            outcomes: vec!["Yes".to_string(), "No".to_string()],
            outcome_prices: vec![0.5, 0.5],
        }
    }

    #[test]
    fn test_full_rubric_is_deterministic() {
        // notional 5000 on a 10k-liquidity, 20k-volume market, new wallet, extreme price.
        let mut t = trade("t1", "0xw", "m1", 1_000);
        t.price = 0.97;
        let m = market(Some(10_000.0), Some(20_000.0));
        let first = score_trade(&t, 5_000.0, &stats(1, 1, 1), Some(&m), 2_000.0, 1_030);
        let second = score_trade(&t, 5_000.0, &stats(1, 1, 1), Some(&m), 2_000.0, 1_030);
        assert_eq!(first, second);
        assert_eq!(first.points, 1 + 2 + 1 + 1 + 1 + 1 + 1);
        assert_eq!(
            first.reason_labels(),
            vec![
                "large_trade",
                "new_wallet_to_system",
                "large_vs_liquidity",
                "low_liquidity_market",
                "large_vs_24h_volume",
                "low_24h_volume_market",
                "extreme_price",
                "recent_trade",
            ]
        );
    }

    #[test]
    fn test_concentrated_activity() {
        let t = trade("t1", "0xw", "m1", 0);
        let s = score_trade(&t, 100.0, &stats(10, 3, 3), None, 2_000.0, 10_000);
        assert_eq!(s.points, 1);
        assert_eq!(s.reasons, vec![Reason::ConcentratedActivity7d]);

        let s = score_trade(&t, 100.0, &stats(10, 3, 4), None, 2_000.0, 10_000);
        assert_eq!(s.points, 0);
        assert!(s.reasons.is_empty());
    }

    #[test]
    fn test_zero_liquidity_only_counts_as_low() {
        let t = trade("t1", "0xw", "m1", 0);
        let m = market(Some(0.0), Some(0.0));
        let s = score_trade(&t, 3_000.0, &stats(5, 0, 0), Some(&m), 2_000.0, 10_000);
        assert_eq!(
            s.reasons,
            vec![
                Reason::LargeTrade,
                Reason::LowLiquidityMarket,
                Reason::Low24hVolumeMarket
            ]
        );
    }

    #[test]
    fn test_deep_market_adds_nothing() {
        let t = trade("t1", "0xw", "m1", 0);
        let m = market(Some(5_000_000.0), Some(10_000_000.0));
        let s = score_trade(&t, 3_000.0, &stats(5, 0, 0), Some(&m), 2_000.0, 10_000);
        assert_eq!(s.points, 1);
        assert_eq!(s.reasons, vec![Reason::LargeTrade]);
    }

    #[test]
    fn test_recent_trade_is_tag_only() {
        let t = trade("t1", "0xw", "m1", 1_000);
        let s = score_trade(&t, 100.0, &stats(5, 0, 0), None, 2_000.0, 1_060);
        assert_eq!(s.points, 0);
        assert_eq!(s.reasons, vec![Reason::RecentTrade]);
        let s = score_trade(&t, 100.0, &stats(5, 0, 0), None, 2_000.0, 1_061);
        assert!(s.reasons.is_empty());
    }

    #[test]
    fn test_should_alert_needs_both_floors() {
        let mut s = Score::default();
        s.add(2, Reason::NewWalletToSystem);
        s.add(1, Reason::ExtremePrice);
        assert!(!should_alert(&s, 1_999.0, 2_000.0, 3));
        assert!(should_alert(&s, 2_000.0, 2_000.0, 3));
        assert!(!should_alert(&s, 2_000.0, 2_000.0, 4));
    }

    #[test]
    fn test_extreme_price_bounds() {
        assert!(is_extreme_price(0.05));
        assert!(is_extreme_price(0.95));
        assert!(!is_extreme_price(0.06));
        assert!(!is_extreme_price(0.94));
    }
}
