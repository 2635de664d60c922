//! One polling pass: fetch, gate, aggregate, score.

use crate::aggregator::{self, PassActivity};
use crate::alert::{AlertMetrics, AlertRecord};
use crate::fetcher::TradeSource;
use crate::gate::{self, Admission};
use crate::scoring::market_rubric::{self, Windows};
use crate::scoring::trade_rubric;
use crate::state::{Retention, WatchState};
use anyhow::{Context, Result};
use common::config::{Config, ScoringStrategy};
use common::polymarket::MAX_TRADES_LIMIT;
use common::types::{Market, Trade};

#[derive(Debug, Clone)]
pub struct PassSettings {
    pub strategy: ScoringStrategy,
    pub limit: u32,
    pub max_pages: u32,
    pub min_notional: f64,
    pub min_score: u32,
    pub cooldown_seconds: i64,
    pub windows: Windows,
    pub retention: Retention,
}

impl PassSettings {
    pub fn from_config(cfg: &Config) -> Self {
        let limit = cfg.ingestion.limit.min(MAX_TRADES_LIMIT);
        if limit != cfg.ingestion.limit {
            tracing::warn!(requested = cfg.ingestion.limit, used = limit, "trade limit capped");
        }
        Self {
            strategy: cfg.scoring.strategy,
            limit,
            max_pages: cfg.ingestion.max_pages.max(1),
            min_notional: cfg.scoring.min_notional,
            min_score: cfg.scoring.effective_min_score(),
            cooldown_seconds: cfg.scoring.effective_cooldown_seconds(),
            windows: Windows::from_config(&cfg.scoring),
            retention: Retention::from_config(&cfg.state),
        }
    }
}

#[derive(Debug, Default)]
pub struct PassReport {
    pub fetched: usize,
    pub new: usize,
    pub skipped_seen: usize,
    pub skipped_checkpoint: usize,
    pub recorded: usize,
    pub alerts: Vec<AlertRecord>,
}

/// Page through recent trades, newest first, until a short page, the fetch
/// checkpoint, or `max_pages`.
pub async fn fetch_trades<S: TradeSource>(
    source: &S,
    checkpoint_ts: Option<i64>,
    limit: u32,
    max_pages: u32,
) -> Result<Vec<Trade>> {
    let mut trades = Vec::new();
    for page in 0..max_pages {
        let offset = page.saturating_mul(limit);
        let batch = source
            .fetch_recent_trades(limit, offset)
            .await
            .with_context(|| format!("failed to fetch trades (offset {offset})"))?;
        let short = batch.len() < limit as usize;
        let reached_checkpoint = checkpoint_ts
            .is_some_and(|last| batch.iter().any(|t| t.timestamp <= last));
        tracing::debug!(page, count = batch.len(), reached_checkpoint, "fetched trade page");
        trades.extend(batch);
        if short || reached_checkpoint {
            break;
        }
    }
    Ok(trades)
}

/// Cached snapshot, else a fresh fetch that is cached on success. Fetch
/// failures degrade to no market.
async fn resolve_market<S: TradeSource>(
    source: &S,
    state: &mut WatchState,
    condition_id: &str,
    now: i64,
) -> Option<Market> {
    if condition_id.is_empty() {
        return None;
    }
    if let Some(m) = state.cached_market(condition_id) {
        return Some(m.clone());
    }
    match source.fetch_market(condition_id).await {
        Ok(Some(m)) => {
            state.cache_market(condition_id.to_string(), m.clone(), now);
            Some(m)
        }
        Ok(None) => None,
        Err(e) => {
            tracing::warn!(condition_id, error = %format!("{e:#}"), "market lookup failed");
            None
        }
    }
}

async fn score_trade_alert<S: TradeSource>(
    source: &S,
    state: &mut WatchState,
    trade: &Trade,
    notional: f64,
    settings: &PassSettings,
    now: i64,
) -> Option<AlertRecord> {
    let stats = state.wallet_stats(&trade.proxy_wallet, now, settings.min_notional);
    let market = resolve_market(source, state, &trade.condition_id, now).await;
    let score = trade_rubric::score_trade(
        trade,
        notional,
        &stats,
        market.as_ref(),
        settings.min_notional,
        now,
    );
    if !trade_rubric::should_alert(&score, notional, settings.min_notional, settings.min_score) {
        return None;
    }
    if !gate::try_fire(state, &gate::trade_key(trade), now, settings.cooldown_seconds) {
        tracing::debug!(trade_id = %trade.trade_id, "trade alert suppressed by cooldown");
        return None;
    }
    Some(AlertRecord::new(
        score.points,
        score.reason_labels(),
        notional,
        trade.clone(),
        stats,
        market,
        None,
    ))
}

async fn score_market_windows<S: TradeSource>(
    source: &S,
    state: &mut WatchState,
    activity: &PassActivity,
    settings: &PassSettings,
    now: i64,
) -> Vec<AlertRecord> {
    let mut alerts = Vec::new();
    for (condition_id, latest) in activity.markets() {
        let signal =
            market_rubric::evaluate(state.market_events(condition_id), now, settings.windows);
        if signal.score.points < settings.min_score {
            continue;
        }
        let event_type = signal.event_type();
        let key = gate::market_key(event_type, condition_id);
        if !gate::try_fire(state, &key, now, settings.cooldown_seconds) {
            tracing::debug!(condition_id, event_type = event_type.as_str(), "market alert suppressed by cooldown");
            continue;
        }

        let rep = match (event_type, signal.top_net_wallet()) {
            (market_rubric::EventType::Accumulation, Some(wallet)) => activity
                .latest_for_wallet(condition_id, wallet)
                .unwrap_or(latest),
            _ => latest,
        };
        let stats = state.wallet_stats(&rep.proxy_wallet, now, settings.min_notional);
        let market = resolve_market(source, state, condition_id, now).await;
        let context = trade_rubric::score_trade(
            rep,
            rep.notional(),
            &stats,
            market.as_ref(),
            settings.min_notional,
            now,
        );

        let mut reasons = signal.score.reason_labels();
        reasons.extend(
            context
                .reasons
                .iter()
                .filter(|r| r.is_context_tag())
                .map(|r| r.as_str().to_string()),
        );
        alerts.push(AlertRecord::new(
            signal.score.points,
            reasons,
            signal.alert_notional(),
            rep.clone(),
            stats,
            market,
            Some(AlertMetrics::from_signal(&signal, settings.windows)),
        ));
    }
    alerts
}

/// Process already-fetched trades against `state`.
pub async fn process_trades<S: TradeSource>(
    source: &S,
    state: &mut WatchState,
    mut trades: Vec<Trade>,
    settings: &PassSettings,
    now: i64,
) -> PassReport {
    trades.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.trade_id.cmp(&b.trade_id))
    });

    let mut report = PassReport {
        fetched: trades.len(),
        ..PassReport::default()
    };
    let mut activity = PassActivity::default();

    for trade in &trades {
        match gate::admit(state, trade) {
            Admission::New => report.new += 1,
            Admission::Seen => {
                report.skipped_seen += 1;
                continue;
            }
            Admission::AlreadyFetched => {
                report.skipped_checkpoint += 1;
                continue;
            }
        }

        let notional = trade.notional();
        if !aggregator::record(
            state,
            &mut activity,
            trade,
            notional,
            settings.min_notional,
            now,
            &settings.retention,
        ) {
            continue;
        }
        report.recorded += 1;

        if settings.strategy == ScoringStrategy::Trade {
            if let Some(alert) =
                score_trade_alert(source, state, trade, notional, settings, now).await
            {
                report.alerts.push(alert);
            }
        }
    }

    state.checkpoint_mut().advance(&trades);

    if settings.strategy == ScoringStrategy::MarketWindow {
        report.alerts = score_market_windows(source, state, &activity, settings, now).await;
    }

    metrics::counter!("pmwatch_trades_fetched_total").increment(report.fetched as u64);
    metrics::counter!("pmwatch_trades_skipped_total", "reason" => Admission::Seen.as_str())
        .increment(report.skipped_seen as u64);
    metrics::counter!("pmwatch_trades_skipped_total", "reason" => Admission::AlreadyFetched.as_str())
        .increment(report.skipped_checkpoint as u64);
    metrics::counter!("pmwatch_alerts_emitted_total", "strategy" => settings.strategy.as_str())
        .increment(report.alerts.len() as u64);

    tracing::info!(
        fetched = report.fetched,
        new = report.new,
        skipped_seen = report.skipped_seen,
        skipped_checkpoint = report.skipped_checkpoint,
        recorded = report.recorded,
        alerts = report.alerts.len(),
        strategy = settings.strategy.as_str(),
        "poll pass complete"
    );
    report
}

/// Fetch then process. A fetch failure leaves `state` untouched.
pub async fn run_pass<S: TradeSource>(
    source: &S,
    state: &mut WatchState,
    settings: &PassSettings,
    now: i64,
) -> Result<PassReport> {
    let trades = fetch_trades(
        source,
        state.checkpoint().last_ts(),
        settings.limit,
        settings.max_pages,
    )
    .await?;
    Ok(process_trades(source, state, trades, settings, now).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::fake::FakeSource;
    use crate::state::test_support::trade;
    use common::types::Side;

    const NOW: i64 = 1_700_000_000;

    fn settings(strategy: ScoringStrategy) -> PassSettings {
        let mut cfg = Config::default();
        cfg.scoring.strategy = strategy;
        PassSettings::from_config(&cfg)
    }

    fn thin_market(id: &str) -> Market {
        Market {
            condition_id: id.to_string(),
            question: format!("Question {id}"),
            slug: format!("market-{id}"),
            liquidity_num: Some(10_000.0),
            volume24hr: Some(20_000.0),
            outcomes: vec!["Yes".to_string(), "No".to_string()],
            outcome_prices: vec![0.5, 0.5],
        }
    }

    #[tokio::test]
    async fn test_fetch_stops_on_short_page() {
        let mut source = FakeSource::default();
        source.pages = vec![
            (0..3).map(|i| trade(&format!("a{i}"), "0xw", "m1", NOW - i)).collect(),
            vec![trade("b0", "0xw", "m1", NOW - 10)],
            vec![trade("c0", "0xw", "m1", NOW - 20)],
        ];
        let trades = fetch_trades(&source, None, 3, 5).await.unwrap();
        assert_eq!(trades.len(), 4);
        assert_eq!(*source.trade_calls.lock().unwrap(), vec![(3, 0), (3, 3)]);
    }

    #[tokio::test]
    async fn test_fetch_stops_at_checkpoint() {
        let mut source = FakeSource::default();
        source.pages = vec![
            vec![trade("a0", "0xw", "m1", NOW), trade("a1", "0xw", "m1", NOW - 5)],
            vec![trade("b0", "0xw", "m1", NOW - 10), trade("b1", "0xw", "m1", NOW - 11)],
        ];
        let trades = fetch_trades(&source, Some(NOW - 5), 2, 5).await.unwrap();
        assert_eq!(trades.len(), 2);
        assert_eq!(source.trade_calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_failure_leaves_state_untouched() {
        let source = FakeSource {
            fail_trades: true,
            ..FakeSource::default()
        };
        let mut state = WatchState::new(100);
        let err = run_pass(&source, &mut state, &settings(ScoringStrategy::Trade), NOW)
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("trades unavailable"));
        assert!(state.seen().is_empty());
        assert_eq!(state.checkpoint().last_ts(), None);
    }

    #[tokio::test]
    async fn test_trade_strategy_alerts_once_per_cooldown() {
        let mut source = FakeSource::with_trades(vec![
            trade("t1", "0xnew", "m1", NOW - 30),
            trade("t2", "0xnew", "m1", NOW - 20),
        ]);
        source.markets.insert("m1".to_string(), thin_market("m1"));
        let s = settings(ScoringStrategy::Trade);
        let mut state = WatchState::new(100);

        let report = run_pass(&source, &mut state, &s, NOW).await.unwrap();
        assert_eq!(report.new, 2);
        assert_eq!(report.recorded, 2);
        // Second trade from the same wallet and market is inside the cooldown.
        assert_eq!(report.alerts.len(), 1);
        let alert = &report.alerts[0];
        assert_eq!(alert.trade.trade_id, "t1");
        assert_eq!(alert.url, "https://polymarket.com/market/slug-m1");
        assert!(alert.reasons.contains(&"new_wallet_to_system".to_string()));
        assert!(alert.reasons.contains(&"recent_trade".to_string()));
        assert!(alert.score >= 3);
        // Market fetched once then served from the cache.
        assert_eq!(source.market_call_count(), 1);
        assert!(state.cached_market("m1").is_some());
        assert!(!state.cooldowns().is_empty());

        // Once the cooldown has passed, the same wallet and market alert again.
        let later = NOW + s.cooldown_seconds + 60;
        source.pages = vec![vec![trade("t3", "0xnew", "m1", later - 10)]];
        let report = run_pass(&source, &mut state, &s, later).await.unwrap();
        assert_eq!(report.new, 1);
        assert_eq!(report.alerts.len(), 1);
        assert_eq!(report.alerts[0].trade.trade_id, "t3");
        assert_eq!(source.market_call_count(), 1);
    }

    #[tokio::test]
    async fn test_rerun_on_same_trades_is_idempotent() {
        let source = FakeSource::with_trades(vec![trade("t1", "0xnew", "m1", NOW - 30)]);
        let s = settings(ScoringStrategy::Trade);
        let mut state = WatchState::new(100);

        let first = run_pass(&source, &mut state, &s, NOW).await.unwrap();
        assert_eq!(first.alerts.len(), 1);
        let second = run_pass(&source, &mut state, &s, NOW + 10).await.unwrap();
        assert_eq!(second.new, 0);
        assert_eq!(second.skipped_checkpoint, 1);
        assert!(second.alerts.is_empty());
        assert_eq!(state.wallet("0xnew").map(|w| w.trades_total()), Some(1));
    }

    #[tokio::test]
    async fn test_small_trades_marked_seen_but_not_recorded() {
        let mut small = trade("t1", "0xw", "m1", NOW - 30);
        small.size = 100.0;
        let source = FakeSource::with_trades(vec![small]);
        let mut state = WatchState::new(100);
        let report = run_pass(&source, &mut state, &settings(ScoringStrategy::Trade), NOW)
            .await
            .unwrap();
        assert_eq!(report.new, 1);
        assert_eq!(report.recorded, 0);
        assert!(state.seen().contains("t1"));
        assert!(state.wallet("0xw").is_none());
        assert_eq!(source.market_call_count(), 0);
    }

    #[tokio::test]
    async fn test_market_failure_degrades_to_no_market() {
        let source = FakeSource {
            pages: vec![vec![trade("t1", "0xnew", "m1", NOW - 30)]],
            fail_markets: true,
            ..FakeSource::default()
        };
        let mut state = WatchState::new(100);
        let report = run_pass(&source, &mut state, &settings(ScoringStrategy::Trade), NOW)
            .await
            .unwrap();
        assert_eq!(report.alerts.len(), 1);
        assert!(report.alerts[0].market.is_none());
        assert!(state.cached_market("m1").is_none());
    }

    #[tokio::test]
    async fn test_market_window_accumulation_uses_top_net_wallet_trade() {
        let mut trades = Vec::new();
        for (i, ts) in [NOW - 9_000, NOW - 8_000, NOW - 7_000].iter().enumerate() {
            let mut t = trade(&format!("w{i}"), "0xwhale", "m1", *ts);
            t.size = 40_000.0;
            t.price = 0.5;
            trades.push(t);
        }
        let mut other = trade("o1", "0xother", "m1", NOW - 6_000);
        other.size = 5_000.0;
        other.side = Side::Buy;
        trades.push(other);

        let mut source = FakeSource::with_trades(trades);
        source.markets.insert("m1".to_string(), thin_market("m1"));
        let s = settings(ScoringStrategy::MarketWindow);
        let mut state = WatchState::new(100);

        let report = run_pass(&source, &mut state, &s, NOW).await.unwrap();
        assert_eq!(report.alerts.len(), 1);
        let alert = &report.alerts[0];
        let metrics = alert.metrics.as_ref().unwrap();
        assert_eq!(alert.event_label(), "accumulation");
        assert_eq!(alert.trade.trade_id, "w2");
        assert!((alert.notional - 60_000.0).abs() < 1e-6);
        assert_eq!(metrics.top_net_wallet_accum_window.as_deref(), Some("0xwhale"));
        assert_eq!(
            &alert.reasons[..3],
            ["whale_accumulation_6h", "concentrated_flow_6h", "quiet_price_6h"]
        );
        assert_eq!(alert.score, 9);
        assert!(state.cooldowns().ready("fast_move:m1", NOW, s.cooldown_seconds));
        assert!(!state.cooldowns().ready("accumulation:m1", NOW, s.cooldown_seconds));

        // Nothing new next pass, so nothing is evaluated.
        let again = run_pass(&source, &mut state, &s, NOW + 60).await.unwrap();
        assert!(again.alerts.is_empty());
    }

    #[tokio::test]
    async fn test_market_window_below_threshold_emits_nothing() {
        let source = FakeSource::with_trades(vec![trade("t1", "0xw", "m1", NOW - 30)]);
        let mut state = WatchState::new(100);
        let report = run_pass(&source, &mut state, &settings(ScoringStrategy::MarketWindow), NOW)
            .await
            .unwrap();
        assert_eq!(report.recorded, 1);
        assert!(report.alerts.is_empty());
        assert!(state.cooldowns().is_empty());
        assert_eq!(source.market_call_count(), 0);
    }
}
