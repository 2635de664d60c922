use crate::alert::{render_json, render_text, AlertRecord};
use crate::fetcher::TradeSource;
use crate::notify::{send_best_effort, Notifier};
use crate::pipeline::{self, PassSettings};
use crate::publisher::{self, FeedSettings};
use crate::state::{Retention, StateStore};
use anyhow::{Context, Result};
use common::config::{Config, OutputFormat};
use std::collections::HashSet;
use std::io::Write;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationStatus {
    Completed,
    /// Trade fetch failed; state was neither mutated nor saved.
    FetchFailed,
}

impl IterationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::FetchFailed => "fetch_failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationSummary {
    pub status: IterationStatus,
    pub alerts: usize,
    pub notified: usize,
    pub dropped_records: usize,
}

/// Drives iterations: load, pass, emit, publish, prune, save.
pub struct Runner<S, N> {
    source: S,
    notifier: Option<N>,
    store: Box<dyn StateStore + Send>,
    out: Box<dyn Write + Send>,
    pass: PassSettings,
    feed: Option<FeedSettings>,
    format: OutputFormat,
    max_seen: usize,
    retention: Retention,
}

impl<S: TradeSource, N: Notifier> Runner<S, N> {
    pub fn new(
        cfg: &Config,
        source: S,
        notifier: Option<N>,
        store: Box<dyn StateStore + Send>,
        out: Box<dyn Write + Send>,
    ) -> Self {
        Self {
            source,
            notifier,
            store,
            out,
            pass: PassSettings::from_config(cfg),
            feed: cfg.feed.enabled.then(|| FeedSettings::from_config(cfg)),
            format: cfg.output.format,
            max_seen: cfg.state.max_seen,
            retention: Retention::from_config(&cfg.state),
        }
    }

    fn print(&mut self, alert: &AlertRecord) -> Result<()> {
        match self.format {
            OutputFormat::Json => {
                let line = render_json(alert).context("failed to encode alert")?;
                writeln!(self.out, "{line}")?;
            }
            OutputFormat::Text => {
                writeln!(self.out, "{}", render_text(alert))?;
                writeln!(self.out, "{}", "-".repeat(40))?;
            }
        }
        self.out.flush()?;
        Ok(())
    }

    async fn emit(&mut self, alerts: &[AlertRecord]) -> Result<usize> {
        let mut notified = 0;
        for alert in alerts {
            self.print(alert).context("failed to write alert")?;
            if let Some(notifier) = &self.notifier {
                if send_best_effort(notifier, &render_text(alert)).await {
                    notified += 1;
                }
            }
        }
        Ok(notified)
    }

    pub async fn run_once(&mut self, now: i64) -> Result<IterationSummary> {
        let result = self.iterate(now).await;
        let status = match &result {
            Ok(summary) => summary.status.as_str(),
            Err(_) => "error",
        };
        metrics::counter!("pmwatch_iterations_total", "status" => status).increment(1);
        result
    }

    async fn iterate(&mut self, now: i64) -> Result<IterationSummary> {
        let (mut state, load_report) = self
            .store
            .load(self.max_seen)
            .context("failed to load state")?;
        load_report.emit();

        let report = match pipeline::run_pass(&self.source, &mut state, &self.pass, now).await {
            Ok(report) => report,
            Err(e) => {
                tracing::warn!(error = %format!("{e:#}"), "trade fetch failed; skipping this pass");
                return Ok(IterationSummary {
                    status: IterationStatus::FetchFailed,
                    alerts: 0,
                    notified: 0,
                    dropped_records: load_report.total_dropped(),
                });
            }
        };

        let notified = self.emit(&report.alerts).await?;

        let (keep_wallets, keep_markets) = match &self.feed {
            Some(feed) => {
                let published = publisher::publish(feed, &report.alerts, now)?;
                (published.keep_wallets, published.keep_markets)
            }
            None => (HashSet::new(), HashSet::new()),
        };

        let pruned = state.prune(now, &self.retention, &keep_wallets, &keep_markets);
        tracing::debug!(
            wallets = pruned.wallets,
            markets = pruned.markets,
            market_logs = pruned.market_logs,
            cooldowns = pruned.cooldowns,
            "state pruned"
        );

        state.set_updated_at(now);
        self.store.save(&state).context("failed to save state")?;

        Ok(IterationSummary {
            status: IterationStatus::Completed,
            alerts: report.alerts.len(),
            notified,
            dropped_records: load_report.total_dropped(),
        })
    }
}
