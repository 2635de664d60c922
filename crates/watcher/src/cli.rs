//! Command-line surface: subcommand plus per-run overrides of the TOML config.

use clap::{Args, Parser, Subcommand};
use common::config::{Config, OutputFormat, ScoringStrategy, StateBackend};
use std::path::PathBuf;

/// Watch Polymarket public trades and alert on unusual activity.
#[derive(Parser, Debug)]
#[command(name = "pmwatch", version)]
pub struct Cli {
    /// Path to the TOML config file
    #[arg(long, global = true, default_value = "config/default.toml")]
    pub config: PathBuf,

    #[command(flatten)]
    pub overrides: Overrides,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Run a single polling pass and exit
    Once,
    /// Poll forever until Ctrl-C
    Watch,
}

#[derive(Args, Debug, Default, Clone)]
pub struct Overrides {
    /// State file (JSON) or database (SQLite)
    #[arg(long, global = true)]
    pub state: Option<String>,

    #[arg(long, global = true)]
    pub backend: Option<StateBackend>,

    /// Feed JSON document
    #[arg(long, global = true)]
    pub out: Option<String>,

    #[arg(long, global = true)]
    pub out_jsonl: Option<String>,

    #[arg(long, global = true)]
    pub archive_dir: Option<String>,

    /// Trades per page (capped at 500)
    #[arg(long, global = true)]
    pub limit: Option<u32>,

    #[arg(long, global = true)]
    pub max_pages: Option<u32>,

    #[arg(long, global = true)]
    pub min_notional: Option<f64>,

    #[arg(long, global = true)]
    pub min_score: Option<u32>,

    #[arg(long, global = true)]
    pub cooldown_seconds: Option<i64>,

    #[arg(long, global = true)]
    pub max_seen: Option<usize>,

    #[arg(long, global = true)]
    pub max_alerts: Option<usize>,

    /// Zero disables the per-day cap
    #[arg(long, global = true)]
    pub max_alerts_per_day: Option<usize>,

    /// trade | market_window
    #[arg(long, global = true)]
    pub strategy: Option<ScoringStrategy>,

    /// text | json
    #[arg(long, global = true)]
    pub format: Option<OutputFormat>,

    /// Discord-compatible webhook (https only)
    #[arg(long, global = true, env = "PMWATCH_WEBHOOK_URL")]
    pub webhook_url: Option<String>,

    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Seconds between passes in watch mode
    #[arg(long, global = true)]
    pub poll_seconds: Option<u64>,
}

impl Overrides {
    pub fn apply(&self, cfg: &mut Config) {
        if let Some(v) = &self.state {
            cfg.state.path.clone_from(v);
        }
        if let Some(v) = self.backend {
            cfg.state.backend = v;
        }
        if let Some(v) = &self.out {
            cfg.feed.out_path.clone_from(v);
        }
        if let Some(v) = &self.out_jsonl {
            cfg.feed.out_jsonl_path.clone_from(v);
        }
        if let Some(v) = &self.archive_dir {
            cfg.feed.archive_dir.clone_from(v);
        }
        if let Some(v) = self.limit {
            cfg.ingestion.limit = v;
        }
        if let Some(v) = self.max_pages {
            cfg.ingestion.max_pages = v;
        }
        if let Some(v) = self.min_notional {
            cfg.scoring.min_notional = v;
        }
        if let Some(v) = self.min_score {
            cfg.scoring.min_score = Some(v);
        }
        if let Some(v) = self.cooldown_seconds {
            cfg.scoring.cooldown_seconds = Some(v);
        }
        if let Some(v) = self.max_seen {
            cfg.state.max_seen = v;
        }
        if let Some(v) = self.max_alerts {
            cfg.feed.max_alerts = v;
        }
        if let Some(v) = self.max_alerts_per_day {
            cfg.feed.max_alerts_per_day = v;
        }
        if let Some(v) = self.strategy {
            cfg.scoring.strategy = v;
        }
        if let Some(v) = self.format {
            cfg.output.format = v;
        }
        if let Some(v) = &self.webhook_url {
            // An empty value clears a webhook set in the config file.
            cfg.notify.webhook_url = (!v.trim().is_empty()).then(|| v.trim().to_string());
        }
        if let Some(v) = &self.log_level {
            cfg.general.log_level.clone_from(v);
        }
        if let Some(v) = self.poll_seconds {
            cfg.general.poll_interval_secs = v;
        }
    }
}
