use anyhow::{Context, Result};
use clap::Parser;
use std::time::Duration;

mod aggregator;
mod alert;
mod cli;
mod fetcher;
mod files;
mod gate;
mod metrics;
mod notify;
mod pipeline;
mod publisher;
mod runner;
mod scheduler;
mod scoring;
mod state;
mod window_stats;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    let mut config = common::config::Config::load(&cli.config)?;
    cli.overrides.apply(&mut config);
    config.validate().context("invalid configuration")?;

    let dispatch = common::observability::build_dispatch(
        "pmwatch",
        &config.general.log_level,
        config.general.log_format,
    );
    tracing::dispatcher::set_global_default(dispatch).map_err(anyhow::Error::msg)?;

    tracing::info!(
        command = ?cli.command,
        strategy = config.scoring.strategy.as_str(),
        backend = config.state.backend.as_str(),
        "pmwatch starting"
    );

    if config.observability.prometheus_port > 0 {
        metrics::install_prometheus(config.observability.prometheus_port)?;
    }
    metrics::describe();

    let store = state::open_store(
        config.state.backend,
        std::path::Path::new(&config.state.path),
    )
    .context("failed to open state store")?;

    let client = common::polymarket::PolymarketClient::new(&config.polymarket)
        .context("failed to build Polymarket client")?;

    let notifier = config
        .notify
        .webhook_url
        .as_deref()
        .map(|url| {
            notify::WebhookNotifier::new(
                url,
                config.notify.max_chars,
                Duration::from_secs_f64(config.polymarket.timeout_secs),
            )
        })
        .transpose()
        .context("failed to build webhook notifier")?;

    let mut runner = runner::Runner::new(
        &config,
        client,
        notifier,
        store,
        Box::new(std::io::stdout()),
    );

    match cli.command {
        cli::Command::Once => {
            let summary = runner.run_once(chrono::Utc::now().timestamp()).await?;
            tracing::info!(
                status = summary.status.as_str(),
                alerts = summary.alerts,
                notified = summary.notified,
                dropped_records = summary.dropped_records,
                "pass finished"
            );
        }
        cli::Command::Watch => {
            let (tick_tx, mut tick_rx) = tokio::sync::mpsc::channel::<()>(1);
            let _handles = scheduler::start(vec![scheduler::JobSpec {
                name: "poll".to_string(),
                interval: Duration::from_secs(config.general.poll_interval_secs),
                immediate: true,
                tick: tick_tx,
            }]);

            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        tracing::info!("ctrl-c received, stopping");
                        break;
                    }
                    tick = tick_rx.recv() => {
                        if tick.is_none() {
                            break;
                        }
                        match runner.run_once(chrono::Utc::now().timestamp()).await {
                            Ok(summary) => tracing::info!(
                                status = summary.status.as_str(),
                                alerts = summary.alerts,
                                notified = summary.notified,
                                dropped_records = summary.dropped_records,
                                "pass finished"
                            ),
                            Err(e) => tracing::error!(error = %format!("{e:#}"), "pass failed"),
                        }
                    }
                }
            }
        }
    }

    Ok(())
}
