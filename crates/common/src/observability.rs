use crate::config::LogFormat;
use tracing::Subscriber;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::{EnvFilter, Layer};

struct ErrorCounterLayer;

impl<S> Layer<S> for ErrorCounterLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() == tracing::Level::ERROR {
            metrics::counter!("pmwatch_log_errors_total").increment(1);
        }
    }
}

/// Build a `tracing` dispatcher configured for:
/// - JSON (or plain text) logs to stderr, so stdout carries only alert output
/// - EnvFilter that respects `RUST_LOG` (takes precedence) and falls back to `default_level`
/// - `pmwatch_log_errors_total` counter for ERROR events
pub fn build_dispatch(service_name: &str, default_level: &str, format: LogFormat) -> tracing::Dispatch {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_timer(tracing_subscriber::fmt::time::SystemTime);

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorCounterLayer);

    let dispatch = match format {
        LogFormat::Json => tracing::Dispatch::new(registry.with(fmt_layer.json())),
        LogFormat::Text => tracing::Dispatch::new(registry.with(fmt_layer.with_ansi(false))),
    };

    tracing::dispatcher::with_default(&dispatch, || {
        tracing::debug!(service = service_name, "log dispatcher ready");
    });
    dispatch
}
