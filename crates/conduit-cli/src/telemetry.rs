//! Tracing initialization.

use conduit_server::logging;
use tracing::Dispatch;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use crate::config::{LogFormat, TelemetryConfig};

/// Initializes the tracing subscriber.
///
/// The subscriber becomes both the global default and the process-wide
/// request logger, so request logs and everything else share one output.
/// `RUST_LOG` overrides the default `info` level.
///
/// ```bash
/// RUST_LOG=debug conduit
/// RUST_LOG=conduit_server=trace,tower_http=debug conduit --log-format json
/// ```
pub fn init_tracing(config: &TelemetryConfig) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;

    let fmt_layer = match config.log_format {
        LogFormat::Pretty => fmt::layer().with_target(true).boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_span_list(true)
            .with_current_span(false)
            .boxed(),
    };

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer);
    let dispatch = Dispatch::new(subscriber);

    tracing::dispatcher::set_global_default(dispatch.clone())
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    logging::init(dispatch);

    Ok(())
}
