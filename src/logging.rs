//! Tracing subscriber setup.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::{LogFormat, LoggingSection};

const DEFAULT_FILTER: &str = "playctl=info,tower_http=info";
const VERBOSE_FILTER: &str = "playctl=debug,tower_http=debug";

/// Build the env filter. `RUST_LOG` wins over the built-in defaults.
pub fn env_filter(verbose: bool) -> EnvFilter {
    let fallback = if verbose { VERBOSE_FILTER } else { DEFAULT_FILTER };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback))
}

/// Install the global subscriber. Console output goes to stderr so command
/// output on stdout stays machine-readable.
///
/// When `logging.dir` is set a second, daily-rotated file layer is added; the
/// returned guard must be held until exit so buffered lines are flushed.
pub fn init(logging: &LoggingSection, verbose: bool) -> anyhow::Result<Option<WorkerGuard>> {
    let (file_layer, guard) = match &logging.dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, "playctl.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let (pretty, json) = match logging.format {
        LogFormat::Pretty => (
            Some(tracing_subscriber::fmt::layer().with_writer(std::io::stderr)),
            None,
        ),
        LogFormat::Json => (
            None,
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            ),
        ),
    };

    tracing_subscriber::registry()
        .with(env_filter(verbose))
        .with(pretty)
        .with(json)
        .with(file_layer)
        .try_init()?;

    Ok(guard)
}
