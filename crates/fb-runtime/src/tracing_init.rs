use std::path::Path;

use anyhow::{Context, Result};
use tracing::Subscriber;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use fb_config::{LogFormat, LoggingConfig};

// ---------------------------------------------------------------------------
// init_tracing
// ---------------------------------------------------------------------------

/// Initialise the `tracing` stack from [`LoggingConfig`].
///
/// No custom formatter is involved: the runtime logs through per-domain
/// targets (`fb::sys`, `fb::task`, ...), which the stock fmt layers
/// already render and which the filter can address directly
/// (`fb::port=trace`). The config's directives come from
/// [`LoggingConfig::filter_directives`]; a `RUST_LOG` env-var overrides
/// them entirely.
///
/// Returns the guard keeping the non-blocking file writer alive. Hold it
/// until the process exits; dropping it flushes and closes the file.
pub fn init_tracing(config: &LoggingConfig, base_dir: &Path) -> Result<Option<WorkerGuard>> {
    let filter = match std::env::var("RUST_LOG") {
        Ok(_) => EnvFilter::from_default_env(),
        Err(_) => {
            let directives = config.filter_directives();
            EnvFilter::try_new(&directives)
                .with_context(|| format!("invalid log filter {directives:?}"))?
        }
    };

    let (file_writer, guard) = match &config.file {
        Some(path) => {
            let (writer, guard) = open_log_file(path, base_dir)?;
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };

    let stderr_layer = event_layer(config.format, std::io::stderr, true).with_filter(filter);
    let file_layer = file_writer.map(|writer| event_layer(config.format, writer, false));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();

    Ok(guard)
}

/// One output layer in the configured format. Boxed so both formats fit
/// the same composition.
fn event_layer<S, W>(format: LogFormat, writer: W, ansi: bool) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    match format {
        LogFormat::Plain => fmt::layer()
            .compact()
            .with_writer(writer)
            .with_ansi(ansi)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(writer)
            .with_ansi(false)
            .boxed(),
    }
}

/// Resolve the configured log path against the config directory and open
/// it behind a non-blocking writer.
fn open_log_file(path: &Path, base_dir: &Path) -> Result<(NonBlocking, WorkerGuard)> {
    let resolved = if path.is_relative() {
        base_dir.join(path)
    } else {
        path.to_path_buf()
    };
    let parent = resolved
        .parent()
        .context("log file path has no parent directory")?;
    std::fs::create_dir_all(parent)?;
    let file_name = resolved
        .file_name()
        .context("log file path has no file name")?
        .to_os_string();
    Ok(tracing_appender::non_blocking(
        tracing_appender::rolling::never(parent, file_name),
    ))
}
