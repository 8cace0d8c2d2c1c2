//! Centralised tracing initialisation for AutoLeet binaries.
//!
//! Call [`init_tracing`] once at program start to configure the global
//! subscriber with an `EnvFilter`, optional JSON formatting and an optional
//! log file.

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialise the global tracing subscriber.
///
/// * `json`: emit newline-delimited JSON. Console output goes to stderr so
///   that stdout stays free for command results.
/// * `level`: default verbosity when `RUST_LOG` is not set.
/// * `log_file`: also append plain-text lines (no ANSI) to this file.
///
/// Only the first call takes effect. Fails only when the log file cannot be
/// opened.
pub fn init_tracing(json: bool, level: Level, log_file: Option<&Path>) -> std::io::Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let file = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            Some(Arc::new(OpenOptions::new().create(true).append(true).open(path)?))
        }
        None => None,
    };

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr)
                    .json(),
            )
            .with(file_layer(file))
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .with(file_layer(file))
            .try_init()
            .ok();
    }
    Ok(())
}

/// Plain-text layer appending to the log file, absent when no file is set.
fn file_layer<S>(writer: Option<Arc<File>>) -> Option<impl Layer<S>>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    writer.map(|w| {
        fmt::layer()
            .with_target(false)
            .with_ansi(false)
            .with_writer(w)
    })
}
