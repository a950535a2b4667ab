//! Explicit logging context.
//!
//! Built once at startup and handed to the router and the engine thread
//! instead of installing a process-wide subscriber.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tracing::Dispatch;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Dispatcher writing to stderr and to an append-only log file.
#[derive(Clone)]
pub struct LogContext {
    dispatch: Dispatch,
    file: Option<Arc<File>>,
}

impl LogContext {
    /// Open `log_file` for appending and build the dispatcher.
    ///
    /// stderr honours `RUST_LOG`, falling back to `default_filter`; the file
    /// always records INFO and above without ANSI colours.
    pub fn init(log_file: &Path, default_filter: &str) -> std::io::Result<Self> {
        let file = Arc::new(OpenOptions::new().create(true).append(true).open(log_file)?);

        let stderr_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

        let subscriber = tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_filter(stderr_filter),
            )
            .with(
                fmt::layer()
                    .with_writer(file.clone())
                    .with_ansi(false)
                    .with_filter(LevelFilter::INFO),
            );

        Ok(Self {
            dispatch: Dispatch::new(subscriber),
            file: Some(file),
        })
    }

    /// A context that drops every event.
    pub fn disabled() -> Self {
        Self {
            dispatch: Dispatch::none(),
            file: None,
        }
    }

    pub fn dispatch(&self) -> &Dispatch {
        &self.dispatch
    }

    /// Flush and sync the log file.
    pub fn shutdown(&self) {
        let Some(file) = &self.file else {
            return;
        };
        if let Err(err) = (&**file).flush().and_then(|()| file.sync_all()) {
            eprintln!("failed to sync log file: {err}");
        }
    }
}
