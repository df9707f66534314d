//! Structured logging and the overlay log sink.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber for diagnostics
//! - Provide the `LogSink` that receives configuration and access log lines
//! - Reopen file sinks on demand (log rotation)
//!
//! # Design Decisions
//! - The sink is injected into the builder rather than being process-global
//! - `FileSink` swaps its handle atomically; writers holding the old handle finish on it

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Destination for overlay log lines (layer registrations, access log).
pub trait LogSink: Send + Sync {
    /// Write one message. Trailing newlines are not significant.
    fn log(&self, message: &str);

    /// Reopen the underlying destination. A no-op for sinks without one.
    fn reopen(&self) -> io::Result<()> {
        Ok(())
    }
}

/// Shared handle to a sink.
pub type SharedSink = Arc<dyn LogSink>;

impl<F> LogSink for F
where
    F: Fn(&str) + Send + Sync,
{
    fn log(&self, message: &str) {
        self(message)
    }
}

/// Forwards every line to `tracing` at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, message: &str) {
        tracing::info!(target: "overlay_server::log", "{}", message.trim_end_matches('\n'));
    }
}

/// Appends lines to a file and supports reopening it after rotation.
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    current: ArcSwap<Mutex<File>>,
}

impl FileSink {
    /// Open `path` in append mode, creating it if needed.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = open_append(&path)?;
        Ok(Self {
            path,
            current: ArcSwap::from_pointee(Mutex::new(file)),
        })
    }

    /// Path of the file this sink appends to.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LogSink for FileSink {
    fn log(&self, message: &str) {
        let mut line = message.trim_end_matches('\n').to_owned();
        line.push('\n');

        let handle = self.current.load_full();
        let mut file = match handle.lock() {
            Ok(file) => file,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = file.write_all(line.as_bytes()) {
            tracing::error!(path = ?self.path, error = %e, "Failed writing log line");
        }
    }

    fn reopen(&self) -> io::Result<()> {
        let file = open_append(&self.path)?;
        self.current.store(Arc::new(Mutex::new(file)));
        tracing::info!(path = ?self.path, "Log file reopened");
        Ok(())
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `default_filter`.
pub fn init_tracing(default_filter: &str) {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
