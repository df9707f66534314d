//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Composer (layer registrations, comments)
//!     → LogSink (injected)
//! Access log middleware (one line per request)
//!     → LogSink (injected)
//! Everything else
//!     → tracing (spans, diagnostics)
//! ```
//!
//! # Design Decisions
//! - Two channels: the sink carries user-facing lines, tracing carries diagnostics
//! - File sinks reopen on SIGHUP/SIGUSR1 (see `lifecycle::signals`)

pub mod logging;

pub use logging::{init_tracing, FileSink, LogSink, SharedSink, TracingSink};
