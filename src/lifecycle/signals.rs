//! OS signal handling.
//!
//! # Responsibilities
//! - Translate SIGINT/SIGTERM into a graceful shutdown
//! - Reopen the log sink on SIGHUP/SIGUSR1, for log rotation
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - Reopen failures are reported and the old destination stays in use

use crate::lifecycle::Shutdown;
use crate::observability::SharedSink;

/// Resolve on Ctrl+C or, on Unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}

/// Trigger `shutdown` when a shutdown signal arrives.
pub fn spawn_shutdown_listener(shutdown: Shutdown) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown.trigger();
    })
}

/// Reopen `sink` on every SIGHUP or SIGUSR1 until `shutdown` fires.
#[cfg(unix)]
pub fn spawn_log_reopener(sink: SharedSink, shutdown: &Shutdown) -> std::io::Result<tokio::task::JoinHandle<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup())?;
    let mut user1 = signal(SignalKind::user_defined1())?;
    let mut stop = shutdown.subscribe();

    Ok(tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = hangup.recv() => {},
                _ = user1.recv() => {},
                _ = stop.recv() => break,
            }
            tracing::info!("Reopening log");
            if let Err(e) = sink.reopen() {
                tracing::error!(error = %e, "Failed to reopen log");
            }
        }
    }))
}

#[cfg(not(unix))]
pub fn spawn_log_reopener(_sink: SharedSink, shutdown: &Shutdown) -> std::io::Result<tokio::task::JoinHandle<()>> {
    let mut stop = shutdown.subscribe();
    Ok(tokio::spawn(async move {
        let _ = stop.recv().await;
    }))
}
