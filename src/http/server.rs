//! HTTP server setup.
//!
//! # Responsibilities
//! - Wrap the overlay router with tracing and the request timeout
//! - Bind the router to a listener with peer addresses available
//! - Stop accepting and drain in-flight requests on shutdown

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::ListenerConfig;
use crate::overlay::Overlay;

/// HTTP server for a composed overlay.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(overlay: Overlay, listener: &ListenerConfig) -> Self {
        let router = Self::build_router(overlay, listener);
        Self { router }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(overlay: Overlay, listener: &ListenerConfig) -> Router {
        overlay
            .into_router()
            .layer(TimeoutLayer::new(Duration::from_secs(listener.request_timeout_secs)))
            .layer(TraceLayer::new_for_http())
    }

    /// The fully layered router.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve until `shutdown` resolves, then drain in-flight requests.
    pub async fn run<F>(self, listener: TcpListener, shutdown: F) -> Result<(), std::io::Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
