//! Overlay assembly: configuration plus collaborators in, served router out.
//!
//! ```text
//! OverlayConfig ─┐
//! LogSink ───────┼─▶ OverlayBuilder::build ─▶ Overlay ─▶ into_router()
//! functions ─────┤        (Composer)              │
//! middleware ────┘                                └─▶ pipeline()
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::{header, HeaderValue};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::set_header::SetRequestHeaderLayer;

use crate::config::{validate_config, ConfigError, OverlayConfig};
use crate::http::middleware::{access_log, AccessLog, LogFormat};
use crate::observability::{FileSink, SharedSink, TracingSink};
use crate::pipeline::{BuildError, Composer, Handler, Pipeline};
use crate::sources::NamedMiddleware;
use crate::transform::{TransformError, TransformFn};

/// Build an overlay with the default collaborators.
pub fn build(config: OverlayConfig) -> Result<Overlay, BuildError> {
    Overlay::builder(config).build()
}

/// A composed overlay, ready to serve.
#[derive(Clone)]
pub struct Overlay {
    config: Arc<OverlayConfig>,
    pipeline: Pipeline,
    logger: SharedSink,
}

impl Overlay {
    pub fn builder(config: OverlayConfig) -> OverlayBuilder {
        OverlayBuilder {
            config,
            logger: None,
            functions: HashMap::new(),
            middleware: HashMap::new(),
        }
    }

    pub fn config(&self) -> &OverlayConfig {
        &self.config
    }

    /// The composed stage chain.
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// The sink receiving composition and access log lines.
    pub fn logger(&self) -> SharedSink {
        self.logger.clone()
    }

    /// Wrap the pipeline with the access log, forced `Accept-Encoding` and
    /// response compression.
    pub fn into_router(self) -> Router {
        // validated at build time
        let format = self
            .config
            .log
            .as_deref()
            .and_then(|name| name.parse().ok())
            .unwrap_or(LogFormat::Tiny);
        let forced = self
            .config
            .compress
            .as_deref()
            .and_then(|token| HeaderValue::from_str(token).ok());

        let router = Router::new()
            .fallback_service(self.pipeline)
            .layer(CompressionLayer::new());
        let router = match forced {
            Some(token) => router.layer(SetRequestHeaderLayer::overriding(header::ACCEPT_ENCODING, token)),
            None => router,
        };
        router.layer(axum::middleware::from_fn_with_state(
            AccessLog::new(format, self.logger),
            access_log,
        ))
    }
}

/// Collects the sink and named registries before composing.
pub struct OverlayBuilder {
    config: OverlayConfig,
    logger: Option<SharedSink>,
    functions: HashMap<String, TransformFn>,
    middleware: HashMap<String, NamedMiddleware>,
}

impl OverlayBuilder {
    /// Use `sink` for every log line. Overrides `logfile`.
    pub fn logger(mut self, sink: SharedSink) -> Self {
        self.logger = Some(sink);
        self
    }

    /// Register a named transform usable as `<type>(<name>)`.
    pub fn function<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.try_function(name, move |text| Ok(f(text)))
    }

    /// Register a fallible named transform. Errors answer `500`.
    pub fn try_function<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&str) -> Result<String, TransformError> + Send + Sync + 'static,
    {
        let f: TransformFn = Arc::new(f);
        self.functions.insert(name.into(), f);
        self
    }

    /// Register a handler callable from inline middleware as `name(req, res, next)`.
    pub fn middleware<H>(mut self, name: impl Into<String>, handler: H) -> Self
    where
        H: Handler + 'static,
    {
        let handler: NamedMiddleware = Arc::new(handler);
        self.middleware.insert(name.into(), handler);
        self
    }

    pub fn build(self) -> Result<Overlay, BuildError> {
        validate_config(&self.config).map_err(|errors| BuildError::Config(ConfigError::Validation(errors)))?;

        let logger = match (self.logger, &self.config.logfile) {
            (Some(sink), _) => sink,
            (None, Some(path)) => {
                let sink = FileSink::open(path).map_err(|source| BuildError::LogFile {
                    path: path.clone(),
                    source,
                })?;
                Arc::new(sink)
            }
            (None, None) => Arc::new(TracingSink),
        };

        let pipeline = Composer::new(&self.config, logger.clone(), &self.functions, &self.middleware).compose()?;
        tracing::info!(stages = pipeline.len(), "Overlay ready");

        Ok(Overlay {
            config: Arc::new(self.config),
            pipeline,
            logger,
        })
    }
}
