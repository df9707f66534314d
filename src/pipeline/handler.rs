//! Request handler chain.
//!
//! # Responsibilities
//! - Define the `Handler` trait every stage implements
//! - Provide `Next`, the continuation into the remaining stages
//! - Expose the assembled chain as a `tower::Service`
//!
//! # Design Decisions
//! - A stage either answers the request or hands it to `next`; no stage sees
//!   the ones before it
//! - Stages borrow the chain for the lifetime of one request; the chain itself
//!   is immutable and shared through `Arc`
//! - Running past the last stage answers `404 Not Found`

use std::convert::Infallible;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{Request, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use futures_util::future::BoxFuture;
use tower::Service;

use crate::routing::MountPrefix;

/// One stage of the pipeline.
pub trait Handler: Send + Sync {
    /// Handle the request, or delegate to `next`.
    fn call<'a>(&'a self, req: Request<Body>, next: Next<'a>) -> BoxFuture<'a, Response>;

    /// Short label used in diagnostics and `Pipeline::stage_names`.
    fn name(&self) -> &str {
        "handler"
    }
}

/// Boxed stage.
pub type BoxedHandler = Box<dyn Handler>;

impl<H: Handler + ?Sized> Handler for Arc<H> {
    fn call<'a>(&'a self, req: Request<Body>, next: Next<'a>) -> BoxFuture<'a, Response> {
        (**self).call(req, next)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Handler backed by a closure.
///
/// ```
/// use axum::response::IntoResponse;
/// use overlay_server::pipeline::handler_fn;
///
/// let hello = handler_fn(|_req, _next| Box::pin(async { "hello".into_response() }));
/// ```
pub fn handler_fn<F>(f: F) -> FnHandler<F>
where
    F: for<'a> Fn(Request<Body>, Next<'a>) -> BoxFuture<'a, Response> + Send + Sync,
{
    FnHandler { f }
}

/// See [`handler_fn`].
pub struct FnHandler<F> {
    f: F,
}

impl<F> Handler for FnHandler<F>
where
    F: for<'a> Fn(Request<Body>, Next<'a>) -> BoxFuture<'a, Response> + Send + Sync,
{
    fn call<'a>(&'a self, req: Request<Body>, next: Next<'a>) -> BoxFuture<'a, Response> {
        (self.f)(req, next)
    }

    fn name(&self) -> &str {
        "function"
    }
}

/// The remaining stages after the current one.
pub struct Next<'a> {
    rest: &'a [BoxedHandler],
    restore: Option<Uri>,
}

impl<'a> Next<'a> {
    pub(crate) fn new(rest: &'a [BoxedHandler]) -> Self {
        Self { rest, restore: None }
    }

    /// Restore `uri` on the request before continuing. Used by mounts, which
    /// rewrite the path for the mounted stage only.
    pub fn restoring(self, uri: Uri) -> Self {
        Self {
            rest: self.rest,
            restore: self.restore.or(Some(uri)),
        }
    }

    /// Continue with the next stage.
    pub fn run(self, mut req: Request<Body>) -> BoxFuture<'a, Response> {
        if let Some(uri) = self.restore {
            *req.uri_mut() = uri;
            req.extensions_mut().remove::<MountPrefix>();
        }

        match self.rest.split_first() {
            Some((stage, rest)) => stage.call(req, Next::new(rest)),
            None => Box::pin(async { not_found() }),
        }
    }
}

/// Response for requests no stage answered.
pub fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "Not Found").into_response()
}

/// An assembled, immutable chain of stages.
#[derive(Clone)]
pub struct Pipeline {
    stages: Arc<[BoxedHandler]>,
}

impl Pipeline {
    pub fn new(stages: Vec<BoxedHandler>) -> Self {
        Self {
            stages: stages.into(),
        }
    }

    /// Stage labels in execution order.
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run one request through every stage.
    pub async fn handle(&self, req: Request<Body>) -> Response {
        Next::new(&self.stages).run(req).await
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names())
            .finish()
    }
}

impl Service<Request<Body>> for Pipeline {
    type Response = Response;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Response, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let pipeline = self.clone();
        Box::pin(async move { Ok(pipeline.handle(req).await) })
    }
}
