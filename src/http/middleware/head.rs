//! HEAD requests travel the pipeline as GET.
//!
//! Transforms change `Content-Length`, so a HEAD answer must come from the
//! same response a GET would get. The body is dropped on the way out.

use axum::body::Body;
use axum::http::{Method, Request};
use axum::response::Response;
use futures_util::future::BoxFuture;

use crate::pipeline::{Handler, Next};

#[derive(Debug, Default, Clone, Copy)]
pub struct HeadAsGet;

impl Handler for HeadAsGet {
    fn call<'a>(&'a self, mut req: Request<Body>, next: Next<'a>) -> BoxFuture<'a, Response> {
        if req.method() != Method::HEAD {
            return next.run(req);
        }

        *req.method_mut() = Method::GET;
        Box::pin(async move {
            let (parts, _) = next.run(req).await.into_parts();
            Response::from_parts(parts, Body::empty())
        })
    }

    fn name(&self) -> &str {
        "head"
    }
}
