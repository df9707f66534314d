//! Response decompression for the rest of the chain.
//!
//! Installed once, right before the first upstream, so the cache tee and the
//! transforms see decoded bytes. The outer compression layer encodes again
//! for the client.

use std::convert::Infallible;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::future::BoxFuture;
use tower::{service_fn, ServiceExt};
use tower_http::decompression::Decompression;

use crate::pipeline::{Handler, Next};

#[derive(Debug, Default, Clone, Copy)]
pub struct Decompress;

impl Handler for Decompress {
    fn call<'a>(&'a self, req: Request<Body>, next: Next<'a>) -> BoxFuture<'a, Response> {
        let mut next = Some(next);
        let inner = service_fn(move |req: Request<Body>| {
            let next = next.take();
            async move {
                let res = match next {
                    Some(next) => next.run(req).await,
                    None => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
                };
                Ok::<_, Infallible>(res)
            }
        });

        Box::pin(async move {
            match Decompression::new(inner).oneshot(req).await {
                Ok(res) => res.map(Body::new),
                Err(never) => match never {},
            }
        })
    }

    fn name(&self) -> &str {
        "decompress"
    }
}
