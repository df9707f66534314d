//! ETag revalidation.
//!
//! Content sources and transforms may change a body after its validator was
//! computed, so conditional requests are answered here instead of by the
//! sources. The other conditional headers never reach a source, with or
//! without `If-None-Match`. A `200` whose `ETag` matches becomes `304`.

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, Request, StatusCode};
use axum::response::Response;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use futures_util::future::BoxFuture;
use sha2::{Digest, Sha256};

use crate::pipeline::{Handler, Next};

const CONDITIONAL: [header::HeaderName; 4] = [
    header::IF_MATCH,
    header::IF_MODIFIED_SINCE,
    header::IF_RANGE,
    header::IF_UNMODIFIED_SINCE,
];

/// Strip the weak prefix and every quote.
pub fn normalize(etag: &str) -> String {
    etag.strip_prefix("W/").unwrap_or(etag).replace('"', "")
}

/// Weak validator for a body: `W/"<len-hex>-<sha256-base64>"`.
pub fn weak_etag(body: &[u8]) -> HeaderValue {
    let digest = STANDARD_NO_PAD.encode(Sha256::digest(body));
    let tag = format!("W/\"{:x}-{}\"", body.len(), &digest[..27]);
    // hex and base64 are always valid header characters
    HeaderValue::from_str(&tag).unwrap_or_else(|_| HeaderValue::from_static("W/\"0\""))
}

/// Revalidation stage.
#[derive(Debug, Default, Clone, Copy)]
pub struct EtagRevalidation;

impl EtagRevalidation {
    /// Rewrite a matching `200` into an empty `304`.
    fn revalidate(if_none_match: &str, res: Response) -> Response {
        if res.status() != StatusCode::OK {
            return res;
        }
        let matches = etag_of(res.headers()).is_some_and(|etag| normalize(etag) == normalize(if_none_match));
        if !matches {
            return res;
        }

        let (mut parts, _) = res.into_parts();
        parts.status = StatusCode::NOT_MODIFIED;
        parts.headers.remove(header::CONTENT_LENGTH);
        Response::from_parts(parts, Body::empty())
    }
}

fn etag_of(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::ETAG).and_then(|v| v.to_str().ok())
}

impl Handler for EtagRevalidation {
    fn call<'a>(&'a self, mut req: Request<Body>, next: Next<'a>) -> BoxFuture<'a, Response> {
        let if_none_match = req
            .headers_mut()
            .remove(header::IF_NONE_MATCH)
            .and_then(|v| v.to_str().ok().map(str::to_owned));
        for name in CONDITIONAL {
            req.headers_mut().remove(name);
        }

        let Some(if_none_match) = if_none_match else {
            return next.run(req);
        };

        Box::pin(async move {
            let res = next.run(req).await;
            Self::revalidate(&if_none_match, res)
        })
    }

    fn name(&self) -> &str {
        "etag"
    }
}
