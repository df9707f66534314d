//! Upstream proxy.
//!
//! # Responsibilities
//! - Forward the mounted request path to the upstream base URL
//! - Fall through to the next stage when the upstream answers `404`
//! - Keep upstream redirects on the client's host
//!
//! # Design Decisions
//! - One `reqwest::Client` is shared by every upstream layer
//! - The request body is buffered so it can be replayed after a `404`
//! - Hop-by-hop headers never cross the proxy in either direction

use std::time::Duration;

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::future::BoxFuture;
use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use crate::config::UpstreamConfig;
use crate::observability::SharedSink;
use crate::pipeline::{Handler, Next};

static ORIGIN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^https?://[^/]+/?").unwrap());

/// Build the client shared by every upstream layer. Redirects are passed to
/// the client untouched.
pub fn build_client(config: &UpstreamConfig) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .pool_idle_timeout(Duration::from_secs(config.keep_alive_secs))
        .pool_max_idle_per_host(config.max_idle_per_host)
        .tcp_keepalive(Duration::from_secs(config.keep_alive_secs))
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .build()
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    let name = name.as_str();
    name.eq_ignore_ascii_case("connection")
        || name.eq_ignore_ascii_case("keep-alive")
        || name.eq_ignore_ascii_case("proxy-connection")
        || name.eq_ignore_ascii_case("transfer-encoding")
        || name.eq_ignore_ascii_case("upgrade")
        || name.eq_ignore_ascii_case("te")
        || name.eq_ignore_ascii_case("trailer")
}

fn forwardable(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if is_hop_by_hop(name) || name == header::HOST || name == header::CONTENT_LENGTH {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

/// Rewrite a redirect pointing back at the upstream host into a host-relative
/// path. `None` when the location is elsewhere or already relative.
pub fn rewrite_location(location: &str, upstream_host: &str) -> Option<String> {
    if location.split('/').nth(2) != Some(upstream_host) {
        return None;
    }
    let path = ORIGIN.replace(location, "/");
    (path != location).then(|| path.into_owned())
}

/// Proxy to one upstream base URL.
#[derive(Clone)]
pub struct Upstream {
    base: Url,
    host: String,
    client: reqwest::Client,
    sink: SharedSink,
}

impl Upstream {
    pub fn new(base: &str, client: reqwest::Client, sink: SharedSink) -> Result<Self, url::ParseError> {
        let url = Url::parse(base)?;
        let host = base.split('/').nth(2).unwrap_or_default().to_owned();
        Ok(Self {
            base: url,
            host,
            client,
            sink,
        })
    }

    /// Base URL path (trailing `/` trimmed) + request path + query.
    pub fn target(&self, path: &str, query: Option<&str>) -> Url {
        let mut url = self.base.clone();
        url.set_path(&format!("{}{}", self.base.path().trim_end_matches('/'), path));
        url.set_query(query);
        url
    }

    async fn forward(&self, req: Request<Body>, next: Next<'_>) -> Response {
        let (parts, body) = req.into_parts();
        let body = match axum::body::to_bytes(body, usize::MAX).await {
            Ok(body) => body,
            Err(e) => {
                tracing::debug!(error = %e, "Failed reading request body");
                return StatusCode::BAD_REQUEST.into_response();
            }
        };

        let target = self.target(parts.uri.path(), parts.uri.query());
        tracing::debug!(method = %parts.method, target = %target, "Forwarding to upstream");

        let sent = self
            .client
            .request(parts.method.clone(), target.clone())
            .headers(forwardable(&parts.headers))
            .body(body.clone())
            .send()
            .await;

        let upstream = match sent {
            Ok(res) => res,
            Err(e) => {
                tracing::warn!(target = %target, error = %e, "Upstream request failed");
                self.sink.log(&format!("upstream: {e}"));
                return (StatusCode::BAD_GATEWAY, "Bad Gateway").into_response();
            }
        };

        let status = upstream.status();
        if status == StatusCode::NOT_FOUND {
            return next.run(Request::from_parts(parts, Body::from(body))).await;
        }

        let mut headers = forwardable(upstream.headers());
        if let Some(content_length) = upstream.headers().get(header::CONTENT_LENGTH) {
            headers.insert(header::CONTENT_LENGTH, content_length.clone());
        }
        if matches!(status.as_u16(), 301 | 302 | 303 | 307) {
            self.rewrite_redirect(&mut headers);
        }

        let mut res = Response::new(Body::from_stream(upstream.bytes_stream()));
        *res.status_mut() = status;
        *res.headers_mut() = headers;
        res
    }

    fn rewrite_redirect(&self, headers: &mut HeaderMap) {
        let rewritten = headers
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|location| rewrite_location(location, &self.host));
        let Some(path) = rewritten else {
            return;
        };
        if let Ok(value) = HeaderValue::from_str(&path) {
            headers.insert(header::LOCATION, value);
            self.sink.log(&format!("location: {path}"));
        }
    }
}

impl Handler for Upstream {
    fn call<'a>(&'a self, req: Request<Body>, next: Next<'a>) -> BoxFuture<'a, Response> {
        Box::pin(self.forward(req, next))
    }

    fn name(&self) -> &str {
        "upstream"
    }
}
