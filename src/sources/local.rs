//! Local document roots.
//!
//! Files are served by `tower_http::services::ServeDir`. Misses fall through
//! to the next stage, so several roots can be stacked over each other.

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, Method, Request, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use futures_util::future::BoxFuture;
use maud::{html, DOCTYPE};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use tower::ServiceExt;
use tower_http::services::ServeDir;

use crate::pipeline::{Handler, Next};
use crate::routing::MountPrefix;

const HREF_ESC: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?');

/// Static files under one root directory.
#[derive(Debug, Clone)]
pub struct Local {
    root: PathBuf,
    serve: ServeDir,
    index: bool,
}

impl Local {
    /// Serve `root`. With `index`, directories without `index.html` get a
    /// generated listing.
    pub fn new(root: impl Into<PathBuf>, index: bool) -> Self {
        let root = root.into();
        Self {
            serve: ServeDir::new(&root),
            root,
            index,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn serve(&self, req: Request<Body>, next: Next<'_>) -> Response {
        let res = match self.serve.clone().oneshot(probe(&req)).await {
            Ok(res) => res.map(Body::new),
            Err(never) => match never {},
        };
        let prefix = req.extensions().get::<MountPrefix>().map(|p| p.0.clone());

        match res.status() {
            StatusCode::NOT_FOUND => {
                if self.index && req.uri().path().ends_with('/') {
                    if let Some(listing) = self.listing(req.uri().path(), prefix.as_deref()).await {
                        return listing;
                    }
                }
                next.run(req).await
            }
            StatusCode::OK => with_metadata_etag(res),
            status if status.is_redirection() => match prefix {
                Some(prefix) => reprefix_location(res, &prefix),
                None => res,
            },
            _ => res,
        }
    }

    async fn listing(&self, uri_path: &str, prefix: Option<&str>) -> Option<Response> {
        let dir = resolve(&self.root, uri_path)?;
        let mut entries = tokio::fs::read_dir(&dir).await.ok()?;

        let mut names = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            names.push(if is_dir { format!("{name}/") } else { name });
        }
        names.sort();

        let base = format!("{}{}", prefix.unwrap_or_default(), uri_path);
        let markup = html! {
            (DOCTYPE)
            html {
                head {
                    meta charset="utf-8";
                    title { "listing directory " (base) }
                }
                body {
                    h1 { (base) }
                    ul {
                        @if base != "/" {
                            li { a href=(format!("{base}..")) { ".." } }
                        }
                        @for name in &names {
                            li { a href=(format!("{base}{}", utf8_percent_encode(name, HREF_ESC))) { (name) } }
                        }
                    }
                }
            }
        };
        Some(Html(markup.into_string()).into_response())
    }
}

impl Handler for Local {
    fn call<'a>(&'a self, req: Request<Body>, next: Next<'a>) -> BoxFuture<'a, Response> {
        if req.method() != Method::GET && req.method() != Method::HEAD {
            return next.run(req);
        }
        Box::pin(self.serve(req, next))
    }

    fn name(&self) -> &str {
        "local"
    }
}

/// Body-less copy of `req` for a sub-service, keeping `req` for fallthrough.
pub(crate) fn probe(req: &Request<Body>) -> Request<Body> {
    let mut probe = Request::new(Body::empty());
    *probe.method_mut() = req.method().clone();
    *probe.uri_mut() = req.uri().clone();
    *probe.version_mut() = req.version();
    *probe.headers_mut() = req.headers().clone();
    probe
}

/// Map a request path onto `root`, refusing parent segments.
pub(crate) fn resolve(root: &Path, uri_path: &str) -> Option<PathBuf> {
    let mut path = root.to_path_buf();
    for component in uri_path.split('/').filter(|c| !c.is_empty()) {
        let decoded = percent_decode_str(component).decode_utf8().ok()?;
        if decoded == ".." || decoded.contains(['/', '\\']) {
            return None;
        }
        if decoded != "." {
            path.push(&*decoded);
        }
    }
    Some(path)
}

/// Weak validator from size and modification time: `W/"<size-hex>-<mtime-hex>"`.
fn metadata_etag(headers: &HeaderMap) -> Option<HeaderValue> {
    let len: u64 = headers.get(header::CONTENT_LENGTH)?.to_str().ok()?.parse().ok()?;
    let modified = httpdate::parse_http_date(headers.get(header::LAST_MODIFIED)?.to_str().ok()?).ok()?;
    let secs = modified.duration_since(UNIX_EPOCH).ok()?.as_secs();
    HeaderValue::from_str(&format!("W/\"{len:x}-{secs:x}\"")).ok()
}

fn with_metadata_etag(mut res: Response) -> Response {
    if !res.headers().contains_key(header::ETAG) {
        if let Some(etag) = metadata_etag(res.headers()) {
            res.headers_mut().insert(header::ETAG, etag);
        }
    }
    res
}

/// Put the mount prefix back on a path-absolute `Location`.
fn reprefix_location(mut res: Response, prefix: &str) -> Response {
    let location = res
        .headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .filter(|l| l.starts_with('/') && !l.starts_with("//"))
        .and_then(|l| HeaderValue::from_str(&format!("{prefix}{l}")).ok());
    if let Some(location) = location {
        res.headers_mut().insert(header::LOCATION, location);
    }
    res
}
