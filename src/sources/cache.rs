//! On-disk cache of upstream responses.
//!
//! The composer serves the cache directory as a local root ahead of the first
//! upstream and places `CacheTee` right behind it, so a body fetched once is
//! served from disk afterwards.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use axum::body::{Body, Bytes};
use axum::http::{Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::future::BoxFuture;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::observability::SharedSink;
use crate::pipeline::{Handler, Next};
use crate::sources::local::resolve;

static PARENT_SEGMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^/]+/\.\./").unwrap());
static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Drop `dir/../` pairs from a configured cache path; empty becomes `.`.
pub fn normalize_cache_dir(dir: &str) -> String {
    let normalized = PARENT_SEGMENT.replace_all(dir, "");
    if normalized.is_empty() {
        ".".to_owned()
    } else {
        normalized.into_owned()
    }
}

/// File a request path is cached under. Directory paths map to `index.html`.
pub fn cache_path(dir: &Path, uri_path: &str) -> Option<PathBuf> {
    let mut path = resolve(dir, uri_path)?;
    if uri_path.ends_with('/') {
        path.push("index.html");
    }
    Some(path)
}

/// Stores `200` GET bodies under the cache directory.
#[derive(Clone)]
pub struct CacheTee {
    dir: PathBuf,
    sink: SharedSink,
}

impl CacheTee {
    pub fn new(dir: impl Into<PathBuf>, sink: SharedSink) -> Self {
        Self {
            dir: dir.into(),
            sink,
        }
    }

    async fn tee(&self, req: Request<Body>, next: Next<'_>) -> Response {
        let target = cache_path(&self.dir, req.uri().path());
        let res = next.run(req).await;

        let Some(target) = target else {
            return res;
        };
        if res.status() != StatusCode::OK {
            return res;
        }

        let (parts, body) = res.into_parts();
        let bytes = match axum::body::to_bytes(body, usize::MAX).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, "Failed reading response body for cache");
                return (StatusCode::BAD_GATEWAY, "Bad Gateway").into_response();
            }
        };

        if let Err(e) = store(&target, &bytes).await {
            tracing::warn!(path = ?target, error = %e, "Cache write failed");
            self.sink.log(&format!("cache: {}: {e}", target.display()));
        }
        Response::from_parts(parts, Body::from(bytes))
    }
}

/// Write to a sibling temp file, then rename over the target. Concurrent
/// writers of one path leave the last complete body.
async fn store(target: &Path, bytes: &Bytes) -> std::io::Result<()> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let seq = TEMP_SEQ.fetch_add(1, Ordering::Relaxed);
    let mut temp = target.as_os_str().to_owned();
    temp.push(format!(".{}.{seq}.tmp", std::process::id()));
    let temp = PathBuf::from(temp);

    tokio::fs::write(&temp, bytes).await?;
    if let Err(e) = tokio::fs::rename(&temp, target).await {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(e);
    }
    Ok(())
}

impl Handler for CacheTee {
    fn call<'a>(&'a self, req: Request<Body>, next: Next<'a>) -> BoxFuture<'a, Response> {
        if req.method() != Method::GET {
            return next.run(req);
        }
        Box::pin(self.tee(req, next))
    }

    fn name(&self) -> &str {
        "cache"
    }
}
