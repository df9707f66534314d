//! Files served out of a git repository.
//!
//! `path/to/repo.git:public` serves the `public/` tree of the repository. The
//! revision comes from the first label of the request host when it names a
//! commit (`wip.localhost` serves branch `wip`), `HEAD` otherwise. Blobs are
//! read with the `git` executable.

use std::path::PathBuf;
use std::process::Stdio;

use axum::body::Body;
use axum::http::{header, HeaderValue, Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::future::BoxFuture;
use once_cell::sync::Lazy;
use percent_encoding::percent_decode_str;
use regex::Regex;
use tokio::process::Command;

use crate::http::middleware::weak_etag;
use crate::pipeline::{Handler, Next};
use crate::routing::matcher::request_host;

static REF_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_-]*$").unwrap());

#[derive(Debug, Clone)]
pub struct GitSource {
    repo: PathBuf,
    root: String,
}

impl GitSource {
    /// Parse `<repo>:<subdir>`.
    pub fn parse(def: &str) -> Self {
        let repo = def.split_once(':').map_or(def, |(repo, _)| repo);
        let root = def.rsplit_once(':').map_or("", |(_, root)| root);
        let root = format!("{}/", root.trim_end_matches('/'));
        Self {
            repo: PathBuf::from(repo),
            root: root.trim_start_matches('/').to_owned(),
        }
    }

    pub fn repo(&self) -> &std::path::Path {
        &self.repo
    }

    /// Tree prefix, empty or ending with `/`.
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Object path for a request path; `None` for parent segments.
    pub fn object_path(&self, uri_path: &str) -> Option<String> {
        let mut path = self.root.clone();
        let mut segments = Vec::new();
        for component in uri_path.split('/').filter(|c| !c.is_empty()) {
            let decoded = percent_decode_str(component).decode_utf8().ok()?;
            if decoded == ".." || decoded == "." {
                return None;
            }
            segments.push(decoded.into_owned());
        }
        path.push_str(&segments.join("/"));
        if uri_path.ends_with('/') {
            if !segments.is_empty() {
                path.push('/');
            }
            path.push_str("index.html");
        }
        Some(path)
    }

    fn git(&self) -> Command {
        let mut cmd = Command::new("git");
        cmd.arg("--git-dir")
            .arg(&self.repo)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        cmd
    }

    /// Revision for a request host.
    async fn revision(&self, host: Option<&str>) -> String {
        let label = host
            .and_then(|h| h.split_once('.'))
            .map(|(label, _)| label)
            .filter(|label| REF_NAME.is_match(label));

        if let Some(label) = label {
            let verified = self
                .git()
                .args(["rev-parse", "--verify", "--quiet"])
                .arg(format!("{label}^{{commit}}"))
                .stdout(Stdio::null())
                .status()
                .await;
            if matches!(verified, Ok(status) if status.success()) {
                return label.to_owned();
            }
        }
        "HEAD".to_owned()
    }

    async fn blob(&self, rev: &str, object: &str) -> Option<Vec<u8>> {
        let output = self
            .git()
            .args(["cat-file", "blob"])
            .arg(format!("{rev}:{object}"))
            .stdout(Stdio::piped())
            .output()
            .await;
        match output {
            Ok(output) if output.status.success() => Some(output.stdout),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(repo = ?self.repo, error = %e, "Failed to run git");
                None
            }
        }
    }

    async fn serve(&self, req: Request<Body>, next: Next<'_>) -> Response {
        let Some(object) = self.object_path(req.uri().path()) else {
            return next.run(req).await;
        };
        let rev = self.revision(request_host(&req)).await;
        let Some(bytes) = self.blob(&rev, &object).await else {
            return next.run(req).await;
        };

        let mime = mime_guess::from_path(&object).first_or_octet_stream();
        let content_type = HeaderValue::from_str(mime.as_ref())
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
        (
            StatusCode::OK,
            [(header::CONTENT_TYPE, content_type), (header::ETAG, weak_etag(&bytes))],
            bytes,
        )
            .into_response()
    }
}

impl Handler for GitSource {
    fn call<'a>(&'a self, req: Request<Body>, next: Next<'a>) -> BoxFuture<'a, Response> {
        if req.method() != Method::GET && req.method() != Method::HEAD {
            return next.run(req);
        }
        Box::pin(self.serve(req, next))
    }

    fn name(&self) -> &str {
        "git"
    }
}
