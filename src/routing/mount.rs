//! Mount scoping for pipeline stages.
//!
//! A stage declared as `//host/path/ = ...` or `^regex = ...` only runs for
//! requests inside its scope. Prefix mounts strip the prefix before
//! delegating, the way a sub-router would, and put the original URI back if
//! the stage falls through.

use axum::body::Body;
use axum::http::{Request, Uri};
use axum::response::Response;
use futures_util::future::BoxFuture;

use crate::pipeline::{BoxedHandler, Handler, Next};
use crate::routing::matcher::{HostPattern, Matcher, PathPrefixMatcher, PathRegexMatcher};

/// The prefix stripped by the enclosing mount, visible to the mounted stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountPrefix(pub String);

/// Path part of a mount scope.
#[derive(Debug, Clone)]
pub enum PathScope {
    Root,
    Prefix(PathPrefixMatcher),
    Regex(PathRegexMatcher),
}

impl Matcher for PathScope {
    fn matches(&self, req: &Request<Body>) -> bool {
        match self {
            PathScope::Root => true,
            PathScope::Prefix(prefix) => prefix.matches(req),
            PathScope::Regex(regex) => regex.matches(req),
        }
    }
}

/// Host and path conditions of one layer, combined with AND.
#[derive(Debug, Clone)]
pub struct MountScope {
    pub host: Option<HostPattern>,
    pub path: PathScope,
}

impl MountScope {
    /// Scope covering every request.
    pub fn root() -> Self {
        Self {
            host: None,
            path: PathScope::Root,
        }
    }

    /// True when the scope places no condition on the request.
    pub fn is_global(&self) -> bool {
        self.host.is_none()
            && match &self.path {
                PathScope::Root => true,
                PathScope::Prefix(prefix) => prefix.is_root(),
                PathScope::Regex(_) => false,
            }
    }
}

impl Matcher for MountScope {
    fn matches(&self, req: &Request<Body>) -> bool {
        let host_ok = match &self.host {
            Some(host) => Matcher::matches(host, req),
            None => true,
        };
        host_ok && self.path.matches(req)
    }
}

/// A stage restricted to a mount scope.
pub struct Mounted {
    scope: MountScope,
    inner: BoxedHandler,
}

impl Mounted {
    pub fn new(scope: MountScope, inner: BoxedHandler) -> Self {
        Self { scope, inner }
    }

    /// Wrap `inner` unless the scope is global.
    pub fn wrap(scope: MountScope, inner: BoxedHandler) -> BoxedHandler {
        if scope.is_global() {
            inner
        } else {
            Box::new(Self::new(scope, inner))
        }
    }
}

impl Handler for Mounted {
    fn call<'a>(&'a self, mut req: Request<Body>, next: Next<'a>) -> BoxFuture<'a, Response> {
        if !self.scope.matches(&req) {
            return next.run(req);
        }

        let prefix = match &self.scope.path {
            PathScope::Prefix(prefix) if !prefix.is_root() => prefix,
            _ => return self.inner.call(req, next),
        };

        let original = req.uri().clone();
        let stripped = prefix
            .strip(original.path())
            .and_then(|rest| replace_path(&original, rest));
        let Some(uri) = stripped else {
            return next.run(req);
        };

        *req.uri_mut() = uri;
        req.extensions_mut().insert(MountPrefix(prefix.prefix().to_owned()));
        self.inner.call(req, next.restoring(original))
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

/// Copy of `uri` with its path replaced and the query kept.
pub fn replace_path(uri: &Uri, path: &str) -> Option<Uri> {
    let path_and_query = match uri.query() {
        Some(query) => format!("{path}?{query}"),
        None => path.to_owned(),
    };
    let mut parts = uri.clone().into_parts();
    parts.path_and_query = Some(path_and_query.parse().ok()?);
    Uri::from_parts(parts).ok()
}
