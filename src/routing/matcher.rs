//! Request matching for mount scopes.
//!
//! # Responsibilities
//! - Match the Host header (exact string or wildcard pattern)
//! - Match the request path against a mount prefix or a regular expression
//!
//! # Design Decisions
//! - Host matching is exact and case-sensitive, as received (port included)
//! - Prefixes match on segment boundaries: `/mount/` covers `/mount` and `/mount/x`
//! - Regex scopes test the path only, never the query string

use axum::body::Body;
use axum::http::{header, Request};
use regex::Regex;

/// Trait for matching requests against conditions.
pub trait Matcher: Send + Sync + std::fmt::Debug {
    /// Returns true if the request matches this condition.
    fn matches(&self, req: &Request<Body>) -> bool;
}

/// Host name as sent by the client: the `Host` header, or the URI authority for HTTP/2.
pub fn request_host(req: &Request<Body>) -> Option<&str> {
    req.headers()
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .or_else(|| req.uri().authority().map(|a| a.as_str()))
}

/// A host token from a `//host/path` mount alias.
#[derive(Debug, Clone)]
pub enum HostPattern {
    /// Plain host, compared byte for byte.
    Exact(String),
    /// Host containing `*`, `?` or `**`.
    Wildcard(WildcardHost),
}

impl HostPattern {
    /// Classify a host token: wildcard characters make it a pattern.
    pub fn parse(host: &str) -> Self {
        if host.contains(['*', '?']) {
            HostPattern::Wildcard(WildcardHost::compile(host))
        } else {
            HostPattern::Exact(host.to_owned())
        }
    }

    /// Test a received host value.
    pub fn matches(&self, host: &str) -> bool {
        match self {
            HostPattern::Exact(expected) => expected == host,
            HostPattern::Wildcard(pattern) => pattern.matches(host),
        }
    }

    /// The host token as written in the directive.
    pub fn as_str(&self) -> &str {
        match self {
            HostPattern::Exact(host) => host,
            HostPattern::Wildcard(pattern) => &pattern.source,
        }
    }
}

impl Matcher for HostPattern {
    fn matches(&self, req: &Request<Body>) -> bool {
        request_host(req).is_some_and(|host| HostPattern::matches(self, host))
    }
}

/// Compiled wildcard host.
///
/// `*` is any run of characters other than `.` and `:`, `?` is exactly one of
/// them and `**` is unrestricted. Everything else matches literally.
#[derive(Debug, Clone)]
pub struct WildcardHost {
    source: String,
    regex: Regex,
}

/// Any character that does not cross a label or port boundary.
const LABEL_CHAR: &str = "[^.:]";

impl WildcardHost {
    /// Compile a wildcard host into an anchored regular expression.
    pub fn compile(pattern: &str) -> Self {
        let mut expr = String::with_capacity(pattern.len() * 2 + 2);
        expr.push('^');

        let mut chars = pattern.chars().peekable();
        let mut literal = String::new();
        while let Some(c) = chars.next() {
            match c {
                '*' | '?' => {
                    expr.push_str(&regex::escape(&literal));
                    literal.clear();
                    if c == '?' {
                        expr.push_str(LABEL_CHAR);
                    } else if chars.peek() == Some(&'*') {
                        chars.next();
                        expr.push_str(".*");
                    } else {
                        expr.push_str(LABEL_CHAR);
                        expr.push('*');
                    }
                }
                _ => literal.push(c),
            }
        }
        expr.push_str(&regex::escape(&literal));
        expr.push('$');

        // Every literal run is escaped, so the expression is always valid.
        let regex = Regex::new(&expr).unwrap_or_else(|_| unreachable!("escaped pattern {expr}"));
        Self {
            source: pattern.to_owned(),
            regex,
        }
    }

    /// Test a host value.
    pub fn matches(&self, host: &str) -> bool {
        self.regex.is_match(host)
    }

    /// The compiled expression, mostly useful for diagnostics.
    pub fn as_regex(&self) -> &Regex {
        &self.regex
    }
}

/// Matches the request path prefix on segment boundaries.
#[derive(Debug, Clone)]
pub struct PathPrefixMatcher {
    prefix: String,
}

impl PathPrefixMatcher {
    /// Create a new path prefix matcher. Trailing slashes are not significant.
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        Self {
            prefix: prefix.trim_end_matches('/').to_owned(),
        }
    }

    /// The prefix without its trailing slash; empty for the root.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Whether this is the root mount (matches everything, strips nothing).
    pub fn is_root(&self) -> bool {
        self.prefix.is_empty()
    }

    /// Path remaining below the prefix, always starting with `/`.
    pub fn strip<'p>(&self, path: &'p str) -> Option<&'p str> {
        let rest = path.strip_prefix(self.prefix.as_str())?;
        if rest.is_empty() {
            Some("/")
        } else if rest.starts_with('/') {
            Some(rest)
        } else {
            None
        }
    }
}

impl Matcher for PathPrefixMatcher {
    fn matches(&self, req: &Request<Body>) -> bool {
        self.strip(req.uri().path()).is_some()
    }
}

/// Matches the request path against a regular expression.
#[derive(Debug, Clone)]
pub struct PathRegexMatcher {
    regex: Regex,
}

impl PathRegexMatcher {
    /// Wrap an already compiled expression.
    pub fn new(regex: Regex) -> Self {
        Self { regex }
    }
}

impl Matcher for PathRegexMatcher {
    fn matches(&self, req: &Request<Body>) -> bool {
        self.regex.is_match(req.uri().path())
    }
}
