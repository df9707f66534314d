//! Directive parsing.
//!
//! A directive is an optional mount alias followed by an action:
//!
//! ```text
//! [ <alias> = ] <payload>
//! alias := //host/path/ | /path/ | ^regex
//! ```
//!
//! Classification is first match wins, in this order: empty, comment, sed
//! expression, function transform, inline middleware, status code, upstream
//! URL, git source, local path.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::routing::{HostPattern, MountScope, PathPrefixMatcher, PathRegexMatcher, PathScope};

/// Failure to parse a directive.
#[derive(Debug, Error)]
pub enum LayerError {
    #[error("invalid mount pattern `{alias}`: {source}")]
    InvalidMountRegex {
        alias: String,
        #[source]
        source: regex::Error,
    },

    #[error("empty host in mount alias `{0}`")]
    EmptyHost(String),
}

/// What a directive does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Comment,
    Empty,
    Local,
    Remote,
    StatusStub,
    SedTransform,
    FunctionTransform,
    InlineMiddleware,
    VersionedSource,
}

impl ActionKind {
    /// Whether the action can terminate a request with a body.
    pub fn is_content_source(self) -> bool {
        matches!(
            self,
            ActionKind::Local
                | ActionKind::Remote
                | ActionKind::StatusStub
                | ActionKind::InlineMiddleware
                | ActionKind::VersionedSource
        )
    }

    /// Whether the action rewrites response bodies.
    pub fn is_transform(self) -> bool {
        matches!(self, ActionKind::SedTransform | ActionKind::FunctionTransform)
    }
}

static ALIAS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)^[/^].*=").unwrap());
static FUNCTION: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\w.*\(.+\)$").unwrap());
static MIDDLEWARE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)^\([^)]*\)\s*=>").unwrap());
static STATUS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[1-5]\d\d$").unwrap());
static REMOTE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^https?://").unwrap());
static GIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.git:").unwrap());

/// One parsed directive.
#[derive(Debug, Clone)]
pub struct Layer {
    mount_host: Option<HostPattern>,
    mount_path: Option<String>,
    mount_path_regex: Option<Regex>,
    action: ActionKind,
    raw: String,
}

impl Layer {
    /// Parse one directive. Surrounding whitespace is ignored.
    pub fn parse(directive: &str) -> Result<Self, LayerError> {
        let mut def = directive.trim();
        let mut layer = Layer {
            mount_host: None,
            mount_path: None,
            mount_path_regex: None,
            action: ActionKind::Empty,
            raw: String::new(),
        };

        if ALIAS.is_match(def) {
            // split at the first `=`
            let (alias, payload) = def.split_once('=').unwrap_or((def, ""));
            let alias = alias.trim_end();
            def = payload.trim_start();

            if let Some(rest) = alias.strip_prefix("//") {
                let (host, path) = match rest.find('/') {
                    Some(i) => (&rest[..i], &rest[i..]),
                    None => (rest, "/"),
                };
                if host.is_empty() {
                    return Err(LayerError::EmptyHost(alias.to_owned()));
                }
                layer.mount_host = Some(HostPattern::parse(host));
                layer.mount_path = Some(path.to_owned());
            } else if alias.starts_with('^') {
                let regex = Regex::new(alias).map_err(|source| LayerError::InvalidMountRegex {
                    alias: alias.to_owned(),
                    source,
                })?;
                layer.mount_path_regex = Some(regex);
            } else {
                layer.mount_path = Some(alias.to_owned());
            }
        }

        layer.action = classify(def);
        layer.raw = def.to_owned();
        Ok(layer)
    }

    pub fn action(&self) -> ActionKind {
        self.action
    }

    /// The action payload: path, URL, status code, expression or source.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn mount_host(&self) -> Option<&HostPattern> {
        self.mount_host.as_ref()
    }

    /// Mount path as written; `/` when no alias was given.
    pub fn mount_path(&self) -> &str {
        match (&self.mount_path, &self.mount_path_regex) {
            (Some(path), _) => path,
            (None, Some(regex)) => regex.as_str(),
            (None, None) => "/",
        }
    }

    pub fn mount_path_regex(&self) -> Option<&Regex> {
        self.mount_path_regex.as_ref()
    }

    /// Compiled mount scope.
    pub fn scope(&self) -> MountScope {
        let path = match (&self.mount_path_regex, &self.mount_path) {
            (Some(regex), _) => PathScope::Regex(PathRegexMatcher::new(regex.clone())),
            (None, Some(path)) => PathScope::Prefix(PathPrefixMatcher::new(path.as_str())),
            (None, None) => PathScope::Root,
        };
        MountScope {
            host: self.mount_host.clone(),
            path,
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(host) = &self.mount_host {
            write!(f, "//{}", host.as_str())?;
        }
        write!(f, "{} = {}", self.mount_path(), self.raw)
    }
}

fn classify(def: &str) -> ActionKind {
    if def.is_empty() {
        ActionKind::Empty
    } else if def.starts_with('#') {
        ActionKind::Comment
    } else if looks_like_sed(def) {
        ActionKind::SedTransform
    } else if FUNCTION.is_match(def) {
        ActionKind::FunctionTransform
    } else if MIDDLEWARE.is_match(def) {
        ActionKind::InlineMiddleware
    } else if STATUS.is_match(def) {
        ActionKind::StatusStub
    } else if REMOTE.is_match(def) {
        ActionKind::Remote
    } else if GIT.is_match(def) {
        ActionKind::VersionedSource
    } else {
        ActionKind::Local
    }
}

/// `s` followed by a punctuation delimiter that splits the rest into more
/// than three fields.
fn looks_like_sed(def: &str) -> bool {
    let mut chars = def.chars();
    if chars.next() != Some('s') {
        return false;
    }
    match chars.next() {
        Some(delim) if delim.is_ascii_punctuation() && delim != '\\' => def.split(delim).count() > 3,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let cases = [
            ("", ActionKind::Empty),
            ("   ", ActionKind::Empty),
            ("# comment", ActionKind::Comment),
            ("s/foo/bar/g", ActionKind::SedTransform),
            ("s#a/b#c#", ActionKind::SedTransform),
            ("sample/htdocs", ActionKind::Local),
            ("html(s => s.toLowerCase())", ActionKind::FunctionTransform),
            ("text(toHalfWidth)", ActionKind::FunctionTransform),
            (r#"(req, res, next) => res.send("OK")"#, ActionKind::InlineMiddleware),
            ("404", ActionKind::StatusStub),
            ("600", ActionKind::Local),
            ("https://example.com/", ActionKind::Remote),
            ("http://127.0.0.1:3000", ActionKind::Remote),
            ("repo.git:htdocs", ActionKind::VersionedSource),
            ("/var/www/html", ActionKind::Local),
        ];
        for (def, expected) in cases {
            assert_eq!(Layer::parse(def).unwrap().action(), expected, "{def:?}");
        }
    }

    #[test]
    fn test_path_alias() {
        let layer = Layer::parse("  /mount/ =  htdocs ").unwrap();
        assert_eq!(layer.mount_path(), "/mount/");
        assert!(layer.mount_host().is_none());
        assert_eq!(layer.raw(), "htdocs");
        assert_eq!(layer.action(), ActionKind::Local);
        assert_eq!(layer.to_string(), "/mount/ = htdocs");
    }

    #[test]
    fn test_host_alias() {
        let layer = Layer::parse("//example.net/sample/ = https://example.com").unwrap();
        assert_eq!(layer.mount_host().map(|h| h.as_str()), Some("example.net"));
        assert_eq!(layer.mount_path(), "/sample/");
        assert_eq!(layer.action(), ActionKind::Remote);
        assert_eq!(layer.to_string(), "//example.net/sample/ = https://example.com");

        let wildcard = Layer::parse("//*.net/ = htdocs").unwrap();
        assert!(matches!(wildcard.mount_host(), Some(HostPattern::Wildcard(_))));

        assert!(matches!(Layer::parse("///x/ = htdocs"), Err(LayerError::EmptyHost(_))));
    }

    #[test]
    fn test_regex_alias() {
        let layer = Layer::parse(r"^/[^/]+\.map$ = 403").unwrap();
        assert_eq!(layer.action(), ActionKind::StatusStub);
        assert_eq!(layer.mount_path_regex().map(|r| r.as_str()), Some(r"^/[^/]+\.map$"));
        assert_eq!(layer.to_string(), r"^/[^/]+\.map$ = 403");
        assert!(matches!(layer.scope().path, PathScope::Regex(_)));

        assert!(matches!(
            Layer::parse("^/(unclosed = 403"),
            Err(LayerError::InvalidMountRegex { .. })
        ));
    }

    #[test]
    fn test_no_alias_defaults_to_root() {
        let layer = Layer::parse("htdocs").unwrap();
        assert_eq!(layer.mount_path(), "/");
        assert!(layer.scope().is_global());
        assert_eq!(layer.to_string(), "/ = htdocs");
    }

    #[test]
    fn test_transform_alias_keeps_payload() {
        let layer = Layer::parse("/mount/ = s/Hello/Hi/").unwrap();
        assert_eq!(layer.action(), ActionKind::SedTransform);
        assert_eq!(layer.raw(), "s/Hello/Hi/");
        assert!(!layer.scope().is_global());
    }

    #[test]
    fn test_action_groups() {
        assert!(ActionKind::Remote.is_content_source());
        assert!(ActionKind::InlineMiddleware.is_content_source());
        assert!(!ActionKind::SedTransform.is_content_source());
        assert!(ActionKind::FunctionTransform.is_transform());
        assert!(!ActionKind::Comment.is_transform());
    }
}
