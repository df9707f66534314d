//! JSON pretty printer.

use axum::body::{to_bytes, Body};
use axum::http::{header, HeaderValue, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::ser::PrettyFormatter;

use crate::http::middleware::weak_etag;
use crate::pipeline::{Handler, Next};

/// Indents wider than this are clamped.
const MAX_INDENT: usize = 10;

/// `json` option: a width in spaces or a literal indent string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonIndent {
    Width(u64),
    Text(String),
}

impl JsonIndent {
    /// The indent unit, or `None` when pretty printing is disabled.
    pub fn spacer(&self) -> Option<String> {
        let spacer = match self {
            JsonIndent::Width(width) => " ".repeat((*width as usize).min(MAX_INDENT)),
            JsonIndent::Text(text) => text.chars().take(MAX_INDENT).collect(),
        };
        (!spacer.is_empty()).then_some(spacer)
    }
}

impl std::str::FromStr for JsonIndent {
    type Err = std::convert::Infallible;

    /// Digits are a width, anything else a literal indent.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.parse() {
            Ok(width) => JsonIndent::Width(width),
            Err(_) => JsonIndent::Text(s.to_owned()),
        })
    }
}

/// Re-serializes `application/json` responses with a fixed indent.
#[derive(Debug, Clone)]
pub struct PrettyJson {
    indent: String,
}

impl PrettyJson {
    pub fn new(indent: &JsonIndent) -> Option<Self> {
        indent.spacer().map(|indent| Self { indent })
    }

    /// Pretty print a document. Leading byte-order marks are ignored.
    pub fn format(&self, text: &str) -> Result<String, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_str(text.trim_start_matches('\u{feff}'))?;

        let mut out = Vec::new();
        let formatter = PrettyFormatter::with_indent(self.indent.as_bytes());
        let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
        value.serialize(&mut serializer)?;

        // serde_json only emits valid UTF-8
        Ok(String::from_utf8_lossy(&out).into_owned())
    }
}

fn is_json(res: &Response) -> bool {
    res.headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/json"))
}

impl Handler for PrettyJson {
    fn call<'a>(&'a self, req: Request<Body>, next: Next<'a>) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let res = next.run(req).await;
            let status = res.status();
            if !is_json(&res)
                || res.headers().contains_key(header::CONTENT_ENCODING)
                || status == StatusCode::NO_CONTENT
                || status == StatusCode::NOT_MODIFIED
            {
                return res;
            }

            let (mut parts, body) = res.into_parts();
            let bytes = match to_bytes(body, usize::MAX).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to read JSON response body");
                    return StatusCode::INTERNAL_SERVER_ERROR.into_response();
                }
            };

            match self.format(&String::from_utf8_lossy(&bytes)) {
                Ok(pretty) => {
                    parts.headers.insert(header::CONTENT_LENGTH, HeaderValue::from(pretty.len()));
                    if parts.headers.contains_key(header::ETAG) {
                        parts.headers.insert(header::ETAG, weak_etag(pretty.as_bytes()));
                    }
                    Response::from_parts(parts, Body::from(pretty))
                }
                Err(e) => {
                    tracing::error!(error = %e, "Invalid JSON response body");
                    StatusCode::INTERNAL_SERVER_ERROR.into_response()
                }
            }
        })
    }

    fn name(&self) -> &str {
        "json"
    }
}
