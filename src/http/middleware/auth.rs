//! HTTP Basic authentication.

use std::collections::HashSet;

use axum::body::Body;
use axum::http::{header, HeaderValue, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures_util::future::BoxFuture;

use crate::pipeline::{Handler, Next};

const CHALLENGE: &str = r#"Basic realm="username and password""#;

/// Accepts a fixed set of credentials.
///
/// Entries containing `:` are `user:password` pairs; anything else is taken
/// as an already base64-encoded pair. The `Authorization` header is removed
/// before the request travels further.
#[derive(Debug, Clone)]
pub struct BasicAuth {
    accepted: HashSet<String>,
}

impl BasicAuth {
    pub fn new<I, S>(credentials: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let accepted = credentials
            .into_iter()
            .map(|c| c.as_ref().to_owned())
            .filter(|c| !c.is_empty())
            .map(|c| if c.contains(':') { STANDARD.encode(c) } else { c })
            .collect();
        Self { accepted }
    }

    /// Whether no credential was configured.
    pub fn is_empty(&self) -> bool {
        self.accepted.is_empty()
    }

    fn accepts(&self, authorization: Option<&HeaderValue>) -> bool {
        let Some(value) = authorization.and_then(|v| v.to_str().ok()) else {
            return false;
        };
        let token = match value.split_once(char::is_whitespace) {
            Some((scheme, token)) if scheme.eq_ignore_ascii_case("basic") => token.trim(),
            _ => value,
        };
        self.accepted.contains(token)
    }
}

impl Handler for BasicAuth {
    fn call<'a>(&'a self, mut req: Request<Body>, next: Next<'a>) -> BoxFuture<'a, Response> {
        let authorization = req.headers_mut().remove(header::AUTHORIZATION);
        if self.accepts(authorization.as_ref()) {
            return next.run(req);
        }

        tracing::debug!(path = %req.uri().path(), "Rejected request without valid credentials");
        Box::pin(async {
            (StatusCode::UNAUTHORIZED, [(header::WWW_AUTHENTICATE, CHALLENGE)]).into_response()
        })
    }

    fn name(&self) -> &str {
        "auth"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{handler_fn, Pipeline};

    fn pipeline(auth: BasicAuth) -> Pipeline {
        Pipeline::new(vec![
            Box::new(auth),
            Box::new(handler_fn(|req, _next| {
                let leaked = req.headers().contains_key(header::AUTHORIZATION);
                Box::pin(async move {
                    if leaked {
                        StatusCode::INTERNAL_SERVER_ERROR.into_response()
                    } else {
                        "secret".into_response()
                    }
                })
            })),
        ])
    }

    async fn status(pipeline: &Pipeline, authorization: Option<&str>) -> StatusCode {
        let mut builder = Request::builder().uri("/");
        if let Some(value) = authorization {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        pipeline.handle(builder.body(Body::empty()).unwrap()).await.status()
    }

    #[tokio::test]
    async fn test_plain_and_encoded_credentials() {
        // "dXNlcjI6cGFzczI=" is user2:pass2
        let pipeline = pipeline(BasicAuth::new(["user1:pass1", "dXNlcjI6cGFzczI="]));

        let user1 = format!("Basic {}", STANDARD.encode("user1:pass1"));
        assert_eq!(status(&pipeline, Some(&user1)).await, StatusCode::OK);
        assert_eq!(status(&pipeline, Some("basic dXNlcjI6cGFzczI=")).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_rejects_with_challenge() {
        let pipeline = pipeline(BasicAuth::new(vec!["user:pass".to_string()]));
        assert_eq!(status(&pipeline, None).await, StatusCode::UNAUTHORIZED);
        assert_eq!(status(&pipeline, Some("Basic d3Jvbmc6d3Jvbmc=")).await, StatusCode::UNAUTHORIZED);

        let res = pipeline.handle(Request::new(Body::empty())).await;
        assert_eq!(res.headers()[header::WWW_AUTHENTICATE], CHALLENGE);
    }

    #[test]
    fn test_empty_entries_ignored() {
        assert!(BasicAuth::new([""]).is_empty());
    }
}
