//! The transform stage.
//!
//! One stage placed in front of every content source. It holds all sed and
//! function transforms in declaration order and applies the ones whose mount
//! scope and content type match, front-to-back, so the output of the first
//! declared transform is the input of the second.

use axum::body::{to_bytes, Body};
use axum::http::{header, HeaderValue, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::future::BoxFuture;

use crate::http::middleware::etag::weak_etag;
use crate::pipeline::{Handler, Next};
use crate::routing::{Matcher, MountScope};
use crate::transform::{charset, Transform, TransformError};

/// A transform restricted to a mount scope.
pub struct ScopedTransform {
    scope: MountScope,
    label: String,
    transform: Box<dyn Transform>,
}

impl ScopedTransform {
    pub fn new(scope: MountScope, label: impl Into<String>, transform: Box<dyn Transform>) -> Self {
        Self {
            scope,
            label: label.into(),
            transform,
        }
    }

    /// The directive this transform was compiled from.
    pub fn label(&self) -> &str {
        &self.label
    }
}

/// Applies scoped transforms to successful, uncompressed responses.
#[derive(Default)]
pub struct TransformStage {
    transforms: Vec<ScopedTransform>,
}

impl TransformStage {
    pub fn new(transforms: Vec<ScopedTransform>) -> Self {
        Self { transforms }
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    /// Labels in application order.
    pub fn labels(&self) -> Vec<&str> {
        self.transforms.iter().map(ScopedTransform::label).collect()
    }
}

fn rewritable(res: &Response) -> bool {
    let status = res.status();
    status.is_success()
        && status != StatusCode::NO_CONTENT
        && status != StatusCode::PARTIAL_CONTENT
        && res
            .headers()
            .get(header::CONTENT_ENCODING)
            .map_or(true, |v| v.as_bytes().eq_ignore_ascii_case(b"identity"))
}

async fn rewrite(res: Response, content_type: &str, selected: &[&ScopedTransform]) -> Result<Response, TransformError> {
    let (mut parts, body) = res.into_parts();
    let bytes = to_bytes(body, usize::MAX).await.map_err(TransformError::Body)?;

    let declared = charset::charset_param(content_type);
    let sniffed = match declared {
        Some(_) => None,
        None => charset::sniff(&bytes),
    };
    let encoding = charset::lookup(declared.or(sniffed.as_deref()));

    let mut text = charset::decode(&bytes, encoding);
    for scoped in selected {
        text = scoped.transform.apply(&text)?;
    }
    let (body, used) = charset::encode(&text, encoding);

    let relabeled = if used != encoding {
        Some(charset::with_charset(content_type, used.name()))
    } else {
        sniffed.map(|label| format!("{content_type}; charset={label}"))
    };
    if let Some(value) = relabeled.and_then(|ct| HeaderValue::from_str(&ct).ok()) {
        parts.headers.insert(header::CONTENT_TYPE, value);
    }
    parts.headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));
    parts.headers.insert(header::ETAG, weak_etag(&body));

    Ok(Response::from_parts(parts, Body::from(body)))
}

impl Handler for TransformStage {
    fn call<'a>(&'a self, req: Request<Body>, next: Next<'a>) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let in_scope: Vec<&ScopedTransform> = self.transforms.iter().filter(|t| t.scope.matches(&req)).collect();
            if in_scope.is_empty() {
                return next.run(req).await;
            }

            let res = next.run(req).await;
            if !rewritable(&res) {
                return res;
            }

            let content_type = res
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_owned();
            let selected: Vec<&ScopedTransform> = in_scope
                .into_iter()
                .filter(|t| t.transform.accepts(&content_type))
                .collect();
            if selected.is_empty() {
                return res;
            }

            match rewrite(res, &content_type, &selected).await {
                Ok(res) => res,
                Err(e) => {
                    tracing::error!(error = %e, content_type = %content_type, "Transform failed");
                    StatusCode::INTERNAL_SERVER_ERROR.into_response()
                }
            }
        })
    }

    fn name(&self) -> &str {
        "transform"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{handler_fn, BoxedHandler, Pipeline};
    use crate::routing::{PathPrefixMatcher, PathScope};
    use crate::transform::{FunctionTransform, SedTransform};
    use std::collections::HashMap;

    fn source(content_type: &'static str, body: &'static [u8]) -> BoxedHandler {
        Box::new(handler_fn(move |_req, _next| {
            Box::pin(async move { ([(header::CONTENT_TYPE, content_type)], body).into_response() })
        }))
    }

    fn sed(expr: &str) -> ScopedTransform {
        ScopedTransform::new(MountScope::root(), expr, Box::new(SedTransform::parse(expr).unwrap()))
    }

    async fn get(pipeline: &Pipeline, uri: &str) -> (Response, Vec<u8>) {
        let res = pipeline
            .handle(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await;
        let (parts, body) = res.into_parts();
        let bytes = to_bytes(body, usize::MAX).await.unwrap().to_vec();
        (Response::from_parts(parts, Body::empty()), bytes)
    }

    #[tokio::test]
    async fn test_declaration_order_is_application_order() {
        let stage = TransformStage::new(vec![sed("s/foo/bar/g"), sed("s/bar/buz/g")]);
        assert_eq!(stage.labels(), ["s/foo/bar/g", "s/bar/buz/g"]);
        let pipeline = Pipeline::new(vec![Box::new(stage), source("text/plain", b"foo:bar:buz")]);

        let (res, body) = get(&pipeline, "/").await;
        assert_eq!(body, b"buz:buz:buz");
        assert_eq!(res.headers()[header::CONTENT_LENGTH], "11");
        assert!(res.headers()[header::ETAG].to_str().unwrap().starts_with("W/\""));
    }

    #[tokio::test]
    async fn test_function_applies_by_content_type() {
        let html = FunctionTransform::compile("html(s => s.replace(/sample/,'FOO'))", &HashMap::new()).unwrap();
        let stage = TransformStage::new(vec![
            sed("s/Hello/Hi/"),
            ScopedTransform::new(MountScope::root(), "html", Box::new(html)),
        ]);

        let pipeline = Pipeline::new(vec![Box::new(stage), source("text/html", b"Hello, sample!")]);
        assert_eq!(get(&pipeline, "/").await.1, b"Hi, FOO!");

        let stage = TransformStage::new(vec![ScopedTransform::new(
            MountScope::root(),
            "html",
            Box::new(FunctionTransform::compile("html(s => s.replace(/sample/,'FOO'))", &HashMap::new()).unwrap()),
        )]);
        let pipeline = Pipeline::new(vec![Box::new(stage), source("text/css", b"Hello, sample!")]);
        assert_eq!(get(&pipeline, "/").await.1, b"Hello, sample!");
    }

    #[tokio::test]
    async fn test_scoped_transform_only_under_mount() {
        let scope = MountScope {
            host: None,
            path: PathScope::Prefix(PathPrefixMatcher::new("/mount/")),
        };
        let hello = ScopedTransform::new(scope, "s/Hello/Hi/", Box::new(SedTransform::parse("s/Hello/Hi/").unwrap()));
        let pipeline = Pipeline::new(vec![
            Box::new(TransformStage::new(vec![hello])),
            source("text/html", b"Hello"),
        ]);

        assert_eq!(get(&pipeline, "/mount/a.html").await.1, b"Hi");
        assert_eq!(get(&pipeline, "/a.html").await.1, b"Hello");
    }

    #[tokio::test]
    async fn test_sniffed_charset_round_trip() {
        // <?xml encoding="Shift_JIS"?> followed by "０１" in Shift_JIS
        static BODY: &[u8] = b"<?xml version=\"1.0\" encoding=\"Shift_JIS\"?><a>\x82\x4f\x82\x50</a>";
        let pipeline = Pipeline::new(vec![
            Box::new(TransformStage::new(vec![sed("s/０１/１０/")])),
            source("text/xml", BODY),
        ]);

        let (res, body) = get(&pipeline, "/").await;
        assert_eq!(res.headers()[header::CONTENT_TYPE], "text/xml; charset=Shift_JIS");
        assert!(body.ends_with(b"<a>\x82\x50\x82\x4f</a>"));
    }

    #[tokio::test]
    async fn test_utf16_body_is_relabeled_utf8() {
        static BODY: &[u8] = b"H\0e\0l\0l\0o\0";
        let pipeline = Pipeline::new(vec![
            Box::new(TransformStage::new(vec![sed("s/Hello/Hi/")])),
            source("text/plain; charset=utf-16le", BODY),
        ]);

        let (res, body) = get(&pipeline, "/").await;
        assert_eq!(body, b"Hi");
        assert_eq!(res.headers()[header::CONTENT_TYPE], "text/plain; charset=UTF-8");
    }

    #[tokio::test]
    async fn test_skips_binary_and_errors() {
        let pipeline = Pipeline::new(vec![
            Box::new(TransformStage::new(vec![sed("s/a/b/")])),
            source("image/png", b"aaa"),
        ]);
        let (res, body) = get(&pipeline, "/").await;
        assert_eq!(body, b"aaa");
        assert!(res.headers().get(header::ETAG).is_none());

        let failing: Box<dyn Fn(&str) -> Result<String, TransformError> + Send + Sync> = Box::new(|_| {
            Err(TransformError::Function {
                name: "boom".into(),
                message: "failed".into(),
            })
        });
        let mut registry: HashMap<String, crate::transform::TransformFn> = HashMap::new();
        registry.insert("boom".into(), failing.into());
        let boom = FunctionTransform::compile("text(boom)", &registry).unwrap();
        let pipeline = Pipeline::new(vec![
            Box::new(TransformStage::new(vec![ScopedTransform::new(MountScope::root(), "boom", Box::new(boom))])),
            source("text/plain", b"x"),
        ]);
        assert_eq!(get(&pipeline, "/").await.0.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
