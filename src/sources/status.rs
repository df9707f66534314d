//! Fixed status responses, e.g. `/private/ = 403`.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::future::BoxFuture;

use crate::pipeline::{Handler, Next};

#[derive(Debug, Clone, Copy)]
pub struct StatusStub {
    status: StatusCode,
}

impl StatusStub {
    pub fn new(status: StatusCode) -> Self {
        Self { status }
    }

    /// Parse a three digit status code.
    pub fn parse(code: &str) -> Option<Self> {
        let code: u16 = code.trim().parse().ok()?;
        StatusCode::from_u16(code).ok().map(Self::new)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl Handler for StatusStub {
    fn call<'a>(&'a self, _req: Request<Body>, _next: Next<'a>) -> BoxFuture<'a, Response> {
        let status = self.status;
        Box::pin(async move { (status, Body::empty()).into_response() })
    }

    fn name(&self) -> &str {
        "status"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Pipeline;
    use axum::body::to_bytes;

    #[test]
    fn test_parse() {
        assert_eq!(StatusStub::parse("403").unwrap().status(), StatusCode::FORBIDDEN);
        assert!(StatusStub::parse("4o4").is_none());
        assert!(StatusStub::parse("99").is_none());
    }

    #[tokio::test]
    async fn test_empty_body() {
        let pipeline = Pipeline::new(vec![Box::new(StatusStub::new(StatusCode::INTERNAL_SERVER_ERROR))]);
        let res = pipeline.handle(Request::new(Body::empty())).await;
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(to_bytes(res.into_body(), usize::MAX).await.unwrap().is_empty());
    }
}
