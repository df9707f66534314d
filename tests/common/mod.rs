//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::body::{to_bytes, Body};
use axum::extract::{Path, Query};
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing;
use axum::Router;
use tokio::net::TcpListener;
use tower::ServiceExt;
use tower_http::services::ServeDir;

use overlay_server::observability::SharedSink;
use overlay_server::{Overlay, OverlayConfig};

/// Fixture document root.
pub fn htdocs() -> String {
    concat!(env!("CARGO_MANIFEST_DIR"), "/tests/htdocs").to_string()
}

pub fn config(layers: &[&str]) -> OverlayConfig {
    OverlayConfig {
        layers: layers.iter().map(|l| l.to_string()).collect(),
        ..Default::default()
    }
}

/// Sink that keeps every line.
pub fn capture() -> (SharedSink, Arc<Mutex<Vec<String>>>) {
    let lines = Arc::new(Mutex::new(Vec::new()));
    let captured = lines.clone();
    let sink: SharedSink = Arc::new(move |m: &str| captured.lock().unwrap().push(m.to_owned()));
    (sink, lines)
}

/// Sink that drops every line.
pub fn quiet() -> SharedSink {
    Arc::new(|_: &str| {})
}

/// Build the served router for `config`, logging nowhere.
pub fn router(config: OverlayConfig) -> Router {
    Overlay::builder(config).logger(quiet()).build().unwrap().into_router()
}

pub fn overlay(layers: &[&str]) -> Router {
    router(config(layers))
}

/// A buffered response.
pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl Reply {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn header(&self, name: header::HeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

pub async fn send(router: &Router, req: Request<Body>) -> Reply {
    let res: Response = router.clone().oneshot(req).await.unwrap();
    let (parts, body) = res.into_parts();
    let body = to_bytes(body, usize::MAX).await.unwrap().to_vec();
    Reply {
        status: parts.status,
        headers: parts.headers,
        body,
    }
}

pub async fn get(router: &Router, path: &str) -> Reply {
    send(router, Request::get(path).body(Body::empty()).unwrap()).await
}

pub async fn get_host(router: &Router, host: &str, path: &str) -> Reply {
    let req = Request::get(path).header(header::HOST, host).body(Body::empty()).unwrap();
    send(router, req).await
}

/// Start a mock upstream on an ephemeral port.
///
/// - static files from the fixture document root
/// - `/status/{code}` answers `code` with an empty body
/// - `/redirect/?path=<p>` answers `302` to `http://<addr><p>`
pub async fn spawn_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let base = format!("http://{addr}");

    let app = Router::new()
        .route("/status/{code}", routing::get(status))
        .route(
            "/redirect/",
            routing::get(move |Query(query): Query<HashMap<String, String>>| {
                let location = format!("{base}{}", query.get("path").map(String::as_str).unwrap_or("/"));
                async move { (StatusCode::FOUND, [(header::LOCATION, location)]).into_response() }
            }),
        )
        .route(
            "/echo/",
            routing::get(|headers: HeaderMap| async move {
                let auth = headers.get(header::AUTHORIZATION).is_some();
                format!("authorization={auth}")
            }),
        )
        .fallback_service(ServeDir::new(htdocs()));

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn status(Path(code): Path<u16>) -> Response {
    StatusCode::from_u16(code)
        .unwrap_or(StatusCode::BAD_REQUEST)
        .into_response()
}
