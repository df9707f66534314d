//! Remote layers against a mock upstream.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};

use overlay_server::Overlay;

mod common;
use common::{capture, config, get, htdocs, overlay, router, send, spawn_upstream};

#[tokio::test]
async fn test_upstream_on_root() {
    let addr = spawn_upstream().await;
    let app = overlay(&[&format!("/ = http://{addr}/")]);

    let res = get(&app, "/sample.html").await;
    assert_eq!(res.status, StatusCode::OK);
    assert!(res.text().contains("Hello, weboverlay!"));

    assert_eq!(get(&app, "/status/204").await.status, StatusCode::NO_CONTENT);

    let res = get(&app, "/redirect/?path=/status/204").await;
    assert_eq!(res.status, StatusCode::FOUND);
    assert_eq!(res.header(header::LOCATION), Some("/status/204"));
}

#[tokio::test]
async fn test_upstream_on_directory() {
    let addr = spawn_upstream().await;
    let (sink, lines) = capture();
    let config = config(&[
        &format!("/stat/ = http://{addr}/status/"),
        &format!("/redir/ = http://{addr}/redirect/"),
    ]);
    let app = Overlay::builder(config).logger(sink).build().unwrap().into_router();

    assert_eq!(get(&app, "/sample.html").await.status, StatusCode::NOT_FOUND);
    assert_eq!(get(&app, "/stat/204").await.status, StatusCode::NO_CONTENT);

    let res = get(&app, "/redir/?path=/stat/204").await;
    assert_eq!(res.status, StatusCode::FOUND);
    assert_eq!(res.header(header::LOCATION), Some("/stat/204"));
    assert!(lines.lock().unwrap().iter().any(|l| l == "location: /stat/204"));
}

#[tokio::test]
async fn test_local_shadows_upstream() {
    let addr = spawn_upstream().await;
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("sample.html"), "local copy").unwrap();

    let local = dir.path().to_string_lossy().into_owned();
    let app = overlay(&[&local, &format!("http://{addr}/")]);

    assert_eq!(get(&app, "/sample.html").await.text(), "local copy");
    let css = get(&app, "/sample.css").await;
    assert_eq!(css.status, StatusCode::OK);
    assert!(css.text().contains("Hello, weboverlay!"));
}

#[tokio::test]
async fn test_upstream_not_found_falls_through() {
    let addr = spawn_upstream().await;
    let app = overlay(&[&format!("http://{addr}/"), "/ = 418"]);

    assert_eq!(get(&app, "/sample.html").await.status, StatusCode::OK);
    assert_eq!(get(&app, "/not-found.html").await.status, StatusCode::IM_A_TEAPOT);
}

#[tokio::test]
async fn test_transform_upstream_body() {
    let addr = spawn_upstream().await;
    let app = overlay(&["s/Hello/Hi/", &format!("http://{addr}/")]);

    let res = get(&app, "/sample.html").await;
    assert_eq!(res.status, StatusCode::OK);
    assert!(res.text().contains("Hi, weboverlay!"));
    assert!(res.header(header::ETAG).unwrap().starts_with("W/"));
}

#[tokio::test]
async fn test_cache_tee() {
    let addr = spawn_upstream().await;
    let cache = tempfile::tempdir().unwrap();
    let cache_dir = cache.path().to_string_lossy().into_owned();

    let (sink, lines) = capture();
    let mut config = config(&[&format!("http://{addr}/"), &format!("/more/ = http://{addr}/")]);
    config.cache = Some(cache_dir.clone());
    let overlay = Overlay::builder(config).logger(sink).build().unwrap();
    assert_eq!(
        overlay.pipeline().stage_names(),
        ["etag", "head", "local", "cache", "decompress", "upstream", "upstream"]
    );
    let app = overlay.into_router();

    let res = get(&app, "/sample.html").await;
    assert_eq!(res.status, StatusCode::OK);

    let stored = std::fs::read(cache.path().join("sample.html")).unwrap();
    let original = std::fs::read(format!("{}/sample.html", htdocs())).unwrap();
    assert_eq!(stored, original);

    // not-found and non-200 responses are not stored
    assert_eq!(get(&app, "/status/204").await.status, StatusCode::NO_CONTENT);
    assert!(!cache.path().join("status").join("204").exists());

    let lines = lines.lock().unwrap();
    assert_eq!(lines.iter().filter(|l| l.starts_with("cache: ")).count(), 1);
    assert!(lines.contains(&format!("cache: {cache_dir}")));

    // the same cache in front of an upstream that is gone
    let mut offline = common::config(&[&format!("http://{}/", closed_addr())]);
    offline.cache = Some(cache_dir);
    let app = router(offline);
    let res = get(&app, "/sample.html").await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body, original);
    assert_eq!(get(&app, "/sample.css").await.status, StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_cache_concurrent_fetches() {
    let addr = spawn_upstream().await;
    let cache = tempfile::tempdir().unwrap();
    let mut config = config(&[&format!("http://{addr}/")]);
    config.cache = Some(cache.path().to_string_lossy().into_owned());
    let app = router(config);

    let replies = futures_util::future::join_all((0..16).map(|_| get(&app, "/sample.html"))).await;
    assert!(replies.iter().all(|r| r.status == StatusCode::OK));

    let entries: Vec<String> = std::fs::read_dir(cache.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(entries, ["sample.html"]);
    let original = std::fs::read(format!("{}/sample.html", htdocs())).unwrap();
    assert_eq!(std::fs::read(cache.path().join("sample.html")).unwrap(), original);
}

/// An address nothing listens on.
fn closed_addr() -> std::net::SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

#[tokio::test]
async fn test_unreachable_upstream() {
    let app = overlay(&[&format!("http://{}/", closed_addr())]);
    assert_eq!(get(&app, "/sample.html").await.status, StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_authorization_is_not_forwarded() {
    let addr = spawn_upstream().await;
    let mut config = config(&[&format!("http://{addr}/")]);
    config.basic = vec!["user:pass".to_string()].into();
    let app = router(config);

    let req = Request::get("/echo/")
        .header(header::AUTHORIZATION, "Basic dXNlcjpwYXNz")
        .body(Body::empty())
        .unwrap();
    let res = send(&app, req).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.text(), "authorization=false");
}
