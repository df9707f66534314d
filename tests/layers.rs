//! End-to-end tests for local layers, transforms and cross-cutting stages.

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};

use overlay_server::transform::JsonIndent;
use overlay_server::Overlay;

mod common;
use common::{capture, config, get, get_host, htdocs, overlay, router, send};

#[tokio::test]
async fn test_transforms_by_content_type() {
    let root = htdocs();
    let app = overlay(&[
        "# basic",
        "",
        "s/Hello/Hi/",
        "html( s => s.replace(/sample/,'FOO') )",
        "css( s => s.replace(/sample/,'BAR') )",
        &root,
    ]);

    let html = get(&app, "/sample.html").await;
    assert_eq!(html.status, StatusCode::OK);
    assert!(html.header(header::CONTENT_TYPE).unwrap().contains("html"));
    assert!(html.text().contains("Hi, weboverlay!"));
    assert!(html.text().contains("FOO"));
    assert!(!html.text().contains("BAR"));

    let css = get(&app, "/sample.css").await;
    assert_eq!(css.status, StatusCode::OK);
    assert!(css.header(header::CONTENT_TYPE).unwrap().contains("css"));
    assert!(css.text().contains("Hi, weboverlay!"));
    assert!(css.text().contains("BAR"));
    assert!(!css.text().contains("FOO"));

    assert_eq!(get(&app, "/not-found.html").await.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_transforms_apply_in_declared_order() {
    let root = htdocs();
    let app = overlay(&["# order", "s/foo/bar/g", "s/bar/buz/g", &root]);

    let res = get(&app, "/sample.html").await;
    assert!(res.text().contains("buz:buz:buz"), "{}", res.text());
}

#[tokio::test]
async fn test_mount() {
    let mut config = config(&[
        "# mount",
        "/mount/ = s/Hello/Hi/",
        "/forbidden/ = 403",
        "/error/ = 500",
        &format!("/mount/ = {}", htdocs()),
    ]);
    config.index = true;
    let app = router(config);

    let res = get(&app, "/mount/sample.html").await;
    assert_eq!(res.status, StatusCode::OK);
    assert!(res.text().contains("Hi, weboverlay!"));

    assert_eq!(get(&app, "/sample.html").await.status, StatusCode::NOT_FOUND);
    assert_eq!(get(&app, "/forbidden/").await.status, StatusCode::FORBIDDEN);
    assert_eq!(get(&app, "/error/").await.status, StatusCode::INTERNAL_SERVER_ERROR);

    let listing = get(&app, "/mount/").await;
    assert_eq!(listing.status, StatusCode::OK);
    assert!(listing.text().contains(r#"<a href="/mount/sample.html""#), "{}", listing.text());

    // a directory with index.html is served, not listed
    let sub = get(&app, "/mount/sub/").await;
    assert_eq!(sub.text(), "<p>index of sub</p>\n");
}

#[tokio::test]
async fn test_stub_shadows_existing_file() {
    let root = htdocs();
    let app = overlay(&["/sample.html = 403", &root]);
    assert_eq!(get(&app, "/sample.html").await.status, StatusCode::FORBIDDEN);
    assert_eq!(get(&app, "/sample.css").await.status, StatusCode::OK);
}

#[tokio::test]
async fn test_regexp_mounts() {
    let root = htdocs();
    let tests = format!("{}/tests", env!("CARGO_MANIFEST_DIR"));
    let app = overlay(&[
        "# regexp",
        &format!(r"^/[^/]+\.css$ = {root}"),
        r"^/[^/]+\.map$ = 403",
        &format!(r"^/htdocs/[^/]+\.html$ = {tests}"),
        r"^/htdocs/[^/]+\.map$ = 403",
    ]);

    assert_eq!(get(&app, "/sample.css").await.status, StatusCode::OK);
    assert_eq!(get(&app, "/sample.css?_=1620173947").await.status, StatusCode::OK);
    assert_eq!(get(&app, "/sample.html").await.status, StatusCode::NOT_FOUND);
    assert_eq!(get(&app, "/sample.css.map").await.status, StatusCode::FORBIDDEN);

    assert_eq!(get(&app, "/htdocs/sample.css").await.status, StatusCode::NOT_FOUND);
    assert_eq!(get(&app, "/htdocs/sample.html").await.status, StatusCode::OK);
    assert_eq!(get(&app, "/htdocs/sample.html?_=1620173947").await.status, StatusCode::OK);
    assert_eq!(get(&app, "/htdocs/sample.css.map").await.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_inline_middleware() {
    let app = overlay(&[
        "# middleware",
        r#"/ok/ = (req, res, next) => res.send("OK")"#,
        "(req, res, next) => res.send({path: req.path})",
    ]);

    for path in ["/ok/", "/ok/xxx"] {
        let res = get(&app, path).await;
        assert_eq!(res.status, StatusCode::OK);
        assert_eq!(res.text(), "OK");
    }

    for path in ["/", "/xxx"] {
        let res = get(&app, path).await;
        assert_eq!(res.status, StatusCode::OK);
        let body: serde_json::Value = serde_json::from_slice(&res.body).unwrap();
        assert_eq!(body, serde_json::json!({ "path": path }));
    }
}

#[tokio::test]
async fn test_virtual_hosts() {
    let root = htdocs();
    for host in ["example", "*"] {
        let app = overlay(&[
            "# virtual-hosts",
            &format!("//{host}.net/sample/ = s/Hello/Hi/"),
            &format!("//{host}.net/sample/ = {root}"),
            &format!("//{host}.com/sample/ = {root}"),
            &format!("//{host}.org/sample/ = 404"),
            &format!("//{host}.org:3000/sample/ = 400"),
            "/sample/ = 403",
        ]);
        let path = "/sample/sample.html";

        let original = get_host(&app, "example.com", path).await;
        assert_eq!(original.status, StatusCode::OK);
        assert!(original.text().contains("Hello, weboverlay!"));

        let transformed = get_host(&app, "example.net", path).await;
        assert_eq!(transformed.status, StatusCode::OK);
        assert!(transformed.text().contains("Hi, weboverlay!"));

        assert_eq!(get_host(&app, "example.org:3000", path).await.status, StatusCode::BAD_REQUEST);
        assert_eq!(get_host(&app, "example.org", path).await.status, StatusCode::NOT_FOUND);
        assert_eq!(get(&app, path).await.status, StatusCode::FORBIDDEN);
    }
}

#[tokio::test]
async fn test_xml_charsets() {
    let root = htdocs();
    let app = overlay(&["# xml-charset", "s/０１２３４５６７８９/９８７６５４３２１０/", &root]);

    for (path, label) in [
        ("/charset/utf-8/utf-8.xml", "UTF-8"),
        ("/charset/shift_jis/shift_jis.xml", "Shift_JIS"),
        ("/charset/euc-jp/euc-jp.xml", "EUC-JP"),
    ] {
        let res = get(&app, path).await;
        assert_eq!(res.status, StatusCode::OK);

        let content_type = res.header(header::CONTENT_TYPE).unwrap();
        assert!(content_type.ends_with(&format!("charset={label}")), "{content_type}");

        let encoding = encoding_rs::Encoding::for_label(label.as_bytes()).unwrap();
        let (text, _, malformed) = encoding.decode(&res.body);
        assert!(!malformed);
        assert!(text.contains("９８７６５４３２１０"), "{text}");
    }
}

#[tokio::test]
async fn test_json_indent() {
    let source: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(format!("{}/sample.json", htdocs())).unwrap()).unwrap();

    for (indent, spacer) in [
        (JsonIndent::Width(2), "  "),
        (JsonIndent::Text("   ".into()), "   "),
        (JsonIndent::Width(4), "    "),
        (JsonIndent::Text("\t".into()), "\t"),
    ] {
        let mut config = config(&["# json", &htdocs()]);
        config.json = Some(indent);
        let res = get(&router(config), "/sample.json").await;
        assert_eq!(res.status, StatusCode::OK);

        let body = res.text();
        let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed, source);
        assert!(body.contains(&format!("\"FOO\",\n{spacer}\"bar\"")), "{body:?}");
    }
}

#[tokio::test]
async fn test_etag_revalidation() {
    let root = htdocs();
    let app = overlay(&["# etag", "s/foo/FOO/", &root]);

    let first = get(&app, "/sample.html").await;
    assert!(first.text().contains("FOO:bar:buz"));
    let etag = first.header(header::ETAG).unwrap().to_owned();
    assert!(etag.starts_with("W/"), "{etag}");

    let unmatched = send(
        &app,
        Request::get("/sample.html").header(header::IF_NONE_MATCH, "W/xxxx").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(unmatched.status, StatusCode::OK);
    assert!(unmatched.text().contains("FOO:bar:buz"));
    assert_eq!(unmatched.header(header::ETAG), Some(etag.as_str()));

    let matched = send(
        &app,
        Request::get("/sample.html").header(header::IF_NONE_MATCH, &etag).body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(matched.status, StatusCode::NOT_MODIFIED);
    assert_eq!(matched.header(header::ETAG), Some(etag.as_str()));
    assert!(matched.body.is_empty());
}

#[tokio::test]
async fn test_basic_auth() {
    let mut config = config(&["# auth", &htdocs()]);
    config.basic = vec!["test1:first".to_string(), "dGVzdDI6c2Vjb25k".to_string()].into();
    let app = router(config);

    let denied = get(&app, "/sample.html").await;
    assert_eq!(denied.status, StatusCode::UNAUTHORIZED);
    assert!(denied.header(header::WWW_AUTHENTICATE).unwrap().starts_with("Basic realm="));

    for token in ["basic dGVzdDE6Zmlyc3Q=", "basic dGVzdDI6c2Vjb25k"] {
        let req = Request::get("/sample.html")
            .header(header::AUTHORIZATION, token)
            .body(Body::empty())
            .unwrap();
        assert_eq!(send(&app, req).await.status, StatusCode::OK);
    }
}

#[tokio::test]
async fn test_head_keeps_headers_and_drops_body() {
    let root = htdocs();
    let app = overlay(&["s/Hello/Hi/", &root]);

    let req = Request::builder()
        .method(Method::HEAD)
        .uri("/sample.html")
        .body(Body::empty())
        .unwrap();
    let res = send(&app, req).await;
    assert_eq!(res.status, StatusCode::OK);
    assert!(res.header(header::CONTENT_TYPE).unwrap().contains("html"));
    assert!(res.body.is_empty());
}

#[tokio::test]
async fn test_forced_compression() {
    let mut config = config(&[&htdocs()]);
    config.compress = Some("gzip".into());
    let app = router(config);

    // no Accept-Encoding from the client, gzip anyway
    let res = get(&app, "/sample.html").await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.header(header::CONTENT_ENCODING), Some("gzip"));
}

#[tokio::test]
async fn test_access_log_formats() {
    let (sink, lines) = capture();
    let app = Overlay::builder(config(&["/ = 200"])).logger(sink).build().unwrap().into_router();
    assert_eq!(get(&app, "/").await.status, StatusCode::OK);
    let last = lines.lock().unwrap().last().cloned().unwrap();
    assert!(last.starts_with("GET / 200 "), "{last}");

    let (sink, lines) = capture();
    let mut combined = config(&["/ = 200"]);
    combined.log = Some("combined".into());
    let app = Overlay::builder(combined).logger(sink).build().unwrap().into_router();
    assert_eq!(get(&app, "/").await.status, StatusCode::OK);
    let last = lines.lock().unwrap().last().cloned().unwrap();
    assert!(last.contains(r#" "GET / HTTP/1.1" 200 "#), "{last}");
}

#[tokio::test]
async fn test_logfile_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let logfile = dir.path().join("overlay.log");
    let backup = dir.path().join("overlay.log~");

    let mut config = config(&["/ = 200"]);
    config.logfile = Some(logfile.clone());
    let overlay = Overlay::builder(config).build().unwrap();
    let logger = overlay.logger();
    let app = overlay.into_router();

    assert_eq!(get(&app, "/?no=1").await.status, StatusCode::OK);
    std::fs::rename(&logfile, &backup).unwrap();
    logger.reopen().unwrap();
    assert_eq!(get(&app, "/?no=2").await.status, StatusCode::OK);

    let is_get = |line: &&str| line.starts_with("GET ");
    let old = std::fs::read_to_string(&backup).unwrap();
    assert!(old.lines().filter(is_get).last().unwrap().starts_with("GET /?no=1 "));
    let new = std::fs::read_to_string(&logfile).unwrap();
    assert!(new.lines().filter(is_get).last().unwrap().starts_with("GET /?no=2 "));
}
