//! Integration tests for the UI routes: SPA fallback, base path handling
//! and the cache headers of the entry document.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Request, StatusCode};
use std::sync::Arc;
use timeseriesui::config::Config;
use timeseriesui::static_files::{EmbeddedUi, MemoryAssets};
use timeseriesui::{AppContext, Router};

const INDEX_HTML: &str = "<!doctype html><html><head><title>TimeseriesUI</title></head><body><div id=\"root\"></div></body></html>";

fn router(base_path: &str) -> Router {
    let assets = MemoryAssets::new()
        .with_file("index.html", INDEX_HTML)
        .with_file("assets/index.css", "body { margin: 0; }");
    let config = Config {
        base_path: base_path.to_string(),
        ..Config::default()
    };
    Router::new(AppContext::new(config, Arc::new(assets)).unwrap()).unwrap()
}

fn get(uri: &str) -> Request<Full<Bytes>> {
    Request::builder().uri(uri).body(Full::new(Bytes::new())).unwrap()
}

#[tokio::test]
async fn test_unknown_ui_path_serves_entry_document() {
    let response = router("").handle(get("/ui/does-not-exist")).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["cache-control"], "no-cache");
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(body, INDEX_HTML.as_bytes());
}

#[tokio::test]
async fn test_assets_are_cacheable() {
    let response = router("").handle(get("/ui/assets/index.css")).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["cache-control"], "public, max-age=3600");
    assert_eq!(response.headers()["content-type"], "text/css; charset=utf-8");
}

#[tokio::test]
async fn test_base_path_prefix_and_injection() {
    let r = router("/tsui");

    let response = r.handle(get("/tsui/ui/dashboards")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let html = String::from_utf8(body.to_vec()).unwrap();
    assert!(html.contains("window.__TSUI_BASE__=\"/tsui\""));

    let response = r.handle(get("/ui/dashboards")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_root_redirects_to_ui() {
    let response = router("").handle(get("/")).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()["location"], "/ui/");
}

#[tokio::test]
async fn test_embedded_bundle_serves_fallback() {
    let context = AppContext::new(Config::default(), Arc::new(EmbeddedUi)).unwrap();
    let response = Router::new(context).unwrap().handle(get("/ui/does-not-exist")).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "text/html; charset=utf-8");
}
