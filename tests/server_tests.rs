use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::extract::ConnectInfo;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use self_scan_rs::config::{OverflowPolicy, QueueConfig};
use self_scan_rs::server::router;
use self_scan_rs::service::ScanService;
use self_scan_rs::store::{MemoryStore, ResultStore};
use serde_json::Value;
use tower::ServiceExt;

fn app(max_len: usize) -> (Router, ScanService, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let svc = ScanService::new(
        QueueConfig {
            max_len,
            overflow: OverflowPolicy::Reject,
        },
        store.clone(),
    );
    (router(svc.clone()), svc, store)
}

fn request(method: Method, uri: &str, peer: &str) -> Request<Body> {
    let mut req = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    let peer: SocketAddr = peer.parse().unwrap();
    req.extensions_mut().insert(ConnectInfo(peer));
    req
}

async fn body_string(resp: axum::response::Response) -> String {
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn status_does_not_admit() {
    let (app, svc, _) = app(8);
    let resp = app
        .oneshot(request(Method::GET, "/api/status", "192.0.2.1:5555"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let v: Value = serde_json::from_str(&body_string(resp).await).unwrap();
    assert_eq!(v["state"], "idle");
    assert_eq!(v["address"], "192.0.2.1");
    assert!(v["last_result"].is_null());
    assert!(svc.queue().is_empty());
}

#[tokio::test]
async fn scan_queues_caller_once() {
    let (app, svc, _) = app(8);
    for _ in 0..2 {
        let resp = app
            .clone()
            .oneshot(request(Method::POST, "/api/scan", "[::ffff:192.0.2.2]:4000"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        let v: Value = serde_json::from_str(&body_string(resp).await).unwrap();
        assert_eq!(v["state"], "queued");
        assert_eq!(v["position"], 1);
        assert_eq!(v["address"], "192.0.2.2");
    }
    assert_eq!(svc.queue().len(), 1);
}

#[tokio::test]
async fn scan_rejected_when_full() {
    let (app, _, _) = app(1);
    let first = app
        .clone()
        .oneshot(request(Method::POST, "/api/scan", "192.0.2.3:1"))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::ACCEPTED);
    let second = app
        .oneshot(request(Method::POST, "/api/scan", "192.0.2.4:1"))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn queue_lists_running_and_waiting() {
    let (app, svc, _) = app(8);
    svc.request("192.0.2.10", true).unwrap();
    svc.request("192.0.2.11", true).unwrap();
    svc.queue().try_dequeue().unwrap();

    let resp = app
        .oneshot(request(Method::GET, "/api/queue", "127.0.0.1:1"))
        .await
        .unwrap();
    let v: Value = serde_json::from_str(&body_string(resp).await).unwrap();
    assert_eq!(v["running"][0]["address"], "192.0.2.10");
    assert_eq!(v["queued"][0]["address"], "192.0.2.11");
    assert_eq!(v["queued"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn results_lookup() {
    let (app, _, store) = app(8);
    store.put("192.0.2.20", b"Scan finished at X\n\nNo ports open.").unwrap();

    let ok = app
        .clone()
        .oneshot(request(Method::GET, "/api/results/192.0.2.20", "127.0.0.1:1"))
        .await
        .unwrap();
    assert_eq!(ok.status(), StatusCode::OK);
    assert!(body_string(ok).await.ends_with("No ports open."));

    let missing = app
        .clone()
        .oneshot(request(Method::GET, "/api/results/192.0.2.21", "127.0.0.1:1"))
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    let bad = app
        .oneshot(request(Method::GET, "/api/results/nope", "127.0.0.1:1"))
        .await
        .unwrap();
    assert_eq!(bad.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn delete_and_list() {
    let (app, _, store) = app(8);
    store.put("192.0.2.30", b"r").unwrap();
    store.put("192.0.2.31", b"r").unwrap();

    let resp = app
        .clone()
        .oneshot(request(Method::DELETE, "/api/results", "192.0.2.30:9"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let again = app
        .clone()
        .oneshot(request(Method::DELETE, "/api/results", "192.0.2.30:9"))
        .await
        .unwrap();
    assert_eq!(again.status(), StatusCode::NOT_FOUND);

    let list = app
        .oneshot(request(Method::GET, "/api/list", "127.0.0.1:1"))
        .await
        .unwrap();
    let v: Value = serde_json::from_str(&body_string(list).await).unwrap();
    assert_eq!(v, serde_json::json!(["192.0.2.31"]));
}

#[tokio::test]
async fn status_includes_last_result() {
    let (app, _, store) = app(8);
    store.put("192.0.2.40", b"previous report").unwrap();
    let resp = app
        .oneshot(request(Method::GET, "/api/status", "192.0.2.40:80"))
        .await
        .unwrap();
    let v: Value = serde_json::from_str(&body_string(resp).await).unwrap();
    assert_eq!(v["last_result"], "previous report");
    assert_eq!(v["stats"]["completed_scans"], 0);
}

#[tokio::test]
async fn help_lists_every_route() {
    let (app, _, _) = app(8);
    let resp = app
        .oneshot(request(Method::GET, "/api/help", "192.0.2.40:1234"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let v: Value = serde_json::from_str(&body_string(resp).await).unwrap();
    let routes = v.as_array().unwrap();
    let paths: Vec<&str> = routes.iter().map(|r| r["path"].as_str().unwrap()).collect();
    for path in ["/api/help", "/api/status", "/api/scan", "/api/queue", "/api/list", "/api/results"] {
        assert!(paths.contains(&path), "{path} missing from help");
    }
    assert!(routes
        .iter()
        .any(|r| r["method"] == "POST" && r["path"] == "/api/scan"));
}
