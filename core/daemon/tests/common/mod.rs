//! Common test utilities.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use formtrace_daemon::ingest::{Ingestor, PastePolicy};
use formtrace_daemon::report::ChangeFeed;
use formtrace_daemon::server::{build_app, AppState};
use formtrace_daemon::store::SessionStore;

pub struct TestDaemon {
    pub app: Router,
    pub ingest: Arc<Ingestor>,
}

pub fn test_daemon(policy: PastePolicy, client_dir: &Path) -> TestDaemon {
    let ingest = Arc::new(Ingestor::new(
        Arc::new(SessionStore::new()),
        ChangeFeed::new(64),
        policy,
    ));
    let app = build_app(
        AppState {
            ingest: Arc::clone(&ingest),
        },
        client_dir,
    );
    TestDaemon { app, ingest }
}

pub async fn post_json(app: &Router, path: &str, body: Value) -> (StatusCode, Value) {
    post_raw(app, path, body.to_string()).await
}

pub async fn post_raw(app: &Router, path: &str, body: impl Into<Body>) -> (StatusCode, Value) {
    let request = Request::post(path)
        .header("content-type", "application/json")
        .body(body.into())
        .unwrap();
    send(app, request).await
}

pub async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
    send(app, Request::get(uri).body(Body::empty()).unwrap()).await
}

pub async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

pub async fn get_text(app: &Router, uri: &str) -> (StatusCode, String) {
    let response = app
        .clone()
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8_lossy(&body).into_owned())
}
