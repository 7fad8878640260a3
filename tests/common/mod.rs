//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{HeaderMap, Method, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower::ServiceExt;

use reel_guard::audit::{AuditSink, MemoryAuditSink};
use reel_guard::config::{AppConfig, WindowConfig};
use reel_guard::http::build_router;
use reel_guard::security::webhook::{sign, SIGNATURE_HEADER, TIMESTAMP_HEADER};
use reel_guard::security::{InMemoryWindowStore, ManualClock, TrustedHeaderResolver};
use reel_guard::store::{InMemoryStore, ProcessingJob, StoreRegistry, Upload, Video};
use reel_guard::{AppState, Dependencies, HttpServer, Shutdown};

pub const NOW_MS: u64 = 1_700_000_000_000;
pub const WEBHOOK_SECRET: &str = "whsec_integration_0123456789";
pub const ADMIN_KEY: &str = "integration-admin-key-0123456789";

pub struct TestApp {
    pub state: AppState,
    pub router: Router,
    pub clock: Arc<ManualClock>,
    pub sink: MemoryAuditSink,
    pub videos: Arc<InMemoryStore<Video>>,
    pub uploads: Arc<InMemoryStore<Upload>>,
    pub jobs: Arc<InMemoryStore<ProcessingJob>>,
    pub writer: JoinHandle<()>,
}

impl TestApp {
    /// Waits until every record enqueued so far is in the sink.
    pub async fn flush_audit(&self) {
        self.state.audit.flush().await;
    }
}

/// Webhook and admin enabled; a generous default window so fixtures do
/// not trip the limiter, stock strict and webhook windows.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.rate_limit.default = WindowConfig {
        window_ms: 60_000,
        max_requests: 1_000,
    };
    config.webhook.enabled = true;
    config.webhook.secret = WEBHOOK_SECRET.to_string();
    config.admin.enabled = true;
    config.admin.api_key = ADMIN_KEY.to_string();
    config
}

pub fn spawn_app() -> TestApp {
    spawn_app_with(test_config())
}

pub fn spawn_app_with(config: AppConfig) -> TestApp {
    spawn_app_with_sink(config, MemoryAuditSink::new())
}

fn spawn_app_with_sink(config: AppConfig, sink: MemoryAuditSink) -> TestApp {
    let clock = Arc::new(ManualClock::new(NOW_MS));
    let videos = Arc::new(InMemoryStore::<Video>::new());
    let uploads = Arc::new(InMemoryStore::<Upload>::new());
    let jobs = Arc::new(InMemoryStore::<ProcessingJob>::new());

    let deps = Dependencies {
        resolver: Arc::new(TrustedHeaderResolver::new(config.auth.identity_header.clone())),
        registry: StoreRegistry {
            videos: videos.clone(),
            uploads: uploads.clone(),
            jobs: jobs.clone(),
        },
        audit_sink: Arc::new(sink.clone()),
        window_store: Arc::new(InMemoryWindowStore::new()),
        clock: clock.clone(),
    };
    let (state, writer) = AppState::build(config, deps);
    let router = build_router(state.clone());

    TestApp {
        state,
        router,
        clock,
        sink,
        videos,
        uploads,
        jobs,
        writer,
    }
}

/// Builds a JSON request, optionally authenticated as `user`.
pub fn request(method: Method, uri: &str, user: Option<&str>, body: Option<&Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        builder = builder.header("x-user-id", user);
    }
    let body = match body {
        Some(value) => {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(value).unwrap())
        }
        None => Body::empty(),
    };
    builder.body(body).unwrap()
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl TestResponse {
    pub fn correlation_id(&self) -> String {
        self.headers["x-correlation-id"].to_str().unwrap().to_string()
    }
}

pub async fn send(router: &Router, request: Request<Body>) -> TestResponse {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    TestResponse { status, headers, body }
}

/// Creates a record through the API and returns its JSON.
pub async fn create(app: &TestApp, path: &str, user: &str, draft: Value) -> Value {
    let response = send(&app.router, request(Method::POST, path, Some(user), Some(&draft))).await;
    assert_eq!(response.status, StatusCode::CREATED, "create failed: {:?}", response.body);
    response.body
}

/// Callback request signed at `timestamp_secs`.
pub fn signed_callback(body: &Value, timestamp_secs: u64) -> Request<Body> {
    let bytes = serde_json::to_vec(body).unwrap();
    let signature = sign(WEBHOOK_SECRET.as_bytes(), timestamp_secs, &bytes).unwrap();
    Request::builder()
        .method(Method::POST)
        .uri("/webhooks/transcode")
        .header("content-type", "application/json")
        .header(TIMESTAMP_HEADER, timestamp_secs.to_string())
        .header(SIGNATURE_HEADER, signature)
        .body(Body::from(bytes))
        .unwrap()
}

/// Serves `state` on an ephemeral port.
pub async fn start_server(state: AppState) -> (SocketAddr, Shutdown) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let server = HttpServer::new(state);
    let rx = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, rx).await;
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    (addr, shutdown)
}

/// Audit records currently in the sink.
pub async fn audit_records(app: &TestApp) -> Vec<reel_guard::audit::AuditRecord> {
    app.flush_audit().await;
    app.sink
        .query(&reel_guard::audit::AuditFilter::new())
        .await
        .unwrap()
}
