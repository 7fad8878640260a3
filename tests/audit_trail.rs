mod common;

use std::collections::HashMap;
use std::time::Duration;

use axum::http::{Method, StatusCode};
use serde_json::{json, Value};

use common::{audit_records, create, request, send, spawn_app, spawn_app_with, start_server, test_config, ADMIN_KEY};
use reel_guard::audit::{AuditFilter, AuditOutcome, AuditRecord, ViolationKind};
use reel_guard::config::AuditSinkKind;
use reel_guard::lifecycle::drain_audit;
use reel_guard::security::{Identity, Operation};
use reel_guard::{AppState, Dependencies};

#[tokio::test]
async fn test_every_mutation_has_one_success_record() {
    let app = spawn_app();
    let created = send(
        &app.router,
        request(Method::POST, "/api/videos", Some("alice"), Some(&json!({ "title": "t" }))),
    )
    .await;
    let path = format!("/api/videos/{}", created.body["id"].as_str().unwrap());
    let updated = send(
        &app.router,
        request(Method::PATCH, &path, Some("alice"), Some(&json!({ "title": "t2" }))),
    )
    .await;
    let deleted = send(&app.router, request(Method::DELETE, &path, Some("alice"), None)).await;

    let records = audit_records(&app).await;
    for (response, operation) in [
        (&created, Operation::Create),
        (&updated, Operation::Update),
        (&deleted, Operation::Delete),
    ] {
        let matching: Vec<&AuditRecord> = records
            .iter()
            .filter(|r| r.correlation_id.to_string() == response.correlation_id())
            .collect();
        assert_eq!(matching.len(), 1, "{operation:?}");
        assert_eq!(matching[0].operation, operation);
        assert_eq!(matching[0].outcome, AuditOutcome::Success);
        assert_eq!(matching[0].identity, Some(Identity::new("alice")));
    }
    assert_eq!(records[1].detail["fields"], json!(["title"]));

    let sequences: Vec<u64> = records.iter().map(|r| r.sequence).collect();
    let mut sorted = sequences.clone();
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(sequences, sorted);
}

#[tokio::test]
async fn test_failing_audit_sink_does_not_fail_mutation() {
    let mut config = test_config();
    config.audit.base_delay_ms = 1;
    config.audit.max_delay_ms = 5;
    let app = spawn_app_with(config);
    app.sink.set_failing(true);

    let created = send(
        &app.router,
        request(Method::POST, "/api/videos", Some("alice"), Some(&json!({ "title": "kept" }))),
    )
    .await;

    assert_eq!(created.status, StatusCode::CREATED);
    let stored = app.videos.snapshot();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].title, "kept");
    assert_eq!(app.state.audit.failed_writes(), 1);
    assert!(app.sink.is_empty());
}

#[tokio::test]
async fn test_admin_audit_requires_key() {
    let app = spawn_app();

    let anonymous = send(&app.router, request(Method::GET, "/admin/audit", None, None)).await;
    assert_eq!(anonymous.status, StatusCode::UNAUTHORIZED);

    let mut wrong = request(Method::GET, "/admin/audit", None, None);
    wrong
        .headers_mut()
        .insert("authorization", "Bearer not-the-key".parse().unwrap());
    let wrong = send(&app.router, wrong).await;
    assert_eq!(wrong.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_admin_audit_filters_by_correlation_id() {
    let app = spawn_app();
    let video = create(&app, "/api/videos", "alice", json!({ "title": "t" })).await;
    let denied = send(
        &app.router,
        request(
            Method::GET,
            &format!("/api/videos/{}", video["id"].as_str().unwrap()),
            Some("bob"),
            None,
        ),
    )
    .await;
    assert_eq!(denied.status, StatusCode::NOT_FOUND);

    let mut query = request(
        Method::GET,
        &format!("/admin/audit?correlation_id={}", denied.correlation_id()),
        None,
        None,
    );
    query
        .headers_mut()
        .insert("authorization", format!("Bearer {ADMIN_KEY}").parse().unwrap());
    let response = send(&app.router, query).await;

    assert_eq!(response.status, StatusCode::OK);
    let rows = response.body.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["identity"], "bob");
    assert_eq!(rows[0]["outcome"]["violation"], "ACCESS_DENIED");
    assert_eq!(rows[0]["detail"]["cause"], "foreign_owner");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_foreign_updates_never_apply() {
    let app = spawn_app();
    let video = create(&app, "/api/videos", "alice", json!({ "title": "original" })).await;
    let path = format!("/api/videos/{}", video["id"].as_str().unwrap());

    let mut handles = Vec::new();
    for i in 0..20 {
        let router = app.router.clone();
        let path = path.clone();
        let (user, title) = if i % 2 == 0 {
            ("alice", format!("owner-{i}"))
        } else {
            ("mallory", "pwned".to_string())
        };
        handles.push(tokio::spawn(async move {
            let response = send(
                &router,
                request(Method::PATCH, &path, Some(user), Some(&json!({ "title": title }))),
            )
            .await;
            (user, response.status)
        }));
    }

    for handle in handles {
        let (user, status) = handle.await.unwrap();
        match user {
            "alice" => assert_eq!(status, StatusCode::OK),
            _ => assert_eq!(status, StatusCode::NOT_FOUND),
        }
    }

    let stored = app.videos.snapshot();
    assert_eq!(stored[0].owner, Identity::new("alice"));
    assert!(stored[0].title.starts_with("owner-"));

    let denials = audit_records(&app)
        .await
        .into_iter()
        .filter(|r| r.outcome == AuditOutcome::Violation(ViolationKind::AccessDenied))
        .count();
    assert_eq!(denials, 10);
}

#[tokio::test]
async fn test_audit_drained_to_file_on_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.jsonl");

    let mut config = test_config();
    config.audit.sink = AuditSinkKind::File;
    config.audit.path = path.to_string_lossy().into_owned();
    config.auth.sessions = HashMap::from([("tok-alice".to_string(), "alice".to_string())]);

    let deps = Dependencies::from_config(&config).await.unwrap();
    let (state, writer) = AppState::build(config, deps);
    let audit = state.audit.clone();
    let (addr, shutdown) = start_server(state).await;

    let client = reqwest::Client::new();
    let created: Value = client
        .post(format!("http://{addr}/api/videos"))
        .bearer_auth("tok-alice")
        .json(&json!({ "title": "over the wire" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(created["owner_id"], "alice");

    let anonymous = client
        .get(format!("http://{addr}/api/videos"))
        .send()
        .await
        .unwrap();
    assert_eq!(anonymous.status(), reqwest::StatusCode::UNAUTHORIZED);
    assert!(anonymous.headers().contains_key("x-correlation-id"));
    drop(anonymous);
    drop(client);

    shutdown.trigger();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(drain_audit(audit, writer, Duration::from_secs(5)).await);

    let reopened = reel_guard::audit::JsonLinesAuditSink::open(&path).await.unwrap();
    let records = reel_guard::audit::AuditSink::query(&reopened, &AuditFilter::new())
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].operation, Operation::Create);
    assert_eq!(records[0].resource_id.as_deref(), created["id"].as_str());
}
