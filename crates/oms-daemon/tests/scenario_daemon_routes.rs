//! Router-level scenarios via `tower::ServiceExt::oneshot` — no network,
//! no database connection needed for the fail-closed paths (the pool is
//! lazy and health never touches it).

use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use oms_daemon::{routes::build_router, state::AppState};

fn test_state(dev_anon: bool) -> Arc<AppState> {
    // connect_lazy never dials; handlers that skip the pool stay testable
    // without Postgres.
    let pool = sqlx::postgres::PgPoolOptions::new()
        .connect_lazy("postgres://localhost:1/never-connected")
        .expect("lazy pool construction is infallible");
    let cfg = oms_config::CoreConfig::from_env().expect("default config");
    Arc::new(
        AppState::new(
            pool,
            cfg,
            PathBuf::from("/tmp/oms-test-indexes"),
            "testhash".to_string(),
        )
        .with_dev_anon(dev_anon),
    )
}

#[tokio::test]
async fn health_responds_without_auth_or_db() {
    let app = build_router(test_state(false));

    let res = app
        .oneshot(
            Request::builder()
                .uri("/v1/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    let v: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(v["ok"], true);
    assert_eq!(v["service"], "oms-daemon");
}

#[tokio::test]
async fn unauthenticated_requests_are_refused_fail_closed() {
    // No JWKS configured and no dev escape hatch: authenticated routes
    // must refuse before touching anything else.
    let app = build_router(test_state(false));

    let res = app
        .oneshot(
            Request::builder()
                .uri("/v1/locks")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    let v: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(v["error"], "UNAUTHENTICATED");
}

#[tokio::test]
async fn invalid_entity_kind_is_a_400_before_any_store_work() {
    let app = build_router(test_state(true));

    let res = app
        .oneshot(
            Request::builder()
                .uri("/v1/branches/main/entities/not_a_kind")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    let v: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(v["error"], "INVALID_ARGUMENT");
}

#[tokio::test]
async fn compaction_endpoint_collapses_linear_chains() {
    let app = build_router(test_state(true));

    let body = serde_json::json!({
        "commits": [
            {"id": "root", "parents": [], "referenced": false},
            {"id": "a", "parents": ["root"], "referenced": false},
            {"id": "b", "parents": ["a"], "referenced": false},
            {"id": "head", "parents": ["b"], "referenced": false}
        ]
    });

    let res = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/admin/compaction")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    let v: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(v["surviving_commits"], 2);
    assert_eq!(v["segments"][0]["collapsed_ids"], serde_json::json!(["b", "a"]));
}
