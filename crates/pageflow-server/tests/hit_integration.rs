use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use pageflow_core::config::{parse_ip_list, Config};
use pageflow_duckdb::DuckDbBackend;
use pageflow_server::app::build_app;
use pageflow_server::state::AppState;

const FIREFOX_MAC: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:121.0) Gecko/20100101 Firefox/121.0";
const GOOGLEBOT: &str = "Mozilla/5.0 (compatible; Googlebot/2.1; +http://www.google.com/bot.html)";

fn test_config() -> Config {
    Config {
        port: 0,
        data_dir: "/tmp/pageflow-test".to_string(),
        duckdb_memory_limit: "1GB".to_string(),
        track_url_changes: false,
        filter_by_domain: false,
        excluded_ips: parse_ip_list("198.51.100.0/24").expect("ip list"),
        lookup_cache_ttl_secs: 60,
        admin_token: None,
        cors_origins: vec![],
        beacon_queue_size: 16,
    }
}

fn test_state() -> Arc<AppState> {
    let db = DuckDbBackend::open_in_memory().expect("in-memory DuckDB");
    Arc::new(AppState::new(db, test_config()))
}

async fn post(state: &Arc<AppState>, uri: &str, body: &str, forwarded_for: Option<&str>) -> String {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "text/plain");
    if let Some(ip) = forwarded_for {
        builder = builder.header("x-forwarded-for", ip);
    }
    let request = builder.body(Body::from(body.to_string())).expect("build request");

    let response = build_app(Arc::clone(state))
        .oneshot(request)
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("read body")
        .to_bytes();
    String::from_utf8(bytes.to_vec()).expect("utf-8 body")
}

async fn post_hit(state: &Arc<AppState>, body: Value) -> String {
    post(state, "/api/hit", &body.to_string(), None).await
}

async fn event_count(state: &AppState) -> i64 {
    let conn = state.db.conn_for_test().await;
    conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))
        .expect("count")
}

#[tokio::test]
async fn connectivity_check_is_answered_without_storage() {
    let state = test_state();
    assert_eq!(post_hit(&state, json!({ "request": "test" })).await, "test");
    assert_eq!(event_count(&state).await, 0);
}

#[tokio::test]
async fn malformed_body_is_rejected_with_200() {
    let state = test_state();
    assert_eq!(post(&state, "/api/hit", "{not json", None).await, "rejected");
    assert_eq!(post(&state, "/api/hit", "[1, 2]", None).await, "rejected");
    assert_eq!(event_count(&state).await, 0);
}

#[tokio::test]
async fn page_view_then_heartbeat_updates_one_event() {
    let state = test_state();

    let view = json!({
        "url": "https://example.com/pricing",
        "uid": "visitor-1",
        "user_agent": FIREFOX_MAC
    });
    assert_eq!(post_hit(&state, view).await, "ok");

    let heartbeat = json!({
        "url": "https://example.com/pricing",
        "uid": "visitor-1",
        "time_on_page": 15
    });
    assert_eq!(post_hit(&state, heartbeat).await, "ok");

    let conn = state.db.conn_for_test().await;
    let (events, time_on_page): (i64, i64) = conn
        .query_row(
            "SELECT COUNT(*), MAX(time_on_page) FROM events",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .expect("events");
    assert_eq!((events, time_on_page), (1, 15));
}

#[tokio::test]
async fn mistyped_fields_are_coerced_not_rejected() {
    let state = test_state();
    let body = json!({
        "url": "https://example.com/a",
        "uid": 12345,
        "page_type": 7,
        "should_load_ecommerce": "true",
        "user_agent": FIREFOX_MAC
    });
    assert_eq!(post_hit(&state, body).await, "ok");

    let conn = state.db.conn_for_test().await;
    let (uid, page_type): (String, String) = conn
        .query_row("SELECT uid, page_type FROM events", [], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })
        .expect("stored event");
    assert_eq!((uid.as_str(), page_type.as_str()), ("12345", "7"));
}

#[tokio::test]
async fn orphan_heartbeat_still_answers_ok() {
    let state = test_state();
    let heartbeat = json!({
        "url": "https://example.com/",
        "uid": "visitor-2",
        "time_on_page": 30
    });
    assert_eq!(post_hit(&state, heartbeat).await, "ok");
    assert_eq!(event_count(&state).await, 0);
}

#[tokio::test]
async fn excluded_address_is_blocked() {
    let state = test_state();
    let body = json!({ "url": "https://example.com/", "uid": "visitor-3" }).to_string();

    assert_eq!(
        post(&state, "/api/hit", &body, Some("198.51.100.23, 10.0.0.1")).await,
        "blocked"
    );
    assert_eq!(event_count(&state).await, 0);

    assert_eq!(post(&state, "/api/hit", &body, Some("203.0.113.5")).await, "ok");
    assert_eq!(event_count(&state).await, 1);
}

#[tokio::test]
async fn crawler_user_agent_is_blocked() {
    let state = test_state();
    let body = json!({
        "url": "https://example.com/",
        "uid": "visitor-4",
        "user_agent": GOOGLEBOT
    });
    assert_eq!(post_hit(&state, body).await, "blocked");
    assert_eq!(event_count(&state).await, 0);
}

#[tokio::test]
async fn beacon_is_queued_and_recorded_by_worker() {
    let state = test_state();
    tokio::spawn(Arc::clone(&state).run_beacon_worker());

    let body = json!({
        "url": "https://example.com/docs",
        "uid": "visitor-5",
        "user_agent": FIREFOX_MAC
    })
    .to_string();
    assert_eq!(post(&state, "/api/beacon", &body, None).await, "queued");

    let mut recorded = 0;
    for _ in 0..100 {
        recorded = event_count(&state).await;
        if recorded > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(recorded, 1);
}

#[tokio::test]
async fn health_reports_ok() {
    let state = test_state();
    let request = Request::builder()
        .method("GET")
        .uri("/health")
        .body(Body::empty())
        .expect("build request");

    let response = build_app(state).oneshot(request).await.expect("request");
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("read body")
        .to_bytes();
    let json: Value = serde_json::from_slice(&bytes).expect("parse JSON");
    assert_eq!(json["status"], "ok");
}
