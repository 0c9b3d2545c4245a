#![cfg(feature = "server")]

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use rusqlite::Connection;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use jeton::api::{build_router, AppState};
use jeton::{setup_database, NoValuationCache};

fn test_app() -> Router {
    let conn = Connection::open_in_memory().unwrap();
    setup_database(&conn).unwrap();
    build_router(AppState::new(conn, Arc::new(NoValuationCache)))
}

fn test_app_with(seed_sql: &str) -> Router {
    let conn = Connection::open_in_memory().unwrap();
    setup_database(&conn).unwrap();
    conn.execute_batch(seed_sql).unwrap();
    build_router(AppState::new(conn, Arc::new(NoValuationCache)))
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn create_holder(app: &Router, name: &str, holder_type: &str) -> String {
    let (status, body) = send(
        app,
        "POST",
        "/api/equity/shareholders",
        Some(json!({ "name": name, "holder_type": holder_type })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "create shareholder failed: {}", body);
    body["data"]["id"].as_str().unwrap().to_string()
}

async fn issue(app: &Router, holder_id: &str, shares: i64) -> (StatusCode, Value) {
    send(
        app,
        "POST",
        "/api/equity/issue",
        Some(json!({
            "shareholder_id": holder_id,
            "shares_amount": shares,
            "equity_type": "PURCHASED",
            "price_per_share": 1.0
        })),
    )
    .await
}

#[tokio::test]
async fn test_health() {
    let app = test_app();
    let (status, body) = send(&app, "GET", "/api/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], "OK");
}

#[tokio::test]
async fn test_get_shares_initializes_defaults() {
    let app = test_app();
    let (status, body) = send(&app, "GET", "/api/shares", None).await;

    assert_eq!(status, StatusCode::OK);
    let data = &body["data"];
    assert_eq!(data["authorized_shares"], 1_000_000);
    assert_eq!(data["class_type"], "common");
    assert_eq!(data["status"], "active");
    assert_eq!(data["shares_allocated"], 0);
    assert_eq!(data["shares_remaining"], 1_000_000);
    assert_eq!(data["allocation_percentage"], 0.0);
    assert!(data["valuation"]["strategic_value"].is_number());
}

#[tokio::test]
async fn test_price_per_share_reflects_strategic_value() {
    let app = test_app_with(
        "INSERT INTO assets (name, acquisition_cost, accumulated_depreciation) VALUES ('Servers', 600000, 100000);
         INSERT INTO liabilities (name, outstanding_amount, status) VALUES ('Loan', 100000, 'deferred');
         INSERT INTO intellectual_property (name, valuation_estimate, status) VALUES ('Platform', 400000, 'scaling');
         INSERT INTO infrastructure (name, replacement_cost) VALUES ('Cluster', 200000);",
    );

    let (status, body) = send(&app, "GET", "/api/shares", None).await;
    assert_eq!(status, StatusCode::OK);

    let data = &body["data"];
    assert_eq!(data["valuation"]["strategic_value"], 1_000_000.0);
    assert_eq!(data["price_per_share"], 1.0);
}

#[tokio::test]
async fn test_put_rejects_company_valuation() {
    let app = test_app();

    let (status, body) = send(
        &app,
        "PUT",
        "/api/shares",
        Some(json!({ "authorized_shares": 2_000_000, "company_valuation": 5_000_000 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("company_valuation"));

    // Even alone, and even null, the field is rejected
    let (status, _) = send(&app, "PUT", "/api/shares", Some(json!({ "company_valuation": null }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Nothing was written
    let (_, body) = send(&app, "GET", "/api/shares", None).await;
    assert_eq!(body["data"]["authorized_shares"], 1_000_000);
}

#[tokio::test]
async fn test_put_below_allocated_reports_allocated_count() {
    let app = test_app();

    let (status, _) = send(&app, "PUT", "/api/shares", Some(json!({ "authorized_shares": 100 }))).await;
    assert_eq!(status, StatusCode::OK);

    let holder = create_holder(&app, "Ada", "founder").await;
    let (status, _) = issue(&app, &holder, 60).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, "PUT", "/api/shares", Some(json!({ "authorized_shares": 50 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("60"));

    let (_, body) = send(&app, "GET", "/api/shares", None).await;
    assert_eq!(body["data"]["authorized_shares"], 100);
    assert_eq!(body["data"]["shares_allocated"], 60);
    assert_eq!(body["data"]["shares_remaining"], 40);
    assert_eq!(body["data"]["allocation_percentage"], 60.0);
}

#[tokio::test]
async fn test_put_validates_fields() {
    let app = test_app();

    let (status, _) = send(&app, "PUT", "/api/shares", Some(json!({ "authorized_shares": 0 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, "PUT", "/api/shares", Some(json!({ "authorized_shares": "lots" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, "PUT", "/api/shares", Some(json!({ "class_type": "golden" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(&app, "PUT", "/api/shares", Some(json!({ "class_type": "preferred" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["class_type"], "preferred");
}

#[tokio::test]
async fn test_cap_table_half_vested_grant() {
    let app = test_app();
    send(&app, "PUT", "/api/shares", Some(json!({ "authorized_shares": 100 }))).await;

    let holder = create_holder(&app, "X", "employee").await;
    let today = Utc::now().date_naive();

    let (status, body) = send(
        &app,
        "POST",
        "/api/equity/issue",
        Some(json!({
            "shareholder_id": holder,
            "shares_amount": 40,
            "equity_type": "GRANTED",
            "price_per_share": 0.0,
            "vesting_start_date": (today - Duration::days(180)).to_string(),
            "vesting_end_date": (today + Duration::days(180)).to_string(),
            "vesting_percentage": 100
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "issue failed: {}", body);

    let (status, body) = send(&app, "GET", "/api/equity/cap-table", None).await;
    assert_eq!(status, StatusCode::OK);

    let rows = body["data"]["shareholders"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["vested_shares"], 20);
    assert_eq!(rows[0]["ownership_percentage"], 40.0);
    assert_eq!(body["data"]["summary"]["total_unvested"], 20);
}

#[tokio::test]
async fn test_cap_table_type_filter() {
    let app = test_app();
    let founder = create_holder(&app, "Ada", "founder").await;
    let investor = create_holder(&app, "Fund I", "investor").await;
    issue(&app, &founder, 500).await;
    issue(&app, &investor, 100).await;

    let (status, body) = send(&app, "GET", "/api/equity/cap-table?type=investor", None).await;
    assert_eq!(status, StatusCode::OK);
    let rows = body["data"]["shareholders"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["name"], "Fund I");
    assert_eq!(body["data"]["summary"]["total_shares"], 100);

    let (status, _) = send(&app, "GET", "/api/equity/cap-table?type=martian", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_transfer_and_buyback_flow() {
    let app = test_app();
    let a = create_holder(&app, "Ada", "founder").await;
    let b = create_holder(&app, "Grace", "employee").await;
    issue(&app, &a, 100).await;

    let (status, body) = send(
        &app,
        "POST",
        "/api/equity/transfer",
        Some(json!({
            "from_shareholder_id": a,
            "to_shareholder_id": b,
            "shares_amount": 30,
            "price_per_share": 1.5
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "transfer failed: {}", body);
    assert_eq!(body["data"]["from_shares_after"], 70);
    assert_eq!(body["data"]["to_shares_after"], 30);

    let (status, body) = send(
        &app,
        "POST",
        "/api/equity/buyback",
        Some(json!({ "shareholder_id": b, "shares_amount": 10, "price_per_share": 3.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "buyback failed: {}", body);
    assert_eq!(body["data"]["repurchase_value"], 30.0);
    assert_eq!(body["data"]["issued_shares_after"], 90);

    let (status, body) = send(&app, "GET", "/api/equity/transactions", None).await;
    assert_eq!(status, StatusCode::OK);
    let entries = body["data"].as_array().unwrap();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0]["transaction_type"], "buyback");

    let (_, body) = send(&app, "GET", "/api/equity/transactions?limit=1", None).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let (status, body) = send(&app, "GET", "/api/equity/transactions/verify", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["valid"], true);
    assert_eq!(body["data"]["entries_checked"], 3);
}

#[tokio::test]
async fn test_overdraft_transfer_rejected() {
    let app = test_app();
    let a = create_holder(&app, "Ada", "founder").await;
    let b = create_holder(&app, "Grace", "employee").await;
    issue(&app, &a, 10).await;

    let (status, body) = send(
        &app,
        "POST",
        "/api/equity/transfer",
        Some(json!({ "from_shareholder_id": a, "to_shareholder_id": b, "shares_amount": 11 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    let (_, body) = send(&app, "GET", "/api/equity/transactions", None).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_issue_errors() {
    let app = test_app();

    let (status, _) = issue(&app, "no-such-holder", 10).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let holder = create_holder(&app, "Ada", "founder").await;
    let (status, _) = issue(&app, &holder, -5).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        "POST",
        "/api/equity/issue",
        Some(json!({ "shareholder_id": holder, "equity_type": "PURCHASED" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = issue(&app, &holder, 1_000_001).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_valuation_snapshots() {
    let app = test_app();
    let holder = create_holder(&app, "Ada", "founder").await;
    issue(&app, &holder, 1000).await;

    let (status, body) = send(
        &app,
        "POST",
        "/api/equity/valuations",
        Some(json!({ "pre_money_valuation": 200000.0, "investment_amount": 50000.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "snapshot failed: {}", body);
    assert_eq!(body["data"]["post_money_valuation"], 250000.0);
    assert_eq!(body["data"]["share_price"], 200.0);

    let (_, body) = send(&app, "GET", "/api/equity/valuations", None).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let (status, _) = send(
        &app,
        "POST",
        "/api/equity/valuations",
        Some(json!({ "pre_money_valuation": -1.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_valuation_endpoint() {
    let app = test_app_with(
        "INSERT INTO intellectual_property (name, valuation_estimate) VALUES ('Platform', 2000000);",
    );

    let (status, body) = send(&app, "GET", "/api/valuation", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["valuation"]["ip_value"], 2_000_000.0);
    assert_eq!(body["data"]["price_per_share"], 2.0);
}

async fn send_raw(app: &Router, uri: &str, content_type: Option<&str>, body: &str) -> (StatusCode, Value) {
    let mut builder = Request::builder().method("POST").uri(uri);
    if let Some(content_type) = content_type {
        builder = builder.header("content-type", content_type);
    }
    let request = builder.body(Body::from(body.to_string())).unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

#[tokio::test]
async fn test_malformed_bodies_use_envelope() {
    let app = test_app();

    let (status, body) = send_raw(&app, "/api/equity/issue", Some("application/json"), "{not json").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().starts_with("Invalid request body"));

    let (status, body) = send_raw(&app, "/api/equity/shareholders", None, r#"{"name":"Ada"}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    let (status, body) = send_raw(&app, "/api/equity/transfer", Some("text/plain"), "30 shares").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_shareholder_position_and_history() {
    let app = test_app();
    let a = create_holder(&app, "Ada", "founder").await;
    let b = create_holder(&app, "Grace", "employee").await;
    issue(&app, &a, 100).await;
    send(
        &app,
        "POST",
        "/api/equity/transfer",
        Some(json!({ "from_shareholder_id": a, "to_shareholder_id": b, "shares_amount": 40 })),
    )
    .await;

    let (status, body) = send(&app, "GET", &format!("/api/equity/shareholders/{}", b), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["shareholder"]["name"], "Grace");
    assert_eq!(body["data"]["total_shares"], 40);
    assert_eq!(body["data"]["vested_shares"], 40);
    assert_eq!(body["data"]["holdings"][0]["equity_type"], "PURCHASED");

    let (status, body) = send(&app, "GET", &format!("/api/equity/shareholders/{}/transactions", a), None).await;
    assert_eq!(status, StatusCode::OK);
    let entries = body["data"].as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["transaction_type"], "transfer");

    let (status, _) = send(&app, "GET", "/api/equity/shareholders/ghost", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&app, "GET", "/api/equity/shareholders/ghost/transactions", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_valuation_refresh_bypasses_cache() {
    let conn = Connection::open_in_memory().unwrap();
    setup_database(&conn).unwrap();
    let cache = Arc::new(jeton::TtlValuationCache::new(std::time::Duration::from_secs(600)));
    let state = AppState::new(conn, cache);
    let db = state.db.clone();
    let app = build_router(state);

    let (_, body) = send(&app, "GET", "/api/valuation", None).await;
    assert_eq!(body["data"]["valuation"]["strategic_value"], 0.0);

    db.lock()
        .unwrap()
        .execute("INSERT INTO infrastructure (name, replacement_cost) VALUES ('Cluster', 5000)", [])
        .unwrap();

    let (_, body) = send(&app, "GET", "/api/valuation", None).await;
    assert_eq!(body["data"]["valuation"]["strategic_value"], 0.0);

    let (_, body) = send(&app, "GET", "/api/valuation?refresh=true", None).await;
    assert_eq!(body["data"]["valuation"]["strategic_value"], 5000.0);
}
