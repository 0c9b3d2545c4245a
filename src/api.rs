// Jeton equity API - REST handlers over the equity core
//
// All routes live under /api and answer with the { success, data, error }
// envelope. Client errors carry their message; internal errors are logged
// with timing and answered with a generic message.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use rusqlite::Connection;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::captable::{get_cap_table, shareholder_position};
use crate::config::AppConfig;
use crate::error::{EquityError, Result};
use crate::ledger::{list_transactions, transactions_for_shareholder, verify_ledger};
use crate::operations::{buyback_shares, issue_shares, transfer_shares, BuybackRequest, IssueRequest, TransferRequest};
use crate::shareholders::{create_shareholder, get_shareholder, list_shareholders, HolderType, NewShareholder};
use crate::shares::{get_configuration, share_summary, update_configuration, SharesConfigUpdate};
use crate::snapshot::{list_valuations, record_valuation, NewValuation};
use crate::valuation::{cache_for_ttl, compute_strategic_value, price_per_share, CompanyValuation, ValuationCache};

/// Field clients may not write: valuation comes from the valuation bridge
pub const READ_ONLY_VALUATION_FIELD: &str = "company_valuation";

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<Connection>>,
    pub cache: Arc<dyn ValuationCache>,
}

impl AppState {
    pub fn new(conn: Connection, cache: Arc<dyn ValuationCache>) -> Self {
        Self {
            db: Arc::new(Mutex::new(conn)),
            cache,
        }
    }

    pub fn from_config(conn: Connection, config: &AppConfig) -> Self {
        Self::new(conn, Arc::from(cache_for_ttl(config.valuation_cache_ttl)))
    }

    fn lock_db(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|_| EquityError::Internal("database mutex poisoned".to_string()))
    }
}

/// API Response wrapper
#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn err(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

impl IntoResponse for EquityError {
    fn into_response(self) -> Response {
        let status = match &self {
            EquityError::Validation(_) | EquityError::Conflict { .. } => StatusCode::BAD_REQUEST,
            EquityError::NotFound(_) => StatusCode::NOT_FOUND,
            EquityError::Database(_) | EquityError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = if self.is_client_error() {
            self.to_string()
        } else {
            "Internal server error".to_string()
        };

        (status, Json(ApiResponse::<()>::err(message))).into_response()
    }
}

fn respond<T: Serialize>(operation: &'static str, started: Instant, result: Result<T>) -> Response {
    match result {
        Ok(data) => (StatusCode::OK, Json(ApiResponse::ok(data))).into_response(),
        Err(e) => {
            if !e.is_client_error() {
                error!(
                    operation,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    error = %e,
                    "request failed"
                );
            }
            e.into_response()
        }
    }
}

/// JSON body as extracted by axum; rejections are answered in the envelope
type JsonBody = std::result::Result<Json<serde_json::Value>, JsonRejection>;

fn json_value(body: JsonBody) -> Result<serde_json::Value> {
    body.map(|Json(value)| value)
        .map_err(|rejection| EquityError::validation(format!("Invalid request body: {}", rejection.body_text())))
}

fn from_json<T: DeserializeOwned>(value: serde_json::Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| EquityError::validation(format!("Invalid request body: {}", e)))
}

fn parse_body<T: DeserializeOwned>(body: JsonBody) -> Result<T> {
    from_json(json_value(body)?)
}

fn parse_holder_type(value: Option<&str>) -> Result<Option<HolderType>> {
    match value.map(str::trim).filter(|v| !v.is_empty() && *v != "all") {
        Some(v) => HolderType::parse(v).map(Some),
        None => Ok(None),
    }
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/shares - Configuration, allocation and valuation
async fn get_shares(State(state): State<AppState>) -> Response {
    let started = Instant::now();
    let result = state
        .lock_db()
        .and_then(|conn| share_summary(&conn, state.cache.as_ref()));
    respond("get_shares", started, result)
}

/// PUT /api/shares - Update authorized shares and/or share class
async fn put_shares(State(state): State<AppState>, body: JsonBody) -> Response {
    let started = Instant::now();

    let result = (|| {
        let body = json_value(body)?;
        if body.get(READ_ONLY_VALUATION_FIELD).is_some() {
            return Err(EquityError::validation(
                "company_valuation is read-only; it is derived from assets, liabilities, IP and infrastructure",
            ));
        }
        let update: SharesConfigUpdate = from_json(body)?;

        let mut conn = state.lock_db()?;
        update_configuration(&mut conn, &update)?;
        share_summary(&conn, state.cache.as_ref())
    })();

    respond("put_shares", started, result)
}

#[derive(Serialize)]
struct ValuationResponse {
    valuation: CompanyValuation,
    authorized_shares: i64,
    price_per_share: f64,
}

#[derive(Deserialize)]
struct RefreshQuery {
    #[serde(default)]
    refresh: bool,
}

/// GET /api/valuation?refresh=true - Strategic company value, optionally
/// bypassing the cache after the collaborator ledgers changed
async fn get_valuation(State(state): State<AppState>, Query(query): Query<RefreshQuery>) -> Response {
    let started = Instant::now();
    if query.refresh {
        state.cache.invalidate();
    }
    let result = state.lock_db().and_then(|conn| {
        let config = get_configuration(&conn)?;
        let valuation = compute_strategic_value(&conn, state.cache.as_ref())?;
        Ok(ValuationResponse {
            price_per_share: price_per_share(valuation.strategic_value, config.authorized_shares),
            authorized_shares: config.authorized_shares,
            valuation,
        })
    });
    respond("get_valuation", started, result)
}

#[derive(Deserialize)]
struct HolderTypeQuery {
    #[serde(rename = "type")]
    holder_type: Option<String>,
}

/// GET /api/equity/cap-table?type=<holder_type>
async fn cap_table(State(state): State<AppState>, Query(query): Query<HolderTypeQuery>) -> Response {
    let started = Instant::now();
    let result = parse_holder_type(query.holder_type.as_deref()).and_then(|holder_type| {
        let conn = state.lock_db()?;
        get_cap_table(&conn, state.cache.as_ref(), holder_type, Utc::now().date_naive())
    });
    respond("cap_table", started, result)
}

/// POST /api/equity/issue
async fn issue(State(state): State<AppState>, body: JsonBody) -> Response {
    let started = Instant::now();
    let result = parse_body::<IssueRequest>(body).and_then(|request| {
        let mut conn = state.lock_db()?;
        issue_shares(&mut conn, state.cache.as_ref(), request)
    });
    respond("issue_shares", started, result)
}

/// POST /api/equity/transfer
async fn transfer(State(state): State<AppState>, body: JsonBody) -> Response {
    let started = Instant::now();
    let result = parse_body::<TransferRequest>(body).and_then(|request| {
        let mut conn = state.lock_db()?;
        transfer_shares(&mut conn, state.cache.as_ref(), request)
    });
    respond("transfer_shares", started, result)
}

/// POST /api/equity/buyback
async fn buyback(State(state): State<AppState>, body: JsonBody) -> Response {
    let started = Instant::now();
    let result = parse_body::<BuybackRequest>(body).and_then(|request| {
        let mut conn = state.lock_db()?;
        buyback_shares(&mut conn, state.cache.as_ref(), request)
    });
    respond("buyback_shares", started, result)
}

#[derive(Deserialize)]
struct LimitQuery {
    limit: Option<u32>,
}

/// GET /api/equity/transactions?limit=N - Newest first
async fn transactions(State(state): State<AppState>, Query(query): Query<LimitQuery>) -> Response {
    let started = Instant::now();
    let result = state
        .lock_db()
        .and_then(|conn| list_transactions(&conn, query.limit));
    respond("list_transactions", started, result)
}

/// GET /api/equity/transactions/verify - Recompute the ledger hash chain
async fn verify_transactions(State(state): State<AppState>) -> Response {
    let started = Instant::now();
    let result = state.lock_db().and_then(|conn| verify_ledger(&conn));
    respond("verify_ledger", started, result)
}

/// GET /api/equity/shareholders?type=<holder_type>
async fn shareholders(State(state): State<AppState>, Query(query): Query<HolderTypeQuery>) -> Response {
    let started = Instant::now();
    let result = parse_holder_type(query.holder_type.as_deref()).and_then(|holder_type| {
        let conn = state.lock_db()?;
        list_shareholders(&conn, holder_type)
    });
    respond("list_shareholders", started, result)
}

/// POST /api/equity/shareholders
async fn add_shareholder(State(state): State<AppState>, body: JsonBody) -> Response {
    let started = Instant::now();
    let result = parse_body::<NewShareholder>(body).and_then(|new| {
        let conn = state.lock_db()?;
        create_shareholder(&conn, &new)
    });
    respond("create_shareholder", started, result)
}

/// GET /api/equity/shareholders/:id - Holdings with vesting as of today
async fn shareholder(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let started = Instant::now();
    let result = state
        .lock_db()
        .and_then(|conn| shareholder_position(&conn, &id, Utc::now().date_naive()));
    respond("shareholder_position", started, result)
}

/// GET /api/equity/shareholders/:id/transactions - Newest first
async fn shareholder_transactions(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let started = Instant::now();
    let result = state.lock_db().and_then(|conn| {
        get_shareholder(&conn, &id)?;
        transactions_for_shareholder(&conn, &id)
    });
    respond("shareholder_transactions", started, result)
}

/// GET /api/equity/valuations - Funding round snapshots
async fn valuations(State(state): State<AppState>) -> Response {
    let started = Instant::now();
    let result = state.lock_db().and_then(|conn| list_valuations(&conn));
    respond("list_valuations", started, result)
}

/// POST /api/equity/valuations
async fn add_valuation(State(state): State<AppState>, body: JsonBody) -> Response {
    let started = Instant::now();
    let result = parse_body::<NewValuation>(body).and_then(|input| {
        let conn = state.lock_db()?;
        record_valuation(&conn, &input)
    });
    respond("record_valuation", started, result)
}

// ============================================================================
// Router
// ============================================================================

pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/shares", get(get_shares).put(put_shares))
        .route("/valuation", get(get_valuation))
        .route("/equity/cap-table", get(cap_table))
        .route("/equity/issue", post(issue))
        .route("/equity/transfer", post(transfer))
        .route("/equity/buyback", post(buyback))
        .route("/equity/transactions", get(transactions))
        .route("/equity/transactions/verify", get(verify_transactions))
        .route("/equity/shareholders", get(shareholders).post(add_shareholder))
        .route("/equity/shareholders/:id", get(shareholder))
        .route("/equity/shareholders/:id/transactions", get(shareholder_transactions))
        .route("/equity/valuations", get(valuations).post(add_valuation))
        .with_state(state);

    Router::new().nest("/api", api_routes).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive()),
    )
}
