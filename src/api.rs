// 🌐 REST API - scan submission and history lookups over HTTP
// Router lives in the library so it can be tested without binding a port.

use crate::clock::Clock;
use crate::db::{get_account, get_account_history, get_plate_history, Account, AccountTransaction, ScanRecord};
use crate::error::BillingError;
use crate::lane::{LaneOutcome, TollLane};
use crate::scan::ScanEvent;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tower_http::cors::CorsLayer;
use tracing::error;

const DEFAULT_LIMIT: usize = 10;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    db: Arc<Mutex<Connection>>,
    lane: Arc<TollLane>,
    clock: Arc<dyn Clock>,
}

impl AppState {
    pub fn new(conn: Connection, lane: TollLane, clock: Arc<dyn Clock>) -> Self {
        AppState {
            db: Arc::new(Mutex::new(conn)),
            lane: Arc::new(lane),
            clock,
        }
    }

    fn db(&self) -> MutexGuard<'_, Connection> {
        // Every write is its own transaction, so a panicked holder left nothing half-done
        self.db.lock().unwrap_or_else(|e| e.into_inner())
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
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Response {
        (
            StatusCode::OK,
            Json(ApiResponse {
                success: true,
                data: Some(data),
                error: None,
                error_kind: None,
            }),
        )
            .into_response()
    }
}

fn error_response(err: &BillingError) -> Response {
    let status = if err.is_fatal_input() {
        StatusCode::UNPROCESSABLE_ENTITY
    } else {
        error!(error = %err, "request failed");
        StatusCode::INTERNAL_SERVER_ERROR
    };

    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(err.to_string()),
            error_kind: Some(err.kind()),
        }),
    )
        .into_response()
}

fn not_found(what: String) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(what),
            error_kind: None,
        }),
    )
        .into_response()
}

// ============================================================================
// Request / response bodies
// ============================================================================

/// Scan body; the timestamp defaults to the server's clock
#[derive(Debug, Deserialize)]
pub struct ScanInput {
    pub scan_timestamp: Option<i64>,
    pub location: String,
    pub lane: String,
    pub plate_num: String,
    pub vehicle_class: String,
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

#[derive(Serialize)]
struct AccountView {
    account: Account,
    recent: Vec<AccountTransaction>,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    ApiResponse::ok("OK")
}

/// POST /api/scans - Process a scan and charge the account if known
async fn submit_scan(State(state): State<AppState>, Json(input): Json<ScanInput>) -> Response {
    let event = ScanEvent {
        scan_timestamp: input.scan_timestamp.unwrap_or_else(|| state.clock.now_millis()),
        location: input.location,
        lane: input.lane,
        plate_num: input.plate_num,
        vehicle_class: input.vehicle_class,
    };

    let mut conn = state.db();
    match state.lane.handle(&mut conn, &event) {
        Ok(outcome) => ApiResponse::<LaneOutcome>::ok(outcome),
        Err(err) => error_response(&err),
    }
}

/// GET /api/plates/:plate/scans - Recent scans for a plate
async fn plate_scans(
    State(state): State<AppState>,
    Path(plate): Path<String>,
    Query(q): Query<LimitQuery>,
) -> Response {
    let conn = state.db();
    match get_plate_history(&conn, &plate, None, None, q.limit.unwrap_or(DEFAULT_LIMIT)) {
        Ok(scans) => ApiResponse::<Vec<ScanRecord>>::ok(scans),
        Err(err) => error_response(&err),
    }
}

/// GET /api/accounts/:id - Balance plus the latest transactions
async fn account_detail(State(state): State<AppState>, Path(account_id): Path<i32>) -> Response {
    let conn = state.db();
    let account = match get_account(&conn, account_id) {
        Ok(Some(account)) => account,
        Ok(None) => return not_found(format!("Account {} not found", account_id)),
        Err(err) => return error_response(&err),
    };

    match get_account_history(&conn, account_id, DEFAULT_LIMIT) {
        Ok(recent) => ApiResponse::ok(AccountView { account, recent }),
        Err(err) => error_response(&err),
    }
}

/// GET /api/accounts/:id/history - Account transactions, newest first
async fn account_history(
    State(state): State<AppState>,
    Path(account_id): Path<i32>,
    Query(q): Query<LimitQuery>,
) -> Response {
    let conn = state.db();
    match get_account_history(&conn, account_id, q.limit.unwrap_or(DEFAULT_LIMIT)) {
        Ok(history) => ApiResponse::<Vec<AccountTransaction>>::ok(history),
        Err(err) => error_response(&err),
    }
}

pub fn router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/scans", post(submit_scan))
        .route("/plates/:plate/scans", get(plate_scans))
        .route("/accounts/:id", get(account_detail))
        .route("/accounts/:id/history", get(account_history))
        .with_state(state);

    Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive())
}
