//! API routes for progressd
//!
//! v0.2.0: Added challenge and achievement claim routes
//! v0.3.0: Added /v1/users/:user/sync and session routes

use crate::server::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use progress_shared::api::{AchievementEntry, HistoryQuery, ProgressRequest};
use progress_shared::challenges::ChallengeInstance;
use progress_shared::{
    ActivityOutcome, ActivityReport, AwardOutcome, AwardRequest, ClaimOutcome, HealthResponse,
    LedgerSummary, ProgressError, ProgressionSnapshot, SyncReport, XpTransaction,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

type AppStateArc = Arc<AppState>;
type ApiResult<T> = Result<Json<T>, (StatusCode, String)>;

/// Default page size for transaction history
const DEFAULT_HISTORY_LIMIT: usize = 50;

fn error_response(e: ProgressError) -> (StatusCode, String) {
    let status = match &e {
        ProgressError::InvalidAward(_) => StatusCode::BAD_REQUEST,
        ProgressError::UnknownUser(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        error!("  Request failed ({}): {}", e.code(), e);
    } else {
        warn!("  Rejected request: {}", e);
    }
    (status, e.to_string())
}

// ============================================================================
// Health Routes
// ============================================================================

pub fn health_routes() -> Router<AppStateArc> {
    Router::new().route("/v1/health", get(health))
}

async fn health(State(state): State<AppStateArc>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: progress_shared::VERSION.to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        open_sessions: state.service.open_users().await.len(),
        sync: state.sync.as_ref().map(|w| w.remote_name().to_string()),
    })
}

// ============================================================================
// Session Routes
// ============================================================================

pub fn session_routes() -> Router<AppStateArc> {
    Router::new().route("/v1/sessions/:user", post(open_session).delete(close_session))
}

#[derive(Serialize)]
pub struct CloseResponse {
    closed: bool,
}

async fn open_session(
    State(state): State<AppStateArc>,
    Path(user): Path<String>,
) -> ApiResult<ProgressionSnapshot> {
    state
        .service
        .open_session(&user)
        .await
        .map(Json)
        .map_err(error_response)
}

async fn close_session(
    State(state): State<AppStateArc>,
    Path(user): Path<String>,
) -> ApiResult<CloseResponse> {
    let closed = state
        .service
        .close_session(&user)
        .await
        .map_err(error_response)?;
    Ok(Json(CloseResponse { closed }))
}

// ============================================================================
// Award Routes
// ============================================================================

pub fn award_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/v1/activity", post(report_activity))
        .route("/v1/users/:user/awards", post(award))
}

async fn report_activity(
    State(state): State<AppStateArc>,
    Json(report): Json<ActivityReport>,
) -> ApiResult<ActivityOutcome> {
    info!(
        "  Activity {} for {} ({} XP)",
        report.kind.as_str(),
        report.user_id,
        report.xp
    );
    state
        .service
        .report_activity(report)
        .await
        .map(Json)
        .map_err(error_response)
}

async fn award(
    State(state): State<AppStateArc>,
    Path(user): Path<String>,
    Json(request): Json<AwardRequest>,
) -> ApiResult<AwardOutcome> {
    info!(
        "  Award {} {} XP to {}",
        request.source_type, request.amount, user
    );
    state
        .service
        .award(&user, request)
        .await
        .map(Json)
        .map_err(error_response)
}

// ============================================================================
// Ledger Routes
// ============================================================================

pub fn ledger_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/v1/users/:user/snapshot", get(snapshot))
        .route("/v1/users/:user/transactions", get(transactions))
        .route("/v1/users/:user/summary", get(summary))
}

async fn snapshot(
    State(state): State<AppStateArc>,
    Path(user): Path<String>,
) -> ApiResult<ProgressionSnapshot> {
    state
        .service
        .snapshot(&user)
        .await
        .map(Json)
        .map_err(error_response)
}

async fn transactions(
    State(state): State<AppStateArc>,
    Path(user): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Vec<XpTransaction>> {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    state
        .service
        .transactions(&user, limit)
        .await
        .map(Json)
        .map_err(error_response)
}

async fn summary(
    State(state): State<AppStateArc>,
    Path(user): Path<String>,
) -> ApiResult<LedgerSummary> {
    state
        .service
        .ledger_summary(&user)
        .await
        .map(Json)
        .map_err(error_response)
}

// ============================================================================
// Challenge Routes
// ============================================================================

pub fn challenge_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/v1/users/:user/challenges", get(challenges))
        .route("/v1/users/:user/challenges/refresh", post(refresh_challenges))
        .route("/v1/users/:user/challenges/:id/progress", post(progress_challenge))
        .route("/v1/users/:user/challenges/:id/claim", post(claim_challenge))
}

async fn challenges(
    State(state): State<AppStateArc>,
    Path(user): Path<String>,
) -> ApiResult<Vec<ChallengeInstance>> {
    state
        .service
        .challenges(&user)
        .await
        .map(Json)
        .map_err(error_response)
}

async fn refresh_challenges(
    State(state): State<AppStateArc>,
    Path(user): Path<String>,
) -> ApiResult<Vec<ChallengeInstance>> {
    info!("  Refreshing challenge board for {}", user);
    state
        .service
        .refresh_challenges(&user)
        .await
        .map(Json)
        .map_err(error_response)
}

async fn progress_challenge(
    State(state): State<AppStateArc>,
    Path((user, id)): Path<(String, String)>,
    Json(req): Json<ProgressRequest>,
) -> ApiResult<ChallengeInstance> {
    let instance = state
        .service
        .progress_challenge(&user, &id, req.delta)
        .await
        .map_err(error_response)?;
    instance.map(Json).ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            format!("Challenge '{}' not found", id),
        )
    })
}

async fn claim_challenge(
    State(state): State<AppStateArc>,
    Path((user, id)): Path<(String, String)>,
) -> ApiResult<ClaimOutcome> {
    state
        .service
        .claim_challenge(&user, &id)
        .await
        .map(Json)
        .map_err(error_response)
}

// ============================================================================
// Achievement Routes
// ============================================================================

pub fn achievement_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/v1/users/:user/achievements", get(achievements))
        .route("/v1/users/:user/achievements/:id/claim", post(claim_achievement))
}

async fn achievements(
    State(state): State<AppStateArc>,
    Path(user): Path<String>,
) -> ApiResult<Vec<AchievementEntry>> {
    let views = state
        .service
        .achievements(&user)
        .await
        .map_err(error_response)?;
    Ok(Json(views.iter().map(AchievementEntry::from).collect()))
}

async fn claim_achievement(
    State(state): State<AppStateArc>,
    Path((user, id)): Path<(String, String)>,
) -> ApiResult<ClaimOutcome> {
    state
        .service
        .claim_achievement(&user, &id)
        .await
        .map(Json)
        .map_err(error_response)
}

// ============================================================================
// Sync Routes
// ============================================================================

pub fn sync_routes() -> Router<AppStateArc> {
    Router::new().route("/v1/users/:user/sync", post(sync_user))
}

async fn sync_user(
    State(state): State<AppStateArc>,
    Path(user): Path<String>,
) -> ApiResult<SyncReport> {
    let Some(worker) = state.sync.as_ref() else {
        return Err((
            StatusCode::NOT_IMPLEMENTED,
            "Sync is disabled in this daemon".to_string(),
        ));
    };
    worker.sync_user(&user).await.map(Json).map_err(error_response)
}
