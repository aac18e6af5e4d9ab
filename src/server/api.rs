use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::audit::{Activity, ActivityKind, AuditFilter};
use crate::errors::WorkspaceError;
use crate::pipeline::board::BoardFilter;
use crate::pipeline::stats::{PipelineStats, RotLevel};
use crate::pipeline::{Deal, DealPatch, LostReason, Note};
use crate::workspace::{NewDeal, Workspace};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub workspace: Mutex<Workspace>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(workspace: Workspace) -> SharedState {
        Arc::new(Self {
            workspace: Mutex::new(workspace),
        })
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Workspace>, ApiError> {
        self.workspace
            .lock()
            .map_err(|_| ApiError::Internal("workspace lock poisoned".to_string()))
    }
}

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct ViewQuery {
    pub filter: Option<String>,
    #[serde(default)]
    pub archived: bool,
}

#[derive(Deserialize)]
pub struct MoveDealRequest {
    pub to_stage: String,
    pub target_deal_id: Option<String>,
    #[serde(default)]
    pub insert_before: bool,
}

#[derive(Deserialize)]
pub struct LoseDealRequest {
    pub reason: String,
    pub notes: Option<String>,
}

#[derive(Deserialize)]
pub struct CreateStageRequest {
    pub id: String,
    pub name: String,
}

#[derive(Deserialize)]
pub struct RenameStageRequest {
    pub name: String,
}

#[derive(Deserialize)]
pub struct DeleteStageQuery {
    pub reassign_to: Option<String>,
}

#[derive(Deserialize)]
pub struct CreateNoteRequest {
    pub deal_id: String,
    pub content: String,
}

#[derive(Deserialize)]
pub struct EditNoteRequest {
    pub content: String,
}

#[derive(Deserialize)]
pub struct LogActivityRequest {
    pub kind: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Deserialize)]
pub struct PruneQuery {
    pub before: DateTime<Utc>,
}

// ── Response payload types ────────────────────────────────────────────

#[derive(Serialize)]
pub struct DealDetail {
    pub deal: Deal,
    pub notes: Vec<Note>,
    pub lost_reasons: Vec<LostReason>,
    pub activities: Vec<Activity>,
    pub rot_level: RotLevel,
}

#[derive(Serialize)]
pub struct RottingEntry {
    pub deal_id: String,
    pub title: String,
    pub level: RotLevel,
    pub days_idle: i64,
}

#[derive(Serialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub stats: PipelineStats,
    pub rotting: Vec<RottingEntry>,
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<WorkspaceError> for ApiError {
    fn from(err: WorkspaceError) -> Self {
        match err {
            WorkspaceError::NotFound { .. } => ApiError::NotFound(err.to_string()),
            WorkspaceError::InvalidArgument(_)
            | WorkspaceError::InvalidTransition { .. }
            | WorkspaceError::Pipeline(_) => ApiError::BadRequest(err.to_string()),
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/deals", get(list_deals).post(create_deal))
        .route(
            "/api/deals/{id}",
            get(get_deal).patch(update_deal).delete(delete_deal),
        )
        .route("/api/deals/{id}/move", post(move_deal))
        .route("/api/deals/{id}/win", post(win_deal))
        .route("/api/deals/{id}/lose", post(lose_deal))
        .route("/api/deals/{id}/reopen", post(reopen_deal))
        .route("/api/deals/{id}/archive", post(archive_deal))
        .route("/api/deals/{id}/unarchive", post(unarchive_deal))
        .route("/api/stages", get(list_stages).post(create_stage))
        .route(
            "/api/stages/{id}",
            axum::routing::patch(rename_stage).delete(delete_stage),
        )
        .route("/api/notes", post(create_note))
        .route(
            "/api/notes/{id}",
            axum::routing::patch(edit_note).delete(delete_note),
        )
        .route("/api/board", get(get_board))
        .route("/api/stats", get(get_stats))
        .route("/api/audit", get(list_audit).delete(prune_audit))
        .route(
            "/api/activities/{entity}",
            get(list_activities).post(log_activity),
        )
        .route("/health", get(health_check))
}

// ── Helpers ───────────────────────────────────────────────────────────

fn parse_filter(raw: Option<&str>) -> Result<BoardFilter, ApiError> {
    match raw {
        Some(f) => BoardFilter::from_str(f).map_err(ApiError::BadRequest),
        None => Ok(BoardFilter::default()),
    }
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn list_deals(
    State(state): State<SharedState>,
    Query(query): Query<ViewQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let filter = parse_filter(query.filter.as_deref())?;
    let ws = state.lock()?;
    let deals: Vec<Deal> = ws.list(filter, query.archived).into_iter().cloned().collect();
    Ok(Json(deals))
}

async fn create_deal(
    State(state): State<SharedState>,
    Json(req): Json<NewDeal>,
) -> Result<impl IntoResponse, ApiError> {
    let deal = state.lock()?.create_deal(req)?;
    Ok((StatusCode::CREATED, Json(deal)))
}

async fn get_deal(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let ws = state.lock()?;
    let deal = ws.deal(&id)?.clone();
    let rot_level = ws.rotting_thresholds().level(&deal, Utc::now());
    Ok(Json(DealDetail {
        notes: ws.store().notes_for(&id).cloned().collect(),
        lost_reasons: ws.store().lost_reasons_for(&id).cloned().collect(),
        activities: ws.activities_for(&id).into_iter().cloned().collect(),
        rot_level,
        deal,
    }))
}

async fn update_deal(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(patch): Json<DealPatch>,
) -> Result<impl IntoResponse, ApiError> {
    let deal = state.lock()?.update_deal(&id, patch)?;
    Ok(Json(deal))
}

async fn delete_deal(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.lock()?.delete_deal(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn move_deal(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(req): Json<MoveDealRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let deal = state.lock()?.move_deal(
        &id,
        &req.to_stage,
        req.target_deal_id.as_deref(),
        req.insert_before,
    )?;
    Ok(Json(deal))
}

async fn win_deal(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.lock()?.win_deal(&id)?))
}

async fn lose_deal(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(req): Json<LoseDealRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let deal = state
        .lock()?
        .lose_deal(&id, &req.reason, req.notes.as_deref())?;
    Ok(Json(deal))
}

async fn reopen_deal(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.lock()?.reopen_deal(&id)?))
}

async fn archive_deal(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.lock()?.archive_deal(&id)?))
}

async fn unarchive_deal(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.lock()?.unarchive_deal(&id)?))
}

async fn list_stages(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let ws = state.lock()?;
    Ok(Json(ws.store().stages().to_vec()))
}

async fn create_stage(
    State(state): State<SharedState>,
    Json(req): Json<CreateStageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let stage = state.lock()?.add_stage(&req.id, &req.name)?;
    Ok((StatusCode::CREATED, Json(stage)))
}

async fn rename_stage(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(req): Json<RenameStageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.lock()?.rename_stage(&id, &req.name)?))
}

async fn delete_stage(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Query(query): Query<DeleteStageQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let removal = state
        .lock()?
        .delete_stage(&id, query.reassign_to.as_deref())?;
    Ok(Json(removal))
}

async fn create_note(
    State(state): State<SharedState>,
    Json(req): Json<CreateNoteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let note = state.lock()?.add_note(&req.deal_id, &req.content)?;
    Ok((StatusCode::CREATED, Json(note)))
}

async fn edit_note(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(req): Json<EditNoteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.lock()?.edit_note(&id, &req.content)?))
}

async fn delete_note(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.lock()?.delete_note(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_board(
    State(state): State<SharedState>,
    Query(query): Query<ViewQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let filter = parse_filter(query.filter.as_deref())?;
    Ok(Json(state.lock()?.board(filter, query.archived)))
}

async fn get_stats(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let ws = state.lock()?;
    let now = Utc::now();
    let rotting = ws
        .rotting(now)
        .into_iter()
        .map(|(deal, level)| RottingEntry {
            deal_id: deal.id.clone(),
            title: deal.title.clone(),
            level,
            days_idle: (now - deal.updated_at).num_days(),
        })
        .collect();
    Ok(Json(StatsResponse {
        stats: ws.stats(),
        rotting,
    }))
}

async fn list_audit(
    State(state): State<SharedState>,
    Query(filter): Query<AuditFilter>,
) -> Result<impl IntoResponse, ApiError> {
    let ws = state.lock()?;
    let logs: Vec<_> = ws.audit_logs(&filter).into_iter().cloned().collect();
    Ok(Json(logs))
}

async fn prune_audit(
    State(state): State<SharedState>,
    Query(query): Query<PruneQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let removed = state.lock()?.prune_audit(query.before);
    Ok(Json(serde_json::json!({ "removed": removed })))
}

async fn list_activities(
    State(state): State<SharedState>,
    Path(entity): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let ws = state.lock()?;
    let activities: Vec<Activity> = ws.activities_for(&entity).into_iter().cloned().collect();
    Ok(Json(activities))
}

async fn log_activity(
    State(state): State<SharedState>,
    Path(entity): Path<String>,
    Json(req): Json<LogActivityRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let kind = ActivityKind::from_str(&req.kind).map_err(ApiError::BadRequest)?;
    let activity = state
        .lock()?
        .log_activity(&entity, kind, &req.title, &req.description)?;
    Ok((StatusCode::CREATED, Json(activity)))
}

// ── Tests ─────────────────────────────────────────────────────────────
