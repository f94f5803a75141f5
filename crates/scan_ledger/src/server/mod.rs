use std::net::SocketAddr;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::{
    error::ServiceError,
    records::{ParsedScanRecord, TimeRange},
    service::{self, RecordQuery, TargetInfo, TargetRef},
    state::AppContext,
    targets::TargetDraft,
};

#[derive(Clone)]
pub struct ServerState {
    ctx: AppContext,
}

impl ServerState {
    pub fn new(ctx: AppContext) -> Self {
        Self { ctx }
    }

    fn ctx(&self) -> &AppContext {
        &self.ctx
    }

    fn default_page_size(&self) -> usize {
        self.ctx.config().scan.default_page_size
    }
}

pub async fn serve(state: ServerState) -> anyhow::Result<()> {
    let addr: SocketAddr = state.ctx().config().server.addr().parse()?;
    let listener = TcpListener::bind(addr).await?;
    serve_with_listener(listener, state).await
}

pub async fn serve_with_listener(listener: TcpListener, state: ServerState) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    info!(%addr, "server listening");

    let app = router(state.clone());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state.ctx().clone()))
        .await?;

    Ok(())
}

fn router(state: ServerState) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route(
            "/api/targets",
            get(search_targets)
                .post(create_target)
                .delete(delete_targets),
        )
        .route("/api/targets/:id", put(update_target))
        .route("/api/targets/:id/scan", post(scan_target))
        .route("/api/targets/:id/records", delete(clean_records))
        .route("/api/records", get(list_records))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn shutdown_signal(ctx: AppContext) {
    ctx.shutdown_notifier().notified().await;
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Serialize, Deserialize)]
struct PageResponse<T> {
    total: usize,
    items: Vec<T>,
}

fn error_response(err: ServiceError) -> Response {
    let status = match &err {
        ServiceError::NotFound => StatusCode::NOT_FOUND,
        ServiceError::RecordExist(_) => StatusCode::CONFLICT,
        ServiceError::IllegalPath
        | ServiceError::InvalidName { .. }
        | ServiceError::InvalidPage => StatusCode::BAD_REQUEST,
        ServiceError::Storage(inner) => {
            warn!(error = ?inner, "scan ledger storage failure");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, Json(json!({ "error": err.to_string() }))).into_response()
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}

#[derive(Debug, Deserialize)]
struct TargetSearchParams {
    #[serde(default)]
    page: Option<usize>,
    #[serde(default)]
    page_size: Option<usize>,
    #[serde(default)]
    info: Option<String>,
}

async fn search_targets(
    State(state): State<ServerState>,
    Query(params): Query<TargetSearchParams>,
) -> Response {
    let page = params.page.unwrap_or(1);
    let page_size = params
        .page_size
        .unwrap_or_else(|| state.default_page_size());

    match service::search(state.ctx(), page, page_size, params.info.as_deref()).await {
        Ok((total, items)) => Json(PageResponse::<TargetInfo> { total, items }).into_response(),
        Err(err) => error_response(err),
    }
}

async fn create_target(
    State(state): State<ServerState>,
    Json(draft): Json<TargetDraft>,
) -> Response {
    match service::create(state.ctx(), draft).await {
        Ok(target) => (StatusCode::CREATED, Json(target)).into_response(),
        Err(err) => error_response(err),
    }
}

async fn update_target(
    State(state): State<ServerState>,
    Path(id): Path<u64>,
    Json(draft): Json<TargetDraft>,
) -> Response {
    match service::update(state.ctx(), id, draft).await {
        Ok(target) => Json(target).into_response(),
        Err(err) => error_response(err),
    }
}

#[derive(Debug, Deserialize)]
struct DeleteTargetsRequest {
    ids: Vec<u64>,
}

async fn delete_targets(
    State(state): State<ServerState>,
    Json(request): Json<DeleteTargetsRequest>,
) -> Response {
    match service::delete(state.ctx(), &request.ids).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(err),
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ScanDispatched {
    run_id: String,
}

async fn scan_target(State(state): State<ServerState>, Path(id): Path<u64>) -> Response {
    match service::handle_once(state.ctx(), id).await {
        Ok(run_id) => (StatusCode::ACCEPTED, Json(ScanDispatched { run_id })).into_response(),
        Err(err) => error_response(err),
    }
}

async fn clean_records(State(state): State<ServerState>, Path(id): Path<u64>) -> Response {
    match service::clean_records(state.ctx(), id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(err),
    }
}

#[derive(Debug, Deserialize)]
struct RecordSearchParams {
    #[serde(default)]
    target_id: Option<u64>,
    #[serde(default)]
    target_name: Option<String>,
    #[serde(default)]
    page: Option<usize>,
    #[serde(default)]
    page_size: Option<usize>,
    #[serde(default)]
    start: Option<String>,
    #[serde(default)]
    end: Option<String>,
}

async fn list_records(
    State(state): State<ServerState>,
    Query(params): Query<RecordSearchParams>,
) -> Response {
    let target = match (params.target_id, params.target_name) {
        (Some(id), None) => TargetRef::Id(id),
        (None, Some(name)) => TargetRef::Name(name),
        _ => return bad_request("exactly one of target_id or target_name is required"),
    };

    let range = match (
        parse_bound(params.start.as_deref()),
        parse_bound(params.end.as_deref()),
    ) {
        (Ok(start), Ok(end)) => TimeRange { start, end },
        _ => return bad_request("start and end must be RFC 3339 timestamps"),
    };

    let query = RecordQuery {
        target,
        page: params.page.unwrap_or(1),
        page_size: params
            .page_size
            .unwrap_or_else(|| state.default_page_size()),
        range,
    };

    match service::load_records(state.ctx(), query).await {
        Ok(page) => Json(PageResponse::<ParsedScanRecord> {
            total: page.total,
            items: page.items,
        })
        .into_response(),
        Err(err) => error_response(err),
    }
}

fn parse_bound(raw: Option<&str>) -> Result<Option<DateTime<Utc>>, chrono::ParseError> {
    raw.map(|value| DateTime::parse_from_rfc3339(value).map(|ts| ts.with_timezone(&Utc)))
        .transpose()
}
