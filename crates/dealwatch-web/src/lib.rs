//! Axum admin and health surface for the deal watcher.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use dealwatch_sync::{
    build_scheduler, spawn_startup_run, AppContext, BroadcastOrchestrator, NotificationFanout, SyncOrchestrator,
    SyncOutcome,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use tokio::net::TcpListener;
use tracing::{info, warn};

pub const CRATE_NAME: &str = "dealwatch-web";

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<SyncOrchestrator>,
    pub broadcaster: Arc<BroadcastOrchestrator>,
    pub fanout: Arc<NotificationFanout>,
    pub digest_limit: usize,
    /// Bearer token required on `/admin/*`; open when `None`.
    pub admin_token: Option<String>,
}

impl AppState {
    pub fn new(ctx: &AppContext) -> Self {
        Self {
            orchestrator: ctx.orchestrator.clone(),
            broadcaster: ctx.broadcaster.clone(),
            fanout: ctx.fanout.clone(),
            digest_limit: ctx.config.digest_limit,
            admin_token: None,
        }
    }

    pub fn with_admin_token(mut self, token: Option<String>) -> Self {
        self.admin_token = token.filter(|t| !t.trim().is_empty());
        self
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ShareDailyRequest {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct Envelope<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'static str>,
    data: T,
}

fn ok<T: Serialize>(message: Option<&'static str>, data: T) -> Response {
    Json(Envelope {
        success: true,
        message,
        data,
    })
    .into_response()
}

fn failure(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "success": false, "message": message.into() }))).into_response()
}

fn server_error(err: anyhow::Error) -> Response {
    warn!(error = %format!("{err:#}"), "admin request failed");
    failure(StatusCode::INTERNAL_SERVER_ERROR, format!("Server error: {err}"))
}

fn authorized(state: &AppState, headers: &HeaderMap) -> bool {
    let Some(expected) = &state.admin_token else {
        return true;
    };
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| token == expected)
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/push/vapid-key", get(vapid_key_handler))
        .route("/admin/sync", post(sync_handler))
        .route("/admin/share-daily", post(share_daily_handler))
        .route("/admin/sharing-stats", get(sharing_stats_handler))
        .with_state(Arc::new(state))
}

async fn health_handler() -> Json<JsonValue> {
    Json(json!({
        "success": true,
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

async fn vapid_key_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.fanout.public_key() {
        Some(key) => ok(None, json!({ "publicKey": key })),
        None => failure(StatusCode::SERVICE_UNAVAILABLE, "Push notifications not configured"),
    }
}

async fn sync_handler(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if !authorized(&state, &headers) {
        return failure(StatusCode::UNAUTHORIZED, "Unauthorized");
    }
    match state.orchestrator.trigger().await {
        Ok(SyncOutcome::Completed(stats)) => ok(Some("Sync job triggered"), stats),
        Ok(SyncOutcome::Skipped) => failure(StatusCode::CONFLICT, "Sync already running"),
        Err(err) => server_error(err),
    }
}

async fn share_daily_handler(State(state): State<Arc<AppState>>, headers: HeaderMap, body: Bytes) -> Response {
    if !authorized(&state, &headers) {
        return failure(StatusCode::UNAUTHORIZED, "Unauthorized");
    }
    let request: ShareDailyRequest = if body.iter().all(u8::is_ascii_whitespace) {
        ShareDailyRequest::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(request) => request,
            Err(err) => return failure(StatusCode::BAD_REQUEST, format!("invalid body: {err}")),
        }
    };
    let limit = request.limit.unwrap_or(state.digest_limit);
    if limit == 0 {
        return failure(StatusCode::BAD_REQUEST, "limit must be at least 1");
    }
    match state.broadcaster.share_daily_top_deals(limit).await {
        Ok(report) => ok(Some("Daily deals shared"), report),
        Err(err) => server_error(err),
    }
}

async fn sharing_stats_handler(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if !authorized(&state, &headers) {
        return failure(StatusCode::UNAUTHORIZED, "Unauthorized");
    }
    match state.broadcaster.sharing_stats().await {
        Ok(stats) => ok(None, stats),
        Err(err) => server_error(err),
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "could not listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

/// Serve the admin surface and, when enabled, the sync schedule until ctrl-c.
pub async fn serve(ctx: AppContext, bind: SocketAddr, admin_token: Option<String>) -> anyhow::Result<()> {
    let mut scheduler = None;
    if ctx.config.scheduler_enabled {
        let schedule = ctx.config.schedule();
        let sched = build_scheduler(ctx.orchestrator.clone(), &schedule).await?;
        sched.start().await?;
        spawn_startup_run(ctx.orchestrator.clone(), schedule.startup_delay);
        scheduler = Some(sched);
    } else {
        info!("scheduler disabled");
    }

    let state = AppState::new(&ctx).with_admin_token(admin_token);
    let listener = TcpListener::bind(bind).await?;
    info!(%bind, "dealwatch admin listening");
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(mut sched) = scheduler {
        sched.shutdown().await?;
    }
    Ok(())
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    let bind: SocketAddr = std::env::var("DEALWATCH_BIND")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 8000)));
    let ctx = AppContext::from_env().await?;
    serve(ctx, bind, std::env::var("DEALWATCH_ADMIN_TOKEN").ok()).await
}
