//! Operator API: status snapshot and control commands over HTTP.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};

use crate::distribution::{Command, DistributionHandle, ServiceStatus};
use crate::listener::ListenerHandle;
use crate::mvp::MvpCast;

pub type SharedMvpCast = Arc<RwLock<Option<MvpCast>>>;

#[derive(Clone)]
pub struct ApiState {
    pub service: DistributionHandle,
    pub km: Option<ListenerHandle>,
    pub mvp: Option<ListenerHandle>,
    pub last_mvp_cast: SharedMvpCast,
}

#[derive(Debug, Deserialize)]
pub struct CorrectorBody {
    pub value: f64,
}

pub fn router(state: ApiState) -> Router {
    // CORS: any origin, for the bridge display
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/sync", get(time_sync))
        .route("/status", get(status))
        .route("/listeners", get(listeners))
        .route("/mvp/last", get(last_mvp_cast))
        .route("/force-send", post(force_send))
        .route("/restart", post(restart))
        .route("/stop", post(stop))
        .route("/corrector", post(set_corrector))
        .layer(cors)
        .with_state(state)
}

async fn time_sync() -> Json<Value> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    Json(json!({ "serverTime": now }))
}

async fn status(State(state): State<ApiState>) -> Json<ServiceStatus> {
    Json(state.service.status())
}

async fn listeners(State(state): State<ApiState>) -> Json<Value> {
    let stats = |h: &Option<ListenerHandle>| {
        h.as_ref().map(|h| json!({ "port": h.local_addr().port(), "stats": h.stats() }))
    };
    Json(json!({ "kongsberg": stats(&state.km), "mvp": stats(&state.mvp) }))
}

async fn last_mvp_cast(State(state): State<ApiState>) -> Result<Json<Value>, StatusCode> {
    let guard = state.last_mvp_cast.read().await;
    let cast = guard.as_ref().ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(json!({ "sender": cast.sender.to_string(), "profile": cast.profile })))
}

async fn command(state: &ApiState, cmd: Command) -> StatusCode {
    if state.service.send(cmd).await {
        StatusCode::ACCEPTED
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn force_send(State(state): State<ApiState>) -> StatusCode {
    command(&state, Command::ForceSend).await
}

async fn restart(State(state): State<ApiState>) -> StatusCode {
    command(&state, Command::Restart).await
}

async fn stop(State(state): State<ApiState>) -> StatusCode {
    command(&state, Command::Stop).await
}

async fn set_corrector(State(state): State<ApiState>, Json(body): Json<CorrectorBody>) -> StatusCode {
    if !body.value.is_finite() {
        return StatusCode::UNPROCESSABLE_ENTITY;
    }
    command(&state, Command::SetCorrector(body.value)).await
}
