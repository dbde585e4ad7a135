//! Axum-based HTTP control and read surface
//!
//! Read endpoints render fields of the latest published snapshot; mutating
//! endpoints route through the coordinator handle so every schedule change
//! and refresh stays serialized behind the coordinator's command queue.

use crate::coordinator::CoordinatorHandle;
use crate::error::{HeliosError, Result};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use tokio_stream::StreamExt;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

#[derive(Clone)]
pub struct AppState {
    pub coordinator: CoordinatorHandle,
}

#[derive(Deserialize)]
pub struct SetScheduleBody {
    pub hour: String,
    pub mode: String,
}

#[derive(Deserialize)]
pub struct ClearScheduleBody {
    pub hour: String,
}

/// Map a coordinator error onto an HTTP response
fn error_response(err: &HeliosError) -> Response {
    let status = match err {
        HeliosError::Validation { .. } => StatusCode::BAD_REQUEST,
        HeliosError::Source { .. } | HeliosError::Refresh { .. } => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(serde_json::json!({"error": err.to_string()}))).into_response()
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "coordinator": format!("{:?}", state.coordinator.state()),
    }))
}

async fn status(State(state): State<AppState>) -> Response {
    match state.coordinator.latest_snapshot() {
        Some(snapshot) => Json(snapshot).into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"error": "no snapshot published yet"})),
        )
            .into_response(),
    }
}

async fn prices(State(state): State<AppState>) -> Response {
    match state.coordinator.latest_snapshot() {
        Some(snapshot) => Json(serde_json::json!({
            "prices": snapshot.prices,
            "last_update": snapshot.last_update,
        }))
        .into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"error": "no snapshot published yet"})),
        )
            .into_response(),
    }
}

async fn schedule(State(state): State<AppState>) -> Response {
    match state.coordinator.latest_snapshot() {
        Some(snapshot) => Json(serde_json::json!({
            "schedule": snapshot.schedule,
            "current_mode": snapshot.current_mode,
        }))
        .into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"error": "no snapshot published yet"})),
        )
            .into_response(),
    }
}

async fn set_schedule(
    State(state): State<AppState>,
    Json(body): Json<SetScheduleBody>,
) -> Response {
    match state.coordinator.set_schedule(&body.hour, &body.mode).await {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({"ok": true}))).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn clear_schedule(
    State(state): State<AppState>,
    Json(body): Json<ClearScheduleBody>,
) -> Response {
    match state.coordinator.clear_schedule(&body.hour).await {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({"ok": true}))).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn refresh(State(state): State<AppState>) -> Response {
    match state.coordinator.refresh().await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn events(State(state): State<AppState>) -> impl IntoResponse {
    let rx = state.coordinator.subscribe();
    let stream = tokio_stream::wrappers::WatchStream::new(rx).filter_map(|snapshot| {
        snapshot
            .and_then(|s| serde_json::to_string(&s).ok())
            .map(|payload| {
                Ok::<Event, std::convert::Infallible>(
                    Event::default().event("snapshot").data(payload),
                )
            })
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/status", get(status))
        .route("/api/prices", get(prices))
        .route("/api/schedule", get(schedule))
        .route("/api/schedule/set", post(set_schedule))
        .route("/api/schedule/clear", post(clear_schedule))
        .route("/api/refresh", post(refresh))
        .route("/api/events", get(events))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

pub async fn serve(coordinator: CoordinatorHandle, host: &str, port: u16) -> Result<()> {
    let state = AppState { coordinator };
    let router = build_router(state);

    let logger = crate::logging::get_logger("web");

    let (addr, parsed_ok): (SocketAddr, bool) = match host.parse::<IpAddr>() {
        Ok(ip) => (SocketAddr::new(ip, port), true),
        Err(_) => (([127, 0, 0, 1], port).into(), false),
    };
    if !parsed_ok {
        logger.warn(&format!("Invalid host '{}'; falling back to 127.0.0.1", host));
    }

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| HeliosError::web(format!("failed to bind {}: {}", addr, e)))?;
    let local_addr = listener
        .local_addr()
        .map_err(|e| HeliosError::web(e.to_string()))?;
    logger.info(&format!(
        "Web server listening at http://{}:{}",
        local_addr.ip(),
        local_addr.port()
    ));

    axum::serve(listener, router)
        .await
        .map_err(|e| HeliosError::web(e.to_string()))?;
    Ok(())
}
