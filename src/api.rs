use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{self, Stream, StreamExt};
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;

use crate::events::Event;
use crate::monitor::{Monitor, MonitorError};

pub fn router(monitor: Monitor, auth_token: Option<String>) -> Router {
    Router::new()
        .route("/start", post(start_monitor))
        .route("/stop", post(stop_monitor))
        .route("/diagnostics", post(run_diagnostics))
        .route("/watch/start", post(start_watch))
        .route("/watch/stop", post(stop_watch))
        .route("/status", get(get_status))
        .route("/events", get(stream_events))
        .with_state(ApiState {
            monitor,
            auth_token: auth_token.map(Arc::from),
        })
}

#[derive(Clone)]
pub struct ApiState {
    monitor: Monitor,
    auth_token: Option<Arc<str>>,
}

#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    Monitor(MonitorError),
}

impl From<MonitorError> for ApiError {
    fn from(e: MonitorError) -> Self {
        ApiError::Monitor(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let e = match self {
            ApiError::Unauthorized => return StatusCode::UNAUTHORIZED.into_response(),
            ApiError::Monitor(e) => e,
        };

        let status = match &e {
            MonitorError::AlreadyRunning
            | MonitorError::NotRunning
            | MonitorError::AlreadyWatching
            | MonitorError::NotWatching => StatusCode::CONFLICT,
            MonitorError::Capture(_) => StatusCode::SERVICE_UNAVAILABLE,
            MonitorError::Templates(_) | MonitorError::Detection(_) => {
                tracing::error!("request failed: {e}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({"error": e.to_string()}))).into_response()
    }
}

fn check_auth(headers: &HeaderMap, expected_token: Option<&str>) -> Result<(), ApiError> {
    let Some(expected_token) = expected_token else {
        return Ok(());
    };

    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthorized)?;

    if let Some(token) = auth.strip_prefix("Bearer ")
        && token == expected_token
    {
        return Ok(());
    }

    Err(ApiError::Unauthorized)
}

async fn start_monitor(
    State(api): State<ApiState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    check_auth(&headers, api.auth_token.as_deref())?;
    let session = api.monitor.start().await?;
    Ok(Json(json!({"status": "started", "session": session})))
}

async fn stop_monitor(
    State(api): State<ApiState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    check_auth(&headers, api.auth_token.as_deref())?;
    api.monitor.stop().await?;
    Ok(Json(json!({"status": "stopped"})))
}

async fn run_diagnostics(
    State(api): State<ApiState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    check_auth(&headers, api.auth_token.as_deref())?;
    let report = api.monitor.run_diagnostics().await?;
    Ok(Json(report))
}

async fn start_watch(
    State(api): State<ApiState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    check_auth(&headers, api.auth_token.as_deref())?;
    api.monitor.start_auto_watch().await?;
    Ok(Json(json!({"status": "watching"})))
}

async fn stop_watch(
    State(api): State<ApiState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    check_auth(&headers, api.auth_token.as_deref())?;
    api.monitor.stop_auto_watch().await?;
    Ok(Json(json!({"status": "not_watching"})))
}

async fn get_status(State(api): State<ApiState>) -> impl IntoResponse {
    Json(api.monitor.status().await)
}

/// Server-sent events: the current status label first, then every log and
/// status event as it happens.
async fn stream_events(
    State(api): State<ApiState>,
) -> Sse<impl Stream<Item = Result<SseEvent, axum::Error>>> {
    let rx = api.monitor.events().subscribe();
    let current = Event::Status {
        status: api.monitor.status().await.status.to_owned(),
    };

    let live = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => return Some((event, rx)),
                Err(RecvError::Lagged(n)) => tracing::debug!("event subscriber skipped {n} events"),
                Err(RecvError::Closed) => return None,
            }
        }
    });

    let events = stream::once(async move { current })
        .chain(live)
        .map(|event| SseEvent::default().json_data(event));

    Sse::new(events).keep_alive(KeepAlive::default())
}
