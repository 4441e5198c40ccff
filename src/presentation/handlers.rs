// HTTP request handlers
use crate::application::cache_coordinator::ReadOptions;
use crate::application::dashboard_session::DashboardHandle;
use crate::application::errors::SyncError;
use crate::domain::mutation_gate::GateDecision;
use crate::domain::sync::RealtimeEvent;
use crate::domain::widget::{LayoutItem, WidgetContent, WidgetKind};
use crate::infrastructure::chunked_stream::stream_from_watch;
use crate::infrastructure::http_response::{accepts_brotli, json_response};
use crate::presentation::app_state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const ANONYMOUS: &str = "anonymous";

#[derive(Deserialize)]
pub struct UserQuery {
    pub user: Option<String>,
    #[serde(default)]
    pub bust: bool,
}

impl UserQuery {
    fn user_id(&self) -> &str {
        self.user.as_deref().unwrap_or(ANONYMOUS)
    }
}

#[derive(Deserialize)]
pub struct AddWidgetRequest {
    #[serde(rename = "type")]
    pub kind: WidgetKind,
}

#[derive(Deserialize)]
pub struct LayoutRequest {
    pub layout: Vec<LayoutItem>,
}

#[derive(Deserialize)]
pub struct ResizeRequest {
    pub w: u32,
    pub h: u32,
}

#[derive(Deserialize)]
pub struct ContentRequest {
    pub content: WidgetContent,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SlotDecision {
    slot: String,
    #[serde(flatten)]
    decision: GateDecision,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn respond(result: Result<Response, StatusCode>) -> Response {
    match result {
        Ok(response) => response,
        Err(status) => status.into_response(),
    }
}

async fn error_response(status: StatusCode, message: String, compress: bool) -> Response {
    respond(json_response(&ErrorBody { error: message }, status, compress).await)
}

async fn sync_error_response(error: SyncError, compress: bool) -> Response {
    let status = match &error {
        SyncError::Persistence(_) => StatusCode::BAD_GATEWAY,
        SyncError::SessionClosed(_) => StatusCode::SERVICE_UNAVAILABLE,
        SyncError::UnknownWidget(_) => StatusCode::NOT_FOUND,
        SyncError::KindChange(_) => StatusCode::UNPROCESSABLE_ENTITY,
    };
    tracing::warn!(error = %error, "dashboard mutation failed");
    error_response(status, error.to_string(), compress).await
}

async fn open_session(
    state: &AppState,
    dashboard_id: &str,
    user_id: &str,
    compress: bool,
) -> Result<DashboardHandle, Response> {
    match state.dashboards.open(dashboard_id, user_id).await {
        Ok(handle) => Ok(handle),
        Err(e) => {
            tracing::error!(dashboard_id, error = %e, "failed to open dashboard session");
            Err(error_response(StatusCode::BAD_GATEWAY, e.to_string(), compress).await)
        }
    }
}

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "ok"
}

/// Widget list for a dashboard, served cache-aside.
pub async fn list_widgets(
    Path(id): Path<String>,
    Query(query): Query<UserQuery>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    let compress = accepts_brotli(&headers);
    let options = ReadOptions {
        bust: query.bust,
        ..ReadOptions::default()
    };

    match state.dashboards.load_widgets(&id, query.user_id(), options).await {
        Ok(read) => respond(json_response(&read, StatusCode::OK, compress).await),
        Err(e) => {
            tracing::error!(dashboard_id = %id, error = %e, "failed to load widgets");
            error_response(StatusCode::BAD_GATEWAY, e.to_string(), compress).await
        }
    }
}

pub async fn add_widget(
    Path(id): Path<String>,
    Query(query): Query<UserQuery>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
    Json(request): Json<AddWidgetRequest>,
) -> Response {
    let compress = accepts_brotli(&headers);
    let handle = match open_session(&state, &id, query.user_id(), compress).await {
        Ok(handle) => handle,
        Err(response) => return response,
    };

    match handle.add_widget(request.kind).await {
        Ok(widget) => respond(json_response(&widget, StatusCode::CREATED, compress).await),
        Err(e) => sync_error_response(e, compress).await,
    }
}

/// Commit the layout reported at the end of a drag.
pub async fn commit_layout(
    Path(id): Path<String>,
    Query(query): Query<UserQuery>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
    Json(request): Json<LayoutRequest>,
) -> Response {
    let compress = accepts_brotli(&headers);
    let handle = match open_session(&state, &id, query.user_id(), compress).await {
        Ok(handle) => handle,
        Err(response) => return response,
    };

    match handle.commit_drag(request.layout).await {
        Ok(decisions) => {
            let body: Vec<SlotDecision> = decisions
                .into_iter()
                .map(|(slot, decision)| SlotDecision { slot, decision })
                .collect();
            respond(json_response(&body, StatusCode::OK, compress).await)
        }
        Err(e) => sync_error_response(e, compress).await,
    }
}

pub async fn resize_widget(
    Path((id, slot)): Path<(String, String)>,
    Query(query): Query<UserQuery>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
    Json(request): Json<ResizeRequest>,
) -> Response {
    let compress = accepts_brotli(&headers);
    let handle = match open_session(&state, &id, query.user_id(), compress).await {
        Ok(handle) => handle,
        Err(response) => return response,
    };

    match handle.commit_resize(&slot, request.w, request.h).await {
        Ok(decision) => {
            let body = SlotDecision { slot, decision };
            respond(json_response(&body, StatusCode::OK, compress).await)
        }
        Err(e) => sync_error_response(e, compress).await,
    }
}

pub async fn update_widget_content(
    Path((id, widget_id)): Path<(String, String)>,
    Query(query): Query<UserQuery>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
    Json(request): Json<ContentRequest>,
) -> Response {
    let compress = accepts_brotli(&headers);
    let handle = match open_session(&state, &id, query.user_id(), compress).await {
        Ok(handle) => handle,
        Err(response) => return response,
    };

    match handle.update_content(&widget_id, request.content).await {
        Ok(widget) => respond(json_response(&widget, StatusCode::OK, compress).await),
        Err(e) => sync_error_response(e, compress).await,
    }
}

pub async fn delete_widget(
    Path((id, widget_id)): Path<(String, String)>,
    Query(query): Query<UserQuery>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    let compress = accepts_brotli(&headers);
    let handle = match open_session(&state, &id, query.user_id(), compress).await {
        Ok(handle) => handle,
        Err(response) => return response,
    };

    match handle.delete_widget(&widget_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => sync_error_response(e, compress).await,
    }
}

/// Stream the reconciled view as length-prefixed frames (progressive updates)
pub async fn stream_dashboard(
    Path(id): Path<String>,
    Query(query): Query<UserQuery>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    let compress = accepts_brotli(&headers);
    match open_session(&state, &id, query.user_id(), compress).await {
        Ok(handle) => stream_from_watch(handle.subscribe(), compress).await.into_response(),
        Err(response) => response,
    }
}

pub async fn prefetch_dashboard(
    Path(id): Path<String>,
    Query(query): Query<UserQuery>,
    State(state): State<Arc<AppState>>,
) -> StatusCode {
    if state.dashboards.prefetch(&id, query.user_id()).await {
        StatusCode::ACCEPTED
    } else {
        StatusCode::NO_CONTENT
    }
}

/// Ingest a change notification from the persistence backend.
pub async fn publish_event(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(mut event): Json<RealtimeEvent>,
) -> StatusCode {
    event.dashboard_id = id;
    let receivers = state.hub.publish(event);
    tracing::debug!(receivers, "realtime event published");
    StatusCode::ACCEPTED
}
