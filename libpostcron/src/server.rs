//! HTTP scheduling endpoint
//!
//! - `GET /` health check
//! - `POST /schedule` puts a post (back) on the schedule
//!
//! Handlers only touch the post store; publishing stays with the dispatcher.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::error::PostcronError;
use crate::scheduling::{schedule_post, ScheduleBody};
use crate::store::PostStore;

#[derive(Clone)]
pub struct AppState {
    store: Arc<dyn PostStore>,
}

/// Error body is always `{"error": "..."}`
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<PostcronError> for ApiError {
    fn from(e: PostcronError) -> Self {
        let status = match &e {
            PostcronError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            PostcronError::NotFound(_) => StatusCode::NOT_FOUND,
            PostcronError::InvalidTransition { .. } => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %e, "Schedule request failed");
        } else {
            warn!(error = %e, "Schedule request rejected");
        }

        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: rejection.body_text(),
        }
    }
}

pub fn create_router(store: Arc<dyn PostStore>) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/schedule", post(schedule))
        .with_state(AppState { store })
}

/// Serve until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, store: Arc<dyn PostStore>, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "Scheduling endpoint listening");
    }

    axum::serve(listener, create_router(store))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "running" }))
}

async fn schedule(
    State(state): State<AppState>,
    payload: Result<Json<ScheduleBody>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = payload?;
    let request = body.into_request()?;
    let post = schedule_post(state.store.as_ref(), request).await?;

    Ok(Json(json!({ "success": true, "post": post })))
}
