use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

use crate::messages::{SendMessage, StatusUpdateRequest, TokenUpdate};
use crate::queue::PushProducer;
use crate::service::PushService;

/// Shared state for the HTTP handlers. Thin glue: every endpoint delegates to
/// the producer or the service.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<PushService>,
    pub producer: Arc<PushProducer>,
    pub send_queue: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/push/send", post(send_push))
        .route("/push/register", post(register_device))
        .route("/push/status", post(update_status))
        .route("/push/status/:notification_id", get(notification_status))
        .route("/health", get(get_health))
        .with_state(state)
}

/// Enqueues a send request; actual dispatch happens in the consumer.
async fn send_push(State(state): State<AppState>, Json(mut req): Json<SendMessage>) -> Response {
    if req.notification_id.is_empty() {
        req.notification_id = Uuid::new_v4().to_string();
    }
    if req.correlation_id.is_empty() {
        req.correlation_id = Uuid::new_v4().to_string();
    }

    match state
        .producer
        .publish(&state.send_queue, &req, &req.correlation_id)
        .await
    {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(json!({
                "success": true,
                "notification_id": req.notification_id,
                "correlation_id": req.correlation_id,
            })),
        )
            .into_response(),
        Err(err) => {
            error!("Failed to enqueue push notification: {}", err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "Failed to enqueue notification"})),
            )
                .into_response()
        }
    }
}

async fn register_device(
    State(state): State<AppState>,
    Json(req): Json<TokenUpdate>,
) -> Response {
    match state.service.register_token(&req).await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({"success": true, "message": "Device registered successfully"})),
        )
            .into_response(),
        Err(err) => {
            error!("Failed to register device: {}", err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "Failed to register device", "details": err.to_string()})),
            )
                .into_response()
        }
    }
}

async fn update_status(
    State(state): State<AppState>,
    Json(req): Json<StatusUpdateRequest>,
) -> Response {
    match state
        .service
        .update_notification_status(&req.notification_id, &req.status, req.error.as_deref())
        .await
    {
        Ok(()) => (StatusCode::OK, Json(json!({"success": true}))).into_response(),
        Err(err) => {
            error!("Failed to update notification status: {}", err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "Failed to update status"})),
            )
                .into_response()
        }
    }
}

async fn notification_status(
    State(state): State<AppState>,
    Path(notification_id): Path<String>,
) -> Response {
    match state.service.notification_status(&notification_id).await {
        Ok(Some(log)) => (StatusCode::OK, Json(log)).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Notification not found"})),
        )
            .into_response(),
        Err(err) => {
            error!("Failed to fetch notification status: {}", err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "Failed to fetch status"})),
            )
                .into_response()
        }
    }
}

async fn get_health(State(state): State<AppState>) -> Response {
    let health = state.service.get_health().await;
    (StatusCode::OK, Json(health)).into_response()
}
