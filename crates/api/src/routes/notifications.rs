//! Notification submit / query routes.

use axum::extract::{Path, Query, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use courier_common::error::AppError;
use courier_common::types::{
    ChannelAttempt, DispatchReceipt, DispatchRequest, Notification, NotificationFilter,
    NotificationKind, NotificationStatus,
};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/notifications", post(submit_notification))
        .route("/api/notifications", get(list_notifications))
        .route("/api/notifications/unread-count", get(unread_count))
        .route("/api/notifications/{id}", get(get_notification))
        .route("/api/notifications/{id}/read", post(mark_read))
        .route("/api/notifications/{id}", delete(delete_notification))
}

/// POST /api/notifications — Submit a notification request.
///
/// Always succeeds unless the store is unreachable; delivery progress is
/// observable through the query endpoints.
async fn submit_notification(
    State(state): State<AppState>,
    Json(request): Json<DispatchRequest>,
) -> Result<Json<DispatchReceipt>, AppError> {
    if request.title.trim().is_empty() {
        return Err(AppError::Validation("title must not be empty".to_string()));
    }

    let receipt = state.engine.dispatch(request).await?;
    Ok(Json(receipt))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    user_id: Uuid,
    kind: Option<NotificationKind>,
    status: Option<NotificationStatus>,
    unread_only: Option<bool>,
    limit: Option<i64>,
}

/// GET /api/notifications — List a user's notifications, newest first.
async fn list_notifications(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Notification>>, AppError> {
    let filter = NotificationFilter {
        kind: query.kind,
        status: query.status,
        unread_only: query.unread_only.unwrap_or(false),
        limit: query.limit,
    };

    let notifications = state.store.list_by_user(query.user_id, &filter).await?;
    Ok(Json(notifications))
}

#[derive(Debug, Deserialize)]
struct UnreadQuery {
    user_id: Uuid,
}

/// GET /api/notifications/unread-count — Unread notifications for a user.
async fn unread_count(
    State(state): State<AppState>,
    Query(query): Query<UnreadQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let count = state.store.unread_count(query.user_id).await?;
    Ok(Json(json!({ "unread": count })))
}

#[derive(Debug, serde::Serialize)]
struct NotificationDetail {
    #[serde(flatten)]
    notification: Notification,
    attempts: Vec<ChannelAttempt>,
}

/// GET /api/notifications/:id — One notification with its per-channel
/// delivery history.
async fn get_notification(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<NotificationDetail>, AppError> {
    let notification = state
        .store
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Notification {} not found", id)))?;
    let attempts = state.store.attempts(id).await?;

    Ok(Json(NotificationDetail {
        notification,
        attempts,
    }))
}

/// POST /api/notifications/:id/read — Mark a notification read.
async fn mark_read(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    if state.store.mark_read(id).await? {
        Ok(Json(json!({"read": true})))
    } else {
        Err(AppError::NotFound(format!("Notification {} not found", id)))
    }
}

/// DELETE /api/notifications/:id — Delete a notification. Any pending retry
/// for it aborts at its next status check.
async fn delete_notification(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    if state.store.delete(id).await? {
        Ok(Json(json!({"deleted": true})))
    } else {
        Err(AppError::NotFound(format!("Notification {} not found", id)))
    }
}
