//! Channel preference routes.

use axum::extract::{Path, State};
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use courier_common::error::AppError;
use courier_common::types::{Channel, NotificationKind};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/preferences/{user_id}/{kind}", get(get_preference))
        .route("/api/preferences/{user_id}/{kind}", put(set_preference))
}

#[derive(Debug, Serialize)]
struct PreferenceView {
    user_id: Uuid,
    kind: NotificationKind,
    channels: Vec<Channel>,
    /// False when no record exists and the default (all channels) applies.
    explicit: bool,
}

/// GET /api/preferences/:user_id/:kind — Enabled channels for a user and
/// notification kind; the default is every channel.
async fn get_preference(
    State(state): State<AppState>,
    Path((user_id, kind)): Path<(Uuid, NotificationKind)>,
) -> Result<Json<PreferenceView>, AppError> {
    let recorded = state.preferences.get(user_id, kind).await?;
    let explicit = recorded.is_some();

    Ok(Json(PreferenceView {
        user_id,
        kind,
        channels: recorded.unwrap_or_else(|| Channel::ALL.to_vec()),
        explicit,
    }))
}

#[derive(Debug, Deserialize)]
struct SetPreferenceBody {
    /// May be empty to mute the kind entirely.
    channels: Vec<Channel>,
}

/// PUT /api/preferences/:user_id/:kind — Replace the enabled channel set.
/// Takes effect on the next notification of this kind.
async fn set_preference(
    State(state): State<AppState>,
    Path((user_id, kind)): Path<(Uuid, NotificationKind)>,
    Json(body): Json<SetPreferenceBody>,
) -> Result<Json<PreferenceView>, AppError> {
    state.preferences.set(user_id, kind, &body.channels).await?;

    tracing::info!(
        user_id = %user_id,
        kind = %kind,
        channels = body.channels.len(),
        "Channel preference updated"
    );

    Ok(Json(PreferenceView {
        user_id,
        kind,
        channels: body.channels,
        explicit: true,
    }))
}
