//! Notification submission.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;

use courier_common::error::AppError;
use courier_common::types::PublishStatus;
use courier_publisher::email::EmailNotificationRequest;

use crate::middleware::auth::AuthUser;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/notifications/email", post(send_email))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishResponse {
    pub notification_id: String,
    pub status: PublishStatus,
    pub timestamp: DateTime<Utc>,
}

/// POST /api/notifications/email — validate and enqueue. Delivery is asynchronous.
async fn send_email(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<EmailNotificationRequest>,
) -> Result<(StatusCode, Json<PublishResponse>), AppError> {
    let handle = state.publisher.publish_email(&req)?;

    tracing::info!(
        message_id = %handle.id,
        requested_by = %auth.username,
        "Email notification accepted"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(PublishResponse {
            notification_id: handle.id,
            status: PublishStatus::Accepted,
            timestamp: handle.accepted_at,
        }),
    ))
}
