//! Authentication routes — username/password login and token introspection.

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use courier_common::error::AppError;

use crate::middleware::auth::{AuthUser, encode_jwt};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/auth/login", post(login))
        .route("/auth/me", get(me))
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: &'static str,
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub username: String,
}

fn normalize_username(username: &str) -> String {
    username.trim().to_lowercase()
}

/// POST /auth/login — check credentials against the configured user, return a JWT.
async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let (Some(user), Some(password)) = (&state.config.auth_user, &state.config.auth_password)
    else {
        tracing::warn!("Login attempted but no credentials are configured");
        return Err(AppError::Auth("Invalid username or password".to_string()));
    };

    let username = normalize_username(&req.username);
    if username != normalize_username(user) || req.password != *password {
        tracing::warn!(username = %username, "Rejected login");
        return Err(AppError::Auth("Invalid username or password".to_string()));
    }

    let access_token = encode_jwt(
        &username,
        state.jwt_secret(),
        &state.config.jwt_issuer,
        state.config.jwt_expiry_minutes,
    )?;

    tracing::info!(username = %username, "User logged in");

    Ok(Json(LoginResponse {
        access_token,
        token_type: "Bearer",
    }))
}

/// GET /auth/me — echo the authenticated subject.
async fn me(auth: AuthUser) -> Json<MeResponse> {
    Json(MeResponse {
        username: auth.username,
    })
}
