//! Shared application state for the Axum API server.

use courier_common::config::AppConfig;
use courier_common::error::AppError;
use courier_publisher::publisher::NotificationPublisher;

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub publisher: NotificationPublisher,
    pub config: AppConfig,
    jwt_secret: String,
}

impl AppState {
    /// Fails when no JWT secret is configured.
    pub fn new(publisher: NotificationPublisher, config: AppConfig) -> Result<Self, AppError> {
        let jwt_secret = config
            .jwt_secret
            .clone()
            .ok_or_else(|| AppError::Config("JWT_SECRET must be set".to_string()))?;

        Ok(Self {
            publisher,
            config,
            jwt_secret,
        })
    }

    pub fn jwt_secret(&self) -> &str {
        &self.jwt_secret
    }
}
