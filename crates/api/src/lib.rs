//! HTTP ingress for the notification pipeline.
//!
//! Endpoints:
//! - GET  /health
//! - POST /auth/login
//! - GET  /auth/me
//! - POST /api/notifications/email

pub mod middleware;
pub mod routes;
pub mod state;
