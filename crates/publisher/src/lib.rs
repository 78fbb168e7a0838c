//! Producer side of the notification pipeline.
//!
//! Validates inbound e-mail requests, wraps them in a [`NotificationMessage`]
//! and hands them to a background task that publishes onto the broker.
//!
//! [`NotificationMessage`]: courier_common::types::NotificationMessage

pub mod email;
pub mod publisher;
