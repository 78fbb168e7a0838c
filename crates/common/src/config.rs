use std::time::Duration;

use serde::Deserialize;

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Redis connection string (the broker backend)
    pub redis_url: String,

    /// Stream that carries notifications from the API to the notifier
    pub notification_topic: String,

    /// Stream that receives dead-lettered notifications
    pub dlq_topic: String,

    /// Consumer group shared by all notifier workers
    pub consumer_group: String,

    /// Base consumer name; workers append their index
    pub consumer_name: String,

    /// Number of concurrent consumer workers (default: 1)
    pub consumer_workers: usize,

    /// Maximum processing attempts per message, including the first (default: 3)
    pub retry_max_attempts: u32,

    /// Fixed pause between failed attempts in milliseconds (default: 300)
    pub retry_backoff_ms: u64,

    /// Port the HTTP API binds to
    pub api_port: u16,

    /// HMAC secret for JWT signing. Required by the API, unused by the notifier.
    pub jwt_secret: Option<String>,

    /// JWT issuer claim, validated on every request
    pub jwt_issuer: String,

    /// JWT lifetime in minutes
    pub jwt_expiry_minutes: u64,

    /// Login username; login is disabled when unset
    pub auth_user: Option<String>,

    /// Login password
    pub auth_password: Option<String>,

    /// Delivery webhook. When unset the notifier only logs notifications.
    pub webhook_url: Option<String>,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let config = Self {
            redis_url: var("REDIS_URL", "redis://localhost:6379"),
            notification_topic: var("NOTIFICATION_TOPIC", "notifications.email"),
            dlq_topic: var("DLQ_TOPIC", "notifications.email.dlq"),
            consumer_group: var("CONSUMER_GROUP", "notification-consumer"),
            consumer_name: var("CONSUMER_NAME", "notifier"),
            consumer_workers: var("CONSUMER_WORKERS", "1")
                .parse()
                .map_err(|_| anyhow::anyhow!("CONSUMER_WORKERS must be a valid usize"))?,
            retry_max_attempts: var("RETRY_MAX_ATTEMPTS", "3")
                .parse()
                .map_err(|_| anyhow::anyhow!("RETRY_MAX_ATTEMPTS must be a valid u32"))?,
            retry_backoff_ms: var("RETRY_BACKOFF_MS", "300")
                .parse()
                .map_err(|_| anyhow::anyhow!("RETRY_BACKOFF_MS must be a valid u64"))?,
            api_port: var("API_PORT", "3000")
                .parse()
                .map_err(|_| anyhow::anyhow!("API_PORT must be a valid u16"))?,
            jwt_secret: lookup("JWT_SECRET").filter(|s| !s.is_empty()),
            jwt_issuer: var("JWT_ISSUER", "courier-api"),
            jwt_expiry_minutes: var("JWT_EXPIRY_MINUTES", "60")
                .parse()
                .map_err(|_| anyhow::anyhow!("JWT_EXPIRY_MINUTES must be a valid u64"))?,
            auth_user: lookup("AUTH_USER"),
            auth_password: lookup("AUTH_PASSWORD"),
            webhook_url: lookup("WEBHOOK_URL").filter(|s| !s.is_empty()),
        };

        if config.retry_max_attempts < 1 {
            anyhow::bail!("RETRY_MAX_ATTEMPTS must be at least 1");
        }
        if config.consumer_workers < 1 {
            anyhow::bail!("CONSUMER_WORKERS must be at least 1");
        }

        Ok(config)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}
