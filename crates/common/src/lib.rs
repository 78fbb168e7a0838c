pub mod broker;
pub mod config;
pub mod error;
pub mod redis_pool;
pub mod streams;
pub mod types;
