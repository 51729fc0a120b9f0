//! # himmi-config
//!
//! Configuration for the gateway. Settings come from `himmi.toml` with
//! environment-variable overrides; production deployments typically set only
//! `DATABASE_URL`, `ENCRYPTION_KEY`, and `REDIS_URL` and leave the file out.

pub mod loader;
pub mod schema;

pub use loader::ConfigLoader;
pub use schema::GatewayConfig;
