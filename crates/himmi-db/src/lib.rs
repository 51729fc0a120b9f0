//! # himmi-db
//!
//! The persistent store behind the gateway: identity (tenants, users, API
//! keys), the model catalog, atomic credit settlement, request logs, and the
//! credential vault. Production runs on PostgreSQL via [`PgStore`];
//! [`MemStore`] backs tests and simulator-only deployments.

pub mod keys;
pub mod mem;
pub mod models;
pub mod pg;
pub mod store;
pub mod vault;

pub use mem::MemStore;
pub use models::{AuthRecord, NewEvaluationPair, NewRequestLog, RouteTarget};
pub use pg::PgStore;
pub use store::GatewayStore;
pub use vault::Vault;
