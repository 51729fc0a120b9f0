//! # himmi-core
//!
//! Core types for the Himmi inference gateway. This crate defines the shared
//! vocabulary used by every other crate in the workspace: the error taxonomy,
//! chat message types, and token-usage accounting.

pub mod chat;
pub mod error;
pub mod usage;

pub use chat::{ChatMessage, Role};
pub use error::{GatewayError, Result};
pub use usage::Usage;
