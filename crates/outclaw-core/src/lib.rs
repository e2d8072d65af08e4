//! # OutClaw Core
//!
//! Shared foundation for the OutClaw orchestration workspace: configuration,
//! the error type, the serde data model, and the collaborator traits behind
//! which the HTTP controllers, browser automation, and relational store live.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::OutClawConfig;
pub use error::{OutClawError, Result};
