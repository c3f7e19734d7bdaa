//! Kiln Core - Core library for the Kiln build tool
//!
//! This crate provides the foundational error types, configuration,
//! and the shared run context consulted by task actions.

pub mod config;
pub mod context;
pub mod error;

pub use config::{Config, RunConfig, TaskConfig};
pub use context::{IncrementalState, RunContext};
pub use error::{ConfigError, KilnError, Result};
