//! Operator tool for inspecting and exercising a backend ring.
//!
//! Provides commands for:
//! - Routing keys to nodes
//! - Inspecting per-node ring ownership
//! - Dry-running topology changes
//! - Probing backends and reporting health

pub mod commands;
pub mod config;

pub use commands::{Command, CommandResult};
pub use config::CliConfig;
