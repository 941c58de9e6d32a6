//! CLI command implementations.
//!
//! Each subcommand has its own module with argument definitions and handlers.
//!
//! # Command Modules
//!
//! - [`plan`] - Dry run: per-zoom tile ranges and totals
//! - [`export`] - Run a job, writing every tile to a manifest
//! - [`resume`] - Continue an export from a checkpoint

pub mod common;
pub mod export;
pub mod plan;
pub mod resume;
