//! Figurine Common - Shared configuration, errors and logging for the figurine bot.
//!
//! This crate provides:
//! - Configuration types and loading
//! - Configuration validation
//! - Error types and handling utilities
//! - Logging setup
//! - Small string utilities used in diagnostics

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod logging;
pub mod util;
pub mod validation;

pub use config::{Config, ConfigSource, FigurineConfig, InlineImagePolicy, ObservabilityConfig, StyleRange};
pub use error::{Error, Result};
pub use validation::{Validate, ValidationError, ValidationResult};
