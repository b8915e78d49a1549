//! Configuration validation for the figurine bot.
//!
//! Ensures the credential is present and every numeric setting is within
//! a usable range before the bot activates.

use thiserror::Error;

use crate::config::{Config, FigurineConfig, ObservabilityConfig};

/// Configuration validation error.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Multiple validation errors: {0:?}")]
    Multiple(Vec<ValidationError>),
}

impl ValidationError {
    /// Whether this error (or any nested error) concerns the given field.
    pub fn mentions(&self, name: &str) -> bool {
        match self {
            Self::MissingField { field } | Self::InvalidValue { field, .. } => field == name,
            Self::Multiple(errors) => errors.iter().any(|e| e.mentions(name)),
        }
    }
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Trait for validatable configuration sections.
pub trait Validate {
    /// Validate this configuration section.
    fn validate(&self) -> ValidationResult<()>;
}

impl Config {
    /// Validate the entire configuration.
    pub fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = self.figurine.validate() {
            errors.push(e);
        }

        if let Err(e) = self.observability.validate() {
            errors.push(e);
        }

        collect(errors)
    }
}

fn collect(mut errors: Vec<ValidationError>) -> ValidationResult<()> {
    if errors.is_empty() {
        Ok(())
    } else if errors.len() == 1 {
        Err(errors.remove(0))
    } else {
        Err(ValidationError::Multiple(errors))
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ValidationError {
    ValidationError::InvalidValue {
        field: field.into(),
        reason: reason.into(),
    }
}

impl Validate for FigurineConfig {
    fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if !self.has_credential() {
            errors.push(ValidationError::MissingField {
                field: "figurine.credential".into(),
            });
        }

        if url::Url::parse(&self.endpoint).is_err() {
            errors.push(invalid("figurine.endpoint", "must be an absolute URL"));
        }

        if !(1..=60).contains(&self.cooldown_secs) {
            errors.push(invalid("figurine.cooldown_secs", "must be between 1 and 60"));
        }

        if self.wait_timeout_secs == 0 {
            errors.push(invalid("figurine.wait_timeout_secs", "must be greater than 0"));
        }

        if self.api_timeout_secs == 0 {
            errors.push(invalid("figurine.api_timeout_secs", "must be greater than 0"));
        }

        if self.max_image_size_mb == 0 {
            errors.push(invalid("figurine.max_image_size_mb", "must be greater than 0"));
        }

        if self.probe_remote_images && self.probe_timeout_secs == 0 {
            errors.push(invalid(
                "figurine.probe_timeout_secs",
                "must be greater than 0 when probing is enabled",
            ));
        }

        if self.styles.min == 0 || self.styles.min > self.styles.max {
            errors.push(invalid(
                "figurine.styles",
                format!(
                    "expected 1 <= min <= max, got {}..={}",
                    self.styles.min, self.styles.max
                ),
            ));
        }

        collect(errors)
    }
}

impl Validate for ObservabilityConfig {
    fn validate(&self) -> ValidationResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(invalid(
                "observability.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.log_format.to_lowercase().as_str()) {
            return Err(invalid(
                "observability.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        Ok(())
    }
}
