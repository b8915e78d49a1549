//! Logging utilities for the figurine bot.
//!
//! Provides structured logging through `tracing` with either JSON or
//! human-readable output.
//!
//! # Noise Filtering
//!
//! Noisy library modules (hyper, reqwest, h2, rustls, tokio_util) are set to
//! `warn` so business logs stay readable at the configured level.

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Default noisy modules that should be filtered to warn level.
pub const NOISY_MODULES: &[&str] = &["hyper", "hyper_util", "reqwest", "h2", "rustls", "tokio_util"];

/// Targets that belong to the bot itself and go quiet when logging is disabled.
pub const BOT_TARGETS: &[&str] = &["figurine_bot"];

/// Build the filter directives for the given settings.
///
/// `enable_logging = false` silences the bot's own targets without touching
/// the level of everything else, so startup failures still surface.
pub fn build_directives(log_level: &str, enable_logging: bool) -> String {
    let mut directives = String::from(log_level);

    for module in NOISY_MODULES {
        directives.push_str(&format!(",{}=warn", module));
    }

    if !enable_logging {
        for target in BOT_TARGETS {
            directives.push_str(&format!(",{}=off", target));
        }
    }

    directives
}

fn build_filter(log_level: &str, enable_logging: bool) -> EnvFilter {
    // RUST_LOG wins when set
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    EnvFilter::new(build_directives(log_level, enable_logging))
}

/// Initialize logging with the given configuration.
///
/// # Arguments
///
/// * `log_level` - Base log level (trace, debug, info, warn, error)
/// * `log_format` - Output format: "json" for structured JSON, "pretty" for human-readable
/// * `enable_logging` - When false, the bot's own diagnostics are suppressed
pub fn init_logging(log_level: &str, log_format: &str, enable_logging: bool) {
    let filter = build_filter(log_level, enable_logging);

    let subscriber = tracing_subscriber::registry().with(filter);

    if log_format == "json" {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .with_current_span(true)
            .with_target(true)
            .with_file(true)
            .with_line_number(true);
        let _ = subscriber.with(fmt_layer).try_init();
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_ansi(true)
            .with_target(true)
            .with_file(false)
            .with_line_number(false);
        let _ = subscriber.with(fmt_layer).try_init();
    }

    tracing::info!(
        log_level = %log_level,
        log_format = %log_format,
        enable_logging,
        noise_filtered = NOISY_MODULES.len(),
        "Logging initialized"
    );
}

/// Generate a new request ID for correlating one transformation's log lines.
pub fn generate_request_id() -> String {
    uuid::Uuid::new_v4().to_string()[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noisy_modules_list() {
        assert!(NOISY_MODULES.contains(&"hyper"));
        assert!(NOISY_MODULES.contains(&"reqwest"));
    }

    #[test]
    fn test_directives_enabled() {
        let d = build_directives("debug", true);
        assert!(d.starts_with("debug"));
        assert!(d.contains("reqwest=warn"));
        assert!(!d.contains("figurine_bot=off"));
    }

    #[test]
    fn test_directives_disabled_silences_bot() {
        let d = build_directives("info", false);
        assert!(d.contains("figurine_bot=off"));
        assert!(EnvFilter::try_new(&d).is_ok());
    }

    #[test]
    fn test_generate_request_id() {
        let id = generate_request_id();
        assert_eq!(id.len(), 8);
        assert_ne!(id, generate_request_id());
    }
}
