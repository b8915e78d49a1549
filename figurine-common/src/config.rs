//! Configuration management for the figurine bot.
//!
//! The bot reads a single JSON file at `~/.figurine/config.json`.
//!
//! # Configuration Priority
//!
//! 1. Environment variables (FIGURINE_* prefix)
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `FIGURINE_API_KEY` → figurine.credential
//! - `FIGURINE_API_ENDPOINT` → figurine.endpoint
//! - `FIGURINE_COOLDOWN_SECS` → figurine.cooldown_secs
//! - `FIGURINE_WAIT_TIMEOUT_SECS` → figurine.wait_timeout_secs
//! - `FIGURINE_API_TIMEOUT_SECS` → figurine.api_timeout_secs
//! - `FIGURINE_MAX_IMAGE_SIZE_MB` → figurine.max_image_size_mb
//! - `FIGURINE_INLINE_IMAGES` → figurine.inline_images (`accept` / `reject`)
//! - `FIGURINE_ENABLE_LOGGING` → figurine.enable_logging
//! - `FIGURINE_LOG_LEVEL` → observability.log_level
//! - `FIGURINE_LOG_FORMAT` → observability.log_format

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, ResultExt};

/// Default remote transformation endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://v2.xxapi.cn/api/generateFigurineImage";

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".figurine"),
        |dirs| dirs.home_dir().join(".figurine"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

// ============================================================================
// Figurine Configuration
// ============================================================================

/// How inline-encoded (`data:image/...;base64,...`) and local-file images are treated.
///
/// The remote API only fetches `url` parameters it can resolve itself, so the
/// default deployment rejects inline payloads and asks for an attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum InlineImagePolicy {
    /// Accept inline payloads and convert local files into inline payloads.
    Accept,
    /// Reject inline payloads and local files.
    #[default]
    Reject,
}

impl InlineImagePolicy {
    pub const fn allows_inline(self) -> bool {
        matches!(self, Self::Accept)
    }
}

impl std::str::FromStr for InlineImagePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "accept" | "allow" => Ok(Self::Accept),
            "reject" | "deny" => Ok(Self::Reject),
            other => Err(format!("unknown inline image policy: {other}")),
        }
    }
}

/// Inclusive range of style selectors the remote API understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleRange {
    #[serde(default = "default_style_min")]
    pub min: u32,
    #[serde(default = "default_style_max")]
    pub max: u32,
}

impl Default for StyleRange {
    fn default() -> Self {
        Self {
            min: default_style_min(),
            max: default_style_max(),
        }
    }
}

impl StyleRange {
    pub const fn contains(&self, style: u32) -> bool {
        style >= self.min && style <= self.max
    }
}

fn default_style_min() -> u32 {
    1
}

fn default_style_max() -> u32 {
    4
}

/// Figurine transformation settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct FigurineConfig {
    /// API credential (the `key` query parameter). Required.
    #[serde(default)]
    pub credential: String,

    /// Remote transformation endpoint.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Delay after a successful transformation before the user may start another one.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    /// How long to wait for a follow-up image after a bare command.
    #[serde(default = "default_wait_timeout_secs")]
    pub wait_timeout_secs: u64,

    /// Remote API call timeout.
    #[serde(default = "default_api_timeout_secs")]
    pub api_timeout_secs: u64,

    /// Inclusive upper bound on image size, in MiB.
    #[serde(default = "default_max_image_size_mb")]
    pub max_image_size_mb: u64,

    /// Probe remote image URLs with a HEAD request before submitting.
    #[serde(default = "default_true")]
    pub probe_remote_images: bool,

    /// HEAD probe timeout.
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,

    /// Inline/local image handling.
    #[serde(default)]
    pub inline_images: InlineImagePolicy,

    /// Accepted style selectors.
    #[serde(default)]
    pub styles: StyleRange,

    /// Emit the bot's own diagnostics.
    #[serde(default = "default_true")]
    pub enable_logging: bool,
}

impl Default for FigurineConfig {
    fn default() -> Self {
        Self {
            credential: String::new(),
            endpoint: default_endpoint(),
            cooldown_secs: default_cooldown_secs(),
            wait_timeout_secs: default_wait_timeout_secs(),
            api_timeout_secs: default_api_timeout_secs(),
            max_image_size_mb: default_max_image_size_mb(),
            probe_remote_images: true,
            probe_timeout_secs: default_probe_timeout_secs(),
            inline_images: InlineImagePolicy::default(),
            styles: StyleRange::default(),
            enable_logging: true,
        }
    }
}

impl fmt::Debug for FigurineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FigurineConfig")
            .field("credential", &redact(&self.credential))
            .field("endpoint", &self.endpoint)
            .field("cooldown_secs", &self.cooldown_secs)
            .field("wait_timeout_secs", &self.wait_timeout_secs)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("max_image_size_mb", &self.max_image_size_mb)
            .field("probe_remote_images", &self.probe_remote_images)
            .field("probe_timeout_secs", &self.probe_timeout_secs)
            .field("inline_images", &self.inline_images)
            .field("styles", &self.styles)
            .field("enable_logging", &self.enable_logging)
            .finish()
    }
}

fn redact(secret: &str) -> &'static str {
    if secret.trim().is_empty() {
        "<unset>"
    } else {
        "<redacted>"
    }
}

impl FigurineConfig {
    /// Whether a non-blank credential is configured.
    pub fn has_credential(&self) -> bool {
        !self.credential.trim().is_empty()
    }

    pub const fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub const fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }

    pub const fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_secs)
    }

    pub const fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    /// Size bound in bytes.
    pub const fn max_image_bytes(&self) -> u64 {
        self.max_image_size_mb.saturating_mul(1024 * 1024)
    }
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_cooldown_secs() -> u64 {
    5
}

fn default_wait_timeout_secs() -> u64 {
    10
}

fn default_api_timeout_secs() -> u64 {
    30
}

fn default_max_image_size_mb() -> u64 {
    10
}

fn default_probe_timeout_secs() -> u64 {
    5
}

fn default_true() -> bool {
    true
}

// ============================================================================
// Observability Configuration
// ============================================================================

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

// ============================================================================
// Root Configuration
// ============================================================================

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Transformation settings
    #[serde(default)]
    pub figurine: FigurineConfig,

    /// Logging settings
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Where a loaded configuration came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Read from this file.
    File(PathBuf),
    /// No file at this path; built-in defaults were used.
    Defaults(PathBuf),
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Defaults(path) => write!(f, "defaults ({} not found)", path.display()),
        }
    }
}

impl Config {
    /// Load configuration from `path`, falling back to defaults when the
    /// file does not exist.
    ///
    /// Nothing is logged here; callers report the source once logging is up.
    pub fn load_or_default(path: &Path) -> Result<(Self, ConfigSource)> {
        if !path.exists() {
            return Ok((Self::default(), ConfigSource::Defaults(path.to_path_buf())));
        }

        let config = Self::load_from(path)?;
        Ok((config, ConfigSource::File(path.to_path_buf())))
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .context(format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .context(format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration with environment variable overrides.
    pub fn load_with_env() -> Result<(Self, ConfigSource)> {
        let (mut config, source) = Self::load_or_default(&config_path())?;
        config.apply_env_overrides();
        Ok((config, source))
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup (environment in production).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let figurine = &mut self.figurine;

        if let Some(key) = lookup("FIGURINE_API_KEY") {
            figurine.credential = key;
        }
        if let Some(endpoint) = lookup("FIGURINE_API_ENDPOINT") {
            figurine.endpoint = endpoint;
        }
        if let Some(v) = lookup("FIGURINE_COOLDOWN_SECS").and_then(|v| v.parse().ok()) {
            figurine.cooldown_secs = v;
        }
        if let Some(v) = lookup("FIGURINE_WAIT_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            figurine.wait_timeout_secs = v;
        }
        if let Some(v) = lookup("FIGURINE_API_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            figurine.api_timeout_secs = v;
        }
        if let Some(v) = lookup("FIGURINE_MAX_IMAGE_SIZE_MB").and_then(|v| v.parse().ok()) {
            figurine.max_image_size_mb = v;
        }
        if let Some(policy) = lookup("FIGURINE_INLINE_IMAGES") {
            match policy.parse() {
                Ok(p) => figurine.inline_images = p,
                Err(e) => tracing::warn!(error = %e, "Ignoring FIGURINE_INLINE_IMAGES"),
            }
        }
        if let Some(v) = lookup("FIGURINE_ENABLE_LOGGING") {
            figurine.enable_logging = matches!(v.to_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Some(level) = lookup("FIGURINE_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        if let Some(format) = lookup("FIGURINE_LOG_FORMAT") {
            self.observability.log_format = format;
        }
    }

    /// Save configuration to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .context(format!("Failed to create {}", parent.display()))?;
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).context(format!("Failed to write config to {}", path.display()))
    }
}
