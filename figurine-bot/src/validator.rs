//! Image reference validator.
//!
//! Decides whether a located image can be submitted to the remote API:
//! - Remote URLs pass unless a HEAD probe proves them unusable. A failed
//!   probe allows the image through.
//! - Inline payloads and local files depend on [`InlineImagePolicy`].

use crate::image::ImageReference;
use figurine_common::config::{FigurineConfig, InlineImagePolicy};
use figurine_common::util::{format_bytes, truncate_with_ellipsis};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::Client;
use std::path::Path;
use std::time::Duration;

/// Content types the remote API accepts.
pub const ALLOWED_CONTENT_TYPES: &[&str] = &[
    "image/jpeg",
    "image/jpg",
    "image/png",
    "image/gif",
    "image/webp",
    "image/bmp",
];

const ATTACHMENT_HINT: &str = "请直接发送图片（作为附件），不要粘贴 base64 编码或本地文件路径";

/// Why a reference was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Inline payloads are disabled in this deployment.
    InlineNotAllowed,
    /// Local files are disabled in this deployment.
    LocalFileNotAllowed,
    /// The local file could not be read.
    LocalFileUnreadable,
    /// The probe reported a non-image content type.
    ContentType(String),
    /// The image is larger than the configured bound.
    TooLarge { bytes: u64, limit: u64 },
    /// The image is empty.
    Empty,
    /// Not a form we understand.
    Unsupported,
}

/// A rejected reference with its user-facing explanation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub reason: RejectReason,
    pub message: String,
}

impl Rejection {
    fn new(reason: RejectReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }
}

/// Validation outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    /// Normalized reference ready for submission.
    Accepted(ImageReference),
    Rejected(Rejection),
}

impl Validation {
    pub const fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }
}

/// Validator settings, taken from [`FigurineConfig`].
#[derive(Debug, Clone)]
pub struct ValidatorSettings {
    pub inline_images: InlineImagePolicy,
    pub probe_remote_images: bool,
    pub probe_timeout: Duration,
    pub max_image_bytes: u64,
}

impl From<&FigurineConfig> for ValidatorSettings {
    fn from(config: &FigurineConfig) -> Self {
        Self {
            inline_images: config.inline_images,
            probe_remote_images: config.probe_remote_images,
            probe_timeout: config.probe_timeout(),
            max_image_bytes: config.max_image_bytes(),
        }
    }
}

/// Metadata learned from a HEAD probe.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct ProbeInfo {
    content_type: Option<String>,
    content_length: Option<u64>,
}

/// Image reference validator.
pub struct ImageValidator {
    settings: ValidatorSettings,
    client: Client,
}

impl ImageValidator {
    /// Create a validator with its own HTTP client.
    pub fn new(settings: ValidatorSettings) -> Self {
        let client = Client::builder()
            .timeout(settings.probe_timeout)
            .connect_timeout(settings.probe_timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { settings, client }
    }

    pub fn settings(&self) -> &ValidatorSettings {
        &self.settings
    }

    /// Validate a located reference.
    pub async fn validate(&self, image: ImageReference) -> Validation {
        let outcome = match image {
            ImageReference::RemoteUrl(url) => self.validate_remote(url).await,
            ImageReference::InlineEncoded { mime, data } => self.validate_inline(mime, data),
            ImageReference::LocalPath(path) => self.validate_local(&path).await,
            ImageReference::Unrecognized(raw) => {
                tracing::warn!(image = %truncate_with_ellipsis(&raw, 100), "Unsupported image format");
                Validation::Rejected(Rejection::new(
                    RejectReason::Unsupported,
                    "不支持的图片格式",
                ))
            }
        };

        if let Validation::Rejected(ref rejection) = outcome {
            tracing::info!(reason = ?rejection.reason, "Image rejected");
        }
        outcome
    }

    async fn validate_remote(&self, url: String) -> Validation {
        if !self.settings.probe_remote_images {
            return Validation::Accepted(ImageReference::RemoteUrl(url));
        }

        match self.probe(&url).await {
            Some(info) => match self.check_probe(&info) {
                Some(rejection) => Validation::Rejected(rejection),
                None => Validation::Accepted(ImageReference::RemoteUrl(url)),
            },
            None => Validation::Accepted(ImageReference::RemoteUrl(url)),
        }
    }

    /// HEAD the URL; `None` when nothing could be learned.
    async fn probe(&self, url: &str) -> Option<ProbeInfo> {
        let response = match self.client.head(url).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(
                    url = %truncate_with_ellipsis(url, 100),
                    error = %e,
                    timeout = e.is_timeout(),
                    "Image probe failed, allowing"
                );
                return None;
            }
        };

        if !response.status().is_success() {
            tracing::debug!(status = %response.status(), "Image probe returned non-success, allowing");
            return None;
        }

        let headers = response.headers();
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_ascii_lowercase())
            .filter(|v| !v.is_empty());
        let content_length = headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());

        Some(ProbeInfo {
            content_type,
            content_length,
        })
    }

    fn check_probe(&self, info: &ProbeInfo) -> Option<Rejection> {
        if let Some(ref content_type) = info.content_type {
            if !ALLOWED_CONTENT_TYPES.contains(&content_type.as_str()) {
                return Some(Rejection::new(
                    RejectReason::ContentType(content_type.clone()),
                    format!("链接指向的不是图片（{content_type}），请发送 jpg/png/gif/webp 图片"),
                ));
            }
        }

        if let Some(bytes) = info.content_length {
            return self.check_size(bytes);
        }

        None
    }

    fn check_size(&self, bytes: u64) -> Option<Rejection> {
        let limit = self.settings.max_image_bytes;
        if bytes == 0 {
            return Some(Rejection::new(RejectReason::Empty, "图片内容为空"));
        }
        if bytes > limit {
            return Some(Rejection::new(
                RejectReason::TooLarge { bytes, limit },
                format!(
                    "图片过大（{}），请发送不超过 {} 的图片",
                    format_bytes(bytes),
                    format_bytes(limit)
                ),
            ));
        }
        None
    }

    fn validate_inline(&self, mime: String, data: Vec<u8>) -> Validation {
        if !self.settings.inline_images.allows_inline() {
            return Validation::Rejected(Rejection::new(
                RejectReason::InlineNotAllowed,
                ATTACHMENT_HINT,
            ));
        }

        if let Some(rejection) = self.check_size(data.len() as u64) {
            return Validation::Rejected(rejection);
        }

        Validation::Accepted(ImageReference::InlineEncoded { mime, data })
    }

    async fn validate_local(&self, path: &Path) -> Validation {
        if !self.settings.inline_images.allows_inline() {
            return Validation::Rejected(Rejection::new(
                RejectReason::LocalFileNotAllowed,
                ATTACHMENT_HINT,
            ));
        }

        let data = match tokio::fs::read(path).await {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to read local image");
                return Validation::Rejected(Rejection::new(
                    RejectReason::LocalFileUnreadable,
                    "无法读取本地图片文件",
                ));
            }
        };

        if let Some(rejection) = self.check_size(data.len() as u64) {
            return Validation::Rejected(rejection);
        }

        let mime = mime_from_extension(path);
        tracing::info!(
            path = %path.display(),
            size = data.len(),
            mime,
            "Converted local image to inline payload"
        );
        Validation::Accepted(ImageReference::InlineEncoded {
            mime: mime.to_string(),
            data,
        })
    }
}

/// Mime type for a local file, defaulting to JPEG.
pub fn mime_from_extension(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    match ext.as_deref() {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("bmp") => "image/bmp",
        _ => "image/jpeg",
    }
}
