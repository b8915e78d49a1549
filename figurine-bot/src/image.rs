//! Image references as found in messages, before and after validation.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use figurine_common::util::truncate_with_ellipsis;
use std::fmt;
use std::path::PathBuf;

/// A candidate image in one of the forms a channel can hand us.
#[derive(Clone, PartialEq, Eq)]
pub enum ImageReference {
    /// Publicly resolvable `http(s)` URL.
    RemoteUrl(String),
    /// Decoded `data:image/...;base64,...` payload.
    InlineEncoded { mime: String, data: Vec<u8> },
    /// Local file referenced through a `file://` URL.
    LocalPath(PathBuf),
    /// Anything else; the validator rejects these.
    Unrecognized(String),
}

impl ImageReference {
    /// Classify a raw reference string.
    pub fn classify(raw: &str) -> Self {
        let raw = raw.trim();
        let lower = raw.to_ascii_lowercase();

        if lower.starts_with("http://") || lower.starts_with("https://") {
            return Self::RemoteUrl(raw.to_string());
        }

        if lower.starts_with("data:image/") {
            return Self::parse_data_url(raw).unwrap_or_else(|| Self::Unrecognized(raw.to_string()));
        }

        if let Some(path) = raw.strip_prefix("file://") {
            if !path.is_empty() {
                return Self::LocalPath(PathBuf::from(path));
            }
        }

        Self::Unrecognized(raw.to_string())
    }

    fn parse_data_url(raw: &str) -> Option<Self> {
        let rest = &raw["data:".len()..];
        let (header, payload) = rest.split_once(',')?;
        let mime = header.strip_suffix(";base64")?;
        let data = STANDARD.decode(payload.trim()).ok()?;
        if data.is_empty() {
            return None;
        }
        Some(Self::InlineEncoded {
            mime: mime.to_ascii_lowercase(),
            data,
        })
    }

    /// Re-encode inline bytes as a data URL.
    pub fn data_url(mime: &str, data: &[u8]) -> String {
        format!("data:{mime};base64,{}", STANDARD.encode(data))
    }

    /// The value submitted as the API's `url` parameter.
    ///
    /// `None` for forms the API cannot take directly.
    pub fn request_url(&self) -> Option<String> {
        match self {
            Self::RemoteUrl(url) => Some(url.clone()),
            Self::InlineEncoded { mime, data } => Some(Self::data_url(mime, data)),
            Self::LocalPath(_) | Self::Unrecognized(_) => None,
        }
    }

    pub const fn kind(&self) -> &'static str {
        match self {
            Self::RemoteUrl(_) => "remote_url",
            Self::InlineEncoded { .. } => "inline",
            Self::LocalPath(_) => "local_path",
            Self::Unrecognized(_) => "unrecognized",
        }
    }
}

// Inline payloads can be megabytes; keep log lines short.
impl fmt::Debug for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RemoteUrl(url) => write!(f, "RemoteUrl({})", truncate_with_ellipsis(url, 100)),
            Self::InlineEncoded { mime, data } => {
                write!(f, "InlineEncoded({mime}, {} bytes)", data.len())
            }
            Self::LocalPath(path) => write!(f, "LocalPath({})", path.display()),
            Self::Unrecognized(raw) => {
                write!(f, "Unrecognized({})", truncate_with_ellipsis(raw, 100))
            }
        }
    }
}
