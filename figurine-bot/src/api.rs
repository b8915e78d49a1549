//! Remote figurine transformation API.
//!
//! One GET call with `style`, `url` and `key` query parameters. The response
//! body is always JSON:
//!
//! ```json
//! {"code": 200, "msg": "数据请求成功", "data": "https://...", "request_id": "..."}
//! ```
//!
//! `code == 200` with a non-empty `data` is the only success.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::image::ImageReference;
use crate::registry::UserId;

/// One transformation request, alive for a single orchestrator run.
#[derive(Debug, Clone)]
pub struct TransformationRequest {
    pub user: UserId,
    pub style: u32,
    pub image: ImageReference,
}

/// Response payload of the remote API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FigurineResponse {
    pub code: i64,
    #[serde(default)]
    pub msg: String,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub request_id: String,
}

/// Remote API errors that prevented reading a response payload.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Image reference cannot be submitted: {0}")]
    UnsubmittableImage(&'static str),
}

/// Remote transformation service.
#[async_trait]
pub trait TransformApi: Send + Sync {
    /// Submit one request and return the decoded payload.
    async fn transform(&self, request: &TransformationRequest) -> Result<FigurineResponse, ApiError>;

    /// Provider name for logs.
    fn provider_name(&self) -> &str;
}

/// Client for the xxapi figurine endpoint.
pub struct XxApiClient {
    endpoint: String,
    credential: String,
    timeout: Duration,
    client: Client,
}

impl XxApiClient {
    /// Create a new client.
    ///
    /// # Arguments
    /// * `endpoint` - Full endpoint URL
    /// * `credential` - API key sent as the `key` parameter
    /// * `timeout` - Whole-request timeout
    pub fn new(endpoint: impl Into<String>, credential: impl Into<String>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            credential: credential.into(),
            timeout,
            client: Client::builder()
                .timeout(timeout)
                .connect_timeout(Duration::from_secs(10).min(timeout))
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }
}

#[async_trait]
impl TransformApi for XxApiClient {
    async fn transform(&self, request: &TransformationRequest) -> Result<FigurineResponse, ApiError> {
        let url = request
            .image
            .request_url()
            .ok_or(ApiError::UnsubmittableImage(request.image.kind()))?;

        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("style", request.style.to_string()),
                ("url", url),
                ("key", self.credential.clone()),
            ])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ApiError::Timeout(self.timeout)
                } else {
                    ApiError::Transport(e.without_url().to_string())
                }
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                ApiError::Timeout(self.timeout)
            } else {
                ApiError::Transport(e.without_url().to_string())
            }
        })?;

        // Error statuses often still carry the JSON envelope.
        match serde_json::from_str::<FigurineResponse>(&body) {
            Ok(parsed) => Ok(parsed),
            Err(_) if !status.is_success() => Err(ApiError::Status {
                status: status.as_u16(),
                body: figurine_common::util::truncate_with_ellipsis(&body, 200),
            }),
            Err(e) => Err(ApiError::Decode(e.to_string())),
        }
    }

    fn provider_name(&self) -> &str {
        "xxapi"
    }
}

/// Failure categories reported to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    UnsupportedFormat,
    RemoteTransport,
    RemoteRejected { code: i64 },
    EmptyResult,
    InternalUnexpected,
}

/// Terminal outcome of one transformation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformationResult {
    /// Result image (URL or data URL) ready for re-delivery.
    Success { image: String },
    Failure { kind: FailureKind, message: String },
}

impl TransformationResult {
    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        Self::Failure {
            kind,
            message: message.into(),
        }
    }

    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { kind, .. } => Some(*kind),
        }
    }
}

/// Documented non-success codes and what to tell the user.
pub const REJECTION_MESSAGES: &[(i64, &str)] = &[
    (-1, "请求参数有误，请检查风格编号后重试"),
    (-2, "图片链接无效，可能不是图片的直链地址"),
    (-3, "图片未通过内容或尺寸审核，请换一张图片"),
    (-4, "接口调用次数已用尽，请稍后再试"),
    (-5, "图片下载失败，请确认图片可以公开访问"),
    (-8, "API 密钥无效或已过期，请联系管理员检查密钥配置"),
];

pub const TRANSPORT_FAILURE_MESSAGE: &str = "手办化请求超时或网络异常，可能是图片过大或网络较慢，请稍后重试";
pub const EMPTY_RESULT_MESSAGE: &str = "手办化失败: 未获取到生成图片";

/// User-facing text for a non-success code.
pub fn rejection_message(code: i64, server_msg: &str) -> String {
    if let Some((_, message)) = REJECTION_MESSAGES.iter().find(|(c, _)| *c == code) {
        return format!("手办化失败: {message}");
    }
    let server_msg = server_msg.trim();
    if server_msg.is_empty() {
        format!("手办化失败: 错误码 {code}")
    } else {
        format!("手办化失败: {server_msg}")
    }
}

/// Interpret a decoded API payload.
pub fn interpret_response(response: &FigurineResponse) -> TransformationResult {
    if response.code != 200 {
        return TransformationResult::failure(
            FailureKind::RemoteRejected {
                code: response.code,
            },
            rejection_message(response.code, &response.msg),
        );
    }

    match response.data.as_deref().map(str::trim) {
        Some(data) if !data.is_empty() => TransformationResult::Success {
            image: data.to_string(),
        },
        _ => TransformationResult::failure(FailureKind::EmptyResult, EMPTY_RESULT_MESSAGE),
    }
}

/// Map a transport-level error to a terminal outcome.
///
/// `Decode` is not handled here; callers treat it as unexpected.
pub fn interpret_error(error: &ApiError) -> Option<TransformationResult> {
    match error {
        ApiError::Timeout(_) | ApiError::Transport(_) => Some(TransformationResult::failure(
            FailureKind::RemoteTransport,
            TRANSPORT_FAILURE_MESSAGE,
        )),
        ApiError::Status { status, .. } => Some(TransformationResult::failure(
            FailureKind::RemoteRejected {
                code: i64::from(*status),
            },
            rejection_message(i64::from(*status), &format!("服务暂时不可用 (HTTP {status})")),
        )),
        ApiError::UnsubmittableImage(_) => Some(TransformationResult::failure(
            FailureKind::UnsupportedFormat,
            "不支持的图片格式",
        )),
        ApiError::Decode(_) => None,
    }
}
