//! Transformation orchestrator.
//!
//! Drives one figurine request from admission to delivery:
//!
//! ```text
//! Idle → Admitted → Locating → Validating → Submitting → Delivering → Done
//!                      │
//!                      └─ no image → pending wait (Entry B resumes at Validating)
//! ```
//!
//! Each entry is split in two. The admission step (`admit_command`,
//! `admit_message`) touches only the registry and never awaits, so a caller
//! that admits messages in arrival order keeps per-user ordering. `complete`
//! then sends replies and runs the network-bound part.
//!
//! Busy replies, validator rejections and "no image" are ordinary outcomes.
//! Anything unexpected, including a panic in the request path, is caught
//! here, logged, and reported to the user with a generic message. The
//! in-flight marker is held by a drop guard, so no path leaks it.

use futures_util::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

use crate::api::{
    interpret_error, interpret_response, ApiError, FailureKind, TransformApi, TransformationRequest,
    TransformationResult,
};
use crate::command::{FigurineCommand, StyleArg};
use crate::image::ImageReference;
use crate::locator::{locate_image, LocateContext};
use crate::message::{ChannelMessage, OutgoingContent, OutgoingMessage};
use crate::registry::{InFlightToken, SessionRegistry, UserId};
use crate::traits::{ChannelError, Outbound};
use crate::validator::{ImageValidator, Validation};
use figurine_common::config::{FigurineConfig, StyleRange};
use figurine_common::logging::generate_request_id;

pub const BUSY_MESSAGE: &str = "手办化正在处理中，请等待当前任务完成后再试";
pub const PROCESSING_MESSAGE: &str = "正在生成手办化图片，请稍候...";
pub const EXPIRED_MESSAGE: &str = "等待超时，请重新发送指令";
pub const INTERNAL_FAILURE_MESSAGE: &str = "手办化处理失败，请稍后重试";
pub const RESET_DONE_MESSAGE: &str = "已取消当前的手办化任务";
pub const RESET_IDLE_MESSAGE: &str = "当前没有进行中的手办化任务";

/// Unexpected failures inside the request path.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("remote api: {0}")]
    Api(#[from] ApiError),

    #[error("channel: {0}")]
    Channel(#[from] ChannelError),
}

/// Outcome of a command invocation (Entry A).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The user already has a request in flight.
    Busy,
    /// The requested style is outside the configured range.
    InvalidStyle,
    /// No image yet; waiting for a follow-up message.
    AwaitingImage { style: u32 },
    /// The request ran to a terminal outcome.
    Completed(TransformationResult),
    /// Explicit reset.
    Reset { was_active: bool },
    /// The registry is shut down.
    Unavailable,
}

/// Orchestrator timing and style settings.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub wait_timeout: Duration,
    pub cooldown: Duration,
    pub styles: StyleRange,
}

impl From<&FigurineConfig> for OrchestratorSettings {
    fn from(config: &FigurineConfig) -> Self {
        Self {
            wait_timeout: config.wait_timeout(),
            cooldown: config.cooldown(),
            styles: config.styles,
        }
    }
}

/// Releases the in-flight marker it was created for, unless converted into a
/// deferred release.
struct InFlightGuard {
    registry: SessionRegistry,
    user: UserId,
    token: Option<InFlightToken>,
}

impl InFlightGuard {
    fn acquire(registry: &SessionRegistry, user: &UserId) -> Self {
        Self {
            registry: registry.clone(),
            user: user.clone(),
            token: registry.in_flight_token(user),
        }
    }

    fn release_after(mut self, delay: Duration) {
        if let Some(token) = self.token.take() {
            self.registry.release_in_flight_after(&self.user, token, delay);
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            self.registry.end_in_flight_token(&self.user, token);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Command,
    FollowUp,
}

/// Outcome of the synchronous admission step.
///
/// Built without awaiting, so admissions for a user happen in message
/// arrival order. [`Orchestrator::complete`] does the rest. Dropping an
/// admission that holds an in-flight marker releases the marker.
pub struct Admission {
    origin: Origin,
    step: Step,
}

enum Step {
    Reply {
        outcome: CommandOutcome,
        text: String,
    },
    Silent(CommandOutcome),
    Transform {
        guard: InFlightGuard,
        user: UserId,
        style: u32,
        image: ImageReference,
    },
}

impl Admission {
    fn reply(outcome: CommandOutcome, text: impl Into<String>) -> Self {
        Self {
            origin: Origin::Command,
            step: Step::Reply {
                outcome,
                text: text.into(),
            },
        }
    }

    fn silent(outcome: CommandOutcome) -> Self {
        Self {
            origin: Origin::Command,
            step: Step::Silent(outcome),
        }
    }

    /// Whether this admission resumed a pending wait (Entry B).
    pub fn is_follow_up(&self) -> bool {
        self.origin == Origin::FollowUp
    }
}

/// Transformation orchestrator.
pub struct Orchestrator {
    registry: SessionRegistry,
    validator: ImageValidator,
    api: Arc<dyn TransformApi>,
    outbound: Arc<dyn Outbound>,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        registry: SessionRegistry,
        validator: ImageValidator,
        api: Arc<dyn TransformApi>,
        outbound: Arc<dyn Outbound>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            registry,
            validator,
            api,
            outbound,
            settings,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Entry A: a figurine command.
    pub async fn handle_command(
        &self,
        message: &ChannelMessage,
        command: FigurineCommand,
    ) -> CommandOutcome {
        let admission = self.admit_command(message, command);
        self.complete(message, admission).await
    }

    /// Entry B: any other inbound message.
    ///
    /// Returns `None` when the message does not answer a pending wait, which
    /// includes a message without an image; the wait then stays live.
    pub async fn handle_message(&self, message: &ChannelMessage) -> Option<TransformationResult> {
        let admission = self.admit_message(message)?;
        match self.complete(message, admission).await {
            CommandOutcome::Completed(result) => Some(result),
            _ => None,
        }
    }

    /// Registry half of Entry A. Never yields.
    pub fn admit_command(&self, message: &ChannelMessage, command: FigurineCommand) -> Admission {
        match command {
            FigurineCommand::Reset => self.admit_reset(message),
            FigurineCommand::Transform { style, argument } => {
                self.admit_transform(message, &style, argument.as_deref())
            }
        }
    }

    /// Registry half of Entry B. Never yields.
    ///
    /// On a hit the pending wait is consumed here, so a later arrival for the
    /// same user already sees it gone.
    pub fn admit_message(&self, message: &ChannelMessage) -> Option<Admission> {
        let user = UserId::from_message(message);
        if !self.registry.has_pending_wait(&user) {
            return None;
        }

        let image = locate_image(&LocateContext::for_message(message))?;
        let style = self.registry.consume_wait(&user)?;
        let guard = InFlightGuard::acquire(&self.registry, &user);

        Some(Admission {
            origin: Origin::FollowUp,
            step: Step::Transform {
                guard,
                user,
                style,
                image,
            },
        })
    }

    /// Replies, validation, remote call and delivery for an admission.
    pub async fn complete(&self, message: &ChannelMessage, admission: Admission) -> CommandOutcome {
        match admission.step {
            Step::Reply { outcome, text } => {
                self.notify(message, OutgoingContent::text(text)).await;
                outcome
            }
            Step::Silent(outcome) => outcome,
            Step::Transform {
                guard,
                user,
                style,
                image,
            } => CommandOutcome::Completed(self.transform(message, guard, user, style, image).await),
        }
    }

    fn admit_transform(
        &self,
        message: &ChannelMessage,
        style: &StyleArg,
        argument: Option<&str>,
    ) -> Admission {
        let Some(style) = self.resolve_style(style) else {
            let styles = self.settings.styles;
            return Admission::reply(
                CommandOutcome::InvalidStyle,
                format!("风格编号无效，请使用 {}-{} 之间的数字", styles.min, styles.max),
            );
        };

        let user = UserId::from_message(message);
        if !self.registry.try_begin_in_flight(&user) {
            if self.registry.is_shut_down() {
                return Admission::silent(CommandOutcome::Unavailable);
            }
            tracing::info!(user = %user, style, "Rejected command, request already in flight");
            return Admission::reply(CommandOutcome::Busy, BUSY_MESSAGE);
        }

        tracing::info!(user = %user, style, "Figurine requested");

        match locate_image(&LocateContext::for_command(message, argument)) {
            Some(image) => Admission {
                origin: Origin::Command,
                step: Step::Transform {
                    guard: InFlightGuard::acquire(&self.registry, &user),
                    user,
                    style,
                    image,
                },
            },
            None => self.admit_wait(message, user, style),
        }
    }

    fn admit_wait(&self, message: &ChannelMessage, user: UserId, style: u32) -> Admission {
        let ttl = self.settings.wait_timeout;
        let notice = OutgoingMessage::reply(message, OutgoingContent::text(EXPIRED_MESSAGE));
        let outbound = Arc::clone(&self.outbound);
        let on_expire = async move {
            if let Err(e) = outbound.deliver(notice).await {
                tracing::warn!(error = %e, "Failed to send expiry notice");
            }
        };

        if !self.registry.begin_wait(&user, style, ttl, on_expire) {
            self.registry.end_in_flight(&user);
            return Admission::silent(CommandOutcome::Unavailable);
        }

        Admission::reply(
            CommandOutcome::AwaitingImage { style },
            format!(
                "请发送一张图片，我将使用风格{style}进行手办化处理（{}秒内有效）",
                ttl.as_secs()
            ),
        )
    }

    fn admit_reset(&self, message: &ChannelMessage) -> Admission {
        let user = UserId::from_message(message);
        let was_active = self.registry.reset_user(&user);
        let text = if was_active {
            RESET_DONE_MESSAGE
        } else {
            RESET_IDLE_MESSAGE
        };
        Admission::reply(CommandOutcome::Reset { was_active }, text)
    }

    fn resolve_style(&self, style: &StyleArg) -> Option<u32> {
        match style {
            StyleArg::Default => Some(self.settings.styles.min),
            StyleArg::Value(v) if self.settings.styles.contains(*v) => Some(*v),
            StyleArg::Value(_) | StyleArg::Invalid(_) => None,
        }
    }

    /// Validating → Submitting → Delivering, with the in-flight marker held.
    async fn transform(
        &self,
        message: &ChannelMessage,
        guard: InFlightGuard,
        user: UserId,
        style: u32,
        image: ImageReference,
    ) -> TransformationResult {
        let span = tracing::info_span!(
            "figurine",
            request_id = %generate_request_id(),
            user = %user,
            style
        );

        async move {
            let result = match AssertUnwindSafe(self.run(message, &user, style, image))
                .catch_unwind()
                .await
            {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => {
                    tracing::error!(error = %e, "Transformation failed unexpectedly");
                    TransformationResult::failure(
                        FailureKind::InternalUnexpected,
                        INTERNAL_FAILURE_MESSAGE,
                    )
                }
                Err(panic) => {
                    tracing::error!(panic = %panic_message(panic.as_ref()), "Transformation panicked");
                    TransformationResult::failure(
                        FailureKind::InternalUnexpected,
                        INTERNAL_FAILURE_MESSAGE,
                    )
                }
            };

            self.deliver(message, &result).await;

            if result.is_success() {
                guard.release_after(self.settings.cooldown);
            } else {
                drop(guard);
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn run(
        &self,
        message: &ChannelMessage,
        user: &UserId,
        style: u32,
        image: ImageReference,
    ) -> Result<TransformationResult, OrchestratorError> {
        tracing::info!(image = ?image, "Validating image");

        let image = match self.validator.validate(image).await {
            Validation::Accepted(image) => image,
            Validation::Rejected(rejection) => {
                return Ok(TransformationResult::failure(
                    FailureKind::UnsupportedFormat,
                    rejection.message,
                ));
            }
        };

        self.outbound
            .deliver(OutgoingMessage::reply(
                message,
                OutgoingContent::text(PROCESSING_MESSAGE),
            ))
            .await?;

        let request = TransformationRequest {
            user: user.clone(),
            style,
            image,
        };

        match self.api.transform(&request).await {
            Ok(response) => {
                tracing::info!(
                    provider = self.api.provider_name(),
                    code = response.code,
                    request_id = %response.request_id,
                    "API responded"
                );
                Ok(interpret_response(&response))
            }
            Err(e) => match interpret_error(&e) {
                Some(result) => {
                    tracing::warn!(error = %e, "API call failed");
                    Ok(result)
                }
                None => Err(e.into()),
            },
        }
    }

    async fn deliver(&self, message: &ChannelMessage, result: &TransformationResult) {
        match result {
            TransformationResult::Success { image } => {
                tracing::info!(
                    result = %figurine_common::util::truncate_with_ellipsis(image, 50),
                    "Delivering figurine image"
                );
                self.notify(message, OutgoingContent::ImageUrl { url: image.clone() })
                    .await;
            }
            TransformationResult::Failure { kind, message: text } => {
                tracing::info!(kind = ?kind, "Delivering failure");
                self.notify(message, OutgoingContent::text(text.clone())).await;
            }
        }
    }

    /// Send a reply, logging (not propagating) failures.
    async fn notify(&self, message: &ChannelMessage, content: OutgoingContent) {
        if let Err(e) = self
            .outbound
            .deliver(OutgoingMessage::reply(message, content))
            .await
        {
            tracing::warn!(
                channel = message.channel_type_str(),
                message_id = %message.id,
                error = %e,
                "Failed to send reply"
            );
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
