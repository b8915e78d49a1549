//! Figurine Bot - per-user figurine image transformation for chat bots.
//!
//! A user invokes the figurine command with an image (attached, quoted, or
//! as a URL argument) or sends the image in a follow-up message. The bot
//! validates the image, submits it to the remote transformation API, and
//! replies with the generated figurine.
//!
//! ## Architecture
//!
//! ```text
//! Channel → FigurineService::dispatch ─┬─ command → Orchestrator (Entry A)
//!                                      └─ other   → Orchestrator (Entry B)
//!                                                      │
//!                    locator → validator → TransformApi → Outbound reply
//!                                                      │
//!                               SessionRegistry (waits, in-flight, timers)
//! ```

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod api;
pub mod cli;
pub mod command;
pub mod image;
pub mod locator;
pub mod message;
pub mod orchestrator;
pub mod registry;
pub mod service;
pub mod traits;
pub mod validator;

// Re-export commonly used types
pub use api::{
    FailureKind, FigurineResponse, TransformApi, TransformationRequest, TransformationResult,
    XxApiClient,
};
pub use cli::CliChannel;
pub use command::{parse_command, FigurineCommand, StyleArg};
pub use image::ImageReference;
pub use locator::{locate_image, LocateContext};
pub use message::{
    Attachment, AttachmentType, ChannelMessage, ChannelType, MessageContent, OutgoingContent,
    OutgoingMessage, QuotedMessage,
};
pub use orchestrator::{CommandOutcome, Orchestrator, OrchestratorSettings};
pub use registry::{SessionRegistry, UserId};
pub use service::{Dispatch, FigurineService};
pub use traits::{Channel, ChannelError, ChannelResult, Outbound};
pub use validator::{ImageValidator, Validation, ValidatorSettings};
