//! Image locator.
//!
//! Finds the image a figurine request should use. Sources are checked in
//! order: the command's inline argument, the quoted message, then the
//! triggering message itself. Within a source, structured image attachments
//! win over references scanned out of raw text.

use crate::image::ImageReference;
use crate::message::{Attachment, ChannelMessage, QuotedMessage};
use figurine_common::util::truncate_with_ellipsis;
use regex::Regex;
use std::sync::LazyLock;

static IMAGE_URL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)https?://[^\s]+?\.(?:jpg|jpeg|png|gif|webp)(?:[?#][^\s]*)?").unwrap()
});

static INLINE_IMAGE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)data:image/[^;\s]+;base64,[A-Za-z0-9+/=]+").unwrap());

/// Where the image locator should look.
#[derive(Debug, Clone, Copy)]
pub struct LocateContext<'a> {
    /// Text following the command name, if any.
    pub argument: Option<&'a str>,
    /// Quoted/replied-to message, if any.
    pub quote: Option<&'a QuotedMessage>,
    /// The triggering message.
    pub message: &'a ChannelMessage,
}

impl<'a> LocateContext<'a> {
    /// Context for a command invocation.
    pub fn for_command(message: &'a ChannelMessage, argument: Option<&'a str>) -> Self {
        Self {
            argument,
            quote: message.quote.as_ref(),
            message,
        }
    }

    /// Context for a follow-up message answering a pending wait.
    pub fn for_message(message: &'a ChannelMessage) -> Self {
        Self::for_command(message, None)
    }
}

/// Which source produced the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSource {
    Argument,
    Quote,
    Message,
}

/// Locate the first image in `ctx`, or `None` when there is nothing to use.
pub fn locate_image(ctx: &LocateContext<'_>) -> Option<ImageReference> {
    locate_with_source(ctx).map(|(image, _)| image)
}

/// Like [`locate_image`], also reporting the source.
pub fn locate_with_source(ctx: &LocateContext<'_>) -> Option<(ImageReference, ImageSource)> {
    let found = ctx
        .argument
        .and_then(scan_text)
        .map(|raw| (raw, ImageSource::Argument))
        .or_else(|| {
            ctx.quote
                .and_then(|q| first_in(&q.attachments, q.text.as_deref()))
                .map(|raw| (raw, ImageSource::Quote))
        })
        .or_else(|| {
            first_in(&ctx.message.attachments, ctx.message.text())
                .or_else(|| content_image(ctx.message))
                .map(|raw| (raw, ImageSource::Message))
        });

    match found {
        Some((raw, source)) => {
            tracing::debug!(
                source = ?source,
                image = %truncate_with_ellipsis(&raw, 100),
                "Located image"
            );
            Some((ImageReference::classify(&raw), source))
        }
        None => {
            tracing::debug!(
                has_argument = ctx.argument.is_some(),
                has_quote = ctx.quote.is_some(),
                attachments = ctx.message.attachments.len(),
                "No image found"
            );
            None
        }
    }
}

fn first_in(attachments: &[Attachment], text: Option<&str>) -> Option<String> {
    attachments
        .iter()
        .find(|a| a.is_image() && !a.url.trim().is_empty())
        .map(|a| a.url.clone())
        .or_else(|| text.and_then(scan_text))
}

fn content_image(message: &ChannelMessage) -> Option<String> {
    match &message.content {
        crate::message::MessageContent::Image { url, .. } => Some(url.clone()),
        _ => None,
    }
}

/// Find the earliest image reference in raw text.
pub fn scan_text(text: &str) -> Option<String> {
    let url = IMAGE_URL_PATTERN.find(text);
    let inline = INLINE_IMAGE_PATTERN.find(text);

    match (url, inline) {
        (Some(u), Some(i)) => Some(if i.start() < u.start() { i } else { u }),
        (Some(m), None) | (None, Some(m)) => Some(m),
        (None, None) => None,
    }
    .map(|m| m.as_str().to_string())
}
