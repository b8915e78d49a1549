//! Message types for channel communication.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Channel type enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    Qq,
    Cli,
}

impl ChannelType {
    /// Get the channel type as a string.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Qq => "qq",
            Self::Cli => "cli",
        }
    }
}

/// Unified message format for all channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMessage {
    /// Message ID (channel-specific)
    pub id: String,
    /// Channel type
    pub channel_type: ChannelType,
    /// Channel-specific identifier (chat ID, group ID, etc.)
    pub channel_id: String,
    /// User identifier
    pub user_id: String,
    /// Message content
    pub content: MessageContent,
    /// Attachments (images, files, etc.)
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// The message this one quotes or replies to
    #[serde(default)]
    pub quote: Option<QuotedMessage>,
    /// Additional metadata
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Timestamp (Unix millis)
    pub timestamp: i64,
}

/// A quoted or replied-to message as delivered by the channel.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuotedMessage {
    /// Quoted message ID, when the channel exposes it
    #[serde(default)]
    pub id: Option<String>,
    /// Raw text of the quoted message
    #[serde(default)]
    pub text: Option<String>,
    /// Attachments of the quoted message
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

/// Message content types.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MessageContent {
    /// Plain text message
    Text { text: String },
    /// Image message
    Image {
        url: String,
        caption: Option<String>,
    },
    /// File/document message
    File {
        url: String,
        filename: String,
        mime_type: Option<String>,
    },
}

/// Attachment types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    /// Attachment type
    pub attachment_type: AttachmentType,
    /// URL, data URL or `file://` path
    pub url: String,
    /// Filename
    pub filename: Option<String>,
    /// MIME type
    pub mime_type: Option<String>,
    /// Size in bytes
    pub size_bytes: Option<u64>,
}

impl Attachment {
    /// Image attachment with only a URL.
    pub fn image(url: impl Into<String>) -> Self {
        Self {
            attachment_type: AttachmentType::Image,
            url: url.into(),
            filename: None,
            mime_type: None,
            size_bytes: None,
        }
    }

    pub fn is_image(&self) -> bool {
        self.attachment_type == AttachmentType::Image
    }
}

/// Attachment type enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentType {
    Image,
    Audio,
    Video,
    Document,
    Other,
}

/// Outgoing message to send to a channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutgoingMessage {
    /// Target channel type
    pub channel_type: ChannelType,
    /// Target channel ID
    pub channel_id: String,
    /// Reply to message ID (optional)
    pub reply_to: Option<String>,
    /// Message content
    pub content: OutgoingContent,
}

impl OutgoingMessage {
    /// Build a reply to `message` in the same conversation.
    pub fn reply(message: &ChannelMessage, content: OutgoingContent) -> Self {
        Self {
            channel_type: message.channel_type,
            channel_id: message.channel_id.clone(),
            reply_to: Some(message.id.clone()),
            content,
        }
    }
}

/// Outgoing message content.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutgoingContent {
    /// Plain text
    Text { text: String },
    /// Image the channel fetches itself (URL or data URL)
    ImageUrl { url: String },
}

impl OutgoingContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }

    pub const fn is_image(&self) -> bool {
        matches!(self, Self::ImageUrl { .. })
    }
}

impl ChannelMessage {
    /// Build a text message, mostly for channel adapters and tests.
    pub fn text_message(
        channel_type: ChannelType,
        channel_id: impl Into<String>,
        user_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            channel_type,
            channel_id: channel_id.into(),
            user_id: user_id.into(),
            content: MessageContent::Text { text: text.into() },
            attachments: vec![],
            quote: None,
            metadata: HashMap::new(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Attach an image (builder style).
    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Attach a quoted message (builder style).
    pub fn with_quote(mut self, quote: QuotedMessage) -> Self {
        self.quote = Some(quote);
        self
    }

    /// Get the text content if this is a text message.
    pub fn text(&self) -> Option<&str> {
        match &self.content {
            MessageContent::Text { text } => Some(text),
            MessageContent::Image { caption, .. } => caption.as_deref(),
            MessageContent::File { .. } => None,
        }
    }

    /// Get the channel type as a string.
    pub fn channel_type_str(&self) -> &'static str {
        self.channel_type.as_str()
    }

    /// Check if this is an image message.
    pub const fn is_image(&self) -> bool {
        matches!(self.content, MessageContent::Image { .. })
    }
}
