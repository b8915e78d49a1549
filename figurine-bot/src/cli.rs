//! CLI channel adapter for interactive terminal sessions.
//!
//! Provides a simple stdin/stdout based channel for local testing. Tokens that
//! start with `file://` become image attachments, so a local picture can be
//! sent along with a command or as the follow-up image.

use crate::message::{Attachment, ChannelMessage, ChannelType, OutgoingContent, OutgoingMessage};
use crate::traits::{Channel, ChannelResult};
use async_trait::async_trait;
use tokio::io::{self, AsyncBufReadExt, BufReader};

/// CLI channel - stdin/stdout, always available.
pub struct CliChannel {
    user_id: String,
}

impl CliChannel {
    /// Create a new CLI channel.
    pub fn new() -> Self {
        Self {
            user_id: "user".to_string(),
        }
    }

    /// Use a specific user ID for inbound messages.
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    /// Turn one input line into a channel message.
    pub fn parse_line(&self, line: &str) -> ChannelMessage {
        let mut text = Vec::new();
        let mut attachments = Vec::new();
        for token in line.split_whitespace() {
            if token.starts_with("file://") {
                attachments.push(Attachment::image(token));
            } else {
                text.push(token);
            }
        }

        let mut msg =
            ChannelMessage::text_message(ChannelType::Cli, "cli", self.user_id.clone(), text.join(" "));
        msg.attachments = attachments;
        msg
    }
}

impl Default for CliChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Channel for CliChannel {
    fn name(&self) -> &'static str {
        "cli"
    }

    async fn init(&mut self) -> ChannelResult<()> {
        Ok(())
    }

    async fn send(&self, message: OutgoingMessage) -> ChannelResult<String> {
        match message.content {
            OutgoingContent::Text { text } => {
                println!("{text}");
            }
            OutgoingContent::ImageUrl { url } => {
                println!("[Image] {url}");
            }
        }
        Ok(uuid::Uuid::new_v4().to_string())
    }

    async fn listen<F>(&self, callback: F) -> ChannelResult<()>
    where
        F: Fn(ChannelMessage) + Send + Sync + 'static,
    {
        let stdin = io::stdin();
        let reader = BufReader::new(stdin);
        let mut lines = reader.lines();

        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if line == "/quit" || line == "/exit" {
                break;
            }

            callback(self.parse_line(line));
        }
        Ok(())
    }

    async fn health_check(&self) -> ChannelResult<()> {
        Ok(())
    }

    async fn shutdown(&self) -> ChannelResult<()> {
        Ok(())
    }
}
