//! Telegram implementation of the dispatcher's reply side

use crate::download::dispatcher::MediaReply;
use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;
use teloxide::prelude::*;
use teloxide::types::InputFile;

/// Replies into one Telegram chat
pub struct TelegramReply {
    bot: Bot,
    chat_id: ChatId,
}

impl TelegramReply {
    /// Bind a reply channel to `chat_id`
    #[must_use]
    pub const fn new(bot: Bot, chat_id: ChatId) -> Self {
        Self { bot, chat_id }
    }
}

#[async_trait]
impl MediaReply for TelegramReply {
    async fn send_text(&self, text: &str) -> Result<()> {
        self.bot.send_message(self.chat_id, text).await?;
        Ok(())
    }

    async fn send_video(&self, path: &Path, caption: &str) -> Result<()> {
        self.bot
            .send_video(self.chat_id, InputFile::file(path))
            .caption(caption)
            .supports_streaming(true)
            .await?;
        Ok(())
    }

    async fn send_document(&self, path: &Path, caption: &str) -> Result<()> {
        self.bot
            .send_document(self.chat_id, InputFile::file(path))
            .caption(caption)
            .await?;
        Ok(())
    }
}
