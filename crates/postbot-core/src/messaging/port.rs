use std::path::Path;

use async_trait::async_trait;

use crate::{
    domain::{ChatId, MessageRef},
    messaging::types::{ChatAction, MessagingCapabilities, ReplyKeyboard},
    Result,
};

/// Cross-messenger port.
///
/// Telegram is the only implementation; handlers talk to this trait so the
/// reply composition can be exercised without a live bot.
#[async_trait]
pub trait MessagingPort: Send + Sync {
    fn capabilities(&self) -> MessagingCapabilities;

    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef>;

    async fn send_html_with_keyboard(
        &self,
        chat_id: ChatId,
        html: &str,
        keyboard: &ReplyKeyboard,
    ) -> Result<MessageRef>;

    /// Upload a local image file. The file must exist until this returns.
    async fn send_photo(
        &self,
        chat_id: ChatId,
        path: &Path,
        caption_html: Option<&str>,
    ) -> Result<MessageRef>;

    async fn send_chat_action(&self, chat_id: ChatId, action: ChatAction) -> Result<()>;
}
