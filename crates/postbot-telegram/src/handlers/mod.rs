//! Telegram update handlers.
//!
//! Every text is routed to a command reply or treated as a prompt; prompts
//! go through the post pipeline and come back as one photo + text reply.

use std::sync::Arc;

use teloxide::{prelude::*, types::Message};

use postbot_core::{
    domain::{ChatId, UserId},
    security::is_authorized,
    utils::AuditEvent,
};

use crate::router::AppState;

pub mod commands;
pub mod prompt;

use commands::{reply_with_menu, route, Route};
use prompt::{handle_prompt, PromptContext};

pub async fn handle_message(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let chat_id = ChatId(msg.chat.id.0);
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let user_id = user.id.0 as i64;
    let username = user
        .username
        .clone()
        .unwrap_or_else(|| "unknown".to_string());

    if !is_authorized(Some(UserId(user_id)), &state.cfg.telegram_allowed_users) {
        tracing::warn!(user_id, %username, "unauthorized user");
        state.audit.record(AuditEvent::unauthorized(user_id, &username));
        let _ = bot
            .send_message(msg.chat.id, commands::UNAUTHORIZED_TEXT)
            .await;
        return Ok(());
    }

    let Some(text) = msg.text() else {
        let _ = reply_with_menu(state.messenger.as_ref(), chat_id, commands::TEXT_ONLY_TEXT).await;
        return Ok(());
    };

    let reply = match route(text) {
        Route::Start => commands::WELCOME_TEXT,
        Route::Help => commands::HELP_TEXT,
        Route::AskPrompt => commands::ASK_PROMPT_TEXT,
        Route::UnknownCommand(cmd) => {
            tracing::debug!(%cmd, "unknown command");
            commands::UNKNOWN_COMMAND_TEXT
        }
        Route::Prompt(prompt) => {
            // Sequentialize generations per chat.
            let _guard = state.chat_locks.lock_chat(chat_id.0).await;
            handle_prompt(
                PromptContext {
                    state: state.clone(),
                    chat_id,
                    user_id,
                    username,
                },
                prompt,
            )
            .await;
            return Ok(());
        }
    };

    if let Err(e) = reply_with_menu(state.messenger.as_ref(), chat_id, reply).await {
        tracing::error!(chat_id = chat_id.0, "failed to send menu reply: {e}");
    }
    Ok(())
}
