use postbot_core::{
    domain::ChatId,
    messaging::{port::MessagingPort, types::ReplyKeyboard},
    Result,
};

pub const BUTTON_GENERATE: &str = "Генерировать пост";
pub const BUTTON_HELP: &str = "Помощь";

pub const WELCOME_TEXT: &str = "Привет! Я бот для генерации постов с текстом и изображением через Mistral AI.\n\
Возможности:\n\
- Отправь мне промпт (текст), и я сгенерирую пост с текстом и картинкой.\n\
- Используй меню для управления.\n\
Нажми «Генерировать пост» или просто напиши промпт.";

pub const HELP_TEXT: &str = "Инструкция:\n\
- Напиши промпт, например: «Пост о закате на море».\n\
- Я отправлю его в Mistral API и верну текст + изображение.";

pub const ASK_PROMPT_TEXT: &str = "Введите промпт для генерации поста:";

pub const UNKNOWN_COMMAND_TEXT: &str =
    "Неизвестная команда. Используй /help или просто напиши промпт.";

pub const UNAUTHORIZED_TEXT: &str =
    "Доступ запрещён. Обратитесь к владельцу бота, чтобы получить доступ.";

pub const TEXT_ONLY_TEXT: &str = "Я понимаю только текст. Напиши промпт для генерации поста.";

/// What an incoming text asks for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Route {
    Start,
    Help,
    AskPrompt,
    UnknownCommand(String),
    Prompt(String),
}

pub fn main_menu() -> ReplyKeyboard {
    ReplyKeyboard::one_per_row(&[BUTTON_GENERATE, BUTTON_HELP])
}

pub fn route(text: &str) -> Route {
    let trimmed = text.trim();

    if trimmed.starts_with('/') {
        let cmd = command_name(trimmed);
        return match cmd.as_str() {
            "start" => Route::Start,
            "help" => Route::Help,
            _ => Route::UnknownCommand(cmd),
        };
    }

    match trimmed {
        BUTTON_HELP => Route::Help,
        BUTTON_GENERATE => Route::AskPrompt,
        _ => Route::Prompt(trimmed.to_string()),
    }
}

/// Command name without the slash or `@botname` suffix, lowercased.
fn command_name(text: &str) -> String {
    text.split_whitespace()
        .next()
        .unwrap_or("")
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase()
}

/// Reply to anything that is not a prompt. Always re-attaches the menu.
pub async fn reply_with_menu(
    messenger: &dyn MessagingPort,
    chat_id: ChatId,
    text: &str,
) -> Result<()> {
    messenger
        .send_html_with_keyboard(
            chat_id,
            &postbot_core::formatting::escape_html(text),
            &main_menu(),
        )
        .await?;
    Ok(())
}
