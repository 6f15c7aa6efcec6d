use std::{collections::HashMap, sync::Arc};

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};

use tokio::sync::{Mutex, OwnedMutexGuard};

use postbot_core::{
    config::Config, generation::pipeline::PostPipeline, messaging::port::MessagingPort,
    security::RateLimiter, utils::AuditLogger,
};

use crate::handlers;
use crate::TelegramMessenger;

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub messenger: Arc<dyn MessagingPort>,
    pub pipeline: Arc<PostPipeline>,
    pub rate_limiter: Arc<Mutex<RateLimiter>>,
    pub chat_locks: Arc<ChatLocks>,
    pub audit: Arc<AuditLogger>,
}

impl AppState {
    pub fn new(
        cfg: Arc<Config>,
        messenger: Arc<dyn MessagingPort>,
        pipeline: Arc<PostPipeline>,
    ) -> Self {
        Self {
            rate_limiter: Arc::new(Mutex::new(RateLimiter::new(
                cfg.rate_limit_enabled,
                cfg.rate_limit_requests,
                cfg.rate_limit_window,
            ))),
            chat_locks: Arc::new(ChatLocks::default()),
            audit: Arc::new(AuditLogger::new(
                cfg.audit_log_path.clone(),
                cfg.audit_log_json,
            )),
            cfg,
            messenger,
            pipeline,
        }
    }
}

/// One generation at a time per chat.
#[derive(Default)]
pub struct ChatLocks {
    inner: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl ChatLocks {
    pub async fn lock_chat(&self, chat_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(chat_id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

pub async fn run_polling(cfg: Arc<Config>, pipeline: Arc<PostPipeline>) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.telegram_token.clone());

    match bot.get_me().await {
        Ok(me) => tracing::info!("postbot started: @{}", me.username()),
        Err(e) => tracing::warn!("get_me failed: {e}"),
    }
    tracing::info!("Temp directory: {}", cfg.temp_dir.display());
    if cfg.telegram_allowed_users.is_empty() {
        tracing::info!("Allowed users: everyone");
    } else {
        tracing::info!("Allowed users: {}", cfg.telegram_allowed_users.len());
    }

    let messenger: Arc<dyn MessagingPort> = Arc::new(TelegramMessenger::new(bot.clone()));
    let state = Arc::new(AppState::new(cfg, messenger, pipeline));

    let handler =
        dptree::entry().branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .build()
        .dispatch()
        .await;

    tracing::info!("postbot stopped");
    Ok(())
}
