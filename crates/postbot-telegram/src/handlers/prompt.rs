use std::sync::Arc;
use std::time::Duration;

use postbot_core::{
    domain::{ChatId, UserId},
    errors::Error,
    formatting::{compose_reply, escape_html, ReplyPart},
    generation::types::GeneratedPost,
    messaging::{port::MessagingPort, types::ChatAction},
    utils::{truncate_text, AuditEvent},
    Result,
};

use crate::router::AppState;

const CHAT_ACTION_INTERVAL: Duration = Duration::from_secs(4);

#[derive(Clone)]
pub struct PromptContext {
    pub state: Arc<AppState>,
    pub chat_id: ChatId,
    pub user_id: i64,
    pub username: String,
}

/// Keeps a chat action ("sending photo...") visible while a request runs.
struct ChatActionLoop {
    stop_tx: tokio::sync::oneshot::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

impl ChatActionLoop {
    fn start(messenger: Arc<dyn MessagingPort>, chat_id: ChatId, action: ChatAction) -> Self {
        let (stop_tx, mut stop_rx) = tokio::sync::oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let mut tick = tokio::time::interval(CHAT_ACTION_INTERVAL);
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        let _ = messenger.send_chat_action(chat_id, action).await;
                    }
                    _ = &mut stop_rx => break,
                }
            }
        });
        Self { stop_tx, task }
    }

    async fn stop(self) {
        let _ = self.stop_tx.send(());
        let _ = self.task.await;
    }
}

fn user_error_message(err: &Error) -> String {
    format!(
        "Ошибка: {}. Проверьте API ключ и документацию Mistral.",
        truncate_text(&err.to_string(), 300)
    )
}

/// Generate a post for `prompt` and send it to the chat.
///
/// Failures are reported to the user and the audit log, never propagated.
pub async fn handle_prompt(ctx: PromptContext, prompt: String) {
    let PromptContext {
        state,
        chat_id,
        user_id,
        username,
    } = ctx;
    let messenger = state.messenger.clone();

    let allowed = state.rate_limiter.lock().await.check(UserId(user_id));
    if let Err(wait) = allowed {
        let retry = wait.as_secs_f64();
        tracing::info!(user_id, "rate limited for {retry:.1}s");
        state
            .audit
            .record(AuditEvent::rate_limit(user_id, &username, retry));
        let _ = messenger
            .send_html(
                chat_id,
                &format!("⏳ Слишком много запросов. Подождите {retry:.1} с."),
            )
            .await;
        return;
    }

    tracing::info!(
        user_id,
        chat_id = chat_id.0,
        prompt_chars = prompt.chars().count(),
        "generating post"
    );

    let indicator = ChatActionLoop::start(messenger.clone(), chat_id, ChatAction::UploadPhoto);
    let result = state.pipeline.generate(&prompt).await;
    indicator.stop().await;

    let outcome = match result {
        Ok(post) => {
            if let Some(reason) = &post.image_error {
                tracing::warn!(user_id, "post has no image: {reason}");
            }
            let text = post.text.clone();
            deliver_post(messenger.as_ref(), chat_id, post, &state)
                .await
                .map(|with_image| (text, with_image))
        }
        Err(e) => Err(e),
    };

    match outcome {
        Ok((text, with_image)) => {
            tracing::info!(user_id, with_image, "post delivered");
            state.audit.record(AuditEvent::post(
                user_id, &username, &prompt, &text, with_image,
            ));
        }
        Err(e) => {
            tracing::error!(user_id, chat_id = chat_id.0, "post request failed: {e}");
            let _ = messenger
                .send_html(chat_id, &escape_html(&user_error_message(&e)))
                .await;
            state
                .audit
                .record(AuditEvent::error(user_id, &username, &prompt, &e.to_string()));
        }
    }
}

/// Send a generated post. Takes ownership so the temp image is deleted when
/// this returns, on success and on every error path.
///
/// Returns whether the image reached the chat. A failed photo upload falls
/// back to the text with the missing-image note.
pub async fn deliver_post(
    messenger: &dyn MessagingPort,
    chat_id: ChatId,
    post: GeneratedPost,
    state: &AppState,
) -> Result<bool> {
    let caps = messenger.capabilities();
    let caption_limit = state.cfg.telegram_caption_limit.min(caps.max_caption_len);
    let message_limit = state.cfg.telegram_message_limit.min(caps.max_message_len);

    let with_image = post.image.is_some() && caps.supports_photos;
    let parts = compose_reply(&post.text, with_image, caption_limit, message_limit);

    for part in parts {
        match part {
            ReplyPart::Photo { caption_html } => {
                let Some(image) = post.image.as_ref() else {
                    continue;
                };
                if let Err(e) = messenger
                    .send_photo(chat_id, image.path(), caption_html.as_deref())
                    .await
                {
                    tracing::warn!(chat_id = chat_id.0, "photo send failed, sending text only: {e}");
                    let fallback = compose_reply(&post.text, false, caption_limit, message_limit);
                    send_html_parts(messenger, chat_id, fallback).await?;
                    return Ok(false);
                }
            }
            ReplyPart::Html(html) => {
                messenger.send_html(chat_id, &html).await?;
            }
        }
    }
    Ok(with_image)
}

async fn send_html_parts(
    messenger: &dyn MessagingPort,
    chat_id: ChatId,
    parts: Vec<ReplyPart>,
) -> Result<()> {
    for part in parts {
        if let ReplyPart::Html(html) = part {
            messenger.send_html(chat_id, &html).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{
        path::{Path, PathBuf},
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
    };

    use async_trait::async_trait;
    use postbot_core::{
        config::Config,
        domain::{FileId, MessageId, MessageRef},
        generation::{pipeline::PostPipeline, port::GenerationPort, types::ImageRef},
        messaging::types::{MessagingCapabilities, ReplyKeyboard},
    };

    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    enum Sent {
        Html(String),
        Photo {
            path: PathBuf,
            existed: bool,
            caption: Option<String>,
        },
    }

    #[derive(Default)]
    struct FakeMessenger {
        sent: Mutex<Vec<Sent>>,
        fail_photos: bool,
    }

    impl FakeMessenger {
        fn sent(&self) -> Vec<Sent> {
            self.sent.lock().unwrap().clone()
        }

        fn ok(&self, chat_id: ChatId) -> Result<MessageRef> {
            Ok(MessageRef {
                chat_id,
                message_id: MessageId(1),
            })
        }
    }

    #[async_trait]
    impl MessagingPort for FakeMessenger {
        fn capabilities(&self) -> MessagingCapabilities {
            MessagingCapabilities {
                supports_html: true,
                supports_photos: true,
                max_message_len: 4096,
                max_caption_len: 1024,
            }
        }

        async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef> {
            self.sent.lock().unwrap().push(Sent::Html(html.to_string()));
            self.ok(chat_id)
        }

        async fn send_html_with_keyboard(
            &self,
            chat_id: ChatId,
            html: &str,
            _keyboard: &ReplyKeyboard,
        ) -> Result<MessageRef> {
            self.send_html(chat_id, html).await
        }

        async fn send_photo(
            &self,
            chat_id: ChatId,
            path: &Path,
            caption_html: Option<&str>,
        ) -> Result<MessageRef> {
            self.sent.lock().unwrap().push(Sent::Photo {
                path: path.to_path_buf(),
                existed: path.exists(),
                caption: caption_html.map(str::to_string),
            });
            if self.fail_photos {
                return Err(Error::External("telegram error: PHOTO_INVALID".to_string()));
            }
            self.ok(chat_id)
        }

        async fn send_chat_action(&self, _chat_id: ChatId, _action: ChatAction) -> Result<()> {
            Ok(())
        }
    }

    struct FakeGenerator {
        text: Option<&'static str>,
        image: Option<&'static [u8]>,
        calls: AtomicUsize,
    }

    impl FakeGenerator {
        fn new(text: Option<&'static str>, image: Option<&'static [u8]>) -> Self {
            Self {
                text,
                image,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl GenerationPort for FakeGenerator {
        async fn complete_text(&self, _prompt: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.text
                .map(str::to_string)
                .ok_or_else(|| Error::External("mistral chat completion failed: 401".to_string()))
        }

        async fn generate_image(&self, _prompt: &str) -> Result<ImageRef> {
            match self.image {
                Some(_) => Ok(ImageRef {
                    file_id: FileId("f".to_string()),
                    file_type: Some("png".to_string()),
                }),
                None => Err(Error::External("agent returned no image".to_string())),
            }
        }

        async fn download_file(&self, _file_id: &FileId) -> Result<Vec<u8>> {
            Ok(self.image.unwrap_or_default().to_vec())
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        temp_dir: PathBuf,
        audit_path: PathBuf,
        messenger: Arc<FakeMessenger>,
        generator: Arc<FakeGenerator>,
        state: Arc<AppState>,
    }

    fn harness(generator: FakeGenerator, messenger: FakeMessenger, requests: &str) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let temp_dir = dir.path().join("tmp");
        std::fs::create_dir_all(&temp_dir).unwrap();
        let audit_path = dir.path().join("audit.log");

        let vars = [
            ("TELEGRAM_TOKEN", "t".to_string()),
            ("MISTRAL_API_KEY", "k".to_string()),
            ("TEMP_DIR", temp_dir.display().to_string()),
            ("AUDIT_LOG_PATH", audit_path.display().to_string()),
            ("AUDIT_LOG_JSON", "true".to_string()),
            ("RATE_LIMIT_REQUESTS", requests.to_string()),
        ];
        let cfg = Config::from_lookup(|k| {
            vars.iter()
                .find(|(key, _)| *key == k)
                .map(|(_, v)| v.clone())
        })
        .unwrap();

        let messenger = Arc::new(messenger);
        let generator = Arc::new(generator);
        let pipeline = Arc::new(PostPipeline::new(generator.clone(), temp_dir.clone()));
        let state = Arc::new(AppState::new(
            Arc::new(cfg),
            messenger.clone(),
            pipeline,
        ));

        Harness {
            _dir: dir,
            temp_dir,
            audit_path,
            messenger,
            generator,
            state,
        }
    }

    fn ctx(h: &Harness) -> PromptContext {
        PromptContext {
            state: h.state.clone(),
            chat_id: ChatId(10),
            user_id: 7,
            username: "alice".to_string(),
        }
    }

    fn audit_events(h: &Harness) -> Vec<serde_json::Value> {
        std::fs::read_to_string(&h.audit_path)
            .unwrap_or_default()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn sends_single_photo_with_caption_and_cleans_up() {
        let h = harness(
            FakeGenerator::new(Some("**Закат** над морем"), Some(b"\x89PNG")),
            FakeMessenger::default(),
            "5",
        );

        handle_prompt(ctx(&h), "закат".to_string()).await;

        let sent = h.messenger.sent();
        assert_eq!(sent.len(), 1);
        let Sent::Photo {
            path,
            existed,
            caption,
        } = &sent[0]
        else {
            panic!("expected photo, got {sent:?}");
        };
        assert!(existed);
        assert!(!path.exists());
        assert_eq!(caption.as_deref(), Some("<b>Закат</b> над морем"));
        assert_eq!(std::fs::read_dir(&h.temp_dir).unwrap().count(), 0);

        let events = audit_events(&h);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["event"], "post");
        assert_eq!(events[0]["with_image"], true);
    }

    #[tokio::test]
    async fn text_only_reply_when_image_fails() {
        let h = harness(
            FakeGenerator::new(Some("Просто текст"), None),
            FakeMessenger::default(),
            "5",
        );

        handle_prompt(ctx(&h), "x".to_string()).await;

        let sent = h.messenger.sent();
        assert_eq!(sent.len(), 1);
        let Sent::Html(html) = &sent[0] else {
            panic!("expected html, got {sent:?}");
        };
        assert!(html.starts_with("Просто текст"));
        assert!(html.contains("Изображение не сгенерировано"));
        assert_eq!(audit_events(&h)[0]["with_image"], false);
    }

    #[tokio::test]
    async fn text_failure_reports_error() {
        let h = harness(
            FakeGenerator::new(None, Some(b"img")),
            FakeMessenger::default(),
            "5",
        );

        handle_prompt(ctx(&h), "x".to_string()).await;

        let sent = h.messenger.sent();
        assert_eq!(sent.len(), 1);
        let Sent::Html(html) = &sent[0] else {
            panic!("expected html, got {sent:?}");
        };
        assert!(html.starts_with("Ошибка: external error: mistral chat completion failed: 401"));
        assert!(html.ends_with("Проверьте API ключ и документацию Mistral."));
        assert_eq!(audit_events(&h)[0]["event"], "error");
    }

    #[tokio::test]
    async fn failed_photo_upload_falls_back_to_text() {
        let h = harness(
            FakeGenerator::new(Some("t"), Some(b"img")),
            FakeMessenger {
                fail_photos: true,
                ..Default::default()
            },
            "5",
        );

        handle_prompt(ctx(&h), "x".to_string()).await;

        let sent = h.messenger.sent();
        assert_eq!(sent.len(), 2);
        let Sent::Photo { path, existed, .. } = &sent[0] else {
            panic!("expected photo, got {sent:?}");
        };
        assert!(existed);
        assert!(!path.exists());
        let Sent::Html(html) = &sent[1] else {
            panic!("expected html, got {sent:?}");
        };
        assert!(html.starts_with("t\n"), "{html}");
        assert!(html.contains("Изображение не сгенерировано"));
        assert_eq!(std::fs::read_dir(&h.temp_dir).unwrap().count(), 0);

        let events = audit_events(&h);
        assert_eq!(events[0]["event"], "post");
        assert_eq!(events[0]["with_image"], false);
    }

    #[tokio::test]
    async fn long_post_is_photo_then_text() {
        let long: &'static str = Box::leak("слово ".repeat(300).into_boxed_str());
        let h = harness(
            FakeGenerator::new(Some(long), Some(b"img")),
            FakeMessenger::default(),
            "5",
        );

        handle_prompt(ctx(&h), "x".to_string()).await;

        let sent = h.messenger.sent();
        assert!(matches!(&sent[0], Sent::Photo { caption: None, .. }));
        assert!(sent.len() >= 2);
        assert!(sent[1..].iter().all(|s| matches!(s, Sent::Html(_))));
    }

    #[tokio::test]
    async fn rate_limited_prompt_skips_generation() {
        let h = harness(
            FakeGenerator::new(Some("t"), None),
            FakeMessenger::default(),
            "1",
        );

        handle_prompt(ctx(&h), "one".to_string()).await;
        handle_prompt(ctx(&h), "two".to_string()).await;

        assert_eq!(h.generator.calls.load(Ordering::SeqCst), 1);
        let sent = h.messenger.sent();
        assert!(matches!(sent.last(), Some(Sent::Html(html)) if html.starts_with("⏳")));
        let events = audit_events(&h);
        assert_eq!(events.last().unwrap()["event"], "rate_limit");
    }
}
