//! Mistral adapter (text completion + image agent + file download).
//!
//! Implements the `postbot-core` GenerationPort over the Mistral REST API:
//! `chat/completions` for the post text, an agent with the built-in
//! `image_generation` tool for the picture, and `files/{id}/content` to fetch
//! the generated bytes.

use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::OnceCell;

use postbot_core::{
    config::Config,
    domain::FileId,
    errors::Error,
    generation::{port::GenerationPort, types::ImageRef},
    utils::truncate_text,
    Result,
};

pub mod types;

use types::{
    AgentResponse, AgentTool, ChatCompletionRequest, ChatCompletionResponse, ChatMessage,
    ContentChunk, ConversationRequest, ConversationResponse, CreateAgentRequest,
};

const AGENT_NAME: &str = "Post illustrator";
const AGENT_DESCRIPTION: &str = "Draws an illustration for a social media post";
const AGENT_INSTRUCTIONS: &str = "Ты иллюстратор постов. На каждый запрос сгенерируй ровно одно \
изображение с помощью инструмента генерации изображений. Не добавляй текст на изображение.";

#[derive(Clone, Debug)]
pub struct MistralConfig {
    pub api_key: String,
    pub base_url: String,
    pub text_model: String,
    pub agent_model: String,
    /// Pre-made agent; when unset one is created on first use.
    pub agent_id: Option<String>,
    pub timeout: Duration,
}

impl From<&Config> for MistralConfig {
    fn from(cfg: &Config) -> Self {
        Self {
            api_key: cfg.mistral_api_key.clone(),
            base_url: cfg.mistral_base_url.clone(),
            text_model: cfg.mistral_text_model.clone(),
            agent_model: cfg.mistral_agent_model.clone(),
            agent_id: cfg.mistral_agent_id.clone(),
            timeout: cfg.mistral_timeout,
        }
    }
}

#[derive(Debug)]
pub struct MistralClient {
    cfg: MistralConfig,
    http: reqwest::Client,
    agent_id: OnceCell<String>,
}

impl MistralClient {
    pub fn new(cfg: MistralConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(cfg.timeout)
            .build()
            .map_err(|e| Error::External(format!("mistral http client build failed: {e}")))?;

        let agent_id = match cfg.agent_id.clone() {
            Some(id) => OnceCell::from(id),
            None => OnceCell::new(),
        };

        Ok(Self {
            cfg,
            http,
            agent_id,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.cfg.base_url, path)
    }

    async fn check(resp: reqwest::Response, what: &str) -> Result<reqwest::Response> {
        let status = resp.status();
        tracing::debug!(%status, "mistral {what}");
        if status.is_success() {
            return Ok(resp);
        }

        let body = resp.text().await.unwrap_or_default();
        tracing::error!(%status, "mistral {what} failed: {}", truncate_text(&body, 500));
        Err(Error::External(format!(
            "mistral {what} failed: {status} {}",
            body.chars().take(200).collect::<String>()
        )))
    }

    async fn post_json<Req, Resp>(&self, path: &str, what: &str, body: &Req) -> Result<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let resp = self
            .http
            .post(self.url(path))
            .bearer_auth(&self.cfg.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::External(format!("mistral {what} request error: {e}")))?;

        let text = Self::check(resp, what)
            .await?
            .text()
            .await
            .map_err(|e| Error::External(format!("mistral {what} read error: {e}")))?;

        serde_json::from_str(&text).map_err(|e| {
            tracing::error!("unexpected mistral {what} response: {}", truncate_text(&text, 500));
            Error::External(format!("mistral {what} json error: {e}"))
        })
    }

    /// Create an agent equipped with the `image_generation` tool. Returns its id.
    pub async fn create_agent(&self) -> Result<String> {
        let req = CreateAgentRequest {
            model: self.cfg.agent_model.clone(),
            name: AGENT_NAME.to_string(),
            description: AGENT_DESCRIPTION.to_string(),
            instructions: AGENT_INSTRUCTIONS.to_string(),
            tools: vec![AgentTool::image_generation()],
        };
        let agent: AgentResponse = self.post_json("/v1/agents", "agent creation", &req).await?;
        tracing::info!(agent_id = %agent.id, "created mistral image agent");
        Ok(agent.id)
    }

    /// Configured agent id, or one created on first call. A failed creation is
    /// attempted again on the next call.
    pub async fn agent_id(&self) -> Result<&str> {
        self.agent_id
            .get_or_try_init(|| self.create_agent())
            .await
            .map(String::as_str)
    }

    pub async fn start_conversation(
        &self,
        agent_id: &str,
        inputs: &str,
    ) -> Result<ConversationResponse> {
        let req = ConversationRequest {
            agent_id: agent_id.to_string(),
            inputs: inputs.to_string(),
            stream: false,
            store: false,
        };
        self.post_json("/v1/conversations", "conversation", &req)
            .await
    }
}

/// First generated file in an agent conversation, if any.
pub fn find_tool_file(resp: &ConversationResponse) -> Option<ImageRef> {
    resp.output_chunks().find_map(|chunk| match chunk {
        ContentChunk::ToolFile {
            file_id, file_type, ..
        } if !file_id.trim().is_empty() => Some(ImageRef {
            file_id: FileId(file_id.clone()),
            file_type: file_type.clone(),
        }),
        _ => None,
    })
}

#[async_trait]
impl GenerationPort for MistralClient {
    async fn complete_text(&self, prompt: &str) -> Result<String> {
        let req = ChatCompletionRequest {
            model: self.cfg.text_model.clone(),
            messages: vec![ChatMessage::user(prompt)],
        };
        let resp: ChatCompletionResponse = self
            .post_json("/v1/chat/completions", "chat completion", &req)
            .await?;

        let text = resp
            .choices
            .first()
            .and_then(|c| c.message.content.as_ref())
            .map(|c| c.text())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(Error::External(
                "mistral chat completion returned empty text".to_string(),
            ));
        }
        Ok(text.trim().to_string())
    }

    async fn generate_image(&self, prompt: &str) -> Result<ImageRef> {
        let agent_id = self.agent_id().await?;
        let resp = self.start_conversation(agent_id, prompt).await?;

        let commentary = resp.output_text();
        if !commentary.trim().is_empty() {
            tracing::debug!("agent said: {}", truncate_text(&commentary, 200));
        }

        find_tool_file(&resp).ok_or_else(|| {
            Error::External(format!(
                "mistral agent returned no image (conversation {})",
                resp.conversation_id.as_deref().unwrap_or("unknown")
            ))
        })
    }

    async fn download_file(&self, file_id: &FileId) -> Result<Vec<u8>> {
        let path = format!("/v1/files/{}/content", file_id.0);
        let resp = self
            .http
            .get(self.url(&path))
            .bearer_auth(&self.cfg.api_key)
            .send()
            .await
            .map_err(|e| Error::External(format!("mistral file download request error: {e}")))?;

        let bytes = Self::check(resp, "file download")
            .await?
            .bytes()
            .await
            .map_err(|e| Error::External(format!("mistral file download read error: {e}")))?;

        if bytes.is_empty() {
            return Err(Error::External(format!("mistral file {file_id} is empty")));
        }
        tracing::info!(%file_id, size = bytes.len(), "downloaded generated file");
        Ok(bytes.to_vec())
    }
}
