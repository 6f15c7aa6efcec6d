//! Wire types for the Mistral REST API (only the fields we use).

use serde::{Deserialize, Serialize};

// ============== Chat completions ==============

#[derive(Debug, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
pub struct ChatChoice {
    pub message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: Option<Content>,
}

/// Message content: either a plain string or a list of typed chunks.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Chunks(Vec<ContentChunk>),
}

impl Content {
    /// All text of the content, chunks joined without separators.
    pub fn text(&self) -> String {
        match self {
            Content::Text(s) => s.clone(),
            Content::Chunks(chunks) => chunks
                .iter()
                .filter_map(|c| match c {
                    ContentChunk::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect(),
        }
    }

    pub fn chunks(&self) -> &[ContentChunk] {
        match self {
            Content::Text(_) => &[],
            Content::Chunks(chunks) => chunks,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentChunk {
    Text {
        text: String,
    },
    ToolFile {
        file_id: String,
        #[serde(default)]
        file_type: Option<String>,
        #[serde(default)]
        file_name: Option<String>,
        #[serde(default)]
        tool: Option<String>,
    },
    #[serde(other)]
    Other,
}

// ============== Agents ==============

#[derive(Debug, Serialize)]
pub struct CreateAgentRequest {
    pub model: String,
    pub name: String,
    pub description: String,
    pub instructions: String,
    pub tools: Vec<AgentTool>,
}

#[derive(Debug, Serialize)]
pub struct AgentTool {
    #[serde(rename = "type")]
    pub kind: String,
}

impl AgentTool {
    pub fn image_generation() -> Self {
        Self {
            kind: "image_generation".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AgentResponse {
    pub id: String,
}

// ============== Conversations ==============

#[derive(Debug, Serialize)]
pub struct ConversationRequest {
    pub agent_id: String,
    pub inputs: String,
    pub stream: bool,
    pub store: bool,
}

#[derive(Debug, Deserialize)]
pub struct ConversationResponse {
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub outputs: Vec<ConversationEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ConversationEntry {
    #[serde(rename = "message.output")]
    MessageOutput { content: Content },
    #[serde(other)]
    Other,
}

impl ConversationResponse {
    /// Chunks of every `message.output` entry, in order.
    pub fn output_chunks(&self) -> impl Iterator<Item = &ContentChunk> {
        self.outputs
            .iter()
            .filter_map(|entry| match entry {
                ConversationEntry::MessageOutput { content } => Some(content.chunks()),
                ConversationEntry::Other => None,
            })
            .flatten()
    }

    /// Text of every `message.output` entry, joined.
    pub fn output_text(&self) -> String {
        self.outputs
            .iter()
            .filter_map(|entry| match entry {
                ConversationEntry::MessageOutput { content } => Some(content.text()),
                ConversationEntry::Other => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
