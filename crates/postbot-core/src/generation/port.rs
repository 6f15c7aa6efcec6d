use async_trait::async_trait;

use crate::{domain::FileId, generation::types::ImageRef, Result};

/// Hexagonal port for the generative backend (Mistral today).
///
/// The three calls map to the three remote round-trips of one request:
/// text completion, agent image generation, and file download.
#[async_trait]
pub trait GenerationPort: Send + Sync {
    /// Single-turn text completion. Errors on an empty reply.
    async fn complete_text(&self, prompt: &str) -> Result<String>;

    /// Ask the image agent for a picture and return the first generated file.
    async fn generate_image(&self, prompt: &str) -> Result<ImageRef>;

    /// Fetch the raw bytes of a generated file.
    async fn download_file(&self, file_id: &FileId) -> Result<Vec<u8>>;
}
