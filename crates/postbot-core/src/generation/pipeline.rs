use std::{path::PathBuf, sync::Arc};

use crate::{
    errors::Error,
    generation::{
        port::GenerationPort,
        prompts,
        types::{GeneratedPost, TempImage},
    },
    Result,
};

/// Runs the text -> image -> download chain for one prompt.
pub struct PostPipeline {
    generator: Arc<dyn GenerationPort>,
    temp_dir: PathBuf,
}

impl PostPipeline {
    pub fn new(generator: Arc<dyn GenerationPort>, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            generator,
            temp_dir: temp_dir.into(),
        }
    }

    /// Generate a post. A text failure is an error; an image failure is not
    /// (the post comes back without an image and with `image_error` set).
    pub async fn generate(&self, prompt: &str) -> Result<GeneratedPost> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(Error::InvalidInput("prompt is empty".to_string()));
        }

        let text = self
            .generator
            .complete_text(&prompts::post_text(prompt))
            .await?;
        tracing::info!(chars = text.chars().count(), "post text generated");

        match self.generate_image(prompt).await {
            Ok(image) => Ok(GeneratedPost {
                text,
                image: Some(image),
                image_error: None,
            }),
            Err(e) => {
                tracing::warn!("image generation failed, replying with text only: {e}");
                Ok(GeneratedPost {
                    text,
                    image: None,
                    image_error: Some(e.to_string()),
                })
            }
        }
    }

    async fn generate_image(&self, prompt: &str) -> Result<TempImage> {
        let image = self
            .generator
            .generate_image(&prompts::post_image(prompt))
            .await?;
        tracing::info!(file_id = %image.file_id, "image generated");

        let bytes = self.generator.download_file(&image.file_id).await?;
        if bytes.is_empty() {
            return Err(Error::External(format!(
                "downloaded file {} is empty",
                image.file_id
            )));
        }

        TempImage::write(&self.temp_dir, &image.extension(), &bytes).await
    }
}
