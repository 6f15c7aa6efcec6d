use std::sync::Mutex;

use async_trait::async_trait;

use crate::{
    domain::FileId,
    errors::Error,
    generation::{port::GenerationPort, types::ImageRef},
    Result,
};

/// Scripted generator for pipeline tests.
#[derive(Default)]
pub struct MockGenerator {
    pub text: Option<String>,
    pub image: Option<ImageRef>,
    pub bytes: Option<Vec<u8>>,
    calls: Mutex<Vec<String>>,
}

impl MockGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text(mut self, text: &str) -> Self {
        self.text = Some(text.to_string());
        self
    }

    pub fn with_image(mut self, file_id: &str, bytes: &[u8]) -> Self {
        self.image = Some(ImageRef {
            file_id: FileId(file_id.to_string()),
            file_type: Some("png".to_string()),
        });
        self.bytes = Some(bytes.to_vec());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl GenerationPort for MockGenerator {
    async fn complete_text(&self, prompt: &str) -> Result<String> {
        self.record(format!("text:{prompt}"));
        self.text
            .clone()
            .ok_or_else(|| Error::External("text backend down".to_string()))
    }

    async fn generate_image(&self, prompt: &str) -> Result<ImageRef> {
        self.record(format!("image:{prompt}"));
        self.image
            .clone()
            .ok_or_else(|| Error::External("no tool file in agent response".to_string()))
    }

    async fn download_file(&self, file_id: &FileId) -> Result<Vec<u8>> {
        self.record(format!("download:{file_id}"));
        self.bytes
            .clone()
            .ok_or_else(|| Error::External("file not found".to_string()))
    }
}
