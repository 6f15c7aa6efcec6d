use std::sync::Arc;

use postbot_core::{config::Config, generation::pipeline::PostPipeline};
use postbot_mistral::{MistralClient, MistralConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    postbot_core::logging::init("postbot")?;

    let cfg = Arc::new(Config::load()?);

    let mistral = Arc::new(MistralClient::new(MistralConfig::from(cfg.as_ref()))?);
    if cfg.mistral_agent_id.is_none() {
        tracing::info!("MISTRAL_AGENT_ID not set, an image agent will be created on first request");
    }

    let pipeline = Arc::new(PostPipeline::new(mistral, cfg.temp_dir.clone()));

    postbot_telegram::router::run_polling(cfg, pipeline).await
}
