use std::{net::SocketAddr, sync::Arc};

use llm_core::{Brain, EchoBrain, OpenAiBrain, PersonaPrompts};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tts_core::{PiperEngine, SynthesisAdapter};

use server::{
    config::ServerConfig,
    metrics::PipelineMetrics,
    orchestrator::Orchestrator,
    routes::{self, AppState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let _ = dotenv::dotenv();

    async_main().await
}

fn build_brain(config: &ServerConfig) -> Arc<dyn Brain> {
    if config.brain_provider != "openai" {
        info!("Using echo brain (BRAIN_PROVIDER={})", config.brain_provider);
        return Arc::new(EchoBrain);
    }

    let prompts = PersonaPrompts::load_dir(&config.prompts_dir).unwrap_or_else(|e| {
        warn!("Could not load persona prompts from {}: {e}", config.prompts_dir);
        PersonaPrompts::default()
    });
    info!("Loaded {} persona prompt(s)", prompts.len());

    match OpenAiBrain::new(&config.brain_model, prompts) {
        Ok(brain) => {
            info!("Using OpenAI brain with model {}", config.brain_model);
            Arc::new(brain)
        }
        Err(e) => {
            warn!("OpenAI brain unavailable ({e:#}), falling back to echo brain");
            Arc::new(EchoBrain)
        }
    }
}

async fn async_main() -> anyhow::Result<()> {
    info!("Starting persona server...");

    let config = ServerConfig::from_env();
    info!(
        "Server configuration loaded: port={}, rate_limit={}/min, tts_max_concurrency={}",
        config.port, config.rate_limit_per_minute, config.tts_max_concurrency
    );

    let brain = build_brain(&config);

    info!("Loading TTS voices...");
    let engine = PiperEngine::from_map_file(&config.voice_map).unwrap_or_else(|e| {
        warn!("Could not load {}: {e}, using empty map.", config.voice_map);
        PiperEngine::new(std::collections::HashMap::new())
    });
    info!("Loaded {} TTS voices", engine.list_voices().len());

    let synthesizer = SynthesisAdapter::new(Arc::new(engine), &config.tts_temp_dir)
        .with_default_voice(config.default_voice.clone())
        .with_timeout(config.synthesis_timeout());

    let metrics = Arc::new(PipelineMetrics::new());
    let orchestrator = Arc::new(Orchestrator::new(
        brain,
        synthesizer,
        metrics,
        config.orchestrator_settings(),
    ));

    let warmed = orchestrator.prewarm(config.prewarm_phrases.as_slice()).await;
    info!("Prewarmed {warmed}/{} phrase(s)", config.prewarm_phrases.len());

    let app = routes::with_middleware(routes::app(AppState::new(orchestrator)), &config)?;

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;

    let listener = TcpListener::bind(addr).await.map_err(|e| {
        anyhow::anyhow!("Failed to bind {addr}: {e}. Try a different PORT.")
    })?;

    info!("Server listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
