//! Common utilities for integration tests
#![allow(dead_code)]

use std::{
    path::Path,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use llm_core::{Brain, BrainReply, BrainRequest};
use serde_json::{json, Value};
use tempfile::TempDir;
use tts_core::{SpeechEngine, SynthesisAdapter};

use server::{
    metrics::PipelineMetrics,
    orchestrator::{Orchestrator, OrchestratorSettings},
};

/// What a [`MockBrain`] answers with.
pub enum Script {
    /// `{"text": "Echo: <prompt>", "behavior": <behavior>}`
    Echo(Value),
    /// Fixed raw reply, parsed as the brain's wire shape.
    Reply(Value),
    Fail(&'static str),
    Panic,
}

pub struct MockBrain {
    script: Script,
    delay: Option<Duration>,
    calls: AtomicUsize,
    last_request: Mutex<Option<BrainRequest>>,
}

impl MockBrain {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            delay: None,
            calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        }
    }

    pub fn echo_waving() -> Self {
        Self::new(Script::Echo(json!({"gesture": "wave"})))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<BrainRequest> {
        self.last_request.lock().unwrap().clone()
    }
}

#[async_trait]
impl Brain for MockBrain {
    async fn think(&self, request: &BrainRequest) -> anyhow::Result<BrainReply> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.script {
            Script::Echo(behavior) => Ok(serde_json::from_value(json!({
                "text": format!("Echo: {}", request.prompt),
                "behavior": behavior,
            }))?),
            Script::Reply(raw) => Ok(serde_json::from_value(raw.clone())?),
            Script::Fail(reason) => anyhow::bail!("{reason}"),
            Script::Panic => panic!("brain blew up"),
        }
    }
}

/// Speech engine that writes a fake clip and tracks how it was driven.
///
/// Concurrency is measured around the render itself, so a render the caller
/// stopped waiting for still counts until it ends.
#[derive(Default)]
pub struct MockEngine {
    delay: Option<Duration>,
    blocking: Option<Duration>,
    failing: AtomicBool,
    calls: AtomicUsize,
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    voices: Mutex<Vec<String>>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Render on the blocking pool for `delay`, like the Piper engine.
    pub fn with_blocking_render(mut self, delay: Duration) -> Self {
        self.blocking = Some(delay);
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn voices(&self) -> Vec<String> {
        self.voices.lock().unwrap().clone()
    }
}

/// Bytes the mock engine writes for `text`.
pub fn fake_audio(text: &str) -> Vec<u8> {
    format!("RIFF:{text}").into_bytes()
}

#[async_trait]
impl SpeechEngine for MockEngine {
    async fn save(&self, text: &str, voice: &str, path: &Path) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.voices.lock().unwrap().push(voice.to_string());

        if let Some(delay) = self.blocking {
            let (current, peak) = (Arc::clone(&self.current), Arc::clone(&self.peak));
            let (path, audio) = (path.to_path_buf(), fake_audio(text));
            tokio::task::spawn_blocking(move || {
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(delay);
                let written = std::fs::write(path, audio);
                current.fetch_sub(1, Ordering::SeqCst);
                written
            })
            .await??;
            return Ok(());
        }

        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let result = if self.failing.load(Ordering::SeqCst) {
            Err(anyhow::anyhow!("engine unavailable"))
        } else {
            tokio::fs::write(path, fake_audio(text)).await.map_err(Into::into)
        };

        self.current.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

pub fn test_settings() -> OrchestratorSettings {
    OrchestratorSettings {
        default_voice: "en-US-GuyNeural".to_string(),
        default_persona: "professional".to_string(),
        brain_timeout: Duration::from_secs(5),
        ai_cache_capacity: 64,
        ai_cache_ttl: Duration::from_secs(1800),
        audio_cache_capacity: 64,
        audio_cache_ttl: Duration::from_secs(3600),
        max_concurrent_synthesis: 6,
    }
}

/// Orchestrator wired to mocks. The temp dir must outlive the orchestrator.
pub struct Harness {
    pub orchestrator: Arc<Orchestrator>,
    pub brain: Arc<MockBrain>,
    pub engine: Arc<MockEngine>,
    pub temp_dir: TempDir,
}

impl Harness {
    pub fn new(brain: MockBrain, engine: MockEngine) -> Self {
        Self::with_settings(brain, engine, test_settings())
    }

    pub fn with_settings(brain: MockBrain, engine: MockEngine, settings: OrchestratorSettings) -> Self {
        Self::with_synthesis_timeout(brain, engine, settings, Duration::from_secs(30))
    }

    pub fn with_synthesis_timeout(
        brain: MockBrain,
        engine: MockEngine,
        settings: OrchestratorSettings,
        synthesis_timeout: Duration,
    ) -> Self {
        let temp_dir = tempfile::tempdir().unwrap();
        let brain = Arc::new(brain);
        let engine = Arc::new(engine);
        let synthesizer = SynthesisAdapter::new(engine.clone(), temp_dir.path().join("audio"))
            .with_default_voice(settings.default_voice.clone())
            .with_timeout(synthesis_timeout);
        let orchestrator = Arc::new(Orchestrator::new(
            brain.clone(),
            synthesizer,
            Arc::new(PipelineMetrics::new()),
            settings,
        ));
        Self {
            orchestrator,
            brain,
            engine,
            temp_dir,
        }
    }

    /// Files left behind in the synthesis scratch directory.
    pub fn leftover_files(&self) -> usize {
        match std::fs::read_dir(self.temp_dir.path().join("audio")) {
            Ok(entries) => entries.count(),
            Err(_) => 0,
        }
    }
}
