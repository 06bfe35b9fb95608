//! The `/generate` pipeline: prompt -> brain reply -> speech, with caching.
//!
//! A request is resolved in order: prompt ceiling check, AI-response cache,
//! brain call, audio cache, gated synthesis. Every collaborator failure
//! degrades to a fallback value; the prompt ceiling is the only error.

use std::{sync::Arc, time::Instant};

use llm_core::{AiResponse, Brain, BrainReply, BrainRequest, Signals};
use serde::Deserialize;
use serde_json::Value;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};
use tts_core::{AudioClip, SynthesisAdapter};

use crate::{
    cache::ExpiringCache,
    error::GenerateError,
    gate::ConcurrencyGate,
    metrics::PipelineMetrics,
    validation::validate_prompt,
};

/// Persona descriptor sent by the client: `id`, `voice`, `prompt`, ...
pub type Persona = serde_json::Map<String, Value>;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerateRequest {
    pub prompt: String,
    #[serde(default)]
    pub persona: Option<Persona>,
    /// Knowledge context. Only a plain string is used; a structured graph is
    /// accepted and ignored.
    #[serde(default, rename = "nodeGraph")]
    pub node_graph: Option<Value>,
}

impl GenerateRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    /// Non-empty string field of the persona.
    fn persona_field(&self, field: &str) -> Option<&str> {
        self.persona
            .as_ref()?
            .get(field)?
            .as_str()
            .filter(|s| !s.trim().is_empty())
    }

    pub fn context_text(&self) -> &str {
        match &self.node_graph {
            Some(Value::String(text)) => text,
            _ => "",
        }
    }

    pub fn voice<'a>(&'a self, default: &'a str) -> &'a str {
        self.persona_field("voice").unwrap_or(default)
    }

    pub fn brain_request(&self, default_persona: &str) -> BrainRequest {
        BrainRequest {
            prompt: self.prompt.clone(),
            persona_key: self
                .persona_field("id")
                .unwrap_or(default_persona)
                .to_string(),
            context_text: self.context_text().to_string(),
            persona_prompt: self
                .persona_field("prompt")
                .or_else(|| self.persona_field("persona_prompt"))
                .map(str::to_string),
        }
    }
}

/// AI-response cache key: the raw prompt plus a canonical rendering of the
/// persona, so key order in the client's JSON does not matter. A missing
/// persona and an empty one are the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AiCacheKey {
    prompt: String,
    persona: String,
}

impl AiCacheKey {
    pub fn new(prompt: &str, persona: Option<&Persona>) -> Self {
        let mut canonical = String::new();
        match persona {
            Some(map) => write_canonical_object(map, &mut canonical),
            None => canonical.push_str("{}"),
        }
        Self {
            prompt: prompt.to_string(),
            persona: canonical,
        }
    }
}

fn write_canonical_object(map: &Persona, out: &mut String) {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();
    out.push('{');
    for (i, key) in keys.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&Value::String(key.clone()).to_string());
        out.push(':');
        write_canonical(&map[key], out);
    }
    out.push('}');
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => write_canonical_object(map, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Audio cache key: text as synthesized plus the voice it was spoken in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AudioCacheKey {
    text: String,
    voice: String,
}

impl AudioCacheKey {
    pub fn new(text: &str, voice: &str) -> Self {
        Self {
            text: text.to_string(),
            voice: voice.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub default_voice: String,
    pub default_persona: String,
    pub brain_timeout: Duration,
    pub ai_cache_capacity: usize,
    pub ai_cache_ttl: Duration,
    pub audio_cache_capacity: usize,
    pub audio_cache_ttl: Duration,
    pub max_concurrent_synthesis: usize,
}

/// Assembled pipeline output.
#[derive(Debug, Clone, PartialEq)]
pub struct Generated {
    pub text: String,
    pub audio: AudioClip,
    pub signals: Signals,
}

pub struct Orchestrator {
    brain: Arc<dyn Brain>,
    synthesizer: SynthesisAdapter,
    ai_cache: ExpiringCache<AiCacheKey, AiResponse>,
    audio_cache: ExpiringCache<AudioCacheKey, AudioClip>,
    gate: ConcurrencyGate,
    metrics: Arc<PipelineMetrics>,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        brain: Arc<dyn Brain>,
        synthesizer: SynthesisAdapter,
        metrics: Arc<PipelineMetrics>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            brain,
            synthesizer,
            ai_cache: ExpiringCache::new(
                "ai_response",
                settings.ai_cache_capacity,
                settings.ai_cache_ttl,
            ),
            audio_cache: ExpiringCache::new(
                "audio",
                settings.audio_cache_capacity,
                settings.audio_cache_ttl,
            ),
            gate: ConcurrencyGate::new(settings.max_concurrent_synthesis),
            metrics,
            settings,
        }
    }

    pub fn ai_cache(&self) -> &ExpiringCache<AiCacheKey, AiResponse> {
        &self.ai_cache
    }

    pub fn audio_cache(&self) -> &ExpiringCache<AudioCacheKey, AudioClip> {
        &self.audio_cache
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.gate
    }

    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Run the whole pipeline for one request.
    pub async fn generate(&self, request: &GenerateRequest) -> Result<Generated, GenerateError> {
        validate_prompt(&request.prompt)?;
        let started = Instant::now();

        let reply = self.resolve_reply(request).await;
        let voice = request.voice(&self.settings.default_voice);
        let audio = self.resolve_audio(&reply.text, voice).await;

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.metrics.record(elapsed_ms);
        info!(elapsed_ms, audio_bytes = audio.len(), "Generate processed");

        Ok(Generated {
            text: reply.text,
            audio,
            signals: reply.signals,
        })
    }

    /// Synthesize `phrases` in the default voice so first requests hit the
    /// audio cache. Returns how many phrases are now cached.
    pub async fn prewarm<S: AsRef<str>>(&self, phrases: &[S]) -> usize {
        let mut warmed = 0;
        for phrase in phrases {
            let audio = self
                .resolve_audio(phrase.as_ref(), &self.settings.default_voice)
                .await;
            if audio.is_empty() {
                warn!(phrase = phrase.as_ref(), "Prewarm TTS failed");
            } else {
                info!(phrase = phrase.as_ref(), "Prewarmed TTS");
                warmed += 1;
            }
        }
        warmed
    }

    async fn resolve_reply(&self, request: &GenerateRequest) -> AiResponse {
        let key = AiCacheKey::new(&request.prompt, request.persona.as_ref());
        if let Some(cached) = self.ai_cache.get(&key) {
            self.metrics.ai_cache.record_hit();
            info!("Brain cache hit");
            return cached;
        }
        self.metrics.ai_cache.record_miss();

        let brain_request = request.brain_request(&self.settings.default_persona);
        info!(
            persona_key = %brain_request.persona_key,
            context_len = brain_request.context_text.len(),
            "Calling brain"
        );

        match self.consult_brain(brain_request).await {
            Ok(reply) if reply.is_usable() => {
                let response = reply.normalize();
                self.ai_cache.put(key, response.clone());
                response
            }
            Ok(reply) => {
                warn!(?reply, "Brain returned no usable reply");
                reply.normalize()
            }
            Err(e) => {
                error!(error = %format!("{e:#}"), "Brain failed");
                self.metrics.record_brain_fault();
                AiResponse::degraded(e)
            }
        }
    }

    /// Call the brain in its own task so a panic is contained, bounded by the
    /// configured timeout.
    async fn consult_brain(&self, request: BrainRequest) -> anyhow::Result<BrainReply> {
        let brain = Arc::clone(&self.brain);
        let mut task = tokio::spawn(async move { brain.think(&request).await });

        match tokio::time::timeout(self.settings.brain_timeout, &mut task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(anyhow::anyhow!("brain task failed: {join_err}")),
            Err(_) => {
                task.abort();
                Err(anyhow::anyhow!(
                    "brain timed out after {}s",
                    self.settings.brain_timeout.as_secs()
                ))
            }
        }
    }

    async fn resolve_audio(&self, text: &str, voice: &str) -> AudioClip {
        let text = text.trim();
        if text.is_empty() {
            warn!("Empty text received from brain, skipping TTS");
            return AudioClip::empty();
        }

        let key = AudioCacheKey::new(text, voice);
        if let Some(cached) = self.audio_cache.get(&key) {
            self.metrics.audio_cache.record_hit();
            debug!(voice, "Audio cache hit");
            return cached;
        }
        self.metrics.audio_cache.record_miss();

        let audio = self.synthesize_gated(text, voice).await;
        if audio.is_empty() {
            warn!(voice, "TTS returned empty audio");
        } else {
            info!(voice, bytes = audio.len(), "TTS generated audio successfully");
            self.audio_cache.put(key, audio.clone());
        }
        audio
    }

    /// The permit travels with the engine call, so a render the adapter
    /// stopped waiting for still occupies its slot until it ends.
    async fn synthesize_gated(&self, text: &str, voice: &str) -> AudioClip {
        let permit = match self.gate.acquire().await {
            Ok(permit) => permit,
            Err(e) => {
                error!(error = %e, "Synthesis gate unavailable");
                return AudioClip::empty();
            }
        };

        let started = Instant::now();
        let audio = self
            .synthesizer
            .synthesize_holding(text, Some(voice), permit)
            .await;
        self.metrics
            .record_synthesis(started.elapsed().as_secs_f64() * 1000.0, !audio.is_empty());
        audio
    }
}
