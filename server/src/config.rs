// Configuration for the server, loaded from the environment

use std::{str::FromStr, time::Duration};

use tts_core::DEFAULT_VOICE;

use crate::orchestrator::OrchestratorSettings;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub ai_cache_capacity: usize,
    pub ai_cache_ttl_secs: u64,
    pub audio_cache_capacity: usize,
    pub audio_cache_ttl_secs: u64,
    pub tts_max_concurrency: usize,
    pub default_voice: String,
    pub default_persona: String,
    pub brain_provider: String,
    pub brain_model: String,
    pub prompts_dir: String,
    pub voice_map: String,
    pub tts_temp_dir: String,
    pub brain_timeout_secs: u64,
    pub synthesis_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub rate_limit_per_minute: u32,
    pub cors_allowed_origins: Option<Vec<String>>,
    pub prewarm_phrases: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            ai_cache_capacity: 1024,
            ai_cache_ttl_secs: 30 * 60,
            audio_cache_capacity: 512,
            audio_cache_ttl_secs: 60 * 60,
            tts_max_concurrency: 6,
            default_voice: DEFAULT_VOICE.to_string(),
            default_persona: "professional".to_string(),
            brain_provider: "echo".to_string(),
            brain_model: "gpt-3.5-turbo".to_string(),
            prompts_dir: "prompts".to_string(),
            voice_map: "models/map.json".to_string(),
            tts_temp_dir: "tmp_audio".to_string(),
            brain_timeout_secs: 60,
            synthesis_timeout_secs: 30,
            request_timeout_secs: 90,
            rate_limit_per_minute: 120,
            cors_allowed_origins: None,
            prewarm_phrases: vec!["Hello!".to_string(), "Welcome!".to_string()],
        }
    }
}

/// Parse `name` from the environment, keeping `default` when unset or invalid.
fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_list(name: &str) -> Option<Vec<String>> {
    std::env::var(name).ok().map(|v| split_list(&v))
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            port: env_or("PORT", d.port),
            ai_cache_capacity: env_or("AI_CACHE_CAPACITY", d.ai_cache_capacity).max(1),
            ai_cache_ttl_secs: env_or("AI_CACHE_TTL_SECS", d.ai_cache_ttl_secs),
            audio_cache_capacity: env_or("AUDIO_CACHE_CAPACITY", d.audio_cache_capacity).max(1),
            audio_cache_ttl_secs: env_or("AUDIO_CACHE_TTL_SECS", d.audio_cache_ttl_secs),
            tts_max_concurrency: env_or("TTS_MAX_CONCURRENCY", d.tts_max_concurrency).max(1),
            default_voice: env_or("DEFAULT_VOICE", d.default_voice),
            default_persona: env_or("DEFAULT_PERSONA", d.default_persona),
            brain_provider: env_or("BRAIN_PROVIDER", d.brain_provider).to_lowercase(),
            brain_model: env_or("BRAIN_MODEL", d.brain_model),
            prompts_dir: env_or("PROMPTS_DIR", d.prompts_dir),
            voice_map: env_or("VOICE_MAP", d.voice_map),
            tts_temp_dir: env_or("TTS_TEMP_DIR", d.tts_temp_dir),
            brain_timeout_secs: env_or("BRAIN_TIMEOUT_SECS", d.brain_timeout_secs).max(1),
            synthesis_timeout_secs: env_or("SYNTHESIS_TIMEOUT_SECS", d.synthesis_timeout_secs).max(1),
            request_timeout_secs: env_or("REQUEST_TIMEOUT_SECS", d.request_timeout_secs).max(1),
            rate_limit_per_minute: env_or("RATE_LIMIT_PER_MINUTE", d.rate_limit_per_minute),
            cors_allowed_origins: env_list("CORS_ALLOWED_ORIGINS"),
            prewarm_phrases: env_list("PREWARM_PHRASES").unwrap_or(d.prewarm_phrases),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn synthesis_timeout(&self) -> Duration {
        Duration::from_secs(self.synthesis_timeout_secs)
    }

    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            default_voice: self.default_voice.clone(),
            default_persona: self.default_persona.clone(),
            brain_timeout: Duration::from_secs(self.brain_timeout_secs),
            ai_cache_capacity: self.ai_cache_capacity,
            ai_cache_ttl: Duration::from_secs(self.ai_cache_ttl_secs),
            audio_cache_capacity: self.audio_cache_capacity,
            audio_cache_ttl: Duration::from_secs(self.audio_cache_ttl_secs),
            max_concurrent_synthesis: self.tts_max_concurrency,
        }
    }
}
