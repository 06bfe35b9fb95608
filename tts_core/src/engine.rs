use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
};

use anyhow::Context;
use async_trait::async_trait;
use piper_rs::synth::{PiperSpeechStreamParallel, PiperSpeechSynthesizer};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// External text-to-speech dependency.
///
/// An engine renders `text` in `voice` into an encoded audio file at `path`.
/// It may fail in any way it likes; [`crate::SynthesisAdapter`] turns every
/// failure into an empty clip and owns the file's lifetime.
#[async_trait]
pub trait SpeechEngine: Send + Sync {
    /// File extension of the encoded audio this engine writes.
    fn extension(&self) -> &'static str {
        "wav"
    }

    async fn save(&self, text: &str, voice: &str, path: &Path) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceEntry {
    pub config: String,
    #[serde(default)]
    pub speaker_id: Option<i64>,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// A voice map value is either a bare config path or a full entry.
#[derive(Deserialize)]
#[serde(untagged)]
enum MapEntry {
    Path(String),
    Entry(VoiceEntry),
}

// Loaded synthesizer and its output sample rate
struct LoadedModel {
    synth: Arc<Mutex<PiperSpeechSynthesizer>>,
    sample_rate: u32,
}

/// Local neural TTS backed by Piper ONNX voices.
///
/// Voices are resolved through a map file (`models/map.json`):
///
/// ```json
/// {
///   "en-US-GuyNeural": { "config": "models/en_US/en_US-ryan-medium.onnx.json" },
///   "en-GB-SoniaNeural": "models/en_GB/en_GB-alba-medium.onnx.json"
/// }
/// ```
///
/// Models load lazily on first use and stay resident afterwards.
pub struct PiperEngine {
    voices: HashMap<String, VoiceEntry>,
    loaded: Arc<Mutex<HashMap<String, LoadedModel>>>,
}

impl PiperEngine {
    pub fn new(voices: HashMap<String, VoiceEntry>) -> Self {
        Self {
            voices,
            loaded: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Load voices from a JSON map file.
    pub fn from_map_file<P: AsRef<Path>>(p: P) -> anyhow::Result<Self> {
        let text = fs::read_to_string(p.as_ref())
            .with_context(|| format!("Failed to load {}", p.as_ref().display()))?;
        let raw: HashMap<String, MapEntry> = serde_json::from_str(&text)
            .with_context(|| format!("{} is not a valid voice map", p.as_ref().display()))?;

        let voices = raw
            .into_iter()
            .map(|(voice, entry)| {
                let entry = match entry {
                    MapEntry::Path(config) => VoiceEntry {
                        config,
                        speaker_id: None,
                        display_name: None,
                    },
                    MapEntry::Entry(entry) => entry,
                };
                (voice, entry)
            })
            .collect();

        Ok(Self::new(voices))
    }

    /// Sorted voice identifiers this engine can render.
    pub fn list_voices(&self) -> Vec<String> {
        let mut voices: Vec<String> = self.voices.keys().cloned().collect();
        voices.sort();
        voices
    }

    fn voice(&self, voice: &str) -> anyhow::Result<&VoiceEntry> {
        self.voices.get(voice).ok_or_else(|| {
            anyhow::anyhow!(
                "Unknown voice '{}'. Available voices: {}",
                voice,
                self.list_voices().join(", ")
            )
        })
    }

    /// Read sample rate from model config JSON
    fn read_sample_rate<P: AsRef<Path>>(cfg_path: P) -> anyhow::Result<u32> {
        let text = fs::read_to_string(cfg_path.as_ref()).with_context(|| {
            format!("Failed to read config file: {}", cfg_path.as_ref().display())
        })?;
        let json: serde_json::Value =
            serde_json::from_str(&text).with_context(|| "Config file is not valid JSON")?;

        let sample_rate = json
            .get("audio")
            .and_then(|a| a.get("sample_rate"))
            .and_then(|sr| sr.as_u64())
            .ok_or_else(|| anyhow::anyhow!("Missing or invalid 'audio.sample_rate' in config"))?;

        Ok(sample_rate as u32)
    }

    /// Get or load the synthesizer for a model config. Blocking.
    fn model_for(
        loaded: &Mutex<HashMap<String, LoadedModel>>,
        cfg_path: &str,
    ) -> anyhow::Result<(Arc<Mutex<PiperSpeechSynthesizer>>, u32)> {
        let mut loaded = lock_recovering(loaded);

        if let Some(model) = loaded.get(cfg_path) {
            return Ok((model.synth.clone(), model.sample_rate));
        }

        info!(config = cfg_path, "Loading Piper model");
        let sample_rate = Self::read_sample_rate(cfg_path)?;
        let model = piper_rs::from_config_path(Path::new(cfg_path))
            .map_err(|e| anyhow::anyhow!("piper load error: {e}"))?;
        let synth = Arc::new(Mutex::new(PiperSpeechSynthesizer::new(model)?));

        loaded.insert(
            cfg_path.to_string(),
            LoadedModel {
                synth: synth.clone(),
                sample_rate,
            },
        );
        Ok((synth, sample_rate))
    }

    fn render_blocking(
        loaded: &Mutex<HashMap<String, LoadedModel>>,
        cfg_path: &str,
        text: String,
        path: &Path,
    ) -> anyhow::Result<()> {
        let (synth_arc, sample_rate) = Self::model_for(loaded, cfg_path)?;
        let synth = lock_recovering(&*synth_arc);

        let iter: PiperSpeechStreamParallel = synth
            .synthesize_parallel(text, None)
            .map_err(|e| anyhow::anyhow!("piper synth error: {e}"))?;

        let mut samples: Vec<f32> = Vec::new();
        for part in iter {
            samples.extend(part.map_err(|e| anyhow::anyhow!("chunk error: {e}"))?.into_vec());
        }

        write_wav(path, &samples, sample_rate)
    }
}

#[async_trait]
impl SpeechEngine for PiperEngine {
    async fn save(&self, text: &str, voice: &str, path: &Path) -> anyhow::Result<()> {
        let cfg_path = self.voice(voice)?.config.clone();
        let loaded = Arc::clone(&self.loaded);
        let text = text.to_string();
        let path: PathBuf = path.to_path_buf();

        debug!(voice, config = %cfg_path, "Piper synthesis started");
        tokio::task::spawn_blocking(move || Self::render_blocking(&loaded, &cfg_path, text, &path))
            .await
            .map_err(|e| anyhow::anyhow!("Task join error: {e}"))?
    }
}

// A panic inside piper leaves the synthesizer usable for the next call; only
// that one render is lost.
fn lock_recovering<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        warn!("Recovering lock poisoned by a panicked synthesis");
        poisoned.into_inner()
    })
}

/// Write f32 samples as 16-bit mono PCM WAV.
pub fn write_wav(path: &Path, samples: &[f32], sample_rate: u32) -> anyhow::Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(path, spec)
        .map_err(|e| anyhow::anyhow!("wav write err: {e}"))?;

    const I16_MAX_F32: f32 = i16::MAX as f32;
    for &s in samples {
        let v = (s.clamp(-1.0, 1.0) * I16_MAX_F32) as i16;
        writer
            .write_sample(v)
            .map_err(|e| anyhow::anyhow!("wav sample err: {e}"))?;
    }
    writer
        .finalize()
        .map_err(|e| anyhow::anyhow!("wav finalize err: {e}"))?;
    Ok(())
}
