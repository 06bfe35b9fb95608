use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::{AudioClip, SpeechEngine};

/// Voice used when the caller supplies none.
pub const DEFAULT_VOICE: &str = "en-US-GuyNeural";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Uniform `(text, voice) -> audio` contract over a [`SpeechEngine`].
///
/// Never fails: empty input, a missing or empty output file, an engine error
/// and an engine timeout all yield [`AudioClip::empty`]. The engine writes to
/// a uniquely named file under `temp_dir`, which is removed on every path.
pub struct SynthesisAdapter {
    engine: Arc<dyn SpeechEngine>,
    temp_dir: PathBuf,
    default_voice: String,
    timeout: Duration,
}

impl SynthesisAdapter {
    pub fn new(engine: Arc<dyn SpeechEngine>, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            engine,
            temp_dir: temp_dir.into(),
            default_voice: DEFAULT_VOICE.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_default_voice(mut self, voice: impl Into<String>) -> Self {
        self.default_voice = voice.into();
        self
    }

    /// Upper bound on a single engine call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn default_voice(&self) -> &str {
        &self.default_voice
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    pub async fn synthesize(&self, text: &str, voice: Option<&str>) -> AudioClip {
        self.synthesize_holding(text, voice, ()).await
    }

    /// Like [`synthesize`](Self::synthesize), but keeps `guard` alive until the
    /// engine call has really finished. After a timeout the engine may still be
    /// running; the guard (e.g. a concurrency permit) is only dropped once it
    /// stops, and its output file is removed then.
    pub async fn synthesize_holding<G>(&self, text: &str, voice: Option<&str>, guard: G) -> AudioClip
    where
        G: Send + 'static,
    {
        if text.trim().is_empty() {
            warn!("TTS called with empty text");
            return AudioClip::empty();
        }

        let voice = match voice.map(str::trim) {
            Some(v) if !v.is_empty() => v,
            _ => {
                warn!(default = %self.default_voice, "TTS called with empty voice, using default");
                self.default_voice.as_str()
            }
        };

        match self.try_synthesize(text, voice, guard).await {
            Ok(clip) => {
                debug!(voice, bytes = clip.len(), "TTS generated audio");
                clip
            }
            Err(e) => {
                error!(voice, error = %format!("{e:#}"), "TTS synthesis failed");
                AudioClip::empty()
            }
        }
    }

    async fn try_synthesize<G>(&self, text: &str, voice: &str, guard: G) -> anyhow::Result<AudioClip>
    where
        G: Send + 'static,
    {
        tokio::fs::create_dir_all(&self.temp_dir)
            .await
            .with_context(|| format!("Failed to create {}", self.temp_dir.display()))?;

        let path = self.temp_dir.join(format!(
            "{}.{}",
            Uuid::new_v4().simple(),
            self.engine.extension()
        ));

        // Engines may render on the blocking pool, which cannot be cancelled,
        // so the call runs in its own task and is never aborted.
        let engine = Arc::clone(&self.engine);
        let (owned_text, owned_voice, render_path) =
            (text.to_string(), voice.to_string(), path.clone());
        let mut render = tokio::spawn(async move {
            let result = engine.save(&owned_text, &owned_voice, &render_path).await;
            drop(guard);
            result
        });

        let rendered = match tokio::time::timeout(self.timeout, &mut render).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(anyhow::anyhow!("engine task failed: {join_err}")),
            Err(_) => {
                let late_path = path.clone();
                tokio::spawn(async move {
                    let _ = render.await;
                    remove_artifact(&late_path).await;
                });
                anyhow::bail!("engine timed out after {:?}", self.timeout);
            }
        };

        let bytes = match rendered {
            Ok(()) => read_output(&path).await,
            Err(e) => Err(e),
        };
        remove_artifact(&path).await;

        let bytes = bytes?;
        if bytes.is_empty() {
            anyhow::bail!("TTS file is empty");
        }
        Ok(AudioClip::from(bytes))
    }
}

async fn read_output(path: &Path) -> anyhow::Result<Vec<u8>> {
    if tokio::fs::metadata(path).await.is_err() {
        anyhow::bail!("TTS file was not created");
    }

    tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))
}

async fn remove_artifact(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove temp file"),
    }
}
