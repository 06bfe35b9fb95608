//! Speech synthesis for persona replies.
//!
//! [`SynthesisAdapter`] is the only entry point the server uses: it wraps a
//! [`SpeechEngine`] (the external TTS dependency) behind a contract that never
//! fails, returning an empty [`AudioClip`] instead of an error.

mod adapter;
mod audio;
mod engine;

pub use adapter::{SynthesisAdapter, DEFAULT_VOICE};
pub use audio::AudioClip;
pub use engine::{write_wav, PiperEngine, SpeechEngine, VoiceEntry};
