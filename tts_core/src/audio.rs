use std::{fmt, sync::Arc};

use base64::Engine; // for STANDARD.encode()

/// Encoded audio produced by a speech engine.
///
/// Cloning is cheap: the bytes are shared, which lets the same clip sit in
/// the audio cache and in any number of in-flight responses. An empty clip
/// means "no audio" (empty input or a failed synthesis).
#[derive(Clone, PartialEq, Eq)]
pub struct AudioClip(Arc<[u8]>);

impl AudioClip {
    pub fn empty() -> Self {
        Self(Arc::from(Vec::new()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Standard base64 of the encoded bytes; empty string for an empty clip.
    pub fn to_base64(&self) -> String {
        if self.is_empty() {
            return String::new();
        }
        base64::engine::general_purpose::STANDARD.encode(&self.0)
    }
}

impl Default for AudioClip {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Vec<u8>> for AudioClip {
    fn from(bytes: Vec<u8>) -> Self {
        Self(Arc::from(bytes))
    }
}

impl fmt::Debug for AudioClip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AudioClip({} bytes)", self.len())
    }
}
