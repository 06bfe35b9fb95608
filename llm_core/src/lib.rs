//! The "brain" collaborator: turns a prompt and persona into reply text plus
//! behavior signals for the avatar.

mod openai;
mod prompts;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub use openai::OpenAiBrain;
pub use prompts::PersonaPrompts;

/// Behavior signals for the avatar, e.g. `{"gesture": "wave"}`.
pub type Signals = serde_json::Map<String, Value>;

/// Signals used whenever the brain could not produce its own.
pub fn neutral_signals() -> Signals {
    let mut signals = Signals::new();
    signals.insert("gesture".to_string(), Value::String("idle".to_string()));
    signals
}

/// Inputs handed to a [`Brain`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrainRequest {
    pub prompt: String,
    pub persona_key: String,
    /// Free-text knowledge context; empty when none was supplied.
    pub context_text: String,
    /// Persona prompt supplied inline by the caller, overriding `persona_key`.
    pub persona_prompt: Option<String>,
}

/// Raw brain output. Brains answer in one of two shapes; anything else is
/// kept as [`BrainReply::Unusable`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BrainReply {
    Behavior {
        text: String,
        #[serde(default, deserialize_with = "lenient_signals")]
        behavior: Signals,
    },
    Legacy {
        response_text: String,
        #[serde(default, deserialize_with = "lenient_signals")]
        behavior_json: Signals,
    },
    Unusable(Value),
}

fn lenient_signals<'de, D>(deserializer: D) -> Result<Signals, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Object(map) => map,
        _ => Signals::new(),
    })
}

impl BrainReply {
    pub fn is_usable(&self) -> bool {
        !matches!(self, BrainReply::Unusable(_))
    }

    /// Collapse either reply shape into the canonical form.
    pub fn normalize(self) -> AiResponse {
        match self {
            BrainReply::Behavior { text, behavior } => AiResponse {
                text,
                signals: behavior,
            },
            BrainReply::Legacy {
                response_text,
                behavior_json,
            } => AiResponse {
                text: response_text,
                signals: behavior_json,
            },
            BrainReply::Unusable(_) => AiResponse::default(),
        }
    }
}

/// Canonical brain output, as cached and returned to clients.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AiResponse {
    pub text: String,
    pub signals: Signals,
}

impl AiResponse {
    /// Stand-in payload for a brain call that faulted.
    pub fn degraded(reason: impl std::fmt::Display) -> Self {
        Self {
            text: format!("Error processing prompt: {reason}"),
            signals: neutral_signals(),
        }
    }
}

#[async_trait]
pub trait Brain: Send + Sync {
    async fn think(&self, request: &BrainRequest) -> anyhow::Result<BrainReply>;
}

/// Fallback brain used when no model provider is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoBrain;

#[async_trait]
impl Brain for EchoBrain {
    async fn think(&self, request: &BrainRequest) -> anyhow::Result<BrainReply> {
        Ok(BrainReply::Legacy {
            response_text: format!("Echo: {}", request.prompt),
            behavior_json: neutral_signals(),
        })
    }
}
