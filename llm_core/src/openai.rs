use std::env;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Brain, BrainReply, BrainRequest, PersonaPrompts, Signals};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

const DEFAULT_PERSONA_PROMPT: &str = "You are a friendly, professional assistant.";

const REPLY_FORMAT: &str = "Answer with a single JSON object of the form \
{\"text\": \"<what you say>\", \"behavior\": {\"gesture\": \"wave|nod|idle\", \"emotion\": \"<emotion>\"}}. \
Keep the text short enough to be spoken aloud.";

/// Structure for the OpenAI Chat API request
#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    max_tokens: u16,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

/// Structure for the OpenAI Chat API response
#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// Brain backed by an OpenAI-compatible chat completions endpoint.
pub struct OpenAiBrain {
    api_key: String,
    client: Client,
    model: String,
    base_url: String,
    prompts: PersonaPrompts,
}

impl OpenAiBrain {
    /// Create a new brain. Reads the API key from `OPENAI_API_KEY` and an
    /// optional endpoint override from `OPENAI_BASE_URL`.
    pub fn new(model: &str, prompts: PersonaPrompts) -> Result<Self> {
        let api_key =
            env::var("OPENAI_API_KEY").context("OPENAI_API_KEY must be set in the environment")?;
        let base_url = env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Ok(Self {
            api_key,
            client: Client::new(),
            model: model.to_string(),
            base_url,
            prompts,
        })
    }

    /// Persona prompt override, else the stored persona prompt, else a default;
    /// followed by the knowledge context and the reply format instructions.
    fn system_prompt(&self, request: &BrainRequest) -> String {
        let persona = request
            .persona_prompt
            .as_deref()
            .or_else(|| self.prompts.get(&request.persona_key))
            .unwrap_or(DEFAULT_PERSONA_PROMPT);

        let mut prompt = persona.trim().to_string();
        if !request.context_text.trim().is_empty() {
            prompt.push_str("\n\nKnowledge context:\n");
            prompt.push_str(request.context_text.trim());
        }
        prompt.push_str("\n\n");
        prompt.push_str(REPLY_FORMAT);
        prompt
    }
}

/// Interpret model output: a JSON reply if the model followed the format,
/// otherwise the raw content as text with no signals.
fn parse_content(content: &str) -> BrainReply {
    let trimmed = content.trim();
    let json = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    match serde_json::from_str::<BrainReply>(json) {
        Ok(reply) if reply.is_usable() => reply,
        _ => BrainReply::Behavior {
            text: trimmed.to_string(),
            behavior: Signals::new(),
        },
    }
}

#[async_trait]
impl Brain for OpenAiBrain {
    async fn think(&self, request: &BrainRequest) -> Result<BrainReply> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let system = self.system_prompt(request);
        let req_body = ChatRequest {
            model: &self.model,
            messages: vec![
                Message { role: "system", content: &system },
                Message { role: "user", content: &request.prompt },
            ],
            max_tokens: 300,
        };

        debug!(model = %self.model, persona = %request.persona_key, "Sending chat completion");
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&req_body)
            .send()
            .await?
            .error_for_status()? // convert non-200 into error
            .json::<ChatResponse>()
            .await?;

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| anyhow::anyhow!("chat completion returned no content"))?;

        Ok(parse_content(&content))
    }
}
