use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use crate::capture::Frame;
use crate::config::{InferenceConfig, Secret};

/// Fixed instruction sent with every frame. Only the text reply is used.
pub const SUGGESTION_PROMPT: &str = "Look at the person in this picture: their mood, who is around \
them, and the setting. Recommend one song that fits. Prefer tracks that are trending, nostalgic or \
viral right now, and only name songs that really exist on Spotify. Keep non-English titles in their \
original language. Reply with the song title and artist only, nothing else.";

const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InferenceError {
    #[error("inference service unreachable: {0}")]
    Transport(String),
    #[error("inference service answered with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("inference service returned an unusable reply: {0}")]
    Malformed(String),
}

/// Turns one frame into a free-form track suggestion.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn suggest(&self, frame: &Frame) -> Result<String, InferenceError>;
}

#[derive(Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Chat-completions vision request: the prompt plus the frame as a data URL.
pub struct OpenAiInferenceClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: Secret,
    model: String,
}

impl OpenAiInferenceClient {
    pub fn new(client: reqwest::Client, config: &InferenceConfig) -> Self {
        Self {
            client,
            endpoint: format!("{}/v1/chat/completions", config.api_base.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        }
    }
}

#[async_trait]
impl InferenceClient for OpenAiInferenceClient {
    async fn suggest(&self, frame: &Frame) -> Result<String, InferenceError> {
        let body = json!({
            "model": self.model,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": SUGGESTION_PROMPT },
                    { "type": "image_url", "image_url": { "url": frame.to_data_url() } },
                ],
            }],
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose())
            .json(&body)
            .send()
            .await
            .map_err(|err| InferenceError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            body.truncate(floor_char_boundary(&body, MAX_ERROR_BODY));
            return Err(InferenceError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let completion: ChatCompletion = response
            .json()
            .await
            .map_err(|err| InferenceError::Malformed(err.to_string()))?;

        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| InferenceError::Malformed("reply has no message content".into()))?;

        let suggestion = clean_suggestion(&content);
        if suggestion.is_empty() {
            return Err(InferenceError::Malformed("reply was empty".into()));
        }
        Ok(suggestion)
    }
}

/// Trims whitespace and one layer of wrapping quotes, which models like to add.
pub fn clean_suggestion(raw: &str) -> String {
    let trimmed = raw.trim();
    let unquoted = [('"', '"'), ('\'', '\''), ('“', '”'), ('«', '»')]
        .iter()
        .find_map(|(open, close)| {
            trimmed
                .strip_prefix(*open)
                .and_then(|rest| rest.strip_suffix(*close))
        })
        .unwrap_or(trimmed);
    unquoted.trim().to_string()
}

fn floor_char_boundary(s: &str, max: usize) -> usize {
    if s.len() <= max {
        return s.len();
    }
    (0..=max).rev().find(|&i| s.is_char_boundary(i)).unwrap_or(0)
}
