//! Speech-to-text for inbound voice notes.

use crate::config::LlmConfig;
use crate::error::Result;
use anyhow::{anyhow, Context as _};
use async_trait::async_trait;

#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Turn audio bytes into text. Errors propagate; the caller decides
    /// whether a failed transcription drops the message or apologizes.
    async fn transcribe(&self, audio: Vec<u8>, mime_type: &str) -> Result<String>;
}

/// Whisper-style transcription over the OpenAI-compatible
/// `/audio/transcriptions` endpoint.
pub struct WhisperTranscriber {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl WhisperTranscriber {
    /// Build from LLM config; `None` when no API key is available, in
    /// which case voice notes simply aren't transcribed.
    pub fn from_config(config: &LlmConfig) -> Option<Self> {
        let api_key = config.resolve_api_key()?;
        Some(Self {
            http: reqwest::Client::new(),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            api_key,
            model: "whisper-1".to_string(),
        })
    }

    fn file_name(mime_type: &str) -> &'static str {
        match mime_type.split(';').next().unwrap_or_default().trim() {
            "audio/mpeg" | "audio/mp3" => "audio.mp3",
            "audio/wav" | "audio/x-wav" => "audio.wav",
            "audio/mp4" | "audio/m4a" => "audio.m4a",
            "audio/webm" => "audio.webm",
            _ => "audio.ogg",
        }
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(&self, audio: Vec<u8>, mime_type: &str) -> Result<String> {
        let part = reqwest::multipart::Part::bytes(audio)
            .file_name(Self::file_name(mime_type))
            .mime_str(mime_type)
            .with_context(|| format!("unusable media mime type: {mime_type}"))?;

        let form = reqwest::multipart::Form::new()
            .text("model", self.model.clone())
            .part("file", part);

        let response = self
            .http
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .context("transcription request failed")?;

        let status = response.status();
        let body: serde_json::Value = response
            .json()
            .await
            .context("transcription response was not JSON")?;

        if !status.is_success() {
            return Err(anyhow!("transcription endpoint returned {status}: {body}").into());
        }

        body.get("text")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow!("transcription response had no text field").into())
    }
}
