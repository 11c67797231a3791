//! HTTP client for the speech-transcription capability.

use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::config::WhisperConfig;
use crate::error::ScanError;
use crate::models::Transcription;
use crate::sources::Transcriber;

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
    #[serde(default)]
    duration: f64,
}

/// Multipart transcription client for an OpenAI-compatible audio endpoint.
pub struct WhisperTranscriber {
    config: WhisperConfig,
    http_client: Client,
}

impl WhisperTranscriber {
    pub fn new(config: WhisperConfig) -> Result<Self, ScanError> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| ScanError::Transport(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            config,
            http_client,
        })
    }
}

#[async_trait::async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(
        &self,
        audio_path: &Path,
        language_hint: &str,
    ) -> Result<Transcription, ScanError> {
        if !audio_path.exists() {
            return Err(ScanError::NotFound(format!(
                "audio file {}",
                audio_path.display()
            )));
        }

        let bytes = tokio::fs::read(audio_path)
            .await
            .map_err(|e| ScanError::NotFound(format!("audio file {}: {}", audio_path.display(), e)))?;
        let file_name = audio_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "voice.ogg".to_string());

        // Voice notes come off the platform as ogg/opus.
        let part = Part::bytes(bytes)
            .file_name(file_name.clone())
            .mime_str("audio/ogg")
            .map_err(|e| ScanError::Validation(format!("bad mime type: {}", e)))?;
        let form = Form::new()
            .text("model", self.config.model.clone())
            .text("language", language_hint.to_string())
            .part("file", part);

        let url = format!(
            "{}/audio/transcriptions",
            self.config.api_url.trim_end_matches('/')
        );
        info!("Sending {} for transcription", file_name);

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ScanError::Transport(format!(
                        "transcription timed out after {}s",
                        self.config.timeout_seconds
                    ))
                } else if e.is_connect() {
                    ScanError::Transport(format!("cannot connect to transcriber at {}", url))
                } else {
                    ScanError::Transport(format!("transcription request failed: {}", e))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ScanError::Transport(format!(
                "transcription API error {}: {}",
                status, body
            )));
        }

        let body: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| ScanError::Validation(format!("bad transcription response: {}", e)))?;

        Ok(Transcription {
            text: body.text,
            language: language_hint.to_string(),
            duration_seconds: body.duration,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let transcriber = WhisperTranscriber::new(WhisperConfig::default()).unwrap();
        let err = transcriber
            .transcribe(Path::new("/nonexistent/voice.ogg"), "en")
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::NotFound(_)));
    }
}
