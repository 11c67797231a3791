//! HTTP client for the text-classification capability.
//!
//! Talks to an OpenAI-compatible chat-completions endpoint with a strict
//! JSON response contract. Network and timeout problems surface as
//! `Transport`; a response that is not the agreed JSON shape surfaces as
//! `Validation` so the caller can tell the two apart.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::LlmConfig;
use crate::error::ScanError;
use crate::models::CapturedMessage;
use crate::sources::{ClassificationOutcome, ClassificationSummary, Classifier, RawIncident};

const SYSTEM_PROMPT: &str = r#"You are a security review system for monitored workplace group chats.
Your task is to analyze messages and flag policy violations.

VIOLATION CATEGORIES:
1. leak - confidential information exposure (passwords, API keys, internal data)
2. inappropriate - misconduct (insults, harassment, discrimination)
3. spam - spam or advertising for third-party services
4. off_topic - non-work discussion in a work chat
5. security_risk - potential security threat (phishing, malicious links)

RESPONSE FORMAT (strict JSON):
{
  "incidents": [
    {
      "message_id": <int>,
      "category": "<leak|inappropriate|spam|off_topic|security_risk>",
      "severity": "<low|medium|high|critical>",
      "description": "<short description of the violation>",
      "confidence": <float 0-1>
    }
  ],
  "summary": {
    "total_analyzed": <int>,
    "incidents_found": <int>,
    "risk_level": "<none|low|medium|high>"
  }
}

Analyze the messages and reply with JSON only. Do not add any commentary outside the JSON."#;

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    response_format: ResponseFormat,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: String,
}

/// The JSON body the model is instructed to produce.
#[derive(Debug, Deserialize)]
struct AnalysisBody {
    incidents: Vec<RawIncident>,
    summary: ClassificationSummary,
}

/// Chat-completions classifier client.
pub struct LlmClassifier {
    config: LlmConfig,
    http_client: Client,
}

impl LlmClassifier {
    pub fn new(config: LlmConfig) -> Result<Self, ScanError> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| ScanError::Transport(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    /// Format one chunk as `[ID: xxx] [timestamp] @handle: text` lines.
    fn format_messages(chunk: &[CapturedMessage]) -> String {
        let mut formatted = Vec::with_capacity(chunk.len());
        for msg in chunk {
            let timestamp = msg.timestamp.format("%Y-%m-%d %H:%M");
            let handle = msg.sender_handle.as_deref().unwrap_or("unknown");
            let text = msg.text.as_deref().unwrap_or("");
            formatted.push(format!(
                "[ID: {}] [{}] @{}: {}",
                msg.message_id, timestamp, handle, text
            ));
        }
        formatted.join("\n")
    }

    fn build_user_prompt(chunk: &[CapturedMessage], chat_context: &str) -> String {
        format!(
            "Chat: \"{}\"\n\nMessages to analyze:\n---\n{}\n---\n\nAnalyze these messages and reply in the JSON format.",
            chat_context,
            Self::format_messages(chunk)
        )
    }

    fn parse_body(content: &str) -> Result<ClassificationOutcome, ScanError> {
        let body: AnalysisBody = serde_json::from_str(content)
            .map_err(|e| ScanError::Validation(format!("classifier returned bad JSON: {}", e)))?;
        Ok(ClassificationOutcome {
            incidents: body.incidents,
            summary: body.summary,
        })
    }
}

#[async_trait::async_trait]
impl Classifier for LlmClassifier {
    async fn classify(
        &self,
        chunk: &[CapturedMessage],
        chat_context: &str,
    ) -> Result<ClassificationOutcome, ScanError> {
        if chunk.is_empty() {
            return Ok(ClassificationOutcome {
                incidents: Vec::new(),
                summary: ClassificationSummary {
                    total_analyzed: 0,
                    incidents_found: 0,
                    risk_level: "none".into(),
                },
            });
        }

        let url = format!("{}/chat/completions", self.config.api_url.trim_end_matches('/'));
        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: Self::build_user_prompt(chunk, chat_context),
                },
            ],
            response_format: ResponseFormat { kind: "json_object" },
            temperature: self.config.temperature,
        };

        info!("Sending {} messages to the classifier", chunk.len());

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ScanError::Transport(format!(
                        "classifier timed out after {}s",
                        self.config.timeout_seconds
                    ))
                } else if e.is_connect() {
                    ScanError::Transport(format!("cannot connect to classifier at {}", url))
                } else {
                    ScanError::Transport(format!("classifier request failed: {}", e))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ScanError::Transport(format!(
                "classifier API error {}: {}",
                status, body
            )));
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| ScanError::Validation(format!("bad completion envelope: {}", e)))?;

        let content = chat_response
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or_else(|| ScanError::Validation("completion had no choices".into()))?;

        debug!("Classifier response: {}", content);
        Self::parse_body(content)
    }
}
