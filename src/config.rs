//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `chatsentry.toml` files. Components receive the relevant section by
//! value at construction time; there is no ambient global settings object.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::models::Severity;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Scan cycle settings.
    #[serde(default)]
    pub app: AppConfig,

    /// Classification capability settings.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Transcription capability settings.
    #[serde(default)]
    pub whisper: WhisperConfig,

    /// Local state store settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Reporting and notification settings.
    #[serde(default)]
    pub report: ReportConfig,

    /// Monitored chats with optional expected rosters.
    #[serde(default)]
    pub chats: Vec<ChatEntry>,
}

/// Scan cycle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Hours between scheduled scans; also the collection lookback window.
    #[serde(default = "default_scan_interval_hours")]
    pub scan_interval_hours: u64,

    /// Maximum messages per classification chunk.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Lower bound of the randomized inter-chat pacing delay, in seconds.
    #[serde(default = "default_pacing_min")]
    pub pacing_min_seconds: u64,

    /// Upper bound of the randomized inter-chat pacing delay, in seconds.
    #[serde(default = "default_pacing_max")]
    pub pacing_max_seconds: u64,

    /// Minimum severity that triggers an immediate per-incident
    /// notification instead of only appearing in the cycle summary.
    #[serde(default = "default_alert_threshold")]
    pub alert_threshold: Severity,

    /// Recipient id for alerts and summaries.
    #[serde(default)]
    pub admin_recipient: i64,

    /// Timeout applied to collector, roster, sink, and notification calls.
    #[serde(default = "default_call_timeout")]
    pub call_timeout_seconds: u64,

    /// Minutes between health-check sweeps.
    #[serde(default = "default_health_interval")]
    pub health_interval_minutes: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            scan_interval_hours: default_scan_interval_hours(),
            chunk_size: default_chunk_size(),
            pacing_min_seconds: default_pacing_min(),
            pacing_max_seconds: default_pacing_max(),
            alert_threshold: default_alert_threshold(),
            admin_recipient: 0,
            call_timeout_seconds: default_call_timeout(),
            health_interval_minutes: default_health_interval(),
        }
    }
}

fn default_scan_interval_hours() -> u64 {
    6
}

fn default_chunk_size() -> usize {
    50
}

fn default_pacing_min() -> u64 {
    10
}

fn default_pacing_max() -> u64 {
    30
}

fn default_alert_threshold() -> Severity {
    Severity::High
}

fn default_call_timeout() -> u64 {
    30
}

fn default_health_interval() -> u64 {
    15
}

/// Classification capability settings (OpenAI-compatible endpoint).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base API URL.
    #[serde(default = "default_llm_url")]
    pub api_url: String,

    /// Bearer token. Usually supplied via CHATSENTRY_LLM_KEY.
    #[serde(default)]
    pub api_key: String,

    /// Model name.
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Temperature for generation.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Request timeout in seconds.
    #[serde(default = "default_llm_timeout")]
    pub timeout_seconds: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_url: default_llm_url(),
            api_key: String::new(),
            model: default_llm_model(),
            temperature: default_temperature(),
            timeout_seconds: default_llm_timeout(),
        }
    }
}

fn default_llm_url() -> String {
    "https://api.cometapi.com/v1".to_string()
}

fn default_llm_model() -> String {
    "gpt-4-turbo".to_string()
}

fn default_temperature() -> f32 {
    0.3
}

fn default_llm_timeout() -> u64 {
    60
}

/// Transcription capability settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhisperConfig {
    /// Base API URL.
    #[serde(default = "default_llm_url")]
    pub api_url: String,

    /// Bearer token. Usually supplied via CHATSENTRY_WHISPER_KEY.
    #[serde(default)]
    pub api_key: String,

    /// Model name.
    #[serde(default = "default_whisper_model")]
    pub model: String,

    /// ISO-639-1 language hint for transcription.
    #[serde(default = "default_language")]
    pub language: String,

    /// Request timeout in seconds.
    #[serde(default = "default_llm_timeout")]
    pub timeout_seconds: u64,

    /// Timeout for downloading a voice attachment, in seconds.
    #[serde(default = "default_voice_download_timeout")]
    pub download_timeout_seconds: u64,

    /// Voice attachments larger than this are skipped.
    #[serde(default = "default_voice_max_size")]
    pub max_size_mb: u64,
}

impl Default for WhisperConfig {
    fn default() -> Self {
        Self {
            api_url: default_llm_url(),
            api_key: String::new(),
            model: default_whisper_model(),
            language: default_language(),
            timeout_seconds: default_llm_timeout(),
            download_timeout_seconds: default_voice_download_timeout(),
            max_size_mb: default_voice_max_size(),
        }
    }
}

fn default_whisper_model() -> String {
    "whisper-1".to_string()
}

fn default_language() -> String {
    "en".to_string()
}

fn default_voice_download_timeout() -> u64 {
    30
}

fn default_voice_max_size() -> u64 {
    50
}

/// Local state store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Processed-marker retention horizon, in days.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            retention_days: default_retention_days(),
        }
    }
}

fn default_db_path() -> String {
    "data/chatsentry.sqlite".to_string()
}

fn default_retention_days() -> u32 {
    30
}

/// Reporting and notification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Directory for the CSV reporting sink.
    #[serde(default = "default_report_dir")]
    pub output_dir: String,

    /// Webhook endpoint for the notification sink. Empty disables
    /// notifications (they are logged instead).
    #[serde(default)]
    pub webhook_url: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            output_dir: default_report_dir(),
            webhook_url: String::new(),
        }
    }
}

fn default_report_dir() -> String {
    "data/reports".to_string()
}

/// One monitored chat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatEntry {
    pub id: i64,

    /// Display name fallback when the live lookup fails.
    #[serde(default)]
    pub name: Option<String>,

    /// Expected member ids. Empty means no reconciliation for this chat.
    #[serde(default)]
    pub expected: Vec<i64>,
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but
    /// can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new("chatsentry.toml");

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings and only
    /// override when explicitly provided.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref db) = args.db {
            self.storage.db_path = db.display().to_string();
        }
        if let Some(interval) = args.interval_hours {
            self.app.scan_interval_hours = interval;
        }
        if let Some(ref model) = args.model {
            self.llm.model = model.clone();
        }
        if let Some(ref key) = args.llm_key {
            self.llm.api_key = key.clone();
        }
        if let Some(ref key) = args.whisper_key {
            self.whisper.api_key = key.clone();
        }
    }

    /// Cross-field sanity checks.
    fn validate(&self) -> Result<()> {
        if self.app.chunk_size == 0 {
            anyhow::bail!("app.chunk_size must be at least 1");
        }
        if self.app.pacing_min_seconds > self.app.pacing_max_seconds {
            anyhow::bail!("app.pacing_min_seconds must not exceed app.pacing_max_seconds");
        }
        if !(0.0..=1.0).contains(&self.llm.temperature) {
            anyhow::bail!("llm.temperature must be between 0.0 and 1.0");
        }
        Ok(())
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config {
            chats: vec![ChatEntry {
                id: -1001234567890,
                name: Some("Engineering".to_string()),
                expected: vec![],
            }],
            ..Config::default()
        };
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.app.scan_interval_hours, 6);
        assert_eq!(config.app.chunk_size, 50);
        assert_eq!(config.app.alert_threshold, Severity::High);
        assert_eq!(config.llm.model, "gpt-4-turbo");
        assert_eq!(config.whisper.model, "whisper-1");
    }

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
[app]
scan_interval_hours = 2
chunk_size = 25
alert_threshold = "critical"
admin_recipient = 42

[llm]
model = "gpt-4o"
temperature = 0.1

[[chats]]
id = -100500
name = "Ops"
expected = [1, 2, 3]

[[chats]]
id = -100501
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.app.scan_interval_hours, 2);
        assert_eq!(config.app.chunk_size, 25);
        assert_eq!(config.app.alert_threshold, Severity::Critical);
        assert_eq!(config.app.admin_recipient, 42);
        assert_eq!(config.llm.model, "gpt-4o");
        assert_eq!(config.chats.len(), 2);
        assert_eq!(config.chats[0].expected, vec![1, 2, 3]);
        assert!(config.chats[1].expected.is_empty());
    }

    #[test]
    fn test_validation_rejects_bad_pacing() {
        let mut config = Config::default();
        config.app.pacing_min_seconds = 60;
        config.app.pacing_max_seconds = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_zero_chunk() {
        let mut config = Config::default();
        config.app.chunk_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(!toml_str.is_empty());
        assert!(toml_str.contains("[app]"));
        assert!(toml_str.contains("[llm]"));
        assert!(toml_str.contains("[storage]"));
        assert!(toml_str.contains("[[chats]]"));
    }
}
