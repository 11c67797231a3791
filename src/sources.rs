//! Capability contracts for every external collaborator.
//!
//! The core never inspects concrete platform types: the message transport,
//! classification and transcription services, roster/config source, and
//! the reporting and notification sinks are all consumed through these
//! traits. Adapters for live platforms implement them outside the core.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ScanError;
use crate::models::{
    CapturedMessage, GlobalReport, Incident, Participant, ParticipantReport, Transcription,
};

/// A raw incident as returned by the classification capability, before the
/// analyzer's parsing-boundary validation. Category and severity stay
/// stringly typed here on purpose: rejecting out-of-enum values is the
/// analyzer's job, not the transport's.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct RawIncident {
    pub message_id: i64,
    pub category: String,
    pub severity: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub confidence: f64,
}

/// Aggregate summary attached to one classification response.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ClassificationSummary {
    pub total_analyzed: usize,
    pub incidents_found: usize,
    pub risk_level: String,
}

/// One classification response: raw incidents plus the summary block.
#[derive(Debug, Clone)]
pub struct ClassificationOutcome {
    pub incidents: Vec<RawIncident>,
    pub summary: ClassificationSummary,
}

/// Source of captured messages for monitored chats.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Collect messages from the given chat over the lookback window.
    async fn collect(
        &self,
        chat_id: i64,
        lookback: Duration,
    ) -> Result<Vec<CapturedMessage>, ScanError>;

    /// Best-effort display-name lookup for a chat.
    async fn chat_title(&self, chat_id: i64) -> Result<String, ScanError>;

    /// Download a voice attachment to a temporary file. Returns `None` when
    /// the attachment was rejected for size or the download timed out;
    /// those are expected-absent cases, not errors.
    async fn download_voice(
        &self,
        chat_id: i64,
        message_id: i64,
        timeout: Duration,
        max_bytes: u64,
    ) -> Result<Option<PathBuf>, ScanError>;

    /// Connectivity probe for the health check.
    async fn is_connected(&self) -> bool;
}

/// The external text-classification capability.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Classify one chunk of messages, with the chat's display name as
    /// context. Fails with `Transport` for network/timeout problems and
    /// `Validation` for malformed responses.
    async fn classify(
        &self,
        chunk: &[CapturedMessage],
        chat_context: &str,
    ) -> Result<ClassificationOutcome, ScanError>;
}

/// The external speech-transcription capability.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe an audio file. Fails with `NotFound` if the path does
    /// not exist.
    async fn transcribe(
        &self,
        audio_path: &Path,
        language_hint: &str,
    ) -> Result<Transcription, ScanError>;
}

/// Live membership roster for a chat.
#[async_trait]
pub trait RosterSource: Send + Sync {
    async fn list_participants(&self, chat_id: i64) -> Result<Vec<Participant>, ScanError>;
}

/// Configuration-backed registry: which chats to monitor and which members
/// each chat is expected to have.
#[async_trait]
pub trait ChatRegistry: Send + Sync {
    /// `(chat_id, display name)` pairs for every monitored chat.
    async fn monitored_chats(&self) -> Result<Vec<(i64, String)>, ScanError>;

    /// Expected member ids for one chat. Empty means reconciliation is
    /// skipped for that chat.
    async fn expected_roster(&self, chat_id: i64) -> Result<Vec<i64>, ScanError>;
}

/// External reporting store. Best-effort from the core's perspective:
/// failures are logged by callers, never propagated as cycle failure.
#[async_trait]
pub trait ReportingSink: Send + Sync {
    async fn append_incidents(&self, incidents: &[Incident]) -> Result<(), ScanError>;

    async fn append_participant_report(&self, report: &ParticipantReport)
        -> Result<(), ScanError>;

    async fn append_scan_summary(&self, report: &GlobalReport) -> Result<(), ScanError>;
}

/// Outbound notification channel (at-least-once; duplicates acceptable).
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify_incident(&self, recipient: i64, incident: &Incident) -> Result<(), ScanError>;

    async fn notify_summary(&self, recipient: i64, report: &GlobalReport)
        -> Result<(), ScanError>;

    async fn notify_health_alert(&self, recipient: i64, failures: &[String])
        -> Result<(), ScanError>;

    /// Liveness probe for the health check.
    async fn ping(&self) -> bool;
}
