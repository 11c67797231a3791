//! Data models for the chat policy monitor.
//!
//! This module contains the core data structures shared across the
//! pipeline: captured messages, incidents, reconciliation reports, and the
//! per-cycle summaries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Severity level of an incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Low severity - borderline or low-confidence findings
    Low,
    /// Medium severity - clear policy violations of limited impact
    Medium,
    /// High severity - harassment, targeted spam, risky links
    High,
    /// Critical severity - credential leaks, active security threats
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    /// Returns an emoji representation of the severity.
    pub fn emoji(&self) -> &'static str {
        match self {
            Severity::Low => "🟢",
            Severity::Medium => "🟡",
            Severity::High => "🟠",
            Severity::Critical => "🔴",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity '{}'", other)),
        }
    }
}

/// Category of a policy violation. Closed enumeration: values outside this
/// set coming back from the classifier are rejected at the parsing boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentCategory {
    /// Confidential data exposure (credentials, keys, internal documents)
    Leak,
    /// Harassment, discrimination, abusive behavior
    Inappropriate,
    /// Unsolicited advertising or bulk messaging
    Spam,
    /// Off-topic discussion in a work channel
    OffTopic,
    /// Phishing, malicious links, social engineering
    SecurityRisk,
}

impl IncidentCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentCategory::Leak => "leak",
            IncidentCategory::Inappropriate => "inappropriate",
            IncidentCategory::Spam => "spam",
            IncidentCategory::OffTopic => "off_topic",
            IncidentCategory::SecurityRisk => "security_risk",
        }
    }
}

impl fmt::Display for IncidentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IncidentCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "leak" => Ok(IncidentCategory::Leak),
            "inappropriate" => Ok(IncidentCategory::Inappropriate),
            "spam" => Ok(IncidentCategory::Spam),
            "off_topic" => Ok(IncidentCategory::OffTopic),
            "security_risk" => Ok(IncidentCategory::SecurityRisk),
            other => Err(format!("unknown incident category '{}'", other)),
        }
    }
}

/// Review status of an incident. Transitions happen only through explicit
/// operator decisions; incidents are never deleted, only status-updated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    New,
    Confirmed,
    FalsePositive,
    Ignored,
}

impl IncidentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentStatus::New => "new",
            IncidentStatus::Confirmed => "confirmed",
            IncidentStatus::FalsePositive => "false_positive",
            IncidentStatus::Ignored => "ignored",
        }
    }

    /// Terminal statuses carry a resolution timestamp; the rest do not.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            IncidentStatus::Confirmed | IncidentStatus::FalsePositive
        )
    }
}

impl FromStr for IncidentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(IncidentStatus::New),
            "confirmed" => Ok(IncidentStatus::Confirmed),
            "false_positive" => Ok(IncidentStatus::FalsePositive),
            "ignored" => Ok(IncidentStatus::Ignored),
            other => Err(format!("unknown incident status '{}'", other)),
        }
    }
}

/// Lifecycle state of a scan run record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Running,
    Completed,
    Failed,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Running => "running",
            ScanStatus::Completed => "completed",
            ScanStatus::Failed => "failed",
        }
    }
}

impl FromStr for ScanStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(ScanStatus::Running),
            "completed" => Ok(ScanStatus::Completed),
            "failed" => Ok(ScanStatus::Failed),
            other => Err(format!("unknown scan status '{}'", other)),
        }
    }
}

/// A message captured from a monitored chat. Immutable once captured,
/// uniquely keyed by `(chat_id, message_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapturedMessage {
    pub chat_id: i64,
    pub message_id: i64,
    pub sender_id: Option<i64>,
    pub sender_handle: Option<String>,
    pub text: Option<String>,
    pub has_voice: bool,
    /// Transient path to the downloaded audio artifact, if any.
    /// Never persisted; removed after the transcription attempt.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub voice_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub voice_transcript: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl CapturedMessage {
    /// Whether this message carries anything worth classifying.
    pub fn has_content(&self) -> bool {
        self.text.as_deref().is_some_and(|t| !t.trim().is_empty()) || self.has_voice
    }
}

/// Result of transcribing a voice attachment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcription {
    pub text: String,
    pub language: String,
    pub duration_seconds: f64,
}

/// A detected policy violation, tied to the message that triggered it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    /// Store-assigned identity; `None` until persisted.
    pub id: Option<i64>,
    pub message_id: i64,
    pub chat_id: i64,
    pub chat_name: String,
    pub sender_id: Option<i64>,
    pub sender_handle: Option<String>,
    pub category: IncidentCategory,
    pub severity: Severity,
    pub description: String,
    /// Classifier confidence, clamped to [0, 1] at the parsing boundary.
    pub confidence: f64,
    pub status: IncidentStatus,
    pub detected_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<i64>,
}

/// Profile of a chat member as seen on the live roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: i64,
    pub handle: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub is_bot: bool,
}

impl Participant {
    /// A bare-id entry for members we expected but could not observe.
    pub fn bare(user_id: i64) -> Self {
        Self {
            user_id,
            handle: None,
            first_name: None,
            last_name: None,
            is_bot: false,
        }
    }
}

/// Outcome of reconciling one chat's live roster against its expected
/// roster. Always bound to exactly one chat and one point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantReport {
    pub chat_id: i64,
    pub chat_name: String,
    /// Expected but absent from the live roster. Bare ids only.
    pub missing: Vec<Participant>,
    /// Present live but not expected. Full profile snapshots.
    pub extra: Vec<Participant>,
    pub taken_at: DateTime<Utc>,
}

impl ParticipantReport {
    pub fn has_discrepancies(&self) -> bool {
        !self.missing.is_empty() || !self.extra.is_empty()
    }
}

/// Per-chat summary produced and consumed within one scan cycle.
#[derive(Debug, Clone)]
pub struct ChatAnalysisResult {
    pub chat_id: i64,
    pub chat_name: String,
    pub messages_analyzed: usize,
    pub voices_transcribed: usize,
    pub incidents: Vec<Incident>,
    /// Elapsed wall time for this chat, in seconds.
    pub processing_time: f64,
    pub participant_report: Option<ParticipantReport>,
}

impl ChatAnalysisResult {
    /// A zero-valued result for a chat with nothing new to analyze.
    pub fn empty(chat_id: i64, chat_name: &str, processing_time: f64) -> Self {
        Self {
            chat_id,
            chat_name: chat_name.to_string(),
            messages_analyzed: 0,
            voices_transcribed: 0,
            incidents: Vec::new(),
            processing_time,
            participant_report: None,
        }
    }
}

/// Cross-chat summary of one scan cycle. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalReport {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub chats_scanned: usize,
    pub total_messages: usize,
    pub total_voices: usize,
    pub total_incidents: usize,
    pub critical_incidents: usize,
    pub high_incidents: usize,
    pub medium_incidents: usize,
    pub low_incidents: usize,
    pub missing_participants: usize,
    pub extra_participants: usize,
    pub duration_seconds: f64,
    pub missing_ids: Vec<i64>,
    pub extra_ids: Vec<i64>,
}

/// Totals written into the run record at finalization.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanStats {
    pub chats_scanned: usize,
    pub messages_processed: usize,
    pub voices_transcribed: usize,
    pub incidents_found: usize,
}

impl ScanStats {
    /// Accumulate one chat's totals into the cycle totals.
    pub fn absorb(&mut self, result: &ChatAnalysisResult) {
        self.chats_scanned += 1;
        self.messages_processed += result.messages_analyzed;
        self.voices_transcribed += result.voices_transcribed;
        self.incidents_found += result.incidents.len();
    }
}

/// Durable record of one scan cycle.
#[derive(Debug, Clone)]
pub struct ScanRun {
    pub id: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub chats_scanned: usize,
    pub messages_processed: usize,
    pub voices_transcribed: usize,
    pub incidents_found: usize,
    pub status: ScanStatus,
    pub error_message: Option<String>,
    pub duration_seconds: Option<f64>,
}
