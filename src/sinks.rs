//! Bundled reporting and notification sinks.
//!
//! `WebhookNotifier` posts human-readable alerts to a Slack-compatible
//! webhook; with no webhook configured it degrades to log-only mode.
//! `CsvReportSink` appends incidents, roster reports, and cycle summaries
//! to CSV files under the configured report directory.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::config::ReportConfig;
use crate::error::ScanError;
use crate::models::{GlobalReport, Incident, ParticipantReport};
use crate::sources::{NotificationSink, ReportingSink};

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(15);

pub struct WebhookNotifier {
    webhook_url: String,
    http_client: Client,
}

impl WebhookNotifier {
    pub fn new(config: &ReportConfig) -> Result<Self, ScanError> {
        let http_client = Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .map_err(|e| ScanError::Transport(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            webhook_url: config.webhook_url.clone(),
            http_client,
        })
    }

    fn render_incident(incident: &Incident) -> String {
        let sender = match (&incident.sender_handle, incident.sender_id) {
            (Some(handle), Some(id)) => format!("@{} ({})", handle, id),
            (Some(handle), None) => format!("@{}", handle),
            (None, Some(id)) => format!("id {}", id),
            (None, None) => "unknown sender".to_string(),
        };
        format!(
            "{} {} incident in {}\nCategory: {}\nFrom: {}\nMessage: {}\n{}\nConfidence: {:.0}%",
            incident.severity.emoji(),
            incident.severity.to_string().to_uppercase(),
            incident.chat_name,
            incident.category,
            sender,
            incident.message_id,
            incident.description,
            incident.confidence * 100.0
        )
    }

    fn render_summary(report: &GlobalReport) -> String {
        let mut text = format!(
            "Scan cycle finished in {:.0}s\nChats: {}  Messages: {}  Voices: {}\nIncidents: {} (🔴 {}  🟠 {}  🟡 {}  🟢 {})",
            report.duration_seconds,
            report.chats_scanned,
            report.total_messages,
            report.total_voices,
            report.total_incidents,
            report.critical_incidents,
            report.high_incidents,
            report.medium_incidents,
            report.low_incidents
        );
        if report.missing_participants > 0 || report.extra_participants > 0 {
            text.push_str(&format!(
                "\nRoster: {} missing, {} extra",
                report.missing_participants, report.extra_participants
            ));
        }
        text
    }

    fn render_health_alert(failures: &[String]) -> String {
        format!("⚠️ Health check failed: {}", failures.join(", "))
    }

    async fn post(&self, text: String) -> Result<(), ScanError> {
        if self.webhook_url.is_empty() {
            info!("Notification (no webhook configured):\n{}", text);
            return Ok(());
        }

        let response = self
            .http_client
            .post(&self.webhook_url)
            .json(&json!({ "text": text }))
            .send()
            .await
            .map_err(|e| ScanError::Transport(format!("webhook request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(ScanError::Transport(format!(
                "webhook returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationSink for WebhookNotifier {
    async fn notify_incident(&self, _recipient: i64, incident: &Incident) -> Result<(), ScanError> {
        self.post(Self::render_incident(incident)).await
    }

    async fn notify_summary(
        &self,
        _recipient: i64,
        report: &GlobalReport,
    ) -> Result<(), ScanError> {
        self.post(Self::render_summary(report)).await
    }

    async fn notify_health_alert(
        &self,
        _recipient: i64,
        failures: &[String],
    ) -> Result<(), ScanError> {
        self.post(Self::render_health_alert(failures)).await
    }

    async fn ping(&self) -> bool {
        if self.webhook_url.is_empty() {
            return true;
        }
        // Any HTTP response proves the endpoint is reachable.
        self.http_client
            .head(&self.webhook_url)
            .send()
            .await
            .is_ok()
    }
}

/// Appends scan output to CSV files under one report directory.
pub struct CsvReportSink {
    output_dir: PathBuf,
}

impl CsvReportSink {
    pub fn new(config: &ReportConfig) -> Result<Self, ScanError> {
        let output_dir = PathBuf::from(&config.output_dir);
        std::fs::create_dir_all(&output_dir).map_err(|e| {
            ScanError::Persistence(format!(
                "cannot create report directory {}: {}",
                output_dir.display(),
                e
            ))
        })?;
        Ok(Self { output_dir })
    }

    /// Append rows to a CSV file, writing the header only on creation.
    fn append_rows(
        path: &Path,
        header: &[&str],
        rows: Vec<Vec<String>>,
    ) -> Result<(), ScanError> {
        let new_file = !path.exists();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| {
                ScanError::Persistence(format!("cannot open {}: {}", path.display(), e))
            })?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if new_file {
            writer
                .write_record(header)
                .map_err(|e| ScanError::Persistence(e.to_string()))?;
        }
        for row in rows {
            writer
                .write_record(&row)
                .map_err(|e| ScanError::Persistence(e.to_string()))?;
        }
        writer
            .flush()
            .map_err(|e| ScanError::Persistence(e.to_string()))
    }
}

#[async_trait]
impl ReportingSink for CsvReportSink {
    async fn append_incidents(&self, incidents: &[Incident]) -> Result<(), ScanError> {
        let rows = incidents
            .iter()
            .map(|i| {
                vec![
                    i.detected_at.to_rfc3339(),
                    i.chat_name.clone(),
                    i.chat_id.to_string(),
                    i.message_id.to_string(),
                    i.sender_handle.clone().unwrap_or_default(),
                    i.category.to_string(),
                    i.severity.to_string(),
                    i.description.clone(),
                    format!("{:.2}", i.confidence),
                    i.status.as_str().to_string(),
                ]
            })
            .collect();
        Self::append_rows(
            &self.output_dir.join("incidents.csv"),
            &[
                "detected_at",
                "chat_name",
                "chat_id",
                "message_id",
                "sender",
                "category",
                "severity",
                "description",
                "confidence",
                "status",
            ],
            rows,
        )
    }

    async fn append_participant_report(
        &self,
        report: &ParticipantReport,
    ) -> Result<(), ScanError> {
        let rows = report
            .missing
            .iter()
            .map(|p| (p, "missing"))
            .chain(report.extra.iter().map(|p| (p, "extra")))
            .map(|(p, classification)| {
                vec![
                    report.taken_at.to_rfc3339(),
                    report.chat_name.clone(),
                    report.chat_id.to_string(),
                    p.user_id.to_string(),
                    p.handle.clone().unwrap_or_default(),
                    classification.to_string(),
                ]
            })
            .collect();
        Self::append_rows(
            &self.output_dir.join("participants.csv"),
            &[
                "taken_at",
                "chat_name",
                "chat_id",
                "user_id",
                "handle",
                "classification",
            ],
            rows,
        )
    }

    async fn append_scan_summary(&self, report: &GlobalReport) -> Result<(), ScanError> {
        let row = vec![
            report.start_time.to_rfc3339(),
            report.end_time.to_rfc3339(),
            report.chats_scanned.to_string(),
            report.total_messages.to_string(),
            report.total_voices.to_string(),
            report.total_incidents.to_string(),
            report.critical_incidents.to_string(),
            report.high_incidents.to_string(),
            report.medium_incidents.to_string(),
            report.low_incidents.to_string(),
            report.missing_participants.to_string(),
            report.extra_participants.to_string(),
            format!("{:.1}", report.duration_seconds),
        ];
        Self::append_rows(
            &self.output_dir.join("scan_summaries.csv"),
            &[
                "start_time",
                "end_time",
                "chats_scanned",
                "total_messages",
                "total_voices",
                "total_incidents",
                "critical",
                "high",
                "medium",
                "low",
                "missing_participants",
                "extra_participants",
                "duration_seconds",
            ],
            vec![row],
        )
    }
}
