//! File-based message source.
//!
//! Reads chat export files (one JSON document per chat) from a directory
//! and serves them through the `MessageSource` and `RosterSource`
//! contracts. This is the bundled transport for offline scanning of
//! exported history; live platform adapters implement the same traits
//! elsewhere.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::ScanError;
use crate::models::{CapturedMessage, Participant};
use crate::sources::{MessageSource, RosterSource};

#[derive(Debug, Deserialize)]
struct ExportedMessage {
    message_id: i64,
    #[serde(default)]
    sender_id: Option<i64>,
    #[serde(default)]
    sender_handle: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    voice_file: Option<String>,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct ExportedParticipant {
    user_id: i64,
    #[serde(default)]
    handle: Option<String>,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
    #[serde(default)]
    is_bot: bool,
}

#[derive(Debug, Deserialize)]
struct ChatExport {
    chat_id: i64,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    messages: Vec<ExportedMessage>,
    #[serde(default)]
    participants: Vec<ExportedParticipant>,
}

#[derive(Debug)]
pub struct ExportSource {
    export_dir: PathBuf,
    chats: HashMap<i64, ChatExport>,
}

impl ExportSource {
    /// Load every `.json` export under the directory. Files that fail to
    /// parse are skipped with a warning rather than failing the load.
    pub fn load(export_dir: &Path) -> Result<Self, ScanError> {
        if !export_dir.is_dir() {
            return Err(ScanError::NotFound(format!(
                "export directory {}",
                export_dir.display()
            )));
        }

        let mut chats = HashMap::new();
        for entry in WalkDir::new(export_dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "json"))
        {
            let content = match std::fs::read_to_string(entry.path()) {
                Ok(content) => content,
                Err(e) => {
                    warn!("Cannot read export file {}: {}", entry.path().display(), e);
                    continue;
                }
            };
            match serde_json::from_str::<ChatExport>(&content) {
                Ok(export) => {
                    debug!(
                        "Loaded export for chat {} ({} messages)",
                        export.chat_id,
                        export.messages.len()
                    );
                    chats.insert(export.chat_id, export);
                }
                Err(e) => {
                    warn!("Skipping unparseable export {}: {}", entry.path().display(), e);
                }
            }
        }

        info!(
            "Loaded {} chat exports from {}",
            chats.len(),
            export_dir.display()
        );
        Ok(Self {
            export_dir: export_dir.to_path_buf(),
            chats,
        })
    }

    fn chat(&self, chat_id: i64) -> Result<&ChatExport, ScanError> {
        self.chats
            .get(&chat_id)
            .ok_or_else(|| ScanError::NotFound(format!("chat {} in export set", chat_id)))
    }

    fn voice_file(&self, chat_id: i64, message_id: i64) -> Option<PathBuf> {
        self.chats
            .get(&chat_id)?
            .messages
            .iter()
            .find(|m| m.message_id == message_id)?
            .voice_file
            .as_ref()
            .map(|rel| self.export_dir.join(rel))
    }
}

#[async_trait]
impl MessageSource for ExportSource {
    async fn collect(
        &self,
        chat_id: i64,
        lookback: Duration,
    ) -> Result<Vec<CapturedMessage>, ScanError> {
        let export = self.chat(chat_id)?;
        let cutoff = Utc::now()
            - ChronoDuration::seconds(lookback.as_secs().min(i64::MAX as u64) as i64);

        Ok(export
            .messages
            .iter()
            .filter(|m| m.timestamp >= cutoff)
            .map(|m| CapturedMessage {
                chat_id,
                message_id: m.message_id,
                sender_id: m.sender_id,
                sender_handle: m.sender_handle.clone(),
                text: m.text.clone(),
                has_voice: m.voice_file.is_some(),
                voice_path: None,
                voice_transcript: None,
                timestamp: m.timestamp,
            })
            .collect())
    }

    async fn chat_title(&self, chat_id: i64) -> Result<String, ScanError> {
        let export = self.chat(chat_id)?;
        export
            .name
            .clone()
            .ok_or_else(|| ScanError::NotFound(format!("name for chat {}", chat_id)))
    }

    /// Copy the exported audio file to a scratch location the analyzer
    /// may delete. Oversized attachments are skipped, not errors.
    async fn download_voice(
        &self,
        chat_id: i64,
        message_id: i64,
        _timeout: Duration,
        max_bytes: u64,
    ) -> Result<Option<PathBuf>, ScanError> {
        let Some(source) = self.voice_file(chat_id, message_id) else {
            return Ok(None);
        };
        if !source.exists() {
            warn!("Export references missing audio file {}", source.display());
            return Ok(None);
        }

        let size = tokio::fs::metadata(&source)
            .await
            .map_err(|e| ScanError::Transport(format!("cannot stat {}: {}", source.display(), e)))?
            .len();
        if size > max_bytes {
            debug!(
                "Skipping voice for message {}: {} bytes exceeds the cap",
                message_id, size
            );
            return Ok(None);
        }

        let scratch = std::env::temp_dir().join(format!(
            "chatsentry-voice-{}-{}.ogg",
            chat_id.unsigned_abs(),
            message_id
        ));
        tokio::fs::copy(&source, &scratch)
            .await
            .map_err(|e| ScanError::Transport(format!("cannot copy voice file: {}", e)))?;
        Ok(Some(scratch))
    }

    async fn is_connected(&self) -> bool {
        self.export_dir.is_dir()
    }
}

#[async_trait]
impl RosterSource for ExportSource {
    async fn list_participants(&self, chat_id: i64) -> Result<Vec<Participant>, ScanError> {
        let export = self.chat(chat_id)?;
        Ok(export
            .participants
            .iter()
            .map(|p| Participant {
                user_id: p.user_id,
                handle: p.handle.clone(),
                first_name: p.first_name.clone(),
                last_name: p.last_name.clone(),
                is_bot: p.is_bot,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_export(dir: &Path, file: &str, body: &str) {
        std::fs::write(dir.join(file), body).unwrap();
    }

    fn sample_export(chat_id: i64, timestamp: DateTime<Utc>) -> String {
        format!(
            r#"{{
                "chat_id": {},
                "name": "Ops",
                "messages": [
                    {{"message_id": 1, "sender_id": 10, "sender_handle": "ada",
                      "text": "hello", "timestamp": "{}"}}
                ],
                "participants": [
                    {{"user_id": 10, "handle": "ada"}}
                ]
            }}"#,
            chat_id,
            timestamp.to_rfc3339()
        )
    }

    #[tokio::test]
    async fn collect_respects_lookback_window() {
        let dir = tempfile::tempdir().unwrap();
        let recent = Utc::now() - ChronoDuration::minutes(5);
        write_export(dir.path(), "ops.json", &sample_export(-1, recent));
        let old = Utc::now() - ChronoDuration::days(30);
        write_export(dir.path(), "old.json", &sample_export(-2, old));

        let source = ExportSource::load(dir.path()).unwrap();

        let fresh = source
            .collect(-1, Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].sender_handle.as_deref(), Some("ada"));

        let stale = source
            .collect(-2, Duration::from_secs(3600))
            .await
            .unwrap();
        assert!(stale.is_empty());
    }

    #[tokio::test]
    async fn unparseable_export_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write_export(
            dir.path(),
            "ok.json",
            &sample_export(-1, Utc::now()),
        );
        write_export(dir.path(), "broken.json", "not json at all");

        let source = ExportSource::load(dir.path()).unwrap();
        assert_eq!(source.chat_title(-1).await.unwrap(), "Ops");
    }

    #[tokio::test]
    async fn unknown_chat_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let source = ExportSource::load(dir.path()).unwrap();
        let err = source
            .collect(-99, Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::NotFound(_)));
    }

    #[tokio::test]
    async fn roster_comes_from_the_export() {
        let dir = tempfile::tempdir().unwrap();
        write_export(dir.path(), "ops.json", &sample_export(-1, Utc::now()));

        let source = ExportSource::load(dir.path()).unwrap();
        let roster = source.list_participants(-1).await.unwrap();
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].user_id, 10);
    }

    #[tokio::test]
    async fn missing_export_dir_is_not_found() {
        let err = ExportSource::load(Path::new("/nonexistent/exports")).unwrap_err();
        assert!(matches!(err, ScanError::NotFound(_)));
    }
}
