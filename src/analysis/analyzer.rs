//! Chunked message analyzer.
//!
//! Turns one chat's captured messages into incidents: filters out empty
//! messages, drops everything the dedup ledger has already seen,
//! transcribes voice notes, classifies the rest in fixed-size chunks, and
//! enriches the findings with sender identity.
//!
//! The partial-failure contract lives here: a chunk's messages are marked
//! processed only after its classification call succeeds, so a failed
//! chunk becomes eligible for reprocessing on a future cycle instead of
//! being silently lost.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::error::ScanError;
use crate::models::{
    CapturedMessage, ChatAnalysisResult, Incident, IncidentCategory, IncidentStatus, Severity,
};
use crate::sources::{Classifier, RawIncident, Transcriber};
use crate::store::StateStore;

/// Partition messages into fixed-capacity ordered chunks. A message is
/// never split across chunks; concatenating the chunks reproduces the
/// input exactly.
pub fn chunk_messages(messages: &[CapturedMessage], capacity: usize) -> Vec<&[CapturedMessage]> {
    messages.chunks(capacity.max(1)).collect()
}

/// Validate one raw classifier incident at the parsing boundary.
///
/// Out-of-enum category or severity values reject the entry; confidence is
/// clamped into [0, 1]. Sender fields stay unset until enrichment.
fn validate_incident(
    raw: &RawIncident,
    chat_id: i64,
    chat_name: &str,
) -> Result<Incident, ScanError> {
    let category: IncidentCategory = raw
        .category
        .parse()
        .map_err(ScanError::Validation)?;
    let severity: Severity = raw.severity.parse().map_err(ScanError::Validation)?;

    Ok(Incident {
        id: None,
        message_id: raw.message_id,
        chat_id,
        chat_name: chat_name.to_string(),
        sender_id: None,
        sender_handle: None,
        category,
        severity,
        description: raw.description.clone(),
        confidence: raw.confidence.clamp(0.0, 1.0),
        status: IncidentStatus::New,
        detected_at: Utc::now(),
        resolved_at: None,
        resolved_by: None,
    })
}

/// Drives classification and transcription for one chat at a time.
pub struct ChatAnalyzer {
    classifier: Arc<dyn Classifier>,
    transcriber: Arc<dyn Transcriber>,
    store: StateStore,
    chunk_size: usize,
    language_hint: String,
}

impl ChatAnalyzer {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        transcriber: Arc<dyn Transcriber>,
        store: StateStore,
        chunk_size: usize,
        language_hint: String,
    ) -> Self {
        Self {
            classifier,
            transcriber,
            store,
            chunk_size,
            language_hint,
        }
    }

    /// Full processing of one chat's captured messages.
    pub async fn process_chat(
        &self,
        chat_id: i64,
        chat_name: &str,
        messages: Vec<CapturedMessage>,
    ) -> Result<ChatAnalysisResult, ScanError> {
        let start = Instant::now();
        info!(
            "Processing chat {} ({}) with {} messages",
            chat_name,
            chat_id,
            messages.len()
        );

        // Keep only messages with text or a voice attachment.
        let valid: Vec<CapturedMessage> =
            messages.into_iter().filter(|m| m.has_content()).collect();

        // Dedup against the processed-marker ledger.
        let all_ids: Vec<i64> = valid.iter().map(|m| m.message_id).collect();
        let new_ids = self.store.filter_unprocessed(chat_id, &all_ids).await?;
        if new_ids.len() < valid.len() {
            info!(
                "Deduplication: {} messages already analyzed, {} new",
                valid.len() - new_ids.len(),
                new_ids.len()
            );
        }
        let new_set: std::collections::HashSet<i64> = new_ids.into_iter().collect();
        let mut working: Vec<CapturedMessage> = valid
            .into_iter()
            .filter(|m| new_set.contains(&m.message_id))
            .collect();

        if working.is_empty() {
            info!("No new valid messages to analyze in chat {}", chat_id);
            return Ok(ChatAnalysisResult::empty(
                chat_id,
                chat_name,
                start.elapsed().as_secs_f64(),
            ));
        }

        // Transcribe voice notes; the audio artifact is removed after the
        // attempt regardless of outcome.
        for msg in working.iter_mut() {
            if !msg.has_voice {
                continue;
            }
            let Some(audio_path) = msg.voice_path.take() else {
                continue;
            };

            match self
                .transcriber
                .transcribe(&audio_path, &self.language_hint)
                .await
            {
                Ok(transcription) => {
                    let annotation = format!("\n[Voice transcript] {}", transcription.text);
                    match msg.text.as_mut() {
                        Some(text) => text.push_str(&annotation),
                        None => msg.text = Some(annotation),
                    }
                    msg.voice_transcript = Some(transcription.text);
                }
                Err(e) => {
                    warn!(
                        "Failed to transcribe voice for message {}: {}",
                        msg.message_id, e
                    );
                }
            }

            if let Err(e) = tokio::fs::remove_file(&audio_path).await {
                warn!(
                    "Failed to delete temp file {}: {}",
                    audio_path.display(),
                    e
                );
            } else {
                debug!("Temporary voice file {} deleted", audio_path.display());
            }
        }
        let voices_transcribed = working
            .iter()
            .filter(|m| m.has_voice && m.voice_transcript.is_some())
            .count();

        info!(
            "Analyzing {} messages ({} voices transcribed)",
            working.len(),
            voices_transcribed
        );

        // Classify chunk by chunk, sequentially. A failed chunk is logged
        // and skipped without marking, so its messages stay eligible.
        let chunks = chunk_messages(&working, self.chunk_size);
        let chunk_count = chunks.len();
        let mut incidents: Vec<Incident> = Vec::new();

        for (i, chunk) in chunks.into_iter().enumerate() {
            info!(
                "Analyzing chunk {}/{} in chat {} ({} messages)",
                i + 1,
                chunk_count,
                chat_name,
                chunk.len()
            );
            match self.classifier.classify(chunk, chat_name).await {
                Ok(outcome) => {
                    for raw in &outcome.incidents {
                        match validate_incident(raw, chat_id, chat_name) {
                            Ok(incident) => incidents.push(incident),
                            Err(e) => warn!(
                                "Rejected incident for message {}: {}",
                                raw.message_id, e
                            ),
                        }
                    }
                    // The call itself succeeded, so the chunk counts as
                    // analyzed even if individual entries were rejected.
                    let chunk_ids: Vec<i64> = chunk.iter().map(|m| m.message_id).collect();
                    self.store.mark_processed(chat_id, &chunk_ids).await?;
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(
                        "Failed to analyze chunk {}/{} in chat {}: {}",
                        i + 1,
                        chunk_count,
                        chat_id,
                        e
                    );
                }
            }
        }

        // Enrich incidents with sender identity from the working set. An
        // incident pointing at an unknown message id keeps its sender
        // fields unset rather than failing the batch.
        let by_id: HashMap<i64, &CapturedMessage> =
            working.iter().map(|m| (m.message_id, m)).collect();
        for incident in incidents.iter_mut() {
            if let Some(msg) = by_id.get(&incident.message_id) {
                incident.sender_id = msg.sender_id;
                incident.sender_handle = msg.sender_handle.clone();
            }
        }

        let processing_time = start.elapsed().as_secs_f64();
        info!(
            "Chat {} processed in {:.2}s: {} incidents found",
            chat_name,
            processing_time,
            incidents.len()
        );

        Ok(ChatAnalysisResult {
            chat_id,
            chat_name: chat_name.to_string(),
            messages_analyzed: working.len(),
            voices_transcribed,
            incidents,
            processing_time,
            participant_report: None,
        })
    }
}
