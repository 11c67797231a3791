//! SQLite-backed dedup and state store.
//!
//! Exclusive owner of all durable state: captured messages, incidents,
//! participant snapshots, scan run records, and the processed-marker
//! ledger that is the dedup source of truth across restarts.
//!
//! All access goes through a single background connection; every write is
//! an auto-committing statement or a small batch transaction. No
//! transaction ever spans an external call.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension};
use std::collections::HashSet;
use std::path::Path;
use tokio_rusqlite::Connection;
use tracing::{debug, info};

use crate::error::ScanError;
use crate::models::{
    CapturedMessage, Incident, IncidentStatus, ParticipantReport, ScanRun, ScanStats, ScanStatus,
    Severity, IncidentCategory,
};

/// Schema, applied idempotently at open.
///
/// Convention notes:
/// - Timestamps are RFC 3339 TEXT in UTC.
/// - `processed_messages` is the dedup ledger: a row means the message was
///   part of a successfully classified chunk and must never be resubmitted.
const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    chat_id INTEGER NOT NULL,
    message_id INTEGER NOT NULL,
    sender_id INTEGER,
    sender_handle TEXT,
    text TEXT,
    has_voice INTEGER NOT NULL DEFAULT 0,
    voice_transcript TEXT,
    timestamp TEXT NOT NULL,
    collected_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    UNIQUE(chat_id, message_id)
);
CREATE INDEX IF NOT EXISTS idx_message_timestamp ON messages(chat_id, timestamp);

CREATE TABLE IF NOT EXISTS incidents (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    message_id INTEGER NOT NULL,
    chat_id INTEGER NOT NULL,
    chat_name TEXT NOT NULL,
    sender_id INTEGER,
    sender_handle TEXT,
    category TEXT NOT NULL,
    severity TEXT NOT NULL,
    description TEXT NOT NULL,
    confidence REAL NOT NULL,
    status TEXT NOT NULL DEFAULT 'new',
    detected_at TEXT NOT NULL,
    resolved_at TEXT,
    resolved_by INTEGER,
    FOREIGN KEY (chat_id, message_id) REFERENCES messages(chat_id, message_id)
);
CREATE INDEX IF NOT EXISTS idx_incident_status ON incidents(status, severity);
CREATE INDEX IF NOT EXISTS idx_incident_chat ON incidents(chat_id, detected_at);

CREATE TABLE IF NOT EXISTS participants (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    chat_id INTEGER NOT NULL,
    user_id INTEGER NOT NULL,
    handle TEXT,
    first_name TEXT,
    last_name TEXT,
    is_bot INTEGER NOT NULL DEFAULT 0,
    classification TEXT NOT NULL CHECK (classification IN ('ok', 'missing', 'extra')),
    snapshot_at TEXT NOT NULL,
    UNIQUE(chat_id, user_id, snapshot_at)
);
CREATE INDEX IF NOT EXISTS idx_participant_chat ON participants(chat_id, snapshot_at);

CREATE TABLE IF NOT EXISTS scan_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    start_time TEXT NOT NULL,
    end_time TEXT,
    chats_scanned INTEGER NOT NULL DEFAULT 0,
    messages_processed INTEGER NOT NULL DEFAULT 0,
    voices_transcribed INTEGER NOT NULL DEFAULT 0,
    incidents_found INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'running',
    error_message TEXT,
    duration_seconds REAL
);
CREATE INDEX IF NOT EXISTS idx_scan_date ON scan_runs(start_time);

CREATE TABLE IF NOT EXISTS processed_messages (
    chat_id INTEGER NOT NULL,
    message_id INTEGER NOT NULL,
    processed_at TEXT NOT NULL,
    PRIMARY KEY (chat_id, message_id)
);
CREATE INDEX IF NOT EXISTS idx_processed_at ON processed_messages(processed_at);
"#;

// Fixed-width UTC form so stored timestamps compare lexicographically.
fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>, ScanError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ScanError::Persistence(format!("corrupt timestamp '{}': {}", s, e)))
}

/// Handle to the local state store.
#[derive(Clone)]
pub struct StateStore {
    conn: Connection,
}

impl StateStore {
    /// Open (and initialize) the store at the given path.
    pub async fn open(path: &Path) -> Result<Self, ScanError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(ScanError::storage)?;
            }
        }

        info!("Opening state store at {}", path.display());
        let conn = Connection::open(path).await.map_err(ScanError::storage)?;
        Self::init(conn).await
    }

    /// In-memory store for tests.
    pub async fn open_in_memory() -> Result<Self, ScanError> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(ScanError::storage)?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self, ScanError> {
        conn.call(|conn| {
            conn.execute_batch(SCHEMA_SQL)?;
            Ok::<_, rusqlite::Error>(())
        })
        .await
        .map_err(ScanError::storage)?;
        Ok(Self { conn })
    }

    /// `SELECT 1` liveness probe for the health check.
    pub async fn probe(&self) -> Result<(), ScanError> {
        self.conn
            .call(|conn| {
                conn.query_row("SELECT 1", [], |_| Ok(()))?;
                Ok::<_, rusqlite::Error>(())
            })
            .await
            .map_err(ScanError::storage)
    }

    /// Return the subset of `message_ids` not yet marked processed for this
    /// chat, in their original order. Safe on empty input; no side effects.
    pub async fn filter_unprocessed(
        &self,
        chat_id: i64,
        message_ids: &[i64],
    ) -> Result<Vec<i64>, ScanError> {
        if message_ids.is_empty() {
            return Ok(Vec::new());
        }

        let ids = message_ids.to_vec();
        self.conn
            .call(move |conn| {
                let mut stmt = conn
                    .prepare("SELECT message_id FROM processed_messages WHERE chat_id = ?1")?;
                let processed: HashSet<i64> = stmt
                    .query_map(params![chat_id], |row| row.get(0))?
                    .collect::<Result<_, _>>()?;
                Ok::<_, rusqlite::Error>(ids
                    .into_iter()
                    .filter(|id| !processed.contains(id))
                    .collect())
            })
            .await
            .map_err(ScanError::storage)
    }

    /// Record message ids as analyzed. Idempotent: re-marking an
    /// already-processed id is a no-op.
    pub async fn mark_processed(&self, chat_id: i64, message_ids: &[i64]) -> Result<(), ScanError> {
        if message_ids.is_empty() {
            return Ok(());
        }

        let ids = message_ids.to_vec();
        let now = ts(Utc::now());
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                {
                    let mut stmt = tx.prepare(
                        "INSERT OR IGNORE INTO processed_messages (chat_id, message_id, processed_at)
                         VALUES (?1, ?2, ?3)",
                    )?;
                    for id in &ids {
                        stmt.execute(params![chat_id, id, now])?;
                    }
                }
                tx.commit()?;
                Ok::<_, rusqlite::Error>(())
            })
            .await
            .map_err(ScanError::storage)
    }

    /// Idempotent upsert of captured messages, keyed by
    /// `(chat_id, message_id)`. Duplicates across calls do not error.
    pub async fn save_messages(&self, messages: &[CapturedMessage]) -> Result<(), ScanError> {
        if messages.is_empty() {
            return Ok(());
        }

        let messages = messages.to_vec();
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                {
                    let mut stmt = tx.prepare(
                        "INSERT INTO messages
                           (chat_id, message_id, sender_id, sender_handle, text,
                            has_voice, voice_transcript, timestamp)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                         ON CONFLICT(chat_id, message_id) DO NOTHING",
                    )?;
                    for msg in &messages {
                        stmt.execute(params![
                            msg.chat_id,
                            msg.message_id,
                            msg.sender_id,
                            msg.sender_handle,
                            msg.text,
                            msg.has_voice,
                            msg.voice_transcript,
                            ts(msg.timestamp),
                        ])?;
                    }
                }
                tx.commit()?;
                Ok::<_, rusqlite::Error>(())
            })
            .await
            .map_err(ScanError::storage)
    }

    /// Persist new incidents and return them with store-assigned ids.
    pub async fn record_incidents(
        &self,
        incidents: &[Incident],
    ) -> Result<Vec<Incident>, ScanError> {
        if incidents.is_empty() {
            return Ok(Vec::new());
        }

        let incidents = incidents.to_vec();
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let mut assigned = Vec::with_capacity(incidents.len());
                {
                    let mut stmt = tx.prepare(
                        "INSERT INTO incidents
                           (message_id, chat_id, chat_name, sender_id, sender_handle,
                            category, severity, description, confidence, status, detected_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    )?;
                    for incident in incidents {
                        stmt.execute(params![
                            incident.message_id,
                            incident.chat_id,
                            incident.chat_name,
                            incident.sender_id,
                            incident.sender_handle,
                            incident.category.as_str(),
                            incident.severity.as_str(),
                            incident.description,
                            incident.confidence,
                            incident.status.as_str(),
                            ts(incident.detected_at),
                        ])?;
                        let id = tx.last_insert_rowid();
                        assigned.push(Incident {
                            id: Some(id),
                            ..incident
                        });
                    }
                }
                tx.commit()?;
                Ok::<_, rusqlite::Error>(assigned)
            })
            .await
            .map_err(ScanError::storage)
    }

    /// Update an incident's review status. `resolved_at` is set only when
    /// the new status is terminal. Fails with `NotFound` for unknown ids.
    pub async fn update_incident_status(
        &self,
        incident_id: i64,
        status: IncidentStatus,
        resolved_by: Option<i64>,
    ) -> Result<(), ScanError> {
        let resolved_at = status.is_terminal().then(|| ts(Utc::now()));
        let changed = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE incidents SET status = ?1, resolved_at = ?2, resolved_by = ?3
                     WHERE id = ?4",
                    params![status.as_str(), resolved_at, resolved_by, incident_id],
                )?;
                Ok::<_, rusqlite::Error>(changed)
            })
            .await
            .map_err(ScanError::storage)?;

        if changed == 0 {
            return Err(ScanError::NotFound(format!("incident {}", incident_id)));
        }
        Ok(())
    }

    /// Create a run record with status `running` and return its id.
    pub async fn begin_scan_run(&self, start_time: DateTime<Utc>) -> Result<i64, ScanError> {
        let start = ts(start_time);
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO scan_runs (start_time, status) VALUES (?1, 'running')",
                    params![start],
                )?;
                Ok::<_, rusqlite::Error>(conn.last_insert_rowid())
            })
            .await
            .map_err(ScanError::storage)
    }

    /// Finalize a run record with totals and a terminal status. Callable
    /// after a partial failure; callers guarantee it runs on every exit
    /// path so no run is ever left `running`.
    pub async fn complete_scan_run(
        &self,
        run_id: i64,
        end_time: DateTime<Utc>,
        stats: ScanStats,
        status: ScanStatus,
        error: Option<String>,
    ) -> Result<(), ScanError> {
        let end = ts(end_time);
        let found = self
            .conn
            .call(move |conn| {
                let start: Option<String> = conn
                    .query_row(
                        "SELECT start_time FROM scan_runs WHERE id = ?1",
                        params![run_id],
                        |row| row.get(0),
                    )
                    .optional()?;

                let Some(start) = start else {
                    return Ok::<_, rusqlite::Error>(false);
                };

                let duration = DateTime::parse_from_rfc3339(&start)
                    .map(|s| (end_time - s.with_timezone(&Utc)).num_milliseconds() as f64 / 1000.0)
                    .unwrap_or(0.0)
                    .max(0.0);

                conn.execute(
                    "UPDATE scan_runs
                     SET end_time = ?1, chats_scanned = ?2, messages_processed = ?3,
                         voices_transcribed = ?4, incidents_found = ?5, status = ?6,
                         error_message = ?7, duration_seconds = ?8
                     WHERE id = ?9",
                    params![
                        end,
                        stats.chats_scanned,
                        stats.messages_processed,
                        stats.voices_transcribed,
                        stats.incidents_found,
                        status.as_str(),
                        error,
                        duration,
                        run_id,
                    ],
                )?;
                Ok(true)
            })
            .await
            .map_err(ScanError::storage)?;

        if !found {
            return Err(ScanError::NotFound(format!("scan run {}", run_id)));
        }
        Ok(())
    }

    /// Fetch one run record.
    pub async fn get_scan_run(&self, run_id: i64) -> Result<ScanRun, ScanError> {
        let row = self
            .conn
            .call(move |conn| {
                let row = conn
                    .query_row(
                        "SELECT id, start_time, end_time, chats_scanned, messages_processed,
                                voices_transcribed, incidents_found, status, error_message,
                                duration_seconds
                         FROM scan_runs WHERE id = ?1",
                        params![run_id],
                        |row| {
                            Ok((
                                row.get::<_, i64>(0)?,
                                row.get::<_, String>(1)?,
                                row.get::<_, Option<String>>(2)?,
                                row.get::<_, i64>(3)?,
                                row.get::<_, i64>(4)?,
                                row.get::<_, i64>(5)?,
                                row.get::<_, i64>(6)?,
                                row.get::<_, String>(7)?,
                                row.get::<_, Option<String>>(8)?,
                                row.get::<_, Option<f64>>(9)?,
                            ))
                        },
                    )
                    .optional()?;
                Ok::<_, rusqlite::Error>(row)
            })
            .await
            .map_err(ScanError::storage)?;

        let Some(row) = row else {
            return Err(ScanError::NotFound(format!("scan run {}", run_id)));
        };

        let end_time = match row.2 {
            Some(ref s) => Some(parse_ts(s)?),
            None => None,
        };
        Ok(ScanRun {
            id: row.0,
            start_time: parse_ts(&row.1)?,
            end_time,
            chats_scanned: row.3 as usize,
            messages_processed: row.4 as usize,
            voices_transcribed: row.5 as usize,
            incidents_found: row.6 as usize,
            status: row
                .7
                .parse::<ScanStatus>()
                .map_err(ScanError::Persistence)?,
            error_message: row.8,
            duration_seconds: row.9,
        })
    }

    /// Persist one reconciliation outcome as a snapshot batch. History is
    /// retained; snapshots are never updated.
    pub async fn save_participant_report(
        &self,
        report: &ParticipantReport,
    ) -> Result<(), ScanError> {
        let report = report.clone();
        let snapshot_at = ts(report.taken_at);
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                {
                    let mut stmt = tx.prepare(
                        "INSERT OR IGNORE INTO participants
                           (chat_id, user_id, handle, first_name, last_name, is_bot,
                            classification, snapshot_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    )?;
                    for (participant, classification) in report
                        .missing
                        .iter()
                        .map(|p| (p, "missing"))
                        .chain(report.extra.iter().map(|p| (p, "extra")))
                    {
                        stmt.execute(params![
                            report.chat_id,
                            participant.user_id,
                            participant.handle,
                            participant.first_name,
                            participant.last_name,
                            participant.is_bot,
                            classification,
                            snapshot_at,
                        ])?;
                    }
                }
                tx.commit()?;
                Ok::<_, rusqlite::Error>(())
            })
            .await
            .map_err(ScanError::storage)
    }

    /// Drop processed markers older than the retention horizon. Returns
    /// the number of rows removed. Not on the critical path.
    pub async fn prune_processed_markers(&self, older_than_days: u32) -> Result<usize, ScanError> {
        let cutoff = ts(Utc::now() - Duration::days(older_than_days as i64));
        let removed = self
            .conn
            .call(move |conn| {
                let removed = conn.execute(
                    "DELETE FROM processed_messages WHERE processed_at < ?1",
                    params![cutoff],
                )?;
                Ok::<_, rusqlite::Error>(removed)
            })
            .await
            .map_err(ScanError::storage)?;
        debug!("Pruned {} processed markers", removed);
        Ok(removed)
    }

    /// Incidents at or above a severity, most recent first. Used by the
    /// review surface.
    pub async fn incidents_at_or_above(
        &self,
        severity: Severity,
        limit: usize,
    ) -> Result<Vec<Incident>, ScanError> {
        let names: Vec<&'static str> = [
            Severity::Low,
            Severity::Medium,
            Severity::High,
            Severity::Critical,
        ]
        .iter()
        .filter(|s| **s >= severity)
        .map(|s| s.as_str())
        .collect();
        let placeholders = names
            .iter()
            .enumerate()
            .map(|(i, _)| format!("?{}", i + 1))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT id, message_id, chat_id, chat_name, sender_id, sender_handle,
                    category, severity, description, confidence, status, detected_at,
                    resolved_at, resolved_by
             FROM incidents WHERE severity IN ({})
             ORDER BY detected_at DESC LIMIT ?{}",
            placeholders,
            names.len() + 1
        );

        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = names
                    .iter()
                    .map(|s| Box::new(s.to_string()) as Box<dyn rusqlite::ToSql>)
                    .collect();
                params_vec.push(Box::new(limit as i64));
                let refs: Vec<&dyn rusqlite::ToSql> =
                    params_vec.iter().map(|p| p.as_ref()).collect();

                let rows = stmt
                    .query_map(refs.as_slice(), |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, i64>(1)?,
                            row.get::<_, i64>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, Option<i64>>(4)?,
                            row.get::<_, Option<String>>(5)?,
                            row.get::<_, String>(6)?,
                            row.get::<_, String>(7)?,
                            row.get::<_, String>(8)?,
                            row.get::<_, f64>(9)?,
                            row.get::<_, String>(10)?,
                            row.get::<_, String>(11)?,
                            row.get::<_, Option<String>>(12)?,
                            row.get::<_, Option<i64>>(13)?,
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok::<_, rusqlite::Error>(rows)
            })
            .await
            .map_err(ScanError::storage)?;

        rows.into_iter()
            .map(|row| {
                let resolved_at = match row.12 {
                    Some(ref s) => Some(parse_ts(s)?),
                    None => None,
                };
                Ok(Incident {
                    id: Some(row.0),
                    message_id: row.1,
                    chat_id: row.2,
                    chat_name: row.3,
                    sender_id: row.4,
                    sender_handle: row.5,
                    category: row
                        .6
                        .parse::<IncidentCategory>()
                        .map_err(ScanError::Persistence)?,
                    severity: row.7.parse::<Severity>().map_err(ScanError::Persistence)?,
                    description: row.8,
                    confidence: row.9,
                    status: row
                        .10
                        .parse::<IncidentStatus>()
                        .map_err(ScanError::Persistence)?,
                    detected_at: parse_ts(&row.11)?,
                    resolved_at,
                    resolved_by: row.13,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_message(chat_id: i64, message_id: i64) -> CapturedMessage {
        CapturedMessage {
            chat_id,
            message_id,
            sender_id: Some(100 + message_id),
            sender_handle: Some(format!("user{}", message_id)),
            text: Some(format!("message {}", message_id)),
            has_voice: false,
            voice_path: None,
            voice_transcript: None,
            timestamp: Utc::now(),
        }
    }

    fn make_incident(chat_id: i64, message_id: i64) -> Incident {
        Incident {
            id: None,
            message_id,
            chat_id,
            chat_name: "test chat".into(),
            sender_id: None,
            sender_handle: None,
            category: IncidentCategory::Spam,
            severity: Severity::Medium,
            description: "unsolicited ads".into(),
            confidence: 0.8,
            status: IncidentStatus::New,
            detected_at: Utc::now(),
            resolved_at: None,
            resolved_by: None,
        }
    }

    #[tokio::test]
    async fn filter_unprocessed_is_idempotent_with_marks() {
        let store = StateStore::open_in_memory().await.unwrap();

        let ids = vec![1, 2, 3];
        let fresh = store.filter_unprocessed(-1, &ids).await.unwrap();
        assert_eq!(fresh, vec![1, 2, 3]);

        store.mark_processed(-1, &[1, 3]).await.unwrap();
        let remaining = store.filter_unprocessed(-1, &ids).await.unwrap();
        assert_eq!(remaining, vec![2]);

        // Re-marking must be a no-op, not an error.
        store.mark_processed(-1, &[1, 3]).await.unwrap();
        let again = store.filter_unprocessed(-1, &[1, 3]).await.unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn filter_unprocessed_empty_input() {
        let store = StateStore::open_in_memory().await.unwrap();
        assert!(store.filter_unprocessed(-1, &[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn marks_are_scoped_per_chat() {
        let store = StateStore::open_in_memory().await.unwrap();
        store.mark_processed(-1, &[5]).await.unwrap();
        assert_eq!(store.filter_unprocessed(-2, &[5]).await.unwrap(), vec![5]);
    }

    #[tokio::test]
    async fn save_messages_upsert_is_idempotent() {
        let store = StateStore::open_in_memory().await.unwrap();
        let messages = vec![make_message(-1, 1), make_message(-1, 2)];

        store.save_messages(&messages).await.unwrap();
        // Second call with the same keys must not error or duplicate.
        store.save_messages(&messages).await.unwrap();
    }

    #[tokio::test]
    async fn record_incidents_assigns_ids() {
        let store = StateStore::open_in_memory().await.unwrap();
        store.save_messages(&[make_message(-1, 1)]).await.unwrap();

        let recorded = store
            .record_incidents(&[make_incident(-1, 1)])
            .await
            .unwrap();
        assert_eq!(recorded.len(), 1);
        assert!(recorded[0].id.is_some());
    }

    #[tokio::test]
    async fn status_update_sets_resolved_only_when_terminal() {
        let store = StateStore::open_in_memory().await.unwrap();
        store.save_messages(&[make_message(-1, 1)]).await.unwrap();
        let recorded = store
            .record_incidents(&[make_incident(-1, 1)])
            .await
            .unwrap();
        let id = recorded[0].id.unwrap();

        store
            .update_incident_status(id, IncidentStatus::Ignored, Some(9))
            .await
            .unwrap();
        let found = store
            .incidents_at_or_above(Severity::Low, 10)
            .await
            .unwrap();
        assert_eq!(found[0].status, IncidentStatus::Ignored);
        assert!(found[0].resolved_at.is_none());

        store
            .update_incident_status(id, IncidentStatus::Confirmed, Some(9))
            .await
            .unwrap();
        let found = store
            .incidents_at_or_above(Severity::Low, 10)
            .await
            .unwrap();
        assert_eq!(found[0].status, IncidentStatus::Confirmed);
        assert!(found[0].resolved_at.is_some());
        assert_eq!(found[0].resolved_by, Some(9));
    }

    #[tokio::test]
    async fn status_update_unknown_id_is_not_found() {
        let store = StateStore::open_in_memory().await.unwrap();
        let err = store
            .update_incident_status(999, IncidentStatus::Confirmed, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::NotFound(_)));
    }

    #[tokio::test]
    async fn scan_run_lifecycle() {
        let store = StateStore::open_in_memory().await.unwrap();
        let started = Utc::now();
        let run_id = store.begin_scan_run(started).await.unwrap();

        let running = store.get_scan_run(run_id).await.unwrap();
        assert_eq!(running.status, ScanStatus::Running);
        assert!(running.end_time.is_none());

        let stats = ScanStats {
            chats_scanned: 2,
            messages_processed: 80,
            voices_transcribed: 1,
            incidents_found: 3,
        };
        store
            .complete_scan_run(run_id, Utc::now(), stats, ScanStatus::Completed, None)
            .await
            .unwrap();

        let finished = store.get_scan_run(run_id).await.unwrap();
        assert_eq!(finished.status, ScanStatus::Completed);
        assert!(finished.end_time.is_some());
        assert_eq!(finished.messages_processed, 80);
        assert!(finished.duration_seconds.unwrap() >= 0.0);
    }

    #[tokio::test]
    async fn complete_scan_run_records_failure() {
        let store = StateStore::open_in_memory().await.unwrap();
        let run_id = store.begin_scan_run(Utc::now()).await.unwrap();

        store
            .complete_scan_run(
                run_id,
                Utc::now(),
                ScanStats::default(),
                ScanStatus::Failed,
                Some("store unavailable".into()),
            )
            .await
            .unwrap();

        let run = store.get_scan_run(run_id).await.unwrap();
        assert_eq!(run.status, ScanStatus::Failed);
        assert_eq!(run.error_message.as_deref(), Some("store unavailable"));
    }

    #[tokio::test]
    async fn participant_snapshot_batch_round_trip() {
        let store = StateStore::open_in_memory().await.unwrap();
        let report = ParticipantReport {
            chat_id: -1,
            chat_name: "ops".into(),
            missing: vec![crate::models::Participant::bare(4)],
            extra: vec![crate::models::Participant {
                user_id: 2,
                handle: Some("intruder".into()),
                first_name: None,
                last_name: None,
                is_bot: false,
            }],
            taken_at: Utc::now(),
        };
        store.save_participant_report(&report).await.unwrap();
        // Same batch again: UNIQUE(chat_id, user_id, snapshot_at) ignores dupes.
        store.save_participant_report(&report).await.unwrap();
    }

    #[tokio::test]
    async fn prune_removes_only_old_markers() {
        let store = StateStore::open_in_memory().await.unwrap();
        store.mark_processed(-1, &[1, 2]).await.unwrap();

        // Nothing is older than 1 day yet.
        assert_eq!(store.prune_processed_markers(1).await.unwrap(), 0);
        assert!(store.filter_unprocessed(-1, &[1, 2]).await.unwrap().is_empty());

        // A zero-day horizon removes everything marked before "now".
        let removed = store.prune_processed_markers(0).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(
            store.filter_unprocessed(-1, &[1, 2]).await.unwrap(),
            vec![1, 2]
        );
    }
}
