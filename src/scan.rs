//! Scan cycle orchestration.
//!
//! One `ScanJob` drives the whole pipeline: walk the monitored chats,
//! collect and persist raw messages, analyze them, persist and forward
//! incidents, reconcile rosters, then aggregate and report.
//!
//! Failure policy: a chat that fails for transport or validation reasons
//! is logged and skipped, and the cycle goes on. Only a `Persistence`
//! failure aborts the cycle. Every cycle that opened a run record
//! finalizes it exactly once, as `completed` or `failed`, on every path.

use chrono::Utc;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::analysis::aggregator;
use crate::analysis::analyzer::ChatAnalyzer;
use crate::analysis::participants;
use crate::config::Config;
use crate::error::ScanError;
use crate::models::{ChatAnalysisResult, GlobalReport, ScanStats, ScanStatus};
use crate::sources::{ChatRegistry, MessageSource, NotificationSink, ReportingSink, RosterSource};
use crate::store::StateStore;

pub struct ScanJob {
    source: Arc<dyn MessageSource>,
    roster: Arc<dyn RosterSource>,
    registry: Arc<dyn ChatRegistry>,
    reporting: Arc<dyn ReportingSink>,
    notifier: Arc<dyn NotificationSink>,
    analyzer: ChatAnalyzer,
    store: StateStore,
    lookback: Duration,
    call_timeout: Duration,
    voice_download_timeout: Duration,
    voice_max_bytes: u64,
    retention_days: u32,
    pacing_min_seconds: u64,
    pacing_max_seconds: u64,
    alert_threshold: crate::models::Severity,
    admin_recipient: i64,
    // Single-slot run guard: at most one cycle at a time.
    running: AtomicBool,
}

impl ScanJob {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &Config,
        source: Arc<dyn MessageSource>,
        roster: Arc<dyn RosterSource>,
        registry: Arc<dyn ChatRegistry>,
        reporting: Arc<dyn ReportingSink>,
        notifier: Arc<dyn NotificationSink>,
        analyzer: ChatAnalyzer,
        store: StateStore,
    ) -> Self {
        Self {
            source,
            roster,
            registry,
            reporting,
            notifier,
            analyzer,
            store,
            lookback: Duration::from_secs(config.app.scan_interval_hours * 3600),
            call_timeout: Duration::from_secs(config.app.call_timeout_seconds),
            voice_download_timeout: Duration::from_secs(config.whisper.download_timeout_seconds),
            voice_max_bytes: config.whisper.max_size_mb * 1024 * 1024,
            retention_days: config.storage.retention_days,
            pacing_min_seconds: config.app.pacing_min_seconds,
            pacing_max_seconds: config.app.pacing_max_seconds,
            alert_threshold: config.app.alert_threshold,
            admin_recipient: config.app.admin_recipient,
            running: AtomicBool::new(false),
        }
    }

    /// Run one full scan cycle over every monitored chat.
    ///
    /// Rejects the request if another cycle is still in progress.
    pub async fn run_cycle(&self) -> Result<GlobalReport, ScanError> {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Scan requested while another cycle is in progress, skipping");
            return Err(ScanError::Validation(
                "a scan cycle is already in progress".into(),
            ));
        }

        let started = Utc::now();
        info!("Starting scan cycle");

        let run_id = match self.store.begin_scan_run(started).await {
            Ok(id) => id,
            Err(e) => {
                // No run record exists, so there is nothing to finalize.
                self.running.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        let (stats, results, failure) = self.scan_all_chats().await;
        let finished = Utc::now();

        let outcome = match failure {
            None => {
                let report = aggregator::aggregate(&results, started, finished);
                info!(
                    "Scan cycle finished: {} chats, {} messages, {} incidents in {:.1}s",
                    report.chats_scanned,
                    report.total_messages,
                    report.total_incidents,
                    report.duration_seconds
                );

                if let Err(e) = self
                    .call(
                        self.notifier.notify_summary(self.admin_recipient, &report),
                        "summary notification",
                    )
                    .await
                {
                    warn!("Failed to send cycle summary: {}", e);
                }
                if let Err(e) = self
                    .call(
                        self.reporting.append_scan_summary(&report),
                        "summary report append",
                    )
                    .await
                {
                    warn!("Failed to append cycle summary to report: {}", e);
                }
                if let Err(e) = self.store.prune_processed_markers(self.retention_days).await {
                    warn!("Failed to prune processed markers: {}", e);
                }

                Ok(report)
            }
            Some(e) => {
                error!("Scan cycle aborted: {}", e);
                Err(e)
            }
        };

        let (status, error_message) = match &outcome {
            Ok(_) => (ScanStatus::Completed, None),
            Err(e) => (ScanStatus::Failed, Some(e.to_string())),
        };
        if let Err(e) = self
            .store
            .complete_scan_run(run_id, finished, stats, status, error_message)
            .await
        {
            error!("Failed to finalize scan run {}: {}", run_id, e);
        }

        self.running.store(false, Ordering::SeqCst);
        outcome
    }

    /// Walk the monitored chats with pacing delays between them. Returns
    /// partial stats alongside the first fatal error, if any.
    async fn scan_all_chats(
        &self,
    ) -> (ScanStats, Vec<ChatAnalysisResult>, Option<ScanError>) {
        let mut stats = ScanStats::default();
        let mut results = Vec::new();

        let chats = match self.registry.monitored_chats().await {
            Ok(chats) => chats,
            Err(e) => return (stats, results, Some(e)),
        };
        let total = chats.len();
        info!("Scanning {} monitored chats", total);

        for (i, (chat_id, fallback_name)) in chats.into_iter().enumerate() {
            match self.scan_chat(chat_id, &fallback_name).await {
                Ok(result) => {
                    stats.absorb(&result);
                    results.push(result);
                }
                Err(e) if e.is_fatal() => return (stats, results, Some(e)),
                Err(e) => {
                    warn!("Skipping chat {} after error: {}", chat_id, e);
                }
            }

            // Randomized pause between chats, never after the last one.
            if i + 1 < total && self.pacing_max_seconds > 0 {
                let delay = rand::thread_rng()
                    .gen_range(self.pacing_min_seconds..=self.pacing_max_seconds);
                debug!("Pausing {}s before the next chat", delay);
                tokio::time::sleep(Duration::from_secs(delay)).await;
            }
        }

        (stats, results, None)
    }

    /// Full sub-flow for one chat: collect, persist raw, analyze, record
    /// and forward incidents, reconcile the roster.
    async fn scan_chat(
        &self,
        chat_id: i64,
        fallback_name: &str,
    ) -> Result<ChatAnalysisResult, ScanError> {
        let chat_name = match self
            .call(self.source.chat_title(chat_id), "chat title lookup")
            .await
        {
            Ok(name) => name,
            Err(e) => {
                debug!("Chat title lookup for {} failed ({}), using fallback", chat_id, e);
                fallback_name.to_string()
            }
        };
        info!("Scanning chat {} ({})", chat_name, chat_id);

        let mut messages = self
            .call(
                self.source.collect(chat_id, self.lookback),
                "message collection",
            )
            .await?;

        for msg in messages
            .iter_mut()
            .filter(|m| m.has_voice && m.voice_path.is_none())
        {
            match self
                .source
                .download_voice(
                    chat_id,
                    msg.message_id,
                    self.voice_download_timeout,
                    self.voice_max_bytes,
                )
                .await
            {
                Ok(Some(path)) => msg.voice_path = Some(path),
                Ok(None) => debug!("Voice attachment for message {} skipped", msg.message_id),
                Err(e) => warn!(
                    "Failed to download voice for message {}: {}",
                    msg.message_id, e
                ),
            }
        }

        // Raw capture is persisted before any analysis so a later failure
        // cannot lose the messages themselves.
        self.store.save_messages(&messages).await?;

        let mut result = self.analyzer.process_chat(chat_id, &chat_name, messages).await?;

        if !result.incidents.is_empty() {
            result.incidents = self.store.record_incidents(&result.incidents).await?;

            if let Err(e) = self
                .call(
                    self.reporting.append_incidents(&result.incidents),
                    "incident report append",
                )
                .await
            {
                warn!("Failed to append incidents to report: {}", e);
            }

            for incident in &result.incidents {
                if incident.severity >= self.alert_threshold {
                    if let Err(e) = self
                        .call(
                            self.notifier.notify_incident(self.admin_recipient, incident),
                            "incident alert",
                        )
                        .await
                    {
                        warn!(
                            "Failed to send alert for incident {:?}: {}",
                            incident.id, e
                        );
                    }
                }
            }
        }

        let expected = self.registry.expected_roster(chat_id).await?;
        if !expected.is_empty() {
            match self
                .call(self.roster.list_participants(chat_id), "roster listing")
                .await
            {
                Ok(live) => {
                    let report = participants::reconcile(chat_id, &chat_name, &live, &expected);
                    if report.has_discrepancies() {
                        warn!(
                            "Roster discrepancies in chat {}: {} missing, {} extra",
                            chat_name,
                            report.missing.len(),
                            report.extra.len()
                        );
                    }
                    self.store.save_participant_report(&report).await?;
                    if let Err(e) = self
                        .call(
                            self.reporting.append_participant_report(&report),
                            "roster report append",
                        )
                        .await
                    {
                        warn!("Failed to append roster report: {}", e);
                    }
                    result.participant_report = Some(report);
                }
                Err(e) => {
                    warn!("Failed to list participants for chat {}: {}", chat_id, e);
                }
            }
        }

        Ok(result)
    }

    /// Wrap an external call in the configured timeout.
    async fn call<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, ScanError>>,
        what: &str,
    ) -> Result<T, ScanError> {
        match timeout(self.call_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(ScanError::Transport(format!(
                "{} timed out after {}s",
                what,
                self.call_timeout.as_secs()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        CapturedMessage, GlobalReport, Incident, Participant, ParticipantReport, Severity,
    };
    use crate::sources::{
        ClassificationOutcome, ClassificationSummary, Classifier, RawIncident, Transcriber,
    };
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::{HashMap, HashSet};
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    fn make_message(chat_id: i64, id: i64, text: &str) -> CapturedMessage {
        CapturedMessage {
            chat_id,
            message_id: id,
            sender_id: Some(100 + id),
            sender_handle: Some(format!("user{}", id)),
            text: Some(text.to_string()),
            has_voice: false,
            voice_path: None,
            voice_transcript: None,
            timestamp: Utc::now(),
        }
    }

    struct StaticSource {
        messages: HashMap<i64, Vec<CapturedMessage>>,
        fail_chats: HashSet<i64>,
    }

    #[async_trait]
    impl MessageSource for StaticSource {
        async fn collect(
            &self,
            chat_id: i64,
            _lookback: Duration,
        ) -> Result<Vec<CapturedMessage>, ScanError> {
            if self.fail_chats.contains(&chat_id) {
                return Err(ScanError::Transport("collector unreachable".into()));
            }
            Ok(self.messages.get(&chat_id).cloned().unwrap_or_default())
        }

        async fn chat_title(&self, chat_id: i64) -> Result<String, ScanError> {
            Err(ScanError::NotFound(format!("chat {}", chat_id)))
        }

        async fn download_voice(
            &self,
            _chat_id: i64,
            _message_id: i64,
            _timeout: Duration,
            _max_bytes: u64,
        ) -> Result<Option<PathBuf>, ScanError> {
            Ok(None)
        }

        async fn is_connected(&self) -> bool {
            true
        }
    }

    struct StaticRoster {
        live: Vec<Participant>,
    }

    #[async_trait]
    impl RosterSource for StaticRoster {
        async fn list_participants(&self, _chat_id: i64) -> Result<Vec<Participant>, ScanError> {
            Ok(self.live.clone())
        }
    }

    struct StaticRegistry {
        chats: Vec<(i64, String)>,
        expected: HashMap<i64, Vec<i64>>,
    }

    #[async_trait]
    impl ChatRegistry for StaticRegistry {
        async fn monitored_chats(&self) -> Result<Vec<(i64, String)>, ScanError> {
            Ok(self.chats.clone())
        }

        async fn expected_roster(&self, chat_id: i64) -> Result<Vec<i64>, ScanError> {
            Ok(self.expected.get(&chat_id).cloned().unwrap_or_default())
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        incidents: Mutex<usize>,
        roster_reports: Mutex<usize>,
        summaries: Mutex<usize>,
    }

    #[async_trait]
    impl ReportingSink for RecordingSink {
        async fn append_incidents(&self, incidents: &[Incident]) -> Result<(), ScanError> {
            *self.incidents.lock().unwrap() += incidents.len();
            Ok(())
        }

        async fn append_participant_report(
            &self,
            _report: &ParticipantReport,
        ) -> Result<(), ScanError> {
            *self.roster_reports.lock().unwrap() += 1;
            Ok(())
        }

        async fn append_scan_summary(&self, _report: &GlobalReport) -> Result<(), ScanError> {
            *self.summaries.lock().unwrap() += 1;
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        events: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl NotificationSink for RecordingNotifier {
        async fn notify_incident(
            &self,
            recipient: i64,
            incident: &Incident,
        ) -> Result<(), ScanError> {
            self.events
                .lock()
                .unwrap()
                .push(format!("incident:{}:{}", recipient, incident.severity));
            Ok(())
        }

        async fn notify_summary(
            &self,
            recipient: i64,
            _report: &GlobalReport,
        ) -> Result<(), ScanError> {
            self.events
                .lock()
                .unwrap()
                .push(format!("summary:{}", recipient));
            Ok(())
        }

        async fn notify_health_alert(
            &self,
            _recipient: i64,
            _failures: &[String],
        ) -> Result<(), ScanError> {
            Ok(())
        }

        async fn ping(&self) -> bool {
            true
        }
    }

    struct FixedClassifier {
        incidents: Vec<RawIncident>,
        delay: Duration,
        fail_persistence: bool,
    }

    #[async_trait]
    impl Classifier for FixedClassifier {
        async fn classify(
            &self,
            chunk: &[CapturedMessage],
            _chat_context: &str,
        ) -> Result<ClassificationOutcome, ScanError> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail_persistence {
                return Err(ScanError::Persistence("disk full".into()));
            }
            Ok(ClassificationOutcome {
                incidents: self.incidents.clone(),
                summary: ClassificationSummary {
                    total_analyzed: chunk.len(),
                    incidents_found: self.incidents.len(),
                    risk_level: "low".into(),
                },
            })
        }
    }

    struct NoopTranscriber;

    #[async_trait]
    impl Transcriber for NoopTranscriber {
        async fn transcribe(
            &self,
            _audio_path: &Path,
            _language_hint: &str,
        ) -> Result<crate::models::Transcription, ScanError> {
            Err(ScanError::NotFound("unused".into()))
        }
    }

    struct Fixture {
        job: Arc<ScanJob>,
        store: StateStore,
        sink: Arc<RecordingSink>,
        notifier: Arc<RecordingNotifier>,
    }

    async fn make_fixture(
        classifier: FixedClassifier,
        source: StaticSource,
        registry: StaticRegistry,
        live_roster: Vec<Participant>,
    ) -> Fixture {
        let mut config = Config::default();
        config.app.pacing_min_seconds = 0;
        config.app.pacing_max_seconds = 0;
        config.app.admin_recipient = 42;
        config.app.alert_threshold = Severity::High;

        let store = StateStore::open_in_memory().await.unwrap();
        let sink = Arc::new(RecordingSink::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let analyzer = ChatAnalyzer::new(
            Arc::new(classifier),
            Arc::new(NoopTranscriber),
            store.clone(),
            config.app.chunk_size,
            "en".into(),
        );
        let job = Arc::new(ScanJob::new(
            &config,
            Arc::new(source),
            Arc::new(StaticRoster { live: live_roster }),
            Arc::new(registry),
            sink.clone(),
            notifier.clone(),
            analyzer,
            store.clone(),
        ));

        Fixture {
            job,
            store,
            sink,
            notifier,
        }
    }

    fn raw_incident(message_id: i64, severity: &str) -> RawIncident {
        RawIncident {
            message_id,
            category: "leak".into(),
            severity: severity.into(),
            description: "credential in chat".into(),
            confidence: 0.9,
        }
    }

    #[tokio::test]
    async fn completed_cycle_persists_and_notifies() {
        let fixture = make_fixture(
            FixedClassifier {
                incidents: vec![raw_incident(1, "critical"), raw_incident(2, "low")],
                delay: Duration::ZERO,
                fail_persistence: false,
            },
            StaticSource {
                messages: HashMap::from([(
                    -1,
                    vec![make_message(-1, 1, "the key is sk-123"), make_message(-1, 2, "ok")],
                )]),
                fail_chats: HashSet::new(),
            },
            StaticRegistry {
                chats: vec![(-1, "Chat -1".into())],
                expected: HashMap::new(),
            },
            vec![],
        )
        .await;

        let report = fixture.job.run_cycle().await.unwrap();
        assert_eq!(report.chats_scanned, 1);
        assert_eq!(report.total_messages, 2);
        assert_eq!(report.total_incidents, 2);
        assert_eq!(report.critical_incidents, 1);

        // Run record finalized as completed with cycle totals.
        let run = fixture.store.get_scan_run(1).await.unwrap();
        assert_eq!(run.status, ScanStatus::Completed);
        assert_eq!(run.incidents_found, 2);

        // Both incidents reported, only the critical one alerted.
        assert_eq!(*fixture.sink.incidents.lock().unwrap(), 2);
        assert_eq!(*fixture.sink.summaries.lock().unwrap(), 1);
        let events = fixture.notifier.events.lock().unwrap();
        assert_eq!(
            *events,
            vec!["incident:42:critical".to_string(), "summary:42".to_string()]
        );
    }

    #[tokio::test]
    async fn fatal_failure_finalizes_run_as_failed() {
        let fixture = make_fixture(
            FixedClassifier {
                incidents: vec![],
                delay: Duration::ZERO,
                fail_persistence: true,
            },
            StaticSource {
                messages: HashMap::from([(-1, vec![make_message(-1, 1, "hello")])]),
                fail_chats: HashSet::new(),
            },
            StaticRegistry {
                chats: vec![(-1, "Chat -1".into())],
                expected: HashMap::new(),
            },
            vec![],
        )
        .await;

        let err = fixture.job.run_cycle().await.unwrap_err();
        assert!(err.is_fatal());

        let run = fixture.store.get_scan_run(1).await.unwrap();
        assert_eq!(run.status, ScanStatus::Failed);
        assert!(run.error_message.unwrap().contains("disk full"));
    }

    #[tokio::test]
    async fn unreachable_chat_is_skipped_not_fatal() {
        let fixture = make_fixture(
            FixedClassifier {
                incidents: vec![],
                delay: Duration::ZERO,
                fail_persistence: false,
            },
            StaticSource {
                messages: HashMap::from([(-2, vec![make_message(-2, 1, "fine here")])]),
                fail_chats: HashSet::from([-1]),
            },
            StaticRegistry {
                chats: vec![(-1, "Chat -1".into()), (-2, "Chat -2".into())],
                expected: HashMap::new(),
            },
            vec![],
        )
        .await;

        let report = fixture.job.run_cycle().await.unwrap();
        // The unreachable chat contributes nothing; the other is scanned.
        assert_eq!(report.chats_scanned, 1);
        assert_eq!(report.total_messages, 1);

        let run = fixture.store.get_scan_run(1).await.unwrap();
        assert_eq!(run.status, ScanStatus::Completed);
    }

    #[tokio::test]
    async fn roster_reconciliation_runs_when_expected_is_set() {
        let live = vec![
            Participant::bare(1),
            Participant::bare(2),
            Participant::bare(3),
        ];
        let fixture = make_fixture(
            FixedClassifier {
                incidents: vec![],
                delay: Duration::ZERO,
                fail_persistence: false,
            },
            StaticSource {
                messages: HashMap::from([(-1, vec![make_message(-1, 1, "hello")])]),
                fail_chats: HashSet::new(),
            },
            StaticRegistry {
                chats: vec![(-1, "Chat -1".into())],
                expected: HashMap::from([(-1, vec![1, 3, 4])]),
            },
            live,
        )
        .await;

        let report = fixture.job.run_cycle().await.unwrap();
        assert_eq!(report.missing_participants, 1);
        assert_eq!(report.extra_participants, 1);
        assert_eq!(report.missing_ids, vec![4]);
        assert_eq!(report.extra_ids, vec![2]);
        assert_eq!(*fixture.sink.roster_reports.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn overlapping_cycles_are_rejected() {
        let fixture = make_fixture(
            FixedClassifier {
                incidents: vec![],
                delay: Duration::from_millis(200),
                fail_persistence: false,
            },
            StaticSource {
                messages: HashMap::from([(-1, vec![make_message(-1, 1, "hello")])]),
                fail_chats: HashSet::new(),
            },
            StaticRegistry {
                chats: vec![(-1, "Chat -1".into())],
                expected: HashMap::new(),
            },
            vec![],
        )
        .await;

        let job = fixture.job.clone();
        let first = tokio::spawn(async move { job.run_cycle().await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let second = fixture.job.run_cycle().await;
        assert!(matches!(second, Err(ScanError::Validation(_))));

        // The in-flight cycle is unaffected by the rejected request.
        assert!(first.await.unwrap().is_ok());
    }
}
