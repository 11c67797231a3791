//! Periodic health sweep over the three critical dependencies.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::sources::{MessageSource, NotificationSink};
use crate::store::StateStore;

pub struct HealthMonitor {
    source: Arc<dyn MessageSource>,
    notifier: Arc<dyn NotificationSink>,
    store: StateStore,
    probe_timeout: Duration,
    admin_recipient: i64,
}

impl HealthMonitor {
    pub fn new(
        source: Arc<dyn MessageSource>,
        notifier: Arc<dyn NotificationSink>,
        store: StateStore,
        probe_timeout: Duration,
        admin_recipient: i64,
    ) -> Self {
        Self {
            source,
            notifier,
            store,
            probe_timeout,
            admin_recipient,
        }
    }

    /// Probe the message source, notification channel, and state store
    /// concurrently. Each probe has its own timeout so one hung dependency
    /// cannot mask the others. Returns the list of failing components.
    pub async fn sweep(&self) -> Vec<String> {
        let source_probe = timeout(self.probe_timeout, self.source.is_connected());
        let notifier_probe = timeout(self.probe_timeout, self.notifier.ping());
        let store_probe = timeout(self.probe_timeout, self.store.probe());

        let (source_ok, notifier_ok, store_ok) =
            tokio::join!(source_probe, notifier_probe, store_probe);

        let mut failures = Vec::new();
        if !matches!(source_ok, Ok(true)) {
            failures.push("message source".to_string());
        }
        if !matches!(notifier_ok, Ok(true)) {
            failures.push("notification channel".to_string());
        }
        if !matches!(store_ok, Ok(Ok(()))) {
            failures.push("state store".to_string());
        }

        if failures.is_empty() {
            info!("Health sweep: all components healthy");
        } else {
            warn!("Health sweep: {} failing: {}", failures.len(), failures.join(", "));
            if let Err(e) = self
                .notifier
                .notify_health_alert(self.admin_recipient, &failures)
                .await
            {
                warn!("Failed to dispatch health alert: {}", e);
            }
        }

        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScanError;
    use crate::models::{CapturedMessage, GlobalReport, Incident, ParticipantReport};
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct ProbeSource {
        connected: bool,
    }

    #[async_trait]
    impl MessageSource for ProbeSource {
        async fn collect(
            &self,
            _chat_id: i64,
            _lookback: Duration,
        ) -> Result<Vec<CapturedMessage>, ScanError> {
            Ok(Vec::new())
        }

        async fn chat_title(&self, chat_id: i64) -> Result<String, ScanError> {
            Ok(format!("Chat {}", chat_id))
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
            self.connected
        }
    }

    struct ProbeNotifier {
        up: bool,
        alerts: Mutex<Vec<Vec<String>>>,
        pings: AtomicUsize,
    }

    impl ProbeNotifier {
        fn new(up: bool) -> Self {
            Self {
                up,
                alerts: Mutex::new(Vec::new()),
                pings: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl NotificationSink for ProbeNotifier {
        async fn notify_incident(
            &self,
            _recipient: i64,
            _incident: &Incident,
        ) -> Result<(), ScanError> {
            Ok(())
        }

        async fn notify_summary(
            &self,
            _recipient: i64,
            _report: &GlobalReport,
        ) -> Result<(), ScanError> {
            Ok(())
        }

        async fn notify_health_alert(
            &self,
            _recipient: i64,
            failures: &[String],
        ) -> Result<(), ScanError> {
            self.alerts.lock().unwrap().push(failures.to_vec());
            Ok(())
        }

        async fn ping(&self) -> bool {
            self.pings.fetch_add(1, Ordering::SeqCst);
            self.up
        }
    }

    async fn sweep_with(connected: bool, notifier_up: bool) -> (Vec<String>, Arc<ProbeNotifier>) {
        let notifier = Arc::new(ProbeNotifier::new(notifier_up));
        let monitor = HealthMonitor::new(
            Arc::new(ProbeSource { connected }),
            notifier.clone(),
            StateStore::open_in_memory().await.unwrap(),
            Duration::from_secs(5),
            42,
        );
        (monitor.sweep().await, notifier)
    }

    #[tokio::test]
    async fn healthy_sweep_sends_no_alert() {
        let (failures, notifier) = sweep_with(true, true).await;
        assert!(failures.is_empty());
        assert!(notifier.alerts.lock().unwrap().is_empty());
        assert_eq!(notifier.pings.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failing_source_triggers_alert() {
        let (failures, notifier) = sweep_with(false, true).await;
        assert_eq!(failures, vec!["message source".to_string()]);
        let alerts = notifier.alerts.lock().unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0], vec!["message source".to_string()]);
    }

    #[tokio::test]
    async fn multiple_failures_are_reported_together() {
        let (failures, _notifier) = sweep_with(false, false).await;
        assert_eq!(
            failures,
            vec![
                "message source".to_string(),
                "notification channel".to_string()
            ]
        );
    }
}
