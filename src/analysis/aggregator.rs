//! Cross-chat aggregation of one scan cycle's per-chat results.

use chrono::{DateTime, Utc};

use crate::models::{ChatAnalysisResult, GlobalReport, Severity};

/// Fold per-chat results into the cycle-level report.
///
/// Pure summation: chats with zero activity still count toward
/// `chats_scanned`. The duration is clamped at zero so clock oddities
/// never produce a negative value.
pub fn aggregate(
    results: &[ChatAnalysisResult],
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
) -> GlobalReport {
    let mut report = GlobalReport {
        start_time,
        end_time,
        chats_scanned: results.len(),
        total_messages: 0,
        total_voices: 0,
        total_incidents: 0,
        critical_incidents: 0,
        high_incidents: 0,
        medium_incidents: 0,
        low_incidents: 0,
        missing_participants: 0,
        extra_participants: 0,
        duration_seconds: (end_time - start_time)
            .num_milliseconds()
            .max(0) as f64
            / 1000.0,
        missing_ids: Vec::new(),
        extra_ids: Vec::new(),
    };

    for result in results {
        report.total_messages += result.messages_analyzed;
        report.total_voices += result.voices_transcribed;
        report.total_incidents += result.incidents.len();

        for incident in &result.incidents {
            match incident.severity {
                Severity::Critical => report.critical_incidents += 1,
                Severity::High => report.high_incidents += 1,
                Severity::Medium => report.medium_incidents += 1,
                Severity::Low => report.low_incidents += 1,
            }
        }

        if let Some(roster) = &result.participant_report {
            report.missing_participants += roster.missing.len();
            report.extra_participants += roster.extra.len();
            report
                .missing_ids
                .extend(roster.missing.iter().map(|p| p.user_id));
            report
                .extra_ids
                .extend(roster.extra.iter().map(|p| p.user_id));
        }
    }

    report
}
