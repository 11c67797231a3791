//! Roster reconciliation.
//!
//! Pure set algebra over one chat's live membership versus the expected
//! member list. Missing members are expected ids absent from the live
//! roster; extra members are live profiles absent from the expected list.

use chrono::Utc;
use std::collections::HashSet;
use tracing::debug;

use crate::models::{Participant, ParticipantReport};

/// Compare a live roster snapshot against the expected member ids.
///
/// Output is deterministic: both discrepancy lists are sorted by user id.
/// Identical inputs produce an empty report regardless of ordering.
pub fn reconcile(
    chat_id: i64,
    chat_name: &str,
    live: &[Participant],
    expected: &[i64],
) -> ParticipantReport {
    let live_ids: HashSet<i64> = live.iter().map(|p| p.user_id).collect();
    let expected_ids: HashSet<i64> = expected.iter().copied().collect();

    let mut missing: Vec<Participant> = expected_ids
        .difference(&live_ids)
        .map(|&id| Participant::bare(id))
        .collect();
    missing.sort_by_key(|p| p.user_id);

    let mut extra: Vec<Participant> = live
        .iter()
        .filter(|p| !expected_ids.contains(&p.user_id))
        .cloned()
        .collect();
    extra.sort_by_key(|p| p.user_id);
    extra.dedup_by_key(|p| p.user_id);

    debug!(
        "Roster check for chat {}: {} live, {} expected, {} missing, {} extra",
        chat_id,
        live.len(),
        expected.len(),
        missing.len(),
        extra.len()
    );

    ParticipantReport {
        chat_id,
        chat_name: chat_name.to_string(),
        missing,
        extra,
        taken_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(user_id: i64, handle: &str) -> Participant {
        Participant {
            user_id,
            handle: Some(handle.to_string()),
            first_name: None,
            last_name: None,
            is_bot: false,
        }
    }

    #[test]
    fn test_set_difference() {
        let live = vec![member(1, "ada"), member(2, "bob"), member(3, "cyd")];
        let expected = vec![1, 3, 4];

        let report = reconcile(-100, "ops", &live, &expected);

        assert_eq!(report.missing.len(), 1);
        assert_eq!(report.missing[0].user_id, 4);
        assert!(report.missing[0].handle.is_none());

        assert_eq!(report.extra.len(), 1);
        assert_eq!(report.extra[0].user_id, 2);
        assert_eq!(report.extra[0].handle.as_deref(), Some("bob"));

        assert!(report.has_discrepancies());
    }

    #[test]
    fn test_identical_rosters_are_clean() {
        let live = vec![member(1, "ada"), member(2, "bob")];
        let report = reconcile(-100, "ops", &live, &[2, 1]);
        assert!(!report.has_discrepancies());
    }

    #[test]
    fn test_empty_live_roster() {
        let report = reconcile(-100, "ops", &[], &[5, 6]);
        let ids: Vec<i64> = report.missing.iter().map(|p| p.user_id).collect();
        assert_eq!(ids, vec![5, 6]);
        assert!(report.extra.is_empty());
    }

    #[test]
    fn test_output_is_sorted() {
        let live = vec![member(9, "z"), member(3, "a"), member(7, "m")];
        let report = reconcile(-100, "ops", &live, &[]);
        let ids: Vec<i64> = report.extra.iter().map(|p| p.user_id).collect();
        assert_eq!(ids, vec![3, 7, 9]);
    }
}
