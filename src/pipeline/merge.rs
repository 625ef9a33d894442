//! Idempotent merge of carrier events into a stored timeline.
//!
//! Event ids are derived from carrier-native fields, so replaying the same
//! carrier response any number of times converges to the same stored set.
//! Existing events are never altered or removed.

use std::cmp::Ordering;
use std::collections::HashSet;

use crate::models::TrackingEvent;

/// Events from `incoming` whose id is not yet stored.
///
/// Duplicates inside `incoming` collapse to their first occurrence.
pub fn events_to_write(
    existing: &[TrackingEvent],
    incoming: &[TrackingEvent],
) -> Vec<TrackingEvent> {
    let mut seen: HashSet<&str> = existing.iter().map(|e| e.id.as_str()).collect();

    incoming
        .iter()
        .filter(|e| seen.insert(e.id.as_str()))
        .cloned()
        .collect()
}

/// The stored timeline after applying `incoming`, ordered by timestamp.
pub fn merge_timeline(
    existing: &[TrackingEvent],
    incoming: &[TrackingEvent],
) -> Vec<TrackingEvent> {
    let mut timeline = existing.to_vec();
    timeline.extend(events_to_write(existing, incoming));
    sort_timeline(&mut timeline);
    timeline
}

/// Order events chronologically; unparseable timestamps sort by raw text after parsed ones.
pub fn sort_timeline(events: &mut [TrackingEvent]) {
    events.sort_by(|a, b| match (a.occurred_at(), b.occurred_at()) {
        (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.id.cmp(&b.id)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(code: &str, at: &str) -> TrackingEvent {
        TrackingEvent::new(code, at)
    }

    #[test]
    fn test_new_events_only() {
        let existing = vec![event("DEP", "2024-01-01T00:00:00Z")];
        let incoming = vec![
            event("DEP", "2024-01-01T00:00:00Z"),
            event("ARR", "2024-01-05T00:00:00Z"),
        ];

        let delta = events_to_write(&existing, &incoming);
        assert_eq!(delta.len(), 1);
        assert_eq!(delta[0].id, "ARR-2024-01-05T00:00:00Z");
    }

    #[test]
    fn test_existing_event_never_altered() {
        let stored = event("DEP", "2024-01-01T00:00:00Z")
            .with_description(Some("Departed Busan".into()));
        let replay = event("DEP", "2024-01-01T00:00:00Z")
            .with_description(Some("Departure".into()));

        assert!(events_to_write(&[stored.clone()], &[replay]).is_empty());
        let timeline = merge_timeline(&[stored.clone()], &[]);
        assert_eq!(timeline, vec![stored]);
    }

    #[test]
    fn test_duplicates_within_batch() {
        let incoming = vec![
            event("ARR", "2024-01-05T00:00:00Z"),
            event("ARR", "2024-01-05T00:00:00Z"),
        ];
        assert_eq!(events_to_write(&[], &incoming).len(), 1);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let existing = vec![event("GTIN", "2023-12-30T10:00:00Z")];
        let incoming = vec![
            event("ARR", "2024-01-05T00:00:00Z"),
            event("DEP", "2024-01-01T00:00:00Z"),
            event("ARR", "2024-01-05T00:00:00Z"),
        ];

        let once = merge_timeline(&existing, &incoming);
        let twice = merge_timeline(&once, &incoming);
        assert_eq!(once, twice);
        assert!(events_to_write(&once, &incoming).is_empty());
    }

    #[test]
    fn test_timeline_order() {
        let merged = merge_timeline(
            &[event("ARR", "2024-01-05T00:00:00Z")],
            &[
                event("ZZZ", "not-a-date"),
                event("DEP", "2024-01-01T09:00:00+09:00"),
            ],
        );
        let codes: Vec<_> = merged.iter().map(|e| e.status.as_str()).collect();
        assert_eq!(codes, vec!["DEP", "ARR", "ZZZ"]);
    }
}
