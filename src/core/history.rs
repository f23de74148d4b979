use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::event::{Event, EventKind};

/// Cap on retained events per pipeline. Oldest entries are evicted on overflow.
pub const DEFAULT_MAX_ENTRIES: usize = 50;

/// Retention window for recorded events.
#[derive(Debug, Clone, Copy)]
pub struct Retention {
    pub max_entries: usize,
    pub max_age: Option<Duration>,
}

impl Default for Retention {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            max_age: None,
        }
    }
}

/// Persisted form of a history event. The pipeline id is the map key in the
/// document, so entries do not repeat it; seq is derived from array order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct HistoryEntry {
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub build_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Ordered, bounded record of past events per pipeline.
///
/// Exclusively owns its event sequences; callers append through `record` and
/// read through `latest`/`predecessor`/`within_cooldown`. Each append assigns
/// a strictly increasing per-pipeline seq, so ordering authority is the
/// counter, not the event timestamps.
#[derive(Debug, Clone, Default)]
pub struct HistoryStore {
    pipelines: BTreeMap<String, Vec<Event>>,
    retention: Retention,
}

impl HistoryStore {
    pub fn new(retention: Retention) -> Self {
        Self {
            pipelines: BTreeMap::new(),
            retention,
        }
    }

    /// Rebuild a store from its persisted form, assigning seq from array order.
    pub fn from_entries(
        entries: &BTreeMap<String, Vec<HistoryEntry>>,
        retention: Retention,
    ) -> Self {
        let mut pipelines = BTreeMap::new();
        for (pipeline_id, list) in entries {
            let events: Vec<Event> = list
                .iter()
                .enumerate()
                .map(|(idx, entry)| Event {
                    pipeline_id: pipeline_id.clone(),
                    kind: entry.kind,
                    timestamp: entry.timestamp,
                    build_id: entry.build_id.clone(),
                    detail: entry.detail.clone(),
                    seq: idx as u64 + 1,
                })
                .collect();
            pipelines.insert(pipeline_id.clone(), events);
        }
        Self {
            pipelines,
            retention,
        }
    }

    /// Persisted form of the store.
    pub fn to_entries(&self) -> BTreeMap<String, Vec<HistoryEntry>> {
        self.pipelines
            .iter()
            .map(|(pipeline_id, events)| {
                let list = events
                    .iter()
                    .map(|e| HistoryEntry {
                        kind: e.kind,
                        timestamp: e.timestamp,
                        build_id: e.build_id.clone(),
                        detail: e.detail.clone(),
                    })
                    .collect();
                (pipeline_id.clone(), list)
            })
            .collect()
    }

    /// Append an event to its pipeline's history, assigning the next seq and
    /// evicting entries beyond the retention window. Returns the recorded
    /// event (with seq assigned).
    pub fn record(&mut self, mut event: Event) -> Event {
        let events = self.pipelines.entry(event.pipeline_id.clone()).or_default();
        let next_seq = events.last().map(|e| e.seq + 1).unwrap_or(1);
        event.seq = next_seq;
        events.push(event.clone());

        if let Some(max_age) = self.retention.max_age {
            let cutoff = event.timestamp - max_age;
            events.retain(|e| e.timestamp >= cutoff || e.seq == next_seq);
        }
        if events.len() > self.retention.max_entries {
            let excess = events.len() - self.retention.max_entries;
            events.drain(..excess);
        }

        event
    }

    /// Most recent event for a pipeline, if any.
    pub fn latest(&self, pipeline_id: &str) -> Option<&Event> {
        self.pipelines.get(pipeline_id).and_then(|v| v.last())
    }

    /// Most recent event strictly before the given event's seq for the same
    /// pipeline. This is what the rule engine consults after `record`, so the
    /// newly recorded event never shadows its own predecessor.
    pub fn predecessor(&self, event: &Event) -> Option<&Event> {
        self.pipelines
            .get(&event.pipeline_id)?
            .iter()
            .rev()
            .find(|e| e.seq < event.seq)
    }

    /// True when an earlier event (seq < before_seq) of the same kind for the
    /// same pipeline was recorded within `window` of `now`.
    pub fn within_cooldown(
        &self,
        pipeline_id: &str,
        kind: EventKind,
        before_seq: u64,
        now: DateTime<Utc>,
        window: Duration,
    ) -> bool {
        let Some(events) = self.pipelines.get(pipeline_id) else {
            return false;
        };
        events
            .iter()
            .filter(|e| e.seq < before_seq && e.kind == kind)
            .any(|e| now - e.timestamp < window)
    }

    pub fn pipeline_ids(&self) -> Vec<&str> {
        self.pipelines.keys().map(String::as_str).collect()
    }

    pub fn events(&self, pipeline_id: &str) -> &[Event] {
        self.pipelines
            .get(pipeline_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn total_events(&self) -> usize {
        self.pipelines.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn event(pipeline: &str, kind: EventKind, secs: i64, build: &str) -> Event {
        Event::new(pipeline, kind, ts(secs), build, None)
    }

    #[test]
    fn record_assigns_increasing_seq_per_pipeline() {
        let mut store = HistoryStore::default();
        let a = store.record(event("p1", EventKind::Started, 0, "1"));
        let b = store.record(event("p1", EventKind::Failed, 10, "1"));
        let c = store.record(event("p2", EventKind::Started, 20, "7"));

        assert_eq!(a.seq, 1);
        assert_eq!(b.seq, 2);
        assert_eq!(c.seq, 1);
    }

    #[test]
    fn latest_returns_most_recent_and_none_for_unknown() {
        let mut store = HistoryStore::default();
        store.record(event("p1", EventKind::Started, 0, "1"));
        store.record(event("p1", EventKind::Failed, 10, "1"));

        assert_eq!(store.latest("p1").unwrap().kind, EventKind::Failed);
        assert!(store.latest("missing").is_none());
    }

    #[test]
    fn predecessor_skips_the_event_itself() {
        let mut store = HistoryStore::default();
        store.record(event("p1", EventKind::Failed, 0, "1"));
        let succeeded = store.record(event("p1", EventKind::Succeeded, 10, "2"));

        let prior = store.predecessor(&succeeded).unwrap();
        assert_eq!(prior.kind, EventKind::Failed);

        let first = store.events("p1")[0].clone();
        assert!(store.predecessor(&first).is_none());
    }

    #[test]
    fn within_cooldown_only_matches_same_kind_and_window() {
        let mut store = HistoryStore::default();
        store.record(event("p1", EventKind::Succeeded, 0, "1"));
        let next = store.record(event("p1", EventKind::Succeeded, 30, "2"));

        let window = Duration::seconds(60);
        assert!(store.within_cooldown("p1", EventKind::Succeeded, next.seq, ts(30), window));
        assert!(!store.within_cooldown("p1", EventKind::Failed, next.seq, ts(30), window));
        // Outside the window
        assert!(!store.within_cooldown("p1", EventKind::Succeeded, next.seq, ts(120), window));
        // Unknown pipeline has empty history
        assert!(!store.within_cooldown("p9", EventKind::Succeeded, 99, ts(30), window));
    }

    #[test]
    fn eviction_keeps_newest_entries() {
        let mut store = HistoryStore::new(Retention {
            max_entries: 3,
            max_age: None,
        });
        for i in 0..5 {
            store.record(event("p1", EventKind::Started, i * 10, &format!("{}", i)));
        }

        let events = store.events("p1");
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].build_id, "2");
        assert_eq!(events[2].build_id, "4");
    }

    #[test]
    fn age_based_eviction_drops_stale_entries() {
        let mut store = HistoryStore::new(Retention {
            max_entries: 50,
            max_age: Some(Duration::seconds(100)),
        });
        store.record(event("p1", EventKind::Started, 0, "1"));
        store.record(event("p1", EventKind::Started, 200, "2"));

        let events = store.events("p1");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].build_id, "2");
    }

    #[test]
    fn entries_round_trip_preserves_order_and_seq() {
        let mut store = HistoryStore::default();
        store.record(event("p1", EventKind::Failed, 0, "1"));
        store.record(event("p1", EventKind::Succeeded, 10, "2"));

        let rebuilt = HistoryStore::from_entries(&store.to_entries(), Retention::default());
        let events = rebuilt.events("p1");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].seq, 1);
        assert_eq!(events[1].seq, 2);
        assert_eq!(events[1].kind, EventKind::Succeeded);
    }
}
