//! Priority Queue (spec §4.F): ordered scheduling of events awaiting a
//! scrape cycle, rebuilt each cycle from the latest discovery result.
//!
//! New code (the teacher has no scheduling-priority analogue); built in the
//! teacher's plain-data-structure style, a `BinaryHeap` ordered by the
//! composite key the spec defines.

use crate::model::ExternalMatchId;
use chrono::{Duration, NaiveDateTime};
use std::cmp::Reverse;
use std::collections::BinaryHeap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum UrgencyTier {
    Under24h,
    From24hTo72h,
    From3dTo7d,
    Over7d,
}

impl UrgencyTier {
    pub fn classify(now: NaiveDateTime, kickoff: NaiveDateTime) -> Self {
        let until = kickoff - now;
        if until <= Duration::hours(24) {
            UrgencyTier::Under24h
        } else if until <= Duration::hours(72) {
            UrgencyTier::From24hTo72h
        } else if until <= Duration::days(7) {
            UrgencyTier::From3dTo7d
        } else {
            UrgencyTier::Over7d
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScheduledEvent {
    pub event: ExternalMatchId,
    pub kickoff: NaiveDateTime,
    pub coverage: usize,
    pub has_betpawa: bool,
}

/// Composite ordering key: `(urgency_tier, kickoff asc, -coverage, has_no_betpawa)`.
/// Lower sorts first. `BinaryHeap` is a max-heap, so the queue stores
/// `Reverse(SortKey)` to get min-heap behaviour.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct SortKey {
    urgency_tier: UrgencyTier,
    kickoff_millis: i64,
    negated_coverage: i64,
    has_no_betpawa: bool,
}

impl ScheduledEvent {
    fn sort_key(&self, now: NaiveDateTime) -> SortKey {
        SortKey {
            urgency_tier: UrgencyTier::classify(now, self.kickoff),
            kickoff_millis: self.kickoff.and_utc().timestamp_millis(),
            negated_coverage: -(self.coverage as i64),
            has_no_betpawa: !self.has_betpawa,
        }
    }
}

struct HeapEntry {
    key: SortKey,
    event: ScheduledEvent,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}
impl Eq for HeapEntry {}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key.cmp(&other.key)
    }
}

#[derive(Default)]
pub struct PriorityQueue {
    heap: BinaryHeap<Reverse<HeapEntry>>,
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self { heap: BinaryHeap::new() }
    }

    /// Rebuild the queue from the latest discovery result (spec §4.F
    /// Lifecycle): drops any stale entries from the previous cycle.
    pub fn rebuild(&mut self, now: NaiveDateTime, events: Vec<ScheduledEvent>) {
        self.heap.clear();
        for event in events {
            let key = event.sort_key(now);
            self.heap.push(Reverse(HeapEntry { key, event }));
        }
    }

    pub fn pop(&mut self) -> Option<ScheduledEvent> {
        self.heap.pop().map(|Reverse(entry)| entry.event)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 7, 30).unwrap().and_hms_opt(0, 0, 0).unwrap()
    }

    #[test]
    fn more_urgent_tier_pops_first() {
        let mut q = PriorityQueue::new();
        q.rebuild(
            now(),
            vec![
                ScheduledEvent { event: ExternalMatchId(1), kickoff: now() + Duration::days(10), coverage: 3, has_betpawa: true },
                ScheduledEvent { event: ExternalMatchId(2), kickoff: now() + Duration::hours(2), coverage: 0, has_betpawa: false },
            ],
        );
        assert_eq!(q.pop().unwrap().event, ExternalMatchId(2));
        assert_eq!(q.pop().unwrap().event, ExternalMatchId(1));
    }

    #[test]
    fn within_tier_higher_coverage_pops_first() {
        let mut q = PriorityQueue::new();
        q.rebuild(
            now(),
            vec![
                ScheduledEvent { event: ExternalMatchId(1), kickoff: now() + Duration::hours(2), coverage: 1, has_betpawa: true },
                ScheduledEvent { event: ExternalMatchId(2), kickoff: now() + Duration::hours(2), coverage: 3, has_betpawa: true },
            ],
        );
        assert_eq!(q.pop().unwrap().event, ExternalMatchId(2));
    }

    #[test]
    fn missing_betpawa_is_tiebroken_last() {
        let mut q = PriorityQueue::new();
        q.rebuild(
            now(),
            vec![
                ScheduledEvent { event: ExternalMatchId(1), kickoff: now() + Duration::hours(2), coverage: 2, has_betpawa: false },
                ScheduledEvent { event: ExternalMatchId(2), kickoff: now() + Duration::hours(2), coverage: 2, has_betpawa: true },
            ],
        );
        assert_eq!(q.pop().unwrap().event, ExternalMatchId(2));
        assert_eq!(q.pop().unwrap().event, ExternalMatchId(1));
    }
}
