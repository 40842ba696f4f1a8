use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use crate::{
    event::{Event, EventConsumer},
    reconcile::{ReconcileError, Reconciled},
};

#[derive(Debug, Default)]
struct Counters {
    received: AtomicU64,
    inserted: AtomicU64,
    updated: AtomicU64,
    dropped: AtomicU64,
    malformed: AtomicU64,
    disconnects: AtomicU64,
}

/// Feed counters, cheap to clone and shared between tasks.
#[derive(Debug, Clone, Default)]
pub struct FeedStats(Arc<Counters>);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub received: u64,
    pub inserted: u64,
    pub updated: u64,
    pub dropped: u64,
    pub malformed: u64,
    pub disconnects: u64,
}

impl FeedStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&self, outcome: &Result<Reconciled, ReconcileError>) {
        let counter = match outcome {
            Ok(Reconciled::Inserted) => &self.0.inserted,
            Ok(Reconciled::Updated) => &self.0.updated,
            Err(_) => &self.0.dropped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.0.received.load(Ordering::Relaxed),
            inserted: self.0.inserted.load(Ordering::Relaxed),
            updated: self.0.updated.load(Ordering::Relaxed),
            dropped: self.0.dropped.load(Ordering::Relaxed),
            malformed: self.0.malformed.load(Ordering::Relaxed),
            disconnects: self.0.disconnects.load(Ordering::Relaxed),
        }
    }
}

impl EventConsumer for FeedStats {
    fn on_event(&mut self, event: &Event) {
        let counter = match event {
            Event::Position(_) => &self.0.received,
            Event::Malformed { .. } => &self.0.malformed,
            Event::ConnectionLost { .. } => &self.0.disconnects,
            Event::Connected | Event::ConnectionFailed { .. } => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} received - {} new trains - {} moves - {} dropped - {} malformed - {} disconnects",
            self.received, self.inserted, self.updated, self.dropped, self.malformed, self.disconnects
        )
    }
}

#[test]
fn counts_events_and_outcomes() {
    use crate::{reconcile::Reconciler, store::FeatureStore, update::PositionUpdate};

    let stats = FeedStats::new();
    let mut counter = stats.clone();
    let mut reconciler = Reconciler::new(FeatureStore::new().shared()).with_stats(stats.clone());

    let mut missing = PositionUpdate::new(3, 0.0, 0.0, 0.0);
    missing.location = None;
    let events = [
        Event::Connected,
        Event::Position(PositionUpdate::new(1, 24.9, 60.2, 10.0)),
        Event::Position(PositionUpdate::new(1, 24.9, 60.3, 12.0)),
        Event::Position(missing),
        Event::Malformed {
            topic: "train-locations/2023-05-04/9".to_string(),
            reason: "eof".to_string(),
        },
        Event::ConnectionLost {
            reason: "reset".to_string(),
        },
    ];
    for event in &events {
        counter.on_event(event);
        reconciler.on_event(event);
    }

    assert_eq!(
        stats.snapshot(),
        StatsSnapshot {
            received: 3,
            inserted: 1,
            updated: 1,
            dropped: 1,
            malformed: 1,
            disconnects: 1,
        }
    );
}
