use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};

use crate::{
    event::{Dispatcher, Event, EventConsumer, MessageSource},
    update::PositionUpdate,
};

/// Replays recorded payloads, one JSON document per line.
pub struct ReplaySource<R> {
    name: String,
    reader: R,
    dispatcher: Dispatcher,
}

impl ReplaySource<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        Ok(Self::new(path.display().to_string(), BufReader::new(file)))
    }
}

impl<R: BufRead> ReplaySource<R> {
    pub fn new(name: impl Into<String>, reader: R) -> Self {
        Self {
            name: name.into(),
            reader,
            dispatcher: Dispatcher::new(),
        }
    }

    /// Dispatches every line in file order and returns how many were delivered.
    #[tracing::instrument(skip(self), fields(source = %self.name), err)]
    pub fn run(mut self) -> std::io::Result<usize> {
        let mut delivered = 0;
        let mut line = String::new();
        let mut number = 0usize;
        loop {
            line.clear();
            if self.reader.read_line(&mut line)? == 0 {
                break;
            }
            number += 1;
            let payload = line.trim();
            if payload.is_empty() {
                continue;
            }

            let event = match PositionUpdate::from_payload(payload.as_bytes()) {
                Ok(update) => Event::Position(update),
                Err(err) => Event::Malformed {
                    topic: format!("{}:{number}", self.name),
                    reason: err.to_string(),
                },
            };
            self.dispatcher.dispatch(event);
            delivered += 1;
        }
        debug!(delivered, lines = number, "replay finished");
        Ok(delivered)
    }
}

impl<R> MessageSource for ReplaySource<R> {
    fn subscribe(&mut self, consumer: Box<dyn EventConsumer + Send>) {
        self.dispatcher.subscribe(consumer);
    }
}

#[test]
fn replays_recorded_feed() {
    use crate::{
        reconcile::Reconciler,
        stats::FeedStats,
        store::FeatureStore,
        update::TrainNumber,
    };
    use std::sync::{Arc, Mutex};

    let store = FeatureStore::new().shared();
    let stats = FeedStats::new();
    let malformed = Arc::new(Mutex::new(Vec::new()));

    let mut source = ReplaySource::new(
        "positions.ndjson",
        include_str!("../../data/positions.ndjson").as_bytes(),
    );
    source.subscribe(Box::new(stats.clone()));
    source.subscribe(Box::new(Reconciler::new(store.clone()).with_stats(stats.clone())));
    {
        let malformed = Arc::clone(&malformed);
        source.subscribe(Box::new(move |event: &Event| {
            if let Event::Malformed { topic, .. } = event {
                malformed.lock().unwrap().push(topic.clone());
            }
        }));
    }

    assert_eq!(source.run().unwrap(), 6);
    assert_eq!(*malformed.lock().unwrap(), ["positions.ndjson:5"]);

    let store = store.read().unwrap();
    assert_eq!(store.len(), 2);
    assert_eq!(store.get(TrainNumber(8)).unwrap().speed, 60.0);
    assert_eq!(store.get(TrainNumber(165)).unwrap().speed, 12.0);
    assert!(store.get(TrainNumber(171)).is_none());

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.received, 5);
    assert_eq!(snapshot.inserted, 2);
    assert_eq!(snapshot.updated, 2);
    assert_eq!(snapshot.dropped, 1);
    assert_eq!(snapshot.malformed, 1);
}
