#[macro_use]
extern crate tracing;

pub mod event;
pub mod reconcile;
pub mod replay;
pub mod stats;
pub mod store;
pub mod update;
pub mod view;

pub use event::{Dispatcher, Event, EventConsumer, EventLog, MessageSource};
pub use reconcile::{ReconcileError, Reconciled, Reconciler};
pub use replay::ReplaySource;
pub use stats::{FeedStats, StatsSnapshot};
pub use store::{FeatureStore, SharedStore, StoreError, TrainMarker};
pub use update::{GeoPosition, Location, PositionUpdate, TrainNumber, UpdateError};
pub use view::{MapView, ViewError, Viewport};

/// Everything a running map needs, built once and handed to the sources.
pub struct LiveMap {
    pub store: SharedStore,
    pub stats: FeedStats,
    pub view: MapView,
}

impl LiveMap {
    pub fn new(viewport: Viewport) -> Self {
        let store = FeatureStore::new().shared();
        Self {
            view: MapView::new(store.clone(), viewport),
            stats: FeedStats::new(),
            store,
        }
    }

    /// Subscribes the logging, statistics and reconciling consumers to `source`.
    pub fn attach(&self, source: &mut impl MessageSource) {
        source.subscribe(Box::new(EventLog));
        source.subscribe(Box::new(self.stats.clone()));
        source.subscribe(Box::new(
            Reconciler::new(self.store.clone())
                .with_view(self.view.projection())
                .with_stats(self.stats.clone()),
        ));
    }
}

#[test]
fn attached_map_follows_replay() {
    let map = LiveMap::new(Viewport::default());
    let mut source = ReplaySource::new(
        "inline",
        &b"{\"trainNumber\":1,\"location\":{\"type\":\"Point\",\"coordinates\":[24.9,60.2]},\"speed\":10}\n\
           {\"trainNumber\":1,\"location\":{\"type\":\"Point\",\"coordinates\":[24.9,60.2]},\"speed\":20}\n"[..],
    );
    map.attach(&mut source);
    source.run().unwrap();

    assert_eq!(map.view.train_count().unwrap(), 1);
    assert_eq!(
        map.store.read().unwrap().get(TrainNumber(1)).unwrap().speed,
        20.0
    );
    assert_eq!(map.stats.snapshot().updated, 1);
}
