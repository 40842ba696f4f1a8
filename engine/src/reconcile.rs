use libmap::Projection;

use crate::{
    event::{Event, EventConsumer},
    stats::FeedStats,
    store::{SharedStore, StoreError, TrainMarker},
    update::{PositionUpdate, UpdateError},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    Inserted,
    Updated,
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Update(#[from] UpdateError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Applies position updates to the feature store, one marker per train.
pub struct Reconciler {
    store: SharedStore,
    view: Projection,
    stats: Option<FeedStats>,
}

impl Reconciler {
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            view: Projection::WebMercator,
            stats: None,
        }
    }

    pub fn with_stats(mut self, stats: FeedStats) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn with_view(mut self, view: Projection) -> Self {
        self.view = view;
        self
    }

    pub fn reconcile(&self, update: &PositionUpdate) -> Result<Reconciled, ReconcileError> {
        let position = update.position()?;
        let point = Projection::Geographic
            .transform(self.view, position.coord())
            .map_err(UpdateError::from)?;

        // lookup and insert under one write lock
        let mut store = self.store.write()?;
        if let Some(marker) = store.get_mut(update.train_number) {
            marker.position = point.into();
            marker.speed = update.speed;
            return Ok(Reconciled::Updated);
        }

        store.insert(TrainMarker {
            train_number: update.train_number,
            position: point.into(),
            speed: update.speed,
        })?;
        Ok(Reconciled::Inserted)
    }
}

impl EventConsumer for Reconciler {
    fn on_event(&mut self, event: &Event) {
        let Event::Position(update) = event else {
            return;
        };

        let outcome = self.reconcile(update);
        match &outcome {
            Ok(outcome) => trace!(train = %update.train_number, speed = update.speed, ?outcome),
            Err(err) => warn!(train = %update.train_number, %err, "dropping position update"),
        }
        if let Some(stats) = &self.stats {
            stats.record(&outcome);
        }
    }
}

#[cfg(test)]
fn fixture() -> (SharedStore, Reconciler) {
    let store = crate::store::FeatureStore::new().shared();
    let reconciler = Reconciler::new(store.clone());
    (store, reconciler)
}

#[test]
fn inserts_new_train() {
    let (store, reconciler) = fixture();
    let outcome = reconciler
        .reconcile(&PositionUpdate::new(8, 24.9, 60.2, 45.0))
        .unwrap();
    assert_eq!(outcome, Reconciled::Inserted);

    let store = store.read().unwrap();
    assert_eq!(store.len(), 1);
    let marker = store.get(crate::update::TrainNumber(8)).unwrap();
    let expected = libmap::proj::from_lon_lat(geo::coord! { x: 24.9, y: 60.2 }).unwrap();
    assert_eq!(marker.position, geo::Point::from(expected));
    assert_eq!(marker.speed, 45.0);
}

#[test]
fn second_update_overwrites_first() {
    let (store, reconciler) = fixture();
    reconciler
        .reconcile(&PositionUpdate::new(8, 24.9, 60.2, 10.0))
        .unwrap();
    let outcome = reconciler
        .reconcile(&PositionUpdate::new(8, 25.0, 60.3, 20.0))
        .unwrap();
    assert_eq!(outcome, Reconciled::Updated);

    let store = store.read().unwrap();
    assert_eq!(store.len(), 1);
    let marker = store.get(crate::update::TrainNumber(8)).unwrap();
    let expected = libmap::proj::from_lon_lat(geo::coord! { x: 25.0, y: 60.3 }).unwrap();
    assert_eq!(marker.position, geo::Point::from(expected));
    assert_eq!(marker.speed, 20.0);
}

#[test]
fn trains_do_not_interfere() {
    let (store, reconciler) = fixture();
    for update in [
        PositionUpdate::new(1, 24.9, 60.2, 10.0),
        PositionUpdate::new(2, 23.7, 61.5, 30.0),
        PositionUpdate::new(1, 24.8, 60.4, 15.0),
    ] {
        reconciler.reconcile(&update).unwrap();
    }

    let store = store.read().unwrap();
    assert_eq!(store.len(), 2);
    assert_eq!(store.get(crate::update::TrainNumber(1)).unwrap().speed, 15.0);
    assert_eq!(store.get(crate::update::TrainNumber(2)).unwrap().speed, 30.0);
    let expected = libmap::proj::from_lon_lat(geo::coord! { x: 23.7, y: 61.5 }).unwrap();
    assert_eq!(store.get(crate::update::TrainNumber(2)).unwrap().position, geo::Point::from(expected));
}

#[test]
fn missing_location_leaves_store_untouched() {
    let (store, reconciler) = fixture();
    reconciler
        .reconcile(&PositionUpdate::new(8, 24.9, 60.2, 10.0))
        .unwrap();

    let mut broken = PositionUpdate::new(8, 0.0, 0.0, 99.0);
    broken.location = None;
    assert!(matches!(
        reconciler.reconcile(&broken),
        Err(ReconcileError::Update(UpdateError::MissingLocation))
    ));

    let mut new_train = broken.clone();
    new_train.train_number = crate::update::TrainNumber(9);
    assert!(reconciler.reconcile(&new_train).is_err());

    let out_of_range = PositionUpdate::new(8, 24.9, 123.0, 99.0);
    assert!(reconciler.reconcile(&out_of_range).is_err());

    let store = store.read().unwrap();
    assert_eq!(store.len(), 1);
    assert_eq!(store.get(crate::update::TrainNumber(8)).unwrap().speed, 10.0);
    assert!(store.get(crate::update::TrainNumber(9)).is_none());
}

#[test]
fn events_apply_in_delivery_order() {
    let (store, mut reconciler) = fixture();
    reconciler.on_event(&Event::Position(PositionUpdate::new(1, 24.9, 60.2, 10.0)));
    reconciler.on_event(&Event::Position(PositionUpdate::new(1, 24.9, 60.2, 20.0)));
    reconciler.on_event(&Event::Connected);

    let store = store.read().unwrap();
    assert_eq!(store.len(), 1);
    assert_eq!(store.get(crate::update::TrainNumber(1)).unwrap().speed, 20.0);
}
