use std::{
    collections::HashMap,
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use geo::Point;
use libmap::{MapFeature, Projection, ProjectionError};

use crate::update::TrainNumber;

/// Current displayed state of one train, position in the view projection.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainMarker {
    pub train_number: TrainNumber,
    pub position: Point<f64>,
    pub speed: f64,
}

impl TrainMarker {
    pub fn to_map_feature(&self) -> MapFeature {
        MapFeature::new(self.position)
            .with_property("name", self.train_number.0)
            .with_property("speed", self.speed)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("train {0} already has a marker")]
    Duplicate(TrainNumber),
    #[error("feature store lock was poisoned")]
    Poisoned,
}

/// Train markers, at most one per train number.
#[derive(Debug, Default)]
pub struct FeatureStore {
    markers: slab::Slab<TrainMarker>,
    by_train: HashMap<TrainNumber, usize>,
}

impl FeatureStore {
    pub fn new() -> Self {
        Self {
            markers: slab::Slab::with_capacity(64),
            by_train: HashMap::with_capacity(64),
        }
    }

    pub fn shared(self) -> SharedStore {
        SharedStore(Arc::new(RwLock::new(self)))
    }

    pub fn get(&self, train: TrainNumber) -> Option<&TrainMarker> {
        self.by_train.get(&train).and_then(|key| self.markers.get(*key))
    }

    pub fn get_mut(&mut self, train: TrainNumber) -> Option<&mut TrainMarker> {
        self.by_train
            .get(&train)
            .and_then(|key| self.markers.get_mut(*key))
    }

    pub fn insert(&mut self, marker: TrainMarker) -> Result<usize, StoreError> {
        if self.by_train.contains_key(&marker.train_number) {
            return Err(StoreError::Duplicate(marker.train_number));
        }
        let train = marker.train_number;
        let key = self.markers.insert(marker);
        self.by_train.insert(train, key);
        Ok(key)
    }

    /// Markers in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &TrainMarker> + '_ {
        self.markers.iter().map(|(_, marker)| marker)
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    /// Train features, with their geometry moved from `view` into `output`.
    pub fn to_feature_collection(
        &self,
        view: Projection,
        output: Projection,
    ) -> Result<geojson::FeatureCollection, ProjectionError> {
        let features = self
            .iter()
            .map(|marker| {
                let mut feature = marker.to_map_feature();
                feature.geometry = view.transform_geometry(output, &feature.geometry)?;
                Ok(feature.to_feature())
            })
            .collect::<Result<Vec<_>, ProjectionError>>()?;

        Ok(geojson::FeatureCollection {
            bbox: None,
            features,
            foreign_members: None,
        })
    }
}

/// Handle on the one feature store of the application.
#[derive(Debug, Clone, Default)]
pub struct SharedStore(Arc<RwLock<FeatureStore>>);

impl SharedStore {
    pub fn read(&self) -> Result<RwLockReadGuard<'_, FeatureStore>, StoreError> {
        self.0.read().map_err(|_| StoreError::Poisoned)
    }

    pub fn write(&self) -> Result<RwLockWriteGuard<'_, FeatureStore>, StoreError> {
        self.0.write().map_err(|_| StoreError::Poisoned)
    }
}

#[test]
fn rejects_duplicate_train() {
    let mut store = FeatureStore::new();
    let marker = TrainMarker {
        train_number: TrainNumber(8),
        position: geo::point!(x: 1.0, y: 2.0),
        speed: 10.0,
    };

    store.insert(marker.clone()).unwrap();
    assert!(matches!(
        store.insert(marker),
        Err(StoreError::Duplicate(TrainNumber(8)))
    ));
    assert_eq!(store.len(), 1);
}

#[test]
fn iterates_in_insertion_order() {
    let mut store = FeatureStore::new();
    for train in [3, 1, 2] {
        store
            .insert(TrainMarker {
                train_number: TrainNumber(train),
                position: geo::point!(x: 0.0, y: 0.0),
                speed: 0.0,
            })
            .unwrap();
    }
    let order: Vec<_> = store.iter().map(|m| m.train_number.0).collect();
    assert_eq!(order, [3, 1, 2]);

    store.get_mut(TrainNumber(1)).unwrap().speed = 5.0;
    assert_eq!(store.get(TrainNumber(1)).unwrap().speed, 5.0);
    assert!(store.get(TrainNumber(4)).is_none());
}

#[test]
fn exports_trains_as_geojson() {
    let mut store = FeatureStore::new();
    let position = libmap::proj::from_lon_lat(geo::coord! { x: 24.9, y: 60.2 }).unwrap();
    store
        .insert(TrainMarker {
            train_number: TrainNumber(8),
            position: position.into(),
            speed: 45.0,
        })
        .unwrap();

    let collection = store
        .to_feature_collection(Projection::WebMercator, Projection::Geographic)
        .unwrap();
    assert_eq!(collection.features.len(), 1);

    let feature = &collection.features[0];
    assert_eq!(feature.property("name").and_then(|v| v.as_u64()), Some(8));
    assert_eq!(feature.property("speed").and_then(|v| v.as_f64()), Some(45.0));

    let Some(geojson::Value::Point(coords)) = feature.geometry.as_ref().map(|g| &g.value) else {
        panic!("train feature is not a point");
    };
    assert!((coords[0] - 24.9).abs() < 1e-6);
    assert!((coords[1] - 60.2).abs() < 1e-6);
}
