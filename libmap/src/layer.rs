use geo::{BoundingRect, ClosestPoint, Coord, EuclideanDistance, Geometry, Rect};
#[cfg(test)]
use geo::line_string;
use geojson::{GeoJson, JsonObject, JsonValue};
use rstar::{RTree, RTreeObject, AABB};

use crate::{proj::Projection, MapError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerKind {
    Stations,
    Tracks,
    Trains,
    Location,
}

impl LayerKind {
    /// Radius in pixels within which a click still hits a feature of this kind.
    pub fn hit_radius_px(&self) -> f64 {
        match self {
            LayerKind::Stations => 8.0,
            LayerKind::Tracks => 2.0,
            LayerKind::Trains => 16.0,
            LayerKind::Location => 7.0,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            LayerKind::Stations => "stations",
            LayerKind::Tracks => "tracks",
            LayerKind::Trains => "trains",
            LayerKind::Location => "location",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MapFeature {
    pub id: Option<String>,
    pub geometry: Geometry<f64>,
    pub properties: JsonObject,
}

impl MapFeature {
    pub fn new(geometry: impl Into<Geometry<f64>>) -> Self {
        Self {
            id: None,
            geometry: geometry.into(),
            properties: JsonObject::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn property(&self, key: &str) -> Option<&JsonValue> {
        self.properties.get(key)
    }

    /// Distance between `coord` and the closest point of the feature geometry.
    pub fn distance_to(&self, coord: Coord<f64>) -> Option<f64> {
        let point = geo::Point::from(coord);
        match self.geometry.closest_point(&point) {
            geo::Closest::Intersection(_) => Some(0.0),
            geo::Closest::SinglePoint(closest) => Some(closest.euclidean_distance(&point)),
            geo::Closest::Indeterminate => None,
        }
    }

    pub fn to_feature(&self) -> geojson::Feature {
        geojson::Feature {
            bbox: None,
            geometry: Some(geojson::Geometry::new(geojson::Value::from(&self.geometry))),
            id: self.id.clone().map(geojson::feature::Id::String),
            properties: Some(self.properties.clone()),
            foreign_members: None,
        }
    }
}

/// Envelope of one feature, pointing back into [`Layer::features`].
#[derive(Debug, Clone, PartialEq)]
struct FeatureEnvelope {
    envelope: AABB<[f64; 2]>,
    index: usize,
}

impl RTreeObject for FeatureEnvelope {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

#[derive(Debug)]
pub struct Layer {
    kind: LayerKind,
    features: Vec<MapFeature>,
    tree: RTree<FeatureEnvelope>,
}

impl Layer {
    pub fn new(kind: LayerKind) -> Self {
        Self {
            kind,
            features: vec![],
            tree: RTree::new(),
        }
    }

    pub fn from_features(kind: LayerKind, features: Vec<MapFeature>) -> Self {
        let tree = RTree::bulk_load(
            features
                .iter()
                .enumerate()
                .filter_map(|(index, feature)| envelope_of(feature, index))
                .collect(),
        );
        Self {
            kind,
            features,
            tree,
        }
    }

    /// Parses GeoJSON text and reprojects every geometry from `source` into `view`.
    ///
    /// Features without geometry or with coordinates the projection rejects are
    /// skipped.
    #[tracing::instrument(skip(text), fields(bytes = text.len()), err(Debug))]
    pub fn from_geojson(
        kind: LayerKind,
        text: &str,
        source: Projection,
        view: Projection,
    ) -> Result<Self, MapError> {
        let features = match text.parse::<GeoJson>()? {
            GeoJson::FeatureCollection(collection) => collection.features,
            GeoJson::Feature(feature) => vec![feature],
            GeoJson::Geometry(geometry) => vec![geojson::Feature {
                bbox: None,
                geometry: Some(geometry),
                id: None,
                properties: None,
                foreign_members: None,
            }],
        };

        let total = features.len();
        let mut skipped = 0;
        let mut kept = Vec::with_capacity(total);
        for feature in features {
            match project_feature(feature, source, view) {
                Ok(feature) => kept.push(feature),
                Err(err) => {
                    skipped += 1;
                    warn!(layer = kind.name(), %err, "skipping feature");
                }
            }
        }

        info!(layer = kind.name(), total, skipped, "loaded layer");
        Ok(Self::from_features(kind, kept))
    }

    pub fn kind(&self) -> LayerKind {
        self.kind
    }

    pub fn features(&self) -> &[MapFeature] {
        &self.features
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn push(&mut self, feature: MapFeature) {
        let index = self.features.len();
        if let Some(envelope) = envelope_of(&feature, index) {
            self.tree.insert(envelope);
        }
        self.features.push(feature);
    }

    pub fn clear(&mut self) {
        self.features.clear();
        self.tree = RTree::new();
    }

    /// Union of the bounding boxes of every feature.
    pub fn extent(&self) -> Option<Rect<f64>> {
        self.features
            .iter()
            .filter_map(|feature| feature.geometry.bounding_rect())
            .reduce(|a, b| {
                Rect::new(
                    geo::coord! { x: a.min().x.min(b.min().x), y: a.min().y.min(b.min().y) },
                    geo::coord! { x: a.max().x.max(b.max().x), y: a.max().y.max(b.max().y) },
                )
            })
    }

    /// Features within `tolerance` map units of `coord`, closest first.
    pub fn hits(&self, coord: Coord<f64>, tolerance: f64) -> Vec<&MapFeature> {
        let query = AABB::from_corners(
            [coord.x - tolerance, coord.y - tolerance],
            [coord.x + tolerance, coord.y + tolerance],
        );

        let mut hits: Vec<(f64, &MapFeature)> = self
            .tree
            .locate_in_envelope_intersecting(&query)
            .filter_map(|candidate| {
                let feature = &self.features[candidate.index];
                feature
                    .distance_to(coord)
                    .filter(|distance| *distance <= tolerance)
                    .map(|distance| (distance, feature))
            })
            .collect();
        hits.sort_by(|a, b| a.0.total_cmp(&b.0));
        hits.into_iter().map(|(_, feature)| feature).collect()
    }

    pub fn to_feature_collection(&self) -> geojson::FeatureCollection {
        geojson::FeatureCollection {
            bbox: None,
            features: self.features.iter().map(MapFeature::to_feature).collect(),
            foreign_members: None,
        }
    }
}

fn envelope_of(feature: &MapFeature, index: usize) -> Option<FeatureEnvelope> {
    let rect = feature.geometry.bounding_rect()?;
    Some(FeatureEnvelope {
        envelope: AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]),
        index,
    })
}

fn project_feature(
    feature: geojson::Feature,
    source: Projection,
    view: Projection,
) -> Result<MapFeature, MapError> {
    let geojson::Feature {
        id,
        geometry,
        properties,
        ..
    } = feature;

    let geometry = Geometry::<f64>::try_from(geometry.ok_or(MapError::MissingGeometry)?)?;
    let geometry = source.transform_geometry(view, &geometry)?;

    Ok(MapFeature {
        id: id.map(|id| match id {
            geojson::feature::Id::String(s) => s,
            geojson::feature::Id::Number(n) => n.to_string(),
        }),
        geometry,
        properties: properties.unwrap_or_default(),
    })
}

#[test]
fn loads_and_reprojects_stations() {
    let layer = Layer::from_geojson(
        LayerKind::Stations,
        include_str!("../../data/stations.geojson"),
        Projection::Geographic,
        Projection::WebMercator,
    )
    .unwrap();

    assert_eq!(layer.len(), 3);
    let helsinki = &layer.features()[0];
    assert_eq!(helsinki.property("lyhenne").and_then(JsonValue::as_str), Some("HKI"));

    let expected = crate::proj::from_lon_lat(geo::coord! { x: 24.941, y: 60.172 }).unwrap();
    assert!(helsinki.distance_to(expected).unwrap() < 1e-6);
}

#[test]
fn skips_features_without_usable_geometry() {
    let text = r#"{
        "type": "FeatureCollection",
        "features": [
            { "type": "Feature", "geometry": null, "properties": { "nimi": "Tyhjä" } },
            { "type": "Feature", "geometry": { "type": "Point", "coordinates": [24.9, 95.0] }, "properties": {} },
            { "type": "Feature", "geometry": { "type": "Point", "coordinates": [24.9, 60.2] }, "properties": {} }
        ]
    }"#;
    let layer = Layer::from_geojson(
        LayerKind::Stations,
        text,
        Projection::Geographic,
        Projection::WebMercator,
    )
    .unwrap();
    assert_eq!(layer.len(), 1);
}

#[test]
fn rejects_invalid_json() {
    let err = Layer::from_geojson(
        LayerKind::Tracks,
        "{ not json",
        Projection::Geographic,
        Projection::WebMercator,
    )
    .unwrap_err();
    assert!(matches!(err, MapError::GeoJson(_)));
}

#[test]
fn hits_within_tolerance_only() {
    let mut layer = Layer::new(LayerKind::Tracks);
    layer.push(
        MapFeature::new(geo::line_string![(x: 0.0, y: 0.0), (x: 100.0, y: 0.0)])
            .with_property("tyyppi", "raide"),
    );
    layer.push(MapFeature::new(geo::point!(x: 50.0, y: 40.0)).with_property("name", "far"));

    let hits = layer.hits(geo::coord! { x: 50.0, y: 3.0 }, 5.0);
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].property("tyyppi").and_then(JsonValue::as_str), Some("raide"));

    assert!(layer.hits(geo::coord! { x: 50.0, y: 20.0 }, 5.0).is_empty());
    assert_eq!(layer.hits(geo::coord! { x: 50.0, y: 20.0 }, 40.0).len(), 2);
}

#[test]
fn extent_covers_every_feature() {
    let layer = Layer::from_features(
        LayerKind::Tracks,
        vec![
            MapFeature::new(geo::line_string![(x: -10.0, y: 5.0), (x: 20.0, y: 8.0)]),
            MapFeature::new(geo::point!(x: 3.0, y: -7.0)),
        ],
    );
    let extent = layer.extent().unwrap();
    assert_eq!(extent.min(), geo::coord! { x: -10.0, y: -7.0 });
    assert_eq!(extent.max(), geo::coord! { x: 20.0, y: 8.0 });
    assert!(Layer::new(LayerKind::Tracks).extent().is_none());
}
