use geo::{Coord, EuclideanDistance, Rect};
use libmap::{
    proj::HALF_SIZE, Layer, LayerKind, MapFeature, Popup, Projection, ProjectionError,
};

use crate::{
    store::{SharedStore, StoreError},
    update::GeoPosition,
};

pub const TILE_SIZE: f64 = 256.0;
/// Meters per pixel at zoom 0.
pub const MAX_RESOLUTION: f64 = 2.0 * HALF_SIZE / TILE_SIZE;
pub const MAX_ZOOM: f64 = 28.0;
pub const LOCATE_ZOOM: f64 = 14.0;
pub const LOCATION_NAME: &str = "Sinä";

#[derive(Debug, thiserror::Error)]
pub enum ViewError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Projection(#[from] ProjectionError),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub center: Coord<f64>,
    pub zoom: f64,
    /// Width and height in pixels.
    pub size: [f64; 2],
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            center: geo::coord! { x: 0.0, y: 0.0 },
            zoom: 2.0,
            size: [800.0, 600.0],
        }
    }
}

impl Viewport {
    pub fn with_size(width: f64, height: f64) -> Self {
        Self {
            size: [width, height],
            ..Default::default()
        }
    }

    /// Map units per pixel.
    pub fn resolution(&self) -> f64 {
        MAX_RESOLUTION / self.zoom.exp2()
    }

    pub fn set_resolution(&mut self, resolution: f64) {
        self.zoom = if resolution > 0.0 {
            (MAX_RESOLUTION / resolution).log2().clamp(0.0, MAX_ZOOM)
        } else {
            MAX_ZOOM
        };
    }

    /// Centers on `extent` at the largest zoom that still shows all of it.
    pub fn fit(&mut self, extent: Rect<f64>) {
        let [width, height] = self.size;
        self.center = extent.center();
        self.set_resolution(f64::max(extent.width() / width, extent.height() / height));
    }

    pub fn coordinate_from_pixel(&self, [px, py]: [f64; 2]) -> Coord<f64> {
        let resolution = self.resolution();
        geo::coord! {
            x: self.center.x + (px - self.size[0] / 2.0) * resolution,
            y: self.center.y - (py - self.size[1] / 2.0) * resolution,
        }
    }

    pub fn pixel_from_coordinate(&self, coord: Coord<f64>) -> [f64; 2] {
        let resolution = self.resolution();
        [
            (coord.x - self.center.x) / resolution + self.size[0] / 2.0,
            (self.center.y - coord.y) / resolution + self.size[1] / 2.0,
        ]
    }

    pub fn extent(&self) -> Rect<f64> {
        Rect::new(
            self.coordinate_from_pixel([0.0, self.size[1]]),
            self.coordinate_from_pixel([self.size[0], 0.0]),
        )
    }
}

/// Headless map: static layers, the live train store and a viewport over them.
pub struct MapView {
    store: SharedStore,
    projection: Projection,
    viewport: Viewport,
    stations: Option<Layer>,
    tracks: Option<Layer>,
    location: Layer,
}

impl MapView {
    pub fn new(store: SharedStore, viewport: Viewport) -> Self {
        Self {
            store,
            projection: Projection::WebMercator,
            viewport,
            stations: None,
            tracks: None,
            location: Layer::new(LayerKind::Location),
        }
    }

    pub fn projection(&self) -> Projection {
        self.projection
    }

    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    pub fn viewport_mut(&mut self) -> &mut Viewport {
        &mut self.viewport
    }

    pub fn layer(&self, kind: LayerKind) -> Option<&Layer> {
        match kind {
            LayerKind::Stations => self.stations.as_ref(),
            LayerKind::Tracks => self.tracks.as_ref(),
            LayerKind::Location => Some(&self.location),
            LayerKind::Trains => None,
        }
    }

    /// Installs a loaded static layer. A track layer also fits the view to its extent.
    pub fn set_layer(&mut self, layer: Layer) {
        match layer.kind() {
            LayerKind::Stations => self.stations = Some(layer),
            LayerKind::Tracks => {
                if let Some(extent) = layer.extent() {
                    self.viewport.fit(extent);
                    debug!(center = ?self.viewport.center, zoom = self.viewport.zoom, "fitted view to tracks");
                }
                self.tracks = Some(layer);
            }
            LayerKind::Location => self.location = layer,
            LayerKind::Trains => warn!("train features come from the feature store, ignoring layer"),
        }
    }

    /// Centers the view on the user position and marks it on the location layer.
    pub fn locate(&mut self, position: GeoPosition) -> Result<Coord<f64>, ProjectionError> {
        let center = Projection::Geographic.transform(self.projection, position.coord())?;
        self.viewport.center = center;
        self.viewport.zoom = LOCATE_ZOOM;

        self.location.clear();
        self.location
            .push(MapFeature::new(geo::Point::from(center)).with_property("name", LOCATION_NAME));
        info!(longitude = position.longitude, latitude = position.latitude, "centered on location");
        Ok(center)
    }

    pub fn train_count(&self) -> Result<usize, StoreError> {
        Ok(self.store.read()?.len())
    }

    /// Lists the inspected properties of every feature under `coord`, topmost layer first.
    pub fn inspect(&self, coord: Coord<f64>) -> Result<Popup, StoreError> {
        let resolution = self.viewport.resolution();
        let mut popup = Popup::new(coord);

        for feature in self
            .location
            .hits(coord, LayerKind::Location.hit_radius_px() * resolution)
        {
            popup.push_feature(feature);
        }

        let tolerance = LayerKind::Trains.hit_radius_px() * resolution;
        let point = geo::Point::from(coord);
        let store = self.store.read()?;
        let mut trains: Vec<_> = store
            .iter()
            .map(|marker| (marker.position.euclidean_distance(&point), marker))
            .filter(|(distance, _)| *distance <= tolerance)
            .collect();
        trains.sort_by(|a, b| a.0.total_cmp(&b.0));
        for (_, marker) in trains {
            popup.push_feature(&marker.to_map_feature());
        }
        drop(store);

        for layer in [&self.tracks, &self.stations].into_iter().flatten() {
            for feature in layer.hits(coord, layer.kind().hit_radius_px() * resolution) {
                popup.push_feature(feature);
            }
        }

        Ok(popup)
    }

    pub fn inspect_pixel(&self, pixel: [f64; 2]) -> Result<Popup, StoreError> {
        self.inspect(self.viewport.coordinate_from_pixel(pixel))
    }

    /// Current train features, with geometry in `output`.
    pub fn snapshot(&self, output: Projection) -> Result<geojson::FeatureCollection, ViewError> {
        Ok(self
            .store
            .read()?
            .to_feature_collection(self.projection, output)?)
    }
}

#[cfg(test)]
fn project(lon: f64, lat: f64) -> Coord<f64> {
    libmap::proj::from_lon_lat(geo::coord! { x: lon, y: lat }).unwrap()
}

#[cfg(test)]
fn track_layer() -> Layer {
    Layer::from_geojson(
        LayerKind::Tracks,
        include_str!("../../data/tracks.geojson"),
        Projection::Geographic,
        Projection::WebMercator,
    )
    .unwrap()
}

#[test]
fn fits_view_to_track_extent() {
    use crate::store::FeatureStore;

    let mut view = MapView::new(FeatureStore::new().shared(), Viewport::with_size(800.0, 600.0));
    let tracks = track_layer();
    let extent = tracks.extent().unwrap();
    view.set_layer(tracks);

    let viewport = view.viewport();
    assert_eq!(viewport.center, extent.center());
    for corner in [extent.min(), extent.max()] {
        let [x, y] = viewport.pixel_from_coordinate(corner);
        assert!((-1e-6..=800.0 + 1e-6).contains(&x), "x = {x}");
        assert!((-1e-6..=600.0 + 1e-6).contains(&y), "y = {y}");
    }

    // the limiting dimension fills the viewport exactly
    let visible = viewport.extent();
    let filled = (visible.width() - extent.width()).abs() < 1e-3
        || (visible.height() - extent.height()).abs() < 1e-3;
    assert!(filled, "{visible:?} vs {extent:?}");
}

#[test]
fn pixel_coordinate_round_trip() {
    let viewport = Viewport {
        center: project(24.9, 60.2),
        zoom: 10.5,
        size: [640.0, 480.0],
    };
    let coord = viewport.coordinate_from_pixel([100.0, 400.0]);
    let [x, y] = viewport.pixel_from_coordinate(coord);
    assert!((x - 100.0).abs() < 1e-6 && (y - 400.0).abs() < 1e-6);
    assert_eq!(viewport.coordinate_from_pixel([320.0, 240.0]), viewport.center);

    // screen y grows downwards
    assert!(viewport.coordinate_from_pixel([320.0, 0.0]).y > viewport.center.y);
}

#[test]
fn resolution_follows_zoom() {
    let mut viewport = Viewport::default();
    viewport.zoom = 0.0;
    assert!((viewport.resolution() - 156_543.033_928).abs() < 1e-3);

    viewport.set_resolution(MAX_RESOLUTION / 8.0);
    assert!((viewport.zoom - 3.0).abs() < 1e-9);

    viewport.set_resolution(0.0);
    assert_eq!(viewport.zoom, MAX_ZOOM);
    viewport.set_resolution(MAX_RESOLUTION * 4.0);
    assert_eq!(viewport.zoom, 0.0);
}

#[test]
fn locate_centers_and_marks_position() {
    use crate::store::FeatureStore;

    let mut view = MapView::new(FeatureStore::new().shared(), Viewport::default());
    view.locate(GeoPosition::new(25.0, 60.3).unwrap()).unwrap();
    let center = view.locate(GeoPosition::new(24.9, 60.2).unwrap()).unwrap();

    assert_eq!(center, project(24.9, 60.2));
    assert_eq!(view.viewport().center, center);
    assert_eq!(view.viewport().zoom, LOCATE_ZOOM);
    assert_eq!(view.layer(LayerKind::Location).unwrap().len(), 1);

    let popup = view.inspect_pixel([400.0, 300.0]).unwrap();
    assert_eq!(popup.get("name").collect::<Vec<_>>(), [LOCATION_NAME]);
}

#[test]
fn inspects_top_layer_first() {
    use crate::{reconcile::Reconciler, store::FeatureStore, update::PositionUpdate};

    let store = FeatureStore::new().shared();
    let reconciler = Reconciler::new(store.clone());
    reconciler
        .reconcile(&PositionUpdate::new(8, 24.941, 60.172, 45.0))
        .unwrap();
    reconciler
        .reconcile(&PositionUpdate::new(165, 23.773, 61.498, 12.0))
        .unwrap();

    let mut view = MapView::new(store, Viewport::default());
    view.set_layer(
        Layer::from_geojson(
            LayerKind::Stations,
            include_str!("../../data/stations.geojson"),
            Projection::Geographic,
            Projection::WebMercator,
        )
        .unwrap(),
    );
    view.set_layer(track_layer());
    view.viewport_mut().center = project(24.941, 60.172);
    view.viewport_mut().zoom = 14.0;

    let popup = view.inspect(project(24.941, 60.172)).unwrap();
    let keys: Vec<_> = popup.entries.iter().map(|(k, _)| k.as_str()).collect();
    assert_eq!(keys[..2], ["name", "speed"]);
    assert_eq!(popup.get("name").collect::<Vec<_>>(), ["8"]);
    assert_eq!(popup.get("tyyppi").collect::<Vec<_>>(), ["raide", "liikennepaikka"]);
    assert_eq!(popup.get("nimi").collect::<Vec<_>>(), ["Helsinki asema"]);
    assert_eq!(popup.get("tunniste").count(), 0);

    // far from everything
    assert!(view.inspect(project(27.0, 62.0)).unwrap().is_empty());
    assert_eq!(view.train_count().unwrap(), 2);
}

#[test]
fn snapshot_in_geographic_coordinates() {
    use crate::{reconcile::Reconciler, store::FeatureStore, update::PositionUpdate};

    let store = FeatureStore::new().shared();
    Reconciler::new(store.clone())
        .reconcile(&PositionUpdate::new(8, 24.9, 60.2, 45.0))
        .unwrap();
    let view = MapView::new(store, Viewport::default());

    let geographic = view.snapshot(Projection::Geographic).unwrap();
    let projected = view.snapshot(Projection::WebMercator).unwrap();
    let coords = |collection: &geojson::FeatureCollection| match collection.features[0]
        .geometry
        .as_ref()
        .map(|g| g.value.clone())
    {
        Some(geojson::Value::Point(coords)) => coords,
        other => panic!("unexpected geometry {other:?}"),
    };

    let lon_lat = coords(&geographic);
    assert!((lon_lat[0] - 24.9).abs() < 1e-6 && (lon_lat[1] - 60.2).abs() < 1e-6);
    let meters = coords(&projected);
    let expected = project(24.9, 60.2);
    assert!((meters[0] - expected.x).abs() < 1e-6 && (meters[1] - expected.y).abs() < 1e-6);
}
