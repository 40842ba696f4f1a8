#[macro_use]
extern crate tracing;

pub mod inspect;
pub mod layer;
pub mod proj;
pub mod ser;

pub use inspect::Popup;
pub use layer::{Layer, LayerKind, MapFeature};
pub use proj::{Projection, ProjectionError};

#[derive(Debug, thiserror::Error)]
pub enum MapError {
    #[error("invalid geojson: {0}")]
    GeoJson(#[from] geojson::Error),
    #[error("feature has no geometry")]
    MissingGeometry,
    #[error(transparent)]
    Projection(#[from] ProjectionError),
    #[error("could not write geojson: {0}")]
    Write(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
