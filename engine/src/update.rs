use std::fmt;

use geo::Coord;
use libmap::ProjectionError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrainNumber(pub u32);

impl fmt::Display for TrainNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for TrainNumber {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// Validated longitude/latitude pair, in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPosition {
    pub longitude: f64,
    pub latitude: f64,
}

impl GeoPosition {
    pub fn new(longitude: f64, latitude: f64) -> Result<Self, ProjectionError> {
        if !longitude.is_finite() || !latitude.is_finite() {
            return Err(ProjectionError::NotFinite {
                x: longitude,
                y: latitude,
            });
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(ProjectionError::Longitude(longitude));
        }
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(ProjectionError::Latitude(latitude));
        }
        Ok(Self {
            longitude,
            latitude,
        })
    }

    pub fn coord(&self) -> Coord<f64> {
        geo::coord! { x: self.longitude, y: self.latitude }
    }
}

impl std::str::FromStr for GeoPosition {
    type Err = UpdateError;

    /// Parses `lon,lat`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (lon, lat) = s
            .split_once(',')
            .ok_or_else(|| UpdateError::Position(s.to_string()))?;
        let parse = |v: &str| {
            v.trim()
                .parse::<f64>()
                .map_err(|_| UpdateError::Position(s.to_string()))
        };
        Ok(GeoPosition::new(parse(lon)?, parse(lat)?)?)
    }
}

/// Point geometry as it appears on the wire: `{"type": "Point", "coordinates": [lon, lat]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub coordinates: Vec<f64>,
}

impl Location {
    pub fn point(longitude: f64, latitude: f64) -> Self {
        Self {
            kind: Some("Point".to_string()),
            coordinates: vec![longitude, latitude],
        }
    }

    pub fn position(&self) -> Result<GeoPosition, UpdateError> {
        match self.coordinates.as_slice() {
            [longitude, latitude, ..] => Ok(GeoPosition::new(*longitude, *latitude)?),
            other => Err(UpdateError::Coordinates(other.len())),
        }
    }
}

/// One train-location message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionUpdate {
    pub train_number: TrainNumber,
    /// Absent locations are let through parsing and rejected when reconciled.
    #[serde(default)]
    pub location: Option<Location>,
    pub speed: f64,
}

impl PositionUpdate {
    pub fn new(train_number: u32, longitude: f64, latitude: f64, speed: f64) -> Self {
        Self {
            train_number: TrainNumber(train_number),
            location: Some(Location::point(longitude, latitude)),
            speed,
        }
    }

    pub fn from_payload(payload: &[u8]) -> Result<Self, UpdateError> {
        let text = std::str::from_utf8(payload)?;
        Ok(serde_json::from_str(text)?)
    }

    pub fn position(&self) -> Result<GeoPosition, UpdateError> {
        self.location
            .as_ref()
            .ok_or(UpdateError::MissingLocation)?
            .position()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    #[error("payload is not utf-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("payload is not a position update: {0}")]
    Json(#[from] serde_json::Error),
    #[error("update has no location")]
    MissingLocation,
    #[error("location needs longitude and latitude, got {0} coordinates")]
    Coordinates(usize),
    #[error(transparent)]
    Projection(#[from] ProjectionError),
    #[error("expected `lon,lat`, got `{0}`")]
    Position(String),
}

#[test]
fn parses_digitraffic_payload() {
    let payload = br#"{"trainNumber":8,"departureDate":"2023-05-04","timestamp":"2023-05-04T06:00:05.000Z","location":{"type":"Point","coordinates":[24.937,60.185]},"speed":45,"accuracy":5}"#;
    let update = PositionUpdate::from_payload(payload).unwrap();

    assert_eq!(update.train_number, TrainNumber(8));
    assert_eq!(update.speed, 45.0);
    let position = update.position().unwrap();
    assert_eq!(position.longitude, 24.937);
    assert_eq!(position.latitude, 60.185);
}

#[test]
fn missing_location_parses_but_has_no_position() {
    let update = PositionUpdate::from_payload(br#"{"trainNumber":171,"speed":80}"#).unwrap();
    assert!(update.location.is_none());
    assert!(matches!(update.position(), Err(UpdateError::MissingLocation)));
}

#[test]
fn malformed_payloads() {
    assert!(matches!(
        PositionUpdate::from_payload(br#"{"trainNumber":"oops"}"#),
        Err(UpdateError::Json(_))
    ));
    assert!(matches!(
        PositionUpdate::from_payload(&[0xff, 0xfe]),
        Err(UpdateError::Utf8(_))
    ));

    let short = PositionUpdate::from_payload(
        br#"{"trainNumber":1,"location":{"type":"Point","coordinates":[24.9]},"speed":1}"#,
    )
    .unwrap();
    assert!(matches!(short.position(), Err(UpdateError::Coordinates(1))));
}

#[test]
fn parse_lon_lat_argument() {
    let position: GeoPosition = " 24.9, 60.2".parse().unwrap();
    assert_eq!(position, GeoPosition::new(24.9, 60.2).unwrap());
    assert!("24.9".parse::<GeoPosition>().is_err());
    assert!("24.9,x".parse::<GeoPosition>().is_err());
    assert!(matches!(
        "24.9,100".parse::<GeoPosition>(),
        Err(UpdateError::Projection(ProjectionError::Latitude(_)))
    ));
}
