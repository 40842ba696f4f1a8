use std::{f64::consts::PI, fmt, str::FromStr};

use geo::{Coord, Geometry, MapCoords};
#[cfg(test)]
use geo::line_string;

/// Radius of the sphere used by spherical web mercator.
pub const EARTH_RADIUS: f64 = 6_378_137.0;
/// Half the width of the web mercator world square, in meters.
pub const HALF_SIZE: f64 = PI * EARTH_RADIUS;
/// Latitude at which web mercator `y` reaches `HALF_SIZE`.
pub const MAX_LATITUDE: f64 = 85.051_128_779_806_59;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProjectionError {
    #[error("coordinate is not finite: ({x}, {y})")]
    NotFinite { x: f64, y: f64 },
    #[error("longitude {0} is outside [-180, 180]")]
    Longitude(f64),
    #[error("latitude {0} is outside [-90, 90]")]
    Latitude(f64),
    #[error("unknown projection code `{0}`")]
    UnknownCode(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Projection {
    /// Longitude/latitude in degrees.
    #[default]
    Geographic,
    /// Spherical web mercator in meters.
    WebMercator,
}

impl Projection {
    pub fn code(&self) -> &'static str {
        match self {
            Projection::Geographic => "EPSG:4326",
            Projection::WebMercator => "EPSG:3857",
        }
    }

    pub fn transform(self, to: Projection, coord: Coord<f64>) -> Result<Coord<f64>, ProjectionError> {
        match (self, to) {
            (Projection::Geographic, Projection::WebMercator) => from_lon_lat(coord),
            (Projection::WebMercator, Projection::Geographic) => to_lon_lat(coord),
            _ => finite(coord),
        }
    }

    /// Transforms every coordinate of `geometry`, failing on the first invalid one.
    pub fn transform_geometry(
        self,
        to: Projection,
        geometry: &Geometry<f64>,
    ) -> Result<Geometry<f64>, ProjectionError> {
        geometry.try_map_coords(|coord| self.transform(to, coord))
    }
}

impl fmt::Display for Projection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Projection {
    type Err = ProjectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "EPSG:4326" | "CRS:84" | "WGS84" => Ok(Projection::Geographic),
            "EPSG:3857" | "EPSG:900913" | "EPSG:102100" => Ok(Projection::WebMercator),
            _ => Err(ProjectionError::UnknownCode(s.to_string())),
        }
    }
}

fn finite(coord: Coord<f64>) -> Result<Coord<f64>, ProjectionError> {
    if coord.x.is_finite() && coord.y.is_finite() {
        Ok(coord)
    } else {
        Err(ProjectionError::NotFinite {
            x: coord.x,
            y: coord.y,
        })
    }
}

/// Longitude/latitude (degrees) to web mercator (meters).
///
/// Latitudes beyond [`MAX_LATITUDE`] are clamped to the edge of the world square.
pub fn from_lon_lat(coord: Coord<f64>) -> Result<Coord<f64>, ProjectionError> {
    let Coord { x: lon, y: lat } = finite(coord)?;
    if !(-180.0..=180.0).contains(&lon) {
        return Err(ProjectionError::Longitude(lon));
    }
    if !(-90.0..=90.0).contains(&lat) {
        return Err(ProjectionError::Latitude(lat));
    }

    let x = EARTH_RADIUS * lon.to_radians();
    let y = EARTH_RADIUS * (PI * (lat + 90.0) / 360.0).tan().ln();
    Ok(Coord {
        x,
        y: y.clamp(-HALF_SIZE, HALF_SIZE),
    })
}

/// Web mercator (meters) back to longitude/latitude (degrees).
pub fn to_lon_lat(coord: Coord<f64>) -> Result<Coord<f64>, ProjectionError> {
    let Coord { x, y } = finite(coord)?;
    let lon = (x / EARTH_RADIUS).to_degrees();
    let lat = 360.0 * (y / EARTH_RADIUS).exp().atan() / PI - 90.0;
    Ok(Coord { x: lon, y: lat })
}

#[test]
fn lon_lat_round_trip() {
    let helsinki = geo::coord! { x: 24.9, y: 60.2 };
    let projected = from_lon_lat(helsinki).unwrap();
    assert!((projected.x - 2_771_855.3).abs() < 1.0, "{projected:?}");
    assert!((projected.y - 8_444_400.9).abs() < 1.0, "{projected:?}");

    let back = to_lon_lat(projected).unwrap();
    assert!((back.x - helsinki.x).abs() < 1e-6);
    assert!((back.y - helsinki.y).abs() < 1e-6);
}

#[test]
fn rejects_invalid_coordinates() {
    assert_eq!(
        from_lon_lat(geo::coord! { x: 24.9, y: 91.0 }),
        Err(ProjectionError::Latitude(91.0))
    );
    assert_eq!(
        from_lon_lat(geo::coord! { x: 181.0, y: 0.0 }),
        Err(ProjectionError::Longitude(181.0))
    );
    assert!(matches!(
        from_lon_lat(geo::coord! { x: f64::NAN, y: 0.0 }),
        Err(ProjectionError::NotFinite { .. })
    ));
    assert!(to_lon_lat(geo::coord! { x: f64::INFINITY, y: 0.0 }).is_err());
}

#[test]
fn poles_clamp_to_world_square() {
    let north = from_lon_lat(geo::coord! { x: 0.0, y: 90.0 }).unwrap();
    assert_eq!(north.y, HALF_SIZE);

    let edge = from_lon_lat(geo::coord! { x: 180.0, y: MAX_LATITUDE }).unwrap();
    assert!((edge.x - HALF_SIZE).abs() < 1e-6);
    assert!((edge.y - HALF_SIZE).abs() < 1e-3);
}

#[test]
fn parse_codes() {
    assert_eq!("crs:84".parse::<Projection>().unwrap(), Projection::Geographic);
    assert_eq!("EPSG:3857".parse::<Projection>().unwrap(), Projection::WebMercator);
    assert!("EPSG:3067".parse::<Projection>().is_err());
}

#[test]
fn transform_line_geometry() {
    let line: Geometry<f64> = geo::line_string![(x: 24.9, y: 60.2), (x: 25.0, y: 60.3)].into();
    let projected = Projection::Geographic
        .transform_geometry(Projection::WebMercator, &line)
        .unwrap();
    let back = Projection::WebMercator
        .transform_geometry(Projection::Geographic, &projected)
        .unwrap();

    let (Geometry::LineString(a), Geometry::LineString(b)) = (&line, &back) else {
        panic!("geometry kind changed: {back:?}");
    };
    for (a, b) in a.coords().zip(b.coords()) {
        assert!((a.x - b.x).abs() < 1e-9 && (a.y - b.y).abs() < 1e-9);
    }
}
