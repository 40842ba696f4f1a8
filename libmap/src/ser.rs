use std::{io::Write, path::Path};

use geojson::{Feature, FeatureCollection};

use crate::MapError;

#[derive(Debug)]
pub struct WriteGeojson<W> {
    writer: W,
}

impl<W: Write> WriteGeojson<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn write(&mut self, features: impl IntoIterator<Item = impl Into<Feature>>) -> Result<usize, MapError> {
        let collection = FeatureCollection {
            bbox: None,
            features: features.into_iter().map(Into::into).collect(),
            foreign_members: None,
        };
        self.write_collection(&collection)?;
        Ok(collection.features.len())
    }

    pub fn write_collection(&mut self, collection: &FeatureCollection) -> Result<(), MapError> {
        debug!("writing {} features to geojson", collection.features.len());
        serde_json::to_writer(&mut self.writer, collection)?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// Writes `collection` next to `path` first and renames it into place, so
/// readers never observe a half-written file.
pub fn write_file(path: impl AsRef<Path>, collection: &FeatureCollection) -> Result<(), MapError> {
    let path = path.as_ref();
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");

    let file = std::io::BufWriter::new(std::fs::File::create(&tmp)?);
    WriteGeojson::new(file).write_collection(collection)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[test]
fn writes_feature_collection() {
    use crate::layer::MapFeature;

    let features = vec![
        MapFeature::new(geo::point!(x: 1.0, y: 2.0)).with_property("name", 1),
        MapFeature::new(geo::point!(x: 3.0, y: 4.0)).with_property("name", 2),
    ];

    let mut writer = WriteGeojson::new(Vec::new());
    let written = writer
        .write(features.iter().map(MapFeature::to_feature))
        .unwrap();
    assert_eq!(written, 2);

    let text = String::from_utf8(writer.into_inner()).unwrap();
    let parsed = FeatureCollection::try_from(text.parse::<geojson::GeoJson>().unwrap()).unwrap();
    assert_eq!(parsed.features.len(), 2);
    assert_eq!(
        parsed.features[1].property("name").and_then(|v| v.as_u64()),
        Some(2)
    );
}
