use std::fmt;

use geo::Coord;
use geojson::JsonValue;

use crate::layer::MapFeature;

/// Property keys shown when a feature is inspected, everything else is hidden.
pub const INSPECTED_KEYS: [&str; 5] = ["nimi", "tyyppi", "lyhenne", "name", "speed"];

#[derive(Debug, Clone, PartialEq)]
pub struct Popup {
    pub coordinate: Coord<f64>,
    pub entries: Vec<(String, String)>,
}

impl Popup {
    pub fn new(coordinate: Coord<f64>) -> Self {
        Self {
            coordinate,
            entries: vec![],
        }
    }

    /// Appends the inspected properties of `feature`, in the feature's property order.
    pub fn push_feature(&mut self, feature: &MapFeature) {
        self.entries.extend(
            feature
                .properties
                .iter()
                .filter(|(key, _)| INSPECTED_KEYS.contains(&key.as_str()))
                .map(|(key, value)| (key.clone(), display_value(value))),
        );
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> impl Iterator<Item = &str> + '_ {
        let key = key.to_string();
        self.entries
            .iter()
            .filter(move |(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }
}

fn display_value(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Null => "null".to_string(),
        other => other.to_string(),
    }
}

impl fmt::Display for Popup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Tiedot:")?;
        for (key, value) in &self.entries {
            writeln!(f, "{key}: {value}")?;
        }
        Ok(())
    }
}

#[test]
fn only_inspected_keys_are_listed() {
    let station = MapFeature::new(geo::point!(x: 0.0, y: 0.0))
        .with_property("nimi", "Helsinki asema")
        .with_property("lyhenne", "HKI")
        .with_property("uicKoodi", 1)
        .with_property("tunniste", "1.2.246.586.1.39.119345");
    let train = MapFeature::new(geo::point!(x: 0.0, y: 0.0))
        .with_property("name", 8)
        .with_property("speed", 42.5);

    let mut popup = Popup::new(geo::coord! { x: 0.0, y: 0.0 });
    popup.push_feature(&train);
    popup.push_feature(&station);

    assert_eq!(popup.entries.len(), 4);
    assert_eq!(popup.get("name").collect::<Vec<_>>(), ["8"]);
    assert_eq!(popup.get("speed").collect::<Vec<_>>(), ["42.5"]);
    assert_eq!(popup.get("uicKoodi").count(), 0);

    let text = popup.to_string();
    assert!(text.starts_with("Tiedot:\n"));
    assert!(text.contains("nimi: Helsinki asema\n"));
    assert!(text.contains("lyhenne: HKI\n"));
}

#[test]
fn keeps_property_insertion_order() {
    let station = MapFeature::new(geo::point!(x: 0.0, y: 0.0))
        .with_property("tyyppi", "liikennepaikka")
        .with_property("nimi", "Pasila")
        .with_property("uicKoodi", 10)
        .with_property("lyhenne", "PSL");

    let mut popup = Popup::new(geo::coord! { x: 0.0, y: 0.0 });
    popup.push_feature(&station);

    let keys: Vec<_> = popup.entries.iter().map(|(k, _)| k.as_str()).collect();
    assert_eq!(keys, ["tyyppi", "nimi", "lyhenne"]);
    assert_eq!(
        popup.to_string(),
        "Tiedot:\ntyyppi: liikennepaikka\nnimi: Pasila\nlyhenne: PSL\n"
    );
    assert_eq!(Popup::new(geo::coord! { x: 0.0, y: 0.0 }).to_string(), "Tiedot:\n");
}
