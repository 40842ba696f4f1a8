use engine::MapView;
use eyre::WrapErr;
use libmap::{Layer, LayerKind, Projection};

fn is_url(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

/// Reads GeoJSON text from a local file or an http(s) URL.
pub async fn fetch(source: &str) -> eyre::Result<String> {
    if is_url(source) {
        let response = reqwest::get(source)
            .await
            .wrap_err_with(|| format!("requesting {source}"))?
            .error_for_status()?;
        Ok(response.text().await?)
    } else {
        tokio::fs::read_to_string(source)
            .await
            .wrap_err_with(|| format!("reading {source}"))
    }
}

pub async fn load(
    kind: LayerKind,
    source: &str,
    data: Projection,
    view: Projection,
) -> eyre::Result<Layer> {
    let text = fetch(source).await?;
    Layer::from_geojson(kind, &text, data, view)
        .wrap_err_with(|| format!("parsing {} from {source}", kind.name()))
}

/// Loads the station and track layers into `view`.
///
/// A source that cannot be read leaves its layer out; the map keeps working
/// without it.
pub async fn load_static(view: &mut MapView, stations: &str, tracks: &str, data: Projection) {
    let (stations, tracks) = tokio::join!(
        load(LayerKind::Stations, stations, data, view.projection()),
        load(LayerKind::Tracks, tracks, data, view.projection()),
    );
    for layer in [stations, tracks] {
        match layer {
            Ok(layer) => view.set_layer(layer),
            Err(err) => warn!("layer unavailable: {err:#}"),
        }
    }
}

#[test]
fn recognizes_urls() {
    assert!(is_url(crate::config::DEFAULT_STATIONS));
    assert!(!is_url("raiteet.geojson"));
    assert!(!is_url("/srv/data/https.geojson"));
}

#[tokio::test]
async fn missing_sources_leave_layers_out() {
    let mut view = MapView::new(engine::FeatureStore::new().shared(), Default::default());
    load_static(
        &mut view,
        concat!(env!("CARGO_MANIFEST_DIR"), "/../data/stations.geojson"),
        "does-not-exist.geojson",
        Projection::Geographic,
    )
    .await;

    assert_eq!(view.layer(LayerKind::Stations).map(Layer::len), Some(3));
    assert!(view.layer(LayerKind::Tracks).is_none());
}
