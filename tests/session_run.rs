use std::fs;
use std::path::Path;

use serde_json::{Value, json};
use tempfile::tempdir;

use crop_instances::engineer::DataInstance;
use crop_instances::session::{CLASSES_FILE, NORMALIZING_FILE};
use crop_instances::{ExtractError, ExtractionConfig, ExtractionSession, Split};

const BANDS: usize = 13;

fn write_labels(data: &Path, features: Value) {
    let dir = data.join("processed").join("plant_village_kenya");
    fs::create_dir_all(&dir).unwrap();
    let collection = json!({ "type": "FeatureCollection", "features": features });
    fs::write(dir.join("data.geojson"), collection.to_string()).unwrap();
}

/// 3x3 JSON tile with its north-west corner at (lon, lat).
fn write_tile(data: &Path, name: &str, lon: f64, lat: f64, timesteps: usize) {
    let dir = data.join("raw").join("earth_engine_plant_village_kenya");
    fs::create_dir_all(&dir).unwrap();
    let x: Vec<f64> = (0..3).map(|i| lon + 0.01 * i as f64).collect();
    let y: Vec<f64> = (0..3).map(|i| lat - 0.01 * i as f64).collect();
    let series: Vec<f64> = (0..timesteps * BANDS)
        .map(|k| 0.1 + 0.01 * (k % BANDS) as f64)
        .collect();
    let values = vec![vec![series; 3]; 3];
    let tile = json!({ "x": x, "y": y, "values": values });
    fs::write(dir.join(name), tile.to_string()).unwrap();
}

fn feature(lat: f64, lon: f64, crop: Option<&str>) -> Value {
    json!({ "type": "Feature", "properties": { "lat": lat, "lon": lon, "crop_type": crop } })
}

fn train_only() -> ExtractionConfig {
    ExtractionConfig {
        val_set_size: 0.0,
        test_set_size: 0.0,
        ..Default::default()
    }
}

#[test]
fn run_writes_instances_and_statistics() {
    let dir = tempdir().unwrap();
    let data = dir.path();
    write_labels(
        data,
        json!([
            feature(0.49, 34.51, Some("maize")),
            feature(1.49, 35.51, None),
            feature(2.49, 36.51, Some("tea")),
        ]),
    );
    write_tile(data, "a.json", 34.50, 0.50, 4);
    write_tile(data, "b.json", 35.50, 1.50, 4);
    write_tile(data, "c.json", 36.50, 2.50, 4);
    write_tile(data, "d.json", 50.00, 9.00, 4);
    fs::write(
        data.join("raw/earth_engine_plant_village_kenya/broken.json"),
        "not json",
    )
    .unwrap();

    let mut session = ExtractionSession::new(data, train_only()).unwrap();
    let summary = session.run().unwrap();
    let savedir = session.savedir().to_path_buf();
    session.finish().unwrap();

    assert_eq!(summary.tiles, 4);
    assert_eq!(summary.instances.get(&Split::Train), Some(&2));
    assert_eq!(summary.failed_tiles.len(), 1);
    assert_eq!(summary.skipped.values().sum::<usize>(), 2);

    let classes: Value =
        serde_json::from_str(&fs::read_to_string(savedir.join(CLASSES_FILE)).unwrap()).unwrap();
    assert_eq!(classes, json!({ "maize": 0, "tea": 1 }));

    let instance: DataInstance = serde_json::from_str(
        &fs::read_to_string(savedir.join("training").join("c.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(instance.crop_label, "tea");
    assert_eq!(instance.crop_int, 1);
    assert_eq!(instance.labelled_array.dim(), (4, BANDS + 1));
    assert!(!savedir.join("training").join("b.json").exists());

    let dicts: Value =
        serde_json::from_str(&fs::read_to_string(savedir.join(NORMALIZING_FILE)).unwrap())
            .unwrap();
    assert_eq!(dicts["labelled"]["mean"].as_array().unwrap().len(), BANDS + 1);
    assert_eq!(dicts["surrounding"]["std"].as_array().unwrap().len(), BANDS + 1);
}

#[test]
fn autoencoder_batches_are_written_for_unlabelled_tiles() {
    let dir = tempdir().unwrap();
    let data = dir.path();
    write_labels(data, json!([feature(0.49, 34.51, Some("maize"))]));
    write_tile(data, "far.json", 50.0, 9.0, 2);

    let config = ExtractionConfig {
        return_autoencoder_instances: true,
        autoencoder_instances_per_label: 5,
        ..train_only()
    };
    let mut session = ExtractionSession::new(data, config).unwrap();
    let summary = session.run().unwrap();
    assert_eq!(summary.total_instances(), 0);
    assert_eq!(summary.autoencoder_batches, 1);

    let batch: ndarray::Array3<f64> = serde_json::from_str(
        &fs::read_to_string(session.savedir().join("training").join("far_autoencoder.json"))
            .unwrap(),
    )
    .unwrap();
    assert_eq!(batch.dim(), (5, 2, BANDS + 1));
    // five unlabelled series of two timesteps each
    assert_eq!(session.stats().labelled.instances(), 5);
    assert_eq!(session.stats().labelled.count(), 10);
    assert_eq!(session.stats().surrounding.count(), 0);
}

#[test]
fn band_layout_outside_tile_fails_before_any_output() {
    let dir = tempdir().unwrap();
    let data = dir.path();
    write_labels(data, json!([feature(0.49, 34.51, Some("maize"))]));
    write_tile(data, "a.json", 34.50, 0.50, 2);

    let config = ExtractionConfig {
        n_bands: 5,
        ..train_only()
    };
    match ExtractionSession::new(data, config) {
        Err(ExtractError::Config(message)) => assert!(message.contains("nir"), "{message}"),
        Err(other) => panic!("unexpected error {other}"),
        Ok(_) => panic!("session opened with nir outside 5 bands"),
    }
    assert!(!data.join("features").exists());
}

#[test]
fn missing_label_file_aborts_session() {
    let dir = tempdir().unwrap();
    match ExtractionSession::new(dir.path(), ExtractionConfig::default()) {
        Err(ExtractError::MissingLabels(path)) => assert!(path.ends_with("data.geojson")),
        Err(other) => panic!("unexpected error {other}"),
        Ok(_) => panic!("session opened without labels"),
    }
}

#[test]
fn test_split_tiles_leave_statistics_empty() {
    let dir = tempdir().unwrap();
    let data = dir.path();
    write_labels(data, json!([feature(0.49, 34.51, Some("maize"))]));
    write_tile(data, "a.json", 34.50, 0.50, 3);

    let config = ExtractionConfig {
        val_set_size: 0.0,
        test_set_size: 1.0,
        ..Default::default()
    };
    let mut session = ExtractionSession::new(data, config).unwrap();
    let summary = session.run().unwrap();
    assert_eq!(summary.instances.get(&Split::Test), Some(&1));
    assert_eq!(session.stats().labelled.count(), 0);
    assert!(session.savedir().join("testing").join("a.json").exists());

    let savedir = session.savedir().to_path_buf();
    session.finish().unwrap();
    let dicts: Value =
        serde_json::from_str(&fs::read_to_string(savedir.join(NORMALIZING_FILE)).unwrap())
            .unwrap();
    assert!(dicts["labelled"].is_null());
}
