//! Integration tests for source layers and drivers
//!
//! These tests exercise the in-memory and JSON drivers through the
//! `DataSource` and `FeatureLayer` traits, the way virtual layers use them.

mod fixtures;

use pretty_assertions::assert_eq;
use std::io::Write;
use vlayer_core::{Envelope, Feature, FieldValue};
use vlayer_source::{
    lock, DataSource, Driver, DriverRegistry, FeatureLayer, JsonFileDriver, LayerError,
    MemoryDriver, SourceHandle,
};

fn collect(handle: &SourceHandle) -> Vec<Feature> {
    let mut layer = lock(handle);
    layer.reset_reading();
    let mut out = Vec::new();
    while let Some(feature) = layer.next_feature().unwrap() {
        out.push(feature);
    }
    out
}

// =============================================================================
// JSON file driver
// =============================================================================

#[test]
fn test_json_driver_reads_dataset() {
    let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
    file.write_all(fixtures::CITIES_JSON.as_bytes()).unwrap();
    let path = file.path().to_str().unwrap().to_string();

    let registry = DriverRegistry::default();
    let dataset = registry.open(&path, false).unwrap();
    assert_eq!(dataset.layer_count(), 1);

    let handle = dataset.layer_by_name("CITIES").unwrap();
    let features = collect(&handle);
    assert_eq!(features.len(), 3);
    assert_eq!(features[0].fid(), Some(10));
    assert_eq!(
        features[0].field("population"),
        Some(&FieldValue::Integer(2_100_000))
    );
    assert!(features[2].geometry().is_none());

    let extent = lock(&handle).extent(0).unwrap().unwrap();
    assert_eq!(extent, Envelope::new(2.35, 45.76, 4.83, 48.85));
}

#[test]
fn test_read_only_open_rejects_writes() {
    let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
    file.write_all(fixtures::CITIES_JSON.as_bytes()).unwrap();
    let dataset = JsonFileDriver
        .open(file.path().to_str().unwrap(), false)
        .unwrap();

    let handle = dataset.layer(0).unwrap();
    let mut layer = lock(&handle);
    assert!(!layer.capabilities().sequential_write);
    assert!(matches!(
        layer.delete_feature(10),
        Err(LayerError::WriteRejected(_))
    ));
    assert_eq!(layer.feature_count().unwrap(), 3);
}

#[test]
fn test_missing_file_is_an_error() {
    let registry = DriverRegistry::default();
    assert!(matches!(
        registry.open("/nonexistent/dir/data.json", false),
        Err(LayerError::Io(_))
    ));
    assert!(matches!(
        registry.open("unknown-locator", false),
        Err(LayerError::SourceUnavailable(_))
    ));
}

// =============================================================================
// Memory driver
// =============================================================================

#[test]
fn test_memory_driver_opens_independent_copies() {
    let registry = DriverRegistry::empty()
        .with_driver(MemoryDriver::new().with_dataset("mem:pts", fixtures::points_dataset()));

    let first = registry.open("mem:pts", true).unwrap();
    let second = registry.open("mem:pts", true).unwrap();

    let handle = first.layer(0).unwrap();
    lock(&handle).delete_feature(0).unwrap();
    lock(&handle).set_attribute_filter(Some("id < 5")).unwrap();

    assert_eq!(lock(&handle).feature_count().unwrap(), 4);
    assert_eq!(lock(&second.layer(0).unwrap()).feature_count().unwrap(), 10);
}

// =============================================================================
// SQL result layers
// =============================================================================

#[test]
fn test_execute_sql_projects_and_filters() {
    let dataset = fixtures::points_dataset();
    let handle = dataset
        .execute_sql("SELECT id AS ident, name FROM points WHERE id >= 7")
        .unwrap();

    let schema = lock(&handle).schema();
    assert_eq!(schema.field_names(), vec!["ident", "name"]);
    assert_eq!(schema.geom_fields.len(), 1);

    let features = collect(&handle);
    let idents: Vec<_> = features
        .iter()
        .map(|f| f.field("ident").and_then(FieldValue::as_i64))
        .collect();
    assert_eq!(idents, vec![Some(7), Some(8), Some(9)]);
    assert!(features.iter().all(|f| f.geometry().is_some()));
}

#[test]
fn test_execute_sql_wildcard() {
    let dataset = fixtures::points_dataset();
    let handle = dataset.execute_sql("SELECT * FROM points").unwrap();
    assert_eq!(lock(&handle).feature_count().unwrap(), 10);
    assert_eq!(lock(&handle).schema().fields.len(), 2);
}

#[test]
fn test_execute_sql_errors() {
    let dataset = fixtures::points_dataset();
    assert!(matches!(
        dataset.execute_sql("SELECT * FROM missing"),
        Err(LayerError::SourceUnavailable(_))
    ));
    assert!(matches!(
        dataset.execute_sql("DELETE FROM points"),
        Err(LayerError::Definition(_))
    ));
    assert!(matches!(
        dataset.execute_sql("SELECT nope FROM points"),
        Err(LayerError::Definition(_))
    ));
}
