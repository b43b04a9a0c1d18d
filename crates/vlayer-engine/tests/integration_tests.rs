//! Integration tests for the virtual layer engine
//!
//! Layers are opened from definitions over the in-memory fixture dataset,
//! or from definition files written to a temporary directory.

mod fixtures;

use fixtures::{collect, direct, engine, open, open_layer};
use pretty_assertions::assert_eq;
use vlayer_core::{
    Coord, DiagnosticCode, Envelope, Feature, FieldType, GeometryType, Geometry, SpatialRef,
};
use vlayer_definition::{
    FieldSpec, FieldStrategy, GeometryEncoding, GeometryFieldSpec, LayerNode, RegionSpec,
    SourceDescriptor, UnionDefinition, WarpedDefinition,
};
use vlayer_engine::{Engine, OpenOptions};
use vlayer_source::{lock, DataSource, FeatureLayer, LayerError, MemoryDriver, SourceHandle};

fn count(handle: &SourceHandle) -> u64 {
    lock(handle).feature_count().unwrap()
}

fn codes(handle: &SourceHandle, code: DiagnosticCode) -> usize {
    lock(handle)
        .take_diagnostics()
        .iter()
        .filter(|d| d.code == code)
        .count()
}

fn bbox(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Option<Geometry> {
    Some(Envelope::new(min_x, min_y, max_x, max_y).to_polygon())
}

fn union_of_a_and_b() -> UnionDefinition {
    UnionDefinition::new(
        "ab",
        vec![
            LayerNode::Direct(direct("a", "a")),
            LayerNode::Direct(direct("b", "b")),
        ],
    )
}

fn warped(name: &str, inner: LayerNode, target: &str) -> LayerNode {
    LayerNode::Warped(WarpedDefinition {
        name: Some(name.to_string()),
        layer: Box::new(inner),
        target_srs: Some(target.to_string()),
        source_srs: None,
        warped_field: None,
        extent: None,
    })
}

// =============================================================================
// Direct layers
// =============================================================================

#[test]
fn test_direct_layer_passes_features_through() {
    let handle = open_layer(
        &engine(),
        LayerNode::Direct(direct("a", "a")),
        OpenOptions::read_only(),
    );
    let schema = lock(&handle).schema();
    assert_eq!(schema.name, "a");
    assert_eq!(schema.field_names(), vec!["id1", "id2"]);
    assert_eq!(schema.geom_fields[0].srs, Some(SpatialRef::WGS84));

    let features = collect(&handle);
    assert_eq!(features.len(), 25);
    assert_eq!(features[3].fid(), Some(3));
    assert_eq!(features[3].field("id2").and_then(|v| v.as_i64()), Some(30));
    assert_eq!(
        lock(&handle).extent(0).unwrap(),
        Some(Envelope::new(0.0, 0.0, 24.0, 24.0))
    );
}

#[test]
fn test_fid_column_names_features() {
    let mut def = direct("b", "b");
    def.fid = Some("id2".into());
    def.fields = Some(vec![FieldSpec::new("id3")]);
    let handle = open_layer(&engine(), LayerNode::Direct(def), OpenOptions::read_only());

    let features = collect(&handle);
    assert_eq!(features[7].fid(), Some(7));

    let found = lock(&handle).feature(12).unwrap().unwrap();
    assert_eq!(found.field("id3").and_then(|v| v.as_str()), Some("b12"));

    lock(&handle).set_attribute_filter(Some("fid < 5")).unwrap();
    assert_eq!(count(&handle), 5);
}

#[test]
fn test_explicit_fields_rename_and_retype() {
    let mut def = direct("a", "a");
    def.fields = Some(vec![
        FieldSpec::new("key").with_src("id1"),
        FieldSpec::new("id2").with_type(FieldType::String),
    ]);
    let handle = open_layer(&engine(), LayerNode::Direct(def), OpenOptions::read_only());

    let features = collect(&handle);
    assert_eq!(features[2].field("key").and_then(|v| v.as_i64()), Some(2));
    assert_eq!(features[2].field("id2").and_then(|v| v.as_str()), Some("20"));

    // a renamed column cannot be handed to the source
    lock(&handle).set_attribute_filter(Some("key >= 20")).unwrap();
    assert_eq!(count(&handle), 5);
    assert!(!lock(&handle).capabilities().fast_feature_count);
}

#[test]
fn test_source_columns_differing_only_in_case() {
    let schema = std::sync::Arc::new(
        vlayer_core::LayerSchema::new("case")
            .with_field(vlayer_core::FieldDefn::new("id", FieldType::String))
            .with_field(vlayer_core::FieldDefn::new("ID", FieldType::String)),
    );
    let layer = vlayer_source::MemoryLayer::new(schema.clone()).with_features([Feature::new(schema)
        .with_fid(0)
        .with_field("id", "foo")
        .with_field("ID", "bar")]);
    let engine = Engine::default().with_driver(
        MemoryDriver::new().with_dataset("mem", vlayer_source::MemoryDataset::new("mem").with_layer(layer)),
    );

    let mut def = direct("case", "case");
    def.fields = Some(vec![
        FieldSpec::new("id").with_src("id"),
        FieldSpec::new("id_from_uc").with_src("ID"),
    ]);
    let handle = open_layer(&engine, LayerNode::Direct(def), OpenOptions::read_only());

    let features = collect(&handle);
    assert_eq!(features.len(), 1);
    assert_eq!(features[0].field("id").and_then(|v| v.as_str()), Some("foo"));
    assert_eq!(features[0].field("id_from_uc").and_then(|v| v.as_str()), Some("bar"));
}

#[test]
fn test_attribute_filter_is_delegated() {
    let layer = fixtures::layer_a();
    let received = layer.received_filters();
    let engine = Engine::default().with_driver(
        MemoryDriver::new().with_dataset("mem", vlayer_source::MemoryDataset::new("mem").with_layer(layer)),
    );
    let handle = open_layer(&engine, LayerNode::Direct(direct("a", "a")), OpenOptions::read_only());

    lock(&handle).set_attribute_filter(Some("id1 > 20")).unwrap();
    assert_eq!(count(&handle), 4);
    assert_eq!(
        received.lock().unwrap().current_attribute(),
        Some("id1 > 20")
    );
    assert!(lock(&handle).capabilities().fast_feature_count);
}

#[test]
fn test_static_feature_count() {
    let mut def = direct("a", "a");
    def.feature_count = Some(99);
    let handle = open_layer(&engine(), LayerNode::Direct(def), OpenOptions::read_only());
    assert_eq!(count(&handle), 99);

    lock(&handle).set_attribute_filter(Some("id1 < 3")).unwrap();
    assert_eq!(count(&handle), 3);
}

#[test]
fn test_sql_source() {
    let def = vlayer_definition::LayerDefinition::new(
        "big_cities",
        SourceDescriptor {
            sql: Some("SELECT name FROM cities WHERE population > 800000".into()),
            ..SourceDescriptor::new("mem")
        },
    );
    let handle = open_layer(&engine(), LayerNode::Direct(def), OpenOptions::read_only());
    let features = collect(&handle);
    let names: Vec<&str> = features
        .iter()
        .filter_map(|f| f.field("name").and_then(|v| v.as_str()))
        .collect();
    assert_eq!(names, vec!["Paris", "Marseille"]);
}

// =============================================================================
// Geometry derivation
// =============================================================================

#[test]
fn test_encoded_geometries_tolerate_bad_values() {
    let mut def = direct("encoded", "encoded");
    def.geometry_fields = Some(vec![
        GeometryFieldSpec::encoded("from_wkt", GeometryEncoding::Wkt, "wkt"),
        GeometryFieldSpec::encoded("from_wkb", GeometryEncoding::Wkb, "wkb"),
    ]);
    let handle = open_layer(&engine(), LayerNode::Direct(def), OpenOptions::read_only());

    let schema = lock(&handle).schema();
    assert_eq!(schema.field_names(), vec!["id"]);

    let features = collect(&handle);
    assert_eq!(features.len(), 4);
    let point = Geometry::Point(Coord::xy(1.0, 2.0));
    assert_eq!(features[0].geometry_at(0), Some(&point));
    assert_eq!(features[0].geometry_at(1), Some(&point));
    for feature in &features[1..] {
        assert!(feature.geometry_at(0).is_none());
        assert!(feature.geometry_at(1).is_none());
    }

    let diagnostics = lock(&handle).take_diagnostics();
    let count = |code| diagnostics.iter().filter(|d| d.code == code).count();
    assert_eq!(count(DiagnosticCode::DecodeInvalidWkt), 2);
    assert_eq!(count(DiagnosticCode::DecodeInvalidWkb), 2);
    assert!(diagnostics.iter().all(|d| d.location.is_some()));
}

#[test]
fn test_null_coordinates_give_null_geometry() {
    let mut def = direct("pts", "pts_real");
    def.geometry_fields = Some(vec![GeometryFieldSpec::point_from_columns("p", "x", "y")]);
    let handle = open_layer(&engine(), LayerNode::Direct(def), OpenOptions::read_only());

    let features = collect(&handle);
    assert_eq!(features.len(), 11);
    assert_eq!(
        features[4].geometry(),
        Some(&Geometry::Point(Coord::xy(4.0, 4.0)))
    );
    assert!(features[10].geometry().is_none());
    assert_eq!(lock(&handle).schema().geometry_type(), GeometryType::POINT);
}

#[test]
fn test_text_coordinate_columns_filter_locally() {
    let mut def = direct("pts", "pts_text");
    def.geometry_fields = Some(vec![GeometryFieldSpec::point_from_columns("p", "x", "y")]);
    let handle = open_layer(&engine(), LayerNode::Direct(def), OpenOptions::read_only());

    lock(&handle).set_spatial_filter(0, bbox(2.0, 2.0, 5.0, 5.0)).unwrap();
    assert!(!lock(&handle).capabilities().fast_spatial_filter);

    let ids: Vec<i64> = collect(&handle)
        .iter()
        .filter_map(|f| f.field("id").and_then(|v| v.as_i64()))
        .collect();
    assert_eq!(ids, vec![2, 3, 4, 5]);
    assert!(codes(&handle, DiagnosticCode::FilterNonNumericCoordinates) >= 1);
}

#[test]
fn test_numeric_coordinate_columns_delegate_ranges() {
    let layer = fixtures::columns_layer("pts_real", FieldType::Real);
    let received = layer.received_filters();
    let engine = Engine::default().with_driver(
        MemoryDriver::new().with_dataset("mem", vlayer_source::MemoryDataset::new("mem").with_layer(layer)),
    );
    let mut def = direct("pts", "pts_real");
    def.geometry_fields = Some(vec![GeometryFieldSpec::point_from_columns("p", "x", "y")]);
    let handle = open_layer(&engine, LayerNode::Direct(def), OpenOptions::read_only());

    lock(&handle).set_spatial_filter(0, bbox(2.0, 2.0, 5.0, 5.0)).unwrap();
    assert!(lock(&handle).capabilities().fast_spatial_filter);
    assert_eq!(count(&handle), 4);
    assert_eq!(
        received.lock().unwrap().current_attribute(),
        Some("x >= 2 AND x <= 5 AND y >= 2 AND y <= 5")
    );
}

// =============================================================================
// Regions
// =============================================================================

#[test]
fn test_region_filters_and_extent_override_wins() {
    let mut def = direct("a", "a");
    def.region = Some(RegionSpec {
        wkt: "POLYGON ((0 0, 4.5 0, 4.5 4.5, 0 4.5, 0 0))".into(),
        clip: false,
    });
    def.extent = Some(Envelope::new(-1.0, -1.0, 1.0, 1.0));
    let handle = open_layer(&engine(), LayerNode::Direct(def), OpenOptions::read_only());

    assert_eq!(count(&handle), 5);
    assert_eq!(
        lock(&handle).extent(0).unwrap(),
        Some(Envelope::new(-1.0, -1.0, 1.0, 1.0))
    );
}

#[test]
fn test_region_clips_geometries() {
    let mut def = direct("enc", "encoded");
    def.geometry_fields = Some(vec![GeometryFieldSpec::encoded(
        "g",
        GeometryEncoding::Wkt,
        "wkt",
    )]);
    def.region = Some(RegionSpec {
        wkt: "POLYGON ((0 0, 5 0, 5 5, 0 5, 0 0))".into(),
        clip: true,
    });
    let handle = open_layer(&engine(), LayerNode::Direct(def), OpenOptions::read_only());

    // rows without a geometry fall outside the region
    let features = collect(&handle);
    assert_eq!(features.len(), 1);
    assert_eq!(
        features[0].geometry(),
        Some(&Geometry::Point(Coord::xy(1.0, 2.0)))
    );
}

// =============================================================================
// Lazy binding and failures
// =============================================================================

#[test]
fn test_missing_source_layer_still_answers_schema() {
    let handle = open_layer(
        &engine(),
        LayerNode::Direct(direct("ghost", "does_not_exist")),
        OpenOptions::read_only(),
    );

    let schema = lock(&handle).schema();
    assert_eq!(schema.fields.len(), 0);
    assert_eq!(schema.geometry_type(), GeometryType::NONE);
    assert_eq!(count(&handle), 0);
    assert!(collect(&handle).is_empty());
    assert_eq!(lock(&handle).extent(0).unwrap(), None);
    assert!(matches!(
        lock(&handle).ensure_ready(),
        Err(LayerError::SourceUnavailable(_))
    ));
    assert_eq!(codes(&handle, DiagnosticCode::SourceUnavailable), 1);
}

#[test]
fn test_static_schema_does_not_open_source() {
    let mut def = vlayer_definition::LayerDefinition::new(
        "declared",
        SourceDescriptor::new("nowhere.json"),
    );
    def.fields = Some(vec![FieldSpec::new("id").with_type(FieldType::Integer)]);
    let mut geometry = GeometryFieldSpec::new("geom", GeometryEncoding::Direct);
    geometry.geometry_type = Some(GeometryType::POINT);
    geometry.srs = Some("EPSG:4326".into());
    def.geometry_fields = Some(vec![geometry]);
    def.extent = Some(Envelope::new(0.0, 0.0, 1.0, 1.0));
    let handle = open_layer(&engine(), LayerNode::Direct(def), OpenOptions::read_only());

    let schema = lock(&handle).schema();
    assert_eq!(schema.field_names(), vec!["id"]);
    assert_eq!(schema.geometry_type(), GeometryType::POINT);
    assert_eq!(
        lock(&handle).extent(0).unwrap(),
        Some(Envelope::new(0.0, 0.0, 1.0, 1.0))
    );
    assert!(lock(&handle).take_diagnostics().is_empty());
}

fn write_cycle(dir: &std::path::Path, shared: bool) -> std::path::PathBuf {
    let definition = |name: &str, target: &str| {
        format!(
            r#"{{"layers": [{{"kind": "direct", "name": "{}",
                "source": {{"locator": "{}", "relative": true, "shared": {}}}}}]}}"#,
            name, target, shared
        )
    };
    std::fs::write(dir.join("a.vrt.json"), definition("a", "b.vrt.json")).unwrap();
    std::fs::write(dir.join("b.vrt.json"), definition("b", "a.vrt.json")).unwrap();
    dir.join("a.vrt.json")
}

#[test]
fn test_recursive_definitions_fail() {
    for shared in [false, true] {
        let dir = tempfile::tempdir().unwrap();
        let path = write_cycle(dir.path(), shared);
        let engine = Engine::default();
        let dataset = engine
            .open(path.to_str().unwrap(), OpenOptions::read_only())
            .unwrap();
        let handle = dataset.layer_by_name("a").unwrap();

        let result = lock(&handle).ensure_ready();
        assert!(
            matches!(result, Err(LayerError::Recursion(_))),
            "shared = {}: {:?}",
            shared,
            result
        );
        assert_eq!(lock(&handle).schema().fields.len(), 0);
        assert_eq!(count(&handle), 0);
        assert!(codes(&handle, DiagnosticCode::RecursionDetected) >= 1);
    }
}

#[test]
fn test_nested_definition_file() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("inner.vrt.json"),
        r#"{"layers": [{"kind": "direct", "name": "inner",
            "source": {"locator": "mem", "layer": "cities"}}]}"#,
    )
    .unwrap();
    std::fs::write(
        dir.path().join("outer.vrt.json"),
        r#"{"layers": [{"kind": "direct", "name": "outer",
            "source": {"locator": "inner.vrt.json", "relative": true},
            "fields": [{"name": "city", "src": "name"}]}]}"#,
    )
    .unwrap();

    let engine = engine();
    let path = dir.path().join("outer.vrt.json");
    let dataset = engine
        .open(path.to_str().unwrap(), OpenOptions::read_only())
        .unwrap();
    let handle = dataset.layer(0).unwrap();
    let features = collect(&handle);
    assert_eq!(features.len(), 3);
    assert_eq!(features[1].field("city").and_then(|v| v.as_str()), Some("Lyon"));
}

// =============================================================================
// Writes
// =============================================================================

fn new_a_feature(handle: &SourceHandle, id: i64) -> Feature {
    let schema = lock(handle).schema();
    Feature::new(schema)
        .with_field("id1", id)
        .with_field("id2", id * 10)
        .with_geometry(Geometry::Point(Coord::xy(50.0, 50.0)))
}

#[test]
fn test_writes_follow_open_mode() {
    let engine = engine();
    let read_only = open_layer(&engine, LayerNode::Direct(direct("a", "a")), OpenOptions::read_only());
    assert!(!lock(&read_only).capabilities().sequential_write);
    let mut feature = new_a_feature(&read_only, 77);
    assert!(matches!(
        lock(&read_only).create_feature(&mut feature),
        Err(LayerError::WriteRejected(_))
    ));
    assert_eq!(count(&read_only), 25);

    let writable = open_layer(&engine, LayerNode::Direct(direct("a", "a")), OpenOptions::update());
    assert!(lock(&writable).capabilities().sequential_write);
    let mut feature = new_a_feature(&writable, 77);
    lock(&writable).create_feature(&mut feature).unwrap();
    assert_eq!(feature.fid(), Some(25));
    assert_eq!(count(&writable), 26);

    lock(&writable).delete_feature(0).unwrap();
    assert_eq!(count(&writable), 25);
}

#[test]
fn test_coordinate_column_writes() {
    let mut def = direct("pts", "pts_real");
    def.geometry_fields = Some(vec![GeometryFieldSpec::point_from_columns("p", "x", "y")]);
    let handle = open_layer(&engine(), LayerNode::Direct(def), OpenOptions::update());

    let schema = lock(&handle).schema();
    let mut feature = Feature::new(schema.clone())
        .with_field("id", 42)
        .with_geometry(Geometry::Point(Coord::xy(7.5, 8.5)));
    lock(&handle).create_feature(&mut feature).unwrap();
    let fid = feature.fid().unwrap();
    let stored = lock(&handle).feature(fid).unwrap().unwrap();
    assert_eq!(stored.geometry(), Some(&Geometry::Point(Coord::xy(7.5, 8.5))));

    let mut line = Feature::new(schema)
        .with_geometry(Geometry::LineString(vec![Coord::xy(0.0, 0.0), Coord::xy(1.0, 1.0)]));
    assert!(matches!(
        lock(&handle).create_feature(&mut line),
        Err(LayerError::WriteRejected(_))
    ));
}

// =============================================================================
// Warped layers
// =============================================================================

#[test]
fn test_warped_round_trip() {
    let cities = LayerNode::Direct(direct("cities", "cities"));
    let utm = warped("utm", cities, "EPSG:32631");
    let back = warped("back", utm, "EPSG:4326");
    let handle = open_layer(&engine(), back, OpenOptions::read_only());

    assert_eq!(lock(&handle).schema().geom_fields[0].srs, Some(SpatialRef::WGS84));
    let features = collect(&handle);
    let expected = [(2.35, 48.85), (4.83, 45.76), (5.37, 43.30)];
    assert_eq!(features.len(), 3);
    for (feature, (lon, lat)) in features.iter().zip(expected) {
        let Some(Geometry::Point(c)) = feature.geometry() else {
            panic!("expected a point");
        };
        assert!((c.x - lon).abs() < 1e-6 && (c.y - lat).abs() < 1e-6, "{:?}", c);
    }
}

#[test]
fn test_warped_layer_filters_in_target_space() {
    let utm = warped("utm", LayerNode::Direct(direct("cities", "cities")), "EPSG:32631");
    let handle = open_layer(&engine(), utm, OpenOptions::read_only());
    assert_eq!(
        lock(&handle).schema().geom_fields[0].srs,
        Some(SpatialRef::epsg(32631))
    );

    let Some(Geometry::Point(paris)) = collect(&handle)[0].geometry().cloned() else {
        panic!("expected a point");
    };
    assert!(paris.x > 400_000.0 && paris.x < 500_000.0);

    lock(&handle)
        .set_spatial_filter(0, bbox(400_000.0, 5_350_000.0, 500_000.0, 5_450_000.0))
        .unwrap();
    let names: Vec<String> = collect(&handle)
        .iter()
        .filter_map(|f| f.field("name").map(|v| v.to_string()))
        .collect();
    assert_eq!(names, vec!["Paris".to_string()]);

    lock(&handle).set_spatial_filter(0, None).unwrap();
    assert_eq!(count(&handle), 3);
}

#[test]
fn test_warped_forward_failure_nulls_geometry() {
    // layer b lies 100 to 124 degrees east, far outside UTM zone 31
    let utm = warped("utm", LayerNode::Direct(direct("b", "b")), "EPSG:32631");
    let handle = open_layer(&engine(), utm, OpenOptions::read_only());

    let features = collect(&handle);
    assert_eq!(features.len(), 25);
    assert!(features.iter().all(|f| f.geometry().is_none()));
    assert_eq!(features[3].field("id3").map(|v| v.to_string()), Some("b3".to_string()));
    assert_eq!(codes(&handle, DiagnosticCode::TransformFailed), 25);
}

#[test]
fn test_warped_backward_failure_rejects_write() {
    let utm = warped("utm", LayerNode::Direct(direct("cities", "cities")), "EPSG:32631");
    let handle = open_layer(&engine(), utm, OpenOptions::update());
    assert!(lock(&handle).capabilities().sequential_write);

    let schema = lock(&handle).schema();
    let mut feature = Feature::new(schema)
        .with_field("name", "Nowhere")
        .with_geometry(Geometry::Point(Coord::xy(1e12, 1e12)));
    assert!(matches!(
        lock(&handle).create_feature(&mut feature),
        Err(LayerError::WriteRejected(_))
    ));
    assert_eq!(count(&handle), 3);
}

#[test]
fn test_warped_layer_needs_known_reference() {
    let def = WarpedDefinition {
        name: None,
        layer: Box::new(LayerNode::Direct(direct("cities", "cities"))),
        target_srs: Some("EPSG:4322".into()),
        source_srs: None,
        warped_field: None,
        extent: None,
    };
    let err = engine()
        .open_document(
            &vlayer_definition::DefinitionDocument {
                layers: vec![LayerNode::Warped(def)],
            },
            None,
            OpenOptions::read_only(),
        )
        .unwrap_err();
    assert!(matches!(err, LayerError::Definition(_)));
}

// =============================================================================
// Union layers
// =============================================================================

#[test]
fn test_union_concatenates_and_reconciles() {
    let handle = open_layer(
        &engine(),
        LayerNode::Union(union_of_a_and_b()),
        OpenOptions::read_only(),
    );
    let schema = lock(&handle).schema();
    assert_eq!(schema.field_names(), vec!["id1", "id2", "id3"]);

    let features = collect(&handle);
    assert_eq!(features.len(), 50);
    for (i, feature) in features.iter().enumerate() {
        assert_eq!(feature.fid(), Some(i as i64));
        if i < 25 {
            assert!(feature.is_field_set("id1") && feature.is_field_set("id2"));
            assert!(!feature.is_field_set("id3"));
        } else {
            assert!(feature.is_field_set("id2") && feature.is_field_set("id3"));
            assert!(!feature.is_field_set("id1"));
        }
    }
    assert_eq!(count(&handle), 50);
    assert_eq!(
        lock(&handle).extent(0).unwrap(),
        Some(Envelope::new(0.0, 0.0, 124.0, 24.0))
    );
}

#[test]
fn test_union_field_strategies() {
    let engine = engine();
    let mut def = union_of_a_and_b();
    def.field_strategy = Some(FieldStrategy::Intersection);
    let handle = open_layer(&engine, LayerNode::Union(def.clone()), OpenOptions::read_only());
    assert_eq!(lock(&handle).schema().field_names(), vec!["id2"]);

    def.field_strategy = Some(FieldStrategy::FirstLayer);
    let handle = open_layer(&engine, LayerNode::Union(def), OpenOptions::read_only());
    assert_eq!(lock(&handle).schema().field_names(), vec!["id1", "id2"]);
    assert_eq!(count(&handle), 50);
}

#[test]
fn test_union_explicit_fields_match_by_name() {
    let engine = engine();
    let mut def = union_of_a_and_b();
    def.field_strategy = Some(FieldStrategy::Explicit);
    def.fields = Some(vec![FieldSpec::new("id2").with_type(FieldType::String)]);
    let handle = open_layer(&engine, LayerNode::Union(def.clone()), OpenOptions::read_only());
    let features = collect(&handle);
    assert_eq!(features[3].field("id2").and_then(|v| v.as_str()), Some("30"));
    assert_eq!(features[28].field("id2").and_then(|v| v.as_str()), Some("3"));

    def.fields = Some(vec![FieldSpec::new("label").with_src("id2")]);
    let err = engine
        .open_document(
            &vlayer_definition::DefinitionDocument {
                layers: vec![LayerNode::Union(def)],
            },
            None,
            OpenOptions::read_only(),
        )
        .unwrap_err();
    assert!(matches!(err, LayerError::Definition(_)));
}

#[test]
fn test_union_filters_push_down_or_run_locally() {
    let mut def = union_of_a_and_b();
    def.source_layer_field = Some("origin".into());
    let handle = open_layer(&engine(), LayerNode::Union(def), OpenOptions::read_only());

    // id2 exists in both inner layers
    lock(&handle).set_attribute_filter(Some("id2 < 5")).unwrap();
    assert_eq!(count(&handle), 6);
    assert!(lock(&handle).capabilities().fast_feature_count);

    // the provenance field only exists on the union
    lock(&handle).set_attribute_filter(Some("origin = 'b'")).unwrap();
    assert_eq!(count(&handle), 25);
    assert!(!lock(&handle).capabilities().fast_feature_count);

    lock(&handle).set_attribute_filter(None).unwrap();
    lock(&handle).set_spatial_filter(0, bbox(-1.0, -1.0, 101.5, 1.5)).unwrap();
    assert_eq!(count(&handle), 4);
    lock(&handle).set_spatial_filter(0, None).unwrap();
    assert_eq!(count(&handle), 50);
}

#[test]
fn test_union_routes_writes_by_provenance() {
    let mut def = union_of_a_and_b();
    def.source_layer_field = Some("origin".into());
    let handle = open_layer(&engine(), LayerNode::Union(def), OpenOptions::update());
    let capabilities = lock(&handle).capabilities();
    assert!(capabilities.sequential_write);
    assert!(!capabilities.random_write);
    assert!(!capabilities.transactions);

    let schema = lock(&handle).schema();
    let mut feature = Feature::new(schema.clone())
        .with_field("origin", "b")
        .with_field("id2", 500)
        .with_field("id3", "new")
        .with_geometry(Geometry::Point(Coord::xy(0.0, 0.0)));
    lock(&handle).create_feature(&mut feature).unwrap();
    assert_eq!(count(&handle), 51);

    lock(&handle).set_attribute_filter(Some("id3 = 'new'")).unwrap();
    let created = collect(&handle);
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].field("origin").and_then(|v| v.as_str()), Some("b"));

    let mut stray = Feature::new(schema).with_field("origin", "zzz");
    assert!(matches!(
        lock(&handle).create_feature(&mut stray),
        Err(LayerError::WriteRejected(_))
    ));
    assert!(matches!(
        lock(&handle).delete_feature(0),
        Err(LayerError::WriteRejected(_))
    ));
}

#[test]
fn test_union_preserves_source_ids() {
    let mut def = union_of_a_and_b();
    def.preserve_src_fid = true;
    def.source_layer_field = Some("origin".into());
    let handle = open_layer(&engine(), LayerNode::Union(def), OpenOptions::update());

    let fids: Vec<Option<i64>> = collect(&handle).iter().map(Feature::fid).collect();
    assert_eq!(fids[0], Some(0));
    assert_eq!(fids[25], Some(0));
    assert!(lock(&handle).capabilities().random_write);

    let mut feature = lock(&handle).feature(3).unwrap().unwrap();
    feature.set_field("id2", 333);
    lock(&handle).set_feature(&feature).unwrap();
    let updated = lock(&handle).feature(3).unwrap().unwrap();
    assert_eq!(updated.field("id2").and_then(|v| v.as_i64()), Some(333));
}

#[test]
fn test_union_with_failing_member_does_not_open() {
    let def = UnionDefinition::new(
        "broken",
        vec![
            LayerNode::Direct(direct("a", "a")),
            LayerNode::Direct(direct("ghost", "does_not_exist")),
        ],
    );
    let err = engine()
        .open_document(
            &vlayer_definition::DefinitionDocument {
                layers: vec![LayerNode::Union(def)],
            },
            None,
            OpenOptions::read_only(),
        )
        .unwrap_err();
    assert!(matches!(err, LayerError::SourceUnavailable(_)));
}

// =============================================================================
// Filters across layer kinds
// =============================================================================

#[test]
fn test_clearing_spatial_filter_restores_count() {
    let engine = engine();
    let mut columns = direct("pts", "pts_text");
    columns.geometry_fields = Some(vec![GeometryFieldSpec::point_from_columns("p", "x", "y")]);
    let nodes = vec![
        LayerNode::Direct(direct("a", "a")),
        LayerNode::Direct(columns),
        warped("w", LayerNode::Direct(direct("a2", "a")), "EPSG:3857"),
        LayerNode::Union(union_of_a_and_b()),
    ];
    let dataset = open(&engine, nodes, OpenOptions::read_only());

    for index in 0..dataset.layer_count() {
        let handle = dataset.layer(index).unwrap();
        let before = count(&handle);
        let extent = lock(&handle).extent(0).unwrap().unwrap();
        let corner = Envelope::new(
            extent.min_x,
            extent.min_y,
            (extent.min_x + extent.max_x) / 2.0,
            (extent.min_y + extent.max_y) / 2.0,
        );
        lock(&handle).set_spatial_filter(0, Some(corner.to_polygon())).unwrap();
        assert!(count(&handle) < before, "layer {}", index);
        lock(&handle).set_spatial_filter(0, None).unwrap();
        assert_eq!(count(&handle), before, "layer {}", index);
    }
}
