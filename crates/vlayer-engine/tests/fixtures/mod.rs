//! Test fixtures for engine integration tests
//!
//! Every dataset lives in one in-memory dataset registered as `mem`; each
//! open hands out an independent copy, so tests never see each other's writes.

#![allow(dead_code)]

use std::sync::Arc;
use vlayer_core::{
    Coord, Feature, FieldDefn, FieldType, FieldValue, GeomFieldDefn, Geometry, GeometryType,
    LayerSchema, SpatialRef,
};
use vlayer_definition::{DefinitionDocument, LayerDefinition, LayerNode, SourceDescriptor};
use vlayer_engine::{Engine, OpenOptions, VirtualDataset};
use vlayer_source::{lock, DataSource, FeatureLayer, MemoryDataset, MemoryDriver, MemoryLayer, SourceHandle};

fn point_schema(name: &str, fields: &[(&str, FieldType)]) -> Arc<LayerSchema> {
    let mut schema = LayerSchema::new(name).with_geom_field(
        GeomFieldDefn::new("geom", GeometryType::POINT).with_srs(Some(SpatialRef::WGS84)),
    );
    for (field, field_type) in fields {
        schema = schema.with_field(FieldDefn::new(*field, *field_type));
    }
    Arc::new(schema)
}

/// 25 points at (i, i) with `id1 = i` and `id2 = 10 * i`
pub fn layer_a() -> MemoryLayer {
    let schema = point_schema("a", &[("id1", FieldType::Integer), ("id2", FieldType::Integer)]);
    MemoryLayer::new(schema.clone()).with_features((0..25).map(|i| {
        Feature::new(schema.clone())
            .with_fid(i)
            .with_field("id1", i)
            .with_field("id2", i * 10)
            .with_geometry(Geometry::Point(Coord::xy(i as f64, i as f64)))
    }))
}

/// 25 points at (100 + i, i) with `id2 = i` and `id3 = "b<i>"`
pub fn layer_b() -> MemoryLayer {
    let schema = point_schema("b", &[("id2", FieldType::Integer), ("id3", FieldType::String)]);
    MemoryLayer::new(schema.clone()).with_features((0..25).map(|i| {
        Feature::new(schema.clone())
            .with_fid(i)
            .with_field("id2", i)
            .with_field("id3", format!("b{}", i))
            .with_geometry(Geometry::Point(Coord::xy(100.0 + i as f64, i as f64)))
    }))
}

/// Ten rows with coordinates in columns `x` and `y`, plus one row without X
pub fn columns_layer(name: &str, coordinate_type: FieldType) -> MemoryLayer {
    let schema = Arc::new(
        LayerSchema::new(name)
            .with_field(FieldDefn::new("id", FieldType::Integer))
            .with_field(FieldDefn::new("x", coordinate_type))
            .with_field(FieldDefn::new("y", coordinate_type)),
    );
    let value = |v: f64| match coordinate_type {
        FieldType::String => FieldValue::String(v.to_string()),
        _ => FieldValue::Real(v),
    };
    let mut layer = MemoryLayer::new(schema.clone()).with_features((0..10).map(|i| {
        Feature::new(schema.clone())
            .with_fid(i)
            .with_field("id", i)
            .with_field("x", value(i as f64))
            .with_field("y", value(i as f64))
    }));
    layer.insert(
        Feature::new(schema.clone())
            .with_fid(10)
            .with_field("id", 10)
            .with_field("y", value(3.0)),
    );
    layer
}

/// Geometries stored as WKT text and WKB bytes, some of them broken
pub fn encoded_layer() -> MemoryLayer {
    let schema = Arc::new(
        LayerSchema::new("encoded")
            .with_field(FieldDefn::new("id", FieldType::Integer))
            .with_field(FieldDefn::new("wkt", FieldType::String))
            .with_field(FieldDefn::new("wkb", FieldType::Binary)),
    );
    let point = Geometry::Point(Coord::xy(1.0, 2.0));
    let rows: Vec<(FieldValue, FieldValue)> = vec![
        (
            FieldValue::String("POINT (1 2)".into()),
            FieldValue::Binary(vlayer_geom::to_wkb(&point).unwrap()),
        ),
        (FieldValue::Null, FieldValue::Null),
        (FieldValue::String(String::new()), FieldValue::Binary(Vec::new())),
        (FieldValue::String("POINT (1".into()), FieldValue::Binary(vec![1, 2, 3])),
    ];
    MemoryLayer::new(schema.clone()).with_features(rows.into_iter().enumerate().map(
        |(i, (wkt, wkb))| {
            Feature::new(schema.clone())
                .with_fid(i as i64)
                .with_field("id", i as i64)
                .with_field("wkt", wkt)
                .with_field("wkb", wkb)
        },
    ))
}

/// Three French cities in WGS 84
pub fn cities_layer() -> MemoryLayer {
    let schema = point_schema(
        "cities",
        &[("name", FieldType::String), ("population", FieldType::Integer)],
    );
    let cities = [
        ("Paris", 2_100_000, 2.35, 48.85),
        ("Lyon", 520_000, 4.83, 45.76),
        ("Marseille", 870_000, 5.37, 43.30),
    ];
    MemoryLayer::new(schema.clone()).with_features(cities.iter().enumerate().map(
        |(i, (name, population, lon, lat))| {
            Feature::new(schema.clone())
                .with_fid(i as i64)
                .with_field("name", *name)
                .with_field("population", *population as i64)
                .with_geometry(Geometry::Point(Coord::xy(*lon, *lat)))
        },
    ))
}

pub fn dataset() -> MemoryDataset {
    MemoryDataset::new("mem")
        .with_layer(layer_a())
        .with_layer(layer_b())
        .with_layer(columns_layer("pts_text", FieldType::String))
        .with_layer(columns_layer("pts_real", FieldType::Real))
        .with_layer(encoded_layer())
        .with_layer(cities_layer())
}

/// Engine that resolves `mem` to the fixture dataset
pub fn engine() -> Engine {
    Engine::default().with_driver(MemoryDriver::new().with_dataset("mem", dataset()))
}

/// Definition of a direct layer over a fixture layer
pub fn direct(name: &str, layer: &str) -> LayerDefinition {
    LayerDefinition::new(name, SourceDescriptor::new("mem").with_layer(layer))
}

pub fn open(engine: &Engine, layers: Vec<LayerNode>, options: OpenOptions) -> VirtualDataset {
    engine
        .open_document(&DefinitionDocument { layers }, None, options)
        .unwrap()
}

/// Open a single layer definition and return its handle
pub fn open_layer(engine: &Engine, node: LayerNode, options: OpenOptions) -> SourceHandle {
    open(engine, vec![node], options).layer(0).unwrap()
}

/// Every feature passing the installed filters
pub fn collect(handle: &SourceHandle) -> Vec<Feature> {
    let mut layer = lock(handle);
    layer.reset_reading();
    let mut out = Vec::new();
    while let Some(feature) = layer.next_feature().unwrap() {
        out.push(feature);
    }
    out
}
