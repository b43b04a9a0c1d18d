//! Test fixtures for source layer integration tests
//!
//! Small datasets shaped like the layers virtual definitions usually sit on:
//! a point layer with attributes and a layer of city records.

use std::sync::Arc;
use vlayer_core::{
    Coord, Feature, FieldDefn, FieldType, GeomFieldDefn, Geometry, GeometryType, LayerSchema,
    SpatialRef,
};
use vlayer_source::{MemoryDataset, MemoryLayer};

/// Schema of a WGS 84 point layer with an id and a name
pub fn points_schema() -> Arc<LayerSchema> {
    Arc::new(
        LayerSchema::new("points")
            .with_field(FieldDefn::new("id", FieldType::Integer))
            .with_field(FieldDefn::new("name", FieldType::String))
            .with_geom_field(
                GeomFieldDefn::new("geom", GeometryType::POINT)
                    .with_srs(Some(SpatialRef::WGS84)),
            ),
    )
}

/// Ten points on the diagonal, named `p0` to `p9`
pub fn points_layer() -> MemoryLayer {
    let schema = points_schema();
    MemoryLayer::new(schema.clone()).with_features((0..10).map(|i| {
        Feature::new(schema.clone())
            .with_field("id", i as i64)
            .with_field("name", format!("p{}", i))
            .with_geometry(Geometry::Point(Coord::xy(i as f64, i as f64)))
    }))
}

pub fn points_dataset() -> MemoryDataset {
    MemoryDataset::new("mem").with_layer(points_layer())
}

/// Dataset document with one city layer
pub const CITIES_JSON: &str = r#"{
  "layers": [
    {
      "name": "cities",
      "fields": [
        {"name": "name", "type": "string"},
        {"name": "population", "type": "integer"}
      ],
      "geom_fields": [
        {"name": "geom", "geometry_type": "Point", "srs": "EPSG:4326"}
      ],
      "features": [
        {"fid": 10, "properties": {"name": "Paris", "population": 2100000}, "geometry": "POINT (2.35 48.85)"},
        {"fid": 11, "properties": {"name": "Lyon", "population": 520000}, "geometry": "POINT (4.83 45.76)"},
        {"fid": 12, "properties": {"name": "Nowhere"}}
      ]
    }
  ]
}"#;
