//! Geometry derivation strategies
//!
//! A strategy turns the raw values of a source feature into one exposed
//! geometry (`decode`) and writes an exposed geometry back into source
//! values (`encode`). Decoding never fails: malformed input degrades to a
//! null geometry together with a diagnostic.

use vlayer_core::{
    Coord, Diagnostic, DiagnosticCode, Feature, FieldType, FieldValue, Geometry, GeometryType,
    LayerSchema, SoftResult,
};
use vlayer_definition::{GeometryEncoding, GeometryFieldSpec};
use vlayer_geom::{parse_shape, parse_wkb, parse_wkt, to_shape, to_wkb, to_wkt, GeomError};
use vlayer_source::LayerError;

/// How one exposed geometry field is derived from a source feature
#[derive(Debug, Clone, PartialEq)]
pub enum GeometryStrategy {
    /// Source geometry field at `index`, unchanged; `None` when the source
    /// has no matching field
    Direct { index: Option<usize> },

    /// Text column holding WKT
    Wkt { column: String },

    /// Binary column holding WKB, or a text column holding hex-encoded WKB
    Wkb { column: String },

    /// Binary column holding an ESRI shape record
    Shape { column: String },

    /// Point assembled from coordinate columns
    PointFromColumns {
        x: String,
        y: String,
        z: Option<String>,
        m: Option<String>,
    },
}

impl GeometryStrategy {
    /// Build the strategy for a declared geometry field
    ///
    /// `position` is the field's index among the declared geometry fields;
    /// a direct field without `src_field` falls back to the source field with
    /// the same name, then to the one at the same position.
    pub fn from_spec(spec: &GeometryFieldSpec, position: usize, source: &LayerSchema) -> Self {
        let column = || spec.field.clone().unwrap_or_default();
        match spec.encoding {
            GeometryEncoding::Direct => {
                let index = match &spec.src_field {
                    Some(name) => source.geom_field_index(name),
                    None => source
                        .geom_field_index(&spec.name)
                        .or_else(|| (position < source.geom_fields.len()).then_some(position)),
                };
                Self::Direct { index }
            }
            GeometryEncoding::Wkt => Self::Wkt { column: column() },
            GeometryEncoding::Wkb => Self::Wkb { column: column() },
            GeometryEncoding::Shape => Self::Shape { column: column() },
            GeometryEncoding::PointFromColumns => Self::PointFromColumns {
                x: spec.x.clone().unwrap_or_default(),
                y: spec.y.clone().unwrap_or_default(),
                z: spec.z.clone(),
                m: spec.m.clone(),
            },
        }
    }

    /// Strategy for a declared field when no source schema is known yet
    pub fn from_declaration(spec: &GeometryFieldSpec, position: usize) -> Self {
        Self::from_spec(spec, position, &LayerSchema::new(""))
    }

    /// Geometry type implied by the encoding, before any declaration
    pub fn inferred_type(&self, source: &LayerSchema) -> GeometryType {
        match self {
            Self::Direct { index } => index
                .and_then(|i| source.geom_fields.get(i))
                .map(|g| g.geometry_type)
                .unwrap_or(GeometryType::UNKNOWN),
            Self::PointFromColumns { z, m, .. } => {
                GeometryType::POINT.with_z(z.is_some()).with_m(m.is_some())
            }
            _ => GeometryType::UNKNOWN,
        }
    }

    /// Source columns the strategy reads
    pub fn columns(&self) -> Vec<&str> {
        match self {
            Self::Direct { .. } => Vec::new(),
            Self::Wkt { column } | Self::Wkb { column } | Self::Shape { column } => {
                vec![column.as_str()]
            }
            Self::PointFromColumns { x, y, z, m } => [Some(x), Some(y), z.as_ref(), m.as_ref()]
                .into_iter()
                .flatten()
                .map(String::as_str)
                .collect(),
        }
    }

    /// Check that the source provides what the strategy reads
    pub fn check_source(&self, source: &LayerSchema) -> Result<(), LayerError> {
        match self.columns().into_iter().find(|c| source.field_index(c).is_none()) {
            Some(missing) => Err(LayerError::Definition(format!(
                "source layer '{}' has no column '{}'",
                source.name, missing
            ))),
            None => Ok(()),
        }
    }

    /// Derive the geometry of one source feature
    pub fn decode(&self, source: &Feature) -> SoftResult<Option<Geometry>> {
        match self {
            Self::Direct { index } => {
                SoftResult::Clean(index.and_then(|i| source.geometry_at(i)).cloned())
            }
            Self::Wkt { column } => decode_wkt(column, source.field(column)),
            Self::Wkb { column } => decode_wkb(column, source.field(column)),
            Self::Shape { column } => decode_shape(column, source.field(column)),
            Self::PointFromColumns { x, y, z, m } => decode_point(source, x, y, z, m),
        }
    }

    /// Write an exposed geometry into a feature of the source schema
    pub fn encode(&self, geometry: Option<&Geometry>, target: &mut Feature) -> Result<(), LayerError> {
        match self {
            Self::Direct { index } => {
                if let Some(i) = index {
                    target.set_geometry_at(*i, geometry.cloned());
                } else if geometry.is_some() {
                    return Err(LayerError::WriteRejected(
                        "the source has no geometry field to receive the geometry".to_string(),
                    ));
                }
            }
            Self::Wkt { column } => {
                let value = geometry.map_or(FieldValue::Null, |g| FieldValue::String(to_wkt(g)));
                target.set_field(column, value);
            }
            Self::Wkb { column } => {
                let value = match geometry {
                    None => FieldValue::Null,
                    Some(g) => {
                        let bytes = to_wkb(g).map_err(|e| LayerError::WriteRejected(e.to_string()))?;
                        if column_type(target, column) == Some(FieldType::String) {
                            FieldValue::String(hex::encode_upper(bytes))
                        } else {
                            FieldValue::Binary(bytes)
                        }
                    }
                };
                target.set_field(column, value);
            }
            Self::Shape { column } => {
                let bytes = to_shape(geometry).map_err(|e| LayerError::WriteRejected(e.to_string()))?;
                target.set_field(column, FieldValue::Binary(bytes));
            }
            Self::PointFromColumns { x, y, z, m } => {
                let coord = match geometry {
                    None => None,
                    Some(Geometry::Point(c)) => Some(*c),
                    Some(other) => {
                        return Err(LayerError::WriteRejected(format!(
                            "coordinate columns can only hold points, got {}",
                            other.geometry_type()
                        )))
                    }
                };
                let ordinate = |v: Option<f64>| v.map_or(FieldValue::Null, FieldValue::Real);
                target.set_field(x, ordinate(coord.map(|c| c.x)));
                target.set_field(y, ordinate(coord.map(|c| c.y)));
                if let Some(z) = z {
                    target.set_field(z, ordinate(coord.and_then(|c| c.z)));
                }
                if let Some(m) = m {
                    target.set_field(m, ordinate(coord.and_then(|c| c.m)));
                }
            }
        }
        Ok(())
    }
}

fn column_type(feature: &Feature, column: &str) -> Option<FieldType> {
    feature.schema().find_field(column).map(|f| f.field_type)
}

fn degraded(code: DiagnosticCode, column: &str, detail: impl std::fmt::Display) -> SoftResult<Option<Geometry>> {
    SoftResult::Degraded(
        None,
        Diagnostic::warn(code, format!("column '{}': {}", column, detail)),
    )
}

fn decode_wkt(column: &str, value: Option<&FieldValue>) -> SoftResult<Option<Geometry>> {
    let text = match value {
        None | Some(FieldValue::Null) => return SoftResult::Clean(None),
        Some(FieldValue::String(s)) => s.clone(),
        Some(FieldValue::Binary(b)) => String::from_utf8_lossy(b).into_owned(),
        Some(other) => other.to_string(),
    };
    match parse_wkt(&text) {
        Ok(geometry) => SoftResult::Clean(Some(geometry)),
        Err(GeomError::EmptyPoint) => SoftResult::Clean(None),
        Err(e) => degraded(DiagnosticCode::DecodeInvalidWkt, column, e),
    }
}

/// Bytes of a binary column, or of a hex-encoded text column
fn binary(column: &str, value: FieldValue, code: DiagnosticCode) -> Result<Vec<u8>, SoftResult<Option<Geometry>>> {
    match value {
        FieldValue::Binary(bytes) => Ok(bytes),
        FieldValue::String(text) => {
            hex::decode(text.trim()).map_err(|e| degraded(code, column, format!("invalid hex: {}", e)))
        }
        other => Err(degraded(code, column, format!("expected bytes, got '{}'", other))),
    }
}

fn decode_wkb(column: &str, value: Option<&FieldValue>) -> SoftResult<Option<Geometry>> {
    let bytes = match value {
        None | Some(FieldValue::Null) => return SoftResult::Clean(None),
        Some(value) => match binary(column, value.clone(), DiagnosticCode::DecodeInvalidWkb) {
            Ok(bytes) => bytes,
            Err(degraded) => return degraded,
        },
    };
    match parse_wkb(&bytes) {
        Ok(geometry) => SoftResult::Clean(Some(geometry)),
        Err(GeomError::EmptyPoint) => SoftResult::Clean(None),
        Err(e) => degraded(DiagnosticCode::DecodeInvalidWkb, column, e),
    }
}

fn decode_shape(column: &str, value: Option<&FieldValue>) -> SoftResult<Option<Geometry>> {
    let bytes = match value {
        None | Some(FieldValue::Null) => return SoftResult::Clean(None),
        Some(value) => match binary(column, value.clone(), DiagnosticCode::DecodeInvalidShape) {
            Ok(bytes) => bytes,
            Err(degraded) => return degraded,
        },
    };
    match parse_shape(&bytes) {
        Ok(geometry) => SoftResult::Clean(geometry),
        Err(e @ GeomError::UnsupportedShapeType(_)) => {
            degraded(DiagnosticCode::DecodeUnsupportedShape, column, e)
        }
        Err(e) => degraded(DiagnosticCode::DecodeInvalidShape, column, e),
    }
}

enum Ordinate {
    Null,
    Value(f64),
    Invalid(String),
}

fn ordinate(source: &Feature, column: &str) -> Ordinate {
    match source.field(column) {
        None | Some(FieldValue::Null) => Ordinate::Null,
        Some(FieldValue::String(s)) if s.trim().is_empty() => Ordinate::Null,
        Some(value) => match value.as_f64() {
            Some(v) => Ordinate::Value(v),
            None => Ordinate::Invalid(value.to_string()),
        },
    }
}

fn decode_point(
    source: &Feature,
    x: &str,
    y: &str,
    z: &Option<String>,
    m: &Option<String>,
) -> SoftResult<Option<Geometry>> {
    let mut values = [0.0; 2];
    for (slot, column) in values.iter_mut().zip([x, y]) {
        match ordinate(source, column) {
            Ordinate::Null => return SoftResult::Clean(None),
            Ordinate::Value(v) => *slot = v,
            Ordinate::Invalid(text) => {
                return degraded(
                    DiagnosticCode::DecodeInvalidCoordinate,
                    column,
                    format!("'{}' is not a number", text),
                )
            }
        }
    }
    let optional = |column: &Option<String>| -> Result<Option<f64>, SoftResult<Option<Geometry>>> {
        let Some(column) = column else {
            return Ok(None);
        };
        match ordinate(source, column) {
            Ordinate::Null => Ok(Some(0.0)),
            Ordinate::Value(v) => Ok(Some(v)),
            Ordinate::Invalid(text) => Err(degraded(
                DiagnosticCode::DecodeInvalidCoordinate,
                column,
                format!("'{}' is not a number", text),
            )),
        }
    };
    let z = match optional(z) {
        Ok(v) => v,
        Err(degraded) => return degraded,
    };
    let m = match optional(m) {
        Ok(v) => v,
        Err(degraded) => return degraded,
    };
    SoftResult::Clean(Some(Geometry::Point(Coord {
        x: values[0],
        y: values[1],
        z,
        m,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use vlayer_core::{FieldDefn, GeomFieldDefn};

    fn schema() -> Arc<LayerSchema> {
        Arc::new(
            LayerSchema::new("raw")
                .with_field(FieldDefn::new("wkt", FieldType::String))
                .with_field(FieldDefn::new("wkb", FieldType::Binary))
                .with_field(FieldDefn::new("wkb_hex", FieldType::String))
                .with_field(FieldDefn::new("x", FieldType::String))
                .with_field(FieldDefn::new("y", FieldType::Real))
                .with_field(FieldDefn::new("z", FieldType::Real))
                .with_geom_field(GeomFieldDefn::new("geom", GeometryType::POINT)),
        )
    }

    fn wkt() -> GeometryStrategy {
        GeometryStrategy::Wkt {
            column: "wkt".into(),
        }
    }

    #[test]
    fn wkt_decodes_and_tolerates_garbage() {
        let source = Feature::new(schema()).with_field("wkt", "POINT (1 2)");
        assert_eq!(
            wkt().decode(&source),
            SoftResult::Clean(Some(Geometry::Point(Coord::xy(1.0, 2.0))))
        );

        let garbage = Feature::new(schema()).with_field("wkt", "POINT (1");
        let (geometry, diagnostic) = wkt().decode(&garbage).into_parts();
        assert_eq!(geometry, None);
        assert_eq!(diagnostic.unwrap().code, DiagnosticCode::DecodeInvalidWkt);

        let empty = Feature::new(schema()).with_field("wkt", "");
        assert!(wkt().decode(&empty).is_degraded());

        let null = Feature::new(schema());
        assert_eq!(wkt().decode(&null), SoftResult::Clean(None));
    }

    #[test]
    fn wkb_accepts_binary_and_hex() {
        let point = Geometry::Point(Coord::xyz(1.0, 2.0, 3.0));
        let mut raw = Feature::new(schema());
        let binary = GeometryStrategy::Wkb {
            column: "wkb".into(),
        };
        let hex_text = GeometryStrategy::Wkb {
            column: "wkb_hex".into(),
        };
        binary.encode(Some(&point), &mut raw).unwrap();
        hex_text.encode(Some(&point), &mut raw).unwrap();
        assert!(matches!(raw.field("wkb"), Some(FieldValue::Binary(_))));
        assert!(matches!(raw.field("wkb_hex"), Some(FieldValue::String(_))));
        assert_eq!(binary.decode(&raw), SoftResult::Clean(Some(point.clone())));
        assert_eq!(hex_text.decode(&raw), SoftResult::Clean(Some(point)));

        raw.set_field("wkb", FieldValue::Binary(vec![1, 2]));
        let (geometry, diagnostic) = binary.decode(&raw).into_parts();
        assert_eq!(geometry, None);
        assert_eq!(diagnostic.unwrap().code, DiagnosticCode::DecodeInvalidWkb);
    }

    #[test]
    fn points_from_columns() {
        let strategy = GeometryStrategy::PointFromColumns {
            x: "x".into(),
            y: "y".into(),
            z: Some("z".into()),
            m: None,
        };
        assert_eq!(
            strategy.inferred_type(&schema()),
            GeometryType::POINT.with_z(true)
        );

        let full = Feature::new(schema())
            .with_field("x", "1.5")
            .with_field("y", 2.0)
            .with_field("z", 3.0);
        assert_eq!(
            strategy.decode(&full),
            SoftResult::Clean(Some(Geometry::Point(Coord::xyz(1.5, 2.0, 3.0))))
        );

        let missing_y = Feature::new(schema()).with_field("x", "1.5").with_field("z", 3.0);
        assert_eq!(strategy.decode(&missing_y), SoftResult::Clean(None));

        let text = Feature::new(schema()).with_field("x", "east").with_field("y", 1.0);
        let (geometry, diagnostic) = strategy.decode(&text).into_parts();
        assert_eq!(geometry, None);
        assert_eq!(
            diagnostic.unwrap().code,
            DiagnosticCode::DecodeInvalidCoordinate
        );
    }

    #[test]
    fn point_columns_reject_other_shapes() {
        let strategy = GeometryStrategy::PointFromColumns {
            x: "x".into(),
            y: "y".into(),
            z: None,
            m: None,
        };
        let mut raw = Feature::new(schema());
        let line = Geometry::LineString(vec![Coord::xy(0.0, 0.0), Coord::xy(1.0, 1.0)]);
        assert!(matches!(
            strategy.encode(Some(&line), &mut raw),
            Err(LayerError::WriteRejected(_))
        ));
        strategy
            .encode(Some(&Geometry::Point(Coord::xy(4.0, 5.0))), &mut raw)
            .unwrap();
        assert_eq!(raw.field("y"), Some(&FieldValue::Real(5.0)));
    }

    #[test]
    fn direct_resolves_by_name_then_position() {
        let spec = GeometryFieldSpec::new("other", GeometryEncoding::Direct);
        assert_eq!(
            GeometryStrategy::from_spec(&spec, 0, &schema()),
            GeometryStrategy::Direct { index: Some(0) }
        );
        assert_eq!(
            GeometryStrategy::from_spec(&spec, 1, &schema()),
            GeometryStrategy::Direct { index: None }
        );
        let mut named = GeometryFieldSpec::new("g", GeometryEncoding::Direct);
        named.src_field = Some("GEOM".into());
        assert_eq!(
            GeometryStrategy::from_spec(&named, 3, &schema()),
            GeometryStrategy::Direct { index: Some(0) }
        );
    }

    #[test]
    fn missing_columns_are_definition_errors() {
        let strategy = GeometryStrategy::Shape {
            column: "shp".into(),
        };
        assert!(matches!(
            strategy.check_source(&schema()),
            Err(LayerError::Definition(_))
        ));
    }
}
