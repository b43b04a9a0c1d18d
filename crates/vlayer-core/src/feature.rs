//! Feature records
//!
//! A feature carries a handle to the schema it was built against, so field
//! access by name works without passing the schema around.

use crate::geometry::Geometry;
use crate::schema::{FieldType, LayerSchema};
use std::sync::Arc;

/// An attribute value; `Null` also stands for "unset"
#[derive(Debug, Clone, PartialEq, Default)]
pub enum FieldValue {
    #[default]
    Null,
    Integer(i64),
    Real(f64),
    String(String),
    Binary(Vec<u8>),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Numeric view; numeric text is parsed
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(v) => Some(*v as f64),
            Self::Real(v) => Some(*v),
            Self::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Integer view; reals are truncated, numeric text is parsed
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            Self::Real(v) if v.is_finite() => Some(v.trunc() as i64),
            Self::String(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().filter(|v| v.is_finite()).map(|v| v as i64))
            }
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Binary(b) => Some(b),
            _ => None,
        }
    }

    /// Convert to the representation of a field type
    ///
    /// Returns `None` when a non-null value cannot be represented.
    pub fn convert(&self, field_type: FieldType) -> Option<FieldValue> {
        if self.is_null() {
            return Some(FieldValue::Null);
        }
        match field_type {
            FieldType::Integer | FieldType::Integer64 => self.as_i64().map(FieldValue::Integer),
            FieldType::Real => self.as_f64().map(FieldValue::Real),
            FieldType::Binary => match self {
                Self::Binary(b) => Some(FieldValue::Binary(b.clone())),
                Self::String(s) => Some(FieldValue::Binary(s.as_bytes().to_vec())),
                _ => None,
            },
            FieldType::String | FieldType::Date | FieldType::Time | FieldType::DateTime => {
                Some(FieldValue::String(self.to_string()))
            }
        }
    }

    /// Build from a JSON scalar
    pub fn from_json(value: &serde_json::Value) -> FieldValue {
        match value {
            serde_json::Value::Null => FieldValue::Null,
            serde_json::Value::Bool(b) => FieldValue::Integer(i64::from(*b)),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(FieldValue::Integer)
                .or_else(|| n.as_f64().map(FieldValue::Real))
                .unwrap_or(FieldValue::Null),
            serde_json::Value::String(s) => FieldValue::String(s.clone()),
            other => FieldValue::String(other.to_string()),
        }
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Integer(v) => write!(f, "{}", v),
            Self::Real(v) => write!(f, "{}", v),
            Self::String(s) => write!(f, "{}", s),
            Self::Binary(b) => {
                for byte in b {
                    write!(f, "{:02X}", byte)?;
                }
                Ok(())
            }
        }
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        Self::Real(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Vec<u8>> for FieldValue {
    fn from(v: Vec<u8>) -> Self {
        Self::Binary(v)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(FieldValue::Null)
    }
}

/// One record: attribute values, geometries and an identity
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    schema: Arc<LayerSchema>,
    fid: Option<i64>,
    fields: Vec<FieldValue>,
    geometries: Vec<Option<Geometry>>,
    style: Option<String>,
}

impl Feature {
    /// Create an empty feature for a schema
    pub fn new(schema: Arc<LayerSchema>) -> Self {
        let fields = vec![FieldValue::Null; schema.fields.len()];
        let geometries = vec![None; schema.geom_fields.len()];
        Self {
            schema,
            fid: None,
            fields,
            geometries,
            style: None,
        }
    }

    pub fn schema(&self) -> &Arc<LayerSchema> {
        &self.schema
    }

    pub fn fid(&self) -> Option<i64> {
        self.fid
    }

    pub fn set_fid(&mut self, fid: Option<i64>) {
        self.fid = fid;
    }

    /// Builder form of `set_fid`
    pub fn with_fid(mut self, fid: i64) -> Self {
        self.fid = Some(fid);
        self
    }

    /// Value of a field by name; `None` if the schema has no such field
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.schema.field_index(name).map(|i| &self.fields[i])
    }

    pub fn field_at(&self, index: usize) -> Option<&FieldValue> {
        self.fields.get(index)
    }

    pub fn fields(&self) -> &[FieldValue] {
        &self.fields
    }

    /// Set a field by name; returns false if the schema has no such field
    pub fn set_field(&mut self, name: &str, value: impl Into<FieldValue>) -> bool {
        match self.schema.field_index(name) {
            Some(i) => {
                self.fields[i] = value.into();
                true
            }
            None => false,
        }
    }

    /// Builder form of `set_field`; unknown names are ignored
    pub fn with_field(mut self, name: &str, value: impl Into<FieldValue>) -> Self {
        self.set_field(name, value);
        self
    }

    pub fn set_field_at(&mut self, index: usize, value: FieldValue) {
        if let Some(slot) = self.fields.get_mut(index) {
            *slot = value;
        }
    }

    /// Whether a field exists and holds a non-null value
    pub fn is_field_set(&self, name: &str) -> bool {
        self.field(name).is_some_and(|v| !v.is_null())
    }

    /// First geometry
    pub fn geometry(&self) -> Option<&Geometry> {
        self.geometry_at(0)
    }

    pub fn geometry_at(&self, index: usize) -> Option<&Geometry> {
        self.geometries.get(index).and_then(|g| g.as_ref())
    }

    pub fn geometries(&self) -> &[Option<Geometry>] {
        &self.geometries
    }

    /// Set the first geometry
    pub fn set_geometry(&mut self, geometry: Option<Geometry>) {
        self.set_geometry_at(0, geometry);
    }

    /// Builder form of `set_geometry`
    pub fn with_geometry(mut self, geometry: Geometry) -> Self {
        self.set_geometry(Some(geometry));
        self
    }

    pub fn set_geometry_at(&mut self, index: usize, geometry: Option<Geometry>) {
        if let Some(slot) = self.geometries.get_mut(index) {
            *slot = geometry;
        }
    }

    pub fn take_geometry_at(&mut self, index: usize) -> Option<Geometry> {
        self.geometries.get_mut(index).and_then(Option::take)
    }

    pub fn style(&self) -> Option<&str> {
        self.style.as_deref()
    }

    pub fn set_style(&mut self, style: Option<String>) {
        self.style = style;
    }

    /// Copy into another schema, matching attribute and geometry fields by name
    pub fn remap(&self, target: Arc<LayerSchema>) -> Feature {
        let mut out = Feature::new(target.clone());
        out.fid = self.fid;
        out.style = self.style.clone();
        for (i, field) in target.fields.iter().enumerate() {
            if let Some(value) = self.field(&field.name) {
                out.fields[i] = value.convert(field.field_type).unwrap_or(FieldValue::Null);
            }
        }
        for (i, geom_field) in target.geom_fields.iter().enumerate() {
            if let Some(src) = self.schema.geom_field_index(&geom_field.name) {
                out.geometries[i] = self.geometries[src].clone();
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Coord;
    use crate::schema::{FieldDefn, GeomFieldDefn, GeometryType};

    fn schema() -> Arc<LayerSchema> {
        Arc::new(
            LayerSchema::new("test")
                .with_field(FieldDefn::new("id", FieldType::Integer))
                .with_field(FieldDefn::new("name", FieldType::String))
                .with_geom_field(GeomFieldDefn::new("geom", GeometryType::POINT)),
        )
    }

    #[test]
    fn set_and_get_by_name() {
        let mut feature = Feature::new(schema()).with_fid(7);
        assert!(feature.set_field("ID", 12));
        assert!(!feature.set_field("missing", 1));
        feature.set_geometry(Some(Geometry::Point(Coord::xy(1.0, 2.0))));

        assert_eq!(feature.fid(), Some(7));
        assert_eq!(feature.field("id"), Some(&FieldValue::Integer(12)));
        assert!(!feature.is_field_set("name"));
        assert!(feature.geometry().is_some());
    }

    #[test]
    fn value_conversion() {
        assert_eq!(FieldValue::from("2.5").convert(FieldType::Real), Some(FieldValue::Real(2.5)));
        assert_eq!(FieldValue::from(3.9).convert(FieldType::Integer), Some(FieldValue::Integer(3)));
        assert_eq!(FieldValue::from(4).convert(FieldType::String), Some(FieldValue::from("4")));
        assert_eq!(FieldValue::from("abc").convert(FieldType::Integer), None);
        assert_eq!(FieldValue::Null.convert(FieldType::Integer), Some(FieldValue::Null));
    }

    #[test]
    fn remap_by_name() {
        let target = Arc::new(
            LayerSchema::new("other")
                .with_field(FieldDefn::new("name", FieldType::String))
                .with_field(FieldDefn::new("extra", FieldType::Real))
                .with_geom_field(GeomFieldDefn::new("geom", GeometryType::POINT)),
        );
        let feature = Feature::new(schema())
            .with_fid(3)
            .with_field("name", "a")
            .with_geometry(Geometry::Point(Coord::xy(0.0, 0.0)));

        let remapped = feature.remap(target);
        assert_eq!(remapped.fid(), Some(3));
        assert_eq!(remapped.field("name"), Some(&FieldValue::from("a")));
        assert_eq!(remapped.field("extra"), Some(&FieldValue::Null));
        assert!(remapped.geometry().is_some());
    }
}
