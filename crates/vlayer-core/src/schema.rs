//! Layer schema types
//!
//! Field names are case preserving; every lookup is case-insensitive.

use crate::srs::SpatialRef;
use serde::{Deserialize, Serialize};

/// Attribute field types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    /// 32-bit integer
    #[serde(alias = "int")]
    Integer,

    /// 64-bit integer
    #[serde(alias = "int64", alias = "bigint")]
    Integer64,

    /// Floating point
    #[serde(alias = "double", alias = "float")]
    Real,

    /// Text
    #[serde(alias = "text")]
    String,

    /// Raw bytes
    Binary,

    /// Date (no time component), kept as ISO text
    Date,

    /// Time of day, kept as ISO text
    Time,

    /// Timestamp, kept as ISO text
    #[serde(alias = "timestamp")]
    DateTime,
}

impl FieldType {
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Integer | Self::Integer64 | Self::Real)
    }

    /// Widest type able to hold values of both, if they are compatible
    pub fn common_type(a: FieldType, b: FieldType) -> Option<FieldType> {
        match (a, b) {
            (a, b) if a == b => Some(a),
            (Self::Integer, Self::Integer64) | (Self::Integer64, Self::Integer) => {
                Some(Self::Integer64)
            }
            (a, b) if a.is_numeric() && b.is_numeric() => Some(Self::Real),
            _ => None,
        }
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Integer => "Integer",
            Self::Integer64 => "Integer64",
            Self::Real => "Real",
            Self::String => "String",
            Self::Binary => "Binary",
            Self::Date => "Date",
            Self::Time => "Time",
            Self::DateTime => "DateTime",
        };
        write!(f, "{}", name)
    }
}

/// Refinement of a field type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldSubType {
    #[default]
    None,
    Boolean,
    Int16,
    Float32,
    Json,
    Uuid,
}

/// Base geometry kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GeometryKind {
    Unknown,
    Point,
    LineString,
    Polygon,
    MultiPoint,
    MultiLineString,
    MultiPolygon,
    GeometryCollection,
    /// Non-spatial
    None,
}

impl GeometryKind {
    fn name(&self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::Point => "Point",
            Self::LineString => "LineString",
            Self::Polygon => "Polygon",
            Self::MultiPoint => "MultiPoint",
            Self::MultiLineString => "MultiLineString",
            Self::MultiPolygon => "MultiPolygon",
            Self::GeometryCollection => "GeometryCollection",
            Self::None => "None",
        }
    }
}

/// Declared geometry type of a geometry field
///
/// Parses both the `wkbPoint25D` style and the `Point Z` style spellings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GeometryType {
    pub kind: GeometryKind,
    pub has_z: bool,
    pub has_m: bool,
}

impl GeometryType {
    pub const UNKNOWN: GeometryType = GeometryType::flat(GeometryKind::Unknown);
    pub const NONE: GeometryType = GeometryType::flat(GeometryKind::None);
    pub const POINT: GeometryType = GeometryType::flat(GeometryKind::Point);
    pub const LINE_STRING: GeometryType = GeometryType::flat(GeometryKind::LineString);
    pub const POLYGON: GeometryType = GeometryType::flat(GeometryKind::Polygon);
    pub const MULTI_POLYGON: GeometryType = GeometryType::flat(GeometryKind::MultiPolygon);

    /// Two-dimensional type of the given kind
    pub const fn flat(kind: GeometryKind) -> Self {
        Self {
            kind,
            has_z: false,
            has_m: false,
        }
    }

    pub fn with_z(mut self, has_z: bool) -> Self {
        self.has_z = has_z;
        self
    }

    pub fn with_m(mut self, has_m: bool) -> Self {
        self.has_m = has_m;
        self
    }

    pub fn is_none(&self) -> bool {
        self.kind == GeometryKind::None
    }

    pub fn is_unknown(&self) -> bool {
        self.kind == GeometryKind::Unknown
    }

    /// Type able to describe geometries of both types
    pub fn merge(&self, other: &GeometryType) -> GeometryType {
        if self == other {
            return *self;
        }
        if self.kind == other.kind {
            return GeometryType {
                kind: self.kind,
                has_z: self.has_z || other.has_z,
                has_m: self.has_m || other.has_m,
            };
        }
        GeometryType::UNKNOWN
            .with_z(self.has_z || other.has_z)
            .with_m(self.has_m || other.has_m)
    }

    /// Parse a geometry type name
    pub fn parse(text: &str) -> Option<GeometryType> {
        let mut name = text.trim().to_ascii_lowercase().replace([' ', '_'], "");
        if let Some(stripped) = name.strip_prefix("wkb") {
            name = stripped.to_string();
        }

        let mut has_z = false;
        let mut has_m = false;
        if let Some(stripped) = name.strip_suffix("25d") {
            name = stripped.to_string();
            has_z = true;
        } else if let Some(stripped) = name.strip_suffix("zm") {
            name = stripped.to_string();
            has_z = true;
            has_m = true;
        } else if let Some(stripped) = name.strip_suffix('z') {
            name = stripped.to_string();
            has_z = true;
        } else if let Some(stripped) = name.strip_suffix('m') {
            // "geometrycollectionm" is fine, but "none"/"unknown" never end in m
            name = stripped.to_string();
            has_m = true;
        }

        let kind = match name.as_str() {
            "unknown" | "geometry" => GeometryKind::Unknown,
            "point" => GeometryKind::Point,
            "linestring" => GeometryKind::LineString,
            "polygon" => GeometryKind::Polygon,
            "multipoint" => GeometryKind::MultiPoint,
            "multilinestring" => GeometryKind::MultiLineString,
            "multipolygon" => GeometryKind::MultiPolygon,
            "geometrycollection" => GeometryKind::GeometryCollection,
            "none" => GeometryKind::None,
            _ => return None,
        };

        Some(GeometryType { kind, has_z, has_m })
    }
}

impl std::fmt::Display for GeometryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind.name())?;
        match (self.has_z, self.has_m) {
            (true, true) => write!(f, " ZM"),
            (true, false) => write!(f, " Z"),
            (false, true) => write!(f, " M"),
            (false, false) => Ok(()),
        }
    }
}

impl TryFrom<String> for GeometryType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        GeometryType::parse(&value).ok_or_else(|| format!("unknown geometry type '{}'", value))
    }
}

impl From<GeometryType> for String {
    fn from(value: GeometryType) -> Self {
        value.to_string()
    }
}

/// Coordinate precision metadata; `None` means unspecified
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CoordinatePrecision {
    #[serde(default)]
    pub xy: Option<f64>,
    #[serde(default)]
    pub z: Option<f64>,
    #[serde(default)]
    pub m: Option<f64>,
}

impl CoordinatePrecision {
    pub fn is_unspecified(&self) -> bool {
        self.xy.is_none() && self.z.is_none() && self.m.is_none()
    }
}

fn default_true() -> bool {
    true
}

/// An attribute field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDefn {
    /// Field name
    pub name: String,

    /// Field type
    #[serde(rename = "type")]
    pub field_type: FieldType,

    /// Type refinement
    #[serde(default)]
    pub subtype: FieldSubType,

    /// Display name shown instead of `name` by some clients
    #[serde(default)]
    pub alternative_name: Option<String>,

    /// Free-form description
    #[serde(default)]
    pub comment: Option<String>,

    /// Width, 0 when unspecified
    #[serde(default)]
    pub width: u32,

    /// Decimal precision, 0 when unspecified
    #[serde(default)]
    pub precision: u32,

    #[serde(default = "default_true")]
    pub nullable: bool,

    #[serde(default)]
    pub unique: bool,

    /// Default value expression
    #[serde(default)]
    pub default: Option<String>,
}

impl FieldDefn {
    /// Create a nullable field with no width or precision
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            subtype: FieldSubType::None,
            alternative_name: None,
            comment: None,
            width: 0,
            precision: 0,
            nullable: true,
            unique: false,
            default: None,
        }
    }

    /// Set nullability
    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    /// Set width and precision
    pub fn with_width(mut self, width: u32, precision: u32) -> Self {
        self.width = width;
        self.precision = precision;
        self
    }

    pub fn with_subtype(mut self, subtype: FieldSubType) -> Self {
        self.subtype = subtype;
        self
    }
}

/// A geometry field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeomFieldDefn {
    /// Field name, may be empty for a single anonymous geometry
    #[serde(default)]
    pub name: String,

    #[serde(default = "GeomFieldDefn::default_type")]
    pub geometry_type: GeometryType,

    #[serde(default)]
    pub srs: Option<SpatialRef>,

    #[serde(default = "default_true")]
    pub nullable: bool,

    #[serde(default)]
    pub precision: CoordinatePrecision,
}

impl GeomFieldDefn {
    pub fn new(name: impl Into<String>, geometry_type: GeometryType) -> Self {
        Self {
            name: name.into(),
            geometry_type,
            srs: None,
            nullable: true,
            precision: CoordinatePrecision::default(),
        }
    }

    pub fn with_srs(mut self, srs: Option<SpatialRef>) -> Self {
        self.srs = srs;
        self
    }

    fn default_type() -> GeometryType {
        GeometryType::UNKNOWN
    }
}

/// Schema of a layer: attribute fields, geometry fields and FID column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerSchema {
    /// Layer name
    pub name: String,

    /// Ordered attribute fields
    #[serde(default)]
    pub fields: Vec<FieldDefn>,

    /// Ordered geometry fields
    #[serde(default)]
    pub geom_fields: Vec<GeomFieldDefn>,

    /// Column the feature ids come from, if any
    #[serde(default)]
    pub fid_column: Option<String>,
}

impl LayerSchema {
    /// Create an empty schema
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            geom_fields: Vec::new(),
            fid_column: None,
        }
    }

    /// Add an attribute field
    pub fn with_field(mut self, field: FieldDefn) -> Self {
        self.fields.push(field);
        self
    }

    /// Add a geometry field
    pub fn with_geom_field(mut self, field: GeomFieldDefn) -> Self {
        self.geom_fields.push(field);
        self
    }

    /// Find an attribute field index by name
    ///
    /// An exact match wins over a case-insensitive one, so `id` and `ID`
    /// stay distinct when a source carries both.
    pub fn field_index(&self, name: &str) -> Option<usize> {
        lookup(self.fields.iter().map(|f| f.name.as_str()), name)
    }

    /// Find an attribute field by name
    pub fn find_field(&self, name: &str) -> Option<&FieldDefn> {
        self.field_index(name).map(|i| &self.fields[i])
    }

    /// Find a geometry field index by name
    pub fn geom_field_index(&self, name: &str) -> Option<usize> {
        lookup(self.geom_fields.iter().map(|f| f.name.as_str()), name)
    }

    /// Get field names
    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    /// Type of the first geometry field, or `None` for non-spatial layers
    pub fn geometry_type(&self) -> GeometryType {
        self.geom_fields
            .first()
            .map(|g| g.geometry_type)
            .unwrap_or(GeometryType::NONE)
    }

    /// Spatial reference of the first geometry field
    pub fn srs(&self) -> Option<&SpatialRef> {
        self.geom_fields.first().and_then(|g| g.srs.as_ref())
    }

    /// First attribute or geometry field name that repeats after case folding
    pub fn duplicate_name(&self) -> Option<&str> {
        find_duplicate(self.fields.iter().map(|f| f.name.as_str()))
            .or_else(|| find_duplicate(self.geom_fields.iter().map(|g| g.name.as_str())))
    }
}

fn lookup<'a>(names: impl Iterator<Item = &'a str> + Clone, name: &str) -> Option<usize> {
    names
        .clone()
        .position(|n| n == name)
        .or_else(|| names.into_iter().position(|n| n.eq_ignore_ascii_case(name)))
}

/// First name that repeats case-insensitively
pub fn find_duplicate<'a>(names: impl IntoIterator<Item = &'a str>) -> Option<&'a str> {
    let mut seen = std::collections::HashSet::new();
    names
        .into_iter()
        .find(|name| !seen.insert(name.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn geometry_type_parsing() {
        assert_eq!(GeometryType::parse("wkbPoint"), Some(GeometryType::POINT));
        assert_eq!(
            GeometryType::parse("wkbPoint25D"),
            Some(GeometryType::POINT.with_z(true))
        );
        assert_eq!(
            GeometryType::parse("Point ZM"),
            Some(GeometryType::POINT.with_z(true).with_m(true))
        );
        assert_eq!(
            GeometryType::parse("MultiPolygonM"),
            Some(GeometryType::MULTI_POLYGON.with_m(true))
        );
        assert_eq!(GeometryType::parse("wkbNone"), Some(GeometryType::NONE));
        assert_eq!(GeometryType::parse("hexagon"), None);
    }

    #[test]
    fn geometry_type_display_and_merge() {
        assert_eq!(GeometryType::POINT.with_z(true).to_string(), "Point Z");
        assert_eq!(GeometryType::POINT.merge(&GeometryType::POINT), GeometryType::POINT);
        assert_eq!(
            GeometryType::POINT.merge(&GeometryType::POLYGON),
            GeometryType::UNKNOWN
        );
    }

    #[test]
    fn field_lookup_is_case_insensitive() {
        let schema = LayerSchema::new("poi")
            .with_field(FieldDefn::new("Name", FieldType::String))
            .with_field(FieldDefn::new("id", FieldType::Integer));

        assert_eq!(schema.field_index("name"), Some(0));
        assert_eq!(schema.field_index("ID"), Some(1));
        assert!(schema.find_field("missing").is_none());
        assert_eq!(schema.field_names(), vec!["Name", "id"]);
        assert_eq!(schema.geometry_type(), GeometryType::NONE);
    }

    #[test]
    fn exact_case_lookup_wins() {
        let schema = LayerSchema::new("t")
            .with_field(FieldDefn::new("id", FieldType::String))
            .with_field(FieldDefn::new("ID", FieldType::String))
            .with_field(FieldDefn::new("Name", FieldType::String));

        assert_eq!(schema.field_index("id"), Some(0));
        assert_eq!(schema.field_index("ID"), Some(1));
        assert_eq!(schema.field_index("Id"), Some(0));
        assert_eq!(schema.field_index("name"), Some(2));
    }

    #[test]
    fn duplicate_names_after_case_folding() {
        let schema = LayerSchema::new("dup")
            .with_field(FieldDefn::new("foo", FieldType::String))
            .with_field(FieldDefn::new("FOO", FieldType::String));
        assert_eq!(schema.duplicate_name(), Some("FOO"));
    }

    #[test]
    fn common_field_types() {
        assert_eq!(
            FieldType::common_type(FieldType::Integer, FieldType::Real),
            Some(FieldType::Real)
        );
        assert_eq!(
            FieldType::common_type(FieldType::Integer, FieldType::Integer64),
            Some(FieldType::Integer64)
        );
        assert_eq!(FieldType::common_type(FieldType::String, FieldType::Real), None);
    }

    #[test]
    fn field_defn_deserializes_with_defaults() {
        let field: FieldDefn = serde_json::from_str(r#"{"name": "val", "type": "int"}"#).unwrap();
        assert_eq!(field.field_type, FieldType::Integer);
        assert!(field.nullable);
        assert!(!field.unique);
    }
}
