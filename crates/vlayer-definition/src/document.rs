//! Definition document model
//!
//! A definition lists layer nodes. Each node is a direct (possibly derived)
//! layer over one source layer, a warped layer reprojecting another node, or
//! a union of several nodes.
//!
//! ```toml
//! [[layers]]
//! kind = "direct"
//! name = "stations"
//! source = { locator = "stations.json", relative = true }
//! geometry_fields = [{ encoding = "point_from_columns", x = "lon", y = "lat", srs = "EPSG:4326" }]
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use vlayer_core::{CoordinatePrecision, Envelope, FieldSubType, FieldType, GeometryType};

fn default_true() -> bool {
    true
}

/// Root of a definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefinitionDocument {
    #[serde(default)]
    pub layers: Vec<LayerNode>,
}

impl DefinitionDocument {
    /// Load from a file; `.toml` files are read as TOML, everything else as JSON
    pub fn from_file(path: &Path) -> Result<Self, DefinitionError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| DefinitionError::IoError(path.display().to_string(), e.to_string()))?;

        let is_toml = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
        if is_toml {
            Self::from_toml(&contents)
        } else {
            Self::from_json(&contents)
        }
    }

    pub fn from_json(json: &str) -> Result<Self, DefinitionError> {
        serde_json::from_str(json).map_err(|e| DefinitionError::ParseError(e.to_string()))
    }

    pub fn from_toml(text: &str) -> Result<Self, DefinitionError> {
        toml::from_str(text).map_err(|e| DefinitionError::ParseError(e.to_string()))
    }

    /// Top-level layer by name, case-insensitive
    pub fn layer(&self, name: &str) -> Option<&LayerNode> {
        self.layers
            .iter()
            .find(|node| node.name().eq_ignore_ascii_case(name))
    }

    pub fn layer_names(&self) -> Vec<&str> {
        self.layers.iter().map(LayerNode::name).collect()
    }
}

/// Whether a locator is an inline definition rather than a path or name
pub fn is_inline_definition(locator: &str) -> bool {
    locator.trim_start().starts_with('{')
}

/// Whether a locator names a definition file
pub fn is_definition_path(locator: &str) -> bool {
    let lower = locator.to_ascii_lowercase();
    lower.ends_with(".vrt.json") || lower.ends_with(".vrt.toml")
}

/// One layer of a definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LayerNode {
    Direct(LayerDefinition),
    Warped(WarpedDefinition),
    Union(UnionDefinition),
}

impl LayerNode {
    /// Exposed name; a warped layer without its own name takes its inner layer's
    pub fn name(&self) -> &str {
        match self {
            Self::Direct(def) => &def.name,
            Self::Warped(def) => def.name.as_deref().unwrap_or_else(|| def.layer.name()),
            Self::Union(def) => &def.name,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Direct(_) => "direct",
            Self::Warped(_) => "warped",
            Self::Union(_) => "union",
        }
    }
}

/// A layer over one source layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerDefinition {
    pub name: String,

    pub source: SourceDescriptor,

    /// `None` passes every source geometry field through; an empty list makes
    /// the layer non-spatial
    #[serde(default)]
    pub geometry_fields: Option<Vec<GeometryFieldSpec>>,

    /// Type of the implicit first geometry field; `none` makes the layer non-spatial
    #[serde(default)]
    pub geometry_type: Option<GeometryType>,

    /// Spatial reference of the implicit first geometry field
    #[serde(default)]
    pub srs: Option<String>,

    /// Extent of the implicit first geometry field
    #[serde(default)]
    pub extent: Option<Envelope>,

    /// `None` passes every source field through
    #[serde(default)]
    pub fields: Option<Vec<FieldSpec>>,

    /// Source column holding feature ids
    #[serde(default)]
    pub fid: Option<String>,

    /// Source column holding the style string
    #[serde(default)]
    pub style: Option<String>,

    #[serde(default)]
    pub region: Option<RegionSpec>,

    /// Answered by `feature_count` while no filter is installed
    #[serde(default)]
    pub feature_count: Option<u64>,
}

impl LayerDefinition {
    /// Minimal definition over a source
    pub fn new(name: impl Into<String>, source: SourceDescriptor) -> Self {
        Self {
            name: name.into(),
            source,
            geometry_fields: None,
            geometry_type: None,
            srs: None,
            extent: None,
            fields: None,
            fid: None,
            style: None,
            region: None,
            feature_count: None,
        }
    }

    /// Whether the layer declares itself non-spatial
    pub fn is_non_spatial(&self) -> bool {
        matches!(&self.geometry_fields, Some(specs) if specs.is_empty())
            || self.geometry_type.is_some_and(|t| t.is_none())
    }
}

/// Where a layer's features come from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    /// Path, registered name, or inline definition text starting with `{`
    pub locator: String,

    /// Named layer of the source; the first layer when absent
    #[serde(default)]
    pub layer: Option<String>,

    /// Statement executed by the source instead of naming a layer
    #[serde(default)]
    pub sql: Option<String>,

    /// The opened source may be reused by other layers
    #[serde(default)]
    pub shared: bool,

    /// Resolve the locator against the defining document's directory
    #[serde(default)]
    pub relative: bool,
}

impl SourceDescriptor {
    pub fn new(locator: impl Into<String>) -> Self {
        Self {
            locator: locator.into(),
            layer: None,
            sql: None,
            shared: false,
            relative: false,
        }
    }

    pub fn with_layer(mut self, layer: impl Into<String>) -> Self {
        self.layer = Some(layer.into());
        self
    }

    pub fn shared(mut self) -> Self {
        self.shared = true;
        self
    }

    /// Locator with relative paths joined onto `base`
    pub fn resolve(&self, base: Option<&Path>) -> String {
        if !self.relative || is_inline_definition(&self.locator) {
            return self.locator.clone();
        }
        let path = PathBuf::from(&self.locator);
        match base {
            Some(base) if path.is_relative() => base.join(path).display().to_string(),
            _ => self.locator.clone(),
        }
    }
}

/// How a geometry field is derived
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeometryEncoding {
    /// Source geometry field as-is
    #[default]
    Direct,
    Wkt,
    Wkb,
    Shape,
    PointFromColumns,
}

/// Declared geometry field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeometryFieldSpec {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub encoding: GeometryEncoding,

    /// Column holding WKT, WKB or shape data
    #[serde(default)]
    pub field: Option<String>,

    /// Source geometry field for the direct encoding
    #[serde(default)]
    pub src_field: Option<String>,

    #[serde(default)]
    pub x: Option<String>,
    #[serde(default)]
    pub y: Option<String>,
    #[serde(default)]
    pub z: Option<String>,
    #[serde(default)]
    pub m: Option<String>,

    /// Keep the consumed source columns visible
    #[serde(default)]
    pub report_src_column: bool,

    /// Inferred from the source when absent
    #[serde(default)]
    pub geometry_type: Option<GeometryType>,

    /// Inherited from the source when absent
    #[serde(default)]
    pub srs: Option<String>,

    #[serde(default = "default_true")]
    pub nullable: bool,

    #[serde(default)]
    pub extent: Option<Envelope>,

    #[serde(default)]
    pub precision: CoordinatePrecision,
}

impl GeometryFieldSpec {
    pub fn new(name: impl Into<String>, encoding: GeometryEncoding) -> Self {
        Self {
            name: name.into(),
            encoding,
            field: None,
            src_field: None,
            x: None,
            y: None,
            z: None,
            m: None,
            report_src_column: false,
            geometry_type: None,
            srs: None,
            nullable: true,
            extent: None,
            precision: CoordinatePrecision::default(),
        }
    }

    /// Point built from coordinate columns
    pub fn point_from_columns(name: impl Into<String>, x: &str, y: &str) -> Self {
        Self {
            x: Some(x.to_string()),
            y: Some(y.to_string()),
            ..Self::new(name, GeometryEncoding::PointFromColumns)
        }
    }

    /// Geometry decoded from one column
    pub fn encoded(name: impl Into<String>, encoding: GeometryEncoding, field: &str) -> Self {
        Self {
            field: Some(field.to_string()),
            ..Self::new(name, encoding)
        }
    }

    /// Source columns consumed by the encoding
    pub fn consumed_columns(&self) -> Vec<&str> {
        match self.encoding {
            GeometryEncoding::Direct => Vec::new(),
            GeometryEncoding::Wkt | GeometryEncoding::Wkb | GeometryEncoding::Shape => {
                self.field.as_deref().into_iter().collect()
            }
            GeometryEncoding::PointFromColumns => [&self.x, &self.y, &self.z, &self.m]
                .into_iter()
                .filter_map(|c| c.as_deref())
                .collect(),
        }
    }
}

/// Declared attribute field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,

    #[serde(default)]
    pub alternative_name: Option<String>,

    #[serde(default)]
    pub comment: Option<String>,

    /// Source column; defaults to `name`
    #[serde(default)]
    pub src: Option<String>,

    /// Type; the source column's type when absent
    #[serde(default, rename = "type")]
    pub field_type: Option<FieldType>,

    #[serde(default)]
    pub subtype: Option<FieldSubType>,

    #[serde(default)]
    pub width: Option<u32>,

    #[serde(default)]
    pub precision: Option<u32>,

    #[serde(default)]
    pub nullable: Option<bool>,

    #[serde(default)]
    pub unique: Option<bool>,

    #[serde(default)]
    pub default: Option<String>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alternative_name: None,
            comment: None,
            src: None,
            field_type: None,
            subtype: None,
            width: None,
            precision: None,
            nullable: None,
            unique: None,
            default: None,
        }
    }

    pub fn with_src(mut self, src: impl Into<String>) -> Self {
        self.src = Some(src.into());
        self
    }

    pub fn with_type(mut self, field_type: FieldType) -> Self {
        self.field_type = Some(field_type);
        self
    }

    /// Column read from the source
    pub fn source_column(&self) -> &str {
        self.src.as_deref().unwrap_or(&self.name)
    }
}

/// Polygon limiting the source features
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionSpec {
    pub wkt: String,

    /// Replace geometries with their intersection with the region
    #[serde(default)]
    pub clip: bool,
}

/// A layer reprojecting one geometry field of another layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarpedDefinition {
    #[serde(default)]
    pub name: Option<String>,

    pub layer: Box<LayerNode>,

    /// Required; kept optional so a missing value is reported by validation
    #[serde(default)]
    pub target_srs: Option<String>,

    /// Overrides the inner layer's spatial reference
    #[serde(default)]
    pub source_srs: Option<String>,

    /// Geometry field to reproject; the first one when absent
    #[serde(default)]
    pub warped_field: Option<String>,

    /// Takes precedence over the computed extent
    #[serde(default)]
    pub extent: Option<Envelope>,
}

/// Field reconciliation of a union layer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldStrategy {
    /// Every field of every layer
    #[default]
    Union,
    /// Fields present in every layer with compatible types
    Intersection,
    /// Fields of the first layer
    FirstLayer,
    /// Fields declared in the definition
    Explicit,
}

/// Declared geometry field of a union layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnionGeometryField {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub geometry_type: Option<GeometryType>,

    #[serde(default)]
    pub srs: Option<String>,

    #[serde(default)]
    pub extent: Option<Envelope>,
}

/// A layer concatenating several layers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnionDefinition {
    pub name: String,

    #[serde(default)]
    pub layers: Vec<LayerNode>,

    /// Explicit when absent and fields are declared, union otherwise
    #[serde(default)]
    pub field_strategy: Option<FieldStrategy>,

    #[serde(default)]
    pub fields: Option<Vec<FieldSpec>>,

    #[serde(default)]
    pub geometry_fields: Option<Vec<UnionGeometryField>>,

    /// Type of the first geometry field
    #[serde(default)]
    pub geometry_type: Option<GeometryType>,

    /// Spatial reference of the first geometry field
    #[serde(default)]
    pub srs: Option<String>,

    /// Extent of the first geometry field
    #[serde(default)]
    pub extent: Option<Envelope>,

    /// Name of the provenance field, absent for none
    #[serde(default)]
    pub source_layer_field: Option<String>,

    /// Expose inner feature ids unchanged
    #[serde(default)]
    pub preserve_src_fid: bool,

    #[serde(default)]
    pub feature_count: Option<u64>,
}

impl UnionDefinition {
    pub fn new(name: impl Into<String>, layers: Vec<LayerNode>) -> Self {
        Self {
            name: name.into(),
            layers,
            field_strategy: None,
            fields: None,
            geometry_fields: None,
            geometry_type: None,
            srs: None,
            extent: None,
            source_layer_field: None,
            preserve_src_fid: false,
            feature_count: None,
        }
    }

    pub fn effective_strategy(&self) -> FieldStrategy {
        match self.field_strategy {
            Some(strategy) => strategy,
            None if self.fields.is_some() || self.geometry_fields.is_some() => {
                FieldStrategy::Explicit
            }
            None => FieldStrategy::Union,
        }
    }
}

/// Definition loading and validation errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DefinitionError {
    #[error("Failed to read definition {0}: {1}")]
    IoError(String, String),

    #[error("Failed to parse definition: {0}")]
    ParseError(String),

    #[error("Layer '{layer}': missing required attribute '{attribute}'")]
    MissingAttribute { layer: String, attribute: String },

    #[error("Layer '{layer}': {message}")]
    Invalid { layer: String, message: String },

    #[error("Duplicate name '{name}' in {scope}")]
    DuplicateName { scope: String, name: String },
}

impl DefinitionError {
    pub(crate) fn invalid(layer: &str, message: impl Into<String>) -> Self {
        Self::Invalid {
            layer: layer.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn missing(layer: &str, attribute: &str) -> Self {
        Self::MissingAttribute {
            layer: layer.to_string(),
            attribute: attribute.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_json_nodes() {
        let doc = DefinitionDocument::from_json(
            r#"{"layers": [
                {"kind": "direct", "name": "pts", "source": {"locator": "pts.json"},
                 "geometry_fields": [{"encoding": "point_from_columns", "x": "lon", "y": "lat"}]},
                {"kind": "warped", "target_srs": "EPSG:3857",
                 "layer": {"kind": "direct", "name": "inner", "source": {"locator": "a.json"}}},
                {"kind": "union", "name": "all", "fields": [{"name": "id", "type": "integer"}],
                 "layers": []}
            ]}"#,
        )
        .unwrap();

        assert_eq!(doc.layer_names(), vec!["pts", "inner", "all"]);
        let LayerNode::Direct(direct) = &doc.layers[0] else {
            panic!("expected a direct layer");
        };
        let spec = &direct.geometry_fields.as_ref().unwrap()[0];
        assert_eq!(spec.consumed_columns(), vec!["lon", "lat"]);
        assert!(spec.nullable);
        assert!(!spec.report_src_column);

        let LayerNode::Union(union) = &doc.layers[2] else {
            panic!("expected a union layer");
        };
        assert_eq!(union.effective_strategy(), FieldStrategy::Explicit);
    }

    #[test]
    fn parses_toml_nodes() {
        let doc = DefinitionDocument::from_toml(
            r#"
            [[layers]]
            kind = "direct"
            name = "roads"
            geometry_type = "LineString"
            srs = "EPSG:4326"
            source = { locator = "roads.json", layer = "roads", shared = true }
            fields = [{ name = "ref", src = "road_ref", type = "string" }]
            "#,
        )
        .unwrap();

        let LayerNode::Direct(def) = &doc.layers[0] else {
            panic!("expected a direct layer");
        };
        assert_eq!(def.geometry_type, Some(GeometryType::LINE_STRING));
        assert!(def.source.shared);
        assert_eq!(def.fields.as_ref().unwrap()[0].source_column(), "road_ref");
    }

    #[test]
    fn resolves_relative_locators() {
        let mut source = SourceDescriptor::new("data/pts.json");
        assert_eq!(source.resolve(Some(Path::new("/defs"))), "data/pts.json");

        source.relative = true;
        assert_eq!(
            source.resolve(Some(Path::new("/defs"))),
            Path::new("/defs").join("data/pts.json").display().to_string()
        );

        let inline = SourceDescriptor {
            relative: true,
            ..SourceDescriptor::new("{\"layers\": []}")
        };
        assert_eq!(inline.resolve(Some(Path::new("/defs"))), inline.locator);
    }

    #[test]
    fn non_spatial_declarations() {
        let mut def = LayerDefinition::new("t", SourceDescriptor::new("x.json"));
        assert!(!def.is_non_spatial());
        def.geometry_type = Some(GeometryType::NONE);
        assert!(def.is_non_spatial());
    }
}
