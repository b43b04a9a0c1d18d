//! Exposed schema of a direct layer
//!
//! Implicit mode copies the source fields, minus the columns consumed by a
//! geometry encoding. Explicit mode exposes exactly the declared fields, each
//! read from a named source column. A plan built without a source is
//! "static": it only exists when the declaration is complete enough to
//! answer schema queries on its own.

use crate::derivation::GeometryStrategy;
use std::sync::Arc;
use vlayer_core::{Envelope, FieldDefn, GeomFieldDefn, LayerSchema, SpatialRef};
use vlayer_definition::{FieldSpec, GeometryEncoding, GeometryFieldSpec, LayerDefinition};
use vlayer_source::LayerError;

/// Derivation of one exposed geometry field
#[derive(Debug, Clone, PartialEq)]
pub struct GeometryPlan {
    pub strategy: GeometryStrategy,

    /// Declared extent, answered without touching the source
    pub extent: Option<Envelope>,
}

/// Resolved mapping between a direct layer and its source
#[derive(Debug, Clone)]
pub struct SchemaPlan {
    schema: Arc<LayerSchema>,

    /// Source column of each exposed field
    sources: Vec<String>,

    geometry: Vec<GeometryPlan>,
    explicit: bool,
    style_column: Option<String>,
}

impl SchemaPlan {
    /// Plan answerable from the declaration alone, if there is one
    ///
    /// Requires explicit fields with declared types, and either a non-spatial
    /// layer or explicit geometry fields each with a declared type and
    /// spatial reference.
    pub fn resolve_static(def: &LayerDefinition) -> Result<Option<SchemaPlan>, LayerError> {
        let Some(fields) = &def.fields else {
            return Ok(None);
        };
        if fields.iter().any(|f| f.field_type.is_none()) {
            return Ok(None);
        }
        let geometry_declared = def.is_non_spatial()
            || def.geometry_fields.as_ref().is_some_and(|specs| {
                specs.iter().enumerate().all(|(i, spec)| {
                    let has_type = spec.geometry_type.is_some()
                        || spec.encoding == GeometryEncoding::PointFromColumns;
                    let has_srs = spec.srs.is_some() || (i == 0 && def.srs.is_some());
                    has_type && has_srs
                })
            });
        if !geometry_declared {
            return Ok(None);
        }
        build(def, None).map(Some)
    }

    /// Plan against an opened source schema
    pub fn build(def: &LayerDefinition, source: &LayerSchema) -> Result<SchemaPlan, LayerError> {
        build(def, Some(source))
    }

    pub fn schema(&self) -> &Arc<LayerSchema> {
        &self.schema
    }

    /// Source column backing exposed field `index`
    pub fn source_column(&self, index: usize) -> Option<&str> {
        self.sources.get(index).map(String::as_str)
    }

    /// Source column of an exposed field looked up by name
    pub fn source_column_of(&self, name: &str) -> Option<&str> {
        self.schema
            .field_index(name)
            .and_then(|i| self.source_column(i))
    }

    /// Whether an exposed field reads a source column of the same name
    pub fn maps_one_to_one(&self, name: &str) -> bool {
        self.source_column_of(name)
            .is_some_and(|src| src.eq_ignore_ascii_case(name))
    }

    pub fn geometry(&self, index: usize) -> Option<&GeometryPlan> {
        self.geometry.get(index)
    }

    pub fn geometries(&self) -> &[GeometryPlan] {
        &self.geometry
    }

    pub fn is_explicit(&self) -> bool {
        self.explicit
    }

    pub fn fid_column(&self) -> Option<&str> {
        self.schema.fid_column.as_deref()
    }

    pub fn style_column(&self) -> Option<&str> {
        self.style_column.as_deref()
    }
}

fn parse_srs(layer: &str, text: Option<&str>) -> Result<Option<SpatialRef>, LayerError> {
    text.map(SpatialRef::parse)
        .transpose()
        .map_err(|e| LayerError::Definition(format!("layer '{}': {}", layer, e)))
}

fn missing_column(def: &LayerDefinition, column: &str) -> LayerError {
    LayerError::Definition(format!(
        "layer '{}': source has no column '{}'",
        def.name, column
    ))
}

fn build(def: &LayerDefinition, source: Option<&LayerSchema>) -> Result<SchemaPlan, LayerError> {
    let empty = LayerSchema::new("");
    let src = source.unwrap_or(&empty);

    let mut schema = LayerSchema::new(def.name.clone());
    let mut geometry = Vec::new();
    for (defn, plan) in geometry_fields(def, source)? {
        schema.geom_fields.push(defn);
        geometry.push(plan);
    }

    let mut sources = Vec::new();
    match &def.fields {
        Some(specs) => {
            for spec in specs {
                let column = spec.source_column();
                let src_defn = match source {
                    Some(source) => Some(
                        source
                            .find_field(column)
                            .ok_or_else(|| missing_column(def, column))?,
                    ),
                    None => None,
                };
                schema.fields.push(declared_field(def, spec, src_defn)?);
                sources.push(src_defn.map_or_else(|| column.to_string(), |f| f.name.clone()));
            }
        }
        None => {
            let hidden: Vec<&str> = def
                .geometry_fields
                .iter()
                .flatten()
                .filter(|spec| !spec.report_src_column)
                .flat_map(GeometryFieldSpec::consumed_columns)
                .collect();
            for field in &src.fields {
                if hidden.iter().any(|h| h.eq_ignore_ascii_case(&field.name)) {
                    continue;
                }
                schema.fields.push(field.clone());
                sources.push(field.name.clone());
            }
        }
    }

    if let (Some(source), Some(fid)) = (source, &def.fid) {
        if source.field_index(fid).is_none() {
            return Err(missing_column(def, fid));
        }
    }
    if let (Some(source), Some(style)) = (source, &def.style) {
        if source.field_index(style).is_none() {
            return Err(missing_column(def, style));
        }
    }
    schema.fid_column = def.fid.clone();

    if let Some(name) = schema.duplicate_name() {
        return Err(LayerError::Definition(format!(
            "layer '{}' exposes '{}' twice",
            def.name, name
        )));
    }

    Ok(SchemaPlan {
        schema: Arc::new(schema),
        sources,
        geometry,
        explicit: def.fields.is_some(),
        style_column: def.style.clone(),
    })
}

fn declared_field(
    def: &LayerDefinition,
    spec: &FieldSpec,
    source: Option<&FieldDefn>,
) -> Result<FieldDefn, LayerError> {
    let field_type = spec
        .field_type
        .or(source.map(|f| f.field_type))
        .ok_or_else(|| {
            LayerError::Definition(format!(
                "layer '{}': field '{}' needs a type",
                def.name, spec.name
            ))
        })?;
    let mut defn = match source {
        Some(src) => FieldDefn {
            name: spec.name.clone(),
            field_type,
            ..src.clone()
        },
        None => FieldDefn::new(spec.name.clone(), field_type),
    };
    if spec.field_type.is_some_and(|t| Some(t) != source.map(|f| f.field_type)) {
        defn.width = 0;
        defn.precision = 0;
    }
    if let Some(subtype) = spec.subtype {
        defn.subtype = subtype;
    }
    if let Some(width) = spec.width {
        defn.width = width;
    }
    if let Some(precision) = spec.precision {
        defn.precision = precision;
    }
    if let Some(nullable) = spec.nullable {
        defn.nullable = nullable;
    }
    if let Some(unique) = spec.unique {
        defn.unique = unique;
    }
    if spec.default.is_some() {
        defn.default = spec.default.clone();
    }
    if spec.alternative_name.is_some() {
        defn.alternative_name = spec.alternative_name.clone();
    }
    if spec.comment.is_some() {
        defn.comment = spec.comment.clone();
    }
    Ok(defn)
}

fn geometry_fields(
    def: &LayerDefinition,
    source: Option<&LayerSchema>,
) -> Result<Vec<(GeomFieldDefn, GeometryPlan)>, LayerError> {
    if def.is_non_spatial() {
        return Ok(Vec::new());
    }
    let empty = LayerSchema::new("");
    let src = source.unwrap_or(&empty);
    let layer_srs = parse_srs(&def.name, def.srs.as_deref())?;

    let Some(specs) = &def.geometry_fields else {
        // Implicit: every source geometry field, layer overrides on the first
        return Ok(src
            .geom_fields
            .iter()
            .enumerate()
            .map(|(i, field)| {
                let mut defn = field.clone();
                if i == 0 {
                    if let Some(t) = def.geometry_type {
                        defn.geometry_type = t;
                    }
                    if layer_srs.is_some() {
                        defn.srs = layer_srs.clone();
                    }
                }
                let plan = GeometryPlan {
                    strategy: GeometryStrategy::Direct { index: Some(i) },
                    extent: if i == 0 { def.extent } else { None },
                };
                (defn, plan)
            })
            .collect());
    };

    let mut out = Vec::with_capacity(specs.len());
    for (i, spec) in specs.iter().enumerate() {
        let strategy = GeometryStrategy::from_spec(spec, i, src);
        if let Some(source) = source {
            strategy.check_source(source)?;
            if let (GeometryStrategy::Direct { index: None }, Some(name)) =
                (&strategy, &spec.src_field)
            {
                return Err(LayerError::Definition(format!(
                    "layer '{}': source has no geometry field '{}'",
                    def.name, name
                )));
            }
        }
        let direct_source = match strategy {
            GeometryStrategy::Direct { index } => index.and_then(|i| src.geom_fields.get(i)),
            _ => None,
        };

        let geometry_type = spec
            .geometry_type
            .or(if i == 0 { def.geometry_type } else { None })
            .unwrap_or_else(|| strategy.inferred_type(src));
        let srs = match parse_srs(&def.name, spec.srs.as_deref())? {
            Some(srs) => Some(srs),
            None if i == 0 && layer_srs.is_some() => layer_srs.clone(),
            None => match direct_source {
                Some(field) => field.srs.clone(),
                None => src.srs().cloned(),
            },
        };
        let name = match (spec.name.is_empty(), direct_source) {
            (true, Some(field)) => field.name.clone(),
            _ => spec.name.clone(),
        };

        let mut defn = GeomFieldDefn::new(name, geometry_type).with_srs(srs);
        defn.nullable = spec.nullable;
        defn.precision = spec.precision;
        let plan = GeometryPlan {
            strategy,
            extent: spec.extent.or(if i == 0 { def.extent } else { None }),
        };
        out.push((defn, plan));
    }
    Ok(out)
}
