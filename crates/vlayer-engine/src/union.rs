//! Union layers
//!
//! A union layer concatenates the feature streams of its inner layers in
//! declared order and exposes one reconciled schema. Filters that every inner
//! layer understands are pushed down to each of them; anything else is
//! evaluated on the concatenated stream.

use crate::guard::OpenContext;
use crate::layer::Layer;
use crate::translator::SpatialQuery;
use std::sync::Arc;
use vlayer_core::{
    Diagnostic, DiagnosticCode, DiagnosticLog, Envelope, Feature, FieldDefn, FieldType,
    GeomFieldDefn, Geometry, GeometryType, LayerSchema, Location, SpatialRef,
};
use vlayer_definition::{FieldSpec, FieldStrategy, UnionDefinition};
use vlayer_filter::CompiledFilter;
use vlayer_source::{Capabilities, FeatureLayer, LayerError};

fn invalid(name: &str, message: impl std::fmt::Display) -> LayerError {
    LayerError::Definition(format!("union layer '{}': {}", name, message))
}

fn parse_srs(name: &str, text: &str) -> Result<SpatialRef, LayerError> {
    SpatialRef::parse(text).map_err(|e| invalid(name, e))
}

/// First field of each name across all layers; conflicting types widen
fn union_fields(schemas: &[Arc<LayerSchema>]) -> Vec<FieldDefn> {
    let mut fields: Vec<FieldDefn> = Vec::new();
    for schema in schemas {
        for field in &schema.fields {
            match fields
                .iter_mut()
                .find(|f| f.name.eq_ignore_ascii_case(&field.name))
            {
                Some(existing) if existing.field_type != field.field_type => {
                    existing.field_type =
                        FieldType::common_type(existing.field_type, field.field_type)
                            .unwrap_or(FieldType::String);
                }
                Some(_) => {}
                None => fields.push(field.clone()),
            }
        }
    }
    fields
}

/// Fields of the first layer present with a compatible type in every layer
fn intersection_fields(schemas: &[Arc<LayerSchema>]) -> Vec<FieldDefn> {
    let Some((first, rest)) = schemas.split_first() else {
        return Vec::new();
    };
    first
        .fields
        .iter()
        .filter_map(|field| {
            let mut field_type = field.field_type;
            for schema in rest {
                let other = schema.find_field(&field.name)?;
                field_type = FieldType::common_type(field_type, other.field_type)?;
            }
            let mut field = field.clone();
            field.field_type = field_type;
            Some(field)
        })
        .collect()
}

fn declared_field(spec: &FieldSpec, schemas: &[Arc<LayerSchema>]) -> FieldDefn {
    let inherited = schemas
        .iter()
        .find_map(|s| s.find_field(&spec.name).cloned());
    let field_type = spec
        .field_type
        .or(inherited.as_ref().map(|f| f.field_type))
        .unwrap_or(FieldType::String);
    let mut field = match inherited {
        Some(mut field) if field.field_type == field_type => {
            field.name = spec.name.clone();
            field
        }
        _ => FieldDefn::new(spec.name.clone(), field_type),
    };
    if let Some(subtype) = spec.subtype {
        field.subtype = subtype;
    }
    if let Some(width) = spec.width {
        field.width = width;
    }
    if let Some(precision) = spec.precision {
        field.precision = precision;
    }
    if let Some(nullable) = spec.nullable {
        field.nullable = nullable;
    }
    if let Some(unique) = spec.unique {
        field.unique = unique;
    }
    if spec.alternative_name.is_some() {
        field.alternative_name = spec.alternative_name.clone();
    }
    if spec.comment.is_some() {
        field.comment = spec.comment.clone();
    }
    if spec.default.is_some() {
        field.default = spec.default.clone();
    }
    field
}

/// Geometry field of a name merged across the layers defining it
fn merged_geom_field(name: &str, schemas: &[Arc<LayerSchema>]) -> Option<GeomFieldDefn> {
    let mut merged: Option<GeomFieldDefn> = None;
    for schema in schemas {
        let Some(index) = schema.geom_field_index(name) else {
            continue;
        };
        let field = &schema.geom_fields[index];
        match merged.as_mut() {
            Some(existing) => {
                existing.geometry_type = existing.geometry_type.merge(&field.geometry_type);
                existing.nullable |= field.nullable;
            }
            None => merged = Some(field.clone()),
        }
    }
    merged
}

/// Build the exposed schema and the per-field extent overrides
fn reconcile(
    definition: &UnionDefinition,
    schemas: &[Arc<LayerSchema>],
) -> Result<(LayerSchema, Vec<Option<Envelope>>), LayerError> {
    let name = definition.name.as_str();
    let strategy = definition.effective_strategy();

    let mut fields = match (strategy, &definition.fields) {
        (FieldStrategy::Explicit, Some(specs)) => {
            specs.iter().map(|s| declared_field(s, schemas)).collect()
        }
        (FieldStrategy::Intersection, _) => intersection_fields(schemas),
        (FieldStrategy::FirstLayer, _) => schemas
            .first()
            .map(|s| s.fields.clone())
            .unwrap_or_default(),
        _ => union_fields(schemas),
    };
    if let Some(provenance) = &definition.source_layer_field {
        fields.insert(0, FieldDefn::new(provenance.clone(), FieldType::String));
    }

    let mut extents = Vec::new();
    let geom_fields = match &definition.geometry_fields {
        Some(declared) => {
            let mut out = Vec::with_capacity(declared.len());
            for decl in declared {
                let mut field = merged_geom_field(&decl.name, schemas).unwrap_or_else(|| {
                    GeomFieldDefn::new(decl.name.clone(), GeometryType::UNKNOWN)
                });
                if let Some(geometry_type) = decl.geometry_type {
                    field.geometry_type = geometry_type;
                }
                if let Some(srs) = &decl.srs {
                    field.srs = Some(parse_srs(name, srs)?);
                }
                extents.push(decl.extent);
                out.push(field);
            }
            out
        }
        None => {
            let mut names: Vec<&str> = Vec::new();
            let candidates: &[Arc<LayerSchema>] = match strategy {
                FieldStrategy::FirstLayer => &schemas[..schemas.len().min(1)],
                _ => schemas,
            };
            for schema in candidates {
                for field in &schema.geom_fields {
                    if !names.iter().any(|n| n.eq_ignore_ascii_case(&field.name)) {
                        names.push(&field.name);
                    }
                }
            }
            if strategy == FieldStrategy::Intersection {
                names.retain(|n| schemas.iter().all(|s| s.geom_field_index(n).is_some()));
            }
            let out: Vec<GeomFieldDefn> = names
                .iter()
                .filter_map(|n| merged_geom_field(n, schemas))
                .collect();
            extents = vec![None; out.len()];
            out
        }
    };

    let mut schema = LayerSchema::new(name);
    schema.fields = fields;
    schema.geom_fields = geom_fields;
    if let Some(first) = schema.geom_fields.first_mut() {
        if let Some(geometry_type) = definition.geometry_type {
            first.geometry_type = geometry_type;
        }
        if let Some(srs) = &definition.srs {
            first.srs = Some(parse_srs(name, srs)?);
        }
        if definition.extent.is_some() {
            extents[0] = definition.extent;
        }
    }
    if let Some(duplicate) = schema.duplicate_name() {
        return Err(invalid(name, format!("field '{}' is exposed twice", duplicate)));
    }
    Ok((schema, extents))
}

/// Layer concatenating several inner layers
pub struct UnionLayer {
    name: String,
    inner: Vec<Layer>,
    inner_schemas: Vec<Arc<LayerSchema>>,
    context: OpenContext,
    schema: Arc<LayerSchema>,
    extents: Vec<Option<Envelope>>,
    provenance: Option<String>,
    preserve_fid: bool,
    static_count: Option<u64>,

    attribute_filter: Option<CompiledFilter>,
    spatial_filter: Option<SpatialQuery>,
    local_attribute: bool,
    local_spatial: bool,

    /// Inner layer being scanned
    current: usize,
    next_fid: i64,
    log: DiagnosticLog,
}

impl UnionLayer {
    /// Every inner layer must bind; a failing one fails the union
    pub fn new(
        definition: &UnionDefinition,
        mut inner: Vec<Layer>,
        context: OpenContext,
    ) -> Result<Self, LayerError> {
        if inner.is_empty() {
            return Err(invalid(&definition.name, "no inner layers"));
        }
        let mut inner_schemas = Vec::with_capacity(inner.len());
        for layer in &mut inner {
            layer.ensure_ready()?;
            inner_schemas.push(layer.schema());
        }
        let (schema, extents) = reconcile(definition, &inner_schemas)?;
        tracing::debug!(
            layer = %definition.name,
            inner = inner.len(),
            strategy = ?definition.effective_strategy(),
            fields = schema.fields.len(),
            "built union layer"
        );
        Ok(Self {
            name: definition.name.clone(),
            inner,
            inner_schemas,
            context,
            schema: Arc::new(schema),
            extents,
            provenance: definition.source_layer_field.clone(),
            preserve_fid: definition.preserve_src_fid,
            static_count: definition.feature_count,
            attribute_filter: None,
            spatial_filter: None,
            local_attribute: false,
            local_spatial: false,
            current: 0,
            next_fid: 0,
            log: DiagnosticLog::new(),
        })
    }

    /// Inner layers in declared order
    pub fn inner_names(&self) -> Vec<&str> {
        self.inner.iter().map(|l| l.name()).collect()
    }

    fn is_provenance(&self, column: &str) -> bool {
        self.provenance
            .as_deref()
            .is_some_and(|p| p.eq_ignore_ascii_case(column))
    }

    /// Whether every inner layer can evaluate the filter itself
    fn pushable(&self, filter: &CompiledFilter) -> bool {
        filter.columns().iter().all(|column| {
            if self.is_provenance(column) {
                return false;
            }
            if column.eq_ignore_ascii_case("fid") && self.schema.field_index(column).is_none() {
                return self.preserve_fid;
            }
            self.inner_schemas
                .iter()
                .all(|s| s.field_index(column).is_some())
        })
    }

    fn record(&mut self, diagnostic: Diagnostic) {
        let diagnostic = diagnostic.or_location(|| Location::new(self.name.clone()));
        self.context.runtime().record(&mut self.log, diagnostic);
    }

    fn expose(&self, raw: Feature, layer: usize, fid: i64) -> Feature {
        let mut feature = raw.remap(self.schema.clone());
        if let Some(provenance) = &self.provenance {
            feature.set_field(provenance, self.inner[layer].name());
        }
        if !self.preserve_fid {
            feature.set_fid(Some(fid));
        }
        feature
    }

    fn passes(&self, feature: &Feature) -> bool {
        if self.local_spatial {
            if let Some(query) = &self.spatial_filter {
                let engine = self.context.runtime().geometry.as_ref();
                let hit = feature
                    .geometry_at(query.geom_field)
                    .is_some_and(|g| query.matches(engine, g));
                if !hit {
                    return false;
                }
            }
        }
        if self.local_attribute {
            if let Some(filter) = &self.attribute_filter {
                return filter.matches(feature);
            }
        }
        true
    }

    fn has_filters(&self) -> bool {
        self.attribute_filter.is_some() || self.spatial_filter.is_some()
    }

    fn delegated(&self) -> bool {
        !self.local_attribute && !self.local_spatial
    }

    fn scan_count(&mut self) -> Result<u64, LayerError> {
        self.reset_reading();
        let mut count = 0;
        while self.next_feature()?.is_some() {
            count += 1;
        }
        self.reset_reading();
        Ok(count)
    }

    /// Inner layer named by the feature's provenance value
    fn route(&self, feature: &Feature) -> Result<usize, LayerError> {
        let provenance = self.provenance.as_deref().ok_or_else(|| {
            LayerError::WriteRejected(format!(
                "union layer '{}' has no provenance field to route writes",
                self.name
            ))
        })?;
        let target = feature
            .field(provenance)
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                LayerError::WriteRejected(format!("field '{}' must name an inner layer", provenance))
            })?;
        self.inner
            .iter()
            .position(|l| l.name() == target)
            .ok_or_else(|| {
                LayerError::WriteRejected(format!(
                    "'{}' is not an inner layer of '{}'",
                    target, self.name
                ))
            })
    }
}

impl FeatureLayer for UnionLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn schema(&mut self) -> Arc<LayerSchema> {
        self.schema.clone()
    }

    fn capabilities(&mut self) -> Capabilities {
        let inner = self
            .inner
            .iter_mut()
            .fold(Capabilities::all(), |acc, l| acc.and(l.capabilities()));
        let routed = self.provenance.is_some();
        Capabilities {
            fast_feature_count: (self.static_count.is_some() && !self.has_filters())
                || (inner.fast_feature_count && self.delegated()),
            fast_extent: self.extents.first().is_some_and(Option::is_some)
                || (inner.fast_extent && self.delegated()),
            fast_spatial_filter: inner.fast_spatial_filter && !self.local_spatial,
            random_read: inner.random_read && self.preserve_fid,
            sequential_write: inner.sequential_write && routed,
            random_write: inner.random_write && routed && self.preserve_fid,
            transactions: false,
        }
    }

    fn ensure_ready(&mut self) -> Result<(), LayerError> {
        self.inner.iter_mut().try_for_each(|l| l.ensure_ready())
    }

    fn reset_reading(&mut self) {
        for layer in &mut self.inner {
            layer.reset_reading();
        }
        self.current = 0;
        self.next_fid = 0;
    }

    fn next_feature(&mut self) -> Result<Option<Feature>, LayerError> {
        while self.current < self.inner.len() {
            let Some(raw) = self.inner[self.current].next_feature()? else {
                self.current += 1;
                continue;
            };
            let feature = self.expose(raw, self.current, self.next_fid);
            if self.passes(&feature) {
                self.next_fid += 1;
                return Ok(Some(feature));
            }
        }
        Ok(None)
    }

    fn feature(&mut self, fid: i64) -> Result<Option<Feature>, LayerError> {
        if self.preserve_fid {
            for index in 0..self.inner.len() {
                if let Some(raw) = self.inner[index].feature(fid)? {
                    return Ok(Some(self.expose(raw, index, fid)));
                }
            }
            return Ok(None);
        }
        // renumbered ids only exist in scan order
        self.reset_reading();
        let mut found = None;
        while let Some(feature) = self.next_feature()? {
            if feature.fid() == Some(fid) {
                found = Some(feature);
                break;
            }
        }
        self.reset_reading();
        Ok(found)
    }

    fn feature_count(&mut self) -> Result<u64, LayerError> {
        if let (Some(count), false) = (self.static_count, self.has_filters()) {
            return Ok(count);
        }
        if !self.delegated() {
            return self.scan_count();
        }
        let mut total = 0;
        for layer in &mut self.inner {
            total += layer.feature_count()?;
        }
        Ok(total)
    }

    fn extent(&mut self, geom_field: usize) -> Result<Option<Envelope>, LayerError> {
        if let Some(Some(extent)) = self.extents.get(geom_field) {
            return Ok(Some(*extent));
        }
        let Some(field) = self.schema.geom_fields.get(geom_field) else {
            return Ok(None);
        };
        if !self.delegated() {
            let field = geom_field;
            self.reset_reading();
            let mut extent: Option<Envelope> = None;
            while let Some(feature) = self.next_feature()? {
                if let Some(env) = feature.geometry_at(field).and_then(Geometry::envelope) {
                    extent = Some(extent.map_or(env, |e| e.merge(&env)));
                }
            }
            self.reset_reading();
            return Ok(extent);
        }
        let name = field.name.clone();
        let mut extent: Option<Envelope> = None;
        for (layer, schema) in self.inner.iter_mut().zip(&self.inner_schemas) {
            let Some(index) = schema.geom_field_index(&name) else {
                continue;
            };
            if let Some(env) = layer.extent(index)? {
                extent = Some(extent.map_or(env, |e| e.merge(&env)));
            }
        }
        Ok(extent)
    }

    fn set_spatial_filter(
        &mut self,
        geom_field: usize,
        filter: Option<Geometry>,
    ) -> Result<(), LayerError> {
        // clear whatever was pushed down before
        if let Some(previous) = self.spatial_filter.take() {
            let name = self.schema.geom_fields[previous.geom_field].name.clone();
            for (layer, schema) in self.inner.iter_mut().zip(&self.inner_schemas) {
                if let Some(index) = schema.geom_field_index(&name) {
                    layer.set_spatial_filter(index, None)?;
                }
            }
        }
        self.local_spatial = false;

        let Some(query) = filter.and_then(|g| SpatialQuery::new(geom_field, g)) else {
            return Ok(());
        };
        let name = self
            .schema
            .geom_fields
            .get(geom_field)
            .map(|f| f.name.clone())
            .ok_or_else(|| {
                LayerError::Unsupported(format!(
                    "layer '{}' has no geometry field {}",
                    self.name, geom_field
                ))
            })?;
        let indexes: Vec<Option<usize>> = self
            .inner_schemas
            .iter()
            .map(|s| s.geom_field_index(&name))
            .collect();
        if indexes.iter().all(Option::is_some) {
            for (layer, index) in self.inner.iter_mut().zip(indexes.into_iter().flatten()) {
                layer.set_spatial_filter(index, Some(query.geometry.clone()))?;
            }
        } else {
            self.local_spatial = true;
            self.record(Diagnostic::new(
                DiagnosticCode::FilterNotDelegable,
                vlayer_core::Severity::Info,
                format!(
                    "geometry field '{}' is missing from some inner layers; filtering locally",
                    name
                ),
            ));
        }
        self.spatial_filter = Some(query);
        Ok(())
    }

    fn set_attribute_filter(&mut self, filter: Option<&str>) -> Result<(), LayerError> {
        let filter = match filter {
            Some(text) if !text.trim().is_empty() => {
                let filter = CompiledFilter::parse(text)?;
                filter.validate(&self.schema)?;
                Some(filter)
            }
            _ => None,
        };

        let pushed = filter.as_ref().filter(|f| self.pushable(f)).map(|f| f.text().to_string());
        let mut delegated = pushed.is_some();
        if let Some(text) = &pushed {
            for layer in &mut self.inner {
                if layer.set_attribute_filter(Some(text)).is_err() {
                    delegated = false;
                    break;
                }
            }
        }
        if !delegated {
            for layer in &mut self.inner {
                layer.set_attribute_filter(None)?;
            }
        }
        self.local_attribute = filter.is_some() && !delegated;
        if self.local_attribute {
            tracing::debug!(layer = %self.name, "union attribute filter evaluated locally");
        }
        self.attribute_filter = filter;
        Ok(())
    }

    fn create_feature(&mut self, feature: &mut Feature) -> Result<(), LayerError> {
        let target = self.route(feature)?;
        let mut raw = feature.remap(self.inner_schemas[target].clone());
        if !self.preserve_fid {
            raw.set_fid(None);
        }
        self.inner[target].create_feature(&mut raw)?;
        feature.set_fid(if self.preserve_fid { raw.fid() } else { None });
        Ok(())
    }

    fn set_feature(&mut self, feature: &Feature) -> Result<(), LayerError> {
        if !self.preserve_fid {
            return Err(LayerError::WriteRejected(format!(
                "union layer '{}' renumbers ids; updates need preserve_src_fid",
                self.name
            )));
        }
        if feature.fid().is_none() {
            return Err(LayerError::WriteRejected(
                "cannot update a feature without an id".to_string(),
            ));
        }
        let target = self.route(feature)?;
        let raw = feature.remap(self.inner_schemas[target].clone());
        self.inner[target].set_feature(&raw)
    }

    fn delete_feature(&mut self, fid: i64) -> Result<(), LayerError> {
        Err(LayerError::WriteRejected(format!(
            "cannot route the deletion of feature {} in union layer '{}'",
            fid, self.name
        )))
    }

    fn sync_to_disk(&mut self) -> Result<(), LayerError> {
        self.inner.iter_mut().try_for_each(|l| l.sync_to_disk())
    }

    fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        let mut diagnostics = self.log.drain();
        for layer in &mut self.inner {
            diagnostics.extend(layer.take_diagnostics());
        }
        diagnostics
    }
}
