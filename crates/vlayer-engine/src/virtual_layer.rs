//! Direct and derived layers over one source layer
//!
//! A virtual layer binds its source lazily. Construction only resolves what
//! the definition declares; the source is opened on the first call that
//! touches data. Schema queries never fail: before binding they answer from
//! the declaration when it is complete, and otherwise try a best-effort bind
//! and fall back to an empty schema.

use crate::clipper::RegionClipper;
use crate::derivation::GeometryStrategy;
use crate::guard::{BoundSource, OpenContext};
use crate::schema_builder::SchemaPlan;
use crate::translator::{FilterTranslator, Routing, SpatialQuery};
use std::path::PathBuf;
use std::sync::Arc;
use vlayer_core::{
    Diagnostic, DiagnosticCode, DiagnosticLog, Envelope, Feature, FieldValue, Geometry,
    LayerSchema, Location, Severity,
};
use vlayer_definition::LayerDefinition;
use vlayer_filter::{column_ident, CompiledFilter};
use vlayer_source::{lock, Capabilities, FeatureLayer, LayerError};

/// Binding state of a virtual layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerState {
    /// Nothing resolved yet
    Unopened,

    /// Schema known from the declaration, source not opened
    SchemaResolved,

    /// Schema depends on the source, which is not opened yet
    UnresolvedSchema,

    /// Source opened and schema resolved against it
    SourceBound,

    /// The source could not be opened; only schema queries work
    Failed,
}

#[derive(Debug, Clone)]
struct Failure {
    recursion: bool,
    message: String,
}

impl Failure {
    fn error(&self) -> LayerError {
        if self.recursion {
            LayerError::Recursion(self.message.clone())
        } else {
            LayerError::SourceUnavailable(self.message.clone())
        }
    }
}

struct Bound {
    source: BoundSource,
    schema: Arc<LayerSchema>,
}

/// One logical layer over one source layer
pub struct VirtualLayer {
    definition: LayerDefinition,
    context: OpenContext,
    base_dir: Option<PathBuf>,
    state: LayerState,
    plan: Option<SchemaPlan>,
    empty_schema: Arc<LayerSchema>,
    bound: Option<Bound>,
    failure: Option<Failure>,
    region: Option<RegionClipper>,

    attribute_filter: Option<CompiledFilter>,
    spatial_filter: Option<SpatialQuery>,
    routing: Routing,

    /// Source geometry field currently carrying a spatial filter
    source_spatial_field: Option<usize>,

    /// Id handed to the next feature whose source row carries none
    next_index: i64,

    log: DiagnosticLog,
}

impl VirtualLayer {
    /// Create the layer; fails only on definition errors
    pub fn new(
        definition: LayerDefinition,
        context: OpenContext,
        base_dir: Option<PathBuf>,
    ) -> Result<Self, LayerError> {
        let mut log = DiagnosticLog::new();
        let region = match &definition.region {
            None => None,
            Some(spec) => {
                let geometry = vlayer_geom::parse_wkt(&spec.wkt).map_err(|e| {
                    LayerError::Definition(format!("layer '{}': region: {}", definition.name, e))
                })?;
                let runtime = context.runtime();
                RegionClipper::new(
                    geometry,
                    spec.clip,
                    runtime.geometry.clone(),
                    runtime.config.enable_clipping,
                )
                .map(|clipper| {
                    runtime.absorb(&mut log, clipper, || Location::new(definition.name.clone()))
                })
            }
        };

        let mut layer = Self {
            empty_schema: Arc::new(LayerSchema::new(definition.name.clone())),
            definition,
            context,
            base_dir,
            state: LayerState::Unopened,
            plan: None,
            bound: None,
            failure: None,
            region,
            attribute_filter: None,
            spatial_filter: None,
            routing: Routing::default(),
            source_spatial_field: None,
            next_index: 0,
            log,
        };
        layer.resolve_schema()?;
        Ok(layer)
    }

    /// Resolve what the declaration alone allows
    fn resolve_schema(&mut self) -> Result<(), LayerError> {
        if self.state != LayerState::Unopened {
            return Ok(());
        }
        self.plan = SchemaPlan::resolve_static(&self.definition)?;
        self.state = if self.plan.is_some() {
            LayerState::SchemaResolved
        } else {
            LayerState::UnresolvedSchema
        };
        Ok(())
    }

    pub fn state(&self) -> LayerState {
        self.state
    }

    pub fn definition(&self) -> &LayerDefinition {
        &self.definition
    }

    /// Resolved schema plan, once known
    pub fn plan(&self) -> Option<&SchemaPlan> {
        self.plan.as_ref()
    }

    fn location(&self, fid: Option<i64>) -> Location {
        Location::with_fid(self.definition.name.clone(), fid)
    }

    /// Bind the source if that has not happened yet
    pub fn ensure_bound(&mut self) -> Result<(), LayerError> {
        match self.state {
            LayerState::SourceBound => return Ok(()),
            LayerState::Failed => {
                return Err(self
                    .failure
                    .as_ref()
                    .map(Failure::error)
                    .unwrap_or_else(|| LayerError::SourceUnavailable(self.definition.name.clone())))
            }
            LayerState::Unopened => self.resolve_schema()?,
            LayerState::SchemaResolved | LayerState::UnresolvedSchema => {}
        }
        match self.bind() {
            Ok(()) => Ok(()),
            Err(error) => {
                self.fail(&error);
                Err(error)
            }
        }
    }

    fn bind(&mut self) -> Result<(), LayerError> {
        let source = self
            .context
            .open_source(&self.definition.source, self.base_dir.as_deref())?;
        let schema = {
            let mut layer = lock(&source.layer);
            layer.ensure_ready()?;
            layer.schema()
        };
        let plan = SchemaPlan::build(&self.definition, &schema)?;
        if let Some(filter) = &self.attribute_filter {
            if let Err(e) = filter.validate(plan.schema()) {
                let location = self.location(None);
                self.context.runtime().record(
                    &mut self.log,
                    Diagnostic::warn(
                        DiagnosticCode::Warning,
                        format!("dropping attribute filter '{}': {}", filter, e),
                    )
                    .with_location(location),
                );
                self.attribute_filter = None;
            }
        }
        tracing::debug!(
            layer = %self.definition.name,
            source = %schema.name,
            fields = plan.schema().fields.len(),
            "bound source layer"
        );
        self.plan = Some(plan);
        self.bound = Some(Bound { source, schema });
        self.state = LayerState::SourceBound;
        self.apply_filters()
    }

    fn fail(&mut self, error: &LayerError) {
        let recursion = matches!(error, LayerError::Recursion(_));
        let code = if recursion {
            DiagnosticCode::RecursionDetected
        } else {
            DiagnosticCode::SourceUnavailable
        };
        let diagnostic = Diagnostic::new(
            code,
            Severity::Error,
            format!("cannot open the source of '{}': {}", self.definition.name, error),
        )
        .with_location(self.location(None));
        self.context.runtime().record(&mut self.log, diagnostic);
        self.bound = None;
        self.failure = Some(Failure {
            recursion,
            message: error.to_string(),
        });
        self.state = LayerState::Failed;
    }

    /// Recompute the filter split and push the source part down
    fn apply_filters(&mut self) -> Result<(), LayerError> {
        let (Some(plan), Some(bound)) = (&self.plan, &self.bound) else {
            return Ok(());
        };
        let runtime = self.context.runtime();
        let mut source = lock(&bound.source.layer);
        let translator = FilterTranslator {
            plan,
            source: &bound.schema,
            capabilities: source.capabilities(),
            region: self.region.as_ref(),
        };
        let (mut routing, diagnostics) =
            translator.route(self.attribute_filter.as_ref(), self.spatial_filter.as_ref());
        for diagnostic in diagnostics {
            runtime.record(
                &mut self.log,
                diagnostic.or_location(|| Location::new(self.definition.name.clone())),
            );
        }

        if let Err(e) = source.set_attribute_filter(routing.source_attribute.as_deref()) {
            runtime.record(
                &mut self.log,
                Diagnostic::warn(
                    DiagnosticCode::FilterNotDelegable,
                    format!("source refused the filter, evaluating locally: {}", e),
                )
                .with_location(Location::new(self.definition.name.clone())),
            );
            source.set_attribute_filter(None)?;
            routing.source_attribute = None;
            routing.local_attribute = self.attribute_filter.clone();
            if routing.local_spatial.is_none() {
                routing.local_spatial = self.spatial_filter.clone();
            }
        }

        let target = routing.source_spatial.as_ref().map(|(index, _)| *index);
        if let Some(previous) = self.source_spatial_field {
            if target != Some(previous) {
                source.set_spatial_filter(previous, None)?;
            }
        }
        if let Some((index, geometry)) = &routing.source_spatial {
            source.set_spatial_filter(*index, Some(geometry.clone()))?;
        }
        source.reset_reading();
        drop(source);

        self.routing = routing;
        self.source_spatial_field = target;
        self.next_index = 0;
        Ok(())
    }

    fn has_filters(&self) -> bool {
        self.attribute_filter.is_some() || self.spatial_filter.is_some()
    }

    /// Build the exposed feature for a source row; `None` drops the row
    fn expose(&mut self, raw: &Feature, index: i64) -> Option<Feature> {
        let plan = self.plan.as_ref()?;
        let runtime = self.context.runtime();
        let layer = &self.definition.name;
        let schema = plan.schema().clone();

        let fid = match plan.fid_column() {
            Some(column) => raw.field(column).and_then(FieldValue::as_i64),
            None => raw.fid().or(Some(index)),
        };
        let mut feature = Feature::new(schema.clone());
        feature.set_fid(fid);

        for (i, defn) in schema.fields.iter().enumerate() {
            let Some(value) = plan.source_column(i).and_then(|c| raw.field(c)) else {
                continue;
            };
            match value.convert(defn.field_type) {
                Some(converted) => feature.set_field_at(i, converted),
                None => runtime.record(
                    &mut self.log,
                    Diagnostic::warn(
                        DiagnosticCode::FieldConversion,
                        format!("'{}' is not a valid {:?} value", value, defn.field_type),
                    )
                    .with_location(Location::with_fid(layer.clone(), fid).field(defn.name.clone())),
                ),
            }
        }

        let style = match plan.style_column() {
            Some(column) => raw
                .field(column)
                .filter(|v| !v.is_null())
                .map(ToString::to_string),
            None => raw.style().map(str::to_string),
        };
        feature.set_style(style);

        for (i, geometry_plan) in plan.geometries().iter().enumerate() {
            let location = || {
                Location::with_fid(layer.clone(), fid).field(schema.geom_fields[i].name.clone())
            };
            let mut geometry =
                runtime.absorb(&mut self.log, geometry_plan.strategy.decode(raw), location);
            if i == 0 {
                if let Some(region) = &self.region {
                    geometry = runtime.absorb(&mut self.log, region.apply(geometry), location);
                    if geometry.is_none() {
                        return None;
                    }
                }
            }
            feature.set_geometry_at(i, geometry);
        }
        Some(feature)
    }

    fn passes_local(&self, feature: &Feature) -> bool {
        if let Some(query) = &self.routing.local_spatial {
            let engine = self.context.runtime().geometry.as_ref();
            match feature.geometry_at(query.geom_field) {
                Some(geometry) if query.matches(engine, geometry) => {}
                _ => return false,
            }
        }
        match &self.routing.local_attribute {
            Some(filter) => filter.matches(feature),
            None => true,
        }
    }

    /// Source row with exposed id `fid`, ignoring installed filters
    fn source_feature(&mut self, fid: i64) -> Result<Option<Feature>, LayerError> {
        let Some(bound) = &self.bound else {
            return Ok(None);
        };
        let handle = bound.source.layer.clone();
        let column = self.plan.as_ref().and_then(|p| p.fid_column()).map(str::to_string);
        let Some(column) = column else {
            let mut source = lock(&handle);
            if source.capabilities().random_read {
                return source.feature(fid);
            }
            drop(source);
            return self.scan_source_for(&column_ident("fid").to_string(), fid);
        };
        self.scan_source_for(&column_ident(&column).to_string(), fid)
    }

    /// Find a source row with a temporary filter, then restore the installed ones
    fn scan_source_for(&mut self, column: &str, fid: i64) -> Result<Option<Feature>, LayerError> {
        let Some(bound) = &self.bound else {
            return Ok(None);
        };
        let found = {
            let mut source = lock(&bound.source.layer);
            if let Some(index) = self.source_spatial_field.take() {
                source.set_spatial_filter(index, None)?;
            }
            source.set_attribute_filter(Some(&format!("{} = {}", column, fid)))?;
            source.reset_reading();
            source.next_feature()
        };
        self.apply_filters()?;
        found
    }

    fn scan<T>(&mut self, mut visit: impl FnMut(&Feature) -> T) -> Result<Vec<T>, LayerError> {
        self.reset_reading();
        let mut out = Vec::new();
        while let Some(feature) = self.next_feature()? {
            out.push(visit(&feature));
        }
        self.reset_reading();
        Ok(out)
    }

    fn check_writable(&mut self) -> Result<(), LayerError> {
        self.ensure_bound()?;
        if self.context.update() {
            Ok(())
        } else {
            Err(LayerError::WriteRejected(format!(
                "layer '{}' is opened read-only",
                self.definition.name
            )))
        }
    }

    /// Decompose an exposed feature into a feature of the source schema
    fn to_source(&self, feature: &Feature) -> Result<Feature, LayerError> {
        let (Some(plan), Some(bound)) = (&self.plan, &self.bound) else {
            return Err(LayerError::SourceUnavailable(self.definition.name.clone()));
        };
        let feature = if Arc::ptr_eq(feature.schema(), plan.schema()) {
            feature.clone()
        } else {
            feature.remap(plan.schema().clone())
        };
        let mut raw = Feature::new(bound.schema.clone());

        for (i, defn) in plan.schema().fields.iter().enumerate() {
            let (Some(column), Some(value)) = (plan.source_column(i), feature.field_at(i)) else {
                continue;
            };
            let value = match bound.schema.find_field(column) {
                Some(target) => value.convert(target.field_type).ok_or_else(|| {
                    LayerError::WriteRejected(format!(
                        "value '{}' of field '{}' does not fit source column '{}'",
                        value, defn.name, column
                    ))
                })?,
                None => value.clone(),
            };
            raw.set_field(column, value);
        }
        for (i, geometry_plan) in plan.geometries().iter().enumerate() {
            geometry_plan
                .strategy
                .encode(feature.geometry_at(i), &mut raw)?;
        }

        match plan.fid_column() {
            Some(column) => {
                if let Some(fid) = feature.fid() {
                    raw.set_field(column, fid);
                }
            }
            None => raw.set_fid(feature.fid()),
        }
        match plan.style_column() {
            Some(column) => {
                let style = feature.style().map_or(FieldValue::Null, FieldValue::from);
                raw.set_field(column, style);
            }
            None => raw.set_style(feature.style().map(str::to_string)),
        }
        Ok(raw)
    }

    /// Source id of the row with exposed id `fid`
    fn source_fid(&mut self, fid: i64) -> Result<i64, LayerError> {
        if self.plan.as_ref().and_then(|p| p.fid_column()).is_none() {
            return Ok(fid);
        }
        self.source_feature(fid)?
            .and_then(|f| f.fid())
            .ok_or(LayerError::NotFound(fid))
    }

    fn source_handle(&self) -> Result<vlayer_source::SourceHandle, LayerError> {
        self.bound
            .as_ref()
            .map(|b| b.source.layer.clone())
            .ok_or_else(|| LayerError::SourceUnavailable(self.definition.name.clone()))
    }
}

impl FeatureLayer for VirtualLayer {
    fn name(&self) -> &str {
        &self.definition.name
    }

    fn schema(&mut self) -> Arc<LayerSchema> {
        if self.plan.is_none() && self.state != LayerState::Failed {
            let _ = self.ensure_bound();
        }
        match &self.plan {
            Some(plan) => plan.schema().clone(),
            None => self.empty_schema.clone(),
        }
    }

    fn capabilities(&mut self) -> Capabilities {
        if self.ensure_bound().is_err() {
            return Capabilities::default();
        }
        let (Some(plan), Some(bound)) = (&self.plan, &self.bound) else {
            return Capabilities::default();
        };
        let source = lock(&bound.source.layer).capabilities();
        let translator = FilterTranslator {
            plan,
            source: &bound.schema,
            capabilities: source,
            region: self.region.as_ref(),
        };
        let delegated = self.routing.is_delegated() && self.region.is_none();
        let direct_first = matches!(
            plan.geometry(0).map(|g| &g.strategy),
            Some(GeometryStrategy::Direct { index: Some(_) })
        );
        let writable = self.context.update();
        Capabilities {
            fast_feature_count: (self.definition.feature_count.is_some() && !self.has_filters())
                || (source.fast_feature_count && delegated),
            fast_extent: plan.geometry(0).is_some_and(|g| g.extent.is_some())
                || (source.fast_extent && delegated && direct_first),
            fast_spatial_filter: translator.fast_spatial_filter(),
            random_read: source.random_read,
            sequential_write: writable && source.sequential_write,
            random_write: writable && source.random_write,
            transactions: writable && source.transactions,
        }
    }

    fn ensure_ready(&mut self) -> Result<(), LayerError> {
        self.ensure_bound()
    }

    fn reset_reading(&mut self) {
        if let Some(bound) = &self.bound {
            lock(&bound.source.layer).reset_reading();
        }
        self.next_index = 0;
    }

    fn next_feature(&mut self) -> Result<Option<Feature>, LayerError> {
        if self.ensure_bound().is_err() {
            return Ok(None);
        }
        let handle = self.source_handle()?;
        loop {
            let Some(raw) = lock(&handle).next_feature()? else {
                return Ok(None);
            };
            let index = self.next_index;
            self.next_index += 1;
            if let Some(feature) = self.expose(&raw, index) {
                if self.passes_local(&feature) {
                    return Ok(Some(feature));
                }
            }
        }
    }

    fn feature(&mut self, fid: i64) -> Result<Option<Feature>, LayerError> {
        self.ensure_bound()?;
        Ok(match self.source_feature(fid)? {
            Some(raw) => self.expose(&raw, fid),
            None => None,
        })
    }

    fn feature_count(&mut self) -> Result<u64, LayerError> {
        if let (Some(count), false) = (self.definition.feature_count, self.has_filters()) {
            return Ok(count);
        }
        if self.ensure_bound().is_err() {
            return Ok(0);
        }
        if self.routing.is_delegated() && self.region.is_none() {
            return lock(&self.source_handle()?).feature_count();
        }
        Ok(self.scan(|_| ())?.len() as u64)
    }

    fn extent(&mut self, geom_field: usize) -> Result<Option<Envelope>, LayerError> {
        let declared = |plan: Option<&SchemaPlan>| {
            plan.and_then(|p| p.geometry(geom_field))
                .and_then(|g| g.extent)
        };
        if let Some(extent) = declared(self.plan.as_ref()) {
            return Ok(Some(extent));
        }
        if self.ensure_bound().is_err() {
            return Ok(None);
        }
        if let Some(extent) = declared(self.plan.as_ref()) {
            return Ok(Some(extent));
        }
        let direct = match self.plan.as_ref().and_then(|p| p.geometry(geom_field)) {
            None => return Ok(None),
            Some(plan) => match &plan.strategy {
                GeometryStrategy::Direct { index } => *index,
                _ => None,
            },
        };
        if let (Some(index), true) = (direct, self.routing.is_delegated() && self.region.is_none()) {
            return lock(&self.source_handle()?).extent(index);
        }
        let envelopes = self.scan(|f| f.geometry_at(geom_field).and_then(Geometry::envelope))?;
        Ok(envelopes.into_iter().flatten().reduce(|a, b| a.merge(&b)))
    }

    fn set_spatial_filter(
        &mut self,
        geom_field: usize,
        filter: Option<Geometry>,
    ) -> Result<(), LayerError> {
        let query = filter.and_then(|g| SpatialQuery::new(geom_field, g));
        if query.is_some() {
            let count = self.schema().geom_fields.len();
            if geom_field >= count {
                return Err(LayerError::Unsupported(format!(
                    "layer '{}' has no geometry field {}",
                    self.definition.name, geom_field
                )));
            }
        }
        self.spatial_filter = query;
        if self.state == LayerState::SourceBound {
            self.apply_filters()?;
        }
        Ok(())
    }

    fn set_attribute_filter(&mut self, filter: Option<&str>) -> Result<(), LayerError> {
        let filter = match filter {
            Some(text) if !text.trim().is_empty() => Some(CompiledFilter::parse(text)?),
            _ => None,
        };
        if let Some(filter) = &filter {
            let schema = self.schema();
            if self.plan.is_some() {
                filter.validate(&schema)?;
            }
        }
        self.attribute_filter = filter;
        if self.state == LayerState::SourceBound {
            self.apply_filters()?;
        }
        Ok(())
    }

    fn create_feature(&mut self, feature: &mut Feature) -> Result<(), LayerError> {
        self.check_writable()?;
        let mut raw = self.to_source(feature)?;
        let fid_column = self.plan.as_ref().and_then(|p| p.fid_column()).map(str::to_string);
        if fid_column.is_some() {
            raw.set_fid(None);
        }
        lock(&self.source_handle()?).create_feature(&mut raw)?;
        let fid = match fid_column {
            Some(column) => raw.field(&column).and_then(FieldValue::as_i64),
            None => raw.fid(),
        };
        feature.set_fid(fid);
        Ok(())
    }

    fn set_feature(&mut self, feature: &Feature) -> Result<(), LayerError> {
        self.check_writable()?;
        let fid = feature.fid().ok_or_else(|| {
            LayerError::WriteRejected("cannot update a feature without an id".to_string())
        })?;
        let mut raw = self.to_source(feature)?;
        raw.set_fid(Some(self.source_fid(fid)?));
        lock(&self.source_handle()?).set_feature(&raw)
    }

    fn delete_feature(&mut self, fid: i64) -> Result<(), LayerError> {
        self.check_writable()?;
        let source_fid = self.source_fid(fid)?;
        lock(&self.source_handle()?).delete_feature(source_fid)
    }

    fn start_transaction(&mut self) -> Result<(), LayerError> {
        self.check_writable()?;
        lock(&self.source_handle()?).start_transaction()
    }

    fn commit_transaction(&mut self) -> Result<(), LayerError> {
        self.check_writable()?;
        lock(&self.source_handle()?).commit_transaction()
    }

    fn rollback_transaction(&mut self) -> Result<(), LayerError> {
        self.check_writable()?;
        lock(&self.source_handle()?).rollback_transaction()
    }

    fn sync_to_disk(&mut self) -> Result<(), LayerError> {
        self.ensure_bound()?;
        lock(&self.source_handle()?).sync_to_disk()
    }

    fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        let mut diagnostics = self.log.drain();
        if let Some(bound) = &self.bound {
            diagnostics.extend(lock(&bound.source.layer).take_diagnostics());
        }
        diagnostics
    }
}
