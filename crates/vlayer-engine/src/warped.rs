//! Reprojecting layers
//!
//! A warped layer exposes another layer with one geometry field transformed
//! into a target spatial reference. Reads transform forward, spatial filters
//! and writes transform back.

use crate::guard::OpenContext;
use crate::layer::Layer;
use crate::translator::SpatialQuery;
use std::sync::Arc;
use vlayer_core::{
    Coord, Diagnostic, DiagnosticCode, DiagnosticLog, Envelope, Feature, Geometry, LayerSchema,
    Location, SpatialRef,
};
use vlayer_definition::WarpedDefinition;
use vlayer_geom::{transform_geometry, CoordinateTransform};
use vlayer_source::{Capabilities, FeatureLayer, LayerError};

/// Points sampled per envelope edge when transforming bounds
const EDGE_SAMPLES: usize = 21;

/// Transform an envelope by sampling its edges
///
/// Corners alone miss the bulge of edges that curve under the transform.
/// Returns `None` when no sample point transforms.
fn warp_envelope(transform: &dyn CoordinateTransform, envelope: &Envelope) -> Option<Envelope> {
    if transform.is_identity() {
        return Some(*envelope);
    }
    let steps = (EDGE_SAMPLES - 1) as f64;
    let width = envelope.max_x - envelope.min_x;
    let height = envelope.max_y - envelope.min_y;
    let mut out: Option<Envelope> = None;
    for i in 0..EDGE_SAMPLES {
        let t = i as f64 / steps;
        let samples = [
            (envelope.min_x + width * t, envelope.min_y),
            (envelope.min_x + width * t, envelope.max_y),
            (envelope.min_x, envelope.min_y + height * t),
            (envelope.max_x, envelope.min_y + height * t),
        ];
        for (x, y) in samples {
            let mut coord = Coord::xy(x, y);
            if !transform.transform_coord(&mut coord) {
                continue;
            }
            match out.as_mut() {
                Some(env) => env.expand_to(coord.x, coord.y),
                None => out = Some(Envelope::of_point(coord.x, coord.y)),
            }
        }
    }
    out
}

/// A layer with one geometry field reprojected
pub struct WarpedLayer {
    name: String,
    inner: Box<Layer>,
    context: OpenContext,
    field: usize,
    target: SpatialRef,
    forward: Arc<dyn CoordinateTransform>,
    backward: Arc<dyn CoordinateTransform>,
    extent: Option<Envelope>,

    /// Inner schema the exposed one was derived from, and the exposed schema
    schemas: (Arc<LayerSchema>, Arc<LayerSchema>),

    spatial_filter: Option<SpatialQuery>,
    log: DiagnosticLog,
}

fn invalid(name: &str, message: impl std::fmt::Display) -> LayerError {
    LayerError::Definition(format!("warped layer '{}': {}", name, message))
}

impl WarpedLayer {
    pub fn new(
        definition: &WarpedDefinition,
        mut inner: Layer,
        context: OpenContext,
    ) -> Result<Self, LayerError> {
        let name = definition
            .name
            .clone()
            .unwrap_or_else(|| inner.name().to_string());
        let schema = inner.schema();
        if schema.geom_fields.is_empty() {
            // surface why the inner layer has no schema, if it failed
            inner.ensure_ready()?;
            return Err(invalid(&name, "the inner layer has no geometry field"));
        }

        let target = definition
            .target_srs
            .as_deref()
            .ok_or_else(|| invalid(&name, "target_srs is required"))
            .and_then(|text| SpatialRef::parse(text).map_err(|e| invalid(&name, e)))?;

        let field = match &definition.warped_field {
            None => 0,
            Some(field) => schema
                .geom_field_index(field)
                .ok_or_else(|| invalid(&name, format!("no geometry field '{}'", field)))?,
        };

        let source = match &definition.source_srs {
            Some(text) => SpatialRef::parse(text).map_err(|e| invalid(&name, e))?,
            None => schema.geom_fields[field].srs.clone().ok_or_else(|| {
                invalid(
                    &name,
                    format!(
                        "spatial reference of '{}' is unknown; set source_srs",
                        schema.geom_fields[field].name
                    ),
                )
            })?,
        };

        let transforms = context.runtime().transforms.clone();
        let forward = transforms
            .create(&source, &target)
            .map_err(|e| invalid(&name, e))?;
        let backward = forward.inverse();
        tracing::debug!(layer = %name, source = %source, target = %target, "warping layer");

        let exposed = Self::expose_schema(&name, &schema, field, &target);
        Ok(Self {
            name,
            inner: Box::new(inner),
            context,
            field,
            target,
            forward,
            backward,
            extent: definition.extent,
            schemas: (schema, exposed),
            spatial_filter: None,
            log: DiagnosticLog::new(),
        })
    }

    fn expose_schema(
        name: &str,
        inner: &LayerSchema,
        field: usize,
        target: &SpatialRef,
    ) -> Arc<LayerSchema> {
        let mut schema = inner.clone();
        schema.name = name.to_string();
        if let Some(geom) = schema.geom_fields.get_mut(field) {
            geom.srs = Some(target.clone());
        }
        Arc::new(schema)
    }

    /// Exposed schema, following changes of the inner schema
    fn exposed(&mut self) -> Arc<LayerSchema> {
        let inner = self.inner.schema();
        if !Arc::ptr_eq(&inner, &self.schemas.0) {
            let exposed = Self::expose_schema(&self.name, &inner, self.field, &self.target);
            self.schemas = (inner, exposed);
        }
        self.schemas.1.clone()
    }

    fn warp(&mut self, feature: Feature) -> Feature {
        let mut feature = feature.remap(self.exposed());
        if let Some(mut geometry) = feature.take_geometry_at(self.field) {
            match transform_geometry(self.forward.as_ref(), &mut geometry) {
                Ok(()) => feature.set_geometry_at(self.field, Some(geometry)),
                Err(e) => {
                    let location = Location::with_fid(self.name.clone(), feature.fid());
                    self.context.runtime().record(
                        &mut self.log,
                        Diagnostic::warn(DiagnosticCode::TransformFailed, e.to_string())
                            .with_location(location),
                    );
                }
            }
        }
        feature
    }

    fn unwarp(&mut self, feature: &Feature) -> Result<Feature, LayerError> {
        let mut raw = feature.remap(self.inner.schema());
        if let Some(mut geometry) = raw.take_geometry_at(self.field) {
            transform_geometry(self.backward.as_ref(), &mut geometry).map_err(|e| {
                LayerError::WriteRejected(format!(
                    "cannot transform the geometry back to the source reference: {}",
                    e
                ))
            })?;
            raw.set_geometry_at(self.field, Some(geometry));
        }
        Ok(raw)
    }

    fn passes(&self, feature: &Feature) -> bool {
        match &self.spatial_filter {
            None => true,
            Some(query) => feature
                .geometry_at(query.geom_field)
                .is_some_and(|g| query.matches(self.context.runtime().geometry.as_ref(), g)),
        }
    }
}

impl FeatureLayer for WarpedLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn schema(&mut self) -> Arc<LayerSchema> {
        self.exposed()
    }

    fn capabilities(&mut self) -> Capabilities {
        let mut capabilities = self.inner.capabilities();
        capabilities.fast_extent |= self.extent.is_some();
        if self.spatial_filter.is_some() {
            capabilities.fast_feature_count = false;
        }
        capabilities
    }

    fn ensure_ready(&mut self) -> Result<(), LayerError> {
        self.inner.ensure_ready()
    }

    fn reset_reading(&mut self) {
        self.inner.reset_reading();
    }

    fn next_feature(&mut self) -> Result<Option<Feature>, LayerError> {
        while let Some(feature) = self.inner.next_feature()? {
            let feature = self.warp(feature);
            if self.passes(&feature) {
                return Ok(Some(feature));
            }
        }
        Ok(None)
    }

    fn feature(&mut self, fid: i64) -> Result<Option<Feature>, LayerError> {
        Ok(self.inner.feature(fid)?.map(|f| self.warp(f)))
    }

    fn feature_count(&mut self) -> Result<u64, LayerError> {
        if self.spatial_filter.is_none() {
            return self.inner.feature_count();
        }
        self.reset_reading();
        let mut count = 0;
        while self.next_feature()?.is_some() {
            count += 1;
        }
        self.reset_reading();
        Ok(count)
    }

    fn extent(&mut self, geom_field: usize) -> Result<Option<Envelope>, LayerError> {
        if geom_field != self.field {
            return self.inner.extent(geom_field);
        }
        if let Some(extent) = self.extent {
            return Ok(Some(extent));
        }
        Ok(self
            .inner
            .extent(geom_field)?
            .and_then(|e| warp_envelope(self.forward.as_ref(), &e)))
    }

    fn set_spatial_filter(
        &mut self,
        geom_field: usize,
        filter: Option<Geometry>,
    ) -> Result<(), LayerError> {
        if let Some(previous) = &self.spatial_filter {
            if previous.geom_field != geom_field {
                self.inner.set_spatial_filter(previous.geom_field, None)?;
            }
        }
        let query = filter.and_then(|g| SpatialQuery::new(geom_field, g));
        let inner_filter = match &query {
            None => None,
            Some(query) if geom_field == self.field => {
                warp_envelope(self.backward.as_ref(), &query.envelope).map(|e| e.to_polygon())
            }
            Some(query) => Some(query.geometry.clone()),
        };
        self.inner.set_spatial_filter(geom_field, inner_filter)?;
        // the inner layer handles filters on fields that are not reprojected
        self.spatial_filter = query.filter(|q| q.geom_field == self.field);
        Ok(())
    }

    fn set_attribute_filter(&mut self, filter: Option<&str>) -> Result<(), LayerError> {
        self.inner.set_attribute_filter(filter)
    }

    fn create_feature(&mut self, feature: &mut Feature) -> Result<(), LayerError> {
        let mut raw = self.unwarp(feature)?;
        self.inner.create_feature(&mut raw)?;
        feature.set_fid(raw.fid());
        Ok(())
    }

    fn set_feature(&mut self, feature: &Feature) -> Result<(), LayerError> {
        let raw = self.unwarp(feature)?;
        self.inner.set_feature(&raw)
    }

    fn delete_feature(&mut self, fid: i64) -> Result<(), LayerError> {
        self.inner.delete_feature(fid)
    }

    fn start_transaction(&mut self) -> Result<(), LayerError> {
        self.inner.start_transaction()
    }

    fn commit_transaction(&mut self) -> Result<(), LayerError> {
        self.inner.commit_transaction()
    }

    fn rollback_transaction(&mut self) -> Result<(), LayerError> {
        self.inner.rollback_transaction()
    }

    fn sync_to_disk(&mut self) -> Result<(), LayerError> {
        self.inner.sync_to_disk()
    }

    fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        let mut diagnostics = self.log.drain();
        diagnostics.extend(self.inner.take_diagnostics());
        diagnostics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vlayer_geom::{BuiltinTransforms, TransformFactory};

    #[test]
    fn sampled_envelope_covers_curved_edges() {
        let transform = BuiltinTransforms
            .create(&SpatialRef::epsg(32631), &SpatialRef::epsg(4326))
            .unwrap();
        let utm = Envelope::new(300_000.0, 5_000_000.0, 700_000.0, 5_500_000.0);
        let sampled = warp_envelope(transform.as_ref(), &utm).unwrap();
        let corners = vlayer_geom::transform_envelope(transform.as_ref(), &utm).unwrap();
        assert!(sampled.contains(&corners));
    }

    #[test]
    fn identity_keeps_envelope() {
        let transform = BuiltinTransforms
            .create(&SpatialRef::epsg(4326), &SpatialRef::epsg(4326))
            .unwrap();
        let env = Envelope::new(1.0, 2.0, 3.0, 4.0);
        assert_eq!(warp_envelope(transform.as_ref(), &env), Some(env));
    }
}
