//! Filter pushdown decisions for direct layers
//!
//! Every installed filter is split into the part handed to the source and the
//! part evaluated locally after decoding. The split is recomputed whenever a
//! filter changes.

use crate::clipper::RegionClipper;
use crate::derivation::GeometryStrategy;
use crate::schema_builder::SchemaPlan;
use std::collections::HashMap;
use vlayer_core::{Diagnostic, DiagnosticCode, Envelope, Geometry, LayerSchema, Severity};
use vlayer_filter::{column_ident, conjunction, CompiledFilter};
use vlayer_geom::GeometryEngine;
use vlayer_source::Capabilities;

/// A spatial filter installed on an exposed geometry field
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialQuery {
    pub geom_field: usize,
    pub geometry: Geometry,
    pub envelope: Envelope,
}

impl SpatialQuery {
    /// `None` for a geometry without coordinates
    pub fn new(geom_field: usize, geometry: Geometry) -> Option<Self> {
        let envelope = geometry.envelope()?;
        Some(Self {
            geom_field,
            geometry,
            envelope,
        })
    }

    /// Whether a feature geometry passes this filter
    pub fn matches(&self, engine: &dyn GeometryEngine, geometry: &Geometry) -> bool {
        match geometry.envelope() {
            Some(bbox) if bbox.intersects(&self.envelope) => {
                (self.geometry.is_rectangle() && self.envelope.contains(&bbox))
                    || engine.intersects(geometry, &self.geometry)
            }
            _ => false,
        }
    }
}

/// Where each installed filter is evaluated
#[derive(Debug, Clone, Default)]
pub struct Routing {
    /// Attribute predicate handed to the source
    pub source_attribute: Option<String>,

    /// Spatial filter handed to the source, on a source geometry field index
    pub source_spatial: Option<(usize, Geometry)>,

    /// Attribute predicate evaluated on exposed features
    pub local_attribute: Option<CompiledFilter>,

    /// Spatial filter evaluated on exposed features
    pub local_spatial: Option<SpatialQuery>,
}

impl Routing {
    /// Whether the source alone decides which features pass
    pub fn is_delegated(&self) -> bool {
        self.local_attribute.is_none() && self.local_spatial.is_none()
    }
}

/// Translates exposed filters into source filters for one bound layer
pub struct FilterTranslator<'a> {
    pub plan: &'a SchemaPlan,
    pub source: &'a LayerSchema,
    pub capabilities: Capabilities,
    pub region: Option<&'a RegionClipper>,
}

impl<'a> FilterTranslator<'a> {
    /// Rewrite an attribute filter for the source, if it can be delegated
    ///
    /// Implicit fields always delegate. Explicit fields delegate only when
    /// every referenced column reads a source column of the same name. `fid`
    /// is renamed to the FID column when one is configured.
    pub fn attribute(&self, filter: &CompiledFilter) -> Option<CompiledFilter> {
        let mut renames = HashMap::new();
        for column in filter.columns() {
            let target = match self.plan.schema().field_index(&column) {
                Some(index) => {
                    let src = self.plan.source_column(index)?;
                    if self.plan.is_explicit() && !src.eq_ignore_ascii_case(&column) {
                        return None;
                    }
                    src.to_string()
                }
                None if column.eq_ignore_ascii_case("fid") => self
                    .plan
                    .fid_column()
                    .unwrap_or(column.as_str())
                    .to_string(),
                None => return None,
            };
            renames.insert(column.to_lowercase(), target);
        }
        Some(filter.rename(&|c| renames.get(&c.to_lowercase()).cloned()))
    }

    /// Range predicate for a rectangle against coordinate columns
    fn coordinate_range(x: &str, y: &str, envelope: &Envelope) -> String {
        let x = column_ident(x);
        let y = column_ident(y);
        format!(
            "{x} >= {} AND {x} <= {} AND {y} >= {} AND {y} <= {}",
            envelope.min_x, envelope.max_x, envelope.min_y, envelope.max_y
        )
    }

    fn numeric_columns(&self, x: &str, y: &str) -> bool {
        [x, y].into_iter().all(|c| {
            self.source
                .find_field(c)
                .is_some_and(|f| f.field_type.is_numeric())
        })
    }

    /// Whether spatial filters on the first geometry field are answered natively
    pub fn fast_spatial_filter(&self) -> bool {
        let Some(geometry) = self.plan.geometry(0) else {
            return false;
        };
        match &geometry.strategy {
            GeometryStrategy::Direct { index: Some(_) } => {
                self.capabilities.fast_spatial_filter && !self.region.is_some_and(|r| r.clips())
            }
            GeometryStrategy::PointFromColumns { x, y, .. } => {
                self.capabilities.fast_spatial_filter && self.numeric_columns(x, y)
            }
            _ => false,
        }
    }

    /// Split the installed filters between source and local evaluation
    pub fn route(
        &self,
        attribute: Option<&CompiledFilter>,
        spatial: Option<&SpatialQuery>,
    ) -> (Routing, Vec<Diagnostic>) {
        let mut routing = Routing::default();
        let mut diagnostics = Vec::new();
        let mut predicates = Vec::new();

        if let Some(filter) = attribute {
            match self.attribute(filter) {
                Some(rewritten) => {
                    tracing::debug!(layer = %self.plan.schema().name, filter = %rewritten, "delegating attribute filter");
                    predicates.push(rewritten.text().to_string());
                }
                None => {
                    tracing::debug!(layer = %self.plan.schema().name, filter = %filter, "attribute filter evaluated locally");
                    routing.local_attribute = Some(filter.clone());
                }
            }
        }

        if let Some(query) = spatial {
            let strategy = self.plan.geometry(query.geom_field).map(|g| &g.strategy);
            match strategy {
                Some(GeometryStrategy::Direct { index: Some(index) }) => {
                    routing.source_spatial = Some((*index, query.geometry.clone()));
                    if !query.geometry.is_rectangle() || self.region.is_some_and(|r| r.clips()) {
                        routing.local_spatial = Some(query.clone());
                    }
                }
                Some(GeometryStrategy::PointFromColumns { x, y, .. }) => {
                    if self.numeric_columns(x, y) {
                        predicates.push(Self::coordinate_range(x, y, &query.envelope));
                        if !query.geometry.is_rectangle() {
                            routing.local_spatial = Some(query.clone());
                        }
                    } else {
                        diagnostics.push(Diagnostic::warn(
                            DiagnosticCode::FilterNonNumericCoordinates,
                            format!(
                                "columns '{}' and '{}' are not numeric; the spatial filter is evaluated locally",
                                x, y
                            ),
                        ));
                        routing.local_spatial = Some(query.clone());
                    }
                }
                _ => {
                    diagnostics.push(Diagnostic::new(
                        DiagnosticCode::FilterNotDelegable,
                        Severity::Info,
                        format!(
                            "spatial filter on geometry field {} is evaluated locally",
                            query.geom_field
                        ),
                    ));
                    routing.local_spatial = Some(query.clone());
                }
            }
        }

        // The region narrows the source scan when no spatial filter does
        if routing.source_spatial.is_none() {
            if let (Some(region), Some(GeometryStrategy::Direct { index: Some(index) })) =
                (self.region, self.plan.geometry(0).map(|g| &g.strategy))
            {
                routing.source_spatial = Some((*index, region.region().clone()));
            }
        }

        routing.source_attribute = conjunction(predicates.iter().map(String::as_str));
        (routing, diagnostics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use vlayer_core::{FieldDefn, FieldType, GeomFieldDefn, GeometryType};
    use vlayer_definition::{FieldSpec, GeometryFieldSpec, LayerDefinition, SourceDescriptor};
    use vlayer_geom::PlanarEngine;

    fn source(coordinate_type: FieldType) -> LayerSchema {
        LayerSchema::new("raw")
            .with_field(FieldDefn::new("id", FieldType::Integer))
            .with_field(FieldDefn::new("gid", FieldType::Integer))
            .with_field(FieldDefn::new("x", coordinate_type))
            .with_field(FieldDefn::new("y", coordinate_type))
            .with_geom_field(GeomFieldDefn::new("geom", GeometryType::POINT))
    }

    fn columns_plan(source: &LayerSchema) -> SchemaPlan {
        let mut def = LayerDefinition::new("pts", SourceDescriptor::new("raw"));
        def.geometry_fields = Some(vec![GeometryFieldSpec::point_from_columns("p", "x", "y")]);
        def.fid = Some("gid".into());
        SchemaPlan::build(&def, source).unwrap()
    }

    fn bbox() -> SpatialQuery {
        SpatialQuery::new(0, Envelope::new(1.0, 2.0, 3.0, 4.0).to_polygon()).unwrap()
    }

    #[test]
    fn fid_is_renamed_to_fid_column() {
        let source = source(FieldType::Real);
        let plan = columns_plan(&source);
        let translator = FilterTranslator {
            plan: &plan,
            source: &source,
            capabilities: Capabilities::all(),
            region: None,
        };
        let filter = CompiledFilter::parse("fid = 3 AND id > 1").unwrap();
        assert_eq!(
            translator.attribute(&filter).unwrap().text(),
            "gid = 3 AND id > 1"
        );
    }

    #[test]
    fn numeric_columns_become_range_predicates() {
        let source = source(FieldType::Real);
        let plan = columns_plan(&source);
        let translator = FilterTranslator {
            plan: &plan,
            source: &source,
            capabilities: Capabilities::all(),
            region: None,
        };
        assert!(translator.fast_spatial_filter());
        let (routing, diagnostics) = translator.route(None, Some(&bbox()));
        assert!(diagnostics.is_empty());
        assert!(routing.is_delegated());
        assert_eq!(
            routing.source_attribute.as_deref(),
            Some("x >= 1 AND x <= 3 AND y >= 2 AND y <= 4")
        );
    }

    #[test]
    fn text_columns_fall_back_to_local() {
        let source = source(FieldType::String);
        let plan = columns_plan(&source);
        let translator = FilterTranslator {
            plan: &plan,
            source: &source,
            capabilities: Capabilities::all(),
            region: None,
        };
        assert!(!translator.fast_spatial_filter());
        let filter = CompiledFilter::parse("id = 1").unwrap();
        let (routing, diagnostics) = translator.route(Some(&filter), Some(&bbox()));
        assert_eq!(
            diagnostics[0].code,
            DiagnosticCode::FilterNonNumericCoordinates
        );
        assert_eq!(routing.source_attribute.as_deref(), Some("id = 1"));
        assert!(routing.local_spatial.is_some());
    }

    #[test]
    fn explicit_renames_stay_local() {
        let source = source(FieldType::Real);
        let mut def = LayerDefinition::new("pts", SourceDescriptor::new("raw"));
        def.fields = Some(vec![
            FieldSpec::new("id"),
            FieldSpec::new("other").with_src("gid"),
        ]);
        let plan = SchemaPlan::build(&def, &source).unwrap();
        let translator = FilterTranslator {
            plan: &plan,
            source: &source,
            capabilities: Capabilities::all(),
            region: None,
        };
        assert!(translator
            .attribute(&CompiledFilter::parse("ID = 1").unwrap())
            .is_some());
        let renamed = CompiledFilter::parse("other = 1").unwrap();
        assert!(translator.attribute(&renamed).is_none());
        let (routing, _) = translator.route(Some(&renamed), None);
        assert!(routing.source_attribute.is_none());
        assert!(!routing.is_delegated());
    }

    #[test]
    fn region_narrows_direct_scans() {
        let source = source(FieldType::Real);
        let def = LayerDefinition::new("pts", SourceDescriptor::new("raw"));
        let plan = SchemaPlan::build(&def, &source).unwrap();
        let region = Envelope::new(0.0, 0.0, 5.0, 5.0).to_polygon();
        let clipper = RegionClipper::new(region.clone(), false, Arc::new(PlanarEngine), true)
            .unwrap()
            .into_parts()
            .0;
        let translator = FilterTranslator {
            plan: &plan,
            source: &source,
            capabilities: Capabilities::all(),
            region: Some(&clipper),
        };
        assert!(translator.fast_spatial_filter());
        let (routing, _) = translator.route(None, None);
        assert_eq!(routing.source_spatial, Some((0, region)));

        let point = SpatialQuery::new(0, Geometry::Point(vlayer_core::Coord::xy(1.0, 1.0))).unwrap();
        let (routing, _) = translator.route(None, Some(&point));
        assert!(routing.local_spatial.is_some());
    }
}
