//! Structural validation of definitions
//!
//! Everything checkable without opening a source: required attributes,
//! name uniqueness, parsable spatial references and regions, and the
//! parameters each geometry encoding needs. Problems that depend on a
//! source's schema (a missing warped field, an unknown column) are reported
//! when the layer is opened.

use crate::document::{
    DefinitionDocument, DefinitionError, FieldStrategy, GeometryEncoding, GeometryFieldSpec,
    LayerDefinition, LayerNode, UnionDefinition, WarpedDefinition,
};
use vlayer_core::schema::find_duplicate;
use vlayer_core::SpatialRef;

/// Validate a document, stopping at the first problem
pub fn validate(document: &DefinitionDocument) -> Result<(), DefinitionError> {
    match validate_all(document).into_iter().next() {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

/// Validate a document, collecting every problem
pub fn validate_all(document: &DefinitionDocument) -> Vec<DefinitionError> {
    let mut errors = Vec::new();
    if document.layers.is_empty() {
        errors.push(DefinitionError::ParseError(
            "definition declares no layers".to_string(),
        ));
    }
    if let Some(name) = find_duplicate(document.layers.iter().map(LayerNode::name)) {
        errors.push(DefinitionError::DuplicateName {
            scope: "definition".to_string(),
            name: name.to_string(),
        });
    }
    for node in &document.layers {
        validate_node(node, &mut errors);
    }
    errors
}

/// Validate one layer node and its children
pub fn validate_node(node: &LayerNode, errors: &mut Vec<DefinitionError>) {
    match node {
        LayerNode::Direct(def) => validate_direct(def, errors),
        LayerNode::Warped(def) => validate_warped(def, errors),
        LayerNode::Union(def) => validate_union(def, errors),
    }
}

fn check_srs(layer: &str, text: Option<&str>, errors: &mut Vec<DefinitionError>) {
    if let Some(text) = text {
        if let Err(e) = SpatialRef::parse(text) {
            errors.push(DefinitionError::invalid(layer, e.to_string()));
        }
    }
}

fn validate_direct(def: &LayerDefinition, errors: &mut Vec<DefinitionError>) {
    let layer = def.name.as_str();
    if layer.trim().is_empty() {
        errors.push(DefinitionError::missing("<unnamed>", "name"));
    }
    if def.source.locator.trim().is_empty() {
        errors.push(DefinitionError::missing(layer, "source.locator"));
    }
    if def.source.layer.is_some() && def.source.sql.is_some() {
        errors.push(DefinitionError::invalid(
            layer,
            "source.layer and source.sql are mutually exclusive",
        ));
    }
    check_srs(layer, def.srs.as_deref(), errors);

    if let Some(fields) = &def.fields {
        if let Some(name) = find_duplicate(fields.iter().map(|f| f.name.as_str())) {
            errors.push(DefinitionError::DuplicateName {
                scope: format!("fields of layer '{}'", layer),
                name: name.to_string(),
            });
        }
        if let Some(field) = fields.iter().find(|f| f.name.trim().is_empty()) {
            errors.push(DefinitionError::missing(layer, &format!("name of field {:?}", field.src)));
        }
    }

    if let Some(specs) = &def.geometry_fields {
        if let Some(name) = find_duplicate(specs.iter().map(|s| s.name.as_str())) {
            errors.push(DefinitionError::DuplicateName {
                scope: format!("geometry fields of layer '{}'", layer),
                name: name.to_string(),
            });
        }
        for spec in specs {
            validate_geometry_field(layer, spec, errors);
        }
    }

    if let Some(region) = &def.region {
        match vlayer_geom::parse_wkt(&region.wkt) {
            Ok(geometry) if geometry.is_polygonal() => {}
            Ok(geometry) => errors.push(DefinitionError::invalid(
                layer,
                format!("region must be a polygon, got {}", geometry.geometry_type()),
            )),
            Err(e) => errors.push(DefinitionError::invalid(layer, format!("region: {}", e))),
        }
    }
}

fn validate_geometry_field(
    layer: &str,
    spec: &GeometryFieldSpec,
    errors: &mut Vec<DefinitionError>,
) {
    check_srs(layer, spec.srs.as_deref(), errors);
    match spec.encoding {
        GeometryEncoding::Wkt | GeometryEncoding::Wkb | GeometryEncoding::Shape => {
            if spec.field.is_none() {
                errors.push(DefinitionError::missing(
                    layer,
                    &format!("field of geometry field '{}'", spec.name),
                ));
            }
        }
        GeometryEncoding::PointFromColumns => {
            for (axis, column) in [("x", &spec.x), ("y", &spec.y)] {
                if column.is_none() {
                    errors.push(DefinitionError::missing(
                        layer,
                        &format!("{} of geometry field '{}'", axis, spec.name),
                    ));
                }
            }
        }
        GeometryEncoding::Direct => {}
    }
}

fn validate_warped(def: &WarpedDefinition, errors: &mut Vec<DefinitionError>) {
    let name = def.name.as_deref().unwrap_or_else(|| def.layer.name());
    match def.target_srs.as_deref() {
        None => errors.push(DefinitionError::missing(name, "target_srs")),
        Some(text) => check_srs(name, Some(text), errors),
    }
    check_srs(name, def.source_srs.as_deref(), errors);
    if let LayerNode::Direct(inner) = def.layer.as_ref() {
        if inner.is_non_spatial() {
            errors.push(DefinitionError::invalid(
                name,
                "the warped layer has no geometry field",
            ));
        }
    }
    validate_node(&def.layer, errors);
}

fn validate_union(def: &UnionDefinition, errors: &mut Vec<DefinitionError>) {
    let layer = def.name.as_str();
    if layer.trim().is_empty() {
        errors.push(DefinitionError::missing("<unnamed union>", "name"));
    }
    if def.layers.is_empty() {
        errors.push(DefinitionError::missing(layer, "layers"));
    }
    if let Some(name) = find_duplicate(def.layers.iter().map(LayerNode::name)) {
        errors.push(DefinitionError::DuplicateName {
            scope: format!("layers of union '{}'", layer),
            name: name.to_string(),
        });
    }
    if def.effective_strategy() == FieldStrategy::Explicit
        && def.fields.is_none()
        && def.geometry_fields.is_none()
    {
        errors.push(DefinitionError::invalid(
            layer,
            "the explicit field strategy needs fields or geometry_fields",
        ));
    }
    if let Some(fields) = &def.fields {
        if let Some(name) = find_duplicate(fields.iter().map(|f| f.name.as_str())) {
            errors.push(DefinitionError::DuplicateName {
                scope: format!("fields of union '{}'", layer),
                name: name.to_string(),
            });
        }
        for field in fields {
            if field.src.as_deref().is_some_and(|src| src != field.name) {
                errors.push(DefinitionError::invalid(
                    layer,
                    format!(
                        "union field '{}' cannot read another column; union fields match by name",
                        field.name
                    ),
                ));
            }
        }
        if let Some(provenance) = &def.source_layer_field {
            if fields.iter().any(|f| f.name.eq_ignore_ascii_case(provenance)) {
                errors.push(DefinitionError::invalid(
                    layer,
                    format!("source_layer_field '{}' clashes with a declared field", provenance),
                ));
            }
        }
    }
    check_srs(layer, def.srs.as_deref(), errors);
    for geom in def.geometry_fields.iter().flatten() {
        check_srs(layer, geom.srs.as_deref(), errors);
    }
    for node in &def.layers {
        validate_node(node, errors);
    }
}
