//! Virtual layer definitions
//!
//! This crate handles:
//! - The serde model of definition documents (JSON and TOML)
//! - Loading definitions from files
//! - Structural validation that needs no source access

pub mod document;
pub mod validate;

pub use document::{
    is_definition_path, is_inline_definition, DefinitionDocument, DefinitionError,
    FieldSpec, FieldStrategy, GeometryEncoding, GeometryFieldSpec, LayerDefinition, LayerNode,
    RegionSpec, SourceDescriptor, UnionDefinition, UnionGeometryField, WarpedDefinition,
};
pub use validate::{validate, validate_all};
