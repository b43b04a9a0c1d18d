//! Geometry codecs, predicates and coordinate transforms
//!
//! This crate handles:
//! - Reading and writing WKT, WKB and ESRI shape records
//! - Intersection tests and polygon clipping behind `GeometryEngine`
//! - Reprojection between the built-in spatial references behind `TransformFactory`

pub mod binary;
pub mod ops;
pub mod shape;
pub mod text;
pub mod transform;

pub use ops::{BoundsEngine, GeometryEngine, PlanarEngine};
pub use shape::{parse_shape, to_shape};
pub use transform::{
    transform_envelope, transform_geometry, BuiltinTransforms, CoordinateTransform,
    TransformError, TransformFactory,
};
pub use binary::{parse_wkb, to_wkb};
pub use text::{parse_wkt, to_wkt};

/// Geometry codec and engine errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GeomError {
    #[error("invalid WKT: {0}")]
    InvalidWkt(String),

    #[error("invalid WKB: {0}")]
    InvalidWkb(String),

    #[error("invalid shape record: {0}")]
    InvalidShape(String),

    #[error("unsupported shape type code {0}")]
    UnsupportedShapeType(i32),

    #[error("empty point cannot be represented")]
    EmptyPoint,

    #[error("clipping failed: {0}")]
    ClipFailed(String),

    #[error("{0} is not supported by this geometry engine")]
    Unsupported(String),
}
