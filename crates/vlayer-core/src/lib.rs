//! vlayer core
//!
//! Core domain model shared by every vlayer crate: layer schemas, geometries,
//! features, spatial references and the diagnostic system.
//! Never rename diagnostic codes - they are part of the public API.

pub mod config;
pub mod diagnostic;
pub mod feature;
pub mod geometry;
pub mod report;
pub mod schema;
pub mod srs;

pub use config::{ConfigError, EngineConfig, SeverityThreshold};
pub use diagnostic::{Diagnostic, DiagnosticCode, DiagnosticLog, Location, Severity, SoftResult};
pub use feature::{Feature, FieldValue};
pub use geometry::{Coord, Envelope, Geometry};
pub use report::{LayerSummary, Report, ReportSummary, ReportVersion};
pub use schema::{
    CoordinatePrecision, FieldDefn, FieldSubType, FieldType, GeomFieldDefn, GeometryKind,
    GeometryType, LayerSchema,
};
pub use srs::{SpatialRef, SrsError};
