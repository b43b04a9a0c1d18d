//! Virtual layer engine
//!
//! This crate turns definition documents into live layers:
//! - Geometry derivation strategies (direct, WKT, WKB, shape, coordinate columns)
//! - The field schema builder for implicit and explicit field modes
//! - Filter pushdown and the region clipper
//! - Direct, warped and union layers behind one `FeatureLayer` contract
//! - The recursion guard, the shared-source pool and lazy source binding
//!
//! ```no_run
//! use vlayer_engine::{Engine, OpenOptions};
//! use vlayer_source::{lock, DataSource};
//!
//! let engine = Engine::default();
//! let dataset = engine.open("roads.vrt.json", OpenOptions::read_only()).unwrap();
//! let layer = dataset.layer(0).unwrap();
//! let count = lock(&layer).feature_count().unwrap();
//! ```

pub mod clipper;
pub mod derivation;
pub mod guard;
pub mod layer;
pub mod opener;
pub mod schema_builder;
pub mod translator;
pub mod union;
pub mod virtual_layer;
pub mod warped;

pub use clipper::RegionClipper;
pub use derivation::GeometryStrategy;
pub use guard::{OpenContext, SharedPool, SourceIdentity};
pub use layer::Layer;
pub use opener::{Engine, OpenOptions, VirtualDataset};
pub use schema_builder::SchemaPlan;
pub use translator::{FilterTranslator, Routing, SpatialQuery};
pub use union::UnionLayer;
pub use virtual_layer::{LayerState, VirtualLayer};
pub use warped::WarpedLayer;
