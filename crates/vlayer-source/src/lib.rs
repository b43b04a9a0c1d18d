//! Source layers
//!
//! This crate handles:
//! - The `FeatureLayer` contract every layer implements, physical or virtual
//! - Capability flags and the `LayerError` taxonomy
//! - In-memory layers and datasets, the JSON dataset driver and the driver registry

pub mod adapter;
pub mod memory;
pub mod registry;

pub use adapter::{lock, Capabilities, FeatureLayer, LayerError, SourceHandle};
pub use memory::{MemoryLayer, ReceivedFilters};
pub use registry::{
    DataSource, Driver, DriverRegistry, JsonFileDriver, MemoryDataset, MemoryDriver,
};
