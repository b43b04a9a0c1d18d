//! Feature layer contract shared by physical sources and virtual layers

use std::sync::{Arc, Mutex, MutexGuard};
use vlayer_core::{Diagnostic, Envelope, Feature, Geometry, LayerSchema};
use vlayer_filter::FilterError;

/// Shared handle to an open layer
pub type SourceHandle = Arc<Mutex<dyn FeatureLayer>>;

/// Lock a handle, recovering the layer if a previous holder panicked
pub fn lock(handle: &SourceHandle) -> MutexGuard<'_, dyn FeatureLayer + 'static> {
    handle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// What a layer can answer without a full scan, and which writes it accepts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Feature count is answered without scanning
    pub fast_feature_count: bool,

    /// Extent is answered without scanning
    pub fast_extent: bool,

    /// Spatial filters are evaluated natively
    pub fast_spatial_filter: bool,

    /// Features can be fetched by id
    pub random_read: bool,

    /// New features can be created
    pub sequential_write: bool,

    /// Existing features can be replaced or deleted
    pub random_write: bool,

    pub transactions: bool,
}

impl Capabilities {
    /// Every capability enabled
    pub fn all() -> Self {
        Self {
            fast_feature_count: true,
            fast_extent: true,
            fast_spatial_filter: true,
            random_read: true,
            sequential_write: true,
            random_write: true,
            transactions: true,
        }
    }

    /// Same capabilities with writes switched off
    pub fn read_only(self) -> Self {
        Self {
            sequential_write: false,
            random_write: false,
            transactions: false,
            ..self
        }
    }

    /// Flags held by both
    pub fn and(self, other: Capabilities) -> Self {
        Self {
            fast_feature_count: self.fast_feature_count && other.fast_feature_count,
            fast_extent: self.fast_extent && other.fast_extent,
            fast_spatial_filter: self.fast_spatial_filter && other.fast_spatial_filter,
            random_read: self.random_read && other.random_read,
            sequential_write: self.sequential_write && other.sequential_write,
            random_write: self.random_write && other.random_write,
            transactions: self.transactions && other.transactions,
        }
    }

    /// Names of the enabled flags, for reports
    pub fn names(&self) -> Vec<String> {
        [
            ("fast_feature_count", self.fast_feature_count),
            ("fast_extent", self.fast_extent),
            ("fast_spatial_filter", self.fast_spatial_filter),
            ("random_read", self.random_read),
            ("sequential_write", self.sequential_write),
            ("random_write", self.random_write),
            ("transactions", self.transactions),
        ]
        .into_iter()
        .filter(|(_, enabled)| *enabled)
        .map(|(name, _)| name.to_string())
        .collect()
    }
}

/// Hard failures of layer operations
///
/// Per-feature problems are not errors; they surface as diagnostics through
/// `FeatureLayer::take_diagnostics`.
#[derive(Debug, thiserror::Error)]
pub enum LayerError {
    #[error("Invalid definition: {0}")]
    Definition(String),

    #[error("Recursive definition: {0}")]
    Recursion(String),

    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Write rejected: {0}")]
    WriteRejected(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error("Feature {0} not found")]
    NotFound(i64),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LayerError {
    /// Whether the error leaves the layer unusable for data access
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::SourceUnavailable(_) | Self::Recursion(_))
    }
}

/// A vector layer: a schema plus a stream of features
///
/// Filters are sticky: once installed they apply to every read, count and
/// extent until cleared with `None`. Write and transaction methods default to
/// `Unsupported`.
pub trait FeatureLayer: Send {
    fn name(&self) -> &str;

    /// Current schema; never fails, a layer that cannot resolve its schema
    /// returns an empty one
    ///
    /// Takes `&mut self` because lazily opened layers may bind their source
    /// to answer.
    fn schema(&mut self) -> Arc<LayerSchema>;

    fn capabilities(&mut self) -> Capabilities;

    /// Make the layer ready for data access
    ///
    /// Layers that open lazily do their work here; the call is idempotent.
    fn ensure_ready(&mut self) -> Result<(), LayerError> {
        Ok(())
    }

    /// Restart the sequential scan
    fn reset_reading(&mut self);

    /// Next feature passing the installed filters
    fn next_feature(&mut self) -> Result<Option<Feature>, LayerError>;

    /// Fetch a feature by id, ignoring filters
    fn feature(&mut self, fid: i64) -> Result<Option<Feature>, LayerError>;

    /// Number of features passing the installed filters
    fn feature_count(&mut self) -> Result<u64, LayerError>;

    /// Extent of a geometry field over features passing the installed filters
    fn extent(&mut self, geom_field: usize) -> Result<Option<Envelope>, LayerError>;

    /// Install or clear the spatial filter on a geometry field
    fn set_spatial_filter(
        &mut self,
        geom_field: usize,
        filter: Option<Geometry>,
    ) -> Result<(), LayerError>;

    /// Install or clear the attribute filter
    fn set_attribute_filter(&mut self, filter: Option<&str>) -> Result<(), LayerError>;

    /// Insert a feature; the assigned id is written back into `feature`
    fn create_feature(&mut self, _feature: &mut Feature) -> Result<(), LayerError> {
        Err(LayerError::Unsupported(format!(
            "{} does not support creating features",
            self.name()
        )))
    }

    /// Replace the feature with the same id
    fn set_feature(&mut self, _feature: &Feature) -> Result<(), LayerError> {
        Err(LayerError::Unsupported(format!(
            "{} does not support updating features",
            self.name()
        )))
    }

    fn delete_feature(&mut self, _fid: i64) -> Result<(), LayerError> {
        Err(LayerError::Unsupported(format!(
            "{} does not support deleting features",
            self.name()
        )))
    }

    fn start_transaction(&mut self) -> Result<(), LayerError> {
        Err(LayerError::Unsupported(format!(
            "{} does not support transactions",
            self.name()
        )))
    }

    fn commit_transaction(&mut self) -> Result<(), LayerError> {
        Err(LayerError::Unsupported(format!(
            "{} does not support transactions",
            self.name()
        )))
    }

    fn rollback_transaction(&mut self) -> Result<(), LayerError> {
        Err(LayerError::Unsupported(format!(
            "{} does not support transactions",
            self.name()
        )))
    }

    /// Flush pending writes
    fn sync_to_disk(&mut self) -> Result<(), LayerError> {
        Ok(())
    }

    /// Diagnostics recorded since the last call
    fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        Vec::new()
    }
}
