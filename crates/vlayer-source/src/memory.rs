//! In-memory feature layer
//!
//! Holds its features in a map keyed by id and evaluates filters itself.
//! It is the physical source used by tests and by the JSON file driver.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use vlayer_source::MemoryLayer;
//!
//! let layer = MemoryLayer::new(schema)
//!     .with_feature(Feature::new(schema.clone()).with_field("id", 1))
//!     .with_capabilities(Capabilities::all().read_only());
//! ```
//!
//! ## Observing pushdown
//!
//! Every filter the layer receives is recorded in a shared `ReceivedFilters`
//! log, so a test can keep the log and check what a wrapping layer delegated.

use crate::adapter::{Capabilities, FeatureLayer, LayerError};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use vlayer_core::{Envelope, Feature, Geometry, LayerSchema};
use vlayer_filter::CompiledFilter;
use vlayer_geom::{GeometryEngine, PlanarEngine};

/// Filters a `MemoryLayer` has been handed, in call order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReceivedFilters {
    pub spatial: Vec<Option<Geometry>>,
    pub attribute: Vec<Option<String>>,
}

impl ReceivedFilters {
    /// Attribute filter currently installed
    pub fn current_attribute(&self) -> Option<&str> {
        self.attribute.last().and_then(|f| f.as_deref())
    }

    /// Spatial filter currently installed
    pub fn current_spatial(&self) -> Option<&Geometry> {
        self.spatial.last().and_then(|f| f.as_ref())
    }
}

#[derive(Debug, Clone)]
struct SpatialFilter {
    geom_field: usize,
    geometry: Geometry,
    envelope: Option<Envelope>,
}

/// Layer backed by a feature map
#[derive(Debug, Clone)]
pub struct MemoryLayer {
    schema: Arc<LayerSchema>,
    features: BTreeMap<i64, Feature>,
    next_fid: i64,
    capabilities: Capabilities,

    /// Key of the last feature returned by the scan
    cursor: Option<i64>,

    spatial_filter: Option<SpatialFilter>,
    attribute_filter: Option<CompiledFilter>,

    /// Saved state while a transaction is open
    snapshot: Option<(BTreeMap<i64, Feature>, i64)>,

    received: Arc<Mutex<ReceivedFilters>>,
}

impl MemoryLayer {
    /// Create an empty layer with every capability
    pub fn new(schema: impl Into<Arc<LayerSchema>>) -> Self {
        Self {
            schema: schema.into(),
            features: BTreeMap::new(),
            next_fid: 0,
            capabilities: Capabilities::all(),
            cursor: None,
            spatial_filter: None,
            attribute_filter: None,
            snapshot: None,
            received: Arc::new(Mutex::new(ReceivedFilters::default())),
        }
    }

    /// Add a feature, keeping its id if it has one
    pub fn with_feature(mut self, feature: Feature) -> Self {
        self.insert(feature);
        self
    }

    /// Add several features
    pub fn with_features(mut self, features: impl IntoIterator<Item = Feature>) -> Self {
        for feature in features {
            self.insert(feature);
        }
        self
    }

    /// Replace the advertised capabilities
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Refuse every write
    pub fn read_only(mut self) -> Self {
        self.capabilities = self.capabilities.read_only();
        self
    }

    /// Shared log of the filters this layer receives
    pub fn received_filters(&self) -> Arc<Mutex<ReceivedFilters>> {
        self.received.clone()
    }

    /// Add a feature and return its id
    pub fn insert(&mut self, feature: Feature) -> i64 {
        let fid = feature.fid().unwrap_or(self.next_fid);
        let mut stored = feature.remap(self.schema.clone());
        stored.set_fid(Some(fid));
        self.features.insert(fid, stored);
        self.next_fid = self.next_fid.max(fid + 1);
        fid
    }

    /// Stored features in id order, ignoring filters
    pub fn stored_features(&self) -> impl Iterator<Item = &Feature> {
        self.features.values()
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    fn record(&self, f: impl FnOnce(&mut ReceivedFilters)) {
        let mut received = self
            .received
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut received);
    }

    fn passes(&self, feature: &Feature) -> bool {
        if let Some(filter) = &self.spatial_filter {
            let Some(geometry) = feature.geometry_at(filter.geom_field) else {
                return false;
            };
            let bbox_hit = match (geometry.envelope(), filter.envelope) {
                (Some(a), Some(b)) => a.intersects(&b),
                _ => false,
            };
            if !bbox_hit {
                return false;
            }
            if !filter.geometry.is_rectangle() && !PlanarEngine.intersects(geometry, &filter.geometry)
            {
                return false;
            }
        }
        match &self.attribute_filter {
            Some(filter) => filter.matches(feature),
            None => true,
        }
    }

    fn check_writable(&self, random: bool) -> Result<(), LayerError> {
        let allowed = if random {
            self.capabilities.random_write
        } else {
            self.capabilities.sequential_write
        };
        if allowed {
            Ok(())
        } else {
            Err(LayerError::WriteRejected(format!(
                "layer '{}' is read-only",
                self.schema.name
            )))
        }
    }
}

impl FeatureLayer for MemoryLayer {
    fn name(&self) -> &str {
        &self.schema.name
    }

    fn schema(&mut self) -> Arc<LayerSchema> {
        self.schema.clone()
    }

    fn capabilities(&mut self) -> Capabilities {
        self.capabilities
    }

    fn reset_reading(&mut self) {
        self.cursor = None;
    }

    fn next_feature(&mut self) -> Result<Option<Feature>, LayerError> {
        let start = match self.cursor {
            Some(last) => std::ops::Bound::Excluded(last),
            None => std::ops::Bound::Unbounded,
        };
        let found = self
            .features
            .range((start, std::ops::Bound::Unbounded))
            .find(|(_, feature)| self.passes(feature))
            .map(|(fid, feature)| (*fid, feature.clone()));
        match found {
            Some((fid, feature)) => {
                self.cursor = Some(fid);
                Ok(Some(feature))
            }
            None => {
                self.cursor = self.features.keys().next_back().copied().or(self.cursor);
                Ok(None)
            }
        }
    }

    fn feature(&mut self, fid: i64) -> Result<Option<Feature>, LayerError> {
        Ok(self.features.get(&fid).cloned())
    }

    fn feature_count(&mut self) -> Result<u64, LayerError> {
        Ok(self.features.values().filter(|f| self.passes(f)).count() as u64)
    }

    fn extent(&mut self, geom_field: usize) -> Result<Option<Envelope>, LayerError> {
        Ok(self
            .features
            .values()
            .filter(|f| self.passes(f))
            .filter_map(|f| f.geometry_at(geom_field).and_then(Geometry::envelope))
            .reduce(|a, b| a.merge(&b)))
    }

    fn set_spatial_filter(
        &mut self,
        geom_field: usize,
        filter: Option<Geometry>,
    ) -> Result<(), LayerError> {
        self.record(|r| r.spatial.push(filter.clone()));
        self.spatial_filter = filter.map(|geometry| SpatialFilter {
            geom_field,
            envelope: geometry.envelope(),
            geometry,
        });
        Ok(())
    }

    fn set_attribute_filter(&mut self, filter: Option<&str>) -> Result<(), LayerError> {
        self.record(|r| r.attribute.push(filter.map(str::to_string)));
        self.attribute_filter = match filter {
            Some(text) if !text.trim().is_empty() => {
                let compiled = CompiledFilter::parse(text)?;
                compiled.validate(&self.schema)?;
                Some(compiled)
            }
            _ => None,
        };
        Ok(())
    }

    fn create_feature(&mut self, feature: &mut Feature) -> Result<(), LayerError> {
        self.check_writable(false)?;
        if let Some(fid) = feature.fid() {
            if self.features.contains_key(&fid) {
                return Err(LayerError::WriteRejected(format!(
                    "feature {} already exists in '{}'",
                    fid, self.schema.name
                )));
            }
        }
        let fid = self.insert(feature.clone());
        feature.set_fid(Some(fid));
        Ok(())
    }

    fn set_feature(&mut self, feature: &Feature) -> Result<(), LayerError> {
        self.check_writable(true)?;
        let fid = feature.fid().ok_or_else(|| {
            LayerError::WriteRejected("cannot update a feature without an id".to_string())
        })?;
        if !self.features.contains_key(&fid) {
            return Err(LayerError::NotFound(fid));
        }
        self.insert(feature.clone());
        Ok(())
    }

    fn delete_feature(&mut self, fid: i64) -> Result<(), LayerError> {
        self.check_writable(true)?;
        match self.features.remove(&fid) {
            Some(_) => Ok(()),
            None => Err(LayerError::NotFound(fid)),
        }
    }

    fn start_transaction(&mut self) -> Result<(), LayerError> {
        if !self.capabilities.transactions {
            return Err(LayerError::Unsupported(format!(
                "layer '{}' does not support transactions",
                self.schema.name
            )));
        }
        if self.snapshot.is_some() {
            return Err(LayerError::WriteRejected(
                "a transaction is already active".to_string(),
            ));
        }
        self.snapshot = Some((self.features.clone(), self.next_fid));
        Ok(())
    }

    fn commit_transaction(&mut self) -> Result<(), LayerError> {
        match self.snapshot.take() {
            Some(_) => Ok(()),
            None => Err(LayerError::WriteRejected("no active transaction".to_string())),
        }
    }

    fn rollback_transaction(&mut self) -> Result<(), LayerError> {
        match self.snapshot.take() {
            Some((features, next_fid)) => {
                self.features = features;
                self.next_fid = next_fid;
                self.cursor = None;
                Ok(())
            }
            None => Err(LayerError::WriteRejected("no active transaction".to_string())),
        }
    }
}
