//! The closed set of exposed layer kinds

use crate::guard::OpenContext;
use crate::union::UnionLayer;
use crate::virtual_layer::VirtualLayer;
use crate::warped::WarpedLayer;
use std::path::Path;
use std::sync::Arc;
use vlayer_core::{Diagnostic, Envelope, Feature, Geometry, LayerSchema};
use vlayer_definition::LayerNode;
use vlayer_source::{Capabilities, FeatureLayer, LayerError};

/// An exposed layer of any kind
pub enum Layer {
    Virtual(VirtualLayer),
    Warped(WarpedLayer),
    Union(UnionLayer),
}

impl Layer {
    /// Build a layer tree from a definition node
    ///
    /// Direct layers do not open their source here; warped and union layers
    /// need their inner layers bound to resolve their own schema.
    pub fn build(
        node: &LayerNode,
        context: &OpenContext,
        base_dir: Option<&Path>,
    ) -> Result<Layer, LayerError> {
        match node {
            LayerNode::Direct(def) => Ok(Layer::Virtual(VirtualLayer::new(
                def.clone(),
                context.clone(),
                base_dir.map(Path::to_path_buf),
            )?)),
            LayerNode::Warped(def) => {
                let inner = Layer::build(&def.layer, context, base_dir)?;
                Ok(Layer::Warped(WarpedLayer::new(def, inner, context.clone())?))
            }
            LayerNode::Union(def) => {
                let inner = def
                    .layers
                    .iter()
                    .map(|node| Layer::build(node, context, base_dir))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Layer::Union(UnionLayer::new(def, inner, context.clone())?))
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Layer::Virtual(_) => "direct",
            Layer::Warped(_) => "warped",
            Layer::Union(_) => "union",
        }
    }

    fn inner(&mut self) -> &mut dyn FeatureLayer {
        match self {
            Layer::Virtual(layer) => layer,
            Layer::Warped(layer) => layer,
            Layer::Union(layer) => layer,
        }
    }
}

impl FeatureLayer for Layer {
    fn name(&self) -> &str {
        match self {
            Layer::Virtual(layer) => layer.name(),
            Layer::Warped(layer) => layer.name(),
            Layer::Union(layer) => layer.name(),
        }
    }

    fn schema(&mut self) -> Arc<LayerSchema> {
        self.inner().schema()
    }

    fn capabilities(&mut self) -> Capabilities {
        self.inner().capabilities()
    }

    fn ensure_ready(&mut self) -> Result<(), LayerError> {
        self.inner().ensure_ready()
    }

    fn reset_reading(&mut self) {
        self.inner().reset_reading()
    }

    fn next_feature(&mut self) -> Result<Option<Feature>, LayerError> {
        self.inner().next_feature()
    }

    fn feature(&mut self, fid: i64) -> Result<Option<Feature>, LayerError> {
        self.inner().feature(fid)
    }

    fn feature_count(&mut self) -> Result<u64, LayerError> {
        self.inner().feature_count()
    }

    fn extent(&mut self, geom_field: usize) -> Result<Option<Envelope>, LayerError> {
        self.inner().extent(geom_field)
    }

    fn set_spatial_filter(
        &mut self,
        geom_field: usize,
        filter: Option<Geometry>,
    ) -> Result<(), LayerError> {
        self.inner().set_spatial_filter(geom_field, filter)
    }

    fn set_attribute_filter(&mut self, filter: Option<&str>) -> Result<(), LayerError> {
        self.inner().set_attribute_filter(filter)
    }

    fn create_feature(&mut self, feature: &mut Feature) -> Result<(), LayerError> {
        self.inner().create_feature(feature)
    }

    fn set_feature(&mut self, feature: &Feature) -> Result<(), LayerError> {
        self.inner().set_feature(feature)
    }

    fn delete_feature(&mut self, fid: i64) -> Result<(), LayerError> {
        self.inner().delete_feature(fid)
    }

    fn start_transaction(&mut self) -> Result<(), LayerError> {
        self.inner().start_transaction()
    }

    fn commit_transaction(&mut self) -> Result<(), LayerError> {
        self.inner().commit_transaction()
    }

    fn rollback_transaction(&mut self) -> Result<(), LayerError> {
        self.inner().rollback_transaction()
    }

    fn sync_to_disk(&mut self) -> Result<(), LayerError> {
        self.inner().sync_to_disk()
    }

    fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        self.inner().take_diagnostics()
    }
}
