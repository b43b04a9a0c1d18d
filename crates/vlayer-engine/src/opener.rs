//! Opening definitions into virtual datasets
//!
//! `Engine` owns everything an open call needs: configuration, the driver
//! registry, the geometry engine, the transform factory and the pool of
//! shared sources. Each open call starts a fresh `OpenContext`.

use crate::guard::{definition_error, OpenContext, SharedPool, SourceIdentity};
use crate::layer::Layer;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use vlayer_core::{Diagnostic, DiagnosticLog, EngineConfig, Location, Severity, SoftResult};
use vlayer_definition::{
    is_definition_path, is_inline_definition, validate, DefinitionDocument,
};
use vlayer_geom::{BuiltinTransforms, GeometryEngine, PlanarEngine, TransformFactory};
use vlayer_source::{DataSource, Driver, DriverRegistry, LayerError, SourceHandle};

/// Shared services of one engine
#[derive(Clone)]
pub(crate) struct Runtime {
    pub config: EngineConfig,
    pub drivers: DriverRegistry,
    pub geometry: Arc<dyn GeometryEngine>,
    pub transforms: Arc<dyn TransformFactory>,
    pub pool: Arc<SharedPool>,
}

impl Runtime {
    /// Apply the configured severity and log a diagnostic
    pub fn record(&self, log: &mut DiagnosticLog, mut diagnostic: Diagnostic) {
        diagnostic.severity = self
            .config
            .severity
            .get_severity(diagnostic.code, diagnostic.severity);
        if diagnostic.severity >= Severity::Warn {
            tracing::warn!(code = %diagnostic.code, "{}", diagnostic.message);
        }
        log.push(diagnostic);
    }

    /// Keep the value of a soft result, logging its diagnostic if any
    pub fn absorb<T>(
        &self,
        log: &mut DiagnosticLog,
        result: SoftResult<T>,
        location: impl FnOnce() -> Location,
    ) -> T {
        let (value, diagnostic) = result.into_parts();
        if let Some(diagnostic) = diagnostic {
            self.record(log, diagnostic.or_location(location));
        }
        value
    }
}

/// Options of one open call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenOptions {
    /// Accept writes; `None` uses the configured default
    pub update: Option<bool>,
}

impl OpenOptions {
    pub fn read_only() -> Self {
        Self {
            update: Some(false),
        }
    }

    pub fn update() -> Self {
        Self { update: Some(true) }
    }
}

/// Entry point for opening virtual layer definitions
#[derive(Clone)]
pub struct Engine {
    runtime: Arc<Runtime>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.runtime.config)
            .field("drivers", &self.runtime.drivers)
            .field("geometry", &self.runtime.geometry.name())
            .finish()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Engine {
    /// Engine with the JSON file driver, the planar geometry engine and the
    /// built-in transforms
    pub fn new(config: EngineConfig) -> Self {
        Self {
            runtime: Arc::new(Runtime {
                config,
                drivers: DriverRegistry::default(),
                geometry: Arc::new(PlanarEngine),
                transforms: Arc::new(BuiltinTransforms),
                pool: Arc::new(SharedPool::default()),
            }),
        }
    }

    fn runtime_mut(&mut self) -> &mut Runtime {
        Arc::make_mut(&mut self.runtime)
    }

    /// Register an additional driver
    pub fn with_driver(mut self, driver: impl Driver + 'static) -> Self {
        self.runtime_mut().drivers.register(driver);
        self
    }

    /// Replace the driver registry
    pub fn with_drivers(mut self, drivers: DriverRegistry) -> Self {
        self.runtime_mut().drivers = drivers;
        self
    }

    pub fn with_geometry_engine(mut self, engine: impl GeometryEngine + 'static) -> Self {
        self.runtime_mut().geometry = Arc::new(engine);
        self
    }

    pub fn with_transforms(mut self, transforms: impl TransformFactory + 'static) -> Self {
        self.runtime_mut().transforms = Arc::new(transforms);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.runtime.config
    }

    /// Number of shared sources currently alive
    pub fn shared_sources(&self) -> usize {
        self.runtime.pool.live()
    }

    pub(crate) fn context(&self, update: bool) -> OpenContext {
        OpenContext::new(self.runtime.clone(), update)
    }

    /// Open a definition file or inline definition text
    pub fn open(&self, locator: &str, options: OpenOptions) -> Result<VirtualDataset, LayerError> {
        let (document, base) = if is_inline_definition(locator) {
            let document = DefinitionDocument::from_json(locator).map_err(definition_error)?;
            (document, self.runtime.config.relative_root.clone())
        } else if is_definition_path(locator) {
            let path = PathBuf::from(locator);
            let document = DefinitionDocument::from_file(&path).map_err(definition_error)?;
            let base = path.parent().map(Path::to_path_buf).unwrap_or_default();
            (document, base)
        } else {
            return Err(LayerError::Definition(format!(
                "'{}' is neither a definition file nor inline definition text",
                locator
            )));
        };
        validate(&document).map_err(|e| LayerError::Definition(e.to_string()))?;

        let context = self
            .context(self.update(options))
            .enter(SourceIdentity::new(locator, false))?;
        VirtualDataset::build(locator, &document, &context, Some(base.as_path()))
    }

    /// Open an already parsed document
    ///
    /// Relative source paths resolve against `base_dir`, or the configured
    /// root when absent.
    pub fn open_document(
        &self,
        document: &DefinitionDocument,
        base_dir: Option<&Path>,
        options: OpenOptions,
    ) -> Result<VirtualDataset, LayerError> {
        validate(document).map_err(|e| LayerError::Definition(e.to_string()))?;
        let base = base_dir
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.runtime.config.relative_root.clone());
        let context = self.context(self.update(options));
        VirtualDataset::build("document", document, &context, Some(base.as_path()))
    }

    fn update(&self, options: OpenOptions) -> bool {
        options.update.unwrap_or(self.runtime.config.default_update)
    }
}

/// The layers of one opened definition
pub struct VirtualDataset {
    name: String,
    layers: Vec<(String, SourceHandle)>,
}

impl std::fmt::Debug for VirtualDataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualDataset")
            .field("name", &self.name)
            .field("layers", &self.layer_names())
            .finish()
    }
}

impl VirtualDataset {
    /// Build every top-level layer; sources are opened lazily
    pub(crate) fn build(
        name: &str,
        document: &DefinitionDocument,
        context: &OpenContext,
        base_dir: Option<&Path>,
    ) -> Result<Self, LayerError> {
        let mut layers = Vec::with_capacity(document.layers.len());
        for node in &document.layers {
            let layer = Layer::build(node, context, base_dir)?;
            let handle: SourceHandle = Arc::new(Mutex::new(layer));
            layers.push((node.name().to_string(), handle));
        }
        let name = if is_inline_definition(name) {
            "inline".to_string()
        } else {
            name.to_string()
        };
        tracing::info!(
            dataset = %name,
            layers = layers.len(),
            depth = context.stack().len(),
            update = context.update(),
            "opened virtual dataset"
        );
        Ok(Self { name, layers })
    }

    pub fn layer_names(&self) -> Vec<&str> {
        self.layers.iter().map(|(name, _)| name.as_str()).collect()
    }
}

impl DataSource for VirtualDataset {
    fn name(&self) -> &str {
        &self.name
    }

    fn layer_count(&self) -> usize {
        self.layers.len()
    }

    fn layer(&self, index: usize) -> Option<SourceHandle> {
        self.layers.get(index).map(|(_, handle)| handle.clone())
    }

    fn layer_by_name(&self, name: &str) -> Option<SourceHandle> {
        self.layers
            .iter()
            .find(|(layer, _)| layer.eq_ignore_ascii_case(name))
            .map(|(_, handle)| handle.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vlayer_core::{DiagnosticCode, Severity};

    #[test]
    fn severity_overrides_apply_when_recording() {
        let mut config = EngineConfig::default();
        config
            .severity
            .set_override(DiagnosticCode::FieldConversion, Severity::Error);
        let engine = Engine::new(config);
        let context = engine.context(false);
        let mut log = DiagnosticLog::new();
        context.runtime().record(
            &mut log,
            Diagnostic::warn(DiagnosticCode::FieldConversion, "bad value"),
        );
        assert_eq!(log.entries()[0].severity, Severity::Error);
    }

    #[test]
    fn rejects_plain_data_locators() {
        let engine = Engine::default();
        let err = engine.open("points.json", OpenOptions::default()).unwrap_err();
        assert!(matches!(err, LayerError::Definition(_)));
    }

    #[test]
    fn update_defaults_to_configuration() {
        let config = EngineConfig {
            default_update: true,
            ..EngineConfig::default()
        };
        let engine = Engine::new(config);
        assert!(engine.update(OpenOptions::default()));
        assert!(!engine.update(OpenOptions::read_only()));
    }
}
