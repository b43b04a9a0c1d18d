//! Recursion guard and shared-source pool
//!
//! Opening is threaded through an explicit `OpenContext` instead of global
//! state. A context carries the chain of sources being opened above the
//! current call; entering a source that is already on the chain fails with
//! `LayerError::Recursion`. Contexts are values: entering returns a child
//! context and the parent is untouched, so the "pop" happens when the child
//! goes out of scope and unrelated open calls never see each other's chain.
//!
//! Shared sources are cached by resolved locator in a pool of weak
//! references, so a shared source lives exactly as long as some layer still
//! holds it.

use crate::opener::{Runtime, VirtualDataset};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use vlayer_definition::{
    is_definition_path, is_inline_definition, DefinitionDocument, DefinitionError,
    SourceDescriptor,
};
use vlayer_source::{DataSource, LayerError, SourceHandle};

/// Identity of a source on the opening chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceIdentity {
    /// Resolved locator; paths are canonicalised when they exist
    pub locator: String,
    pub shared: bool,
}

impl SourceIdentity {
    pub fn new(locator: &str, shared: bool) -> Self {
        Self {
            locator: canonical_locator(locator),
            shared,
        }
    }
}

impl std::fmt::Display for SourceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if is_inline_definition(&self.locator) {
            write!(f, "<inline definition>")
        } else {
            write!(f, "{}", self.locator)
        }
    }
}

fn canonical_locator(locator: &str) -> String {
    if is_inline_definition(locator) {
        return locator.trim().to_string();
    }
    std::fs::canonicalize(locator)
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| locator.to_string())
}

/// Map a definition loading error onto the layer error taxonomy
pub(crate) fn definition_error(error: DefinitionError) -> LayerError {
    match error {
        DefinitionError::IoError(path, message) => {
            LayerError::SourceUnavailable(format!("{}: {}", path, message))
        }
        other => LayerError::Definition(other.to_string()),
    }
}

/// Weakly held data sources opened with the `shared` flag
#[derive(Default)]
pub struct SharedPool {
    entries: Mutex<HashMap<String, Weak<dyn DataSource>>>,
}

impl SharedPool {
    fn entries(&self) -> MutexGuard<'_, HashMap<String, Weak<dyn DataSource>>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Reuse a live source or open and remember a new one
    ///
    /// The pool lock is not held while opening, since opening a definition
    /// may itself open shared sources.
    pub fn get_or_open(
        &self,
        key: &str,
        open: impl FnOnce() -> Result<Arc<dyn DataSource>, LayerError>,
    ) -> Result<Arc<dyn DataSource>, LayerError> {
        if let Some(source) = self.entries().get(key).and_then(Weak::upgrade) {
            tracing::debug!(locator = key, "reusing shared data source");
            return Ok(source);
        }
        let source = open()?;
        let mut entries = self.entries();
        entries.retain(|_, weak| weak.strong_count() > 0);
        entries.insert(key.to_string(), Arc::downgrade(&source));
        Ok(source)
    }

    /// Number of shared sources still alive
    pub fn live(&self) -> usize {
        self.entries()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}

/// A source layer together with the data source that keeps it alive
#[derive(Clone)]
pub struct BoundSource {
    pub dataset: Arc<dyn DataSource>,
    pub layer: SourceHandle,
}

/// State threaded through every open call
#[derive(Clone)]
pub struct OpenContext {
    runtime: Arc<Runtime>,
    stack: Vec<SourceIdentity>,
    update: bool,
}

impl std::fmt::Debug for OpenContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenContext")
            .field("stack", &self.stack)
            .field("update", &self.update)
            .finish()
    }
}

impl OpenContext {
    pub(crate) fn new(runtime: Arc<Runtime>, update: bool) -> Self {
        Self {
            runtime,
            stack: Vec::new(),
            update,
        }
    }

    pub(crate) fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Sources being opened above this context, outermost first
    pub fn stack(&self) -> &[SourceIdentity] {
        &self.stack
    }

    /// Whether layers opened in this context accept writes
    pub fn update(&self) -> bool {
        self.update
    }

    /// Child context with `identity` pushed
    ///
    /// Fails if the identity's locator is already on the chain, whatever its
    /// shared flag, or if the chain is at the configured depth limit.
    pub fn enter(&self, identity: SourceIdentity) -> Result<OpenContext, LayerError> {
        if let Some(position) = self
            .stack
            .iter()
            .position(|open| open.locator == identity.locator)
        {
            let chain: Vec<String> = self.stack[position..]
                .iter()
                .chain(std::iter::once(&identity))
                .map(ToString::to_string)
                .collect();
            return Err(LayerError::Recursion(chain.join(" -> ")));
        }
        let limit = self.runtime.config.max_open_depth;
        if self.stack.len() >= limit {
            return Err(LayerError::Recursion(format!(
                "opening '{}' exceeds the maximum nesting depth of {}",
                identity, limit
            )));
        }
        let mut child = self.clone();
        child.stack.push(identity);
        Ok(child)
    }

    /// Open the layer a source descriptor points at
    pub(crate) fn open_source(
        &self,
        descriptor: &SourceDescriptor,
        base_dir: Option<&Path>,
    ) -> Result<BoundSource, LayerError> {
        let locator = descriptor.resolve(base_dir);
        let identity = SourceIdentity::new(&locator, descriptor.shared);
        let key = identity.locator.clone();
        let child = self.enter(identity)?;

        let dataset = if descriptor.shared {
            self.runtime
                .pool
                .get_or_open(&key, || child.open_dataset(&locator))?
        } else {
            child.open_dataset(&locator)?
        };

        let layer = if let Some(sql) = &descriptor.sql {
            dataset.execute_sql(sql)?
        } else if let Some(name) = &descriptor.layer {
            dataset.layer_by_name(name).ok_or_else(|| {
                LayerError::SourceUnavailable(format!(
                    "'{}' has no layer named '{}'",
                    dataset.name(),
                    name
                ))
            })?
        } else {
            dataset.layer(0).ok_or_else(|| {
                LayerError::SourceUnavailable(format!("'{}' has no layers", dataset.name()))
            })?
        };
        Ok(BoundSource { dataset, layer })
    }

    /// Open a data source; definitions are opened as nested virtual datasets
    fn open_dataset(&self, locator: &str) -> Result<Arc<dyn DataSource>, LayerError> {
        if is_inline_definition(locator) {
            let document = DefinitionDocument::from_json(locator).map_err(definition_error)?;
            let base = self.runtime.config.relative_root.clone();
            let dataset = VirtualDataset::build("inline", &document, self, Some(base.as_path()))?;
            return Ok(Arc::new(dataset));
        }
        if is_definition_path(locator) {
            let path = PathBuf::from(locator);
            let document = DefinitionDocument::from_file(&path).map_err(definition_error)?;
            let dataset = VirtualDataset::build(locator, &document, self, path.parent())?;
            return Ok(Arc::new(dataset));
        }
        self.runtime.drivers.open(locator, self.update)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opener::Engine;
    use vlayer_core::EngineConfig;

    fn context(depth: usize) -> OpenContext {
        let config = EngineConfig {
            max_open_depth: depth,
            ..EngineConfig::default()
        };
        Engine::new(config).context(false)
    }

    #[test]
    fn entering_twice_is_recursion() {
        let root = context(8);
        let a = root.enter(SourceIdentity::new("a.vrt.json", false)).unwrap();
        let b = a.enter(SourceIdentity::new("b.vrt.json", true)).unwrap();
        let err = b.enter(SourceIdentity::new("a.vrt.json", true)).unwrap_err();
        assert!(
            matches!(&err, LayerError::Recursion(chain) if chain == "a.vrt.json -> b.vrt.json -> a.vrt.json")
        );
        // siblings do not see each other
        assert!(a.enter(SourceIdentity::new("c.json", false)).is_ok());
        assert!(root.stack().is_empty());
    }

    #[test]
    fn depth_is_bounded() {
        let mut ctx = context(2);
        ctx = ctx.enter(SourceIdentity::new("one", false)).unwrap();
        ctx = ctx.enter(SourceIdentity::new("two", false)).unwrap();
        assert!(matches!(
            ctx.enter(SourceIdentity::new("three", false)),
            Err(LayerError::Recursion(_))
        ));
    }

    #[test]
    fn pool_holds_weak_references() {
        let pool = SharedPool::default();
        let opened = pool
            .get_or_open("mem", || {
                Ok(Arc::new(vlayer_source::MemoryDataset::new("mem")) as Arc<dyn DataSource>)
            })
            .unwrap();
        let again = pool
            .get_or_open("mem", || Err(LayerError::SourceUnavailable("reopened".into())))
            .unwrap();
        assert!(Arc::ptr_eq(&opened, &again));
        assert_eq!(pool.live(), 1);
        drop(opened);
        drop(again);
        assert_eq!(pool.live(), 0);
    }
}
