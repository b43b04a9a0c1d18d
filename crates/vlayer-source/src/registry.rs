//! Data sources and the drivers that open them
//!
//! A driver turns a locator (a path or a registered name) into a
//! `DataSource`, which owns one or more layers. The registry asks each
//! driver in registration order whether it recognises a locator.

use crate::adapter::{FeatureLayer, LayerError, SourceHandle};
use crate::memory::MemoryLayer;
use serde::Deserialize;
use sqlparser::ast::{SelectItem, SetExpr, Statement, TableFactor};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use vlayer_core::{Feature, FieldValue, LayerSchema};
use vlayer_filter::resolver::column_name;
use vlayer_filter::CompiledFilter;
use vlayer_geom::parse_wkt;

/// An opened container of layers
pub trait DataSource: Send + Sync {
    fn name(&self) -> &str;

    fn layer_count(&self) -> usize;

    fn layer(&self, index: usize) -> Option<SourceHandle>;

    /// Layer by name, case-insensitive
    fn layer_by_name(&self, name: &str) -> Option<SourceHandle>;

    /// Run a statement and return its result set as a layer
    fn execute_sql(&self, _sql: &str) -> Result<SourceHandle, LayerError> {
        Err(LayerError::Unsupported(format!(
            "{} does not execute SQL",
            self.name()
        )))
    }
}

/// Opens locators into data sources
pub trait Driver: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this driver handles the locator
    fn probe(&self, locator: &str) -> bool;

    /// Open the locator; layers accept writes only when `update` is set
    fn open(&self, locator: &str, update: bool) -> Result<Arc<dyn DataSource>, LayerError>;
}

fn lock_layer(layer: &Mutex<MemoryLayer>) -> MutexGuard<'_, MemoryLayer> {
    layer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Data source holding in-memory layers
#[derive(Debug, Default)]
pub struct MemoryDataset {
    name: String,
    layers: Vec<Arc<Mutex<MemoryLayer>>>,
}

impl MemoryDataset {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            layers: Vec::new(),
        }
    }

    /// Add a layer
    pub fn with_layer(mut self, layer: MemoryLayer) -> Self {
        self.layers.push(Arc::new(Mutex::new(layer)));
        self
    }

    /// Independent copy: same features, separate cursors and filters
    pub fn fork(&self) -> Self {
        Self {
            name: self.name.clone(),
            layers: self
                .layers
                .iter()
                .map(|layer| Arc::new(Mutex::new(lock_layer(layer).clone())))
                .collect(),
        }
    }

    /// Switch every layer to read-only
    pub fn into_read_only(self) -> Self {
        for layer in &self.layers {
            let mut guard = lock_layer(layer);
            let capabilities = guard.capabilities().read_only();
            *guard = guard.clone().with_capabilities(capabilities);
        }
        self
    }

    /// Parse a dataset document
    ///
    /// ```json
    /// {"layers": [{"name": "pts",
    ///              "fields": [{"name": "id", "type": "integer"}],
    ///              "geom_fields": [{"name": "geom", "geometry_type": "Point", "srs": "EPSG:4326"}],
    ///              "features": [{"fid": 1, "properties": {"id": 7}, "geometry": "POINT (2 49)"}]}]}
    /// ```
    pub fn from_json(name: impl Into<String>, text: &str) -> Result<Self, LayerError> {
        let name = name.into();
        let file: DatasetFile = serde_json::from_str(text).map_err(|e| {
            LayerError::SourceUnavailable(format!("invalid dataset {}: {}", name, e))
        })?;

        let mut dataset = MemoryDataset::new(name);
        for layer_file in file.layers {
            let schema = Arc::new(layer_file.schema);
            let mut layer = MemoryLayer::new(schema.clone());
            for record in layer_file.features {
                layer.insert(record.into_feature(&schema)?);
            }
            if layer_file.read_only {
                layer = layer.read_only();
            }
            dataset = dataset.with_layer(layer);
        }
        Ok(dataset)
    }

    fn memory_layer(&self, name: &str) -> Option<&Arc<Mutex<MemoryLayer>>> {
        self.layers
            .iter()
            .find(|layer| lock_layer(layer).name().eq_ignore_ascii_case(name))
    }
}

impl DataSource for MemoryDataset {
    fn name(&self) -> &str {
        &self.name
    }

    fn layer_count(&self) -> usize {
        self.layers.len()
    }

    fn layer(&self, index: usize) -> Option<SourceHandle> {
        self.layers
            .get(index)
            .map(|layer| layer.clone() as SourceHandle)
    }

    fn layer_by_name(&self, name: &str) -> Option<SourceHandle> {
        self.memory_layer(name).map(|layer| layer.clone() as SourceHandle)
    }

    /// Supports `SELECT <columns | *> FROM <layer> [WHERE <predicate>]`
    fn execute_sql(&self, sql: &str) -> Result<SourceHandle, LayerError> {
        let query = SelectQuery::parse(sql)?;
        let source = self.memory_layer(&query.table).ok_or_else(|| {
            LayerError::SourceUnavailable(format!(
                "{}: no layer named '{}'",
                self.name, query.table
            ))
        })?;
        let mut source = lock_layer(source);
        let source_schema = source.schema();

        // (source column, exposed name)
        let columns: Vec<(String, String)> = match &query.columns {
            None => source_schema
                .fields
                .iter()
                .map(|f| (f.name.clone(), f.name.clone()))
                .collect(),
            Some(columns) => columns.clone(),
        };

        let mut schema = LayerSchema::new(source_schema.name.clone());
        for (src, exposed) in &columns {
            let mut defn = source_schema.find_field(src).cloned().ok_or_else(|| {
                LayerError::Definition(format!("unknown column '{}' in SQL", src))
            })?;
            defn.name = exposed.clone();
            schema.fields.push(defn);
        }
        schema.geom_fields = source_schema.geom_fields.clone();
        let schema = Arc::new(schema);

        let filter = query
            .predicate
            .as_deref()
            .map(CompiledFilter::parse)
            .transpose()?;
        if let Some(filter) = &filter {
            filter.validate(&source_schema)?;
        }

        tracing::debug!(dataset = %self.name, sql, "executing SQL");
        let mut result = MemoryLayer::new(schema.clone())
            .with_capabilities(source.capabilities().read_only());
        // Installed filters of the source layer do not apply to SQL
        for feature in source.stored_features() {
            if filter.as_ref().is_some_and(|f| !f.matches(feature)) {
                continue;
            }
            let mut projected = Feature::new(schema.clone());
            projected.set_fid(feature.fid());
            projected.set_style(feature.style().map(str::to_string));
            for (i, (src, _)) in columns.iter().enumerate() {
                projected.set_field_at(i, feature.field(src).cloned().unwrap_or_default());
            }
            for (i, geometry) in feature.geometries().iter().enumerate() {
                projected.set_geometry_at(i, geometry.clone());
            }
            result.insert(projected);
        }
        Ok(Arc::new(Mutex::new(result)))
    }
}

/// Parsed form of the SELECT subset understood by `MemoryDataset`
struct SelectQuery {
    table: String,
    /// `None` for `*`
    columns: Option<Vec<(String, String)>>,
    predicate: Option<String>,
}

impl SelectQuery {
    fn parse(sql: &str) -> Result<Self, LayerError> {
        let invalid = |msg: String| LayerError::Definition(format!("SQL '{}': {}", sql, msg));

        let mut statements =
            Parser::parse_sql(&GenericDialect {}, sql).map_err(|e| invalid(e.to_string()))?;
        if statements.len() != 1 {
            return Err(invalid("expected exactly one statement".to_string()));
        }
        let Statement::Query(query) = statements.remove(0) else {
            return Err(invalid("only SELECT is supported".to_string()));
        };
        let SetExpr::Select(select) = query.body.as_ref() else {
            return Err(invalid("only a plain SELECT is supported".to_string()));
        };

        let [from] = select.from.as_slice() else {
            return Err(invalid("expected exactly one table".to_string()));
        };
        if !from.joins.is_empty() {
            return Err(invalid("joins are not supported".to_string()));
        }
        let TableFactor::Table { name, .. } = &from.relation else {
            return Err(invalid("expected a table name".to_string()));
        };
        let table = name
            .0
            .last()
            .map(|ident| ident.value.clone())
            .ok_or_else(|| invalid("empty table name".to_string()))?;

        let mut columns = Vec::new();
        let mut wildcard = false;
        for item in &select.projection {
            match item {
                SelectItem::Wildcard(_) => wildcard = true,
                SelectItem::UnnamedExpr(expr) => {
                    let name = column_name(expr)
                        .ok_or_else(|| invalid(format!("unsupported column {}", expr)))?;
                    columns.push((name.to_string(), name.to_string()));
                }
                SelectItem::ExprWithAlias { expr, alias } => {
                    let name = column_name(expr)
                        .ok_or_else(|| invalid(format!("unsupported column {}", expr)))?;
                    columns.push((name.to_string(), alias.value.clone()));
                }
                other => return Err(invalid(format!("unsupported projection {}", other))),
            }
        }

        Ok(Self {
            table,
            columns: if wildcard { None } else { Some(columns) },
            predicate: select.selection.as_ref().map(|e| e.to_string()),
        })
    }
}

#[derive(Deserialize)]
struct DatasetFile {
    #[serde(default)]
    layers: Vec<LayerFile>,
}

#[derive(Deserialize)]
struct LayerFile {
    #[serde(flatten)]
    schema: LayerSchema,

    #[serde(default)]
    read_only: bool,

    #[serde(default)]
    features: Vec<FeatureFile>,
}

#[derive(Deserialize)]
struct FeatureFile {
    #[serde(default)]
    fid: Option<i64>,

    #[serde(default)]
    properties: serde_json::Map<String, serde_json::Value>,

    /// WKT of the first geometry field
    #[serde(default)]
    geometry: Option<String>,

    /// WKT by geometry field name
    #[serde(default)]
    geometries: BTreeMap<String, String>,

    #[serde(default)]
    style: Option<String>,
}

impl FeatureFile {
    fn into_feature(self, schema: &Arc<LayerSchema>) -> Result<Feature, LayerError> {
        let invalid = |msg: String| LayerError::SourceUnavailable(msg);
        let mut feature = Feature::new(schema.clone());
        feature.set_fid(self.fid);
        feature.set_style(self.style);

        for (key, value) in &self.properties {
            let Some(index) = schema.field_index(key) else {
                return Err(invalid(format!("'{}' has no field '{}'", schema.name, key)));
            };
            let field_type = schema.fields[index].field_type;
            let value = FieldValue::from_json(value).convert(field_type).ok_or_else(|| {
                invalid(format!("value {} does not fit field '{}'", value, key))
            })?;
            feature.set_field_at(index, value);
        }

        let mut wkt: Vec<(usize, String)> = Vec::new();
        if let Some(text) = self.geometry {
            wkt.push((0, text));
        }
        for (name, text) in self.geometries {
            let index = schema.geom_field_index(&name).ok_or_else(|| {
                invalid(format!("'{}' has no geometry field '{}'", schema.name, name))
            })?;
            wkt.push((index, text));
        }
        for (index, text) in wkt {
            let geometry = parse_wkt(&text).map_err(|e| invalid(e.to_string()))?;
            feature.set_geometry_at(index, Some(geometry));
        }
        Ok(feature)
    }
}

/// Driver serving datasets registered under a name
///
/// Every open returns an independent copy of the registered dataset.
#[derive(Default)]
pub struct MemoryDriver {
    datasets: HashMap<String, MemoryDataset>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a dataset under a locator
    pub fn with_dataset(mut self, locator: impl Into<String>, dataset: MemoryDataset) -> Self {
        self.datasets.insert(locator.into(), dataset);
        self
    }
}

impl Driver for MemoryDriver {
    fn name(&self) -> &str {
        "Memory"
    }

    fn probe(&self, locator: &str) -> bool {
        self.datasets.contains_key(locator)
    }

    fn open(&self, locator: &str, update: bool) -> Result<Arc<dyn DataSource>, LayerError> {
        let dataset = self.datasets.get(locator).ok_or_else(|| {
            LayerError::SourceUnavailable(format!("no dataset registered as '{}'", locator))
        })?;
        let dataset = dataset.fork();
        Ok(Arc::new(if update {
            dataset
        } else {
            dataset.into_read_only()
        }))
    }
}

/// Driver reading `*.json` dataset documents
///
/// Changes made through an update-mode open stay in memory.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonFileDriver;

impl Driver for JsonFileDriver {
    fn name(&self) -> &str {
        "JSON"
    }

    fn probe(&self, locator: &str) -> bool {
        let lower = locator.to_ascii_lowercase();
        lower.ends_with(".json") && !lower.ends_with(".vrt.json")
    }

    fn open(&self, locator: &str, update: bool) -> Result<Arc<dyn DataSource>, LayerError> {
        let text = std::fs::read_to_string(locator)?;
        let dataset = MemoryDataset::from_json(locator, &text)?;
        Ok(Arc::new(if update {
            dataset
        } else {
            dataset.into_read_only()
        }))
    }
}

/// Ordered set of drivers
#[derive(Clone)]
pub struct DriverRegistry {
    drivers: Vec<Arc<dyn Driver>>,
}

impl DriverRegistry {
    /// Registry with no drivers
    pub fn empty() -> Self {
        Self {
            drivers: Vec::new(),
        }
    }

    /// Add a driver; later drivers are tried after earlier ones
    pub fn register(&mut self, driver: impl Driver + 'static) {
        self.drivers.push(Arc::new(driver));
    }

    /// Builder form of `register`
    pub fn with_driver(mut self, driver: impl Driver + 'static) -> Self {
        self.register(driver);
        self
    }

    pub fn driver_names(&self) -> Vec<&str> {
        self.drivers.iter().map(|d| d.name()).collect()
    }

    /// Open a locator with the first driver that recognises it
    pub fn open(&self, locator: &str, update: bool) -> Result<Arc<dyn DataSource>, LayerError> {
        let driver = self
            .drivers
            .iter()
            .find(|d| d.probe(locator))
            .ok_or_else(|| {
                LayerError::SourceUnavailable(format!("no driver recognises '{}'", locator))
            })?;
        tracing::debug!(driver = driver.name(), locator, update, "opening data source");
        driver.open(locator, update)
    }
}

impl Default for DriverRegistry {
    /// Registry with the JSON file driver
    fn default() -> Self {
        Self::empty().with_driver(JsonFileDriver)
    }
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("drivers", &self.driver_names())
            .finish()
    }
}
