//! Engine configuration (vlayer.toml)

use crate::diagnostic::{DiagnosticCode, Severity};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Severity threshold overrides for specific diagnostic codes
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SeverityThreshold {
    /// Map of diagnostic code to severity override
    #[serde(default)]
    pub overrides: HashMap<String, Severity>,
}

impl SeverityThreshold {
    /// Get severity for a diagnostic code, or default
    pub fn get_severity(&self, code: DiagnosticCode, default: Severity) -> Severity {
        self.overrides
            .get(code.as_str())
            .copied()
            .unwrap_or(default)
    }

    /// Set severity override for a code
    pub fn set_override(&mut self, code: DiagnosticCode, severity: Severity) {
        self.overrides.insert(code.as_str().to_string(), severity);
    }

    /// Severity for a code, falling back to the code's own default
    pub fn severity_for(&self, code: DiagnosticCode) -> Severity {
        self.get_severity(code, code.default_severity())
    }
}

fn default_max_open_depth() -> usize {
    32
}

fn default_true() -> bool {
    true
}

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Severity thresholds
    #[serde(default)]
    pub severity: SeverityThreshold,

    /// Maximum nesting of definitions opening other definitions
    #[serde(default = "default_max_open_depth")]
    pub max_open_depth: usize,

    /// Allow clipping against source regions; when false every region is filter-only
    #[serde(default = "default_true")]
    pub enable_clipping: bool,

    /// Open layers in update mode unless the caller says otherwise
    #[serde(default)]
    pub default_update: bool,

    /// Base directory for relative locators (for resolving relative paths)
    #[serde(skip)]
    pub relative_root: std::path::PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            severity: SeverityThreshold::default(),
            max_open_depth: default_max_open_depth(),
            enable_clipping: true,
            default_update: false,
            relative_root: std::env::current_dir().unwrap_or_default(),
        }
    }
}

impl EngineConfig {
    /// Load config from TOML file
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        let mut config = Self::from_toml(&contents)?;

        // Relative locators resolve against the config file's directory
        if let Some(parent) = path.parent() {
            config.relative_root = parent.to_path_buf();
        }

        Ok(config)
    }

    /// Load config from TOML string
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        let mut config: EngineConfig =
            toml::from_str(toml).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.relative_root = std::env::current_dir().unwrap_or_default();
        Ok(config)
    }

    /// Save config to TOML file
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        let toml = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, toml).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }
}

/// Config error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),
}
