//! Diagnostic codes and soft-failure reporting
//!
//! IMPORTANT: Diagnostic codes are versioned and stable.
//! NEVER rename or remove codes - they are part of the public API.
//! Add new codes with new names only.
//!
//! Per-feature problems (an unparsable geometry, a coordinate that cannot be
//! reprojected) never abort a scan. They are recorded as diagnostics and the
//! scan continues with a degraded value. Hard failures use `LayerError` in
//! `vlayer-source` instead.

use serde::{Deserialize, Serialize};

/// Diagnostic code registry (v1)
///
/// These codes are STABLE and VERSIONED.
/// Do NOT rename or remove codes - only add new ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiagnosticCode {
    // Geometry decoding (1xxx)
    /// A WKT column held empty or malformed text
    DecodeInvalidWkt,

    /// A WKB column held empty or malformed bytes
    DecodeInvalidWkb,

    /// A shape record was truncated or malformed
    DecodeInvalidShape,

    /// A shape record used a type code outside the supported set
    DecodeUnsupportedShape,

    /// A coordinate column could not be read as a number
    DecodeInvalidCoordinate,

    // Reprojection (2xxx)
    /// A geometry could not be transformed to the target spatial reference
    TransformFailed,

    // Filter negotiation (3xxx)
    /// A filter could not be handed to the source and is evaluated locally
    FilterNotDelegable,

    /// Coordinate columns are not numeric, so a spatial filter cannot become an attribute filter
    FilterNonNumericCoordinates,

    // Region handling (4xxx)
    /// Clipping was requested but the geometry engine cannot intersect polygons
    ClipUnavailable,

    /// Clipping a geometry against the source region failed
    ClipFailed,

    // Source binding (5xxx)
    /// The source layer could not be opened
    SourceUnavailable,

    /// A definition transitively references itself
    RecursionDetected,

    /// A field value could not be converted to its declared type
    FieldConversion,

    /// A definition document is malformed or inconsistent
    DefinitionInvalid,

    // General warnings (9xxx)
    /// General informational message
    Info,

    /// General warning message
    Warning,
}

impl DiagnosticCode {
    /// Get the diagnostic code as a stable string identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DecodeInvalidWkt => "DECODE_INVALID_WKT",
            Self::DecodeInvalidWkb => "DECODE_INVALID_WKB",
            Self::DecodeInvalidShape => "DECODE_INVALID_SHAPE",
            Self::DecodeUnsupportedShape => "DECODE_UNSUPPORTED_SHAPE",
            Self::DecodeInvalidCoordinate => "DECODE_INVALID_COORDINATE",
            Self::TransformFailed => "TRANSFORM_FAILED",
            Self::FilterNotDelegable => "FILTER_NOT_DELEGABLE",
            Self::FilterNonNumericCoordinates => "FILTER_NON_NUMERIC_COORDINATES",
            Self::ClipUnavailable => "CLIP_UNAVAILABLE",
            Self::ClipFailed => "CLIP_FAILED",
            Self::SourceUnavailable => "SOURCE_UNAVAILABLE",
            Self::RecursionDetected => "RECURSION_DETECTED",
            Self::FieldConversion => "FIELD_CONVERSION",
            Self::DefinitionInvalid => "DEFINITION_INVALID",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
        }
    }

    /// Severity a code carries unless the configuration overrides it
    pub fn default_severity(&self) -> Severity {
        match self {
            Self::SourceUnavailable | Self::RecursionDetected | Self::DefinitionInvalid => {
                Severity::Error
            }
            Self::FilterNotDelegable | Self::Info => Severity::Info,
            _ => Severity::Warn,
        }
    }
}

impl std::fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Diagnostic severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational message
    Info,

    /// Warning - a value was degraded but processing continued
    Warn,

    /// Error - an operation could not be carried out
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Where in the data a diagnostic was raised
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// Exposed layer name
    pub layer: String,

    /// Feature id, when the problem concerns a single feature
    pub fid: Option<i64>,

    /// Field or geometry field name
    pub field: Option<String>,
}

impl Location {
    /// Create a new location with just a layer name
    pub fn new(layer: impl Into<String>) -> Self {
        Self {
            layer: layer.into(),
            fid: None,
            field: None,
        }
    }

    /// Create a location pointing at one feature
    pub fn with_fid(layer: impl Into<String>, fid: Option<i64>) -> Self {
        Self {
            layer: layer.into(),
            fid,
            field: None,
        }
    }

    /// Attach a field name
    pub fn field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.layer)?;
        if let Some(fid) = self.fid {
            write!(f, "#{}", fid)?;
        }
        if let Some(field) = &self.field {
            write!(f, ".{}", field)?;
        }
        Ok(())
    }
}

/// A diagnostic message with structured metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Stable diagnostic code
    pub code: DiagnosticCode,

    /// Severity level
    pub severity: Severity,

    /// Human-readable message
    pub message: String,

    /// Data location (best-effort)
    pub location: Option<Location>,
}

impl Diagnostic {
    /// Create a new diagnostic with minimal fields
    pub fn new(code: DiagnosticCode, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            code,
            severity,
            message: message.into(),
            location: None,
        }
    }

    /// Create a warning-level diagnostic
    pub fn warn(code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self::new(code, Severity::Warn, message)
    }

    /// Set the location
    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    /// Set the location only if none was recorded yet
    pub fn or_location(mut self, location: impl FnOnce() -> Location) -> Self {
        if self.location.is_none() {
            self.location = Some(location());
        }
        self
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.severity, self.code, self.message)?;
        if let Some(location) = &self.location {
            write!(f, " ({})", location)?;
        }
        Ok(())
    }
}

/// Outcome of a per-feature operation that degrades instead of failing
///
/// `Degraded` carries the fallback value together with the diagnostic that
/// explains it. Callers keep scanning either way.
#[derive(Debug, Clone, PartialEq)]
pub enum SoftResult<T> {
    /// The operation succeeded
    Clean(T),

    /// The operation produced a fallback value
    Degraded(T, Diagnostic),
}

impl<T> SoftResult<T> {
    /// Split into the value and the optional diagnostic
    pub fn into_parts(self) -> (T, Option<Diagnostic>) {
        match self {
            Self::Clean(value) => (value, None),
            Self::Degraded(value, diagnostic) => (value, Some(diagnostic)),
        }
    }

    /// Borrow the value regardless of outcome
    pub fn value(&self) -> &T {
        match self {
            Self::Clean(value) | Self::Degraded(value, _) => value,
        }
    }

    /// Check whether the value was degraded
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded(..))
    }

    /// Map the carried value
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> SoftResult<U> {
        match self {
            Self::Clean(value) => SoftResult::Clean(f(value)),
            Self::Degraded(value, diagnostic) => SoftResult::Degraded(f(value), diagnostic),
        }
    }
}

/// Accumulator for diagnostics raised while a layer is in use
///
/// Every recorded entry is also emitted as a `tracing` event so hosts that
/// only look at logs still see degraded features.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticLog {
    entries: Vec<Diagnostic>,
}

impl DiagnosticLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a diagnostic
    pub fn push(&mut self, diagnostic: Diagnostic) {
        match diagnostic.severity {
            Severity::Error => tracing::error!(code = %diagnostic.code, "{}", diagnostic.message),
            Severity::Warn => tracing::warn!(code = %diagnostic.code, "{}", diagnostic.message),
            Severity::Info => tracing::debug!(code = %diagnostic.code, "{}", diagnostic.message),
        }
        self.entries.push(diagnostic);
    }

    /// Record the diagnostic of a soft result and return its value
    pub fn absorb<T>(&mut self, result: SoftResult<T>) -> T {
        let (value, diagnostic) = result.into_parts();
        if let Some(diagnostic) = diagnostic {
            self.push(diagnostic);
        }
        value
    }

    /// Append diagnostics collected elsewhere
    pub fn extend(&mut self, diagnostics: impl IntoIterator<Item = Diagnostic>) {
        self.entries.extend(diagnostics);
    }

    /// Recorded diagnostics
    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    /// Remove and return everything recorded so far
    pub fn drain(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.entries)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Count entries carrying a given code
    pub fn count(&self, code: DiagnosticCode) -> usize {
        self.entries.iter().filter(|d| d.code == code).count()
    }
}
