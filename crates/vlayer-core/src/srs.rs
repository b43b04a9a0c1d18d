//! Spatial reference descriptors
//!
//! A `SpatialRef` only identifies a coordinate reference system. The math
//! lives behind `TransformFactory` in `vlayer-geom`.

use serde::{Deserialize, Serialize};

/// Error returned for unparsable spatial reference text
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SrsError {
    #[error("empty spatial reference")]
    Empty,

    #[error("unrecognised spatial reference '{0}'")]
    Unrecognised(String),
}

/// Well-known names accepted in place of an EPSG code
const WELL_KNOWN: &[(&str, u32)] = &[
    ("WGS84", 4326),
    ("WGS 84", 4326),
    ("CRS84", 4326),
    ("OGC:CRS84", 4326),
    ("WGS72", 4322),
    ("WGS 72", 4322),
    ("NAD83", 4269),
    ("ETRS89", 4258),
];

/// A coordinate reference system identified by its EPSG code
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SpatialRef {
    code: u32,
}

impl SpatialRef {
    /// WGS 84 geographic coordinates
    pub const WGS84: SpatialRef = SpatialRef { code: 4326 };

    /// Create from an EPSG code
    pub fn epsg(code: u32) -> Self {
        Self { code }
    }

    /// Parse `EPSG:4326`, `urn:ogc:def:crs:EPSG::4326`, a bare code or a well-known name
    pub fn parse(text: &str) -> Result<Self, SrsError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(SrsError::Empty);
        }

        if let Some((_, code)) = WELL_KNOWN.iter().find(|(name, _)| name.eq_ignore_ascii_case(trimmed)) {
            return Ok(Self::epsg(*code));
        }

        let upper = trimmed.to_ascii_uppercase();
        let code_text = upper
            .strip_prefix("EPSG:")
            .or_else(|| upper.strip_prefix("URN:OGC:DEF:CRS:EPSG::"))
            .or_else(|| upper.strip_prefix("+INIT=EPSG:"))
            .unwrap_or(upper.as_str());

        code_text
            .parse::<u32>()
            .ok()
            .filter(|code| *code > 0)
            .map(Self::epsg)
            .ok_or_else(|| SrsError::Unrecognised(trimmed.to_string()))
    }

    /// EPSG code
    pub fn code(&self) -> u32 {
        self.code
    }

    /// Human-readable name for codes we know about
    pub fn name(&self) -> String {
        match self.code {
            4326 => "WGS 84".to_string(),
            4322 => "WGS 72".to_string(),
            4269 => "NAD83".to_string(),
            4258 => "ETRS89".to_string(),
            3857 => "WGS 84 / Pseudo-Mercator".to_string(),
            32601..=32660 => format!("WGS 84 / UTM zone {}N", self.code - 32600),
            32701..=32760 => format!("WGS 84 / UTM zone {}S", self.code - 32700),
            25828..=25838 => format!("ETRS89 / UTM zone {}N", self.code - 25800),
            26901..=26923 => format!("NAD83 / UTM zone {}N", self.code - 26900),
            other => format!("EPSG:{}", other),
        }
    }

    /// Whether coordinates are longitude/latitude degrees
    pub fn is_geographic(&self) -> bool {
        matches!(self.code, 4326 | 4322 | 4269 | 4258)
    }
}

impl std::fmt::Display for SpatialRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EPSG:{}", self.code)
    }
}

impl std::str::FromStr for SpatialRef {
    type Err = SrsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SpatialRef {
    type Error = SrsError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SpatialRef> for String {
    fn from(value: SpatialRef) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_forms() {
        assert_eq!(SpatialRef::parse("EPSG:4326").unwrap(), SpatialRef::WGS84);
        assert_eq!(SpatialRef::parse("epsg:32631").unwrap().code(), 32631);
        assert_eq!(SpatialRef::parse("urn:ogc:def:crs:EPSG::3857").unwrap().code(), 3857);
        assert_eq!(SpatialRef::parse("WGS72").unwrap().code(), 4322);
        assert_eq!(SpatialRef::parse("4258").unwrap().code(), 4258);
    }

    #[test]
    fn parse_failures() {
        assert_eq!(SpatialRef::parse("  "), Err(SrsError::Empty));
        assert!(matches!(SpatialRef::parse("foo"), Err(SrsError::Unrecognised(_))));
        assert!(SpatialRef::parse("EPSG:0").is_err());
    }

    #[test]
    fn names() {
        assert_eq!(SpatialRef::epsg(32631).name(), "WGS 84 / UTM zone 31N");
        assert!(SpatialRef::WGS84.is_geographic());
        assert_eq!(SpatialRef::WGS84.to_string(), "EPSG:4326");
    }
}
