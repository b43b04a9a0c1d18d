//! Source-region filtering and clipping

use std::sync::Arc;
use vlayer_core::{Diagnostic, DiagnosticCode, Envelope, Geometry, SoftResult};
use vlayer_geom::GeometryEngine;

/// A static region applied to every feature of a layer
///
/// In filter mode, features whose geometry does not intersect the region are
/// dropped. In clip mode, surviving geometries are additionally replaced by
/// their intersection with the region.
#[derive(Clone)]
pub struct RegionClipper {
    region: Geometry,
    envelope: Envelope,
    clip: bool,
    engine: Arc<dyn GeometryEngine>,
}

impl std::fmt::Debug for RegionClipper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegionClipper")
            .field("envelope", &self.envelope)
            .field("clip", &self.clip)
            .field("engine", &self.engine.name())
            .finish()
    }
}

impl RegionClipper {
    /// Create a clipper, degrading to filter mode when clipping is unavailable
    ///
    /// Returns `None` for an empty region.
    pub fn new(
        region: Geometry,
        clip: bool,
        engine: Arc<dyn GeometryEngine>,
        clipping_enabled: bool,
    ) -> Option<SoftResult<RegionClipper>> {
        let envelope = region.envelope()?;
        let unavailable = if !clip {
            None
        } else if !clipping_enabled {
            Some("clipping is disabled by configuration".to_string())
        } else if !engine.supports_clipping() {
            Some(format!("geometry engine '{}' cannot clip", engine.name()))
        } else {
            None
        };
        let clipper = RegionClipper {
            region,
            envelope,
            clip: clip && unavailable.is_none(),
            engine,
        };
        Some(match unavailable {
            None => SoftResult::Clean(clipper),
            Some(reason) => SoftResult::Degraded(
                clipper,
                Diagnostic::warn(
                    DiagnosticCode::ClipUnavailable,
                    format!("{}; the region only filters", reason),
                ),
            ),
        })
    }

    pub fn region(&self) -> &Geometry {
        &self.region
    }

    pub fn envelope(&self) -> Envelope {
        self.envelope
    }

    /// Whether geometries are cut to the region
    pub fn clips(&self) -> bool {
        self.clip
    }

    /// Whether a geometry touches the region
    pub fn intersects(&self, geometry: &Geometry) -> bool {
        match geometry.envelope() {
            Some(bbox) if bbox.intersects(&self.envelope) => {
                (self.region.is_rectangle() && self.envelope.contains(&bbox))
                    || self.engine.intersects(geometry, &self.region)
            }
            _ => false,
        }
    }

    /// Apply the region to a feature geometry
    ///
    /// `None` means the feature is dropped. A failed clip keeps the original
    /// geometry and reports `CLIP_FAILED`.
    pub fn apply(&self, geometry: Option<Geometry>) -> SoftResult<Option<Geometry>> {
        let Some(geometry) = geometry else {
            return SoftResult::Clean(None);
        };
        if !self.intersects(&geometry) {
            return SoftResult::Clean(None);
        }
        if !self.clip {
            return SoftResult::Clean(Some(geometry));
        }
        if let Some(bbox) = geometry.envelope() {
            if self.region.is_rectangle() && self.envelope.contains(&bbox) {
                return SoftResult::Clean(Some(geometry));
            }
        }
        match self.engine.intersection(&geometry, &self.region) {
            Ok(clipped) => SoftResult::Clean(clipped),
            Err(e) => SoftResult::Degraded(
                Some(geometry),
                Diagnostic::warn(DiagnosticCode::ClipFailed, e.to_string()),
            ),
        }
    }
}
