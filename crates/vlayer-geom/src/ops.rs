//! Geometry predicates and clipping
//!
//! `GeometryEngine` is the seam the virtual layers use for intersection tests
//! and region clipping. `PlanarEngine` is backed by the `geo` crate;
//! `BoundsEngine` only compares envelopes and cannot clip.

use crate::GeomError;
use geo::{BooleanOps, Intersects};
use vlayer_core::{Coord, Geometry};

/// Topological operations needed by the virtual layers
pub trait GeometryEngine: Send + Sync {
    /// Engine name for logs
    fn name(&self) -> &str;

    /// Whether two geometries share at least one point
    fn intersects(&self, a: &Geometry, b: &Geometry) -> bool;

    /// Whether `intersection` is available
    fn supports_clipping(&self) -> bool {
        false
    }

    /// Part of `geometry` inside the polygonal `region`, `None` when nothing remains
    fn intersection(&self, geometry: &Geometry, region: &Geometry)
        -> Result<Option<Geometry>, GeomError>;
}

/// Planar engine backed by `geo`
///
/// Clipped geometries lose their Z and M ordinates.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanarEngine;

impl GeometryEngine for PlanarEngine {
    fn name(&self) -> &str {
        "planar"
    }

    fn intersects(&self, a: &Geometry, b: &Geometry) -> bool {
        match (a.envelope(), b.envelope()) {
            (Some(ea), Some(eb)) if ea.intersects(&eb) => to_geo(a).intersects(&to_geo(b)),
            _ => false,
        }
    }

    fn supports_clipping(&self) -> bool {
        true
    }

    fn intersection(
        &self,
        geometry: &Geometry,
        region: &Geometry,
    ) -> Result<Option<Geometry>, GeomError> {
        let region_polygons = to_multi_polygon(region).ok_or_else(|| {
            GeomError::Unsupported(format!("clipping against a {:?}", region.kind()))
        })?;

        match (geometry.envelope(), region.envelope()) {
            (Some(g), Some(r)) if g.intersects(&r) => {}
            _ => return Ok(None),
        }

        // geo's sweep line can panic on degenerate input
        let clipped = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            clip(geometry, &region_polygons)
        }))
        .map_err(|_| GeomError::ClipFailed("boolean operation aborted".to_string()))?;

        Ok(clipped)
    }
}

fn clip(geometry: &Geometry, region: &geo::MultiPolygon<f64>) -> Option<Geometry> {
    let region_geo = geo::Geometry::MultiPolygon(region.clone());
    match geometry {
        Geometry::Point(c) => region_geo
            .intersects(&geo::Point::new(c.x, c.y))
            .then_some(geometry.clone()),
        Geometry::MultiPoint(cs) => {
            let kept: Vec<Coord> = cs
                .iter()
                .filter(|c| region_geo.intersects(&geo::Point::new(c.x, c.y)))
                .copied()
                .collect();
            match kept.len() {
                0 => None,
                _ => Some(Geometry::MultiPoint(kept)),
            }
        }
        Geometry::LineString(_) | Geometry::MultiLineString(_) => {
            let lines = match to_geo(geometry) {
                geo::Geometry::LineString(l) => geo::MultiLineString::new(vec![l]),
                geo::Geometry::MultiLineString(ml) => ml,
                _ => return None,
            };
            let mut result: Vec<Vec<Coord>> = region
                .clip(&lines, false)
                .0
                .into_iter()
                .map(|l| from_geo_line(&l))
                .filter(|l| l.len() >= 2)
                .collect();
            match result.len() {
                0 => None,
                1 => result.pop().map(Geometry::LineString),
                _ => Some(Geometry::MultiLineString(result)),
            }
        }
        Geometry::Polygon(_) | Geometry::MultiPolygon(_) => {
            let subject = to_multi_polygon(geometry)?;
            let mut polygons: Vec<Vec<Vec<Coord>>> = subject
                .intersection(region)
                .0
                .iter()
                .map(from_geo_polygon)
                .collect();
            match polygons.len() {
                0 => None,
                1 => polygons.pop().map(Geometry::Polygon),
                _ => Some(Geometry::MultiPolygon(polygons)),
            }
        }
        Geometry::GeometryCollection(members) => {
            let kept: Vec<Geometry> = members.iter().filter_map(|m| clip(m, region)).collect();
            (!kept.is_empty()).then_some(Geometry::GeometryCollection(kept))
        }
    }
}

/// Envelope-only engine: intersection tests compare bounding boxes
#[derive(Debug, Clone, Copy, Default)]
pub struct BoundsEngine;

impl GeometryEngine for BoundsEngine {
    fn name(&self) -> &str {
        "bounds"
    }

    fn intersects(&self, a: &Geometry, b: &Geometry) -> bool {
        match (a.envelope(), b.envelope()) {
            (Some(ea), Some(eb)) => ea.intersects(&eb),
            _ => false,
        }
    }

    fn intersection(
        &self,
        _geometry: &Geometry,
        _region: &Geometry,
    ) -> Result<Option<Geometry>, GeomError> {
        Err(GeomError::Unsupported("polygon intersection".to_string()))
    }
}

fn geo_coord(c: &Coord) -> geo::Coord<f64> {
    geo::Coord { x: c.x, y: c.y }
}

fn geo_line(cs: &[Coord]) -> geo::LineString<f64> {
    geo::LineString::new(cs.iter().map(geo_coord).collect())
}

fn geo_polygon(rings: &[Vec<Coord>]) -> geo::Polygon<f64> {
    let mut iter = rings.iter();
    let exterior = iter.next().map(|r| geo_line(r)).unwrap_or_else(|| geo::LineString::new(vec![]));
    geo::Polygon::new(exterior, iter.map(|r| geo_line(r)).collect())
}

/// Convert into a `geo` geometry, dropping Z and M
pub fn to_geo(geometry: &Geometry) -> geo::Geometry<f64> {
    match geometry {
        Geometry::Point(c) => geo::Geometry::Point(geo::Point::new(c.x, c.y)),
        Geometry::LineString(cs) => geo::Geometry::LineString(geo_line(cs)),
        Geometry::Polygon(rings) => geo::Geometry::Polygon(geo_polygon(rings)),
        Geometry::MultiPoint(cs) => geo::Geometry::MultiPoint(geo::MultiPoint::new(
            cs.iter().map(|c| geo::Point::new(c.x, c.y)).collect(),
        )),
        Geometry::MultiLineString(lines) => geo::Geometry::MultiLineString(
            geo::MultiLineString::new(lines.iter().map(|l| geo_line(l)).collect()),
        ),
        Geometry::MultiPolygon(polygons) => geo::Geometry::MultiPolygon(geo::MultiPolygon::new(
            polygons.iter().map(|p| geo_polygon(p)).collect(),
        )),
        Geometry::GeometryCollection(members) => geo::Geometry::GeometryCollection(
            geo::GeometryCollection::new_from(members.iter().map(to_geo).collect()),
        ),
    }
}

fn to_multi_polygon(geometry: &Geometry) -> Option<geo::MultiPolygon<f64>> {
    match geometry {
        Geometry::Polygon(rings) => Some(geo::MultiPolygon::new(vec![geo_polygon(rings)])),
        Geometry::MultiPolygon(polygons) => Some(geo::MultiPolygon::new(
            polygons.iter().map(|p| geo_polygon(p)).collect(),
        )),
        _ => None,
    }
}

fn from_geo_line(line: &geo::LineString<f64>) -> Vec<Coord> {
    line.0.iter().map(|c| Coord::xy(c.x, c.y)).collect()
}

fn from_geo_polygon(polygon: &geo::Polygon<f64>) -> Vec<Vec<Coord>> {
    std::iter::once(polygon.exterior())
        .chain(polygon.interiors())
        .map(from_geo_line)
        .collect()
}
