//! Coordinate transforms
//!
//! The built-in factory understands the WGS 84 geographic family (4326,
//! 4269, 4258), WGS 72 (4322), Web Mercator (3857) and the UTM zones of
//! WGS 84 (326xx / 327xx), ETRS89 (258xx) and NAD83 (269xx). GRS80 and
//! WGS 84 are treated as one ellipsoid. No datum shifts are modelled, so a
//! transform between the WGS 72 and WGS 84 families is refused.
//!
//! Transverse Mercator uses the Krüger series to fourth order in n, which
//! is accurate to well under a millimetre inside a zone.

use std::f64::consts::{FRAC_PI_2, FRAC_PI_4};
use std::sync::Arc;
use vlayer_core::{Coord, Envelope, Geometry, SpatialRef};

/// Coordinate transform errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransformError {
    #[error("no built-in definition for {0}")]
    UnsupportedSrs(SpatialRef),

    #[error("transforming from {source_srs} to {target_srs} needs a datum shift")]
    DatumShift {
        source_srs: SpatialRef,
        target_srs: SpatialRef,
    },

    #[error("{count} coordinate(s) outside the domain of the projection")]
    OutOfDomain { count: usize },
}

/// A transform between two spatial references
///
/// Failures are reported per coordinate; a failed coordinate is left as it was.
pub trait CoordinateTransform: Send + Sync + std::fmt::Debug {
    fn source(&self) -> &SpatialRef;

    fn target(&self) -> &SpatialRef;

    /// Transform one coordinate in place, returning false when it is out of domain
    fn transform_coord(&self, coord: &mut Coord) -> bool;

    /// Transform a slice, returning a success flag per coordinate
    fn transform_coords(&self, coords: &mut [Coord]) -> Vec<bool> {
        coords.iter_mut().map(|c| self.transform_coord(c)).collect()
    }

    /// The reverse transform
    fn inverse(&self) -> Arc<dyn CoordinateTransform>;

    /// Whether coordinates pass through unchanged
    fn is_identity(&self) -> bool {
        false
    }
}

/// Builds transforms between spatial references
pub trait TransformFactory: Send + Sync {
    fn create(
        &self,
        source: &SpatialRef,
        target: &SpatialRef,
    ) -> Result<Arc<dyn CoordinateTransform>, TransformError>;
}

/// Transform every coordinate of a geometry; fails if any coordinate fails
pub fn transform_geometry(
    transform: &dyn CoordinateTransform,
    geometry: &mut Geometry,
) -> Result<(), TransformError> {
    if transform.is_identity() {
        return Ok(());
    }
    let mut failed = 0;
    geometry.for_each_coord_mut(|c| {
        if !transform.transform_coord(c) {
            failed += 1;
        }
    });
    match failed {
        0 => Ok(()),
        count => Err(TransformError::OutOfDomain { count }),
    }
}

/// Transform an envelope through its four corners
///
/// The result is an approximation of the true transformed bounds.
pub fn transform_envelope(
    transform: &dyn CoordinateTransform,
    envelope: &Envelope,
) -> Result<Envelope, TransformError> {
    if transform.is_identity() {
        return Ok(*envelope);
    }
    let mut corners: Vec<Coord> = envelope.corners().iter().map(|&(x, y)| Coord::xy(x, y)).collect();
    let ok = transform.transform_coords(&mut corners);
    let failed = ok.iter().filter(|ok| !**ok).count();
    if failed > 0 {
        return Err(TransformError::OutOfDomain { count: failed });
    }
    let mut out = Envelope::of_point(corners[0].x, corners[0].y);
    for c in &corners[1..] {
        out.expand_to(c.x, c.y);
    }
    Ok(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Datum {
    Wgs84,
    Wgs72,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Projection {
    Geographic,
    WebMercator,
    TransverseMercator { lon0: f64, false_northing: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct CrsDef {
    datum: Datum,
    projection: Projection,
}

fn utm(zone: u32, south: bool) -> Projection {
    Projection::TransverseMercator {
        lon0: (zone as f64) * 6.0 - 183.0,
        false_northing: if south { 10_000_000.0 } else { 0.0 },
    }
}

fn describe(srs: &SpatialRef) -> Result<CrsDef, TransformError> {
    let (datum, projection) = match srs.code() {
        4326 | 4269 | 4258 => (Datum::Wgs84, Projection::Geographic),
        4322 => (Datum::Wgs72, Projection::Geographic),
        3857 => (Datum::Wgs84, Projection::WebMercator),
        code @ 32601..=32660 => (Datum::Wgs84, utm(code - 32600, false)),
        code @ 32701..=32760 => (Datum::Wgs84, utm(code - 32700, true)),
        code @ 25828..=25838 => (Datum::Wgs84, utm(code - 25800, false)),
        code @ 26901..=26923 => (Datum::Wgs84, utm(code - 26900, false)),
        _ => return Err(TransformError::UnsupportedSrs(srs.clone())),
    };
    Ok(CrsDef { datum, projection })
}

/// Factory for the built-in spatial references
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinTransforms;

impl TransformFactory for BuiltinTransforms {
    fn create(
        &self,
        source: &SpatialRef,
        target: &SpatialRef,
    ) -> Result<Arc<dyn CoordinateTransform>, TransformError> {
        let src_def = describe(source)?;
        let dst_def = describe(target)?;
        if src_def.datum != dst_def.datum {
            return Err(TransformError::DatumShift {
                source_srs: source.clone(),
                target_srs: target.clone(),
            });
        }
        tracing::debug!(source = %source, target = %target, "created coordinate transform");
        Ok(Arc::new(BuiltinTransform {
            source: source.clone(),
            target: target.clone(),
            src_def,
            dst_def,
        }))
    }
}

#[derive(Debug, Clone)]
struct BuiltinTransform {
    source: SpatialRef,
    target: SpatialRef,
    src_def: CrsDef,
    dst_def: CrsDef,
}

impl CoordinateTransform for BuiltinTransform {
    fn source(&self) -> &SpatialRef {
        &self.source
    }

    fn target(&self) -> &SpatialRef {
        &self.target
    }

    fn transform_coord(&self, coord: &mut Coord) -> bool {
        if self.is_identity() {
            return true;
        }
        let result = to_geographic(self.src_def.projection, coord.x, coord.y)
            .and_then(|(lon, lat)| from_geographic(self.dst_def.projection, lon, lat));
        match result {
            Some((x, y)) if x.is_finite() && y.is_finite() => {
                coord.x = x;
                coord.y = y;
                true
            }
            _ => false,
        }
    }

    fn inverse(&self) -> Arc<dyn CoordinateTransform> {
        Arc::new(BuiltinTransform {
            source: self.target.clone(),
            target: self.source.clone(),
            src_def: self.dst_def,
            dst_def: self.src_def,
        })
    }

    fn is_identity(&self) -> bool {
        self.src_def == self.dst_def
    }
}

/// Longitude/latitude degrees from projected coordinates
fn to_geographic(projection: Projection, x: f64, y: f64) -> Option<(f64, f64)> {
    match projection {
        Projection::Geographic => {
            (y.abs() <= 90.0 && x.is_finite()).then_some((x, y))
        }
        Projection::WebMercator => {
            let lon = (x / SEMI_MAJOR).to_degrees();
            let lat = (2.0 * (y / SEMI_MAJOR).exp().atan() - FRAC_PI_2).to_degrees();
            Some((lon, lat))
        }
        Projection::TransverseMercator {
            lon0,
            false_northing,
        } => tm_inverse(x - FALSE_EASTING, y - false_northing).map(|(dlon, lat)| (lon0 + dlon, lat)),
    }
}

/// Projected coordinates from longitude/latitude degrees
fn from_geographic(projection: Projection, lon: f64, lat: f64) -> Option<(f64, f64)> {
    if !(lat.abs() <= 90.0) {
        return None;
    }
    match projection {
        Projection::Geographic => Some((lon, lat)),
        Projection::WebMercator => {
            if lat.abs() >= MERCATOR_MAX_LAT {
                return None;
            }
            let x = SEMI_MAJOR * lon.to_radians();
            let y = SEMI_MAJOR * (FRAC_PI_4 + lat.to_radians() / 2.0).tan().ln();
            Some((x, y))
        }
        Projection::TransverseMercator {
            lon0,
            false_northing,
        } => {
            let dlon = normalize_longitude(lon - lon0);
            tm_forward(dlon, lat).map(|(e, n)| (e + FALSE_EASTING, n + false_northing))
        }
    }
}

const SEMI_MAJOR: f64 = 6_378_137.0;
const INV_FLATTENING: f64 = 298.257_223_563;
const SCALE_FACTOR: f64 = 0.9996;
const FALSE_EASTING: f64 = 500_000.0;
const MERCATOR_MAX_LAT: f64 = 89.5;
/// Beyond this distance from the central meridian the series diverges
const TM_MAX_DLON: f64 = 60.0;

fn normalize_longitude(mut dlon: f64) -> f64 {
    while dlon > 180.0 {
        dlon -= 360.0;
    }
    while dlon < -180.0 {
        dlon += 360.0;
    }
    dlon
}

struct Kruger {
    a_hat: f64,
    e: f64,
    alpha: [f64; 4],
    beta: [f64; 4],
    delta: [f64; 4],
}

fn kruger() -> Kruger {
    let f = 1.0 / INV_FLATTENING;
    let n = f / (2.0 - f);
    let (n2, n3, n4) = (n * n, n * n * n, n * n * n * n);
    Kruger {
        a_hat: SEMI_MAJOR / (1.0 + n) * (1.0 + n2 / 4.0 + n4 / 64.0),
        e: (f * (2.0 - f)).sqrt(),
        alpha: [
            n / 2.0 - 2.0 * n2 / 3.0 + 5.0 * n3 / 16.0 + 41.0 * n4 / 180.0,
            13.0 * n2 / 48.0 - 3.0 * n3 / 5.0 + 557.0 * n4 / 1440.0,
            61.0 * n3 / 240.0 - 103.0 * n4 / 140.0,
            49561.0 * n4 / 161280.0,
        ],
        beta: [
            n / 2.0 - 2.0 * n2 / 3.0 + 37.0 * n3 / 96.0 - n4 / 360.0,
            n2 / 48.0 + n3 / 15.0 - 437.0 * n4 / 1440.0,
            17.0 * n3 / 480.0 - 37.0 * n4 / 840.0,
            4397.0 * n4 / 161280.0,
        ],
        delta: [
            2.0 * n - 2.0 * n2 / 3.0 - 2.0 * n3 + 116.0 * n4 / 45.0,
            7.0 * n2 / 3.0 - 8.0 * n3 / 5.0 - 227.0 * n4 / 45.0,
            56.0 * n3 / 15.0 - 136.0 * n4 / 35.0,
            4279.0 * n4 / 630.0,
        ],
    }
}

/// Easting/northing (without false offsets) for a longitude offset and latitude
fn tm_forward(dlon_deg: f64, lat_deg: f64) -> Option<(f64, f64)> {
    if dlon_deg.abs() > TM_MAX_DLON {
        return None;
    }
    let k = kruger();
    let phi = lat_deg.to_radians();
    let lambda = dlon_deg.to_radians();

    let sin_phi = phi.sin();
    let t = (sin_phi.atanh() - k.e * (k.e * sin_phi).atanh()).sinh();
    let xi_p = t.atan2(lambda.cos());
    let eta_p = (lambda.sin() / (1.0 + t * t).sqrt()).atanh();

    let mut xi = xi_p;
    let mut eta = eta_p;
    for (j, alpha) in k.alpha.iter().enumerate() {
        let m = 2.0 * (j as f64 + 1.0);
        xi += alpha * (m * xi_p).sin() * (m * eta_p).cosh();
        eta += alpha * (m * xi_p).cos() * (m * eta_p).sinh();
    }

    let easting = SCALE_FACTOR * k.a_hat * eta;
    let northing = SCALE_FACTOR * k.a_hat * xi;
    (easting.is_finite() && northing.is_finite()).then_some((easting, northing))
}

/// Longitude offset and latitude for easting/northing without false offsets
fn tm_inverse(easting: f64, northing: f64) -> Option<(f64, f64)> {
    let k = kruger();
    let xi = northing / (SCALE_FACTOR * k.a_hat);
    let eta = easting / (SCALE_FACTOR * k.a_hat);

    let mut xi_p = xi;
    let mut eta_p = eta;
    for (j, beta) in k.beta.iter().enumerate() {
        let m = 2.0 * (j as f64 + 1.0);
        xi_p -= beta * (m * xi).sin() * (m * eta).cosh();
        eta_p -= beta * (m * xi).cos() * (m * eta).sinh();
    }

    let chi = (xi_p.sin() / eta_p.cosh()).asin();
    let mut phi = chi;
    for (j, delta) in k.delta.iter().enumerate() {
        let m = 2.0 * (j as f64 + 1.0);
        phi += delta * (m * chi).sin();
    }
    let lambda = eta_p.sinh().atan2(xi_p.cos());

    let (dlon, lat) = (lambda.to_degrees(), phi.to_degrees());
    (dlon.is_finite() && lat.is_finite() && lat.abs() <= 90.0).then_some((dlon, lat))
}
