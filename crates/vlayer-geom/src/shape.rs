//! ESRI shape records
//!
//! The record body as stored in a `.shp` file or a shape blob column: a
//! little-endian type code followed by the payload. Only the point,
//! polyline, polygon and multipoint families are understood.

use crate::GeomError;
use vlayer_core::{Coord, Envelope, Geometry};

/// M values below this are "no data" in shape files
const NO_DATA_M: f64 = -1e38;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    Point,
    PolyLine,
    Polygon,
    MultiPoint,
}

#[derive(Debug, Clone, Copy)]
struct ShapeType {
    family: Family,
    has_z: bool,
    has_m: bool,
}

impl ShapeType {
    fn from_code(code: i32) -> Option<ShapeType> {
        let (family, has_z, has_m) = match code {
            1 => (Family::Point, false, false),
            3 => (Family::PolyLine, false, false),
            5 => (Family::Polygon, false, false),
            8 => (Family::MultiPoint, false, false),
            11 => (Family::Point, true, true),
            13 => (Family::PolyLine, true, true),
            15 => (Family::Polygon, true, true),
            18 => (Family::MultiPoint, true, true),
            21 => (Family::Point, false, true),
            23 => (Family::PolyLine, false, true),
            25 => (Family::Polygon, false, true),
            28 => (Family::MultiPoint, false, true),
            _ => return None,
        };
        Some(ShapeType { family, has_z, has_m })
    }

    fn code(family: Family, has_z: bool, has_m: bool) -> i32 {
        let base = match family {
            Family::Point => 1,
            Family::PolyLine => 3,
            Family::Polygon => 5,
            Family::MultiPoint => 8,
        };
        match (has_z, has_m) {
            (true, _) => base + 10,
            (false, true) => base + 20,
            (false, false) => base,
        }
    }
}

/// Parse a shape record; the null shape (type 0) decodes to `None`
pub fn parse_shape(bytes: &[u8]) -> Result<Option<Geometry>, GeomError> {
    let mut r = Reader { bytes, pos: 0 };
    let code = r.i32()?;
    if code == 0 {
        return Ok(None);
    }
    let shape_type = ShapeType::from_code(code).ok_or(GeomError::UnsupportedShapeType(code))?;

    let geometry = match shape_type.family {
        Family::Point => {
            let x = r.f64()?;
            let y = r.f64()?;
            let z = if shape_type.has_z { Some(r.f64()?) } else { None };
            // The M of a PointZ record is optional
            let m = if shape_type.has_m && r.remaining() >= 8 {
                measure(r.f64()?)
            } else {
                None
            };
            Geometry::Point(Coord { x, y, z, m })
        }
        Family::MultiPoint => {
            r.skip(32)?;
            let n = r.count(16)?;
            let mut coords = r.xy(n)?;
            r.ordinates(&mut coords, shape_type)?;
            Geometry::MultiPoint(coords)
        }
        Family::PolyLine | Family::Polygon => {
            r.skip(32)?;
            let num_parts = r.count(4)?;
            let num_points = r.count(16)?;
            let mut starts = Vec::with_capacity(num_parts);
            for _ in 0..num_parts {
                let start = r.i32()?;
                let start = usize::try_from(start)
                    .ok()
                    .filter(|s| *s <= num_points)
                    .ok_or_else(|| GeomError::InvalidShape(format!("bad part offset {}", start)))?;
                starts.push(start);
            }
            if starts.windows(2).any(|w| w[0] > w[1]) {
                return Err(GeomError::InvalidShape("part offsets out of order".to_string()));
            }
            let mut coords = r.xy(num_points)?;
            r.ordinates(&mut coords, shape_type)?;

            let parts: Vec<Vec<Coord>> = starts
                .iter()
                .enumerate()
                .map(|(i, &start)| {
                    let end = starts.get(i + 1).copied().unwrap_or(num_points);
                    coords[start..end].to_vec()
                })
                .collect();

            if shape_type.family == Family::PolyLine {
                if parts.len() == 1 {
                    Geometry::LineString(parts.into_iter().flatten().collect())
                } else {
                    Geometry::MultiLineString(parts)
                }
            } else {
                assemble_polygons(parts)
            }
        }
    };
    Ok(Some(geometry))
}

fn measure(value: f64) -> Option<f64> {
    (value > NO_DATA_M).then_some(value)
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], GeomError> {
        if n > self.remaining() {
            return Err(GeomError::InvalidShape(format!("truncated at byte {}", self.pos)));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn skip(&mut self, n: usize) -> Result<(), GeomError> {
        self.take(n).map(|_| ())
    }

    fn i32(&mut self) -> Result<i32, GeomError> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Ok(i32::from_le_bytes(buf))
    }

    fn f64(&mut self) -> Result<f64, GeomError> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(f64::from_le_bytes(buf))
    }

    fn count(&mut self, min_element_size: usize) -> Result<usize, GeomError> {
        let raw = self.i32()?;
        let n = usize::try_from(raw)
            .map_err(|_| GeomError::InvalidShape(format!("negative count {}", raw)))?;
        if n.saturating_mul(min_element_size) > self.remaining() {
            return Err(GeomError::InvalidShape(format!("count {} exceeds record size", n)));
        }
        Ok(n)
    }

    fn xy(&mut self, n: usize) -> Result<Vec<Coord>, GeomError> {
        let mut coords = Vec::with_capacity(n);
        for _ in 0..n {
            let x = self.f64()?;
            let y = self.f64()?;
            coords.push(Coord::xy(x, y));
        }
        Ok(coords)
    }

    /// Read the optional Z and M blocks that follow the XY array
    fn ordinates(&mut self, coords: &mut [Coord], shape_type: ShapeType) -> Result<(), GeomError> {
        let block = 16 + 8 * coords.len();
        if shape_type.has_z {
            self.skip(16)?;
            for c in coords.iter_mut() {
                c.z = Some(self.f64()?);
            }
        }
        // M is optional on Z records and mandatory on M records
        if shape_type.has_m && (!shape_type.has_z || self.remaining() >= block) {
            self.skip(16)?;
            for c in coords.iter_mut() {
                c.m = measure(self.f64()?);
            }
        }
        Ok(())
    }
}

/// Signed ring area; negative for clockwise rings
fn signed_area(ring: &[Coord]) -> f64 {
    ring.windows(2)
        .map(|w| w[0].x * w[1].y - w[1].x * w[0].y)
        .sum::<f64>()
        / 2.0
}

fn ring_envelope(ring: &[Coord]) -> Option<Envelope> {
    let first = ring.first()?;
    let mut env = Envelope::of_point(first.x, first.y);
    for c in ring {
        env.expand_to(c.x, c.y);
    }
    Some(env)
}

/// Group rings into polygons: clockwise rings are shells, the rest holes of
/// the shell whose bounds contain them
fn assemble_polygons(parts: Vec<Vec<Coord>>) -> Geometry {
    let mut polygons: Vec<Vec<Vec<Coord>>> = Vec::new();
    let mut holes = Vec::new();
    for ring in parts {
        if signed_area(&ring) <= 0.0 {
            polygons.push(vec![ring]);
        } else {
            holes.push(ring);
        }
    }

    for hole in holes {
        let owner = ring_envelope(&hole).and_then(|hole_env| {
            polygons.iter().rposition(|rings| {
                ring_envelope(&rings[0]).is_some_and(|shell_env| shell_env.contains(&hole_env))
            })
        });
        match owner.or_else(|| polygons.len().checked_sub(1)) {
            Some(i) => polygons[i].push(hole),
            // A lone counter-clockwise ring is taken as a shell
            None => polygons.push(vec![hole]),
        }
    }

    if polygons.len() == 1 {
        Geometry::Polygon(polygons.remove(0))
    } else {
        Geometry::MultiPolygon(polygons)
    }
}

/// Serialize a geometry as a shape record; `None` writes the null shape
pub fn to_shape(geometry: Option<&Geometry>) -> Result<Vec<u8>, GeomError> {
    let mut w = Writer::default();
    let Some(geometry) = geometry else {
        w.i32(0);
        return Ok(w.out);
    };
    let (has_z, has_m) = (geometry.has_z(), geometry.has_m());

    match geometry {
        Geometry::Point(c) => {
            w.i32(ShapeType::code(Family::Point, has_z, has_m));
            w.f64(c.x);
            w.f64(c.y);
            if has_z {
                w.f64(c.z.unwrap_or(0.0));
            }
            if has_m {
                w.f64(c.m.unwrap_or(NO_DATA_M * 10.0));
            }
        }
        Geometry::MultiPoint(coords) => {
            w.i32(ShapeType::code(Family::MultiPoint, has_z, has_m));
            w.bbox(geometry);
            w.i32(coords.len() as i32);
            w.coords(coords, has_z, has_m);
        }
        Geometry::LineString(line) => {
            w.parts(geometry, Family::PolyLine, std::slice::from_ref(line), has_z, has_m)
        }
        Geometry::MultiLineString(lines) => {
            w.parts(geometry, Family::PolyLine, lines, has_z, has_m)
        }
        Geometry::Polygon(rings) => {
            let rings = orient(rings);
            w.parts(geometry, Family::Polygon, &rings, has_z, has_m)
        }
        Geometry::MultiPolygon(polygons) => {
            let rings: Vec<Vec<Coord>> = polygons.iter().flat_map(|p| orient(p)).collect();
            w.parts(geometry, Family::Polygon, &rings, has_z, has_m)
        }
        Geometry::GeometryCollection(_) => {
            return Err(GeomError::Unsupported(
                "geometry collections in shape records".to_string(),
            ))
        }
    }
    Ok(w.out)
}

/// Shell clockwise, holes counter-clockwise
fn orient(rings: &[Vec<Coord>]) -> Vec<Vec<Coord>> {
    rings
        .iter()
        .enumerate()
        .map(|(i, ring)| {
            let clockwise = signed_area(ring) < 0.0;
            let mut ring = ring.clone();
            if clockwise != (i == 0) {
                ring.reverse();
            }
            ring
        })
        .collect()
}

#[derive(Default)]
struct Writer {
    out: Vec<u8>,
}

impl Writer {
    fn i32(&mut self, v: i32) {
        self.out.extend_from_slice(&v.to_le_bytes());
    }

    fn f64(&mut self, v: f64) {
        self.out.extend_from_slice(&v.to_le_bytes());
    }

    fn bbox(&mut self, geometry: &Geometry) {
        let env = geometry.envelope().unwrap_or(Envelope::of_point(0.0, 0.0));
        for v in [env.min_x, env.min_y, env.max_x, env.max_y] {
            self.f64(v);
        }
    }

    fn range(&mut self, values: impl Iterator<Item = f64> + Clone) {
        let min = values.clone().fold(f64::INFINITY, f64::min);
        let max = values.fold(f64::NEG_INFINITY, f64::max);
        if min.is_finite() {
            self.f64(min);
            self.f64(max);
        } else {
            self.f64(0.0);
            self.f64(0.0);
        }
    }

    fn coords(&mut self, coords: &[Coord], has_z: bool, has_m: bool) {
        for c in coords {
            self.f64(c.x);
            self.f64(c.y);
        }
        if has_z {
            let zs = coords.iter().map(|c| c.z.unwrap_or(0.0));
            self.range(zs.clone());
            zs.for_each(|z| self.f64(z));
        }
        if has_m {
            let ms = coords.iter().filter_map(|c| c.m);
            self.range(ms);
            for c in coords {
                self.f64(c.m.unwrap_or(NO_DATA_M * 10.0));
            }
        }
    }

    fn parts(
        &mut self,
        geometry: &Geometry,
        family: Family,
        parts: &[Vec<Coord>],
        has_z: bool,
        has_m: bool,
    ) {
        self.i32(ShapeType::code(family, has_z, has_m));
        self.bbox(geometry);
        let total: usize = parts.iter().map(Vec::len).sum();
        self.i32(parts.len() as i32);
        self.i32(total as i32);
        let mut start = 0;
        for part in parts {
            self.i32(start as i32);
            start += part.len();
        }
        let flat: Vec<Coord> = parts.iter().flatten().copied().collect();
        self.coords(&flat, has_z, has_m);
    }
}
