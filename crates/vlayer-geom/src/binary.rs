//! Well-known binary
//!
//! Bytes are read with `wkb::reader` and written with `wkb::writer`. The
//! geometry model is bridged through `geo_traits`: decoding walks any
//! `GeometryTrait` into a [`Geometry`], encoding exposes a borrowed
//! [`Geometry`] as a `GeometryTrait` so the writer can consume it.

use crate::GeomError;
use geo_traits::{
    CoordTrait, Dimensions, GeometryCollectionTrait, GeometryTrait, GeometryType,
    LineStringTrait, MultiLineStringTrait, MultiPointTrait, MultiPolygonTrait, PointTrait,
    PolygonTrait, UnimplementedLine, UnimplementedRect, UnimplementedTriangle,
};
use vlayer_core::{Coord, Geometry};
use wkb::writer::{write_geometry, WriteOptions};
use wkb::Endianness;

/// Parse WKB bytes into a geometry
pub fn parse_wkb(bytes: &[u8]) -> Result<Geometry, GeomError> {
    if bytes.is_empty() {
        return Err(GeomError::InvalidWkb("empty buffer".to_string()));
    }
    let parsed = wkb::reader::read_wkb(bytes).map_err(|e| GeomError::InvalidWkb(e.to_string()))?;
    from_traits(&parsed)
}

/// Serialize a geometry as little-endian ISO WKB
pub fn to_wkb(geometry: &Geometry) -> Result<Vec<u8>, GeomError> {
    let mut out = Vec::new();
    let options = WriteOptions {
        endianness: Endianness::LittleEndian,
    };
    write_geometry(&mut out, &GeometryView::new(geometry), &options)
        .map_err(|e| GeomError::InvalidWkb(e.to_string()))?;
    Ok(out)
}

fn from_traits<G: GeometryTrait<T = f64>>(geometry: &G) -> Result<Geometry, GeomError> {
    let dim = geometry.dim();
    let converted = match geometry.as_type() {
        GeometryType::Point(point) => match point.coord() {
            Some(c) if !(c.x().is_nan() && c.y().is_nan()) => Geometry::Point(coord(&c, dim)),
            _ => return Err(GeomError::EmptyPoint),
        },
        GeometryType::LineString(line) => Geometry::LineString(sequence(line, dim)),
        GeometryType::Polygon(polygon) => Geometry::Polygon(rings(polygon, dim)),
        GeometryType::MultiPoint(points) => Geometry::MultiPoint(
            points
                .points()
                .filter_map(|p| p.coord().map(|c| coord(&c, dim)))
                .filter(|c| !(c.x.is_nan() && c.y.is_nan()))
                .collect(),
        ),
        GeometryType::MultiLineString(lines) => Geometry::MultiLineString(
            lines.line_strings().map(|l| sequence(&l, dim)).collect(),
        ),
        GeometryType::MultiPolygon(polygons) => {
            Geometry::MultiPolygon(polygons.polygons().map(|p| rings(&p, dim)).collect())
        }
        GeometryType::GeometryCollection(members) => Geometry::GeometryCollection(
            members
                .geometries()
                .map(|g| from_traits(&g))
                .collect::<Result<Vec<_>, _>>()?,
        ),
        GeometryType::Rect(_) | GeometryType::Triangle(_) | GeometryType::Line(_) => {
            return Err(GeomError::InvalidWkb("unsupported geometry type".to_string()))
        }
    };
    Ok(converted)
}

fn coord<C: CoordTrait<T = f64>>(c: &C, dim: Dimensions) -> Coord {
    let (z, m) = match dim {
        Dimensions::Xyz => (c.nth(2), None),
        Dimensions::Xym => (None, c.nth(2)),
        Dimensions::Xyzm => (c.nth(2), c.nth(3)),
        _ => (None, None),
    };
    Coord {
        x: c.x(),
        y: c.y(),
        z,
        m,
    }
}

fn sequence<L: LineStringTrait<T = f64>>(line: &L, dim: Dimensions) -> Vec<Coord> {
    line.coords().map(|c| coord(&c, dim)).collect()
}

fn rings<P: PolygonTrait<T = f64>>(polygon: &P, dim: Dimensions) -> Vec<Vec<Coord>> {
    let mut out: Vec<Vec<Coord>> = polygon.exterior().iter().map(|r| sequence(r, dim)).collect();
    out.extend(polygon.interiors().map(|r| sequence(&r, dim)));
    out
}

fn dimensions(geometry: &Geometry) -> Dimensions {
    match (geometry.has_z(), geometry.has_m()) {
        (false, false) => Dimensions::Xy,
        (true, false) => Dimensions::Xyz,
        (false, true) => Dimensions::Xym,
        (true, true) => Dimensions::Xyzm,
    }
}

#[derive(Clone, Copy)]
struct CoordView<'a> {
    coord: &'a Coord,
    dim: Dimensions,
}

impl CoordTrait for CoordView<'_> {
    type T = f64;

    fn dim(&self) -> Dimensions {
        self.dim
    }

    fn x(&self) -> f64 {
        self.coord.x
    }

    fn y(&self) -> f64 {
        self.coord.y
    }

    fn nth_or_panic(&self, n: usize) -> f64 {
        match (n, self.dim) {
            (0, _) => self.coord.x,
            (1, _) => self.coord.y,
            (2, Dimensions::Xyz) | (2, Dimensions::Xyzm) => self.coord.z.unwrap_or(0.0),
            (2, Dimensions::Xym) | (3, Dimensions::Xyzm) => self.coord.m.unwrap_or(0.0),
            _ => panic!("ordinate {} out of range for {:?}", n, self.dim),
        }
    }
}

struct PointView<'a> {
    coord: Option<&'a Coord>,
    dim: Dimensions,
}

impl<'a> PointTrait for PointView<'a> {
    type CoordType<'b> = CoordView<'a> where Self: 'b;

    fn coord(&self) -> Option<Self::CoordType<'_>> {
        self.coord.map(|coord| CoordView { coord, dim: self.dim })
    }
}

struct LineView<'a> {
    coords: &'a [Coord],
    dim: Dimensions,
}

impl<'a> LineStringTrait for LineView<'a> {
    type CoordType<'b> = CoordView<'a> where Self: 'b;

    fn num_coords(&self) -> usize {
        self.coords.len()
    }

    unsafe fn coord_unchecked(&self, i: usize) -> Self::CoordType<'_> {
        CoordView {
            coord: &self.coords[i],
            dim: self.dim,
        }
    }
}

struct PolygonView<'a> {
    rings: &'a [Vec<Coord>],
    dim: Dimensions,
}

impl<'a> PolygonTrait for PolygonView<'a> {
    type RingType<'b> = LineView<'a> where Self: 'b;

    fn exterior(&self) -> Option<Self::RingType<'_>> {
        self.rings.first().map(|ring| LineView {
            coords: ring,
            dim: self.dim,
        })
    }

    fn num_interiors(&self) -> usize {
        self.rings.len().saturating_sub(1)
    }

    unsafe fn interior_unchecked(&self, i: usize) -> Self::RingType<'_> {
        LineView {
            coords: &self.rings[i + 1],
            dim: self.dim,
        }
    }
}

struct MultiPointView<'a> {
    coords: &'a [Coord],
    dim: Dimensions,
}

impl<'a> MultiPointTrait for MultiPointView<'a> {
    type InnerPointType<'b> = PointView<'a> where Self: 'b;

    fn num_points(&self) -> usize {
        self.coords.len()
    }

    unsafe fn point_unchecked(&self, i: usize) -> Self::InnerPointType<'_> {
        PointView {
            coord: Some(&self.coords[i]),
            dim: self.dim,
        }
    }
}

struct MultiLineView<'a> {
    lines: &'a [Vec<Coord>],
    dim: Dimensions,
}

impl<'a> MultiLineStringTrait for MultiLineView<'a> {
    type InnerLineStringType<'b> = LineView<'a> where Self: 'b;

    fn num_line_strings(&self) -> usize {
        self.lines.len()
    }

    unsafe fn line_string_unchecked(&self, i: usize) -> Self::InnerLineStringType<'_> {
        LineView {
            coords: &self.lines[i],
            dim: self.dim,
        }
    }
}

struct MultiPolygonView<'a> {
    polygons: &'a [Vec<Vec<Coord>>],
    dim: Dimensions,
}

impl<'a> MultiPolygonTrait for MultiPolygonView<'a> {
    type InnerPolygonType<'b> = PolygonView<'a> where Self: 'b;

    fn num_polygons(&self) -> usize {
        self.polygons.len()
    }

    unsafe fn polygon_unchecked(&self, i: usize) -> Self::InnerPolygonType<'_> {
        PolygonView {
            rings: &self.polygons[i],
            dim: self.dim,
        }
    }
}

struct CollectionView<'a> {
    members: &'a [Geometry],
    dim: Dimensions,
}

impl<'a> GeometryCollectionTrait for CollectionView<'a> {
    type GeometryType<'b> = GeometryView<'a> where Self: 'b;

    fn num_geometries(&self) -> usize {
        self.members.len()
    }

    unsafe fn geometry_unchecked(&self, i: usize) -> Self::GeometryType<'_> {
        GeometryView::with_dim(&self.members[i], self.dim)
    }
}

/// Each view is also a `GeometryTrait` of its own kind, as geo-traits
/// requires of every geometry trait implementor.
macro_rules! view_geometry {
    ($view:ident, $variant:ident) => {
        impl<'a> GeometryTrait for $view<'a> {
            type T = f64;
            type PointType<'b> = PointView<'a> where Self: 'b;
            type LineStringType<'b> = LineView<'a> where Self: 'b;
            type PolygonType<'b> = PolygonView<'a> where Self: 'b;
            type MultiPointType<'b> = MultiPointView<'a> where Self: 'b;
            type MultiLineStringType<'b> = MultiLineView<'a> where Self: 'b;
            type MultiPolygonType<'b> = MultiPolygonView<'a> where Self: 'b;
            type GeometryCollectionType<'b> = CollectionView<'a> where Self: 'b;
            type RectType<'b> = UnimplementedRect<f64> where Self: 'b;
            type TriangleType<'b> = UnimplementedTriangle<f64> where Self: 'b;
            type LineType<'b> = UnimplementedLine<f64> where Self: 'b;

            fn dim(&self) -> Dimensions {
                self.dim
            }

            #[allow(clippy::type_complexity)]
            fn as_type(
                &self,
            ) -> GeometryType<
                '_,
                Self::PointType<'_>,
                Self::LineStringType<'_>,
                Self::PolygonType<'_>,
                Self::MultiPointType<'_>,
                Self::MultiLineStringType<'_>,
                Self::MultiPolygonType<'_>,
                Self::GeometryCollectionType<'_>,
                Self::RectType<'_>,
                Self::TriangleType<'_>,
                Self::LineType<'_>,
            > {
                GeometryType::$variant(self)
            }
        }
    };
}

view_geometry!(PointView, Point);
view_geometry!(LineView, LineString);
view_geometry!(PolygonView, Polygon);
view_geometry!(MultiPointView, MultiPoint);
view_geometry!(MultiLineView, MultiLineString);
view_geometry!(MultiPolygonView, MultiPolygon);
view_geometry!(CollectionView, GeometryCollection);

/// A borrowed [`Geometry`] seen through `geo_traits`
///
/// Every member shares the dimension of the outermost geometry, so missing
/// Z or M ordinates are written as zero.
enum GeometryView<'a> {
    Point(PointView<'a>),
    LineString(LineView<'a>),
    Polygon(PolygonView<'a>),
    MultiPoint(MultiPointView<'a>),
    MultiLineString(MultiLineView<'a>),
    MultiPolygon(MultiPolygonView<'a>),
    GeometryCollection(CollectionView<'a>),
}

impl<'a> GeometryView<'a> {
    fn new(geometry: &'a Geometry) -> Self {
        Self::with_dim(geometry, dimensions(geometry))
    }

    fn with_dim(geometry: &'a Geometry, dim: Dimensions) -> Self {
        match geometry {
            Geometry::Point(c) => Self::Point(PointView {
                coord: Some(c),
                dim,
            }),
            Geometry::LineString(coords) => Self::LineString(LineView { coords, dim }),
            Geometry::Polygon(rings) => Self::Polygon(PolygonView { rings, dim }),
            Geometry::MultiPoint(coords) => Self::MultiPoint(MultiPointView { coords, dim }),
            Geometry::MultiLineString(lines) => {
                Self::MultiLineString(MultiLineView { lines, dim })
            }
            Geometry::MultiPolygon(polygons) => {
                Self::MultiPolygon(MultiPolygonView { polygons, dim })
            }
            Geometry::GeometryCollection(members) => {
                Self::GeometryCollection(CollectionView { members, dim })
            }
        }
    }
}

impl<'a> GeometryTrait for GeometryView<'a> {
    type T = f64;
    type PointType<'b> = PointView<'a> where Self: 'b;
    type LineStringType<'b> = LineView<'a> where Self: 'b;
    type PolygonType<'b> = PolygonView<'a> where Self: 'b;
    type MultiPointType<'b> = MultiPointView<'a> where Self: 'b;
    type MultiLineStringType<'b> = MultiLineView<'a> where Self: 'b;
    type MultiPolygonType<'b> = MultiPolygonView<'a> where Self: 'b;
    type GeometryCollectionType<'b> = CollectionView<'a> where Self: 'b;
    type RectType<'b> = UnimplementedRect<f64> where Self: 'b;
    type TriangleType<'b> = UnimplementedTriangle<f64> where Self: 'b;
    type LineType<'b> = UnimplementedLine<f64> where Self: 'b;

    fn dim(&self) -> Dimensions {
        match self {
            Self::Point(g) => g.dim,
            Self::LineString(g) => g.dim,
            Self::Polygon(g) => g.dim,
            Self::MultiPoint(g) => g.dim,
            Self::MultiLineString(g) => g.dim,
            Self::MultiPolygon(g) => g.dim,
            Self::GeometryCollection(g) => g.dim,
        }
    }

    #[allow(clippy::type_complexity)]
    fn as_type(
        &self,
    ) -> GeometryType<
        '_,
        Self::PointType<'_>,
        Self::LineStringType<'_>,
        Self::PolygonType<'_>,
        Self::MultiPointType<'_>,
        Self::MultiLineStringType<'_>,
        Self::MultiPolygonType<'_>,
        Self::GeometryCollectionType<'_>,
        Self::RectType<'_>,
        Self::TriangleType<'_>,
        Self::LineType<'_>,
    > {
        match self {
            Self::Point(g) => GeometryType::Point(g),
            Self::LineString(g) => GeometryType::LineString(g),
            Self::Polygon(g) => GeometryType::Polygon(g),
            Self::MultiPoint(g) => GeometryType::MultiPoint(g),
            Self::MultiLineString(g) => GeometryType::MultiLineString(g),
            Self::MultiPolygon(g) => GeometryType::MultiPolygon(g),
            Self::GeometryCollection(g) => GeometryType::GeometryCollection(g),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn reads_big_endian_point() {
        let mut bytes = vec![0u8];
        bytes.extend_from_slice(&1u32.to_be_bytes());
        bytes.extend_from_slice(&2.0f64.to_be_bytes());
        bytes.extend_from_slice(&49.0f64.to_be_bytes());

        assert_eq!(parse_wkb(&bytes).unwrap(), Geometry::Point(Coord::xy(2.0, 49.0)));
    }

    #[test]
    fn writes_little_endian_iso_codes() {
        let bytes = to_wkb(&Geometry::Point(Coord::xyz(1.0, 2.0, 3.0))).unwrap();
        assert_eq!(bytes.len(), 1 + 4 + 3 * 8);
        assert_eq!(bytes[0], 1);
        assert_eq!(u32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]), 1001);
    }

    #[test]
    fn round_trips_supported_types() {
        let geometries = vec![
            Geometry::Point(Coord::xym(1.0, 2.0, 7.0)),
            Geometry::LineString(vec![Coord::xyz(0.0, 0.0, 1.0), Coord::xyz(1.0, 1.0, 2.0)]),
            Geometry::MultiPoint(vec![Coord::xy(0.0, 0.0), Coord::xy(5.0, 5.0)]),
            Geometry::MultiPolygon(vec![vec![vec![
                Coord::xy(0.0, 0.0),
                Coord::xy(1.0, 0.0),
                Coord::xy(1.0, 1.0),
                Coord::xy(0.0, 0.0),
            ]]]),
            Geometry::GeometryCollection(vec![Geometry::Point(Coord::xy(3.0, 4.0))]),
        ];

        for geometry in geometries {
            assert_eq!(parse_wkb(&to_wkb(&geometry).unwrap()).unwrap(), geometry);
        }
    }

    #[test]
    fn rejects_empty_and_corrupt_input() {
        assert!(matches!(parse_wkb(&[]), Err(GeomError::InvalidWkb(_))));
        assert!(matches!(parse_wkb(&[1, 2, 3]), Err(GeomError::InvalidWkb(_))));
    }
}
