//! Well-known text
//!
//! Parsing is delegated to the `wkt` crate; writing produces ISO spellings
//! (`POINT Z (1 2 3)`) so Z and M ordinates survive a round trip.

use crate::GeomError;
use std::fmt::Write;
use std::str::FromStr;
use vlayer_core::{Coord, Geometry};

/// Parse WKT text into a geometry
pub fn parse_wkt(text: &str) -> Result<Geometry, GeomError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(GeomError::InvalidWkt("empty text".to_string()));
    }
    let parsed =
        ::wkt::Wkt::<f64>::from_str(trimmed).map_err(|e| GeomError::InvalidWkt(e.to_string()))?;
    convert(parsed.item)
}

fn convert(parsed: ::wkt::Geometry<f64>) -> Result<Geometry, GeomError> {
    use ::wkt::Geometry as Wkt;

    let geometry = match parsed {
        Wkt::Point(point) => match point.0 {
            Some(c) => Geometry::Point(coord(c)),
            None => return Err(GeomError::EmptyPoint),
        },
        Wkt::LineString(line) => Geometry::LineString(line.0.into_iter().map(coord).collect()),
        Wkt::Polygon(polygon) => Geometry::Polygon(rings(polygon)),
        Wkt::MultiPoint(points) => Geometry::MultiPoint(
            points.0.into_iter().filter_map(|p| p.0).map(coord).collect(),
        ),
        Wkt::MultiLineString(lines) => Geometry::MultiLineString(
            lines
                .0
                .into_iter()
                .map(|l| l.0.into_iter().map(coord).collect())
                .collect(),
        ),
        Wkt::MultiPolygon(polygons) => {
            Geometry::MultiPolygon(polygons.0.into_iter().map(rings).collect())
        }
        Wkt::GeometryCollection(members) => Geometry::GeometryCollection(
            members
                .0
                .into_iter()
                .map(convert)
                .collect::<Result<Vec<_>, _>>()?,
        ),
    };
    Ok(geometry)
}

fn coord(c: ::wkt::types::Coord<f64>) -> Coord {
    Coord {
        x: c.x,
        y: c.y,
        z: c.z,
        m: c.m,
    }
}

fn rings(polygon: ::wkt::types::Polygon<f64>) -> Vec<Vec<Coord>> {
    polygon
        .0
        .into_iter()
        .map(|ring| ring.0.into_iter().map(coord).collect())
        .collect()
}

/// Serialize a geometry as ISO WKT
pub fn to_wkt(geometry: &Geometry) -> String {
    let mut out = String::new();
    write_geometry(&mut out, geometry);
    out
}

fn dimension_tag(geometry: &Geometry) -> &'static str {
    match (geometry.has_z(), geometry.has_m()) {
        (true, true) => " ZM",
        (true, false) => " Z",
        (false, true) => " M",
        (false, false) => "",
    }
}

fn write_geometry(out: &mut String, geometry: &Geometry) {
    let keyword = match geometry {
        Geometry::Point(_) => "POINT",
        Geometry::LineString(_) => "LINESTRING",
        Geometry::Polygon(_) => "POLYGON",
        Geometry::MultiPoint(_) => "MULTIPOINT",
        Geometry::MultiLineString(_) => "MULTILINESTRING",
        Geometry::MultiPolygon(_) => "MULTIPOLYGON",
        Geometry::GeometryCollection(_) => "GEOMETRYCOLLECTION",
    };
    out.push_str(keyword);
    out.push_str(dimension_tag(geometry));

    if geometry.is_empty() {
        out.push_str(" EMPTY");
        return;
    }

    let (z, m) = (geometry.has_z(), geometry.has_m());
    out.push(' ');
    match geometry {
        Geometry::Point(c) => {
            out.push('(');
            write_coord(out, c, z, m);
            out.push(')');
        }
        Geometry::LineString(cs) => write_sequence(out, cs, z, m),
        Geometry::MultiPoint(cs) => {
            out.push('(');
            for (i, c) in cs.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push('(');
                write_coord(out, c, z, m);
                out.push(')');
            }
            out.push(')');
        }
        Geometry::Polygon(rings) | Geometry::MultiLineString(rings) => {
            write_rings(out, rings, z, m)
        }
        Geometry::MultiPolygon(polygons) => {
            out.push('(');
            for (i, rings) in polygons.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_rings(out, rings, z, m);
            }
            out.push(')');
        }
        Geometry::GeometryCollection(members) => {
            out.push('(');
            for (i, member) in members.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_geometry(out, member);
            }
            out.push(')');
        }
    }
}

fn write_rings(out: &mut String, rings: &[Vec<Coord>], z: bool, m: bool) {
    out.push('(');
    for (i, ring) in rings.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write_sequence(out, ring, z, m);
    }
    out.push(')');
}

fn write_sequence(out: &mut String, coords: &[Coord], z: bool, m: bool) {
    out.push('(');
    for (i, c) in coords.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write_coord(out, c, z, m);
    }
    out.push(')');
}

fn write_coord(out: &mut String, c: &Coord, z: bool, m: bool) {
    // Writing to a String cannot fail
    let _ = write!(out, "{} {}", c.x, c.y);
    if z {
        let _ = write!(out, " {}", c.z.unwrap_or(0.0));
    }
    if m {
        let _ = write!(out, " {}", c.m.unwrap_or(0.0));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn writes_iso_text() {
        let point = Geometry::Point(Coord::xyz(1.0, 2.5, 3.0));
        assert_eq!(to_wkt(&point), "POINT Z (1 2.5 3)");

        let line = Geometry::LineString(vec![Coord::xy(0.0, 0.0), Coord::xy(1.0, 1.0)]);
        assert_eq!(to_wkt(&line), "LINESTRING (0 0, 1 1)");

        assert_eq!(to_wkt(&Geometry::MultiPoint(vec![])), "MULTIPOINT EMPTY");
    }

    #[test]
    fn round_trips_supported_types() {
        let geometries = vec![
            Geometry::Point(Coord::xy(2.0, 49.0)),
            Geometry::Point(Coord::xyzm(1.0, 2.0, 3.0, 4.0)),
            Geometry::Polygon(vec![
                vec![
                    Coord::xy(0.0, 0.0),
                    Coord::xy(10.0, 0.0),
                    Coord::xy(10.0, 10.0),
                    Coord::xy(0.0, 0.0),
                ],
                vec![
                    Coord::xy(1.0, 1.0),
                    Coord::xy(2.0, 1.0),
                    Coord::xy(2.0, 2.0),
                    Coord::xy(1.0, 1.0),
                ],
            ]),
            Geometry::MultiLineString(vec![
                vec![Coord::xy(0.0, 0.0), Coord::xy(1.0, 1.0)],
                vec![Coord::xy(2.0, 2.0), Coord::xy(3.0, 3.5)],
            ]),
            Geometry::GeometryCollection(vec![
                Geometry::Point(Coord::xy(1.0, 1.0)),
                Geometry::LineString(vec![Coord::xy(0.0, 0.0), Coord::xy(1.0, 0.0)]),
            ]),
        ];

        for geometry in geometries {
            let text = to_wkt(&geometry);
            assert_eq!(parse_wkt(&text).unwrap(), geometry, "{}", text);
        }
    }

    #[test]
    fn parses_every_geometry_keyword() {
        assert_eq!(
            parse_wkt("LINESTRING (0 0, 1 2)").unwrap(),
            Geometry::LineString(vec![Coord::xy(0.0, 0.0), Coord::xy(1.0, 2.0)])
        );
        assert_eq!(
            parse_wkt("MULTIPOINT ((1 1), (2 3))").unwrap(),
            Geometry::MultiPoint(vec![Coord::xy(1.0, 1.0), Coord::xy(2.0, 3.0)])
        );
        assert_eq!(
            parse_wkt("MULTIPOLYGON (((0 0, 1 0, 1 1, 0 0)))").unwrap(),
            Geometry::MultiPolygon(vec![vec![vec![
                Coord::xy(0.0, 0.0),
                Coord::xy(1.0, 0.0),
                Coord::xy(1.0, 1.0),
                Coord::xy(0.0, 0.0),
            ]]])
        );
        assert_eq!(
            parse_wkt("POINT Z (1 2 3)").unwrap(),
            Geometry::Point(Coord::xyz(1.0, 2.0, 3.0))
        );
    }

    #[test]
    fn rejects_malformed_text() {
        assert!(matches!(parse_wkt(""), Err(GeomError::InvalidWkt(_))));
        assert!(matches!(parse_wkt("POINT (1"), Err(GeomError::InvalidWkt(_))));
        assert!(matches!(parse_wkt("HEXAGON (1 2)"), Err(GeomError::InvalidWkt(_))));
        assert_eq!(parse_wkt("POINT EMPTY"), Err(GeomError::EmptyPoint));
    }
}
