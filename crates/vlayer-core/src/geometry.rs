//! Geometry values and envelopes
//!
//! Coordinates carry optional Z and M ordinates so that measured and 3D
//! geometries survive a round trip through any derivation strategy.

use crate::schema::{GeometryKind, GeometryType};
use serde::{Deserialize, Serialize};

/// A single position
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coord {
    pub x: f64,
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub m: Option<f64>,
}

impl Coord {
    pub fn xy(x: f64, y: f64) -> Self {
        Self { x, y, z: None, m: None }
    }

    pub fn xyz(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z: Some(z), m: None }
    }

    pub fn xym(x: f64, y: f64, m: f64) -> Self {
        Self { x, y, z: None, m: Some(m) }
    }

    pub fn xyzm(x: f64, y: f64, z: f64, m: f64) -> Self {
        Self { x, y, z: Some(z), m: Some(m) }
    }
}

/// Axis-aligned bounding rectangle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Envelope {
    /// Create an envelope, normalising the corner order
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self {
            min_x: x1.min(x2),
            min_y: y1.min(y2),
            max_x: x1.max(x2),
            max_y: y1.max(y2),
        }
    }

    /// Envelope of a single point
    pub fn of_point(x: f64, y: f64) -> Self {
        Self {
            min_x: x,
            min_y: y,
            max_x: x,
            max_y: y,
        }
    }

    /// Grow to cover a point
    pub fn expand_to(&mut self, x: f64, y: f64) {
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
    }

    /// Smallest envelope covering both
    pub fn merge(&self, other: &Envelope) -> Envelope {
        Envelope {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }

    /// Overlap of both, if any
    pub fn intersection(&self, other: &Envelope) -> Option<Envelope> {
        if !self.intersects(other) {
            return None;
        }
        Some(Envelope {
            min_x: self.min_x.max(other.min_x),
            min_y: self.min_y.max(other.min_y),
            max_x: self.max_x.min(other.max_x),
            max_y: self.max_y.min(other.max_y),
        })
    }

    pub fn intersects(&self, other: &Envelope) -> bool {
        self.min_x <= other.max_x
            && other.min_x <= self.max_x
            && self.min_y <= other.max_y
            && other.min_y <= self.max_y
    }

    /// Whether `other` lies entirely inside this envelope
    pub fn contains(&self, other: &Envelope) -> bool {
        self.min_x <= other.min_x
            && self.min_y <= other.min_y
            && self.max_x >= other.max_x
            && self.max_y >= other.max_y
    }

    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }

    /// The four corners, counter-clockwise from the lower left
    pub fn corners(&self) -> [(f64, f64); 4] {
        [
            (self.min_x, self.min_y),
            (self.max_x, self.min_y),
            (self.max_x, self.max_y),
            (self.min_x, self.max_y),
        ]
    }

    /// Rectangle polygon covering this envelope
    pub fn to_polygon(&self) -> Geometry {
        let mut ring: Vec<Coord> = self.corners().iter().map(|&(x, y)| Coord::xy(x, y)).collect();
        ring.push(Coord::xy(self.min_x, self.min_y));
        Geometry::Polygon(vec![ring])
    }
}

/// A geometry value
///
/// Polygons are stored as rings, exterior first. Multi geometries hold their
/// members directly rather than wrapping them in `Geometry`.
#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    Point(Coord),
    LineString(Vec<Coord>),
    Polygon(Vec<Vec<Coord>>),
    MultiPoint(Vec<Coord>),
    MultiLineString(Vec<Vec<Coord>>),
    MultiPolygon(Vec<Vec<Vec<Coord>>>),
    GeometryCollection(Vec<Geometry>),
}

impl Geometry {
    /// Base kind without dimension flags
    pub fn kind(&self) -> GeometryKind {
        match self {
            Self::Point(_) => GeometryKind::Point,
            Self::LineString(_) => GeometryKind::LineString,
            Self::Polygon(_) => GeometryKind::Polygon,
            Self::MultiPoint(_) => GeometryKind::MultiPoint,
            Self::MultiLineString(_) => GeometryKind::MultiLineString,
            Self::MultiPolygon(_) => GeometryKind::MultiPolygon,
            Self::GeometryCollection(_) => GeometryKind::GeometryCollection,
        }
    }

    /// Kind plus the dimensions actually present in the coordinates
    pub fn geometry_type(&self) -> GeometryType {
        GeometryType {
            kind: self.kind(),
            has_z: self.has_z(),
            has_m: self.has_m(),
        }
    }

    pub fn has_z(&self) -> bool {
        let mut found = false;
        self.for_each_coord(|c| found |= c.z.is_some());
        found
    }

    pub fn has_m(&self) -> bool {
        let mut found = false;
        self.for_each_coord(|c| found |= c.m.is_some());
        found
    }

    /// Whether the geometry holds no coordinates at all
    pub fn is_empty(&self) -> bool {
        let mut count = 0usize;
        self.for_each_coord(|_| count += 1);
        count == 0
    }

    pub fn is_polygonal(&self) -> bool {
        matches!(self, Self::Polygon(_) | Self::MultiPolygon(_))
    }

    /// Visit every coordinate
    pub fn for_each_coord(&self, mut f: impl FnMut(&Coord)) {
        self.visit(&mut f);
    }

    fn visit(&self, f: &mut impl FnMut(&Coord)) {
        match self {
            Self::Point(c) => f(c),
            Self::LineString(cs) | Self::MultiPoint(cs) => cs.iter().for_each(|c| f(c)),
            Self::Polygon(rings) | Self::MultiLineString(rings) => {
                rings.iter().flatten().for_each(|c| f(c))
            }
            Self::MultiPolygon(polys) => polys.iter().flatten().flatten().for_each(|c| f(c)),
            Self::GeometryCollection(members) => members.iter().for_each(|g| g.visit(f)),
        }
    }

    /// Visit every coordinate mutably
    pub fn for_each_coord_mut(&mut self, mut f: impl FnMut(&mut Coord)) {
        self.visit_mut(&mut f);
    }

    fn visit_mut(&mut self, f: &mut impl FnMut(&mut Coord)) {
        match self {
            Self::Point(c) => f(c),
            Self::LineString(cs) | Self::MultiPoint(cs) => cs.iter_mut().for_each(|c| f(c)),
            Self::Polygon(rings) | Self::MultiLineString(rings) => {
                rings.iter_mut().flatten().for_each(|c| f(c))
            }
            Self::MultiPolygon(polys) => {
                polys.iter_mut().flatten().flatten().for_each(|c| f(c))
            }
            Self::GeometryCollection(members) => members.iter_mut().for_each(|g| g.visit_mut(f)),
        }
    }

    /// Bounding rectangle, `None` for empty geometries
    pub fn envelope(&self) -> Option<Envelope> {
        let mut envelope: Option<Envelope> = None;
        self.for_each_coord(|c| match envelope.as_mut() {
            Some(env) => env.expand_to(c.x, c.y),
            None => envelope = Some(Envelope::of_point(c.x, c.y)),
        });
        envelope
    }

    /// Whether this is an axis-aligned rectangle polygon
    ///
    /// A rectangular filter lets callers skip the exact intersection test
    /// for geometries whose envelope lies inside it.
    pub fn is_rectangle(&self) -> bool {
        let Self::Polygon(rings) = self else {
            return false;
        };
        if rings.len() != 1 || rings[0].len() != 5 {
            return false;
        }
        let ring = &rings[0];
        if ring[0].x != ring[4].x || ring[0].y != ring[4].y {
            return false;
        }
        // Alternate edges must be horizontal and vertical
        let horizontal_first = ring[0].y == ring[1].y;
        (0..4).all(|i| {
            let (a, b) = (&ring[i], &ring[i + 1]);
            if (i % 2 == 0) == horizontal_first {
                a.y == b.y && a.x != b.x
            } else {
                a.x == b.x && a.y != b.y
            }
        })
    }

    /// Drop Z and M ordinates
    pub fn flatten_to_2d(&mut self) {
        self.for_each_coord_mut(|c| {
            c.z = None;
            c.m = None;
        });
    }
}
