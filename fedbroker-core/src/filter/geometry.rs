//! Minimal WKT geometry support for spatial criteria.
//!
//! Reads `POINT`, `MULTIPOINT`, `LINESTRING`, `POLYGON` and CQL-style
//! `ENVELOPE(minX, maxX, maxY, minY)`. Coordinates are `x y` pairs, i.e.
//! longitude then latitude. Spatial tests are planar on degrees; distances
//! use the haversine formula.

use std::fmt;

/// Mean Earth radius in meters.
const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// A longitude/latitude pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coord {
    /// Longitude (x).
    pub x: f64,
    /// Latitude (y).
    pub y: f64,
}

impl Coord {
    /// Build a coordinate from longitude and latitude.
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Whether this is a valid geographic coordinate.
    pub fn is_geographic(&self) -> bool {
        (-180.0..=180.0).contains(&self.x) && (-90.0..=90.0).contains(&self.y)
    }
}

/// A parsed geometry.
#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    /// A single position.
    Point(Coord),
    /// Several unconnected positions.
    MultiPoint(Vec<Coord>),
    /// A connected path.
    LineString(Vec<Coord>),
    /// Exterior ring followed by holes, each closed.
    Polygon(Vec<Vec<Coord>>),
}

/// A WKT string that could not be read.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("invalid geometry: {0}")]
pub struct GeometryError(pub String);

impl Geometry {
    /// Parse WKT text.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError`] on unknown geometry types, malformed
    /// coordinates, or unclosed polygon rings.
    pub fn parse_wkt(text: &str) -> Result<Self, GeometryError> {
        WktReader::new(text).read()
    }

    /// Every vertex of the geometry.
    pub fn vertices(&self) -> Vec<Coord> {
        match self {
            Self::Point(c) => vec![*c],
            Self::MultiPoint(cs) | Self::LineString(cs) => cs.clone(),
            Self::Polygon(rings) => rings.iter().flatten().copied().collect(),
        }
    }

    /// Whether every vertex is a valid geographic coordinate.
    pub fn is_geographic(&self) -> bool {
        self.vertices().iter().all(Coord::is_geographic)
    }

    fn segments(&self) -> Vec<(Coord, Coord)> {
        match self {
            Self::Point(_) | Self::MultiPoint(_) => Vec::new(),
            Self::LineString(cs) => cs.windows(2).map(|w| (w[0], w[1])).collect(),
            Self::Polygon(rings) => rings
                .iter()
                .flat_map(|ring| ring.windows(2).map(|w| (w[0], w[1])))
                .collect(),
        }
    }

    /// Whether `point` lies inside (or on the boundary of) this geometry.
    pub fn covers_point(&self, point: Coord) -> bool {
        match self {
            Self::Point(c) => *c == point,
            Self::MultiPoint(cs) => cs.contains(&point),
            Self::LineString(_) => self
                .segments()
                .iter()
                .any(|&(a, b)| on_segment(a, b, point)),
            Self::Polygon(rings) => polygon_covers(rings, point),
        }
    }

    /// Whether `other` lies entirely inside this geometry.
    pub fn contains(&self, other: &Geometry) -> bool {
        let vertices = other.vertices();
        if vertices.is_empty() || !vertices.iter().all(|v| self.covers_point(*v)) {
            return false;
        }
        // A path leaving and re-entering a concave polygon crosses its boundary.
        !other.segments().iter().any(|&(a, b)| {
            self.segments()
                .iter()
                .any(|&(c, d)| segments_cross_properly(a, b, c, d))
        })
    }

    /// Whether the two geometries share at least one point.
    pub fn intersects(&self, other: &Geometry) -> bool {
        if other.vertices().iter().any(|v| self.covers_point(*v))
            || self.vertices().iter().any(|v| other.covers_point(*v))
        {
            return true;
        }
        other.segments().iter().any(|&(a, b)| {
            self.segments()
                .iter()
                .any(|&(c, d)| segments_intersect(a, b, c, d))
        })
    }

    /// Smallest great-circle distance in meters from `point` to any vertex.
    pub fn distance_to_m(&self, point: Coord) -> Option<f64> {
        if self.covers_point(point) {
            return Some(0.0);
        }
        self.vertices()
            .iter()
            .map(|v| haversine_m(*v, point))
            .min_by(f64::total_cmp)
    }
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn list(coords: &[Coord]) -> String {
            coords
                .iter()
                .map(|c| format!("{} {}", c.x, c.y))
                .collect::<Vec<_>>()
                .join(", ")
        }
        match self {
            Self::Point(c) => write!(f, "POINT({} {})", c.x, c.y),
            Self::MultiPoint(cs) => write!(f, "MULTIPOINT({})", list(cs)),
            Self::LineString(cs) => write!(f, "LINESTRING({})", list(cs)),
            Self::Polygon(rings) => {
                let rings: Vec<String> = rings.iter().map(|r| format!("({})", list(r))).collect();
                write!(f, "POLYGON({})", rings.join(", "))
            }
        }
    }
}

/// Great-circle distance between two coordinates in meters.
pub fn haversine_m(a: Coord, b: Coord) -> f64 {
    let (lat1, lat2) = (a.y.to_radians(), b.y.to_radians());
    let d_lat = (b.y - a.y).to_radians();
    let d_lon = (b.x - a.x).to_radians();
    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

fn cross(o: Coord, a: Coord, b: Coord) -> f64 {
    (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
}

fn on_segment(a: Coord, b: Coord, p: Coord) -> bool {
    cross(a, b, p).abs() < f64::EPSILON
        && p.x >= a.x.min(b.x)
        && p.x <= a.x.max(b.x)
        && p.y >= a.y.min(b.y)
        && p.y <= a.y.max(b.y)
}

fn segments_intersect(a: Coord, b: Coord, c: Coord, d: Coord) -> bool {
    let d1 = cross(c, d, a);
    let d2 = cross(c, d, b);
    let d3 = cross(a, b, c);
    let d4 = cross(a, b, d);
    if ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
    {
        return true;
    }
    on_segment(c, d, a) || on_segment(c, d, b) || on_segment(a, b, c) || on_segment(a, b, d)
}

fn segments_cross_properly(a: Coord, b: Coord, c: Coord, d: Coord) -> bool {
    let d1 = cross(c, d, a);
    let d2 = cross(c, d, b);
    let d3 = cross(a, b, c);
    let d4 = cross(a, b, d);
    d1 * d2 < 0.0 && d3 * d4 < 0.0
}

fn ring_covers(ring: &[Coord], p: Coord) -> bool {
    if ring.windows(2).any(|w| on_segment(w[0], w[1], p)) {
        return true;
    }
    let mut inside = false;
    for w in ring.windows(2) {
        let (a, b) = (w[0], w[1]);
        if (a.y > p.y) != (b.y > p.y) {
            let x_at = a.x + (p.y - a.y) * (b.x - a.x) / (b.y - a.y);
            if p.x < x_at {
                inside = !inside;
            }
        }
    }
    inside
}

fn polygon_covers(rings: &[Vec<Coord>], p: Coord) -> bool {
    let Some((exterior, holes)) = rings.split_first() else {
        return false;
    };
    ring_covers(exterior, p)
        && !holes
            .iter()
            .any(|hole| ring_covers(hole, p) && !hole.windows(2).any(|w| on_segment(w[0], w[1], p)))
}

/// Hand-written WKT tokenizer and reader.
struct WktReader<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> WktReader<'a> {
    fn new(text: &'a str) -> Self {
        Self { text, pos: 0 }
    }

    fn err(&self, message: impl fmt::Display) -> GeometryError {
        GeometryError(format!("{message} at offset {} in '{}'", self.pos, self.text))
    }

    fn skip_ws(&mut self) {
        let rest = &self.text[self.pos..];
        self.pos += rest.len() - rest.trim_start().len();
    }

    fn peek(&mut self) -> Option<char> {
        self.skip_ws();
        self.text[self.pos..].chars().next()
    }

    fn expect(&mut self, c: char) -> Result<(), GeometryError> {
        if self.peek() == Some(c) {
            self.pos += c.len_utf8();
            Ok(())
        } else {
            Err(self.err(format!("expected '{c}'")))
        }
    }

    fn word(&mut self) -> String {
        self.skip_ws();
        let rest = &self.text[self.pos..];
        let len = rest
            .find(|c: char| !c.is_ascii_alphabetic())
            .unwrap_or(rest.len());
        self.pos += len;
        rest[..len].to_ascii_uppercase()
    }

    fn number(&mut self) -> Result<f64, GeometryError> {
        self.skip_ws();
        let rest = &self.text[self.pos..];
        let len = rest
            .find(|c: char| !(c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E')))
            .unwrap_or(rest.len());
        let value = rest[..len]
            .parse::<f64>()
            .map_err(|_| self.err("expected a number"))?;
        if !value.is_finite() {
            return Err(self.err("coordinate is not finite"));
        }
        self.pos += len;
        Ok(value)
    }

    fn coord(&mut self) -> Result<Coord, GeometryError> {
        let x = self.number()?;
        let y = self.number()?;
        Ok(Coord::new(x, y))
    }

    fn coord_list(&mut self) -> Result<Vec<Coord>, GeometryError> {
        self.expect('(')?;
        let mut coords = vec![self.point_item()?];
        while self.peek() == Some(',') {
            self.pos += 1;
            coords.push(self.point_item()?);
        }
        self.expect(')')?;
        Ok(coords)
    }

    /// A coordinate, optionally wrapped in its own parentheses (MULTIPOINT allows both).
    fn point_item(&mut self) -> Result<Coord, GeometryError> {
        if self.peek() == Some('(') {
            self.pos += 1;
            let c = self.coord()?;
            self.expect(')')?;
            Ok(c)
        } else {
            self.coord()
        }
    }

    fn read(mut self) -> Result<Geometry, GeometryError> {
        let kind = self.word();
        let geometry = match kind.as_str() {
            "POINT" => {
                self.expect('(')?;
                let c = self.coord()?;
                self.expect(')')?;
                Geometry::Point(c)
            }
            "MULTIPOINT" => Geometry::MultiPoint(self.coord_list()?),
            "LINESTRING" => {
                let coords = self.coord_list()?;
                if coords.len() < 2 {
                    return Err(self.err("linestring needs at least two points"));
                }
                Geometry::LineString(coords)
            }
            "POLYGON" => {
                self.expect('(')?;
                let mut rings = vec![self.ring()?];
                while self.peek() == Some(',') {
                    self.pos += 1;
                    rings.push(self.ring()?);
                }
                self.expect(')')?;
                Geometry::Polygon(rings)
            }
            "ENVELOPE" => self.envelope()?,
            "" => return Err(self.err("missing geometry type")),
            other => return Err(self.err(format!("unsupported geometry type {other}"))),
        };
        self.skip_ws();
        if self.pos != self.text.len() {
            return Err(self.err("trailing characters"));
        }
        Ok(geometry)
    }

    fn ring(&mut self) -> Result<Vec<Coord>, GeometryError> {
        let ring = self.coord_list()?;
        if ring.len() < 4 || ring.first() != ring.last() {
            return Err(self.err("polygon ring must be closed and have at least four points"));
        }
        Ok(ring)
    }

    fn envelope(&mut self) -> Result<Geometry, GeometryError> {
        self.expect('(')?;
        let min_x = self.number()?;
        self.expect(',')?;
        let max_x = self.number()?;
        self.expect(',')?;
        let max_y = self.number()?;
        self.expect(',')?;
        let min_y = self.number()?;
        self.expect(')')?;
        if min_x > max_x || min_y > max_y {
            return Err(self.err("envelope bounds are inverted"));
        }
        Ok(Geometry::Polygon(vec![vec![
            Coord::new(min_x, min_y),
            Coord::new(max_x, min_y),
            Coord::new(max_x, max_y),
            Coord::new(min_x, max_y),
            Coord::new(min_x, min_y),
        ]]))
    }
}
