//! Positions, distances and bounding boxes on top of the `geo` crate.

use geo::{Area, BoundingRect, Centroid, HaversineDistance, MultiPoint, Point, Rect, coord};
use serde::{Deserialize, Serialize};

/// A WGS84 position. Use [`Coord::to_pair`] for GeoJSON `[lon, lat]` output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coord {
    pub lon: f64,
    pub lat: f64,
}

impl Coord {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }

    /// Great-circle distance in metres.
    pub fn distance_to(&self, other: &Coord) -> f64 {
        Point::from(*self).haversine_distance(&Point::from(*other))
    }

    pub fn is_valid(&self) -> bool {
        self.lon.is_finite()
            && self.lat.is_finite()
            && (-180.0..=180.0).contains(&self.lon)
            && (-90.0..=90.0).contains(&self.lat)
    }

    pub fn to_pair(self) -> [f64; 2] {
        [self.lon, self.lat]
    }
}

impl From<Coord> for Point {
    fn from(c: Coord) -> Self {
        Point::new(c.lon, c.lat)
    }
}

impl From<Point> for Coord {
    fn from(p: Point) -> Self {
        Coord::new(p.x(), p.y())
    }
}

fn multi_point<I: IntoIterator<Item = Coord>>(coords: I) -> MultiPoint {
    coords.into_iter().map(Point::from).collect::<Vec<_>>().into()
}

/// Mean position of a set of coordinates, `None` when empty.
pub fn centroid<I: IntoIterator<Item = Coord>>(coords: I) -> Option<Coord> {
    multi_point(coords).centroid().map(Coord::from)
}

/// Axis-aligned box in degrees, serialized as `west/south/east/north`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl BBox {
    pub fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self {
            west,
            south,
            east,
            north,
        }
    }

    /// Smallest box holding every position, `None` when empty.
    pub fn covering<I: IntoIterator<Item = Coord>>(coords: I) -> Option<Self> {
        multi_point(coords).bounding_rect().map(BBox::from)
    }

    fn rect(&self) -> Rect {
        Rect::new(
            coord! { x: self.west, y: self.south },
            coord! { x: self.east, y: self.north },
        )
    }

    // Boundary-inclusive, so a one-station system on an edge still matches.
    pub fn contains_point(&self, c: Coord) -> bool {
        self.west <= c.lon && c.lon <= self.east && self.south <= c.lat && c.lat <= self.north
    }

    pub fn contains(&self, other: &BBox) -> bool {
        self.contains_point(Coord::new(other.west, other.south))
            && self.contains_point(Coord::new(other.east, other.north))
    }

    /// Area in square degrees; only used to rank candidate boxes.
    pub fn area(&self) -> f64 {
        self.rect().unsigned_area()
    }
}

impl From<Rect> for BBox {
    fn from(rect: Rect) -> Self {
        BBox::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y)
    }
}
