//! Geometry model shared by the codec, the query engine, and the validator.
//!
//! Geometries are a tagged sum over the shapes MVT can carry. Polygon rings
//! are stored closed (first coordinate repeated at the end) with ring 0 as
//! the exterior, matching the GeoJSON convention; the codec closes and
//! reopens rings at the wire boundary.

use tileforge_tile_utils::{webmercator_to_wgs84, wgs84_to_webmercator};

pub mod clip;
pub mod ops;
pub mod simplify;
pub mod validity;

pub use clip::FillType;
pub use ops::HitDistance;

/// Hard bound on geometry-collection recursion.
pub const MAX_NESTING: usize = 16;

/// A position in whichever plane the surrounding code works in
/// (WGS84 degrees, mercator meters, or the integer tile grid).
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Coord {
    pub x: f64,
    pub y: f64,
}

impl Coord {
    #[must_use]
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    #[must_use]
    pub fn distance(self, other: Self) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

impl From<(f64, f64)> for Coord {
    fn from((x, y): (f64, f64)) -> Self {
        Self { x, y }
    }
}

/// An axis-aligned bounding rectangle.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Rect {
    pub minx: f64,
    pub miny: f64,
    pub maxx: f64,
    pub maxy: f64,
}

impl Rect {
    #[must_use]
    pub fn from_bbox([minx, miny, maxx, maxy]: [f64; 4]) -> Self {
        Self { minx, miny, maxx, maxy }
    }

    #[must_use]
    pub fn to_bbox(self) -> [f64; 4] {
        [self.minx, self.miny, self.maxx, self.maxy]
    }

    #[must_use]
    pub fn contains(&self, c: Coord) -> bool {
        c.x >= self.minx && c.x <= self.maxx && c.y >= self.miny && c.y <= self.maxy
    }

    #[must_use]
    pub fn width(&self) -> f64 {
        self.maxx - self.minx
    }

    #[must_use]
    pub fn height(&self) -> f64 {
        self.maxy - self.miny
    }

    fn extend(&mut self, c: Coord) {
        self.minx = self.minx.min(c.x);
        self.miny = self.miny.min(c.y);
        self.maxx = self.maxx.max(c.x);
        self.maxy = self.maxy.max(c.y);
    }
}

/// A closed ring of coordinates; first and last entries coincide.
pub type Ring = Vec<Coord>;

/// Sum of the shapes a feature can carry.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum Geometry {
    #[default]
    Empty,
    Point(Coord),
    MultiPoint(Vec<Coord>),
    LineString(Vec<Coord>),
    MultiLineString(Vec<Vec<Coord>>),
    /// Ring 0 is the exterior, the rest are holes.
    Polygon(Vec<Ring>),
    MultiPolygon(Vec<Vec<Ring>>),
    Collection(Vec<Geometry>),
}

impl Geometry {
    /// True when the geometry carries no coordinates at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Point(_) => false,
            Self::MultiPoint(ps) | Self::LineString(ps) => ps.is_empty(),
            Self::MultiLineString(ls) | Self::Polygon(ls) => ls.iter().all(Vec::is_empty),
            Self::MultiPolygon(polys) => {
                polys.iter().all(|p| p.iter().all(Vec::is_empty))
            }
            Self::Collection(gs) => gs.iter().all(Self::is_empty),
        }
    }

    /// Applies `f` to every coordinate in place.
    pub fn transform_coords(&mut self, f: &mut impl FnMut(Coord) -> Coord) {
        self.transform_coords_n(f, MAX_NESTING);
    }

    fn transform_coords_n(&mut self, f: &mut impl FnMut(Coord) -> Coord, depth: usize) {
        match self {
            Self::Empty => {}
            Self::Point(p) => *p = f(*p),
            Self::MultiPoint(ps) | Self::LineString(ps) => {
                for p in ps {
                    *p = f(*p);
                }
            }
            Self::MultiLineString(ls) | Self::Polygon(ls) => {
                for line in ls {
                    for p in line {
                        *p = f(*p);
                    }
                }
            }
            Self::MultiPolygon(polys) => {
                for rings in polys {
                    for ring in rings {
                        for p in ring {
                            *p = f(*p);
                        }
                    }
                }
            }
            Self::Collection(gs) => {
                if depth == 0 {
                    return;
                }
                for g in gs {
                    g.transform_coords_n(f, depth - 1);
                }
            }
        }
    }

    /// Reprojects WGS84 degrees to mercator meters.
    pub fn to_mercator(&mut self) {
        self.transform_coords(&mut |c| {
            let (x, y) = wgs84_to_webmercator(c.x, c.y);
            Coord { x, y }
        });
    }

    /// Reprojects mercator meters to WGS84 degrees.
    pub fn to_wgs84(&mut self) {
        self.transform_coords(&mut |c| {
            let (x, y) = webmercator_to_wgs84(c.x, c.y);
            Coord { x, y }
        });
    }

    /// Visits every coordinate without mutating.
    pub fn for_each_coord(&self, f: &mut impl FnMut(Coord)) {
        self.for_each_coord_n(f, MAX_NESTING);
    }

    fn for_each_coord_n(&self, f: &mut impl FnMut(Coord), depth: usize) {
        match self {
            Self::Empty => {}
            Self::Point(p) => f(*p),
            Self::MultiPoint(ps) | Self::LineString(ps) => ps.iter().copied().for_each(f),
            Self::MultiLineString(ls) | Self::Polygon(ls) => {
                for line in ls {
                    line.iter().copied().for_each(&mut *f);
                }
            }
            Self::MultiPolygon(polys) => {
                for rings in polys {
                    for ring in rings {
                        ring.iter().copied().for_each(&mut *f);
                    }
                }
            }
            Self::Collection(gs) => {
                if depth == 0 {
                    return;
                }
                for g in gs {
                    g.for_each_coord_n(f, depth - 1);
                }
            }
        }
    }

    /// Bounding rectangle, `None` for empty geometries.
    #[must_use]
    pub fn bounding_rect(&self) -> Option<Rect> {
        let mut rect: Option<Rect> = None;
        self.for_each_coord(&mut |c| match &mut rect {
            Some(r) => r.extend(c),
            None => {
                rect = Some(Rect { minx: c.x, miny: c.y, maxx: c.x, maxy: c.y });
            }
        });
        rect
    }

    /// Converts a GeoJSON geometry value. Collections nested deeper than
    /// [`MAX_NESTING`] are dropped to `Empty`.
    #[must_use]
    pub fn from_geojson(value: &geojson::Value) -> Self {
        Self::from_geojson_n(value, MAX_NESTING)
    }

    fn from_geojson_n(value: &geojson::Value, depth: usize) -> Self {
        let coord = |p: &Vec<f64>| Coord { x: p[0], y: p[1] };
        let line = |ps: &Vec<Vec<f64>>| ps.iter().map(coord).collect::<Vec<_>>();
        match value {
            geojson::Value::Point(p) if p.len() >= 2 => Self::Point(coord(p)),
            geojson::Value::Point(_) => Self::Empty,
            geojson::Value::MultiPoint(ps) => {
                Self::MultiPoint(ps.iter().filter(|p| p.len() >= 2).map(coord).collect())
            }
            geojson::Value::LineString(ps) => Self::LineString(line(ps)),
            geojson::Value::MultiLineString(ls) => {
                Self::MultiLineString(ls.iter().map(line).collect())
            }
            geojson::Value::Polygon(rings) => Self::Polygon(rings.iter().map(line).collect()),
            geojson::Value::MultiPolygon(polys) => Self::MultiPolygon(
                polys
                    .iter()
                    .map(|rings| rings.iter().map(line).collect())
                    .collect(),
            ),
            geojson::Value::GeometryCollection(gs) => {
                if depth == 0 {
                    tracing::warn!("geometry collection nested deeper than {MAX_NESTING}, dropped");
                    return Self::Empty;
                }
                Self::Collection(
                    gs.iter()
                        .map(|g| Self::from_geojson_n(&g.value, depth - 1))
                        .collect(),
                )
            }
        }
    }

    /// Converts into a GeoJSON geometry value.
    #[must_use]
    pub fn to_geojson(&self) -> geojson::Value {
        let pos = |c: &Coord| vec![c.x, c.y];
        let line = |ps: &Vec<Coord>| ps.iter().map(pos).collect::<Vec<_>>();
        match self {
            // GeoJSON has no empty geometry; an empty collection is the
            // conventional stand-in.
            Self::Empty => geojson::Value::GeometryCollection(vec![]),
            Self::Point(p) => geojson::Value::Point(pos(p)),
            Self::MultiPoint(ps) => geojson::Value::MultiPoint(ps.iter().map(pos).collect()),
            Self::LineString(ps) => geojson::Value::LineString(line(ps)),
            Self::MultiLineString(ls) => {
                geojson::Value::MultiLineString(ls.iter().map(line).collect())
            }
            Self::Polygon(rings) => geojson::Value::Polygon(rings.iter().map(line).collect()),
            Self::MultiPolygon(polys) => geojson::Value::MultiPolygon(
                polys
                    .iter()
                    .map(|rings| rings.iter().map(line).collect())
                    .collect(),
            ),
            Self::Collection(gs) => geojson::Value::GeometryCollection(
                gs.iter().map(|g| geojson::Geometry::new(g.to_geojson())).collect(),
            ),
        }
    }
}

/// Signed area of a closed ring, positive for counter-clockwise order in a
/// y-up plane (and for clockwise order in the y-down tile grid).
#[must_use]
pub fn signed_area(ring: &[Coord]) -> f64 {
    if ring.len() < 3 {
        return 0.0;
    }
    let mut sum = 0.0;
    for pair in ring.windows(2) {
        sum += pair[0].x * pair[1].y - pair[1].x * pair[0].y;
    }
    sum / 2.0
}
