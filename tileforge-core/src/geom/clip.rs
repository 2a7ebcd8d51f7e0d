//! Clipping against an axis-aligned rectangle.
//!
//! Lines are clipped segment-by-segment and stitched back together, so a
//! line that leaves and re-enters the window splits into multiple parts.
//! Polygon rings go through Sutherland–Hodgman against each window edge.

use super::{Coord, Geometry, MAX_NESTING, Rect, Ring};

/// Rule resolving polygon interiors from ring winding and area sign.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillType {
    EvenOdd,
    #[default]
    NonZero,
    Positive,
    Negative,
}

impl FillType {
    /// Whether a ring with this signed area bounds an interior (as opposed
    /// to a hole) under this fill rule.
    #[must_use]
    pub fn is_exterior(self, signed_area: f64) -> bool {
        match self {
            Self::EvenOdd | Self::NonZero | Self::Positive => signed_area > 0.0,
            Self::Negative => signed_area < 0.0,
        }
    }
}

/// Clips a geometry to `rect`. Degenerate results collapse to `Empty`.
#[must_use]
pub fn clip_geometry(geom: &Geometry, rect: &Rect) -> Geometry {
    clip_geometry_n(geom, rect, MAX_NESTING)
}

fn clip_geometry_n(geom: &Geometry, rect: &Rect, depth: usize) -> Geometry {
    match geom {
        Geometry::Empty => Geometry::Empty,
        Geometry::Point(p) => {
            if rect.contains(*p) {
                Geometry::Point(*p)
            } else {
                Geometry::Empty
            }
        }
        Geometry::MultiPoint(ps) => {
            let kept: Vec<Coord> = ps.iter().copied().filter(|p| rect.contains(*p)).collect();
            if kept.is_empty() {
                Geometry::Empty
            } else {
                Geometry::MultiPoint(kept)
            }
        }
        Geometry::LineString(ps) => parts_to_lines(clip_polyline(ps, rect)),
        Geometry::MultiLineString(ls) => {
            let parts: Vec<Vec<Coord>> =
                ls.iter().flat_map(|line| clip_polyline(line, rect)).collect();
            if parts.is_empty() {
                Geometry::Empty
            } else {
                Geometry::MultiLineString(parts)
            }
        }
        Geometry::Polygon(rings) => rings_to_polygon(clip_rings(rings, rect)),
        Geometry::MultiPolygon(polys) => {
            let kept: Vec<Vec<Ring>> = polys
                .iter()
                .filter_map(|rings| {
                    let clipped = clip_rings(rings, rect);
                    (!clipped.is_empty()).then_some(clipped)
                })
                .collect();
            match kept.len() {
                0 => Geometry::Empty,
                1 => Geometry::Polygon(kept.into_iter().next().unwrap_or_default()),
                _ => Geometry::MultiPolygon(kept),
            }
        }
        Geometry::Collection(gs) => {
            if depth == 0 {
                return Geometry::Empty;
            }
            let kept: Vec<Geometry> = gs
                .iter()
                .map(|g| clip_geometry_n(g, rect, depth - 1))
                .filter(|g| !g.is_empty())
                .collect();
            if kept.is_empty() {
                Geometry::Empty
            } else {
                Geometry::Collection(kept)
            }
        }
    }
}

fn parts_to_lines(parts: Vec<Vec<Coord>>) -> Geometry {
    match parts.len() {
        0 => Geometry::Empty,
        1 => Geometry::LineString(parts.into_iter().next().unwrap_or_default()),
        _ => Geometry::MultiLineString(parts),
    }
}

fn rings_to_polygon(rings: Vec<Ring>) -> Geometry {
    if rings.is_empty() {
        Geometry::Empty
    } else {
        Geometry::Polygon(rings)
    }
}

/// Clips the rings of one polygon; an exterior clipped away drops the
/// whole polygon, clipped-away holes just disappear.
fn clip_rings(rings: &[Ring], rect: &Rect) -> Vec<Ring> {
    let mut out = Vec::with_capacity(rings.len());
    for (i, ring) in rings.iter().enumerate() {
        let clipped = clip_ring(ring, rect);
        if clipped.len() >= 4 {
            out.push(clipped);
        } else if i == 0 {
            return Vec::new();
        }
    }
    out
}

/// Liang–Barsky clip of a single segment; returns the portion inside.
fn clip_segment(a: Coord, b: Coord, rect: &Rect) -> Option<(Coord, Coord)> {
    let (dx, dy) = (b.x - a.x, b.y - a.y);
    let mut t0 = 0.0_f64;
    let mut t1 = 1.0_f64;

    for (p, q) in [
        (-dx, a.x - rect.minx),
        (dx, rect.maxx - a.x),
        (-dy, a.y - rect.miny),
        (dy, rect.maxy - a.y),
    ] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
            continue;
        }
        let r = q / p;
        if p < 0.0 {
            if r > t1 {
                return None;
            }
            t0 = t0.max(r);
        } else {
            if r < t0 {
                return None;
            }
            t1 = t1.min(r);
        }
    }
    if t0 > t1 {
        return None;
    }
    let lerp = |t: f64| Coord { x: a.x + t * dx, y: a.y + t * dy };
    Some((lerp(t0), lerp(t1)))
}

/// Clips an open or closed polyline, splitting it where it leaves the
/// window.
fn clip_polyline(points: &[Coord], rect: &Rect) -> Vec<Vec<Coord>> {
    let mut parts: Vec<Vec<Coord>> = Vec::new();
    let mut current: Vec<Coord> = Vec::new();
    for segment in points.windows(2) {
        let Some((start, end)) = clip_segment(segment[0], segment[1], rect) else {
            if current.len() >= 2 {
                parts.push(std::mem::take(&mut current));
            } else {
                current.clear();
            }
            continue;
        };
        if current.last() == Some(&start) {
            current.push(end);
        } else {
            if current.len() >= 2 {
                parts.push(std::mem::take(&mut current));
            } else {
                current.clear();
            }
            current.push(start);
            current.push(end);
        }
    }
    if current.len() >= 2 {
        parts.push(current);
    }
    parts
}

/// Sutherland–Hodgman ring clip. Input and output rings are closed.
fn clip_ring(ring: &[Coord], rect: &Rect) -> Ring {
    if ring.len() < 4 {
        return Vec::new();
    }
    // operate on the open ring
    let mut subject: Vec<Coord> = ring[..ring.len() - 1].to_vec();

    for edge in 0..4 {
        if subject.is_empty() {
            return Vec::new();
        }
        let inside = |c: Coord| match edge {
            0 => c.x >= rect.minx,
            1 => c.x <= rect.maxx,
            2 => c.y >= rect.miny,
            _ => c.y <= rect.maxy,
        };
        let intersect = |a: Coord, b: Coord| -> Coord {
            match edge {
                0 => edge_cross_x(a, b, rect.minx),
                1 => edge_cross_x(a, b, rect.maxx),
                2 => edge_cross_y(a, b, rect.miny),
                _ => edge_cross_y(a, b, rect.maxy),
            }
        };

        let mut output = Vec::with_capacity(subject.len() + 4);
        let mut prev = subject[subject.len() - 1];
        for &point in &subject {
            let point_inside = inside(point);
            if point_inside != inside(prev) {
                output.push(intersect(prev, point));
            }
            if point_inside {
                output.push(point);
            }
            prev = point;
        }
        subject = output;
    }

    if subject.len() < 3 {
        return Vec::new();
    }
    subject.dedup();
    if subject.len() < 3 {
        return Vec::new();
    }
    let first = subject[0];
    subject.push(first);
    subject
}

fn edge_cross_x(a: Coord, b: Coord, x: f64) -> Coord {
    let t = (x - a.x) / (b.x - a.x);
    Coord { x, y: a.y + t * (b.y - a.y) }
}

fn edge_cross_y(a: Coord, b: Coord, y: f64) -> Coord {
    let t = (y - a.y) / (b.y - a.y);
    Coord { x: a.x + t * (b.x - a.x), y }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::geom::signed_area;

    fn window() -> Rect {
        Rect { minx: 0.0, miny: 0.0, maxx: 10.0, maxy: 10.0 }
    }

    #[test]
    fn points_filter() {
        let geom = Geometry::MultiPoint(vec![Coord::new(5.0, 5.0), Coord::new(15.0, 5.0)]);
        assert_eq!(
            clip_geometry(&geom, &window()),
            Geometry::MultiPoint(vec![Coord::new(5.0, 5.0)])
        );
        assert_eq!(
            clip_geometry(&Geometry::Point(Coord::new(-1.0, 0.0)), &window()),
            Geometry::Empty
        );
    }

    #[test]
    fn line_crossing_window_is_trimmed() {
        let line = Geometry::LineString(vec![Coord::new(-5.0, 5.0), Coord::new(15.0, 5.0)]);
        let Geometry::LineString(clipped) = clip_geometry(&line, &window()) else {
            panic!("expected a linestring");
        };
        assert_eq!(clipped, vec![Coord::new(0.0, 5.0), Coord::new(10.0, 5.0)]);
    }

    #[test]
    fn line_leaving_and_reentering_splits() {
        let line = Geometry::LineString(vec![
            Coord::new(2.0, 2.0),
            Coord::new(12.0, 2.0),
            Coord::new(12.0, 8.0),
            Coord::new(2.0, 8.0),
        ]);
        let Geometry::MultiLineString(parts) = clip_geometry(&line, &window()) else {
            panic!("expected a multilinestring");
        };
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0][0], Coord::new(2.0, 2.0));
        assert_eq!(parts[1].last(), Some(&Coord::new(2.0, 8.0)));
    }

    #[test]
    fn fully_outside_line_disappears() {
        let line = Geometry::LineString(vec![Coord::new(20.0, 20.0), Coord::new(30.0, 20.0)]);
        assert_eq!(clip_geometry(&line, &window()), Geometry::Empty);
    }

    #[test]
    fn polygon_corner_clip_keeps_area() {
        let poly = Geometry::Polygon(vec![vec![
            Coord::new(5.0, 5.0),
            Coord::new(15.0, 5.0),
            Coord::new(15.0, 15.0),
            Coord::new(5.0, 15.0),
            Coord::new(5.0, 5.0),
        ]]);
        let Geometry::Polygon(rings) = clip_geometry(&poly, &window()) else {
            panic!("expected a polygon");
        };
        assert_eq!(rings.len(), 1);
        assert_relative_eq!(signed_area(&rings[0]).abs(), 25.0);
        assert_eq!(rings[0].first(), rings[0].last());
    }

    #[test]
    fn clipped_exterior_drops_polygon_and_its_holes() {
        let poly = Geometry::Polygon(vec![
            vec![
                Coord::new(20.0, 20.0),
                Coord::new(30.0, 20.0),
                Coord::new(30.0, 30.0),
                Coord::new(20.0, 30.0),
                Coord::new(20.0, 20.0),
            ],
            vec![
                Coord::new(22.0, 22.0),
                Coord::new(28.0, 22.0),
                Coord::new(28.0, 28.0),
                Coord::new(22.0, 28.0),
                Coord::new(22.0, 22.0),
            ],
        ]);
        assert_eq!(clip_geometry(&poly, &window()), Geometry::Empty);
    }

    #[test]
    fn fill_type_orientation() {
        assert!(FillType::NonZero.is_exterior(4.0));
        assert!(!FillType::NonZero.is_exterior(-4.0));
        assert!(FillType::Negative.is_exterior(-4.0));
        assert!(!FillType::Negative.is_exterior(4.0));
    }
}
