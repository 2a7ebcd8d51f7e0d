//! Hit testing: point-to-geometry distance and point-in-polygon.

use super::{Coord, Geometry, MAX_NESTING, Ring};

/// Result of a point-to-geometry distance test.
///
/// A negative `distance` means the geometry was not hit at all; `x`/`y`
/// hold the hit position for matches (a vertex for points and lines, the
/// query point itself for polygon containment).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HitDistance {
    pub distance: f64,
    pub x: f64,
    pub y: f64,
}

impl HitDistance {
    pub const MISS: Self = Self { distance: -1.0, x: 0.0, y: 0.0 };

    #[must_use]
    pub fn is_hit(&self) -> bool {
        self.distance >= 0.0
    }
}

/// Distance from `query` to `geom`.
///
/// Ties between members of a multi geometry resolve to the earlier member;
/// ties between segments of a line resolve to the earlier segment.
#[must_use]
pub fn hit_test(geom: &Geometry, query: Coord) -> HitDistance {
    hit_test_n(geom, query, MAX_NESTING)
}

fn hit_test_n(geom: &Geometry, query: Coord, depth: usize) -> HitDistance {
    match geom {
        Geometry::Empty => HitDistance::MISS,
        Geometry::Point(p) => HitDistance { distance: p.distance(query), x: p.x, y: p.y },
        Geometry::MultiPoint(ps) => {
            let mut best = HitDistance::MISS;
            for p in ps {
                let candidate =
                    HitDistance { distance: p.distance(query), x: p.x, y: p.y };
                if improves(&best, &candidate) {
                    best = candidate;
                }
            }
            best
        }
        Geometry::LineString(ps) => line_hit(ps, query),
        Geometry::MultiLineString(ls) => {
            let mut best = HitDistance::MISS;
            for line in ls {
                let candidate = line_hit(line, query);
                if improves(&best, &candidate) {
                    best = candidate;
                }
            }
            best
        }
        Geometry::Polygon(rings) => polygon_hit(rings, query),
        Geometry::MultiPolygon(polys) => {
            let mut best = HitDistance::MISS;
            for rings in polys {
                let candidate = polygon_hit(rings, query);
                if improves(&best, &candidate) {
                    best = candidate;
                }
            }
            best
        }
        Geometry::Collection(gs) => {
            if depth == 0 {
                return HitDistance::MISS;
            }
            let mut best = HitDistance::MISS;
            for g in gs {
                let candidate = hit_test_n(g, query, depth - 1);
                if improves(&best, &candidate) {
                    best = candidate;
                }
            }
            best
        }
    }
}

/// Strict improvement keeps the earlier candidate on ties.
fn improves(best: &HitDistance, candidate: &HitDistance) -> bool {
    candidate.is_hit() && (!best.is_hit() || candidate.distance < best.distance)
}

fn line_hit(points: &[Coord], query: Coord) -> HitDistance {
    if points.is_empty() {
        return HitDistance::MISS;
    }
    if points.len() == 1 {
        return HitDistance {
            distance: points[0].distance(query),
            x: points[0].x,
            y: points[0].y,
        };
    }
    let mut best = HitDistance::MISS;
    for segment in points.windows(2) {
        let distance = point_segment_distance(query, segment[0], segment[1]);
        let candidate = HitDistance { distance, x: segment[0].x, y: segment[0].y };
        if improves(&best, &candidate) {
            best = candidate;
        }
    }
    best
}

fn polygon_hit(rings: &[Ring], query: Coord) -> HitDistance {
    if point_in_rings(rings, query) {
        HitDistance { distance: 0.0, x: query.x, y: query.y }
    } else {
        HitDistance::MISS
    }
}

/// Inside the exterior ring and outside every hole.
#[must_use]
pub fn point_in_rings(rings: &[Ring], query: Coord) -> bool {
    let Some(exterior) = rings.first() else {
        return false;
    };
    if !point_in_ring(exterior, query) {
        return false;
    }
    !rings[1..].iter().any(|hole| point_in_ring(hole, query))
}

/// Ray-casting crossing test; boundary points count as inside.
fn point_in_ring(ring: &[Coord], query: Coord) -> bool {
    if ring.len() < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = ring.len() - 1;
    for i in 0..ring.len() {
        let (pi, pj) = (ring[i], ring[j]);
        if point_segment_distance(query, pi, pj) == 0.0 {
            return true;
        }
        if (pi.y > query.y) != (pj.y > query.y) {
            let cross_x = (pj.x - pi.x) * (query.y - pi.y) / (pj.y - pi.y) + pi.x;
            if query.x < cross_x {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

/// Distance from `query` to the segment `a`..`b`.
#[must_use]
pub fn point_segment_distance(query: Coord, a: Coord, b: Coord) -> f64 {
    let (dx, dy) = (b.x - a.x, b.y - a.y);
    let length_sq = dx * dx + dy * dy;
    if length_sq == 0.0 {
        return query.distance(a);
    }
    let t = (((query.x - a.x) * dx + (query.y - a.y) * dy) / length_sq).clamp(0.0, 1.0);
    query.distance(Coord { x: a.x + t * dx, y: a.y + t * dy })
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use rstest::rstest;

    use super::*;

    fn square(offset: f64) -> Ring {
        vec![
            Coord::new(offset, offset),
            Coord::new(offset + 10.0, offset),
            Coord::new(offset + 10.0, offset + 10.0),
            Coord::new(offset, offset + 10.0),
            Coord::new(offset, offset),
        ]
    }

    #[rstest]
    #[case::center(Coord::new(5.0, 5.0), true)]
    #[case::outside(Coord::new(15.0, 5.0), false)]
    #[case::on_edge(Coord::new(0.0, 5.0), true)]
    #[case::on_vertex(Coord::new(0.0, 0.0), true)]
    fn point_in_single_ring(#[case] query: Coord, #[case] expected: bool) {
        assert_eq!(point_in_rings(&[square(0.0)], query), expected);
    }

    #[test]
    fn hole_excludes_point() {
        let rings = vec![square(0.0), square(4.0)];
        assert!(point_in_rings(&rings, Coord::new(2.0, 2.0)));
        assert!(!point_in_rings(&rings, Coord::new(5.0, 5.0)));
    }

    #[test]
    fn point_distance() {
        let hit = hit_test(&Geometry::Point(Coord::new(3.0, 4.0)), Coord::new(0.0, 0.0));
        assert_relative_eq!(hit.distance, 5.0);
        assert_eq!((hit.x, hit.y), (3.0, 4.0));
    }

    #[test]
    fn line_distance_reports_segment_start() {
        let line = Geometry::LineString(vec![
            Coord::new(0.0, 0.0),
            Coord::new(10.0, 0.0),
            Coord::new(10.0, 10.0),
        ]);
        let hit = hit_test(&line, Coord::new(5.0, 3.0));
        assert_relative_eq!(hit.distance, 3.0);
        // the first segment produced the minimum, its start is the hit
        assert_eq!((hit.x, hit.y), (0.0, 0.0));
    }

    #[test]
    fn polygon_inside_is_distance_zero_at_query() {
        let poly = Geometry::Polygon(vec![square(0.0)]);
        let hit = hit_test(&poly, Coord::new(1.0, 1.0));
        assert_eq!(hit.distance, 0.0);
        assert_eq!((hit.x, hit.y), (1.0, 1.0));
        assert!(!hit_test(&poly, Coord::new(-1.0, 1.0)).is_hit());
    }

    #[test]
    fn multi_member_tie_keeps_earlier() {
        let multi = Geometry::MultiPoint(vec![Coord::new(1.0, 0.0), Coord::new(-1.0, 0.0)]);
        let hit = hit_test(&multi, Coord::new(0.0, 0.0));
        assert_eq!((hit.x, hit.y), (1.0, 0.0));
    }

    #[test]
    fn collection_recursion_is_bounded() {
        let mut geom = Geometry::Point(Coord::new(0.0, 0.0));
        for _ in 0..(MAX_NESTING + 2) {
            geom = Geometry::Collection(vec![geom]);
        }
        assert!(!hit_test(&geom, Coord::new(0.0, 0.0)).is_hit());
    }

    #[test]
    fn empty_misses() {
        assert!(!hit_test(&Geometry::Empty, Coord::new(0.0, 0.0)).is_hit());
        assert!(!hit_test(&Geometry::LineString(vec![]), Coord::new(0.0, 0.0)).is_hit());
    }
}
