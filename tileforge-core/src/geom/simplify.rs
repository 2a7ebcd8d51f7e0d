//! Douglas–Peucker line simplification.

use super::{Coord, Geometry, MAX_NESTING, ops::point_segment_distance};

/// Simplifies `points` so no removed vertex deviates more than `tolerance`
/// from the simplified line. Endpoints are always kept. `tolerance <= 0`
/// returns the input unchanged.
#[must_use]
pub fn simplify_line(points: &[Coord], tolerance: f64) -> Vec<Coord> {
    if tolerance <= 0.0 || points.len() <= 2 {
        return points.to_vec();
    }

    let mut keep = vec![false; points.len()];
    keep[0] = true;
    keep[points.len() - 1] = true;

    let mut stack = vec![(0_usize, points.len() - 1)];
    while let Some((start, end)) = stack.pop() {
        if end <= start + 1 {
            continue;
        }
        let mut max_distance = 0.0_f64;
        let mut max_index = start;
        for (i, point) in points.iter().enumerate().take(end).skip(start + 1) {
            let distance = point_segment_distance(*point, points[start], points[end]);
            if distance > max_distance {
                max_distance = distance;
                max_index = i;
            }
        }
        if max_distance > tolerance {
            keep[max_index] = true;
            stack.push((start, max_index));
            stack.push((max_index, end));
        }
    }

    points
        .iter()
        .zip(&keep)
        .filter_map(|(p, keep)| keep.then_some(*p))
        .collect()
}

/// Applies [`simplify_line`] to every line and ring of `geom` in place.
///
/// Rings keep their closing coordinate; a ring simplified below four
/// coordinates is left untouched rather than degenerate.
pub fn simplify_geometry(geom: &mut Geometry, tolerance: f64) {
    if tolerance <= 0.0 {
        return;
    }
    simplify_geometry_n(geom, tolerance, MAX_NESTING);
}

fn simplify_geometry_n(geom: &mut Geometry, tolerance: f64, depth: usize) {
    match geom {
        Geometry::Empty | Geometry::Point(_) | Geometry::MultiPoint(_) => {}
        Geometry::LineString(ps) => *ps = simplify_line(ps, tolerance),
        Geometry::MultiLineString(ls) => {
            for line in ls {
                *line = simplify_line(line, tolerance);
            }
        }
        Geometry::Polygon(rings) => {
            for ring in rings {
                simplify_ring(ring, tolerance);
            }
        }
        Geometry::MultiPolygon(polys) => {
            for rings in polys {
                for ring in rings {
                    simplify_ring(ring, tolerance);
                }
            }
        }
        Geometry::Collection(gs) => {
            if depth == 0 {
                return;
            }
            for g in gs {
                simplify_geometry_n(g, tolerance, depth - 1);
            }
        }
    }
}

fn simplify_ring(ring: &mut Vec<Coord>, tolerance: f64) {
    let simplified = simplify_line(ring, tolerance);
    if simplified.len() >= 4 {
        *ring = simplified;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line_with_noise() -> Vec<Coord> {
        vec![
            Coord::new(0.0, 0.0),
            Coord::new(1.0, 0.1),
            Coord::new(2.0, -0.1),
            Coord::new(3.0, 5.0),
            Coord::new(4.0, 6.0),
            Coord::new(5.0, 7.0),
            Coord::new(6.0, 8.1),
            Coord::new(7.0, 9.0),
            Coord::new(8.0, 9.0),
            Coord::new(9.0, 9.0),
        ]
    }

    #[test]
    fn collapses_collinear_noise() {
        let simplified = simplify_line(&line_with_noise(), 1.0);
        assert!(simplified.len() < line_with_noise().len());
        assert_eq!(simplified.first(), Some(&Coord::new(0.0, 0.0)));
        assert_eq!(simplified.last(), Some(&Coord::new(9.0, 9.0)));
        // the sharp corner survives
        assert!(simplified.contains(&Coord::new(2.0, -0.1)) || simplified.contains(&Coord::new(3.0, 5.0)));
    }

    #[test]
    fn zero_tolerance_is_identity() {
        assert_eq!(simplify_line(&line_with_noise(), 0.0), line_with_noise());
    }

    #[test]
    fn rings_stay_closed() {
        let mut geom = Geometry::Polygon(vec![vec![
            Coord::new(0.0, 0.0),
            Coord::new(5.0, 0.05),
            Coord::new(10.0, 0.0),
            Coord::new(10.0, 10.0),
            Coord::new(0.0, 10.0),
            Coord::new(0.0, 0.0),
        ]]);
        simplify_geometry(&mut geom, 0.5);
        let Geometry::Polygon(rings) = &geom else {
            panic!("shape changed");
        };
        assert_eq!(rings[0].first(), rings[0].last());
        assert_eq!(rings[0].len(), 5);
    }

    #[test]
    fn tiny_ring_is_not_degraded() {
        let ring = vec![
            Coord::new(0.0, 0.0),
            Coord::new(1.0, 0.0),
            Coord::new(1.0, 1.0),
            Coord::new(0.0, 0.0),
        ];
        let mut geom = Geometry::Polygon(vec![ring.clone()]);
        simplify_geometry(&mut geom, 100.0);
        assert_eq!(geom, Geometry::Polygon(vec![ring]));
    }
}
