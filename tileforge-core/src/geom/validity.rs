//! Simplicity and validity predicates per OGC Simple Features.
//!
//! Findings carry the offending sub-geometry as GeoJSON so callers can put
//! it straight into diagnostics output.

use super::{Coord, Geometry, MAX_NESTING, Ring, ops, signed_area};

/// One defect found in a geometry.
#[derive(Debug, Clone, serde::Serialize)]
pub struct GeometryFinding {
    pub reason: String,
    /// Offending sub-geometry as a GeoJSON value.
    pub geometry: serde_json::Value,
}

impl GeometryFinding {
    fn new(reason: impl Into<String>, offending: &Geometry) -> Self {
        Self {
            reason: reason.into(),
            geometry: serde_json::to_value(geojson::Geometry::new(offending.to_geojson()))
                .unwrap_or(serde_json::Value::Null),
        }
    }
}

/// Collects simplicity defects of `geom` into `out`.
pub fn simplicity_findings(geom: &Geometry, out: &mut Vec<GeometryFinding>) {
    simplicity_findings_n(geom, out, MAX_NESTING);
}

fn simplicity_findings_n(geom: &Geometry, out: &mut Vec<GeometryFinding>, depth: usize) {
    match geom {
        Geometry::Empty | Geometry::Point(_) => {}
        Geometry::MultiPoint(ps) => {
            for (i, p) in ps.iter().enumerate() {
                if ps[..i].contains(p) {
                    out.push(GeometryFinding::new(
                        "multipoint contains a repeated position",
                        &Geometry::Point(*p),
                    ));
                }
            }
        }
        Geometry::LineString(ps) => check_line_simple(ps, false, out),
        Geometry::MultiLineString(ls) => {
            for line in ls {
                check_line_simple(line, false, out);
            }
        }
        Geometry::Polygon(rings) => {
            for ring in rings {
                check_line_simple(ring, true, out);
            }
        }
        Geometry::MultiPolygon(polys) => {
            for rings in polys {
                for ring in rings {
                    check_line_simple(ring, true, out);
                }
            }
        }
        Geometry::Collection(gs) => {
            if depth == 0 {
                return;
            }
            for g in gs {
                simplicity_findings_n(g, out, depth - 1);
            }
        }
    }
}

/// Collects validity defects of `geom` into `out`. Validity implies
/// simplicity for the ring-based types.
pub fn validity_findings(geom: &Geometry, out: &mut Vec<GeometryFinding>) {
    validity_findings_n(geom, out, MAX_NESTING);
}

fn validity_findings_n(geom: &Geometry, out: &mut Vec<GeometryFinding>, depth: usize) {
    match geom {
        Geometry::Empty | Geometry::Point(_) | Geometry::MultiPoint(_) => {}
        Geometry::LineString(ps) => {
            if ps.len() < 2 {
                out.push(GeometryFinding::new(
                    "linestring has fewer than two positions",
                    geom,
                ));
            }
        }
        Geometry::MultiLineString(ls) => {
            for line in ls {
                validity_findings_n(&Geometry::LineString(line.clone()), out, depth);
            }
        }
        Geometry::Polygon(rings) => check_polygon_valid(rings, out),
        Geometry::MultiPolygon(polys) => {
            for rings in polys {
                check_polygon_valid(rings, out);
            }
        }
        Geometry::Collection(gs) => {
            if depth == 0 {
                return;
            }
            for g in gs {
                validity_findings_n(g, out, depth - 1);
            }
        }
    }
}

#[must_use]
pub fn is_simple(geom: &Geometry) -> bool {
    let mut findings = Vec::new();
    simplicity_findings(geom, &mut findings);
    findings.is_empty()
}

#[must_use]
pub fn is_valid(geom: &Geometry) -> bool {
    let mut findings = Vec::new();
    validity_findings(geom, &mut findings);
    findings.is_empty()
}

fn check_line_simple(points: &[Coord], is_ring: bool, out: &mut Vec<GeometryFinding>) {
    let offending = || {
        if is_ring {
            Geometry::Polygon(vec![points.to_vec()])
        } else {
            Geometry::LineString(points.to_vec())
        }
    };

    if points.windows(2).any(|pair| pair[0] == pair[1]) {
        out.push(GeometryFinding::new(
            "repeated consecutive position",
            &offending(),
        ));
    }

    // Pairwise segment check between non-adjacent segments. Adjacent
    // segments legitimately share a vertex; for rings the first and last
    // segments are adjacent through the closure.
    let n = points.len().saturating_sub(1);
    for i in 0..n {
        for j in (i + 2)..n {
            if is_ring && i == 0 && j == n - 1 {
                continue;
            }
            if segments_cross(points[i], points[i + 1], points[j], points[j + 1]) {
                out.push(GeometryFinding::new("self-intersection", &offending()));
                return;
            }
        }
    }
}

fn check_polygon_valid(rings: &[Ring], out: &mut Vec<GeometryFinding>) {
    for ring in rings {
        let as_geom = || Geometry::Polygon(vec![ring.clone()]);
        if ring.len() < 4 {
            out.push(GeometryFinding::new(
                "ring has fewer than four positions",
                &as_geom(),
            ));
            continue;
        }
        if ring.first() != ring.last() {
            out.push(GeometryFinding::new("ring is not closed", &as_geom()));
        }
        if signed_area(ring) == 0.0 {
            out.push(GeometryFinding::new("ring has zero area", &as_geom()));
        }
        check_line_simple(ring, true, out);
    }

    let Some(exterior) = rings.first() else {
        return;
    };
    for hole in &rings[1..] {
        if hole.len() < 4 {
            continue;
        }
        let anchored = hole
            .iter()
            .take(hole.len() - 1)
            .all(|p| ops::point_in_rings(std::slice::from_ref(exterior), *p));
        if !anchored {
            out.push(GeometryFinding::new(
                "hole lies outside its exterior ring",
                &Geometry::Polygon(vec![exterior.clone(), hole.clone()]),
            ));
        }
    }
}

/// Proper or improper crossing between two segments, excluding shared
/// endpoints, via orientation predicates.
fn segments_cross(a: Coord, b: Coord, c: Coord, d: Coord) -> bool {
    if a == c || a == d || b == c || b == d {
        return false;
    }
    let o1 = orientation(a, b, c);
    let o2 = orientation(a, b, d);
    let o3 = orientation(c, d, a);
    let o4 = orientation(c, d, b);

    if o1 != o2 && o3 != o4 && o1 != 0 && o2 != 0 && o3 != 0 && o4 != 0 {
        return true;
    }
    // collinear touch counts as crossing (the interior is shared)
    (o1 == 0 && on_segment(a, b, c))
        || (o2 == 0 && on_segment(a, b, d))
        || (o3 == 0 && on_segment(c, d, a))
        || (o4 == 0 && on_segment(c, d, b))
}

fn orientation(a: Coord, b: Coord, c: Coord) -> i8 {
    let cross = (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x);
    if cross > 0.0 {
        1
    } else if cross < 0.0 {
        -1
    } else {
        0
    }
}

fn on_segment(a: Coord, b: Coord, p: Coord) -> bool {
    p.x >= a.x.min(b.x) && p.x <= a.x.max(b.x) && p.y >= a.y.min(b.y) && p.y <= a.y.max(b.y)
}
