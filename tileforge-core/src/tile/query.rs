//! Point and multi-point spatial queries over decoded features.

use std::collections::BTreeMap;

use tileforge_tile_utils::wgs84_to_webmercator;

use crate::error::{TileForgeError, TileForgeResult};
use crate::geom::Coord;
use crate::geom::ops::{HitDistance, hit_test};
use crate::mvt::tile;
use crate::options::{QueryManyOptions, QueryOptions};
use crate::tile::VectorTile;
use crate::tile::codec::{DecodedFeature, GridTransform, decode_features};

/// One ranked result of a single-point query.
#[derive(Debug, Clone, serde::Serialize)]
pub struct QueryHit {
    pub layer: String,
    pub feature_id: Option<u64>,
    /// Mercator meters from the query point; 0 for polygon containment.
    pub distance: f64,
    /// Mercator position of the matched vertex (or the query point for
    /// polygon hits).
    pub x_hit: f64,
    pub y_hit: f64,
    pub attributes: BTreeMap<String, serde_json::Value>,
}

/// One feature referenced from a multi-point query.
#[derive(Debug, Clone, serde::Serialize)]
pub struct QueryManyFeature {
    pub feature_id: Option<u64>,
    pub attributes: BTreeMap<String, serde_json::Value>,
}

/// One hit of one query point, referencing [`QueryManyResult::features`].
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct QueryManyHit {
    pub distance: f64,
    pub feature_idx: usize,
}

/// Result of [`VectorTile::query_many`].
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct QueryManyResult {
    /// Features hit by at least one point, keyed by their position in the
    /// layer.
    pub features: BTreeMap<usize, QueryManyFeature>,
    /// Per query-point hits, ascending by distance.
    pub hits: BTreeMap<usize, Vec<QueryManyHit>>,
}

impl VectorTile {
    /// Finds features at a WGS84 position.
    ///
    /// Results are ordered by distance descending, then layer name
    /// ascending, then feature position ascending. Polygons match only by
    /// containment; points and lines match within `tolerance` mercator
    /// meters.
    pub fn query(&self, lon: f64, lat: f64, options: &QueryOptions) -> TileForgeResult<Vec<QueryHit>> {
        check_query_point(lon, lat)?;
        check_tolerance(options.tolerance)?;
        let (qx, qy) = wgs84_to_webmercator(lon, lat);
        let query = Coord::new(qx, qy);

        let mut hits = Vec::new();
        for (index, slice) in self.layer_slices().iter().enumerate() {
            if options.layer.as_ref().is_some_and(|name| *name != slice.name) {
                continue;
            }
            let layer = self.layer_message(index)?;
            let transform = GridTransform::new(self.extent_rect(), layer.extent_or_default());
            for feature in decode_features(&layer)? {
                let Some(hit) = feature_hit(&feature, &transform, query, options.tolerance)
                else {
                    continue;
                };
                if !hit.x.is_finite() || !hit.y.is_finite() {
                    return Err(TileForgeError::Projection(format!(
                        "hit position ({}, {}) cannot be reprojected",
                        hit.x, hit.y
                    )));
                }
                hits.push(QueryHit {
                    layer: slice.name.clone(),
                    feature_id: feature.id,
                    distance: hit.distance,
                    x_hit: hit.x,
                    y_hit: hit.y,
                    attributes: project_attributes(&feature, &[]),
                });
            }
        }

        // total order: distance desc, layer asc; the stable sort keeps
        // feature position order inside full ties
        hits.sort_by(|a, b| {
            b.distance
                .partial_cmp(&a.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.layer.cmp(&b.layer))
        });
        Ok(hits)
    }

    /// Batched query of many WGS84 positions against one layer.
    ///
    /// A feature hit by several points is stored once in
    /// [`QueryManyResult::features`]; each point's hit list references it
    /// by layer position and is sorted by ascending distance.
    pub fn query_many(
        &self,
        points: &[(f64, f64)],
        layer_name: &str,
        options: &QueryManyOptions,
    ) -> TileForgeResult<QueryManyResult> {
        check_tolerance(options.tolerance)?;
        for &(lon, lat) in points {
            check_query_point(lon, lat)?;
        }
        let index = self
            .layer_slices()
            .iter()
            .position(|e| e.name == layer_name)
            .ok_or_else(|| {
                TileForgeError::InvalidArgument(format!(
                    "tile has no layer named {layer_name:?}"
                ))
            })?;
        let layer = self.layer_message(index)?;
        let transform = GridTransform::new(self.extent_rect(), layer.extent_or_default());
        let features = decode_features(&layer)?;

        let mut result = QueryManyResult::default();
        for (point_idx, &(lon, lat)) in points.iter().enumerate() {
            let (qx, qy) = wgs84_to_webmercator(lon, lat);
            let query = Coord::new(qx, qy);
            let mut point_hits = Vec::new();
            for (feature_idx, feature) in features.iter().enumerate() {
                let Some(hit) = feature_hit(feature, &transform, query, options.tolerance)
                else {
                    continue;
                };
                point_hits.push(QueryManyHit { distance: hit.distance, feature_idx });
                result.features.entry(feature_idx).or_insert_with(|| QueryManyFeature {
                    feature_id: feature.id,
                    attributes: project_attributes(feature, &options.fields),
                });
            }
            point_hits.sort_by(|a, b| {
                a.distance
                    .partial_cmp(&b.distance)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.feature_idx.cmp(&b.feature_idx))
            });
            if !point_hits.is_empty() {
                result.hits.insert(point_idx, point_hits);
            }
        }
        Ok(result)
    }
}

fn check_query_point(lon: f64, lat: f64) -> TileForgeResult<()> {
    if !lon.is_finite() || !lat.is_finite() || lon.abs() > 180.0 || lat.abs() > 90.0 {
        return Err(TileForgeError::InvalidArgument(format!(
            "query position ({lon}, {lat}) is outside WGS84 bounds"
        )));
    }
    Ok(())
}

fn check_tolerance(tolerance: f64) -> TileForgeResult<()> {
    if !tolerance.is_finite() || tolerance < 0.0 {
        return Err(TileForgeError::InvalidArgument(format!(
            "tolerance {tolerance} must be non-negative"
        )));
    }
    Ok(())
}

/// Hit-tests one feature in mercator space, applying the tolerance rules.
fn feature_hit(
    feature: &DecodedFeature,
    transform: &GridTransform,
    query: Coord,
    tolerance: f64,
) -> Option<HitDistance> {
    if feature.geometry.is_empty() {
        return None;
    }
    let mut mercator = feature.geometry.clone();
    mercator.transform_coords(&mut |c| transform.to_mercator(c));
    let hit = hit_test(&mercator, query);
    if !hit.is_hit() {
        return None;
    }
    // polygons match by containment only, tolerance is ignored
    if feature.geom_type == tile::GeomType::Polygon {
        return (hit.distance == 0.0).then_some(hit);
    }
    (hit.distance <= tolerance).then_some(hit)
}

/// Projects attributes to the requested fields; empty means all.
fn project_attributes(
    feature: &DecodedFeature,
    fields: &[String],
) -> BTreeMap<String, serde_json::Value> {
    feature
        .attributes
        .iter()
        .filter(|(key, _)| fields.is_empty() || fields.iter().any(|f| f == key))
        .map(|(key, value)| (key.clone(), value.to_json()))
        .collect()
}
