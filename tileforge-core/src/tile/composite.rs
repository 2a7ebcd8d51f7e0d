//! Merging source tiles into a target tile.

use rayon::prelude::*;

use crate::error::{TileForgeError, TileForgeResult};
use crate::geom::{Coord, Rect};
use crate::mvt::tile;
use crate::options::CompositeOptions;
use crate::tile::codec::{self, EncodeContext, LayerEncoder};
use crate::tile::VectorTile;

impl VectorTile {
    /// Merges the layers of `sources` into this tile.
    ///
    /// When no re-encoding is needed (same tile address and scale, no
    /// overrides), source layers are spliced in as raw bytes. Otherwise
    /// every source layer is decoded, reprojected into this tile's grid and
    /// re-encoded with `options`.
    ///
    /// Layer order is deterministic: existing layers first, then each
    /// source's layers in order. Name conflicts keep the first writer. On
    /// error the target is unchanged.
    pub fn composite(
        &mut self,
        sources: &[&VectorTile],
        options: &CompositeOptions,
    ) -> TileForgeResult<()> {
        check_options(options)?;
        if sources.is_empty() {
            return Ok(());
        }
        if self.can_splice(sources, options) {
            self.composite_splice(sources);
            Ok(())
        } else {
            self.composite_reencode(sources, options)
        }
    }

    fn can_splice(&self, sources: &[&VectorTile], options: &CompositeOptions) -> bool {
        !options.reencode
            && options.scale_factor == 1.0
            && options.offset_x == 0.0
            && options.offset_y == 0.0
            && options.max_extent.is_none()
            && sources
                .iter()
                .all(|s| s.coord() == self.coord() && s.tile_size() == self.tile_size())
    }

    /// Fast path: raw byte copy of every non-conflicting source layer.
    fn composite_splice(&mut self, sources: &[&VectorTile]) {
        let mut taken: Vec<String> = self.names().iter().map(ToString::to_string).collect();
        let mut additions: Vec<(crate::pbf::LayerSlice, Vec<u8>)> = Vec::new();
        for source in sources {
            for slice in source.layer_slices() {
                self.painted.insert(slice.name.clone());
                if taken.iter().any(|name| *name == slice.name) {
                    tracing::debug!(layer = %slice.name, "composite conflict, keeping target");
                    continue;
                }
                taken.push(slice.name.clone());
                additions.push((slice.clone(), source.data()[slice.range.clone()].to_vec()));
            }
        }
        for (slice, bytes) in additions {
            if slice.feature_count == 0 {
                self.empty.insert(slice.name.clone());
            }
            let start = self.buffer.len();
            self.buffer.extend_from_slice(&bytes);
            let end = self.buffer.len();
            self.layer_index.push(crate::pbf::LayerSlice {
                name: slice.name,
                version: slice.version,
                feature_count: slice.feature_count,
                range: start..end,
                body: start + (slice.body.start - slice.range.start)..end,
            });
        }
    }

    /// Slow path: decode, reproject, and re-encode every source layer.
    fn composite_reencode(
        &mut self,
        sources: &[&VectorTile],
        options: &CompositeOptions,
    ) -> TileForgeResult<()> {
        let clip = options.max_extent.map_or_else(|| self.buffered_rect(), Rect::from_bbox);

        // plan jobs up front so conflicts resolve deterministically; painted
        // is only touched after every job has succeeded
        let mut taken: Vec<String> = self.names().iter().map(ToString::to_string).collect();
        let mut conflicts: Vec<String> = Vec::new();
        let mut jobs: Vec<LayerJob<'_>> = Vec::new();
        for (source_index, source) in sources.iter().enumerate() {
            for (layer_index, slice) in source.layer_slices().iter().enumerate() {
                if taken.iter().any(|name| *name == slice.name) {
                    conflicts.push(slice.name.clone());
                    continue;
                }
                taken.push(slice.name.clone());
                jobs.push(LayerJob {
                    source,
                    source_index,
                    layer_index,
                    name: slice.name.clone(),
                });
            }
        }

        let target_rect = self.extent_rect();
        let run = |job: &LayerJob<'_>| -> TileForgeResult<(String, Option<tile::Layer>)> {
            reencode_layer(job, target_rect, clip, options)
                .map_err(|e| e.for_composite_source(job.source_index))
        };
        let staged: Vec<(String, Option<tile::Layer>)> = if options.threading_mode.allows_workers()
        {
            jobs.par_iter().map(run).collect::<TileForgeResult<_>>()?
        } else {
            jobs.iter().map(run).collect::<TileForgeResult<_>>()?
        };

        for name in conflicts {
            self.painted.insert(name);
        }
        for (name, layer) in staged {
            self.commit_layer(&name, layer);
        }
        Ok(())
    }
}

struct LayerJob<'a> {
    source: &'a VectorTile,
    source_index: usize,
    layer_index: usize,
    name: String,
}

/// Re-encodes one source layer into the target's grid.
fn reencode_layer(
    job: &LayerJob<'_>,
    target_rect: Rect,
    clip: Rect,
    options: &CompositeOptions,
) -> TileForgeResult<(String, Option<tile::Layer>)> {
    let layer = job.source.layer_message(job.layer_index)?;
    let extent = layer.extent_or_default();
    let features = codec::decode_features(&layer)?;

    let source_transform =
        codec::GridTransform::new(job.source.extent_rect(), extent);
    let ctx = EncodeContext::new(target_rect, clip, options.encode_options(extent));
    let adjust = grid_adjustment(target_rect, extent, options);

    let mut encoder = LayerEncoder::new(&job.name, extent);
    for feature in features {
        if let Some(raster) = feature.raster {
            encoder.add_raster_feature(raster, &feature.attributes);
            continue;
        }
        let mut mercator = feature.geometry;
        mercator.transform_coords(&mut |c| source_transform.to_mercator(c));
        if let Some(adjust) = &adjust {
            mercator.transform_coords(&mut |c| adjust.apply(c));
        }
        encoder.add_feature(&mercator, feature.id, &feature.attributes, &ctx)?;
    }
    Ok((job.name.clone(), encoder.into_layer()))
}

/// Mercator-space affine equivalent of scaling and shifting in the target
/// grid.
struct GridAdjustment {
    origin: Coord,
    scale: f64,
    shift: Coord,
}

impl GridAdjustment {
    fn apply(&self, c: Coord) -> Coord {
        Coord {
            x: self.origin.x + self.scale * (c.x - self.origin.x) + self.shift.x,
            y: self.origin.y + self.scale * (c.y - self.origin.y) - self.shift.y,
        }
    }
}

fn grid_adjustment(
    target_rect: Rect,
    extent: u32,
    options: &CompositeOptions,
) -> Option<GridAdjustment> {
    if options.scale_factor == 1.0 && options.offset_x == 0.0 && options.offset_y == 0.0 {
        return None;
    }
    let pixel = target_rect.width() / f64::from(extent);
    Some(GridAdjustment {
        // the grid origin is the tile's top-left corner
        origin: Coord { x: target_rect.minx, y: target_rect.maxy },
        scale: options.scale_factor,
        // grid y grows downward, mercator y upward
        shift: Coord { x: options.offset_x * pixel, y: options.offset_y * pixel },
    })
}

fn check_options(options: &CompositeOptions) -> TileForgeResult<()> {
    if !options.scale_factor.is_finite() || options.scale_factor <= 0.0 {
        return Err(TileForgeError::InvalidArgument(format!(
            "scale_factor {} must be positive",
            options.scale_factor
        )));
    }
    if !options.scale_denominator.is_finite() || options.scale_denominator < 0.0 {
        return Err(TileForgeError::InvalidArgument(format!(
            "scale_denominator {} must be non-negative",
            options.scale_denominator
        )));
    }
    if let Some([minx, miny, maxx, maxy]) = options.max_extent {
        if minx >= maxx || miny >= maxy {
            return Err(TileForgeError::InvalidArgument(
                "max_extent must be a non-empty rectangle".to_string(),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{ParseOptions, ThreadingMode};
    use crate::tile::tests::{raw_zero_feature_layer, tile_with_point_layer};

    fn geojson_tile(z: u8, x: u32, y: u32, name: &str, lon: f64, lat: f64) -> VectorTile {
        let mut tile = VectorTile::new(z, x, y).expect("valid tile");
        tile.add_geojson(
            &format!(r#"{{"type":"Point","coordinates":[{lon},{lat}]}}"#),
            name,
            crate::options::EncodeOptions::default(),
        )
        .expect("encodes");
        tile
    }

    #[test]
    fn empty_source_list_is_identity() {
        let mut tile = tile_with_point_layer("poi");
        let before = tile.data().to_vec();
        tile.composite(&[], &CompositeOptions::default()).expect("composites");
        assert_eq!(tile.data(), before.as_slice());
    }

    #[test]
    fn splice_appends_layers_in_source_order() {
        let mut target = tile_with_point_layer("alpha");
        let b = tile_with_point_layer("beta");
        let c = tile_with_point_layer("gamma");

        target.composite(&[&b, &c], &CompositeOptions::default()).expect("composites");
        assert_eq!(target.names(), ["alpha", "beta", "gamma"]);

        // spliced bytes decode back to the same layers
        let mut reread = VectorTile::new(0, 0, 0).expect("valid tile");
        reread.set_data(target.data(), ParseOptions { validate: true, upgrade: false })
            .expect("rereads");
        assert_eq!(reread.names(), ["alpha", "beta", "gamma"]);
    }

    #[test]
    fn splice_marks_zero_feature_source_layer_empty() {
        let mut source = VectorTile::new(0, 0, 0).expect("valid tile");
        source
            .add_data(&raw_zero_feature_layer("hollow"), ParseOptions::default())
            .expect("adds");

        let mut target = tile_with_point_layer("alpha");
        target.composite(&[&source], &CompositeOptions::default()).expect("composites");

        assert_eq!(target.names(), ["alpha", "hollow"]);
        assert!(target.painted_layers().contains("hollow"));
        assert!(target.empty_layers().contains("hollow"));
        assert!(!target.empty_layers().contains("alpha"));
    }

    #[test]
    fn splice_conflict_keeps_target_layer() {
        let mut target = tile_with_point_layer("alpha");
        let before = target.data().to_vec();
        let other = tile_with_point_layer("alpha");

        target.composite(&[&other], &CompositeOptions::default()).expect("composites");
        assert_eq!(target.names(), ["alpha"]);
        assert_eq!(target.data(), before.as_slice());
        assert!(target.painted_layers().contains("alpha"));
    }

    #[test]
    fn extract_and_reinsert_is_byte_exact() {
        let mut target = tile_with_point_layer("alpha");
        let b = tile_with_point_layer("beta");
        target.composite(&[&b], &CompositeOptions::default()).expect("composites");

        let extracted = target.layer("beta").expect("extracts");
        let mut fresh = VectorTile::new(0, 0, 0).expect("valid tile");
        fresh.composite(&[&extracted], &CompositeOptions::default()).expect("composites");
        assert_eq!(fresh.data(), extracted.data());
    }

    #[test]
    fn different_coords_force_reencode() {
        // the source covers the whole world, the target is a quadrant
        let source = geojson_tile(0, 0, 0, "poi", 45.0, 45.0);
        let mut target = VectorTile::new(1, 1, 0).expect("valid tile");
        target.composite(&[&source], &CompositeOptions::default()).expect("composites");

        assert_eq!(target.names(), ["poi"]);
        let hits = target
            .query(45.0, 45.0, &crate::options::QueryOptions { tolerance: 50_000.0, layer: None })
            .expect("queries");
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn reencode_drops_out_of_extent_features() {
        let source = geojson_tile(0, 0, 0, "poi", 45.0, 45.0);
        // south-western quadrant does not contain (45, 45)
        let mut target = VectorTile::new(1, 0, 1).expect("valid tile");
        target.composite(&[&source], &CompositeOptions::default()).expect("composites");
        assert!(target.empty());
        assert!(target.painted_layers().contains("poi"));
        assert!(target.empty_layers().contains("poi"));
    }

    #[test]
    fn forced_reencode_matches_splice_content() {
        let source = tile_with_point_layer("poi");
        let mut spliced = VectorTile::new(0, 0, 0).expect("valid tile");
        spliced.composite(&[&source], &CompositeOptions::default()).expect("composites");

        let mut reencoded = VectorTile::new(0, 0, 0).expect("valid tile");
        reencoded
            .composite(&[&source], &CompositeOptions { reencode: true, ..Default::default() })
            .expect("composites");

        assert_eq!(spliced.names(), reencoded.names());
        let (_, a) = spliced.layer_features("poi").expect("decodes");
        let (_, b) = reencoded.layer_features("poi").expect("decodes");
        assert_eq!(a.len(), b.len());
        assert_eq!(a[0].geometry, b[0].geometry);
    }

    #[test]
    fn threading_modes_agree() {
        let s1 = geojson_tile(0, 0, 0, "one", 10.0, 10.0);
        let s2 = geojson_tile(0, 0, 0, "two", -10.0, -10.0);

        let mut deferred = VectorTile::new(0, 0, 0).expect("valid tile");
        deferred
            .composite(
                &[&s1, &s2],
                &CompositeOptions { reencode: true, ..Default::default() },
            )
            .expect("composites");

        let mut parallel = VectorTile::new(0, 0, 0).expect("valid tile");
        parallel
            .composite(
                &[&s1, &s2],
                &CompositeOptions {
                    reencode: true,
                    threading_mode: ThreadingMode::Async,
                    ..Default::default()
                },
            )
            .expect("composites");

        assert_eq!(deferred.names(), parallel.names());
        assert_eq!(deferred.data(), parallel.data());
    }

    #[test]
    fn invalid_options_are_rejected_before_work() {
        let mut target = tile_with_point_layer("alpha");
        let before = target.data().to_vec();
        let source = tile_with_point_layer("beta");
        assert!(
            target
                .composite(
                    &[&source],
                    &CompositeOptions { scale_factor: 0.0, ..Default::default() }
                )
                .is_err()
        );
        assert_eq!(target.data(), before.as_slice());
        assert!(
            target
                .composite(
                    &[&source],
                    &CompositeOptions {
                        max_extent: Some([10.0, 0.0, -10.0, 5.0]),
                        ..Default::default()
                    }
                )
                .is_err()
        );
    }

    #[test]
    fn grid_offset_shifts_features() {
        let source = geojson_tile(0, 0, 0, "poi", 0.0, 0.0);
        let mut shifted = VectorTile::new(0, 0, 0).expect("valid tile");
        shifted
            .composite(
                &[&source],
                &CompositeOptions { offset_x: 100.0, reencode: true, ..Default::default() },
            )
            .expect("composites");

        let (_, plain) = source.layer_features("poi").expect("decodes");
        let (_, moved) = shifted.layer_features("poi").expect("decodes");
        let (crate::geom::Geometry::Point(a), crate::geom::Geometry::Point(b)) =
            (&plain[0].geometry, &moved[0].geometry)
        else {
            panic!("expected points");
        };
        assert_eq!(b.x - a.x, 100.0);
        assert_eq!(b.y, a.y);
    }
}
