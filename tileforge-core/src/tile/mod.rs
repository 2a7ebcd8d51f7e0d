//! The tile model: identity, encoded buffer, and derived indexes.

use std::collections::BTreeSet;
use std::fmt::{Debug, Display, Formatter};

use tileforge_tile_utils::{
    DeflateOptions, Encoding, TileCoord, TileInfo, decode_gzip, decode_zlib, encode_gzip,
    encode_zlib,
};

use crate::error::{TileForgeError, TileForgeResult};
use crate::geom::Rect;
use crate::mvt::tile as mvt_tile;
use crate::options::{GetDataOptions, ParseOptions};
use crate::pbf::{self, LayerSlice};

pub mod codec;
mod composite;
mod export;
mod geojson;
mod image;
mod query;
mod validate;

pub use codec::{DecodedFeature, EncodeContext, GridTransform, LayerEncoder};
pub use query::{QueryHit, QueryManyFeature, QueryManyHit, QueryManyResult};
pub use validate::{LayerReport, TileIssue, TileReport, ValidityFinding};

pub const DEFAULT_TILE_SIZE: u32 = 4096;
pub const DEFAULT_BUFFER_SIZE: i32 = 128;

/// An addressed vector tile holding its encoded MVT buffer.
///
/// The buffer always is a valid concatenation of layer messages; mutations
/// either append complete layers or replace the buffer wholesale, and every
/// mutation keeps the per-layer byte index in sync.
#[derive(Clone)]
pub struct VectorTile {
    coord: TileCoord,
    tile_size: u32,
    buffer_size: i32,
    buffer: Vec<u8>,
    layer_index: Vec<LayerSlice>,
    painted: BTreeSet<String>,
    empty: BTreeSet<String>,
}

impl Debug for VectorTile {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorTile")
            .field("coord", &self.coord)
            .field("tile_size", &self.tile_size)
            .field("buffer_size", &self.buffer_size)
            .field("bytes", &self.buffer.len())
            .field("layers", &self.names())
            .finish()
    }
}

impl Display for VectorTile {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "tile {:#}", self.coord)
    }
}

impl VectorTile {
    /// Creates an empty tile at `z/x/y` with the default grid and buffer.
    pub fn new(z: u8, x: u32, y: u32) -> TileForgeResult<Self> {
        Self::with_options(z, x, y, DEFAULT_TILE_SIZE, DEFAULT_BUFFER_SIZE)
    }

    /// Creates an empty tile with explicit dimensions.
    pub fn with_options(
        z: u8,
        x: u32,
        y: u32,
        tile_size: u32,
        buffer_size: i32,
    ) -> TileForgeResult<Self> {
        let coord = TileCoord::new_checked(z, x, y).ok_or_else(|| {
            TileForgeError::InvalidArgument(format!("tile index {z}/{x}/{y} is out of range"))
        })?;
        check_dimensions(tile_size, buffer_size)?;
        Ok(Self {
            coord,
            tile_size,
            buffer_size,
            buffer: Vec::new(),
            layer_index: Vec::new(),
            painted: BTreeSet::new(),
            empty: BTreeSet::new(),
        })
    }

    #[must_use]
    pub fn coord(&self) -> TileCoord {
        self.coord
    }

    #[must_use]
    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    pub fn set_tile_size(&mut self, tile_size: u32) -> TileForgeResult<()> {
        check_dimensions(tile_size, self.buffer_size)?;
        self.tile_size = tile_size;
        Ok(())
    }

    #[must_use]
    pub fn buffer_size(&self) -> i32 {
        self.buffer_size
    }

    pub fn set_buffer_size(&mut self, buffer_size: i32) -> TileForgeResult<()> {
        check_dimensions(self.tile_size, buffer_size)?;
        self.buffer_size = buffer_size;
        Ok(())
    }

    /// Mercator extent `[minx, miny, maxx, maxy]`.
    #[must_use]
    pub fn extent(&self) -> [f64; 4] {
        self.coord.extent()
    }

    /// Mercator extent including the buffer margin.
    #[must_use]
    pub fn buffered_extent(&self) -> [f64; 4] {
        self.coord.buffered_extent(self.tile_size, self.buffer_size)
    }

    /// Layer names in buffer order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.layer_index.iter().map(|e| e.name.as_str()).collect()
    }

    /// True when the buffer holds no layers.
    #[must_use]
    pub fn empty(&self) -> bool {
        self.layer_index.is_empty()
    }

    /// Layers that were offered data, whether or not features survived.
    #[must_use]
    pub fn painted_layers(&self) -> &BTreeSet<String> {
        &self.painted
    }

    /// True when any layer was offered data.
    #[must_use]
    pub fn painted(&self) -> bool {
        !self.painted.is_empty()
    }

    /// Layers whose encoded body ended up with zero features.
    #[must_use]
    pub fn empty_layers(&self) -> &BTreeSet<String> {
        &self.empty
    }

    /// The encoded buffer as-is.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.buffer
    }

    /// Replaces the buffer wholesale. The previous content and indexes are
    /// dropped; on error the tile is unchanged.
    pub fn set_data(&mut self, bytes: &[u8], options: ParseOptions) -> TileForgeResult<()> {
        let staged = Staged::ingest(bytes, options)?;
        self.buffer = staged.buffer;
        self.layer_index = staged.layers;
        self.painted = self.layer_index.iter().map(|e| e.name.clone()).collect();
        self.empty = self
            .layer_index
            .iter()
            .filter(|e| e.feature_count == 0)
            .map(|e| e.name.clone())
            .collect();
        Ok(())
    }

    /// Appends the layers of an encoded tile. Layers whose name is already
    /// present are skipped (first-writer-wins); on error the tile is
    /// unchanged.
    pub fn add_data(&mut self, bytes: &[u8], options: ParseOptions) -> TileForgeResult<()> {
        let staged = Staged::ingest(bytes, options)?;
        let offset = self.buffer.len();
        let mut appended = 0_usize;
        for slice in staged.layers {
            self.painted.insert(slice.name.clone());
            if self.layer_index.iter().any(|e| e.name == slice.name) {
                tracing::debug!(layer = %slice.name, "layer name conflict, keeping existing");
                continue;
            }
            if slice.feature_count == 0 {
                self.empty.insert(slice.name.clone());
            }
            let bytes = &staged.buffer[slice.range.clone()];
            let at = offset + appended;
            self.buffer.extend_from_slice(bytes);
            self.layer_index.push(LayerSlice {
                name: slice.name,
                version: slice.version,
                feature_count: slice.feature_count,
                range: at..at + bytes.len(),
                body: at + (slice.body.start - slice.range.start)
                    ..at + (slice.body.end - slice.range.start),
            });
            appended += bytes.len();
        }
        Ok(())
    }

    /// Hands out the encoded buffer, optionally compressed.
    pub fn get_data(&mut self, options: GetDataOptions) -> TileForgeResult<Vec<u8>> {
        let deflate = DeflateOptions::new_checked(options.level, options.strategy)
            .ok_or_else(|| {
                TileForgeError::InvalidArgument(format!(
                    "compression level {} is out of range 0..=9",
                    options.level
                ))
            })?;
        let out = match options.compression {
            Encoding::Uncompressed | Encoding::Internal => self.buffer.clone(),
            Encoding::Gzip => encode_gzip(&self.buffer, deflate)?,
            Encoding::Zlib => encode_zlib(&self.buffer, deflate)?,
        };
        if options.release {
            self.clear();
        }
        Ok(out)
    }

    /// Empties the buffer and all indexes; identity is preserved.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.layer_index.clear();
        self.painted.clear();
        self.empty.clear();
    }

    /// Extracts a single layer into a new tile sharing this identity.
    pub fn layer(&self, name: &str) -> TileForgeResult<Self> {
        let slice = self
            .layer_index
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| {
                TileForgeError::InvalidArgument(format!("tile has no layer named {name:?}"))
            })?;
        let mut out = Self::with_options(
            self.coord.z,
            self.coord.x,
            self.coord.y,
            self.tile_size,
            self.buffer_size,
        )?;
        let bytes = &self.buffer[slice.range.clone()];
        out.buffer = bytes.to_vec();
        out.layer_index = vec![LayerSlice {
            name: slice.name.clone(),
            version: slice.version,
            feature_count: slice.feature_count,
            range: 0..bytes.len(),
            body: slice.body.start - slice.range.start..slice.body.end - slice.range.start,
        }];
        out.painted.insert(slice.name.clone());
        if slice.feature_count == 0 {
            out.empty.insert(slice.name.clone());
        }
        Ok(out)
    }

    /// Mercator rect of the tile.
    pub(crate) fn extent_rect(&self) -> Rect {
        Rect::from_bbox(self.extent())
    }

    /// Mercator rect including the buffer margin.
    pub(crate) fn buffered_rect(&self) -> Rect {
        Rect::from_bbox(self.buffered_extent())
    }

    pub(crate) fn layer_slices(&self) -> &[LayerSlice] {
        &self.layer_index
    }

    /// Decodes the layer message at `index` of the layer index.
    pub(crate) fn layer_message(&self, index: usize) -> TileForgeResult<mvt_tile::Layer> {
        let slice = self.layer_index.get(index).ok_or_else(|| {
            TileForgeError::InvalidArgument(format!("layer index {index} out of range"))
        })?;
        codec::decode_layer(&self.buffer[slice.body.clone()])
    }

    /// Decoded features of the named layer together with its message, for
    /// render hand-off and queries.
    pub fn layer_features(
        &self,
        name: &str,
    ) -> TileForgeResult<(mvt_tile::Layer, Vec<DecodedFeature>)> {
        let index = self
            .layer_index
            .iter()
            .position(|e| e.name == name)
            .ok_or_else(|| {
                TileForgeError::InvalidArgument(format!("tile has no layer named {name:?}"))
            })?;
        let layer = self.layer_message(index)?;
        let features = codec::decode_features(&layer)?;
        Ok((layer, features))
    }

    /// Appends a freshly encoded layer and updates the indexes. A `None`
    /// layer records the name as painted-but-empty.
    pub(crate) fn commit_layer(&mut self, name: &str, layer: Option<mvt_tile::Layer>) {
        self.painted.insert(name.to_string());
        let Some(layer) = layer else {
            self.empty.insert(name.to_string());
            return;
        };
        let body = codec::encode_layer(&layer);
        let start = self.buffer.len();
        pbf::append_raw_layer(&mut self.buffer, &body);
        let end = self.buffer.len();
        self.layer_index.push(LayerSlice {
            name: name.to_string(),
            version: layer.version,
            feature_count: layer.features.len() as u32,
            range: start..end,
            body: end - body.len()..end,
        });
    }
}

fn check_dimensions(tile_size: u32, buffer_size: i32) -> TileForgeResult<()> {
    if tile_size == 0 {
        return Err(TileForgeError::InvalidArgument(
            "tile_size must be positive".to_string(),
        ));
    }
    if i64::from(tile_size) + 2 * i64::from(buffer_size) <= 0 {
        return Err(TileForgeError::InvalidArgument(format!(
            "tile_size {tile_size} plus twice buffer_size {buffer_size} must be positive"
        )));
    }
    Ok(())
}

/// Parsed-and-verified incoming tile data, not yet committed to a tile.
struct Staged {
    buffer: Vec<u8>,
    layers: Vec<LayerSlice>,
}

impl Staged {
    /// Decompresses, scans, optionally validates and upgrades raw bytes.
    fn ingest(bytes: &[u8], options: ParseOptions) -> TileForgeResult<Self> {
        let buffer = match TileInfo::detect(bytes) {
            Some(TileInfo { encoding: Encoding::Gzip, .. }) => decode_gzip(bytes)?,
            Some(TileInfo { encoding: Encoding::Zlib, .. }) => decode_zlib(bytes)?,
            _ => bytes.to_vec(),
        };

        let scan = pbf::scan_tile(&buffer)?;
        let mut staged = Self { buffer, layers: scan.layers };

        if options.upgrade && staged.layers.iter().any(|l| l.version == 1) {
            staged = staged.upgraded()?;
        }
        if options.validate {
            staged.validate()?;
        }
        Ok(staged)
    }

    /// Rebuilds the buffer with every v1 layer rewritten to v2.
    fn upgraded(self) -> TileForgeResult<Self> {
        let mut buffer = Vec::with_capacity(self.buffer.len());
        let mut layers = Vec::with_capacity(self.layers.len());
        for slice in &self.layers {
            let start = buffer.len();
            if slice.version == 1 {
                let mut layer = codec::decode_layer(&self.buffer[slice.body.clone()])?;
                codec::upgrade_layer(&mut layer)?;
                let body = codec::encode_layer(&layer);
                pbf::append_raw_layer(&mut buffer, &body);
                let end = buffer.len();
                layers.push(LayerSlice {
                    name: slice.name.clone(),
                    version: 2,
                    feature_count: layer.features.len() as u32,
                    range: start..end,
                    body: end - body.len()..end,
                });
            } else {
                buffer.extend_from_slice(&self.buffer[slice.range.clone()]);
                let end = buffer.len();
                layers.push(LayerSlice {
                    name: slice.name.clone(),
                    version: slice.version,
                    feature_count: slice.feature_count,
                    range: start..end,
                    body: start + (slice.body.start - slice.range.start)
                        ..start + (slice.body.end - slice.range.start),
                });
            }
        }
        Ok(Self { buffer, layers })
    }

    /// Strict structural checks for `validate: true` ingest.
    fn validate(&self) -> TileForgeResult<()> {
        let mut seen = BTreeSet::new();
        for slice in &self.layers {
            if slice.version != 2 {
                return Err(TileForgeError::UnsupportedVersion(slice.version));
            }
            if !seen.insert(slice.name.as_str()) {
                return Err(TileForgeError::CorruptInput(format!(
                    "repeated layer name {:?}",
                    slice.name
                )));
            }
            let layer = codec::decode_layer(&self.buffer[slice.body.clone()])?;
            codec::decode_features(&layer)?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::geom::{Coord, Geometry};
    use crate::mvt::TileValue;
    use crate::options::EncodeOptions;

    /// Raw tile bytes holding one layer with a populated header but zero
    /// features, the shape another MVT encoder may legally emit.
    pub(crate) fn raw_zero_feature_layer(name: &str) -> Vec<u8> {
        let layer = mvt_tile::Layer {
            version: 2,
            name: name.to_string(),
            extent: Some(4096),
            ..Default::default()
        };
        let mut buffer = Vec::new();
        pbf::append_raw_layer(&mut buffer, &codec::encode_layer(&layer));
        buffer
    }

    pub(crate) fn tile_with_point_layer(name: &str) -> VectorTile {
        let mut tile = VectorTile::new(0, 0, 0).expect("valid tile");
        let ctx = EncodeContext::new(
            tile.extent_rect(),
            tile.buffered_rect(),
            EncodeOptions::default(),
        );
        let mut encoder = LayerEncoder::new(name, 4096);
        let mut geom = Geometry::Point(Coord::new(0.0, 0.0));
        geom.to_mercator();
        encoder
            .add_feature(
                &geom,
                Some(7),
                &[("kind".to_string(), TileValue::Str("poi".to_string()))],
                &ctx,
            )
            .expect("encodes");
        tile.commit_layer(name, encoder.into_layer());
        tile
    }

    #[test]
    fn new_validates_ranges() {
        assert!(VectorTile::new(1, 0, 1).is_ok());
        assert!(matches!(
            VectorTile::new(1, 2, 0),
            Err(TileForgeError::InvalidArgument(_))
        ));
        assert!(VectorTile::with_options(0, 0, 0, 0, 128).is_err());
        // negative buffers are fine while the extent stays positive
        assert!(VectorTile::with_options(0, 0, 0, 256, -100).is_ok());
        assert!(VectorTile::with_options(0, 0, 0, 256, -128).is_err());
    }

    #[test]
    fn commit_and_index() {
        let tile = tile_with_point_layer("poi");
        assert_eq!(tile.names(), ["poi"]);
        assert!(!tile.empty());
        assert!(tile.painted());
        assert!(tile.empty_layers().is_empty());

        let message = tile.layer_message(0).expect("decodes");
        assert_eq!(message.name, "poi");
        assert_eq!(message.version, 2);
        assert_eq!(message.features.len(), 1);
    }

    #[test]
    fn empty_encoder_layer_is_painted_and_empty() {
        let mut tile = VectorTile::new(0, 0, 0).expect("valid tile");
        let encoder = LayerEncoder::new("nothing", 4096);
        tile.commit_layer("nothing", encoder.into_layer());
        assert!(tile.empty());
        assert!(tile.painted());
        assert!(tile.empty_layers().contains("nothing"));
        assert_eq!(tile.names(), Vec::<&str>::new());
    }

    #[test]
    fn add_data_roundtrip_and_conflicts() {
        let a = tile_with_point_layer("alpha");
        let b = tile_with_point_layer("beta");

        let mut target = VectorTile::new(0, 0, 0).expect("valid tile");
        target
            .add_data(a.data(), ParseOptions::default())
            .expect("adds");
        target
            .add_data(b.data(), ParseOptions::default())
            .expect("adds");
        assert_eq!(target.names(), ["alpha", "beta"]);

        // same name again: first wins, bytes unchanged
        let before = target.data().to_vec();
        target
            .add_data(a.data(), ParseOptions::default())
            .expect("adds");
        assert_eq!(target.data(), before.as_slice());
        assert_eq!(target.names(), ["alpha", "beta"]);
    }

    #[test]
    fn set_data_marks_zero_feature_layers_empty() {
        let mut tile = tile_with_point_layer("old");
        tile.set_data(&raw_zero_feature_layer("hollow"), ParseOptions::default())
            .expect("sets");
        assert_eq!(tile.names(), ["hollow"]);
        assert!(tile.painted_layers().contains("hollow"));
        assert!(tile.empty_layers().contains("hollow"));

        // replacing with a populated buffer drops the stale entry
        let populated = tile_with_point_layer("poi");
        tile.set_data(populated.data(), ParseOptions::default()).expect("sets");
        assert!(tile.empty_layers().is_empty());
    }

    #[test]
    fn add_data_marks_zero_feature_layers_empty() {
        let mut tile = tile_with_point_layer("poi");
        tile.add_data(&raw_zero_feature_layer("hollow"), ParseOptions::default())
            .expect("adds");
        assert_eq!(tile.names(), ["poi", "hollow"]);
        assert!(tile.empty_layers().contains("hollow"));
        assert!(!tile.empty_layers().contains("poi"));
        // the structural definition keeps empty inside painted
        assert!(tile.empty_layers().is_subset(tile.painted_layers()));

        let extracted = tile.layer("hollow").expect("extracts");
        assert!(extracted.empty_layers().contains("hollow"));
    }

    #[test]
    fn set_data_replaces_and_validates() {
        let a = tile_with_point_layer("alpha");
        let mut tile = tile_with_point_layer("old");
        tile.set_data(a.data(), ParseOptions { validate: true, upgrade: false })
            .expect("sets");
        assert_eq!(tile.names(), ["alpha"]);

        assert!(matches!(
            tile.set_data(b"\x03\x01garbage", ParseOptions { validate: true, upgrade: false }),
            Err(TileForgeError::CorruptInput(_))
        ));
        // failed set leaves the tile unchanged
        assert_eq!(tile.names(), ["alpha"]);
    }

    #[test]
    fn gzip_input_is_detected() {
        let a = tile_with_point_layer("alpha");
        let packed = encode_gzip(a.data(), DeflateOptions::default()).expect("compresses");
        let mut tile = VectorTile::new(0, 0, 0).expect("valid tile");
        tile.set_data(&packed, ParseOptions::default()).expect("sets");
        assert_eq!(tile.names(), ["alpha"]);
        assert_eq!(tile.data(), a.data());
    }

    #[test]
    fn get_data_compression_and_release() {
        let mut tile = tile_with_point_layer("poi");
        let raw = tile.get_data(GetDataOptions::default()).expect("raw");
        assert_eq!(raw, tile.data());

        let gz = tile
            .get_data(GetDataOptions { compression: Encoding::Gzip, ..Default::default() })
            .expect("gzip");
        assert_eq!(decode_gzip(&gz).expect("decodes"), raw);

        assert!(
            tile.get_data(GetDataOptions { level: 12, ..Default::default() })
                .is_err()
        );

        let released = tile
            .get_data(GetDataOptions { release: true, ..Default::default() })
            .expect("release");
        assert_eq!(released, raw);
        assert!(tile.empty());
        assert!(tile.data().is_empty());
    }

    #[test]
    fn layer_extraction_is_byte_exact() {
        let a = tile_with_point_layer("alpha");
        let b = tile_with_point_layer("beta");
        let mut combined = VectorTile::new(0, 0, 0).expect("valid tile");
        combined.add_data(a.data(), ParseOptions::default()).expect("adds");
        combined.add_data(b.data(), ParseOptions::default()).expect("adds");

        let extracted = combined.layer("beta").expect("extracts");
        assert_eq!(extracted.names(), ["beta"]);
        assert_eq!(extracted.data(), b.data());
        assert_eq!(extracted.coord(), combined.coord());

        assert!(combined.layer("missing").is_err());
    }

    #[test]
    fn clear_preserves_identity() {
        let mut tile = tile_with_point_layer("poi");
        tile.clear();
        assert!(tile.empty());
        assert!(!tile.painted());
        assert_eq!(tile.coord(), TileCoord { z: 0, x: 0, y: 0 });
    }
}
