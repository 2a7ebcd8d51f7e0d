//! Option records for the public tile operations.
//!
//! Every record deserializes with defaults and rejects unknown fields, so a
//! caller handing in a config object gets a hard error instead of a silent
//! typo.

use tileforge_tile_utils::{CompressionStrategy, Encoding, Format};

use crate::geom::FillType;

/// Resampling kernels accepted for raster layers. The engine never decodes
/// pixels; the method is carried for the renderer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingMethod {
    Near,
    #[default]
    Bilinear,
    Bicubic,
    Spline16,
    Spline36,
    Hanning,
    Hamming,
    Hermite,
    Kaiser,
    Quadric,
    Catrom,
    Gaussian,
    Bessel,
    Mitchell,
    Sinc,
    Lanczos,
    Blackman,
}

/// Where composite work is allowed to run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadingMode {
    /// Everything on the caller's thread.
    #[default]
    Deferred,
    /// Per-source decode and per-layer encode may use a worker pool.
    Async,
    /// Implementation's choice per task.
    AsyncDeferred,
}

impl ThreadingMode {
    #[must_use]
    pub fn allows_workers(self) -> bool {
        match self {
            Self::Deferred => false,
            Self::Async | Self::AsyncDeferred => true,
        }
    }
}

/// Options for [`set_data`](crate::VectorTile::set_data) and
/// [`add_data`](crate::VectorTile::add_data).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ParseOptions {
    /// Run structural validation and fail on findings.
    pub validate: bool,
    /// Rewrite v1 layer content to satisfy v2 invariants instead of
    /// rejecting it.
    pub upgrade: bool,
}

/// Options steering the feature encoding pipeline.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EncodeOptions {
    /// Grid resolution of the produced layer.
    pub extent: u32,
    /// Douglas–Peucker tolerance in grid units; 0 disables.
    pub simplify_distance: f64,
    /// Polygon rings below this grid area are dropped.
    pub area_threshold: f64,
    /// Fail with a geometry error when an encoded polygon is not simple.
    pub strictly_simple: bool,
    /// Union overlapping multi-polygon members before encoding.
    pub multi_polygon_union: bool,
    pub fill_type: FillType,
    /// Re-derive exterior/hole classification from signed area instead of
    /// trusting source ring order.
    pub process_all_rings: bool,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            extent: 4096,
            simplify_distance: 0.0,
            area_threshold: 0.0,
            strictly_simple: false,
            multi_polygon_union: false,
            fill_type: FillType::default(),
            process_all_rings: false,
        }
    }
}

/// Options for [`add_image_layer`](crate::VectorTile::add_image_layer).
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImageOptions {
    pub image_format: Format,
    pub scaling_method: ScalingMethod,
}

impl Default for ImageOptions {
    fn default() -> Self {
        Self {
            image_format: Format::Webp,
            scaling_method: ScalingMethod::default(),
        }
    }
}

/// Options for [`composite`](crate::VectorTile::composite).
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompositeOptions {
    pub scale_factor: f64,
    pub offset_x: f64,
    pub offset_y: f64,
    pub area_threshold: f64,
    pub strictly_simple: bool,
    pub multi_polygon_union: bool,
    pub fill_type: FillType,
    pub scale_denominator: f64,
    /// Force the re-encode path even when a byte splice would do.
    pub reencode: bool,
    /// Mercator clip extent overriding the target's buffered extent.
    pub max_extent: Option<[f64; 4]>,
    /// Douglas–Peucker tolerance in grid units; 0 disables.
    pub simplify_distance: f64,
    pub process_all_rings: bool,
    pub image_format: Format,
    pub scaling_method: ScalingMethod,
    pub threading_mode: ThreadingMode,
}

impl Default for CompositeOptions {
    fn default() -> Self {
        Self {
            scale_factor: 1.0,
            offset_x: 0.0,
            offset_y: 0.0,
            area_threshold: 0.0,
            strictly_simple: false,
            multi_polygon_union: false,
            fill_type: FillType::default(),
            scale_denominator: 0.0,
            reencode: false,
            max_extent: None,
            simplify_distance: 0.0,
            process_all_rings: false,
            image_format: Format::Webp,
            scaling_method: ScalingMethod::default(),
            threading_mode: ThreadingMode::default(),
        }
    }
}

impl CompositeOptions {
    /// Encode options for the re-encode path.
    #[must_use]
    pub fn encode_options(&self, extent: u32) -> EncodeOptions {
        EncodeOptions {
            extent,
            simplify_distance: self.simplify_distance,
            area_threshold: self.area_threshold,
            strictly_simple: self.strictly_simple,
            multi_polygon_union: self.multi_polygon_union,
            fill_type: self.fill_type,
            process_all_rings: self.process_all_rings,
        }
    }
}

/// Options for [`get_data`](crate::VectorTile::get_data).
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GetDataOptions {
    /// Output framing; `Uncompressed` returns the buffer as-is.
    pub compression: Encoding,
    /// Empty the tile's buffer after handing it out.
    pub release: bool,
    /// Deflate level, `0..=9`.
    pub level: u32,
    pub strategy: CompressionStrategy,
}

impl Default for GetDataOptions {
    fn default() -> Self {
        Self {
            compression: Encoding::Uncompressed,
            release: false,
            level: 6,
            strategy: CompressionStrategy::default(),
        }
    }
}

/// Options for [`query`](crate::VectorTile::query).
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueryOptions {
    /// Match distance in mercator meters; ignored for polygons.
    pub tolerance: f64,
    /// Restrict the query to one layer.
    pub layer: Option<String>,
}

/// Options for [`query_many`](crate::VectorTile::query_many).
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueryManyOptions {
    /// Match distance in mercator meters; ignored for polygons.
    pub tolerance: f64,
    /// Attribute names to return; empty requests all layer fields.
    pub fields: Vec<String>,
}

/// Options for [`to_json`](crate::VectorTile::to_json).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToJsonOptions {
    /// Decode command streams into coordinate arrays.
    pub decode_geometry: bool,
}

/// Which layers [`to_geojson`](crate::VectorTile::to_geojson) exports.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LayerSelector {
    /// One merged feature collection.
    All,
    /// A JSON array with one feature collection per layer.
    Array,
    Name(String),
    Index(usize),
}

impl LayerSelector {
    /// `"__all__"` and `"__array__"` select every layer, anything else is a
    /// layer name.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value {
            "__all__" => Self::All,
            "__array__" => Self::Array,
            name => Self::Name(name.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_fields_are_rejected() {
        let err = serde_json::from_str::<CompositeOptions>(r#"{"reencode":true,"bogus":1}"#);
        assert!(err.is_err());
        let ok = serde_json::from_str::<CompositeOptions>(r#"{"reencode":true}"#)
            .expect("known fields deserialize");
        assert!(ok.reencode);
        assert_eq!(ok.scale_factor, 1.0);
    }

    #[test]
    fn enums_use_snake_case() {
        let options: ImageOptions =
            serde_json::from_str(r#"{"image_format":"jpeg","scaling_method":"lanczos"}"#)
                .expect("deserializes");
        assert_eq!(options.image_format, Format::Jpeg);
        assert_eq!(options.scaling_method, ScalingMethod::Lanczos);

        assert!(serde_json::from_str::<ImageOptions>(r#"{"scaling_method":"sharpen"}"#).is_err());
    }

    #[test]
    fn threading_mode_workers() {
        assert!(!ThreadingMode::Deferred.allows_workers());
        assert!(ThreadingMode::Async.allows_workers());
        assert!(ThreadingMode::AsyncDeferred.allows_workers());
    }

    #[test]
    fn selector_parse() {
        assert_eq!(LayerSelector::parse("__all__"), LayerSelector::All);
        assert_eq!(LayerSelector::parse("__array__"), LayerSelector::Array);
        assert_eq!(
            LayerSelector::parse("water"),
            LayerSelector::Name("water".to_string())
        );
    }
}
