//! Web-Mercator tile math and tile data detection.
//!
//! This crate holds the pieces of the tileforge engine that do not need to
//! understand tile content: the WGS84 ↔ Web-Mercator projection, tile
//! addressing in the XYZ pyramid, mercator extents (plain and buffered), and
//! detection of the framing of raw tile buffers (gzip, zlib, or one of the
//! supported raster formats).

use std::f64::consts::PI;
use std::fmt::{Display, Formatter, Result};

mod compress;
pub use compress::{
    CompressionStrategy, DeflateOptions, decode_gzip, decode_zlib, encode_gzip, encode_zlib,
};

/// circumference of the earth in meters
pub const EARTH_CIRCUMFERENCE: f64 = 40_075_016.685_578_5;

/// radius of the earth in meters
pub const EARTH_RADIUS: f64 = EARTH_CIRCUMFERENCE / 2.0 / PI;

/// half the mercator plane, i.e. the absolute coordinate of its edges
pub const MERCATOR_BOUND: f64 = EARTH_CIRCUMFERENCE / 2.0;

pub const MAX_ZOOM: u8 = 30;

/// Address of a tile in the Web-Mercator XYZ pyramid.
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq)]
pub struct TileCoord {
    pub z: u8,
    pub x: u32,
    pub y: u32,
}

impl Display for TileCoord {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        if f.alternate() {
            write!(f, "{}/{}/{}", self.z, self.x, self.y)
        } else {
            write!(f, "{},{},{}", self.z, self.x, self.y)
        }
    }
}

impl TileCoord {
    /// Checks provided coordinates for validity
    /// before constructing a [`TileCoord`] instance.
    #[must_use]
    pub fn new_checked(z: u8, x: u32, y: u32) -> Option<TileCoord> {
        Self::is_possible_on_zoom_level(z, x, y).then_some(Self { z, x, y })
    }

    /// Checks that zoom `z` is plausibly small and `x`/`y` can exist on said zoom level.
    #[must_use]
    pub fn is_possible_on_zoom_level(z: u8, x: u32, y: u32) -> bool {
        if z > MAX_ZOOM {
            return false;
        }

        let side_len = 1_u32 << z;
        x < side_len && y < side_len
    }

    /// Mercator extent of this tile as `[minx, miny, maxx, maxy]`.
    ///
    /// The XYZ scheme counts rows from the top, so `y = 0` is the
    /// northernmost row.
    #[must_use]
    pub fn extent(&self) -> [f64; 4] {
        let side = f64::from(1_u32 << self.z);
        let span = EARTH_CIRCUMFERENCE / side;
        let minx = -MERCATOR_BOUND + f64::from(self.x) * span;
        let maxy = MERCATOR_BOUND - f64::from(self.y) * span;
        [minx, maxy - span, minx + span, maxy]
    }

    /// Mercator extent grown by `buffer_size` grid pixels on every side.
    ///
    /// The buffer is expressed in the same pixel grid as `tile_size`, so a
    /// 4096 tile with a 128 buffer extends 1/32 of the tile span outward.
    #[must_use]
    pub fn buffered_extent(&self, tile_size: u32, buffer_size: i32) -> [f64; 4] {
        let [minx, miny, maxx, maxy] = self.extent();
        let margin = (maxx - minx) * f64::from(buffer_size) / f64::from(tile_size);
        [minx - margin, miny - margin, maxx + margin, maxy + margin]
    }
}

/// Content format of a tile payload.
///
/// `Mvt` is the only format the engine decodes; raster formats are carried
/// as opaque byte buffers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Jpeg,
    Mvt,
    Png,
    Tiff,
    Webp,
}

impl Format {
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Some(match value.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Self::Jpeg,
            "pbf" | "mvt" => Self::Mvt,
            "png" => Self::Png,
            "tif" | "tiff" => Self::Tiff,
            "webp" => Self::Webp,
            _ => None?,
        })
    }

    #[must_use]
    pub fn content_type(&self) -> &str {
        match *self {
            Self::Jpeg => "image/jpeg",
            Self::Mvt => "application/x-protobuf",
            Self::Png => "image/png",
            Self::Tiff => "image/tiff",
            Self::Webp => "image/webp",
        }
    }

    #[must_use]
    pub fn is_raster(self) -> bool {
        match self {
            Self::Jpeg | Self::Png | Self::Tiff | Self::Webp => true,
            Self::Mvt => false,
        }
    }
}

impl Display for Format {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        f.write_str(match *self {
            Self::Jpeg => "jpeg",
            Self::Mvt => "mvt",
            Self::Png => "png",
            Self::Tiff => "tiff",
            Self::Webp => "webp",
        })
    }
}

/// Outer framing of a tile payload.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// Data is not compressed, but it can be
    Uncompressed,
    /// Raster formats carry their own internal compression
    Internal,
    Gzip,
    Zlib,
}

impl Encoding {
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Some(match value.to_ascii_lowercase().as_str() {
            "none" => Self::Uncompressed,
            "gzip" => Self::Gzip,
            "zlib" | "deflate" => Self::Zlib,
            _ => None?,
        })
    }

    #[must_use]
    pub fn content_encoding(&self) -> Option<&str> {
        match *self {
            Self::Uncompressed | Self::Internal => None,
            Self::Gzip => Some("gzip"),
            Self::Zlib => Some("deflate"),
        }
    }

    #[must_use]
    pub fn is_encoded(self) -> bool {
        match self {
            Self::Uncompressed | Self::Internal => false,
            Self::Gzip | Self::Zlib => true,
        }
    }
}

/// Format plus framing of a raw tile buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TileInfo {
    pub format: Format,
    pub encoding: Encoding,
}

impl TileInfo {
    #[must_use]
    pub fn new(format: Format, encoding: Encoding) -> Self {
        Self { format, encoding }
    }

    /// Try to figure out the format and encoding of the raw tile data.
    ///
    /// Compressed prefixes assume MVT content; an unrecognized buffer is
    /// treated as raw MVT by callers.
    #[must_use]
    pub fn detect(value: &[u8]) -> Option<Self> {
        Some(match value {
            v if v.starts_with(b"\x1f\x8b") => Self::new(Format::Mvt, Encoding::Gzip),
            v if is_zlib_header(v) => Self::new(Format::Mvt, Encoding::Zlib),
            v if v.starts_with(b"\x89\x50\x4E\x47\x0D\x0A\x1A\x0A") => {
                Self::new(Format::Png, Encoding::Internal)
            }
            v if v.starts_with(b"\xFF\xD8\xFF") => Self::new(Format::Jpeg, Encoding::Internal),
            v if v.starts_with(b"II\x2A\x00") || v.starts_with(b"MM\x00\x2A") => {
                Self::new(Format::Tiff, Encoding::Internal)
            }
            v if v.starts_with(b"RIFF") && v.len() > 8 && v[8..].starts_with(b"WEBP") => {
                Self::new(Format::Webp, Encoding::Internal)
            }
            _ => None?,
        })
    }

    #[must_use]
    pub fn encoding(self, encoding: Encoding) -> Self {
        Self { encoding, ..self }
    }
}

impl Display for TileInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(f, "{}", self.format.content_type())?;
        if let Some(encoding) = self.encoding.content_encoding() {
            write!(f, "; encoding={encoding}")?;
        }
        Ok(())
    }
}

/// A zlib stream starts with `0x78` and a flag byte whose check bits make
/// the first two bytes divisible by 31.
fn is_zlib_header(value: &[u8]) -> bool {
    match value {
        [0x78, flg, ..] => (0x78_u32 * 256 + u32::from(*flg)) % 31 == 0,
        _ => false,
    }
}

/// transform [WGS84](https://epsg.io/4326) to [`WebMercator`](https://epsg.io/3857)
#[must_use]
pub fn wgs84_to_webmercator(lon: f64, lat: f64) -> (f64, f64) {
    let x = lon * PI / 180.0 * EARTH_RADIUS;

    let y_sin = lat.to_radians().sin();
    let y = EARTH_RADIUS / 2.0 * ((1.0 + y_sin) / (1.0 - y_sin)).ln();

    (x, y)
}

/// transform [`WebMercator`](https://epsg.io/3857) to [WGS84](https://epsg.io/4326)
#[must_use]
pub fn webmercator_to_wgs84(x: f64, y: f64) -> (f64, f64) {
    let lng = (x / EARTH_RADIUS).to_degrees();
    let lat = f64::atan(f64::sinh(y / EARTH_RADIUS)).to_degrees();
    (lng, lat)
}
