//! Inflate/deflate helpers for tile payloads.

use std::io::{Read as _, Write as _};

use flate2::read::{GzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};

/// The zlib compression strategies accepted on output.
///
/// The backing implementation tunes its match search from the requested
/// level only; the strategy is validated and carried so callers round-trip
/// their configuration, but it does not alter the emitted stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionStrategy {
    #[default]
    Default,
    Filtered,
    HuffmanOnly,
    Rle,
    Fixed,
}

impl CompressionStrategy {
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Some(match value.to_ascii_lowercase().as_str() {
            "default" => Self::Default,
            "filtered" => Self::Filtered,
            "huffman_only" => Self::HuffmanOnly,
            "rle" => Self::Rle,
            "fixed" => Self::Fixed,
            _ => None?,
        })
    }
}

/// Deflate parameters for [`encode_gzip`] and [`encode_zlib`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeflateOptions {
    /// Compression level, `0..=9`
    pub level: u32,
    pub strategy: CompressionStrategy,
}

impl Default for DeflateOptions {
    fn default() -> Self {
        Self {
            level: 6,
            strategy: CompressionStrategy::Default,
        }
    }
}

impl DeflateOptions {
    /// Returns `None` when `level` is outside `0..=9`.
    #[must_use]
    pub fn new_checked(level: u32, strategy: CompressionStrategy) -> Option<Self> {
        (level <= 9).then_some(Self { level, strategy })
    }

    fn flate2_level(self) -> flate2::Compression {
        flate2::Compression::new(self.level)
    }
}

pub fn decode_gzip(data: &[u8]) -> Result<Vec<u8>, std::io::Error> {
    let mut decoder = GzDecoder::new(data);
    let mut decompressed = Vec::new();
    decoder.read_to_end(&mut decompressed)?;
    Ok(decompressed)
}

pub fn encode_gzip(data: &[u8], options: DeflateOptions) -> Result<Vec<u8>, std::io::Error> {
    let mut encoder = GzEncoder::new(Vec::new(), options.flate2_level());
    encoder.write_all(data)?;
    encoder.finish()
}

pub fn decode_zlib(data: &[u8]) -> Result<Vec<u8>, std::io::Error> {
    let mut decoder = ZlibDecoder::new(data);
    let mut decompressed = Vec::new();
    decoder.read_to_end(&mut decompressed)?;
    Ok(decompressed)
}

pub fn encode_zlib(data: &[u8], options: DeflateOptions) -> Result<Vec<u8>, std::io::Error> {
    let mut encoder = ZlibEncoder::new(Vec::new(), options.flate2_level());
    encoder.write_all(data)?;
    encoder.finish()
}
