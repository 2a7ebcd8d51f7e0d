//! Minimal protocol-buffer wire support.
//!
//! Full layer messages go through `prost`; this module handles the places
//! where decoding a whole message is wasteful or impossible:
//! scanning a tile buffer for per-layer byte ranges, splicing an already
//! encoded layer into another tile without re-parsing it, and counting
//! unknown top-level fields for the validator.

use std::ops::Range;

use crate::error::{TileForgeError, TileForgeResult};

/// Field number of `Tile.layers` in the vector tile schema.
pub const TILE_LAYER_TAG: u32 = 3;
/// Field number of `Layer.name`.
const LAYER_NAME_TAG: u32 = 1;
/// Field number of `Layer.features`.
const LAYER_FEATURE_TAG: u32 = 2;
/// Field number of `Layer.version`.
const LAYER_VERSION_TAG: u32 = 15;

/// Protobuf wire types used by the vector tile schema.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WireType {
    Varint,
    Fixed64,
    LengthDelimited,
    Fixed32,
}

impl WireType {
    fn from_id(id: u64) -> Option<Self> {
        Some(match id {
            0 => Self::Varint,
            1 => Self::Fixed64,
            2 => Self::LengthDelimited,
            5 => Self::Fixed32,
            _ => None?,
        })
    }
}

fn corrupt(message: impl Into<String>) -> TileForgeError {
    TileForgeError::CorruptInput(message.into())
}

/// Non-allocating cursor over a protobuf message body.
#[derive(Debug)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    #[must_use]
    pub fn pos(&self) -> usize {
        self.pos
    }

    #[must_use]
    pub fn is_at_end(&self) -> bool {
        self.pos >= self.buf.len()
    }

    /// Reads the next field key. Returns `None` at the end of the buffer.
    pub fn next_field(&mut self) -> TileForgeResult<Option<(u32, WireType)>> {
        if self.is_at_end() {
            return Ok(None);
        }
        let key = self.varint()?;
        let wire = WireType::from_id(key & 0x7)
            .ok_or_else(|| corrupt(format!("reserved wire type {} in field key", key & 0x7)))?;
        let tag = u32::try_from(key >> 3)
            .map_err(|_| corrupt("field number does not fit in 32 bits"))?;
        if tag == 0 {
            return Err(corrupt("field number zero"));
        }
        Ok(Some((tag, wire)))
    }

    pub fn varint(&mut self) -> TileForgeResult<u64> {
        let mut value = 0_u64;
        for shift in 0..10 {
            let byte = *self
                .buf
                .get(self.pos)
                .ok_or_else(|| corrupt("truncated varint"))?;
            self.pos += 1;
            value |= u64::from(byte & 0x7f) << (shift * 7);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(corrupt("varint longer than 10 bytes"))
    }

    /// Zig-zag decoded signed varint.
    pub fn sint(&mut self) -> TileForgeResult<i64> {
        let raw = self.varint()?;
        Ok(zigzag_decode(raw))
    }

    /// Length-delimited payload, borrowed from the input.
    pub fn bytes(&mut self) -> TileForgeResult<&'a [u8]> {
        let len = self.varint()?;
        let len = usize::try_from(len).map_err(|_| corrupt("length prefix overflows usize"))?;
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| {
                corrupt(format!(
                    "length prefix {len} exceeds remaining {} bytes",
                    self.buf.len() - self.pos
                ))
            })?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub fn string(&mut self) -> TileForgeResult<&'a str> {
        std::str::from_utf8(self.bytes()?).map_err(|_| corrupt("string field is not UTF-8"))
    }

    /// Skips over a field of the given wire type.
    pub fn skip(&mut self, wire: WireType) -> TileForgeResult<()> {
        match wire {
            WireType::Varint => {
                self.varint()?;
            }
            WireType::Fixed64 => self.advance(8)?,
            WireType::LengthDelimited => {
                self.bytes()?;
            }
            WireType::Fixed32 => self.advance(4)?,
        }
        Ok(())
    }

    fn advance(&mut self, n: usize) -> TileForgeResult<()> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| corrupt("truncated fixed-width field"))?;
        self.pos = end;
        Ok(())
    }
}

#[must_use]
pub fn zigzag_decode(raw: u64) -> i64 {
    ((raw >> 1) as i64) ^ -((raw & 1) as i64)
}

/// Appends protobuf fields to an owned buffer.
#[derive(Debug, Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    pub fn varint(&mut self, mut value: u64) {
        loop {
            let byte = (value & 0x7f) as u8;
            value >>= 7;
            if value == 0 {
                self.buf.push(byte);
                return;
            }
            self.buf.push(byte | 0x80);
        }
    }

    fn key(&mut self, tag: u32, wire_id: u64) {
        self.varint(u64::from(tag) << 3 | wire_id);
    }

    /// Writes a length-delimited field.
    pub fn bytes_field(&mut self, tag: u32, payload: &[u8]) {
        self.key(tag, 2);
        self.varint(payload.len() as u64);
        self.buf.extend_from_slice(payload);
    }
}

/// Appends an already encoded layer message (body only, without the tile
/// field header) as a `Tile.layers` entry of `out`.
pub fn append_raw_layer(out: &mut Vec<u8>, layer_body: &[u8]) {
    let mut writer = Writer { buf: std::mem::take(out) };
    writer.bytes_field(TILE_LAYER_TAG, layer_body);
    *out = writer.into_inner();
}

/// One layer located inside an encoded tile buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerSlice {
    pub name: String,
    pub version: u32,
    /// Number of feature messages in the layer body.
    pub feature_count: u32,
    /// Byte range of the whole `Tile.layers` field, header included, so the
    /// slice can be spliced into another tile verbatim.
    pub range: Range<usize>,
    /// Byte range of the layer message body.
    pub body: Range<usize>,
}

/// Result of scanning a tile buffer without decoding features.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TileScan {
    pub layers: Vec<LayerSlice>,
    /// Number of top-level fields that are not part of the schema.
    pub unknown_tags: u32,
}

/// Walks the top-level fields of an encoded tile and records the byte range
/// and name of every layer.
pub fn scan_tile(buf: &[u8]) -> TileForgeResult<TileScan> {
    let mut reader = Reader::new(buf);
    let mut scan = TileScan::default();
    while let Some((tag, wire)) = reader.next_field()? {
        let field_start = field_start_before(&reader, tag, wire);
        if tag == TILE_LAYER_TAG && wire == WireType::LengthDelimited {
            let body = reader.bytes()?;
            let body_end = reader.pos();
            let body_start = body_end - body.len();
            let (name, version, feature_count) = scan_layer_header(body)?;
            scan.layers.push(LayerSlice {
                name,
                version,
                feature_count,
                range: field_start..body_end,
                body: body_start..body_end,
            });
        } else {
            scan.unknown_tags += 1;
            reader.skip(wire)?;
        }
    }
    Ok(scan)
}

/// Position of the field key that the reader just consumed.
fn field_start_before(reader: &Reader<'_>, tag: u32, wire_id: WireType) -> usize {
    let wire_id = match wire_id {
        WireType::Varint => 0_u64,
        WireType::Fixed64 => 1,
        WireType::LengthDelimited => 2,
        WireType::Fixed32 => 5,
    };
    let key = u64::from(tag) << 3 | wire_id;
    reader.pos() - varint_len(key)
}

fn varint_len(value: u64) -> usize {
    (((64 - value.max(1).leading_zeros()) + 6) / 7) as usize
}

/// Extracts name, version, and the feature count from a layer message body
/// without decoding features, keys, or values.
fn scan_layer_header(body: &[u8]) -> TileForgeResult<(String, u32, u32)> {
    let mut reader = Reader::new(body);
    let mut name = None;
    let mut version = 1_u32;
    let mut feature_count = 0_u32;
    while let Some((tag, wire)) = reader.next_field()? {
        match (tag, wire) {
            (LAYER_NAME_TAG, WireType::LengthDelimited) => {
                name = Some(reader.string()?.to_string());
            }
            (LAYER_FEATURE_TAG, WireType::LengthDelimited) => {
                feature_count += 1;
                reader.skip(wire)?;
            }
            (LAYER_VERSION_TAG, WireType::Varint) => {
                version = u32::try_from(reader.varint()?)
                    .map_err(|_| corrupt("layer version does not fit in 32 bits"))?;
            }
            (_, wire) => reader.skip(wire)?,
        }
    }
    let name = name.ok_or_else(|| corrupt("layer without a name field"))?;
    Ok((name, version, feature_count))
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn layer_body(name: &str, version: u32, feature_count: u32) -> Vec<u8> {
        let mut writer = Writer::new();
        writer.bytes_field(LAYER_NAME_TAG, name.as_bytes());
        writer.key(LAYER_VERSION_TAG, 0);
        writer.varint(u64::from(version));
        for _ in 0..feature_count {
            // feature message with id = 1; the scanner must not decode it
            writer.bytes_field(LAYER_FEATURE_TAG, &[0x08, 0x01]);
        }
        writer.into_inner()
    }

    #[test]
    fn varint_roundtrip() {
        for value in [0_u64, 1, 127, 128, 300, u64::from(u32::MAX), u64::MAX] {
            let mut writer = Writer::new();
            writer.varint(value);
            let bytes = writer.into_inner();
            assert_eq!(Reader::new(&bytes).varint().expect("decodes"), value);
            assert_eq!(varint_len(value), bytes.len());
        }
    }

    #[rstest]
    #[case(0, 0)]
    #[case(1, -1)]
    #[case(2, 1)]
    #[case(3, -2)]
    #[case(4294967294, 2147483647)]
    #[case(4294967295, -2147483648)]
    fn zigzag(#[case] raw: u64, #[case] value: i64) {
        assert_eq!(zigzag_decode(raw), value);
    }

    #[test]
    fn truncated_varint_is_corrupt() {
        let mut reader = Reader::new(&[0x80, 0x80]);
        assert!(matches!(
            reader.varint(),
            Err(crate::error::TileForgeError::CorruptInput(_))
        ));
    }

    #[test]
    fn oversized_length_prefix_is_corrupt() {
        // field 1, wire 2, declared length 200 with only 2 bytes following
        let mut reader = Reader::new(&[0x0a, 0xc8, 0x01, 0x00, 0x00]);
        let (tag, wire) = reader.next_field().expect("key").expect("field");
        assert_eq!((tag, wire), (1, WireType::LengthDelimited));
        assert!(reader.bytes().is_err());
    }

    #[test]
    fn scan_finds_layers_and_counts_unknown_tags() {
        let mut buf = Vec::new();
        append_raw_layer(&mut buf, &layer_body("water", 2, 3));
        // unknown top-level varint field
        let mut writer = Writer::new();
        writer.key(9, 0);
        writer.varint(7);
        buf.extend_from_slice(&writer.into_inner());
        append_raw_layer(&mut buf, &layer_body("roads", 2, 0));

        let scan = scan_tile(&buf).expect("scans");
        assert_eq!(scan.unknown_tags, 1);
        assert_eq!(scan.layers.len(), 2);
        assert_eq!(scan.layers[0].name, "water");
        assert_eq!(scan.layers[0].feature_count, 3);
        assert_eq!(scan.layers[1].name, "roads");
        assert_eq!(scan.layers[1].feature_count, 0);
        assert_eq!(scan.layers[0].range.start, 0);

        // splicing the recorded range reproduces the layer bit-exact
        let spliced = &buf[scan.layers[1].range.clone()];
        let mut expected = Vec::new();
        append_raw_layer(&mut expected, &layer_body("roads", 2, 0));
        assert_eq!(spliced, expected.as_slice());
    }

    #[test]
    fn scan_rejects_nameless_layer() {
        let mut body = Writer::new();
        body.key(LAYER_VERSION_TAG, 0);
        body.varint(2);
        let mut buf = Vec::new();
        append_raw_layer(&mut buf, &body.into_inner());
        assert!(scan_tile(&buf).is_err());
    }

    #[test]
    fn empty_buffer_scans_empty() {
        let scan = scan_tile(&[]).expect("scans");
        assert!(scan.layers.is_empty());
        assert_eq!(scan.unknown_tags, 0);
    }
}
