//! Layer and feature codec: command streams, grid quantization, and the
//! feature encoding pipeline.

use geo::BooleanOps as _;

use crate::error::{TileForgeError, TileForgeResult};
use crate::geom::clip::clip_geometry;
use crate::geom::simplify::simplify_geometry;
use crate::geom::validity::is_simple;
use crate::geom::{Coord, FillType, Geometry, MAX_NESTING, Rect, Ring, signed_area};
use crate::mvt::{Command, CommandInteger, Message as _, ParameterInteger, TagsBuilder, TileValue, tile};
use crate::options::EncodeOptions;

/// Mercator ↔ integer grid mapping for one layer of one tile.
///
/// The grid has its origin at the tile's top-left corner with y growing
/// downward, per the MVT convention.
#[derive(Clone, Copy, Debug)]
pub struct GridTransform {
    rect: Rect,
    extent: u32,
}

impl GridTransform {
    #[must_use]
    pub fn new(rect: Rect, extent: u32) -> Self {
        Self { rect, extent }
    }

    #[must_use]
    pub fn to_grid(&self, c: Coord) -> Coord {
        let extent = f64::from(self.extent);
        Coord {
            x: ((c.x - self.rect.minx) / self.rect.width() * extent).round(),
            y: ((self.rect.maxy - c.y) / self.rect.height() * extent).round(),
        }
    }

    #[must_use]
    pub fn to_mercator(&self, c: Coord) -> Coord {
        let extent = f64::from(self.extent);
        Coord {
            x: self.rect.minx + c.x / extent * self.rect.width(),
            y: self.rect.maxy - c.y / extent * self.rect.height(),
        }
    }
}

/// Decodes a prost layer message body.
pub fn decode_layer(body: &[u8]) -> TileForgeResult<tile::Layer> {
    tile::Layer::decode(body)
        .map_err(|e| TileForgeError::CorruptInput(format!("layer message: {e}")))
}

/// Encodes a layer message body.
#[must_use]
pub fn encode_layer(layer: &tile::Layer) -> Vec<u8> {
    layer.encode_to_vec()
}

/// A feature with its dictionary references resolved and its command
/// stream decoded into grid coordinates.
#[derive(Debug, Clone)]
pub struct DecodedFeature {
    pub id: Option<u64>,
    pub geom_type: tile::GeomType,
    /// Geometry in tile grid coordinates.
    pub geometry: Geometry,
    pub attributes: Vec<(String, TileValue)>,
    pub raster: Option<Vec<u8>>,
}

/// Resolves and decodes every feature of `layer`.
pub fn decode_features(layer: &tile::Layer) -> TileForgeResult<Vec<DecodedFeature>> {
    layer.features.iter().map(|f| decode_feature(layer, f)).collect()
}

fn decode_feature(layer: &tile::Layer, feature: &tile::Feature) -> TileForgeResult<DecodedFeature> {
    if feature.tags.len() % 2 != 0 {
        return Err(TileForgeError::CorruptInput(format!(
            "feature tag stream has odd length {}",
            feature.tags.len()
        )));
    }
    let mut attributes = Vec::with_capacity(feature.tags.len() / 2);
    for pair in feature.tags.chunks(2) {
        let key = layer.keys.get(pair[0] as usize).ok_or_else(|| {
            TileForgeError::CorruptInput(format!("key index {} out of range", pair[0]))
        })?;
        let value = layer.values.get(pair[1] as usize).ok_or_else(|| {
            TileForgeError::CorruptInput(format!("value index {} out of range", pair[1]))
        })?;
        let value = TileValue::from_message(value).ok_or_else(|| {
            TileForgeError::CorruptInput(format!("value {} carries no member", pair[1]))
        })?;
        attributes.push((key.clone(), value));
    }

    Ok(DecodedFeature {
        id: feature.id,
        geom_type: feature.r#type(),
        geometry: decode_commands(feature.r#type(), &feature.geometry)?,
        attributes,
        raster: feature.raster.clone(),
    })
}

/// Cursor over a packed command stream.
struct CommandCursor<'a> {
    stream: &'a [u32],
    pos: usize,
    pen: Coord,
}

impl CommandCursor<'_> {
    fn next_command(&mut self) -> TileForgeResult<Option<(u32, u32)>> {
        let Some(&raw) = self.stream.get(self.pos) else {
            return Ok(None);
        };
        self.pos += 1;
        let command = CommandInteger(raw);
        Ok(Some((command.id(), command.count())))
    }

    fn next_point(&mut self) -> TileForgeResult<Coord> {
        let (Some(&dx), Some(&dy)) = (self.stream.get(self.pos), self.stream.get(self.pos + 1))
        else {
            return Err(TileForgeError::CorruptInput(
                "command stream truncated mid-parameter".to_string(),
            ));
        };
        self.pos += 2;
        self.pen.x += f64::from(ParameterInteger(dx).value());
        self.pen.y += f64::from(ParameterInteger(dy).value());
        Ok(self.pen)
    }
}

/// Decodes a command stream into grid-space geometry.
pub fn decode_commands(geom_type: tile::GeomType, stream: &[u32]) -> TileForgeResult<Geometry> {
    let mut cursor = CommandCursor { stream, pos: 0, pen: Coord::default() };
    match geom_type {
        tile::GeomType::Unknown => Ok(Geometry::Empty),
        tile::GeomType::Point => decode_points(&mut cursor),
        tile::GeomType::Linestring => decode_linestrings(&mut cursor),
        tile::GeomType::Polygon => decode_polygons(&mut cursor),
    }
}

fn expect_move_to(id: u32, count: u32) -> TileForgeResult<()> {
    if id != Command::MoveTo as u32 || count != 1 {
        return Err(TileForgeError::CorruptInput(format!(
            "expected MoveTo(1), found command {id} count {count}"
        )));
    }
    Ok(())
}

fn decode_points(cursor: &mut CommandCursor<'_>) -> TileForgeResult<Geometry> {
    let Some((id, count)) = cursor.next_command()? else {
        return Ok(Geometry::Empty);
    };
    if id != Command::MoveTo as u32 {
        return Err(TileForgeError::CorruptInput(
            "point geometry must start with MoveTo".to_string(),
        ));
    }
    let mut points = Vec::with_capacity(count as usize);
    for _ in 0..count {
        points.push(cursor.next_point()?);
    }
    Ok(match points.len() {
        0 => Geometry::Empty,
        1 => Geometry::Point(points[0]),
        _ => Geometry::MultiPoint(points),
    })
}

fn decode_linestrings(cursor: &mut CommandCursor<'_>) -> TileForgeResult<Geometry> {
    let mut parts: Vec<Vec<Coord>> = Vec::new();
    while let Some((id, count)) = cursor.next_command()? {
        expect_move_to(id, count)?;
        let start = cursor.next_point()?;
        let Some((id, count)) = cursor.next_command()? else {
            return Err(TileForgeError::CorruptInput(
                "linestring ends after MoveTo".to_string(),
            ));
        };
        if id != Command::LineTo as u32 || count == 0 {
            return Err(TileForgeError::CorruptInput(
                "linestring MoveTo must be followed by a non-empty LineTo".to_string(),
            ));
        }
        let mut part = Vec::with_capacity(1 + count as usize);
        part.push(start);
        for _ in 0..count {
            part.push(cursor.next_point()?);
        }
        parts.push(part);
    }
    Ok(match parts.len() {
        0 => Geometry::Empty,
        1 => Geometry::LineString(parts.into_iter().next().unwrap_or_default()),
        _ => Geometry::MultiLineString(parts),
    })
}

fn decode_polygons(cursor: &mut CommandCursor<'_>) -> TileForgeResult<Geometry> {
    // (ring, positive area) in stream order
    let mut rings: Vec<(Ring, bool)> = Vec::new();
    while let Some((id, count)) = cursor.next_command()? {
        expect_move_to(id, count)?;
        let start = cursor.next_point()?;
        let Some((id, count)) = cursor.next_command()? else {
            return Err(TileForgeError::CorruptInput("ring ends after MoveTo".to_string()));
        };
        if id != Command::LineTo as u32 || count == 0 {
            return Err(TileForgeError::CorruptInput(
                "ring MoveTo must be followed by a non-empty LineTo".to_string(),
            ));
        }
        let mut ring = Vec::with_capacity(2 + count as usize);
        ring.push(start);
        for _ in 0..count {
            ring.push(cursor.next_point()?);
        }
        match cursor.next_command()? {
            Some((id, 1)) if id == Command::ClosePath as u32 => {}
            _ => {
                return Err(TileForgeError::CorruptInput(
                    "ring is not terminated by ClosePath(1)".to_string(),
                ));
            }
        }
        ring.push(start);
        let positive = signed_area(&ring) > 0.0;
        rings.push((ring, positive));
    }

    // positive area opens a polygon, negative attaches a hole to the last
    // one; a leading hole with no exterior is tolerated as its own polygon
    let mut polygons: Vec<Vec<Ring>> = Vec::new();
    for (ring, positive) in rings {
        if positive || polygons.is_empty() {
            polygons.push(vec![ring]);
        } else if let Some(last) = polygons.last_mut() {
            last.push(ring);
        }
    }

    Ok(match polygons.len() {
        0 => Geometry::Empty,
        1 => Geometry::Polygon(polygons.into_iter().next().unwrap_or_default()),
        _ => Geometry::MultiPolygon(polygons),
    })
}

/// Encodes grid-space geometry into a command stream.
///
/// Polygon rings must already be oriented (exterior positive, holes
/// negative); [`normalize_rings`] does that.
#[must_use]
pub fn encode_commands(geom: &Geometry) -> (tile::GeomType, Vec<u32>) {
    let mut stream = Vec::new();
    let mut pen = Coord::default();
    let geom_type = match geom {
        Geometry::Empty | Geometry::Collection(_) => tile::GeomType::Unknown,
        Geometry::Point(p) => {
            emit_move_to(&mut stream, &mut pen, std::slice::from_ref(p));
            tile::GeomType::Point
        }
        Geometry::MultiPoint(ps) => {
            emit_move_to(&mut stream, &mut pen, ps);
            tile::GeomType::Point
        }
        Geometry::LineString(ps) => {
            emit_line(&mut stream, &mut pen, ps);
            tile::GeomType::Linestring
        }
        Geometry::MultiLineString(ls) => {
            for line in ls {
                emit_line(&mut stream, &mut pen, line);
            }
            tile::GeomType::Linestring
        }
        Geometry::Polygon(rings) => {
            for ring in rings {
                emit_ring(&mut stream, &mut pen, ring);
            }
            tile::GeomType::Polygon
        }
        Geometry::MultiPolygon(polys) => {
            for rings in polys {
                for ring in rings {
                    emit_ring(&mut stream, &mut pen, ring);
                }
            }
            tile::GeomType::Polygon
        }
    };
    (geom_type, stream)
}

#[expect(clippy::cast_possible_truncation)]
fn push_delta(stream: &mut Vec<u32>, pen: &mut Coord, target: Coord) {
    let dx = (target.x - pen.x) as i32;
    let dy = (target.y - pen.y) as i32;
    stream.push(ParameterInteger::from(dx));
    stream.push(ParameterInteger::from(dy));
    pen.x += f64::from(dx);
    pen.y += f64::from(dy);
}

fn emit_move_to(stream: &mut Vec<u32>, pen: &mut Coord, points: &[Coord]) {
    if points.is_empty() {
        return;
    }
    stream.push(CommandInteger::from(Command::MoveTo, points.len() as u32));
    for &p in points {
        push_delta(stream, pen, p);
    }
}

fn emit_line(stream: &mut Vec<u32>, pen: &mut Coord, points: &[Coord]) {
    if points.len() < 2 {
        return;
    }
    stream.push(CommandInteger::from(Command::MoveTo, 1));
    push_delta(stream, pen, points[0]);
    stream.push(CommandInteger::from(Command::LineTo, points.len() as u32 - 1));
    for &p in &points[1..] {
        push_delta(stream, pen, p);
    }
}

/// Emits one closed ring, omitting the closing coordinate in favor of
/// ClosePath.
fn emit_ring(stream: &mut Vec<u32>, pen: &mut Coord, ring: &[Coord]) {
    if ring.len() < 4 {
        return;
    }
    stream.push(CommandInteger::from(Command::MoveTo, 1));
    push_delta(stream, pen, ring[0]);
    stream.push(CommandInteger::from(Command::LineTo, ring.len() as u32 - 2));
    for &p in &ring[1..ring.len() - 1] {
        push_delta(stream, pen, p);
    }
    stream.push(CommandInteger::from(Command::ClosePath, 1));
}

/// Orients polygon rings for the wire: exteriors positive, holes negative.
///
/// With `process_all_rings`, the exterior/hole split is re-derived from
/// each ring's signed area under `fill_type`; otherwise ring order is
/// trusted (first is the exterior).
#[must_use]
pub fn normalize_rings(geom: Geometry, fill_type: FillType, process_all_rings: bool) -> Geometry {
    match geom {
        Geometry::Polygon(rings) => {
            let polys = normalize_polygon(rings, fill_type, process_all_rings);
            polys_to_geometry(polys)
        }
        Geometry::MultiPolygon(members) => {
            let mut polys = Vec::new();
            for rings in members {
                polys.extend(normalize_polygon(rings, fill_type, process_all_rings));
            }
            polys_to_geometry(polys)
        }
        other => other,
    }
}

fn polys_to_geometry(mut polys: Vec<Vec<Ring>>) -> Geometry {
    match polys.len() {
        0 => Geometry::Empty,
        1 => Geometry::Polygon(polys.swap_remove(0)),
        _ => Geometry::MultiPolygon(polys),
    }
}

fn normalize_polygon(
    rings: Vec<Ring>,
    fill_type: FillType,
    process_all_rings: bool,
) -> Vec<Vec<Ring>> {
    if process_all_rings {
        let mut polygons: Vec<Vec<Ring>> = Vec::new();
        for mut ring in rings {
            if ring.len() < 4 {
                continue;
            }
            let area = signed_area(&ring);
            if area == 0.0 {
                continue;
            }
            if fill_type.is_exterior(area) {
                if area < 0.0 {
                    ring.reverse();
                }
                polygons.push(vec![ring]);
            } else {
                if area > 0.0 {
                    ring.reverse();
                }
                match polygons.last_mut() {
                    Some(poly) => poly.push(ring),
                    // hole before any exterior becomes its own polygon
                    None => {
                        ring.reverse();
                        polygons.push(vec![ring]);
                    }
                }
            }
        }
        polygons
    } else {
        let mut out = Vec::with_capacity(rings.len());
        for (i, mut ring) in rings.into_iter().enumerate() {
            if ring.len() < 4 {
                if i == 0 {
                    return Vec::new();
                }
                continue;
            }
            let area = signed_area(&ring);
            if area == 0.0 {
                if i == 0 {
                    return Vec::new();
                }
                continue;
            }
            let want_positive = i == 0;
            if (area > 0.0) != want_positive {
                ring.reverse();
            }
            out.push(ring);
        }
        if out.is_empty() { Vec::new() } else { vec![out] }
    }
}

/// Encoding context: where the tile sits in mercator and how to clip.
#[derive(Clone, Copy, Debug)]
pub struct EncodeContext {
    pub transform: GridTransform,
    /// Mercator clip window (buffered tile extent, or an override).
    pub clip: Rect,
    pub options: EncodeOptions,
}

impl EncodeContext {
    #[must_use]
    pub fn new(tile_extent: Rect, clip: Rect, options: EncodeOptions) -> Self {
        Self {
            transform: GridTransform::new(tile_extent, options.extent),
            clip,
            options,
        }
    }
}

/// Runs a mercator geometry through the full encoding pipeline:
/// clip, quantize, dedupe, simplify, union, ring normalization.
///
/// Returns `Geometry::Empty` when nothing survives.
pub fn prepare_geometry(geom: &Geometry, ctx: &EncodeContext) -> TileForgeResult<Geometry> {
    let clipped = clip_geometry(geom, &ctx.clip);
    if clipped.is_empty() {
        return Ok(Geometry::Empty);
    }

    let mut grid = clipped;
    grid.transform_coords(&mut |c| ctx.transform.to_grid(c));
    dedupe_consecutive(&mut grid);
    simplify_geometry(&mut grid, ctx.options.simplify_distance);

    if ctx.options.multi_polygon_union {
        grid = union_multi_polygon(grid);
    }
    let mut grid = normalize_rings(grid, ctx.options.fill_type, ctx.options.process_all_rings);
    if ctx.options.area_threshold > 0.0 {
        drop_small_rings(&mut grid, ctx.options.area_threshold);
    }
    drop_degenerate(&mut grid);

    if ctx.options.strictly_simple && !grid.is_empty() && !is_simple(&grid) {
        return Err(TileForgeError::Geometry(
            "encoded geometry is not simple".to_string(),
        ));
    }
    Ok(grid)
}

fn dedupe_consecutive(geom: &mut Geometry) {
    match geom {
        Geometry::LineString(ps) => ps.dedup(),
        Geometry::MultiLineString(ls) | Geometry::Polygon(ls) => {
            for line in ls {
                line.dedup();
            }
        }
        Geometry::MultiPolygon(polys) => {
            for rings in polys {
                for ring in rings {
                    ring.dedup();
                }
            }
        }
        _ => {}
    }
}

fn drop_small_rings(geom: &mut Geometry, threshold: f64) {
    let keep = |ring: &Ring| signed_area(ring).abs() >= threshold;
    match geom {
        Geometry::Polygon(rings) => rings.retain(keep),
        Geometry::MultiPolygon(polys) => {
            for rings in polys.iter_mut() {
                // the exterior going under the threshold drops the member
                if rings.first().is_some_and(|r| !keep(r)) {
                    rings.clear();
                } else {
                    rings.retain(keep);
                }
            }
            polys.retain(|rings| !rings.is_empty());
        }
        _ => {}
    }
}

/// Collapses shapes that lost too many coordinates to mean anything.
fn drop_degenerate(geom: &mut Geometry) {
    let replace = match geom {
        Geometry::LineString(ps) => ps.len() < 2,
        Geometry::MultiLineString(ls) => {
            ls.retain(|line| line.len() >= 2);
            ls.is_empty()
        }
        Geometry::Polygon(rings) => rings.first().is_none_or(|r| r.len() < 4),
        Geometry::MultiPolygon(polys) => {
            polys.retain(|rings| rings.first().is_some_and(|r| r.len() >= 4));
            polys.is_empty()
        }
        _ => false,
    };
    if replace {
        *geom = Geometry::Empty;
    }
}

/// Unions overlapping members of a multi-polygon; other shapes pass
/// through untouched.
fn union_multi_polygon(geom: Geometry) -> Geometry {
    let Geometry::MultiPolygon(members) = geom else {
        return geom;
    };
    if members.len() < 2 {
        return Geometry::MultiPolygon(members);
    }

    let to_geo = |rings: &Vec<Ring>| -> geo::Polygon<f64> {
        let line = |ring: &Ring| {
            geo::LineString::from(
                ring.iter().map(|c| geo::coord! { x: c.x, y: c.y }).collect::<Vec<_>>(),
            )
        };
        let mut it = rings.iter();
        let exterior = it.next().map(&line).unwrap_or_else(|| geo::LineString::new(vec![]));
        geo::Polygon::new(exterior, it.map(line).collect())
    };

    let mut merged = geo::MultiPolygon::new(vec![to_geo(&members[0])]);
    for member in &members[1..] {
        merged = merged.union(&geo::MultiPolygon::new(vec![to_geo(member)]));
    }

    let from_geo = |poly: &geo::Polygon<f64>| -> Vec<Ring> {
        let ring = |ls: &geo::LineString<f64>| -> Ring {
            ls.coords().map(|c| Coord { x: c.x, y: c.y }).collect()
        };
        let mut rings = vec![ring(poly.exterior())];
        rings.extend(poly.interiors().iter().map(ring));
        rings
    };

    let rings: Vec<Vec<Ring>> = merged.iter().map(from_geo).collect();
    polys_to_geometry(rings)
}

/// Accumulates features for one output layer.
#[derive(Debug)]
pub struct LayerEncoder {
    name: String,
    extent: u32,
    tags: TagsBuilder,
    features: Vec<tile::Feature>,
}

impl LayerEncoder {
    #[must_use]
    pub fn new(name: impl Into<String>, extent: u32) -> Self {
        Self {
            name: name.into(),
            extent,
            tags: TagsBuilder::new(),
            features: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Encodes one feature through the pipeline. Returns whether anything
    /// survived clipping. Collections are flattened into one feature per
    /// member.
    pub fn add_feature(
        &mut self,
        geom: &Geometry,
        id: Option<u64>,
        attributes: &[(String, TileValue)],
        ctx: &EncodeContext,
    ) -> TileForgeResult<bool> {
        self.add_feature_n(geom, id, attributes, ctx, MAX_NESTING)
    }

    fn add_feature_n(
        &mut self,
        geom: &Geometry,
        id: Option<u64>,
        attributes: &[(String, TileValue)],
        ctx: &EncodeContext,
        depth: usize,
    ) -> TileForgeResult<bool> {
        if let Geometry::Collection(members) = geom {
            if depth == 0 {
                return Ok(false);
            }
            let mut any = false;
            for member in members {
                any |= self.add_feature_n(member, id, attributes, ctx, depth - 1)?;
            }
            return Ok(any);
        }

        let prepared = prepare_geometry(geom, ctx)?;
        if prepared.is_empty() {
            return Ok(false);
        }
        let (geom_type, stream) = encode_commands(&prepared);
        if stream.is_empty() {
            return Ok(false);
        }

        let mut tags = Vec::with_capacity(attributes.len() * 2);
        for (key, value) in attributes {
            let (key_idx, value_idx) = self.tags.insert(key, value.clone());
            tags.push(key_idx);
            tags.push(value_idx);
        }
        let mut feature =
            tile::Feature { id, tags, geometry: stream, ..Default::default() };
        feature.set_type(geom_type);
        self.features.push(feature);
        Ok(true)
    }

    /// Attaches a verbatim raster payload as a geometry-less feature.
    pub fn add_raster_feature(
        &mut self,
        raster: Vec<u8>,
        attributes: &[(String, TileValue)],
    ) {
        let mut tags = Vec::with_capacity(attributes.len() * 2);
        for (key, value) in attributes {
            let (key_idx, value_idx) = self.tags.insert(key, value.clone());
            tags.push(key_idx);
            tags.push(value_idx);
        }
        self.features.push(tile::Feature {
            id: None,
            tags,
            raster: Some(raster),
            ..Default::default()
        });
    }

    /// Finishes the layer; `None` when no features survived.
    #[must_use]
    pub fn into_layer(self) -> Option<tile::Layer> {
        if self.features.is_empty() {
            return None;
        }
        let (keys, values) = self.tags.into_tags();
        Some(tile::Layer {
            version: 2,
            name: self.name,
            features: self.features,
            keys,
            values,
            extent: Some(self.extent),
        })
    }
}

/// Rewrites a v1 layer in place so it satisfies the v2 invariants:
/// explicit version, oriented and closed polygon rings.
pub fn upgrade_layer(layer: &mut tile::Layer) -> TileForgeResult<()> {
    match layer.version {
        2 => return Ok(()),
        1 => {}
        other => return Err(TileForgeError::UnsupportedVersion(other)),
    }
    for feature in &mut layer.features {
        if feature.r#type() == tile::GeomType::Polygon {
            let decoded = decode_commands(tile::GeomType::Polygon, &feature.geometry)?;
            let normalized = normalize_rings(decoded, FillType::NonZero, true);
            let (geom_type, stream) = encode_commands(&normalized);
            feature.geometry = stream;
            feature.set_type(geom_type);
        }
    }
    layer.version = 2;
    Ok(())
}
