//! Structural validation and geometry diagnostics.
//!
//! The validator reports findings instead of failing; it backs the `info`
//! operation and never throws unless the buffer cannot be read at all.

use std::collections::BTreeSet;

use tileforge_tile_utils::{Encoding, TileInfo, decode_gzip, decode_zlib};

use crate::error::TileForgeResult;
use crate::geom::validity::{simplicity_findings, validity_findings};
use crate::mvt::tile;
use crate::pbf;
use crate::tile::VectorTile;
use crate::tile::codec;

/// Tile-level structural problems.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TileIssue {
    /// The buffer could not be read at all.
    InvalidBuffer { message: String },
    /// Layers disagree on their declared version.
    MixedVersions { versions: Vec<u32> },
    RepeatedLayerNames { name: String },
    /// Top-level fields outside the tile schema.
    UnknownTags { count: u32 },
}

/// Per-layer portion of a [`TileReport`].
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct LayerReport {
    pub name: String,
    pub version: u32,
    pub extent: u32,
    pub point_features: usize,
    pub line_features: usize,
    pub polygon_features: usize,
    pub unknown_features: usize,
    pub raster_features: usize,
    pub errors: Vec<String>,
}

/// Structured validation report driving `info` diagnostics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct TileReport {
    pub errors: Vec<TileIssue>,
    pub layers: Vec<LayerReport>,
}

impl TileReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.layers.iter().all(|l| l.errors.is_empty())
    }
}

/// One geometry diagnostic from the simplicity or validity reports.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ValidityFinding {
    pub layer: String,
    /// Feature position within the layer; `None` for layer-level findings.
    pub feature_index: Option<usize>,
    pub feature_id: Option<u64>,
    pub reason: String,
    /// Offending sub-geometry as GeoJSON, when one exists.
    pub geometry: Option<serde_json::Value>,
}

impl VectorTile {
    /// Inspects raw tile bytes without constructing a tile.
    ///
    /// Compressed input is inflated first. All structural problems are
    /// reported as findings; the only hard failure is a buffer that cannot
    /// be read, which is itself reported as [`TileIssue::InvalidBuffer`].
    #[must_use]
    pub fn info(bytes: &[u8]) -> TileReport {
        let mut report = TileReport::default();

        let inflated = match TileInfo::detect(bytes) {
            Some(TileInfo { encoding: Encoding::Gzip, .. }) => decode_gzip(bytes),
            Some(TileInfo { encoding: Encoding::Zlib, .. }) => decode_zlib(bytes),
            _ => Ok(bytes.to_vec()),
        };
        let buffer = match inflated {
            Ok(buffer) => buffer,
            Err(e) => {
                report
                    .errors
                    .push(TileIssue::InvalidBuffer { message: e.to_string() });
                return report;
            }
        };

        let scan = match pbf::scan_tile(&buffer) {
            Ok(scan) => scan,
            Err(e) => {
                report
                    .errors
                    .push(TileIssue::InvalidBuffer { message: e.to_string() });
                return report;
            }
        };
        if scan.unknown_tags > 0 {
            report.errors.push(TileIssue::UnknownTags { count: scan.unknown_tags });
        }

        let mut seen = BTreeSet::new();
        let mut versions = BTreeSet::new();
        for slice in &scan.layers {
            if !seen.insert(slice.name.clone()) {
                report
                    .errors
                    .push(TileIssue::RepeatedLayerNames { name: slice.name.clone() });
            }
            versions.insert(slice.version);
            report.layers.push(inspect_layer(slice, &buffer[slice.body.clone()]));
        }
        if versions.len() > 1 {
            report.errors.push(TileIssue::MixedVersions {
                versions: versions.into_iter().collect(),
            });
        }
        report
    }

    /// Runs the OGC simplicity predicate over every decoded feature.
    pub fn report_geometry_simplicity(&self) -> TileForgeResult<Vec<ValidityFinding>> {
        self.geometry_report(simplicity_findings)
    }

    /// Runs the OGC validity predicate over every decoded feature. Layers
    /// declaring a version outside `{1, 2}` are flagged and skipped.
    pub fn report_geometry_validity(&self) -> TileForgeResult<Vec<ValidityFinding>> {
        self.geometry_report(validity_findings)
    }

    fn geometry_report(
        &self,
        check: fn(&crate::geom::Geometry, &mut Vec<crate::geom::validity::GeometryFinding>),
    ) -> TileForgeResult<Vec<ValidityFinding>> {
        let mut findings = Vec::new();
        for (index, slice) in self.layer_slices().iter().enumerate() {
            if slice.version > 2 || slice.version == 0 {
                findings.push(ValidityFinding {
                    layer: slice.name.clone(),
                    feature_index: None,
                    feature_id: None,
                    reason: format!("layer has unsupported version {}", slice.version),
                    geometry: None,
                });
                continue;
            }
            let layer = self.layer_message(index)?;
            for (feature_index, feature) in codec::decode_features(&layer)?.iter().enumerate() {
                let mut geometry_findings = Vec::new();
                check(&feature.geometry, &mut geometry_findings);
                findings.extend(geometry_findings.into_iter().map(|f| ValidityFinding {
                    layer: slice.name.clone(),
                    feature_index: Some(feature_index),
                    feature_id: feature.id,
                    reason: f.reason,
                    geometry: Some(f.geometry),
                }));
            }
        }
        Ok(findings)
    }
}

/// Feature counts and tag-stream checks for one layer, without failing.
fn inspect_layer(slice: &pbf::LayerSlice, body: &[u8]) -> LayerReport {
    let mut report = LayerReport {
        name: slice.name.clone(),
        version: slice.version,
        ..Default::default()
    };
    if !(1..=2).contains(&slice.version) {
        report
            .errors
            .push(format!("unsupported version {}", slice.version));
    }

    let layer = match codec::decode_layer(body) {
        Ok(layer) => layer,
        Err(e) => {
            report.errors.push(e.to_string());
            return report;
        }
    };
    report.extent = layer.extent_or_default();

    for (index, value) in layer.values.iter().enumerate() {
        if crate::mvt::TileValue::from_message(value).is_none() {
            report
                .errors
                .push(format!("values dictionary entry {index} carries no member"));
        }
    }

    for (index, feature) in layer.features.iter().enumerate() {
        if feature.raster.is_some() {
            report.raster_features += 1;
        }
        match feature.r#type() {
            tile::GeomType::Point => report.point_features += 1,
            tile::GeomType::Linestring => report.line_features += 1,
            tile::GeomType::Polygon => report.polygon_features += 1,
            tile::GeomType::Unknown if feature.raster.is_none() => {
                report.unknown_features += 1;
            }
            tile::GeomType::Unknown => {}
        }

        if feature.tags.len() % 2 != 0 {
            report
                .errors
                .push(format!("feature {index}: odd tag stream length"));
            continue;
        }
        for pair in feature.tags.chunks(2) {
            if pair[0] as usize >= layer.keys.len() {
                report
                    .errors
                    .push(format!("feature {index}: key index {} out of range", pair[0]));
            }
            if pair[1] as usize >= layer.values.len() {
                report
                    .errors
                    .push(format!("feature {index}: value index {} out of range", pair[1]));
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mvt::Message as _;
    use crate::options::{EncodeOptions, ParseOptions};
    use crate::tile::tests::tile_with_point_layer;

    #[test]
    fn clean_tile_reports_clean() {
        let tile = tile_with_point_layer("poi");
        let report = VectorTile::info(tile.data());
        assert!(report.is_clean(), "unexpected findings: {report:?}");
        assert_eq!(report.layers.len(), 1);
        assert_eq!(report.layers[0].name, "poi");
        assert_eq!(report.layers[0].version, 2);
        assert_eq!(report.layers[0].point_features, 1);
    }

    #[test]
    fn info_matches_for_compressed_input() {
        let tile = tile_with_point_layer("poi");
        let packed = tileforge_tile_utils::encode_gzip(
            tile.data(),
            tileforge_tile_utils::DeflateOptions::default(),
        )
        .expect("compresses");
        let raw_report = serde_json::to_value(VectorTile::info(tile.data())).expect("json");
        let packed_report = serde_json::to_value(VectorTile::info(&packed)).expect("json");
        assert_eq!(raw_report, packed_report);
    }

    #[test]
    fn garbage_is_an_invalid_buffer_finding() {
        let report = VectorTile::info(b"\x07\x07\x07");
        assert!(matches!(report.errors[0], TileIssue::InvalidBuffer { .. }));
    }

    #[test]
    fn repeated_names_and_mixed_versions_are_flagged() {
        let v1 = tile::Layer { version: 1, name: "a".to_string(), ..Default::default() };
        let v2 = tile::Layer { version: 2, name: "a".to_string(), ..Default::default() };
        let mut buffer = Vec::new();
        pbf::append_raw_layer(&mut buffer, &v1.encode_to_vec());
        pbf::append_raw_layer(&mut buffer, &v2.encode_to_vec());

        let report = VectorTile::info(&buffer);
        assert!(
            report
                .errors
                .iter()
                .any(|e| matches!(e, TileIssue::RepeatedLayerNames { name } if name == "a"))
        );
        assert!(
            report
                .errors
                .iter()
                .any(|e| matches!(e, TileIssue::MixedVersions { versions } if versions == &[1, 2]))
        );
    }

    #[test]
    fn broken_tag_stream_is_a_layer_error() {
        let mut feature = tile::Feature {
            tags: vec![0, 9],
            geometry: vec![9, 0, 0],
            ..Default::default()
        };
        feature.set_type(tile::GeomType::Point);
        let layer = tile::Layer {
            version: 2,
            name: "broken".to_string(),
            features: vec![feature],
            keys: vec!["only".to_string()],
            values: vec![tile::Value { bool_value: Some(true), ..Default::default() }],
            ..Default::default()
        };
        let mut buffer = Vec::new();
        pbf::append_raw_layer(&mut buffer, &layer.encode_to_vec());

        let report = VectorTile::info(&buffer);
        assert!(report.layers[0].errors.iter().any(|e| e.contains("value index")));
    }

    #[test]
    fn unsupported_version_shows_in_validity_report() {
        let v3 = tile::Layer { version: 3, name: "future".to_string(), ..Default::default() };
        let mut buffer = Vec::new();
        pbf::append_raw_layer(&mut buffer, &v3.encode_to_vec());

        let mut tile = VectorTile::new(0, 0, 0).expect("valid tile");
        tile.add_data(&buffer, ParseOptions::default()).expect("adds");

        let findings = tile.report_geometry_validity().expect("reports");
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].layer, "future");
        assert!(findings[0].reason.contains("unsupported version 3"));
    }

    #[test]
    fn self_crossing_line_is_reported_with_geometry() {
        let mut tile = VectorTile::new(0, 0, 0).expect("valid tile");
        tile.add_geojson(
            r#"{"type":"LineString","coordinates":
                [[0.0,0.0],[20.0,20.0],[20.0,0.0],[0.0,20.0]]}"#,
            "ties",
            EncodeOptions::default(),
        )
        .expect("encodes");

        let findings = tile.report_geometry_simplicity().expect("reports");
        assert!(!findings.is_empty());
        assert_eq!(findings[0].layer, "ties");
        assert_eq!(findings[0].feature_index, Some(0));
        assert!(findings[0].geometry.is_some());

        // a clean square produces nothing
        let clean = tile_with_point_layer("poi");
        assert!(clean.report_geometry_simplicity().expect("reports").is_empty());
    }
}
