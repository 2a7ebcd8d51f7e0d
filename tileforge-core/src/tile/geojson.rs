//! GeoJSON ingest: re-encodes features through the codec pipeline.

use crate::error::{TileForgeError, TileForgeResult};
use crate::geom::Geometry;
use crate::mvt::TileValue;
use crate::options::EncodeOptions;
use crate::tile::codec::{EncodeContext, LayerEncoder};
use crate::tile::VectorTile;

impl VectorTile {
    /// Parses a GeoJSON string and encodes its features into a new layer.
    ///
    /// Input coordinates are WGS84; features are reprojected, clipped to
    /// the buffered extent, and quantized to `options.extent`.
    pub fn add_geojson(
        &mut self,
        geojson: &str,
        layer_name: &str,
        options: EncodeOptions,
    ) -> TileForgeResult<()> {
        if layer_name.is_empty() {
            return Err(TileForgeError::InvalidArgument(
                "layer name must not be empty".to_string(),
            ));
        }
        if self.names().contains(&layer_name) {
            return Err(TileForgeError::InvalidArgument(format!(
                "tile already has a layer named {layer_name:?}"
            )));
        }
        let parsed: geojson::GeoJson = geojson
            .parse()
            .map_err(|e| TileForgeError::InvalidArgument(format!("invalid GeoJSON: {e}")))?;

        let ctx = EncodeContext::new(self.extent_rect(), self.buffered_rect(), options);
        let mut encoder = LayerEncoder::new(layer_name, options.extent);
        for (id, mut geom, attributes) in collect_features(&parsed) {
            geom.to_mercator();
            encoder.add_feature(&geom, id, &attributes, &ctx)?;
        }
        self.commit_layer(layer_name, encoder.into_layer());
        Ok(())
    }

    /// Convenience constructor: a fresh tile with one GeoJSON layer.
    pub fn from_geojson(
        z: u8,
        x: u32,
        y: u32,
        geojson: &str,
        layer_name: &str,
        options: EncodeOptions,
    ) -> TileForgeResult<Self> {
        let mut tile = Self::new(z, x, y)?;
        tile.add_geojson(geojson, layer_name, options)?;
        Ok(tile)
    }
}

type FeatureRow = (Option<u64>, Geometry, Vec<(String, TileValue)>);

fn collect_features(parsed: &geojson::GeoJson) -> Vec<FeatureRow> {
    match parsed {
        geojson::GeoJson::FeatureCollection(fc) => {
            fc.features.iter().filter_map(feature_row).collect()
        }
        geojson::GeoJson::Feature(f) => feature_row(f).into_iter().collect(),
        geojson::GeoJson::Geometry(g) => {
            vec![(None, Geometry::from_geojson(&g.value), Vec::new())]
        }
    }
}

fn feature_row(feature: &geojson::Feature) -> Option<FeatureRow> {
    let geometry = feature.geometry.as_ref()?;
    let id = match &feature.id {
        Some(geojson::feature::Id::Number(n)) => n.as_u64(),
        _ => None,
    };
    let attributes = feature
        .properties
        .as_ref()
        .map(|props| {
            props
                .iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), TileValue::from_json(v)))
                .collect()
        })
        .unwrap_or_default();
    Some((id, Geometry::from_geojson(&geometry.value), attributes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mvt::tile;

    const WORLD_SQUARE: &str = r#"{
        "type": "FeatureCollection",
        "features": [{
            "type": "Feature",
            "id": 42,
            "properties": {"name": "origin", "rank": 1, "skip": null},
            "geometry": {
                "type": "Polygon",
                "coordinates": [[[-10.0,-10.0],[10.0,-10.0],[10.0,10.0],[-10.0,10.0],[-10.0,-10.0]]]
            }
        }]
    }"#;

    #[test]
    fn polygon_feature_lands_in_layer() {
        let mut tile = VectorTile::new(0, 0, 0).expect("valid tile");
        tile.add_geojson(WORLD_SQUARE, "world", EncodeOptions::default())
            .expect("encodes");

        assert_eq!(tile.names(), ["world"]);
        let message = tile.layer_message(0).expect("decodes");
        assert_eq!(message.version, 2);
        assert_eq!(message.extent, Some(4096));
        assert_eq!(message.features.len(), 1);
        let feature = &message.features[0];
        assert_eq!(feature.id, Some(42));
        assert_eq!(feature.r#type(), tile::GeomType::Polygon);
        // null property was dropped
        assert_eq!(message.keys.len(), 2);
    }

    #[test]
    fn bare_geometry_and_feature_inputs_work() {
        let mut tile = VectorTile::new(0, 0, 0).expect("valid tile");
        tile.add_geojson(
            r#"{"type":"Point","coordinates":[0.0,0.0]}"#,
            "point",
            EncodeOptions::default(),
        )
        .expect("encodes");
        assert_eq!(tile.names(), ["point"]);
    }

    #[test]
    fn far_away_feature_leaves_layer_painted_and_empty() {
        // z2 tile around null island does not see Alaska
        let mut tile = VectorTile::new(2, 2, 1).expect("valid tile");
        tile.add_geojson(
            r#"{"type":"Point","coordinates":[-150.0,64.0]}"#,
            "poi",
            EncodeOptions::default(),
        )
        .expect("encodes");
        assert_eq!(tile.names(), Vec::<&str>::new());
        assert!(tile.painted_layers().contains("poi"));
        assert!(tile.empty_layers().contains("poi"));
    }

    #[test]
    fn bad_inputs_are_rejected() {
        let mut tile = VectorTile::new(0, 0, 0).expect("valid tile");
        assert!(matches!(
            tile.add_geojson("{not json", "x", EncodeOptions::default()),
            Err(TileForgeError::InvalidArgument(_))
        ));
        assert!(tile.add_geojson(WORLD_SQUARE, "", EncodeOptions::default()).is_err());

        tile.add_geojson(WORLD_SQUARE, "world", EncodeOptions::default())
            .expect("encodes");
        assert!(tile.add_geojson(WORLD_SQUARE, "world", EncodeOptions::default()).is_err());
    }
}
