//! Introspection output: GeoJSON export and structured JSON.

use serde_json::json;

use crate::error::{TileForgeError, TileForgeResult};
use crate::options::{LayerSelector, ToJsonOptions};
use crate::tile::VectorTile;
use crate::tile::codec::{self, GridTransform};

impl VectorTile {
    /// Exports decoded features as GeoJSON, reprojected to WGS84.
    ///
    /// `All` merges every layer into one feature collection; `Array`
    /// returns a JSON array with one named collection per layer.
    pub fn to_geojson(&self, selector: &LayerSelector) -> TileForgeResult<String> {
        let out = match selector {
            LayerSelector::Name(name) => {
                let index = self
                    .layer_slices()
                    .iter()
                    .position(|e| e.name == *name)
                    .ok_or_else(|| {
                        TileForgeError::InvalidArgument(format!(
                            "tile has no layer named {name:?}"
                        ))
                    })?;
                self.layer_collection(index)?
            }
            LayerSelector::Index(index) => {
                if *index >= self.layer_slices().len() {
                    return Err(TileForgeError::InvalidArgument(format!(
                        "layer index {index} out of range"
                    )));
                }
                self.layer_collection(*index)?
            }
            LayerSelector::All => {
                let mut features = Vec::new();
                for index in 0..self.layer_slices().len() {
                    let serde_json::Value::Object(mut collection) = self.layer_collection(index)?
                    else {
                        continue;
                    };
                    if let Some(serde_json::Value::Array(layer_features)) =
                        collection.remove("features")
                    {
                        features.extend(layer_features);
                    }
                }
                json!({ "type": "FeatureCollection", "features": features })
            }
            LayerSelector::Array => {
                let collections = (0..self.layer_slices().len())
                    .map(|index| self.layer_collection(index))
                    .collect::<TileForgeResult<Vec<_>>>()?;
                serde_json::Value::Array(collections)
            }
        };
        serde_json::to_string(&out)
            .map_err(|e| TileForgeError::InvalidArgument(format!("serialization failed: {e}")))
    }

    /// Structured description of the tile and its layers.
    pub fn to_json(&self, options: &ToJsonOptions) -> TileForgeResult<serde_json::Value> {
        let mut layers = Vec::with_capacity(self.layer_slices().len());
        for (index, slice) in self.layer_slices().iter().enumerate() {
            let layer = self.layer_message(index)?;
            let mut entry = json!({
                "name": slice.name,
                "version": layer.version,
                "extent": layer.extent_or_default(),
                "bytes": slice.range.len(),
                "features": layer.features.len(),
            });
            if options.decode_geometry {
                let mut features = Vec::with_capacity(layer.features.len());
                for feature in codec::decode_features(&layer)? {
                    let attributes: serde_json::Map<String, serde_json::Value> = feature
                        .attributes
                        .iter()
                        .map(|(k, v)| (k.clone(), v.to_json()))
                        .collect();
                    features.push(json!({
                        "id": feature.id,
                        "type": feature.geom_type.as_str_name(),
                        "raster_bytes": feature.raster.as_ref().map(Vec::len),
                        "geometry": geojson::Geometry::new(feature.geometry.to_geojson()),
                        "attributes": attributes,
                    }));
                }
                if let serde_json::Value::Object(map) = &mut entry {
                    map.insert("decoded".to_string(), serde_json::Value::Array(features));
                }
            }
            layers.push(entry);
        }

        Ok(json!({
            "z": self.coord().z,
            "x": self.coord().x,
            "y": self.coord().y,
            "tile_size": self.tile_size(),
            "buffer_size": self.buffer_size(),
            "painted": self.painted_layers(),
            "empty": self.empty_layers(),
            "layers": layers,
        }))
    }

    /// One layer as a WGS84 feature collection, with the layer name as the
    /// collection's `name` member.
    fn layer_collection(&self, index: usize) -> TileForgeResult<serde_json::Value> {
        let slice = &self.layer_slices()[index];
        let layer = self.layer_message(index)?;
        let transform = GridTransform::new(self.extent_rect(), layer.extent_or_default());

        let mut features = Vec::with_capacity(layer.features.len());
        for feature in codec::decode_features(&layer)? {
            if feature.geometry.is_empty() {
                continue;
            }
            let mut geom = feature.geometry;
            geom.transform_coords(&mut |c| transform.to_mercator(c));
            geom.to_wgs84();

            let properties: serde_json::Map<String, serde_json::Value> = feature
                .attributes
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect();
            features.push(json!({
                "type": "Feature",
                "id": feature.id,
                "properties": properties,
                "geometry": geojson::Geometry::new(geom.to_geojson()),
            }));
        }
        Ok(json!({
            "type": "FeatureCollection",
            "name": slice.name,
            "features": features,
        }))
    }
}
