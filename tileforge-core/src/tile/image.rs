//! Raster layers: opaque image bytes attached as features.

use tileforge_tile_utils::TileInfo;

use crate::error::{TileForgeError, TileForgeResult};
use crate::mvt::TileValue;
use crate::options::ImageOptions;
use crate::tile::codec::LayerEncoder;
use crate::tile::VectorTile;

impl VectorTile {
    /// Adds a layer holding one raster feature with the image bytes stored
    /// verbatim. The engine never decodes pixels; format and scaling method
    /// are carried as feature attributes for the renderer.
    pub fn add_image_layer(
        &mut self,
        image: &[u8],
        layer_name: &str,
        options: ImageOptions,
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
        if !options.image_format.is_raster() {
            return Err(TileForgeError::InvalidArgument(format!(
                "{} is not a raster format",
                options.image_format
            )));
        }
        if image.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "image buffer is empty",
            )
            .into());
        }
        // detection failures pass through (tiff-in-disguise is the
        // renderer's problem), but a contradicting magic number is not
        if let Some(info) = TileInfo::detect(image) {
            if info.format.is_raster() && info.format != options.image_format {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!(
                        "image declares {} but the buffer looks like {}",
                        options.image_format, info.format
                    ),
                )
                .into());
            }
        }

        let mut encoder = LayerEncoder::new(layer_name, self.tile_size());
        encoder.add_raster_feature(
            image.to_vec(),
            &[
                (
                    "image_format".to_string(),
                    TileValue::Str(options.image_format.to_string()),
                ),
                (
                    "scaling_method".to_string(),
                    TileValue::Str(scaling_name(options)),
                ),
            ],
        );
        self.commit_layer(layer_name, encoder.into_layer());
        Ok(())
    }
}

fn scaling_name(options: ImageOptions) -> String {
    serde_json::to_value(options.scaling_method)
        .ok()
        .and_then(|v| v.as_str().map(ToString::to_string))
        .unwrap_or_else(|| "bilinear".to_string())
}

#[cfg(test)]
mod tests {
    use tileforge_tile_utils::Format;

    use super::*;
    use crate::options::ScalingMethod;

    const JPEG_STUB: &[u8] = b"\xFF\xD8\xFF\xE0fake scanlines";

    #[test]
    fn image_layer_appears_in_names() {
        let mut tile = VectorTile::with_options(1, 0, 0, 256, 0).expect("valid tile");
        tile.add_image_layer(
            JPEG_STUB,
            "img",
            ImageOptions {
                image_format: Format::Jpeg,
                scaling_method: ScalingMethod::Gaussian,
            },
        )
        .expect("adds");

        assert_eq!(tile.names(), ["img"]);
        assert!(!tile.empty());

        let (layer, features) = tile.layer_features("img").expect("decodes");
        assert_eq!(layer.extent, Some(256));
        assert_eq!(features.len(), 1);
        assert_eq!(features[0].raster.as_deref(), Some(JPEG_STUB));
        assert!(
            features[0]
                .attributes
                .iter()
                .any(|(k, v)| k == "scaling_method"
                    && *v == crate::mvt::TileValue::Str("gaussian".to_string()))
        );
    }

    #[test]
    fn mismatched_magic_is_io_error() {
        let mut tile = VectorTile::new(0, 0, 0).expect("valid tile");
        assert!(matches!(
            tile.add_image_layer(
                JPEG_STUB,
                "img",
                ImageOptions { image_format: Format::Png, ..Default::default() }
            ),
            Err(TileForgeError::Io(_))
        ));
    }

    #[test]
    fn empty_image_is_io_error() {
        let mut tile = VectorTile::new(0, 0, 0).expect("valid tile");
        assert!(matches!(
            tile.add_image_layer(&[], "img", ImageOptions::default()),
            Err(TileForgeError::Io(_))
        ));
    }

    #[test]
    fn vector_format_is_rejected() {
        let mut tile = VectorTile::new(0, 0, 0).expect("valid tile");
        assert!(matches!(
            tile.add_image_layer(
                JPEG_STUB,
                "img",
                ImageOptions { image_format: Format::Mvt, ..Default::default() }
            ),
            Err(TileForgeError::InvalidArgument(_))
        ));
    }
}
