//! Vector tile engine: build, mutate, query, and merge Mapbox Vector Tiles.
//!
//! The engine is organized around [`VectorTile`], a tile addressed in the
//! Web-Mercator pyramid that owns its encoded MVT buffer and keeps a byte
//! range index per layer. Ingest ([`VectorTile::set_data`],
//! [`VectorTile::add_data`], [`VectorTile::add_geojson`],
//! [`VectorTile::add_image_layer`]) feeds the buffer; spatial queries,
//! compositing, GeoJSON export and structural validation read it back.
//!
//! ```
//! use tileforge_core::{VectorTile, options::{EncodeOptions, QueryOptions}};
//!
//! let mut tile = VectorTile::new(0, 0, 0)?;
//! tile.add_geojson(
//!     r#"{"type":"Point","coordinates":[11.6,48.1]}"#,
//!     "poi",
//!     EncodeOptions::default(),
//! )?;
//! let hits = tile.query(11.6, 48.1, &QueryOptions { tolerance: 10_000.0, layer: None })?;
//! assert_eq!(hits.len(), 1);
//! # Ok::<(), tileforge_core::TileForgeError>(())
//! ```

#![forbid(unsafe_code)]

pub mod error;
pub mod geom;
pub mod mvt;
pub mod options;
pub mod pbf;
pub mod tile;

pub use error::{TileForgeError, TileForgeResult};
pub use tile::{
    DecodedFeature, LayerReport, QueryHit, QueryManyFeature, QueryManyHit, QueryManyResult,
    TileIssue, TileReport, ValidityFinding, VectorTile,
};
