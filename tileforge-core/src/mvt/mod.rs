//! MVT message model and wire helpers.

mod commands;
pub use commands::{Command, CommandInteger, ParameterInteger};

mod tags;
pub use tags::{TagsBuilder, TileValue};

#[rustfmt::skip]
mod vector_tile;
pub use prost::Message;
pub use vector_tile::{Tile, tile};
