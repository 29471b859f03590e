//! Contains the core types shared by the region access layer and the tile renderer.

mod chunk;
mod north;
mod pos;
mod tile_path;

pub use chunk::*;
pub use north::*;
pub use pos::*;
pub use tile_path::*;
