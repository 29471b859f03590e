//! Storage backends for the tiles and metadata of a quadtree.

use std::{path::PathBuf, time::SystemTime};

use anyhow::Result;
use isomap_core::TilePath;

use crate::quadtree::ImageFormat;

mod fs;
mod memory;

pub use fs::FsTileStore;
pub use memory::MemoryTileStore;

/// Addressable storage for the encoded tile images of a single quadtree.
///
/// A tile owns its image and the subtree of all tiles below it. Implementations must be usable
/// from several workers at once; every worker only writes to the tiles of its own jobs.
///
/// Images are addressed together with their format because the format of a tree is only known
/// after its metadata document has been read from the same store.
pub trait TileStore: Send + Sync {
    /// Returns when the tile's image was last written, or `None` if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Fails if the storage can't be queried.
    fn modified(&self, tile: &TilePath, format: ImageFormat) -> Result<Option<SystemTime>>;

    /// Reads the tile's encoded image.
    ///
    /// # Errors
    ///
    /// Fails if the image doesn't exist or can't be read.
    fn read(&self, tile: &TilePath, format: ImageFormat) -> Result<Vec<u8>>;

    /// Stores the tile's encoded image, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Fails if the image can't be stored.
    fn write(&self, tile: &TilePath, format: ImageFormat, image: &[u8]) -> Result<()>;

    /// Deletes the tile's image but keeps its subtree.
    /// Returns whether there was an image to delete.
    ///
    /// # Errors
    ///
    /// Fails if an existing image can't be deleted.
    fn remove(&self, tile: &TilePath, format: ImageFormat) -> Result<bool>;

    /// Deletes the tile's image together with its whole subtree.
    ///
    /// # Errors
    ///
    /// Fails if anything can't be deleted.
    fn remove_subtree(&self, tile: &TilePath, format: ImageFormat) -> Result<()>;

    /// Check whether the tile's image or any tile of its subtree exists.
    ///
    /// # Errors
    ///
    /// Fails if the storage can't be queried.
    fn exists(&self, tile: &TilePath, format: ImageFormat) -> Result<bool>;

    /// Moves a tile's image together with its subtree to another position.
    ///
    /// Everything previously stored at `to` is discarded, unless it is part of the moved subtree
    /// itself. `to` may lie within the subtree of `from` and vice versa. Nothing happens if
    /// nothing is stored at `from`.
    ///
    /// # Errors
    ///
    /// Fails if any of the involved move operations fails.
    fn relocate(&self, from: &TilePath, to: &TilePath, format: ImageFormat) -> Result<()>;

    /// Reads a named document stored next to the tiles, or `None` if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Fails if the document exists but can't be read.
    fn load_document(&self, name: &str) -> Result<Option<Vec<u8>>>;

    /// Atomically replaces a named document stored next to the tiles.
    ///
    /// A failed write leaves the previous version in place.
    ///
    /// # Errors
    ///
    /// Fails if the document can't be written.
    fn store_document(&self, name: &str, content: &[u8]) -> Result<()>;

    /// Returns the location of the tile's image on the local file system if there is one.
    fn local_path(&self, _tile: &TilePath, _format: ImageFormat) -> Option<PathBuf> {
        None
    }
}
