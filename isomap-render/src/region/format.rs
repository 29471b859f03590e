use std::path::Path;

use anyhow::Result;
use isomap_core::{Chunk, ChunkPos, LocalChunkPos};

/// A file format storing the chunks of a 32×32 region in a single file.
pub trait RegionFormat: Send + Sync {
    /// Extension of the region files, without the leading dot.
    fn extension(&self) -> &str;

    /// Opens a region file for reading.
    ///
    /// # Errors
    ///
    /// Fails if the file can't be read or if its header is malformed.
    fn open(&self, path: &Path) -> Result<Box<dyn RegionReader>>;
}

/// Read access to a single opened region file.
///
/// Positions are given in the file's own (unrotated) frame.
pub trait RegionReader: Send {
    /// Returns the time the chunk was last saved, or `None` if the region doesn't store it.
    fn timestamp(&self, local: LocalChunkPos) -> Option<u32>;

    /// Decodes a chunk. Returns `Ok(None)` if the region doesn't store it.
    ///
    /// # Errors
    ///
    /// Any error means the chunk's payload is corrupt.
    fn read_chunk(&mut self, pos: ChunkPos) -> Result<Option<Chunk>>;
}
