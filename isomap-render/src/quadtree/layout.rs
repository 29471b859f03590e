//! Geometry of the tile grid in diagonal chunk coordinates.

use anyhow::{Result, bail};
use glam::I64Vec2;
use isomap_core::{CHUNK_HEIGHT, ChunkPos, DiagBounds, DiagPos, TilePath};

use crate::RenderError;

/// Edge length of every tile image in pixels.
pub const TILE_SIZE: u32 = 384;
pub const HALF_TILE_SIZE: u32 = TILE_SIZE / 2;
pub const QUARTER_TILE_SIZE: u32 = TILE_SIZE / 4;

/// Depth at which every 32-bit chunk coordinate fits into the tree.
pub const MAX_TREE_DEPTH: u32 = 33;

/// Screen height of a single block layer in pixels.
pub const BLOCK_PIXEL_HEIGHT: u32 = 12;

/// Number of rows above a leaf whose chunks are tall enough to reach into it.
pub const OVERHANG_ROWS: i64 = (CHUNK_HEIGHT as i64 * BLOCK_PIXEL_HEIGHT as i64)
    / QUARTER_TILE_SIZE as i64;

/// Width of a leaf tile in diagonal columns (exclusive of its last column).
const LEAF_COLUMNS: i64 = 2;
/// Height of a leaf tile in diagonal rows (exclusive of its last row).
const LEAF_ROWS: i64 = 4;

/// Returns the region of the diagonal grid a tree of the given depth is able to show.
#[must_use]
pub fn depth_bounds(depth: u32) -> DiagBounds {
    let radius = 1_i64 << depth;
    DiagBounds {
        min_column: -radius,
        max_column: radius,
        min_row: -2 * radius,
        max_row: 2 * radius,
    }
}

/// Returns the smallest depth whose grid holds all of the given bounds.
///
/// # Errors
///
/// Fails with [`RenderError::MapTooLarge`] if no depth below [`MAX_TREE_DEPTH`] is sufficient.
pub fn required_depth(bounds: &DiagBounds) -> Result<u32> {
    for depth in 0..MAX_TREE_DEPTH {
        if bounds.is_within(&depth_bounds(depth)) {
            return Ok(depth);
        }
    }
    bail!(RenderError::MapTooLarge(MAX_TREE_DEPTH));
}

/// The range of diagonal coordinates a leaf tile is rendered from. All bounds are inclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TileRect {
    pub column_start: i64,
    pub column_end: i64,
    pub row_start: i64,
    pub row_end: i64,
}

impl TileRect {
    /// Computes the rectangle of the leaf tile at `path` within a tree of the given depth.
    #[must_use]
    pub fn for_path(path: &TilePath, depth: u32) -> Self {
        let bounds = depth_bounds(depth);
        let mut start = I64Vec2::new(bounds.min_column, bounds.min_row);
        let mut size = I64Vec2::new(bounds.max_column, bounds.max_row);
        for &digit in path.digits() {
            if digit & 1 != 0 {
                start.x += size.x;
            }
            if digit & 2 != 0 {
                start.y += size.y;
            }
            size /= 2;
        }
        Self {
            column_start: start.x,
            column_end: start.x + LEAF_COLUMNS,
            row_start: start.y,
            row_end: start.y + LEAF_ROWS,
        }
    }

    /// Returns every chunk which may be visible on this tile, together with its diagonal position.
    ///
    /// This includes chunks up to [`OVERHANG_ROWS`] above the tile. Chunks are listed top to
    /// bottom which is also the order they must be drawn in.
    pub fn candidates(&self) -> impl Iterator<Item = (DiagPos, ChunkPos)> + '_ {
        (self.row_start - OVERHANG_ROWS..=self.row_end).flat_map(move |row| {
            (self.column_start..=self.column_end).filter_map(move |column| {
                let diag = DiagPos::new(column, row);
                diag.chunk().map(|chunk| (diag, chunk))
            })
        })
    }

    /// Returns the pixel position of the top left corner of a chunk's image on this tile.
    #[must_use]
    pub fn chunk_origin(&self, diag: DiagPos) -> I64Vec2 {
        let half = i64::from(HALF_TILE_SIZE);
        let quarter = i64::from(QUARTER_TILE_SIZE);
        I64Vec2::new(
            -half + (diag.column - self.column_start) * half,
            -quarter + (diag.row - self.row_start) * quarter,
        )
    }
}
