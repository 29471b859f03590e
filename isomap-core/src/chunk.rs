//! Decoded chunk contents.

use glam::IVec3;

use crate::ChunkPos;

/// Number of blocks along each horizontal edge of a chunk.
pub const CHUNK_WIDTH: usize = 16;
/// Number of blocks stacked within each column of a chunk.
pub const CHUNK_HEIGHT: usize = 128;
/// Number of blocks within a single chunk.
pub const BLOCK_COUNT: usize = CHUNK_WIDTH * CHUNK_WIDTH * CHUNK_HEIGHT;
/// Size of the packed arrays storing one 4-bit value per block.
pub const NIBBLE_COUNT: usize = BLOCK_COUNT / 2;

/// Block id of an empty block.
pub const AIR: u8 = 0;

/// A sign placed within a chunk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sign {
    /// world position of the sign's block
    pub pos: IVec3,
    /// the four lines of text
    pub lines: [String; 4],
}

impl Sign {
    /// Returns all non-empty lines joined by line breaks.
    #[must_use]
    pub fn text(&self) -> String {
        self.lines
            .iter()
            .map(|line| line.trim())
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Returned if the arrays of a chunk don't have the expected size.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("chunk array '{array}' has {actual} bytes instead of {expected}")]
pub struct ChunkShapeError {
    array: &'static str,
    expected: usize,
    actual: usize,
}

/// The decoded block and light arrays of a single chunk.
///
/// All arrays are laid out column by column: `index = (x * 16 + z) * 128 + y`. The nibble arrays
/// pack two neighbouring heights into a single byte with the lower height in the low nibble.
#[derive(Clone, Debug)]
pub struct Chunk {
    pos: ChunkPos,
    timestamp: u32,
    blocks: Box<[u8]>,
    data: Box<[u8]>,
    sky_light: Box<[u8]>,
    block_light: Box<[u8]>,
    signs: Vec<Sign>,
}

impl Chunk {
    /// Assembles a chunk from its decoded arrays.
    ///
    /// # Errors
    ///
    /// Fails if any of the arrays has the wrong size.
    pub fn new(
        pos: ChunkPos,
        timestamp: u32,
        blocks: Box<[u8]>,
        data: Box<[u8]>,
        sky_light: Box<[u8]>,
        block_light: Box<[u8]>,
        signs: Vec<Sign>,
    ) -> Result<Self, ChunkShapeError> {
        check_len("Blocks", &blocks, BLOCK_COUNT)?;
        check_len("Data", &data, NIBBLE_COUNT)?;
        check_len("SkyLight", &sky_light, NIBBLE_COUNT)?;
        check_len("BlockLight", &block_light, NIBBLE_COUNT)?;
        Ok(Self {
            pos,
            timestamp,
            blocks,
            data,
            sky_light,
            block_light,
            signs,
        })
    }

    /// Returns the position of this chunk.
    #[must_use]
    pub fn pos(&self) -> ChunkPos {
        self.pos
    }

    /// Seconds since the unix epoch this chunk was last saved.
    #[must_use]
    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    /// Signs placed within this chunk.
    #[must_use]
    pub fn signs(&self) -> &[Sign] {
        &self.signs
    }

    /// Block id at the given local coordinates. Out of range coordinates read as air.
    #[must_use]
    pub fn block(&self, x: usize, z: usize, y: usize) -> u8 {
        block_index(x, z, y)
            .and_then(|index| self.blocks.get(index))
            .copied()
            .unwrap_or(AIR)
    }

    /// Additional block data at the given local coordinates.
    #[must_use]
    pub fn block_data(&self, x: usize, z: usize, y: usize) -> u8 {
        nibble(&self.data, x, z, y)
    }

    /// Light level received from the sky. Positions above the chunk are fully lit.
    #[must_use]
    pub fn sky_light(&self, x: usize, z: usize, y: usize) -> u8 {
        if y >= CHUNK_HEIGHT {
            return 15;
        }
        nibble(&self.sky_light, x, z, y)
    }

    /// Light level emitted by nearby blocks.
    #[must_use]
    pub fn block_light(&self, x: usize, z: usize, y: usize) -> u8 {
        nibble(&self.block_light, x, z, y)
    }

    /// Returns the height and id of the topmost non-air block of a column.
    #[must_use]
    pub fn top_block(&self, x: usize, z: usize) -> Option<(usize, u8)> {
        let start = block_index(x, z, 0)?;
        let column = self.blocks.get(start..start + CHUNK_HEIGHT)?;
        column
            .iter()
            .rposition(|&block| block != AIR)
            .and_then(|height| Some((height, *column.get(height)?)))
    }

    /// Returns a copy with all columns rotated by the given number of quarter turns.
    ///
    /// The column at `(x, z)` of a chunk turned once is taken from `(z, 15 - x)` of the original,
    /// matching [`crate::NorthDirection::rotate`] on block coordinates.
    #[must_use]
    pub fn rotated(&self, pos: ChunkPos, quarter_turns: u8) -> Self {
        let turns = quarter_turns % 4;
        Self {
            pos,
            timestamp: self.timestamp,
            blocks: rotate_columns(&self.blocks, CHUNK_HEIGHT, turns),
            data: rotate_columns(&self.data, CHUNK_HEIGHT / 2, turns),
            sky_light: rotate_columns(&self.sky_light, CHUNK_HEIGHT / 2, turns),
            block_light: rotate_columns(&self.block_light, CHUNK_HEIGHT / 2, turns),
            signs: self.signs.clone(),
        }
    }
}

fn check_len(array: &'static str, bytes: &[u8], expected: usize) -> Result<(), ChunkShapeError> {
    if bytes.len() == expected {
        Ok(())
    } else {
        Err(ChunkShapeError {
            array,
            expected,
            actual: bytes.len(),
        })
    }
}

fn block_index(x: usize, z: usize, y: usize) -> Option<usize> {
    (x < CHUNK_WIDTH && z < CHUNK_WIDTH && y < CHUNK_HEIGHT)
        .then(|| (x * CHUNK_WIDTH + z) * CHUNK_HEIGHT + y)
}

fn nibble(array: &[u8], x: usize, z: usize, y: usize) -> u8 {
    let Some(index) = block_index(x, z, y) else {
        return 0;
    };
    let byte = array.get(index / 2).copied().unwrap_or(0);
    if index % 2 == 0 { byte & 0x0f } else { byte >> 4 }
}

fn rotate_columns(array: &[u8], column_len: usize, turns: u8) -> Box<[u8]> {
    const LAST: usize = CHUNK_WIDTH - 1;

    if turns == 0 {
        return array.into();
    }
    let mut rotated = vec![0; array.len()];
    for (target, column) in rotated.chunks_exact_mut(column_len).enumerate() {
        let x = target / CHUNK_WIDTH;
        let z = target % CHUNK_WIDTH;
        let (source_x, source_z) = match turns {
            1 => (z, LAST - x),
            2 => (LAST - x, LAST - z),
            _ => (LAST - z, x),
        };
        let start = (source_x * CHUNK_WIDTH + source_z) * column_len;
        if let Some(source) = array.get(start..start + column_len) {
            column.copy_from_slice(source);
        }
    }
    rotated.into_boxed_slice()
}

#[cfg(test)]
mod tests {

    use super::*;

    fn chunk_with_marker(x: usize, z: usize) -> Chunk {
        let mut blocks = vec![AIR; BLOCK_COUNT];
        blocks[(x * CHUNK_WIDTH + z) * CHUNK_HEIGHT + 64] = 1;
        let mut sky_light = vec![0; NIBBLE_COUNT];
        sky_light[((x * CHUNK_WIDTH + z) * CHUNK_HEIGHT + 65) / 2] = 0xa0;
        Chunk::new(
            ChunkPos::ZERO,
            17,
            blocks.into(),
            vec![0; NIBBLE_COUNT].into(),
            sky_light.into(),
            vec![0; NIBBLE_COUNT].into(),
            Vec::new(),
        )
        .unwrap()
    }

    #[test]
    fn reject_wrong_shape() {
        let result = Chunk::new(
            ChunkPos::ZERO,
            0,
            vec![0; 10].into(),
            vec![0; NIBBLE_COUNT].into(),
            vec![0; NIBBLE_COUNT].into(),
            vec![0; NIBBLE_COUNT].into(),
            Vec::new(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn top_block_and_light() {
        let chunk = chunk_with_marker(3, 5);
        assert_eq!(Some((64, 1)), chunk.top_block(3, 5));
        assert_eq!(None, chunk.top_block(5, 3));
        assert_eq!(10, chunk.sky_light(3, 5, 65));
        assert_eq!(0, chunk.sky_light(3, 5, 64));
        assert_eq!(15, chunk.sky_light(3, 5, CHUNK_HEIGHT));
    }

    #[test]
    fn single_quarter_turn() {
        let chunk = chunk_with_marker(3, 5);
        let rotated = chunk.rotated(ChunkPos::new(-1, 0), 1);
        // (x, z) -> (15 - z, x)
        assert_eq!(Some((64, 1)), rotated.top_block(10, 3));
        assert_eq!(10, rotated.sky_light(10, 3, 65));
        assert_eq!(ChunkPos::new(-1, 0), rotated.pos());
        assert_eq!(17, rotated.timestamp());
    }

    #[test]
    fn half_turn() {
        let rotated = chunk_with_marker(0, 2).rotated(ChunkPos::ZERO, 2);
        assert_eq!(Some((64, 1)), rotated.top_block(15, 13));
    }

    #[test]
    fn full_turn_is_identity() {
        let chunk = chunk_with_marker(7, 1);
        let mut rotated = chunk.clone();
        for _ in 0..4 {
            rotated = rotated.rotated(ChunkPos::ZERO, 1);
        }
        assert_eq!(chunk.blocks, rotated.blocks);
        assert_eq!(chunk.sky_light, rotated.sky_light);
    }

    #[test]
    fn sign_text_skips_empty_lines() {
        let sign = Sign {
            pos: IVec3::new(1, 70, -3),
            lines: [
                "Home".to_owned(),
                String::new(),
                " sweet ".to_owned(),
                String::new(),
            ],
        };
        assert_eq!("Home\nsweet", sign.text());
    }
}
