//! Contains chunk, region and diagonal position primitives and conversions between them.

use std::fmt::{self, Display};

use glam::IVec2;

/// The position of a chunk, measured in chunk steps from the world's origin.
///
/// `x` runs along the world's X axis and `y` along the world's Z axis.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChunkPos(pub IVec2);

impl ChunkPos {
    /// Position of the chunk at the world's center
    pub const ZERO: Self = Self(IVec2::ZERO);

    /// Creates a chunk position from its two coordinates.
    #[must_use]
    pub const fn new(x: i32, y: i32) -> Self {
        Self(IVec2::new(x, y))
    }

    /// Returns the inner position vector.
    #[must_use]
    pub fn vec(self) -> IVec2 {
        self.0
    }

    /// Returns the position of the region which contains this chunk.
    #[must_use]
    pub const fn region(self) -> RegionPos {
        RegionPos::containing(self)
    }

    /// Returns the index of this chunk within its region.
    #[must_use]
    pub const fn local(self) -> LocalChunkPos {
        LocalChunkPos::for_chunk(self)
    }

    /// Converts this position into the diagonal tile-layout coordinates.
    #[must_use]
    pub fn diag(self) -> DiagPos {
        DiagPos::from(self)
    }
}

impl Display for ChunkPos {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "({}, {})", self.0.x, self.0.y)
    }
}

impl From<ChunkPos> for IVec2 {
    fn from(value: ChunkPos) -> Self {
        value.0
    }
}

/// The position of a region, measured in region steps from the world's origin.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RegionPos(pub IVec2);

impl RegionPos {
    /// number of bit shifts to perform in order to convert between chunk and region coordinates.
    pub const SIZE_BITS: u32 = 5;
    /// Number of chunks per region in each dimension.
    pub const SIZE: i32 = 1 << Self::SIZE_BITS;
    /// Mask selecting the bits of a chunk coordinate that make up its position within the region.
    pub const SIZE_MASK: i32 = Self::SIZE - 1;
    /// Number of chunks a single region is able to hold.
    #[expect(clippy::cast_sign_loss, reason = "the region size is positive")]
    pub const CHUNK_COUNT: usize = (Self::SIZE * Self::SIZE) as usize;

    /// Creates a region position from its two coordinates.
    #[must_use]
    pub const fn new(x: i32, y: i32) -> Self {
        Self(IVec2::new(x, y))
    }

    /// Converts a chunk position into that of the containing region.
    ///
    /// The arithmetic shift rounds towards negative infinity, so this is `floor(coord / 32)`.
    #[must_use]
    pub const fn containing(chunk: ChunkPos) -> Self {
        Self(IVec2 {
            x: chunk.0.x >> Self::SIZE_BITS,
            y: chunk.0.y >> Self::SIZE_BITS,
        })
    }

    /// Returns the position of the chunk at the region's lowest corner.
    #[must_use]
    pub fn min_chunk(self) -> ChunkPos {
        ChunkPos(self.0 << Self::SIZE_BITS)
    }

    /// Returns the position of the chunk at the region's highest corner.
    #[must_use]
    pub fn max_chunk(self) -> ChunkPos {
        ChunkPos((self.0 << Self::SIZE_BITS) + IVec2::splat(Self::SIZE_MASK))
    }

    /// Returns the absolute position of a chunk within this region.
    #[must_use]
    pub fn chunk(self, local: LocalChunkPos) -> ChunkPos {
        ChunkPos(self.min_chunk().0 + local.vec())
    }

    /// Check whether the given chunk is located within this region.
    #[must_use]
    pub fn contains(self, chunk: ChunkPos) -> bool {
        Self::containing(chunk) == self
    }
}

impl Display for RegionPos {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        // double brackets indicate that a region is bigger than a single chunk
        write!(formatter, "[[{}, {}]]", self.0.x, self.0.y)
    }
}

/// The index of a chunk within its region.
///
/// The index follows the order of the region file's header tables: `x + y * 32`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LocalChunkPos(u16);

impl LocalChunkPos {
    /// Converts a given chunk position into its index within the containing region.
    #[must_use]
    pub const fn for_chunk(chunk: ChunkPos) -> Self {
        #[expect(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            reason = "both coordinates are masked to five bits"
        )]
        let x = (chunk.0.x & RegionPos::SIZE_MASK) as u16;
        #[expect(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            reason = "both coordinates are masked to five bits"
        )]
        let y = (chunk.0.y & RegionPos::SIZE_MASK) as u16;
        Self(x | (y << RegionPos::SIZE_BITS))
    }

    /// Creates a local position from coordinates within `0..32`.
    /// Returns `None` if any of them is out of range.
    #[must_use]
    pub fn new(x: u8, y: u8) -> Option<Self> {
        let limit = u8::try_from(RegionPos::SIZE).ok()?;
        (x < limit && y < limit)
            .then(|| Self(u16::from(x) | (u16::from(y) << RegionPos::SIZE_BITS)))
    }

    /// Returns the index into the region header tables.
    #[must_use]
    pub fn index(self) -> usize {
        usize::from(self.0)
    }

    /// Returns the position relative to the region's lowest corner.
    #[must_use]
    pub fn vec(self) -> IVec2 {
        let mask = u16::try_from(RegionPos::SIZE_MASK).unwrap_or(u16::MAX);
        IVec2::new(
            i32::from(self.0 & mask),
            i32::from(self.0 >> RegionPos::SIZE_BITS),
        )
    }
}

/// A chunk's coordinates in the 45° rotated layout used to place chunks onto tiles.
///
/// Columns grow to the right of the image and are the sum of both chunk coordinates, rows grow
/// downwards and are their difference. Only cells where column and row share their parity map
/// back to a chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DiagPos {
    /// `chunk.x + chunk.y`
    pub column: i64,
    /// `chunk.y - chunk.x`
    pub row: i64,
}

impl DiagPos {
    /// Creates a diagonal position from its column and row.
    #[must_use]
    pub const fn new(column: i64, row: i64) -> Self {
        Self { column, row }
    }

    /// Converts back into chunk coordinates.
    ///
    /// Returns `None` for cells between chunks (column and row of different parity) and for
    /// positions outside the 32-bit chunk coordinate range.
    #[must_use]
    pub fn chunk(self) -> Option<ChunkPos> {
        let Self { column, row } = self;
        if (column - row).rem_euclid(2) != 0 {
            return None;
        }
        let x = i32::try_from((column - row) / 2).ok()?;
        let y = i32::try_from((column + row) / 2).ok()?;
        Some(ChunkPos::new(x, y))
    }
}

impl From<ChunkPos> for DiagPos {
    fn from(value: ChunkPos) -> Self {
        let x = i64::from(value.0.x);
        let y = i64::from(value.0.y);
        Self {
            column: x + y,
            row: y - x,
        }
    }
}

impl Display for DiagPos {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "<col {}, row {}>", self.column, self.row)
    }
}

/// An inclusive rectangle in diagonal coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DiagBounds {
    /// leftmost column
    pub min_column: i64,
    /// rightmost column
    pub max_column: i64,
    /// topmost row
    pub min_row: i64,
    /// bottommost row
    pub max_row: i64,
}

impl DiagBounds {
    /// Returns the bounds covering every chunk any of the given regions could hold.
    ///
    /// Returns `None` if there are no regions at all.
    pub fn for_regions(regions: impl IntoIterator<Item = RegionPos>) -> Option<Self> {
        let mut regions = regions.into_iter();
        let first = regions.next()?;
        let (min, max) = regions.fold((first.0, first.0), |(min, max), region| {
            (min.min(region.0), max.max(region.0))
        });

        let min_chunk = RegionPos(min).min_chunk().0;
        let max_chunk = RegionPos(max).max_chunk().0;
        let corners = [
            ChunkPos::new(min_chunk.x, min_chunk.y),
            ChunkPos::new(min_chunk.x, max_chunk.y),
            ChunkPos::new(max_chunk.x, min_chunk.y),
            ChunkPos::new(max_chunk.x, max_chunk.y),
        ];
        let mut bounds = Self::point(corners[0].diag());
        for corner in corners {
            bounds.include(corner.diag());
        }
        Some(bounds)
    }

    /// Creates bounds covering a single cell.
    #[must_use]
    pub const fn point(pos: DiagPos) -> Self {
        Self {
            min_column: pos.column,
            max_column: pos.column,
            min_row: pos.row,
            max_row: pos.row,
        }
    }

    /// Grows the bounds to include the given cell.
    pub fn include(&mut self, pos: DiagPos) {
        self.min_column = self.min_column.min(pos.column);
        self.max_column = self.max_column.max(pos.column);
        self.min_row = self.min_row.min(pos.row);
        self.max_row = self.max_row.max(pos.row);
    }

    /// Check whether the given cell lies within the bounds.
    #[must_use]
    pub fn contains(&self, pos: DiagPos) -> bool {
        (self.min_column..=self.max_column).contains(&pos.column)
            && (self.min_row..=self.max_row).contains(&pos.row)
    }

    /// Check whether these bounds lie completely within `other`.
    #[must_use]
    pub fn is_within(&self, other: &Self) -> bool {
        other.min_column <= self.min_column
            && self.max_column <= other.max_column
            && other.min_row <= self.min_row
            && self.max_row <= other.max_row
    }
}

impl Display for DiagBounds {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "columns {}..={}, rows {}..={}",
            self.min_column, self.max_column, self.min_row, self.max_row
        )
    }
}
