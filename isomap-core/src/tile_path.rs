//! Addressing of tiles within a quadtree.

use std::fmt::{self, Display};

/// Number of children every interior tile has.
pub const QUADRANT_COUNT: u8 = 4;

/// The position of a tile within its quadtree, given as a sequence of quadrant digits.
///
/// Each digit selects one of the four children of the previous tile: `0` top-left, `1` top-right,
/// `2` bottom-left and `3` bottom-right. The root tile has an empty path; the length of the path
/// is the tile's depth.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TilePath(Vec<u8>);

impl TilePath {
    /// The path of the root tile.
    pub const ROOT: Self = Self(Vec::new());

    /// Creates a tile path from a list of quadrant digits.
    /// Returns `None` if any of the digits is not a valid quadrant.
    #[must_use]
    pub fn new(digits: impl Into<Vec<u8>>) -> Option<Self> {
        let digits = digits.into();
        digits
            .iter()
            .all(|&digit| digit < QUADRANT_COUNT)
            .then_some(Self(digits))
    }

    /// Returns the quadrant digits making up this path.
    #[must_use]
    pub fn digits(&self) -> &[u8] {
        &self.0
    }

    /// Returns the depth of this tile. The root has depth 0.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.0.len()
    }

    /// Check whether this is the path of the root tile.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the path of the given child of this tile.
    ///
    /// The quadrant is wrapped into the valid range.
    #[must_use]
    pub fn child(&self, quadrant: u8) -> Self {
        let mut digits = Vec::with_capacity(self.0.len() + 1);
        digits.extend_from_slice(&self.0);
        digits.push(quadrant % QUADRANT_COUNT);
        Self(digits)
    }

    /// Returns the paths of all four children in quadrant order.
    #[must_use]
    pub fn children(&self) -> [Self; QUADRANT_COUNT as usize] {
        [0, 1, 2, 3].map(|quadrant| self.child(quadrant))
    }

    /// Returns the path of the parent tile, or `None` for the root.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        let (_, parent) = self.0.split_last()?;
        Some(Self(parent.to_vec()))
    }

    /// Returns all paths at the given depth in lexicographic order.
    ///
    /// The sequence is produced lazily; there are `4^depth` of them.
    #[must_use]
    pub fn level(depth: usize) -> LevelPaths {
        LevelPaths {
            next: Some(vec![0; depth]),
        }
    }
}

impl Display for TilePath {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            return formatter.write_str("base");
        }
        for (index, digit) in self.0.iter().enumerate() {
            if index > 0 {
                formatter.write_str("/")?;
            }
            write!(formatter, "{digit}")?;
        }
        Ok(())
    }
}

/// Iterator over all tile paths of a single level, see [`TilePath::level`].
#[derive(Clone, Debug)]
pub struct LevelPaths {
    next: Option<Vec<u8>>,
}

impl Iterator for LevelPaths {
    type Item = TilePath;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next.take()?;

        // count up in base 4, starting at the last digit
        let mut successor = current.clone();
        let mut carry = true;
        for digit in successor.iter_mut().rev() {
            if *digit + 1 < QUADRANT_COUNT {
                *digit += 1;
                carry = false;
                break;
            }
            *digit = 0;
        }
        if !carry {
            self.next = Some(successor);
        }

        Some(TilePath(current))
    }
}
