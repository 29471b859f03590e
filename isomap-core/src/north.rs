//! The rotation applied to the world before it is laid out onto tiles.

use std::{
    fmt::{self, Display},
    str::FromStr,
};

use glam::IVec2;
use serde::{Deserialize, Serialize};

/// Selects which corner of the rendered map the world's north points to.
///
/// All coordinates handed out by a region store are expressed in the rotated frame. The same
/// transform applies to region and chunk coordinates since it maps `-c - 1` onto whole cells.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NorthDirection {
    /// the unrotated layout
    #[default]
    LowerLeft,
    /// rotated by a quarter turn
    UpperLeft,
    /// rotated by a half turn
    UpperRight,
    /// rotated by three quarter turns
    LowerRight,
}

impl NorthDirection {
    /// All supported directions in order of their rotation count.
    pub const ALL: [Self; 4] = [
        Self::LowerLeft,
        Self::UpperLeft,
        Self::UpperRight,
        Self::LowerRight,
    ];

    /// Number of quarter turns the block columns of a chunk are rotated by.
    #[must_use]
    pub const fn rotations(self) -> u8 {
        match self {
            Self::LowerLeft => 0,
            Self::UpperLeft => 1,
            Self::UpperRight => 2,
            Self::LowerRight => 3,
        }
    }

    /// Maps raw (on-disk) coordinates into the rotated frame.
    #[must_use]
    pub const fn rotate(self, raw: IVec2) -> IVec2 {
        match self {
            Self::LowerLeft => raw,
            Self::UpperLeft => IVec2::new(-raw.y - 1, raw.x),
            Self::UpperRight => IVec2::new(-raw.x - 1, -raw.y - 1),
            Self::LowerRight => IVec2::new(raw.y, -raw.x - 1),
        }
    }

    /// Maps rotated coordinates back into the raw (on-disk) frame.
    #[must_use]
    pub const fn unrotate(self, rotated: IVec2) -> IVec2 {
        self.inverse().rotate(rotated)
    }

    /// The direction whose rotation undoes this one.
    #[must_use]
    pub const fn inverse(self) -> Self {
        match self {
            Self::LowerLeft => Self::LowerLeft,
            Self::UpperLeft => Self::LowerRight,
            Self::UpperRight => Self::UpperRight,
            Self::LowerRight => Self::UpperLeft,
        }
    }

    /// The name used on the command line and in stored metadata.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::LowerLeft => "lower-left",
            Self::UpperLeft => "upper-left",
            Self::UpperRight => "upper-right",
            Self::LowerRight => "lower-right",
        }
    }
}

impl Display for NorthDirection {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.name())
    }
}

/// Returned when parsing an unknown north direction name.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("unknown north direction '{0}', expected one of lower-left, upper-left, upper-right, lower-right")]
pub struct ParseNorthDirectionError(String);

impl FromStr for NorthDirection {
    type Err = ParseNorthDirectionError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|direction| direction.name() == name)
            .ok_or_else(|| ParseNorthDirectionError(name.to_owned()))
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn rotate_regions() {
        let raw = IVec2::new(3, -5);
        assert_eq!(IVec2::new(3, -5), NorthDirection::LowerLeft.rotate(raw));
        assert_eq!(IVec2::new(4, 3), NorthDirection::UpperLeft.rotate(raw));
        assert_eq!(IVec2::new(-4, 4), NorthDirection::UpperRight.rotate(raw));
        assert_eq!(IVec2::new(-5, -4), NorthDirection::LowerRight.rotate(raw));
    }

    #[test]
    fn unrotate_undoes_rotate() {
        for direction in NorthDirection::ALL {
            for x in -40..40 {
                for y in [-33, -1, 0, 7, 64] {
                    let raw = IVec2::new(x, y);
                    assert_eq!(raw, direction.unrotate(direction.rotate(raw)));
                }
            }
        }
    }

    #[test]
    fn quarter_turns_compose() {
        let raw = IVec2::new(11, -2);
        let once = NorthDirection::UpperLeft.rotate(raw);
        let twice = NorthDirection::UpperLeft.rotate(once);
        assert_eq!(NorthDirection::UpperRight.rotate(raw), twice);
        let thrice = NorthDirection::UpperLeft.rotate(twice);
        assert_eq!(NorthDirection::LowerRight.rotate(raw), thrice);
    }

    #[test]
    fn parse_names() {
        for direction in NorthDirection::ALL {
            assert_eq!(Ok(direction), direction.name().parse());
        }
        assert!("north".parse::<NorthDirection>().is_err());
    }
}
