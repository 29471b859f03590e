//! The persistent description of a quadtree and the settings derived from it.

use std::{
    collections::HashSet,
    fmt::{self, Display},
    str::{FromStr, from_utf8},
};

use anyhow::{Context, Result, bail};
use isomap_core::{NorthDirection, RegionPos};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::{RenderError, poi::PointOfInterest, tile_store::TileStore};

/// Name of the metadata document stored in the root of every quadtree.
pub const METADATA_FILE_NAME: &str = "isomap.json";
/// Layout version of the metadata document.
pub const METADATA_VERSION: u32 = 1;

pub const DEFAULT_IMAGE_QUALITY: u8 = 95;
pub const DEFAULT_BACKGROUND_COLOR: BackgroundColor = BackgroundColor([0x1a, 0x1a, 0x1a, 0]);

/// Encoding of the tile images.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    /// lossless, keeps transparency
    #[default]
    Png,
    /// lossy, honours the image quality
    Jpg,
}

impl ImageFormat {
    /// File extension used for images of this format.
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpg => "jpg",
        }
    }
}

impl Display for ImageFormat {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.extension())
    }
}

impl FromStr for ImageFormat {
    type Err = anyhow::Error;

    fn from_str(text: &str) -> Result<Self> {
        match text.to_ascii_lowercase().as_str() {
            "png" => Ok(Self::Png),
            "jpg" | "jpeg" => Ok(Self::Jpg),
            _ => bail!("unsupported image format '{text}' (expected png or jpg)"),
        }
    }
}

/// An RGBA color written as `#rrggbb` or `#rrggbbaa`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BackgroundColor(pub [u8; 4]);

impl FromStr for BackgroundColor {
    type Err = anyhow::Error;

    fn from_str(text: &str) -> Result<Self> {
        let Some(hex) = text.strip_prefix('#') else {
            bail!("color '{text}' must start with '#'");
        };
        if !matches!(hex.len(), 6 | 8) || !hex.is_ascii() {
            bail!("color '{text}' must have the form #rrggbb or #rrggbbaa");
        }
        let mut rgba = [0, 0, 0, 0xff];
        for (channel, pair) in rgba.iter_mut().zip(hex.as_bytes().chunks_exact(2)) {
            let pair = from_utf8(pair)?;
            *channel = u8::from_str_radix(pair, 16)
                .with_context(|| format!("invalid color component in '{text}'"))?;
        }
        Ok(Self(rgba))
    }
}

impl TryFrom<String> for BackgroundColor {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<BackgroundColor> for String {
    fn from(value: BackgroundColor) -> Self {
        value.to_string()
    }
}

impl Display for BackgroundColor {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [red, green, blue, alpha] = self.0;
        write!(formatter, "#{red:02x}{green:02x}{blue:02x}{alpha:02x}")
    }
}

/// The document persisted next to the tiles of a quadtree.
///
/// Every field has a default so that documents written by older versions stay readable.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuadtreeMetadata {
    pub version: u32,
    /// depth of the tiles currently on disk; `None` before the first render
    pub depth: Option<u32>,
    pub image_format: ImageFormat,
    pub image_quality: u8,
    pub background_color: BackgroundColor,
    pub north_direction: NorthDirection,
    pub points_of_interest: Vec<PointOfInterest>,
}

impl Default for QuadtreeMetadata {
    fn default() -> Self {
        Self {
            version: METADATA_VERSION,
            depth: None,
            image_format: ImageFormat::default(),
            image_quality: DEFAULT_IMAGE_QUALITY,
            background_color: DEFAULT_BACKGROUND_COLOR,
            north_direction: NorthDirection::default(),
            points_of_interest: Vec::new(),
        }
    }
}

impl QuadtreeMetadata {
    /// Reads the metadata document of a quadtree. Returns `None` if there is none yet.
    ///
    /// # Errors
    ///
    /// Fails if the document exists but can't be read or parsed.
    pub fn load(store: &dyn TileStore) -> Result<Option<Self>> {
        let Some(content) = store.load_document(METADATA_FILE_NAME)? else {
            debug!("no {METADATA_FILE_NAME} found; starting a new map");
            return Ok(None);
        };
        let metadata: Self = serde_json::from_slice(&content)
            .with_context(|| format!("parsing {METADATA_FILE_NAME}"))?;
        if metadata.version > METADATA_VERSION {
            bail!(
                "{METADATA_FILE_NAME} has version {} which is newer than the supported version {METADATA_VERSION}",
                metadata.version
            );
        }
        Ok(Some(metadata))
    }

    /// Atomically replaces the metadata document of a quadtree.
    ///
    /// # Errors
    ///
    /// Fails if the document can't be written. The previous version stays in place in that case.
    pub fn save(&self, store: &dyn TileStore) -> Result<()> {
        let content = serde_json::to_vec_pretty(self)?;
        store.store_document(METADATA_FILE_NAME, &content)
    }
}

/// Explicit settings for a quadtree which take precedence over the stored metadata.
#[derive(Clone, Debug, Default)]
pub struct QuadtreeOptions {
    /// fixed depth instead of the minimal depth holding the whole map
    pub depth: Option<u32>,
    pub image_format: Option<ImageFormat>,
    pub image_quality: Option<u8>,
    pub background_color: Option<BackgroundColor>,
    /// renders every tile regardless of its age
    pub force_render: bool,
    /// only changes within these regions trigger a re-render
    pub region_list: Option<HashSet<RegionPos>>,
    /// optimisation level passed to the image optimizer; 0 disables it
    pub optimize_level: u8,
}

/// The effective image settings of a quadtree.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageSettings {
    pub format: ImageFormat,
    pub quality: u8,
    pub background: BackgroundColor,
}

impl ImageSettings {
    /// Merges defaults, the stored metadata and the explicit options, in ascending precedence.
    ///
    /// # Errors
    ///
    /// Fails if the resulting image quality is out of range.
    pub fn resolve(stored: Option<&QuadtreeMetadata>, options: &QuadtreeOptions) -> Result<Self> {
        let defaults = QuadtreeMetadata::default();
        let base = stored.unwrap_or(&defaults);
        let settings = Self {
            format: options.image_format.unwrap_or(base.image_format),
            quality: options.image_quality.unwrap_or(base.image_quality),
            background: options.background_color.unwrap_or(base.background_color),
        };
        if settings.quality > 100 {
            bail!("image quality {} is out of range 0..=100", settings.quality);
        }
        Ok(settings)
    }
}

/// Fails if tiles on disk were rendered for a different north direction, unless rendering is
/// forced anyway.
///
/// # Errors
///
/// Returns [`RenderError::NorthDirectionConflict`] for a conflicting, non-forced render.
pub fn check_north_direction(
    stored: Option<&QuadtreeMetadata>,
    requested: NorthDirection,
    force: bool,
) -> Result<()> {
    let Some(stored) = stored else {
        return Ok(());
    };
    // an empty tree has nothing to conflict with
    if stored.depth.is_none() || stored.north_direction == requested || force {
        return Ok(());
    }
    bail!(RenderError::NorthDirectionConflict {
        stored: stored.north_direction,
        requested,
    });
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::tile_store::MemoryTileStore;

    #[test]
    fn parse_colors() {
        assert_eq!(
            BackgroundColor([0x1a, 0x2b, 0x3c, 0xff]),
            "#1a2b3c".parse().unwrap()
        );
        assert_eq!(
            BackgroundColor([0x1a, 0x1a, 0x1a, 0]),
            "#1A1A1A00".parse().unwrap()
        );
        for invalid in ["1a2b3c", "#1a2b3", "#1a2b3c4d5e", "#gggggg", "#äöü"] {
            assert!(invalid.parse::<BackgroundColor>().is_err(), "{invalid}");
        }
        assert_eq!("#1a1a1a00", DEFAULT_BACKGROUND_COLOR.to_string());
    }

    #[test]
    fn parse_formats() {
        assert_eq!(ImageFormat::Png, "png".parse().unwrap());
        assert_eq!(ImageFormat::Jpg, "JPEG".parse().unwrap());
        assert!("gif".parse::<ImageFormat>().is_err());
    }

    #[test]
    fn document_round_trip() {
        let store = MemoryTileStore::new();
        assert_eq!(None, QuadtreeMetadata::load(&store).unwrap());

        let metadata = QuadtreeMetadata {
            depth: Some(5),
            image_format: ImageFormat::Jpg,
            north_direction: NorthDirection::UpperRight,
            ..QuadtreeMetadata::default()
        };
        metadata.save(&store).unwrap();
        assert_eq!(Some(metadata), QuadtreeMetadata::load(&store).unwrap());
    }

    #[test]
    fn missing_fields_take_defaults() {
        let store = MemoryTileStore::new();
        store
            .store_document(METADATA_FILE_NAME, br#"{"depth": 3, "image_quality": 80}"#)
            .unwrap();
        let metadata = QuadtreeMetadata::load(&store).unwrap().unwrap();
        assert_eq!(Some(3), metadata.depth);
        assert_eq!(80, metadata.image_quality);
        assert_eq!(ImageFormat::Png, metadata.image_format);
        assert_eq!(DEFAULT_BACKGROUND_COLOR, metadata.background_color);
    }

    #[test]
    fn settings_precedence() {
        let options = QuadtreeOptions::default();
        assert_eq!(
            ImageSettings {
                format: ImageFormat::Png,
                quality: DEFAULT_IMAGE_QUALITY,
                background: DEFAULT_BACKGROUND_COLOR,
            },
            ImageSettings::resolve(None, &options).unwrap()
        );

        let stored = QuadtreeMetadata {
            image_format: ImageFormat::Jpg,
            image_quality: 70,
            ..QuadtreeMetadata::default()
        };
        let resolved = ImageSettings::resolve(Some(&stored), &options).unwrap();
        assert_eq!((ImageFormat::Jpg, 70), (resolved.format, resolved.quality));

        let options = QuadtreeOptions {
            image_quality: Some(50),
            ..QuadtreeOptions::default()
        };
        let resolved = ImageSettings::resolve(Some(&stored), &options).unwrap();
        assert_eq!((ImageFormat::Jpg, 50), (resolved.format, resolved.quality));

        let options = QuadtreeOptions {
            image_quality: Some(101),
            ..QuadtreeOptions::default()
        };
        assert!(ImageSettings::resolve(None, &options).is_err());
    }

    #[test]
    fn north_direction_conflicts() {
        let stored = QuadtreeMetadata {
            depth: Some(2),
            north_direction: NorthDirection::UpperLeft,
            ..QuadtreeMetadata::default()
        };
        let requested = NorthDirection::LowerLeft;
        let error = check_north_direction(Some(&stored), requested, false).unwrap_err();
        assert!(matches!(
            error.downcast_ref::<RenderError>(),
            Some(RenderError::NorthDirectionConflict { .. })
        ));
        check_north_direction(Some(&stored), requested, true).unwrap();
        check_north_direction(None, requested, false).unwrap();
        check_north_direction(Some(&stored), NorthDirection::UpperLeft, false).unwrap();
    }
}
