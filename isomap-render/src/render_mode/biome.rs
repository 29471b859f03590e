use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
};

use anyhow::Result;
use image::RgbaImage;
use log::{info, warn};

use crate::RenderError;

pub const GRASS_COLOR_FILE: &str = "grasscolor.png";
pub const FOLIAGE_COLOR_FILE: &str = "foliagecolor.png";

/// Climate used to pick colors when no per-column biome is known.
const DEFAULT_TEMPERATURE: f32 = 0.8;
const DEFAULT_RAINFALL: f32 = 0.4;

/// Color lookup tables for plants, indexed by temperature and rainfall.
#[derive(Clone, Debug)]
pub struct BiomeColors {
    grass: RgbaImage,
    foliage: RgbaImage,
}

impl BiomeColors {
    /// Loads both color tables from a texture directory.
    ///
    /// # Errors
    ///
    /// Fails with [`RenderError::MissingColorTable`] if either table can't be loaded.
    pub fn load(textures: &Path) -> Result<Self> {
        let load_table = |name: &str| -> Result<RgbaImage> {
            let path = textures.join(name);
            match image::open(&path) {
                Ok(table) => Ok(table.into_rgba8()),
                Err(error) => {
                    warn!("could not load {}: {error}", path.display());
                    Err(RenderError::MissingColorTable(path).into())
                }
            }
        };
        Ok(Self {
            grass: load_table(GRASS_COLOR_FILE)?,
            foliage: load_table(FOLIAGE_COLOR_FILE)?,
        })
    }

    #[must_use]
    pub fn grass(&self) -> [u8; 3] {
        lookup(&self.grass, DEFAULT_TEMPERATURE, DEFAULT_RAINFALL)
    }

    #[must_use]
    pub fn foliage(&self) -> [u8; 3] {
        lookup(&self.foliage, DEFAULT_TEMPERATURE, DEFAULT_RAINFALL)
    }
}

/// Picks a color from a triangular climate table.
fn lookup(table: &RgbaImage, temperature: f32, rainfall: f32) -> [u8; 3] {
    let temperature = temperature.clamp(0.0, 1.0);
    let rainfall = rainfall.clamp(0.0, 1.0) * temperature;
    let scale = |value: f32, size: u32| {
        let max = size.saturating_sub(1);
        #[expect(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            clippy::cast_precision_loss,
            reason = "table sizes are small and the value is clamped to 0..=1"
        )]
        let index = ((1.0 - value) * max as f32).round() as u32;
        index.min(max)
    };
    table
        .get_pixel_checked(
            scale(temperature, table.width()),
            scale(rainfall, table.height()),
        )
        .map_or([0x7f, 0xb2, 0x38], |pixel| [pixel.0[0], pixel.0[1], pixel.0[2]])
}

/// Loads the color tables at most once and shares them between all workers.
#[derive(Debug)]
pub struct BiomeColorCache {
    textures: PathBuf,
    loaded: Mutex<Option<Arc<BiomeColors>>>,
}

impl BiomeColorCache {
    #[must_use]
    pub fn new(textures: impl Into<PathBuf>) -> Self {
        Self {
            textures: textures.into(),
            loaded: Mutex::new(None),
        }
    }

    /// Returns the color tables, loading them on first use.
    ///
    /// # Errors
    ///
    /// Fails if the tables can't be loaded. A later call will try again.
    pub fn get(&self) -> Result<Arc<BiomeColors>> {
        let mut loaded = self.loaded.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(colors) = loaded.as_ref() {
            return Ok(Arc::clone(colors));
        }
        info!("loading biome colors from {}", self.textures.display());
        let colors = Arc::new(BiomeColors::load(&self.textures)?);
        *loaded = Some(Arc::clone(&colors));
        Ok(colors)
    }
}
