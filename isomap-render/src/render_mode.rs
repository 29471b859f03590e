//! Render modes and the interface to the chunk renderer.

use std::collections::BTreeMap;

use anyhow::{Context, Result, bail};
use flexstr::SharedStr;
use glam::I64Vec2;
use image::RgbaImage;
use isomap_core::Chunk;
use log::debug;
use serde::Deserialize;

use crate::RenderError;

mod biome;
mod reference;

pub use biome::{BiomeColorCache, BiomeColors, FOLIAGE_COLOR_FILE, GRASS_COLOR_FILE};
pub use reference::ReferenceRenderer;

/// Draws a single chunk onto a tile.
pub trait ChunkRenderer: Send {
    /// Draws the chunk with the top left corner of its image at `origin`.
    /// Parts outside the canvas are clipped.
    ///
    /// # Errors
    ///
    /// Fails if the chunk's data can't be drawn; the caller skips the chunk in that case.
    fn render_chunk(&self, chunk: &Chunk, canvas: &mut RgbaImage, origin: I64Vec2) -> Result<()>;
}

/// Parameters controlling how a chunk is drawn.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RenderModeOptions {
    /// scale applied to the sky light, 1.0 is daylight
    pub brightness: f32,
    /// shade blocks by the light level above them
    pub lighting: bool,
    /// color grass and leaves using the biome color tables
    pub biome_tint: bool,
}

impl Default for RenderModeOptions {
    fn default() -> Self {
        Self {
            brightness: 1.0,
            lighting: false,
            biome_tint: true,
        }
    }
}

/// A named set of render options.
#[derive(Clone, Debug)]
pub struct RenderMode {
    name: SharedStr,
    /// the mode this one has been derived from
    parent: Option<SharedStr>,
    description: String,
    options: RenderModeOptions,
}

impl RenderMode {
    #[must_use]
    pub fn name(&self) -> &SharedStr {
        &self.name
    }

    #[must_use]
    pub fn parent(&self) -> Option<&SharedStr> {
        self.parent.as_ref()
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    #[must_use]
    pub fn options(&self) -> RenderModeOptions {
        self.options
    }
}

/// Definition of a user supplied render mode, as read from a JSON document.
///
/// ```json
/// { "dusk": { "parent": "lighting", "brightness": 0.7 } }
/// ```
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CustomRenderMode {
    pub parent: String,
    #[serde(default)]
    pub description: Option<String>,
    pub brightness: Option<f32>,
    pub lighting: Option<bool>,
    pub biome_tint: Option<bool>,
}

/// All render modes known to a render run.
#[derive(Clone, Debug)]
pub struct RenderModeTable {
    modes: Vec<RenderMode>,
}

impl Default for RenderModeTable {
    fn default() -> Self {
        let builtin = |name, description: &str, options| RenderMode {
            name: SharedStr::from_borrowed(name),
            parent: None,
            description: description.to_owned(),
            options,
        };
        Self {
            modes: vec![
                builtin("normal", "daylight without shading", RenderModeOptions::default()),
                builtin(
                    "lighting",
                    "daylight with shading from sky and block light",
                    RenderModeOptions {
                        lighting: true,
                        ..RenderModeOptions::default()
                    },
                ),
                builtin(
                    "night",
                    "night time, only lit by block light",
                    RenderModeOptions {
                        brightness: 0.45,
                        lighting: true,
                        ..RenderModeOptions::default()
                    },
                ),
            ],
        }
    }
}

impl RenderModeTable {
    /// Creates a table holding the built-in modes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the named mode.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&RenderMode> {
        self.modes.iter().find(|mode| &*mode.name == name)
    }

    /// Returns the named mode.
    ///
    /// # Errors
    ///
    /// Fails with [`RenderError::UnknownRenderMode`] if there's no such mode.
    pub fn resolve(&self, name: &str) -> Result<&RenderMode> {
        self.get(name)
            .ok_or_else(|| RenderError::UnknownRenderMode(name.to_owned().into()).into())
    }

    pub fn iter(&self) -> impl Iterator<Item = &RenderMode> {
        self.modes.iter()
    }

    /// Returns the names of the mode and of all modes it has been derived from, starting with
    /// the mode itself.
    #[must_use]
    pub fn inheritance(&self, name: &str) -> Vec<SharedStr> {
        let mut chain = Vec::new();
        let mut current = self.get(name);
        while let Some(mode) = current {
            chain.push(mode.name.clone());
            current = mode.parent.as_deref().and_then(|parent| self.get(parent));
        }
        chain
    }

    /// Adds a mode derived from an existing one.
    ///
    /// # Errors
    ///
    /// Fails if the name is taken, the parent is unknown or the brightness is not positive.
    pub fn add_custom(&mut self, name: &str, custom: &CustomRenderMode) -> Result<()> {
        if self.get(name).is_some() {
            bail!("render mode '{name}' is already defined");
        }
        let parent = self.resolve(&custom.parent)?;
        let mut options = parent.options;
        if let Some(brightness) = custom.brightness {
            if !(brightness.is_finite() && brightness > 0.0) {
                bail!("brightness of render mode '{name}' must be positive");
            }
            options.brightness = brightness;
        }
        options.lighting = custom.lighting.unwrap_or(options.lighting);
        options.biome_tint = custom.biome_tint.unwrap_or(options.biome_tint);

        let mode = RenderMode {
            name: name.to_owned().into(),
            parent: Some(parent.name.clone()),
            description: custom
                .description
                .clone()
                .unwrap_or_else(|| format!("derived from {}", parent.name)),
            options,
        };
        debug!("adding render mode '{name}' derived from '{}'", custom.parent);
        self.modes.push(mode);
        Ok(())
    }

    /// Adds all modes of a JSON document mapping mode names to their definitions.
    /// Modes may derive from modes defined earlier in the same document.
    ///
    /// # Errors
    ///
    /// Fails if the document is malformed or any of its modes is invalid.
    pub fn load_custom(&mut self, json: &str) -> Result<()> {
        let customs: BTreeMap<String, CustomRenderMode> =
            serde_json::from_str(json).context("parsing custom render modes")?;
        let mut pending = customs.into_iter().collect::<Vec<_>>();
        // resolve in dependency order, independent of the document's key order
        while !pending.is_empty() {
            let before = pending.len();
            let mut remaining = Vec::new();
            for (name, custom) in pending {
                if self.get(&custom.parent).is_some() {
                    self.add_custom(&name, &custom)?;
                } else {
                    remaining.push((name, custom));
                }
            }
            if remaining.len() == before {
                let (name, custom) = remaining.swap_remove(0);
                bail!(
                    "render mode '{name}' derives from unknown mode '{}'",
                    custom.parent
                );
            }
            pending = remaining;
        }
        Ok(())
    }
}
