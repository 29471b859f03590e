//! Rendering of individual tiles.

use std::{
    collections::HashSet,
    fmt::{self, Display},
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use anyhow::{Context, Result};
use flexstr::SharedStr;
use image::{
    DynamicImage, ExtendedColorType, ImageEncoder, Rgba, RgbaImage,
    codecs::{jpeg::JpegEncoder, png::PngEncoder},
    imageops::{self, FilterType},
};
use isomap_core::{ChunkPos, DiagPos, RegionPos, TilePath};
use log::{debug, trace, warn};

use super::{
    ImageFormat, ImageSettings,
    layout::{HALF_TILE_SIZE, TILE_SIZE, TileRect},
};
use crate::{
    optimize::ImageOptimizer,
    poi::{PoiEvent, PoiSender, PointOfInterest},
    region::{ChunkLookup, RegionStore},
    render_mode::ChunkRenderer,
    tile_store::TileStore,
};

/// What happened to a tile during a render job.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TileOutcome {
    /// the tile is up to date
    Skipped,
    /// a new image has been written
    Written,
    /// there's nothing to show anymore and the old image has been deleted
    Removed,
    /// there's nothing to show and there was no image
    Empty,
}

/// Render a leaf tile from the chunks below it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeafJob {
    pub tree: usize,
    pub path: TilePath,
    pub rect: TileRect,
}

/// Compose an interior tile from its four children.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComposedJob {
    pub tree: usize,
    pub path: TilePath,
}

/// The per-worker collaborators needed to render leaf tiles.
pub struct LeafContext<'ctx> {
    pub regions: &'ctx mut RegionStore,
    pub renderer: &'ctx dyn ChunkRenderer,
    pub events: &'ctx PoiSender,
}

/// The immutable part of a quadtree which is shared with all workers.
pub struct Tileset {
    pub(super) tree: usize,
    pub(super) name: SharedStr,
    pub(super) mode: SharedStr,
    pub(super) depth: u32,
    pub(super) store: Arc<dyn TileStore>,
    pub(super) image: ImageSettings,
    pub(super) force: bool,
    pub(super) region_list: Option<HashSet<RegionPos>>,
    pub(super) optimizer: Option<ImageOptimizer>,
}

impl Display for Tileset {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{} ({})", self.name, self.mode)
    }
}

fn seconds_since_epoch(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_secs())
}

impl Tileset {
    /// The stable index of the quadtree within its render run.
    #[must_use]
    pub fn tree(&self) -> usize {
        self.tree
    }

    #[must_use]
    pub fn name(&self) -> &SharedStr {
        &self.name
    }

    /// Name of the render mode the tiles are drawn with.
    #[must_use]
    pub fn mode(&self) -> &SharedStr {
        &self.mode
    }

    #[must_use]
    pub fn depth(&self) -> u32 {
        self.depth
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn TileStore> {
        &self.store
    }

    #[must_use]
    pub fn image_settings(&self) -> ImageSettings {
        self.image
    }

    fn format(&self) -> ImageFormat {
        self.image.format
    }

    fn canvas(&self) -> RgbaImage {
        RgbaImage::from_pixel(TILE_SIZE, TILE_SIZE, Rgba(self.image.background.0))
    }

    /// Renders a leaf tile from all chunks which are visible on it.
    ///
    /// The tile is skipped if it's newer than every chunk it shows, and deleted if there's no
    /// chunk left to show.
    ///
    /// # Errors
    ///
    /// Fails if the tile store fails, or if an event can't be delivered. Broken chunks are
    /// skipped.
    pub fn render_leaf_tile(
        &self,
        job: &LeafJob,
        context: &mut LeafContext<'_>,
    ) -> Result<TileOutcome> {
        let path = &job.path;
        let format = self.format();
        let modified = self.store.modified(path, format)?;

        let mut chunks: Vec<(DiagPos, ChunkPos)> = Vec::new();
        for (diag, chunk) in job.rect.candidates() {
            let region = RegionStore::region_coords_from_chunk(chunk);
            if !context.regions.has_region(region) {
                continue;
            }
            if context.regions.chunk_timestamp(chunk).is_some() {
                chunks.push((diag, chunk));
            }
        }

        if chunks.is_empty() {
            if self.store.remove(path, format)? {
                debug!("{self}: removed tile {path} without chunks");
                return Ok(TileOutcome::Removed);
            }
            return Ok(TileOutcome::Empty);
        }

        let rerender = self.force
            || modified.is_none_or(|tile_time| self.any_chunk_newer(&chunks, tile_time, context));
        if !rerender {
            trace!("{self}: tile {path} is up to date");
            return Ok(TileOutcome::Skipped);
        }

        let mut canvas = self.canvas();
        for &(diag, chunk) in &chunks {
            match context.regions.get_chunk(chunk) {
                ChunkLookup::Found(data) => {
                    let origin = job.rect.chunk_origin(diag);
                    if let Err(error) = context.renderer.render_chunk(&data, &mut canvas, origin) {
                        warn!("{self}: could not render chunk {chunk}: {error:#}");
                        continue;
                    }
                    context.events.send(self.tree, PoiEvent::RemovePoi(chunk))?;
                    for sign in data.signs() {
                        let poi = PointOfInterest::sign(chunk, sign);
                        context.events.send(self.tree, PoiEvent::NewPoi(poi))?;
                    }
                }
                // corrupt chunks have already been reported by the region store
                ChunkLookup::NotFound | ChunkLookup::Corrupt => {}
            }
        }

        self.save(path, canvas)?;
        Ok(TileOutcome::Written)
    }

    /// Check whether any chunk has been modified after the tile has been written.
    ///
    /// Only regions in the region list are considered, if there is one.
    fn any_chunk_newer(
        &self,
        chunks: &[(DiagPos, ChunkPos)],
        tile_time: SystemTime,
        context: &mut LeafContext<'_>,
    ) -> bool {
        let tile_seconds = seconds_since_epoch(tile_time);
        chunks.iter().any(|&(_, chunk)| {
            let region = RegionStore::region_coords_from_chunk(chunk);
            if self
                .region_list
                .as_ref()
                .is_some_and(|list| !list.contains(&region))
            {
                return false;
            }
            // the region file's age rules out most chunks without looking at them
            if context
                .regions
                .region_mtime(region)
                .is_none_or(|region_time| region_time <= tile_time)
            {
                return false;
            }
            context
                .regions
                .chunk_timestamp(chunk)
                .is_some_and(|timestamp| u64::from(timestamp) > tile_seconds)
        })
    }

    /// Renders an interior tile by scaling down and stitching its four children.
    ///
    /// Missing children leave their quadrant blank. If no child exists, the tile is deleted.
    ///
    /// # Errors
    ///
    /// Fails if the tile store fails. Unreadable children are skipped.
    pub fn render_composed_tile(&self, path: &TilePath) -> Result<TileOutcome> {
        let format = self.format();
        let modified = self.store.modified(path, format)?;

        let mut children = Vec::with_capacity(4);
        let mut rerender = self.force || modified.is_none();
        for (quadrant, child) in path.children().into_iter().enumerate() {
            if let Some(child_time) = self.store.modified(&child, format)? {
                if modified.is_some_and(|tile_time| child_time > tile_time) {
                    rerender = true;
                }
                children.push((quadrant, child));
            }
        }

        if children.is_empty() {
            if self.store.remove(path, format)? {
                debug!("{self}: removed tile {path} without children");
                return Ok(TileOutcome::Removed);
            }
            return Ok(TileOutcome::Empty);
        }
        if !rerender {
            trace!("{self}: tile {path} is up to date");
            return Ok(TileOutcome::Skipped);
        }

        let mut canvas = self.canvas();
        for (quadrant, child) in children {
            let image = match self.load_image(&child) {
                Ok(image) => image,
                Err(error) => {
                    warn!("{self}: could not load tile {child}; it may be corrupt: {error:#}");
                    continue;
                }
            };
            let scaled =
                imageops::resize(&image, HALF_TILE_SIZE, HALF_TILE_SIZE, FilterType::Lanczos3);
            let x = if quadrant & 1 == 0 { 0 } else { HALF_TILE_SIZE };
            let y = if quadrant & 2 == 0 { 0 } else { HALF_TILE_SIZE };
            // plain copy, the children already contain the background
            imageops::replace(&mut canvas, &scaled, i64::from(x), i64::from(y));
        }

        self.save(path, canvas)?;
        Ok(TileOutcome::Written)
    }

    fn load_image(&self, path: &TilePath) -> Result<RgbaImage> {
        let bytes = self.store.read(path, self.format())?;
        Ok(image::load_from_memory(&bytes)?.into_rgba8())
    }

    fn encode(&self, canvas: RgbaImage) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        match self.image.format {
            ImageFormat::Png => {
                PngEncoder::new(&mut bytes).write_image(
                    canvas.as_raw(),
                    canvas.width(),
                    canvas.height(),
                    ExtendedColorType::Rgba8,
                )?;
            }
            ImageFormat::Jpg => {
                let rgb = DynamicImage::ImageRgba8(canvas).into_rgb8();
                JpegEncoder::new_with_quality(&mut bytes, self.image.quality)
                    .encode_image(&rgb)?;
            }
        }
        Ok(bytes)
    }

    fn save(&self, path: &TilePath, canvas: RgbaImage) -> Result<()> {
        let format = self.format();
        let bytes = self
            .encode(canvas)
            .with_context(|| format!("encoding tile {path}"))?;
        self.store.write(path, format, &bytes)?;
        if let (Some(optimizer), ImageFormat::Png) = (&self.optimizer, format) {
            if let Some(local) = self.store.local_path(path, format) {
                optimizer.optimize(&local);
            }
        }
        trace!("{self}: wrote tile {path}");
        Ok(())
    }
}
