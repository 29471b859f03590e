//! A zoomable pyramid of tiles for one dimension and render mode.

use std::sync::Arc;

use anyhow::{Result, bail};
use flexstr::SharedStr;
use glam::IVec3;
use isomap_core::{TilePath, QUADRANT_COUNT};
use log::{debug, info, warn};

use crate::{
    RenderError,
    optimize::ImageOptimizer,
    poi::{PoiCollection, PoiEvent, PointOfInterest},
    region::RegionStore,
    tile_store::TileStore,
};

mod layout;
mod metadata;
mod tileset;

pub use layout::*;
pub use metadata::*;
pub use tileset::*;

/// A quadtree of tiles showing one dimension in one render mode.
///
/// The tree owns the tiles' metadata and keeps track of the points of interest. Everything the
/// workers need is available through its [`Tileset`].
pub struct TileQuadtree {
    tileset: Arc<Tileset>,
    regions: RegionStore,
    /// as last read from or written to the tile store
    metadata: Option<QuadtreeMetadata>,
    pois: PoiCollection,
}

impl TileQuadtree {
    /// Prepares a quadtree for the dimension behind `regions`.
    ///
    /// Unless a depth is given, the smallest depth showing the whole dimension is used.
    ///
    /// # Errors
    ///
    /// Fails if the map is too large, the requested depth exceeds [`MAX_TREE_DEPTH`], the stored
    /// metadata can't be read, the north direction conflicts with the existing tiles, or the
    /// optimizer programs are missing.
    pub fn new(
        tree: usize,
        regions: RegionStore,
        store: Arc<dyn TileStore>,
        mode: SharedStr,
        options: QuadtreeOptions,
    ) -> Result<Self> {
        let depth = match options.depth {
            Some(requested) if requested > MAX_TREE_DEPTH => {
                bail!(RenderError::DepthOutOfRange {
                    requested,
                    max: MAX_TREE_DEPTH
                })
            }
            Some(depth) => depth,
            None => required_depth(&regions.bounds())?,
        };
        let stored = QuadtreeMetadata::load(store.as_ref())?;
        check_north_direction(stored.as_ref(), regions.north(), options.force_render)?;
        let image = ImageSettings::resolve(stored.as_ref(), &options)?;
        let optimizer = ImageOptimizer::new(options.optimize_level)?;

        let pois = PoiCollection::new(
            stored
                .as_ref()
                .map(|metadata| metadata.points_of_interest.clone())
                .unwrap_or_default(),
        );
        let tileset = Tileset {
            tree,
            name: regions.name().clone(),
            mode,
            depth,
            store,
            image,
            force: options.force_render,
            region_list: options.region_list,
            optimizer,
        };
        debug!(
            "{tileset}: depth {depth} for bounds {bounds}",
            bounds = regions.bounds()
        );
        Ok(Self {
            tileset: Arc::new(tileset),
            regions,
            metadata: stored,
            pois,
        })
    }

    /// The shareable part of this tree.
    #[must_use]
    pub fn tileset(&self) -> &Arc<Tileset> {
        &self.tileset
    }

    /// The region store the tiles are rendered from.
    #[must_use]
    pub fn regions(&self) -> &RegionStore {
        &self.regions
    }

    #[must_use]
    pub fn tree(&self) -> usize {
        self.tileset.tree
    }

    /// Depth of the tree; leaves are at this level.
    #[must_use]
    pub fn depth(&self) -> u32 {
        self.tileset.depth
    }

    /// Depth of the tiles in the tile store before this render.
    #[must_use]
    pub fn stored_depth(&self) -> Option<u32> {
        self.metadata.as_ref().and_then(|metadata| metadata.depth)
    }

    #[must_use]
    pub fn pois(&self) -> &PoiCollection {
        &self.pois
    }

    /// Adds the world's spawn point to the points of interest.
    pub fn record_spawn(&mut self, position: IVec3) {
        self.pois.insert(PointOfInterest::spawn(position));
    }

    /// Applies an event reported by a worker.
    pub fn apply_event(&mut self, event: PoiEvent) {
        self.pois.apply(event);
    }

    /// Rearranges the stored tiles to match the tree's depth and persists the metadata.
    ///
    /// # Errors
    ///
    /// Fails if the tiles can't be moved or the metadata can't be written.
    pub fn pre_process(&mut self) -> Result<()> {
        let depth = self.depth();
        let store = self.tileset.store.as_ref();
        let format = self.tileset.image.format;
        if let Some(current) = self.stored_depth() {
            if current != depth {
                warn!("{}: the map has changed size; rearranging tiles", self.tileset);
            }
            if current < depth {
                info!("{}: increasing depth from {current} to {depth}", self.tileset);
                for _ in current..depth {
                    grow_tree(store, format)?;
                }
            } else if current > depth {
                info!("{}: decreasing depth from {current} to {depth}", self.tileset);
                for _ in depth..current {
                    shrink_tree(store, format)?;
                }
            }
            if current != depth {
                // the root shows a different area now and can't be judged by its age
                store.remove(&TilePath::ROOT, format)?;
            }
        }
        self.save_metadata().map(|_| ())
    }

    /// Returns the jobs rendering every leaf tile.
    pub fn leaf_jobs(&self) -> impl Iterator<Item = LeafJob> + Send + use<> {
        let tree = self.tree();
        let depth = self.depth();
        TilePath::level(depth as usize).map(move |path| LeafJob {
            tree,
            rect: TileRect::for_path(&path, depth),
            path,
        })
    }

    /// Returns the jobs composing every tile at the given level.
    pub fn composed_jobs(&self, level: u32) -> impl Iterator<Item = ComposedJob> + Send + use<> {
        let tree = self.tree();
        TilePath::level(level as usize).map(move |path| ComposedJob { tree, path })
    }

    /// Composes the root tile from its four children.
    ///
    /// # Errors
    ///
    /// Fails if the tile store fails.
    pub fn render_root(&mut self) -> Result<TileOutcome> {
        let outcome = self.tileset.render_composed_tile(&TilePath::ROOT)?;
        if outcome == TileOutcome::Written {
            self.apply_event(PoiEvent::Rendered(TilePath::ROOT));
        }
        Ok(outcome)
    }

    /// Writes the metadata if it differs from the stored version. Returns whether it was written.
    ///
    /// # Errors
    ///
    /// Fails if the metadata can't be written.
    pub fn save_metadata(&mut self) -> Result<bool> {
        let image = self.tileset.image;
        let current = QuadtreeMetadata {
            depth: Some(self.depth()),
            image_format: image.format,
            image_quality: image.quality,
            background_color: image.background,
            north_direction: self.regions.north(),
            points_of_interest: self.pois.points().to_vec(),
            ..QuadtreeMetadata::default()
        };
        if self.metadata.as_ref() == Some(&current) {
            return Ok(false);
        }
        current.save(self.tileset.store.as_ref())?;
        debug!("{}: saved metadata", self.tileset);
        self.metadata = Some(current);
        self.pois.mark_saved();
        Ok(true)
    }
}

/// Pushes every top-level quadrant one level down, towards the center of the grown tree.
///
/// # Errors
///
/// Fails if the tiles can't be moved.
pub fn grow_tree(store: &dyn TileStore, format: ImageFormat) -> Result<()> {
    for quadrant in 0..QUADRANT_COUNT {
        let from = TilePath::ROOT.child(quadrant);
        let to = from.child(QUADRANT_COUNT - 1 - quadrant);
        store.relocate(&from, &to, format)?;
    }
    Ok(())
}

/// Promotes the central grandchild of every top-level quadrant, dropping everything around it.
///
/// # Errors
///
/// Fails if the tiles can't be moved.
pub fn shrink_tree(store: &dyn TileStore, format: ImageFormat) -> Result<()> {
    for quadrant in 0..QUADRANT_COUNT {
        let to = TilePath::ROOT.child(quadrant);
        let from = to.child(QUADRANT_COUNT - 1 - quadrant);
        if store.exists(&from, format)? {
            store.relocate(&from, &to, format)?;
        } else {
            // nothing of the shrunk tree lies in this quadrant
            store.remove_subtree(&to, format)?;
        }
    }
    Ok(())
}
