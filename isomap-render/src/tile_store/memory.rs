use std::{
    collections::BTreeMap,
    sync::{Mutex, MutexGuard, PoisonError},
    time::SystemTime,
};

use anyhow::{Result, anyhow};
use isomap_core::TilePath;

use super::TileStore;
use crate::quadtree::ImageFormat;

struct StoredTile {
    format: ImageFormat,
    image: Vec<u8>,
    modified: SystemTime,
}

#[derive(Default)]
struct Content {
    tiles: BTreeMap<TilePath, StoredTile>,
    documents: BTreeMap<String, Vec<u8>>,
}

/// Keeps all tiles in memory. Used to exercise the tree logic without touching the disk.
///
/// Every tile holds at most one image; an image of a different format counts as absent.
#[derive(Default)]
pub struct MemoryTileStore {
    content: Mutex<Content>,
}

impl MemoryTileStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Content> {
        // every operation leaves the maps consistent, so a poisoned lock is still usable
        self.content.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Overrides the modification time of an existing tile.
    /// Returns whether the tile exists.
    pub fn set_modified(&self, tile: &TilePath, modified: SystemTime) -> bool {
        self.lock()
            .tiles
            .get_mut(tile)
            .map(|stored| stored.modified = modified)
            .is_some()
    }

    /// Returns all stored tiles with their content in path order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(TilePath, Vec<u8>)> {
        self.lock()
            .tiles
            .iter()
            .map(|(path, stored)| (path.clone(), stored.image.clone()))
            .collect()
    }

    /// Number of stored tile images.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().tiles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().tiles.is_empty()
    }
}

fn within(tile: &TilePath, subtree: &TilePath) -> bool {
    tile.digits().starts_with(subtree.digits())
}

impl TileStore for MemoryTileStore {
    fn modified(&self, tile: &TilePath, format: ImageFormat) -> Result<Option<SystemTime>> {
        Ok(self
            .lock()
            .tiles
            .get(tile)
            .filter(|stored| stored.format == format)
            .map(|stored| stored.modified))
    }

    fn read(&self, tile: &TilePath, format: ImageFormat) -> Result<Vec<u8>> {
        self.lock()
            .tiles
            .get(tile)
            .filter(|stored| stored.format == format)
            .map(|stored| stored.image.clone())
            .ok_or_else(|| anyhow!("tile {tile} does not exist"))
    }

    fn write(&self, tile: &TilePath, format: ImageFormat, image: &[u8]) -> Result<()> {
        self.lock().tiles.insert(
            tile.clone(),
            StoredTile {
                format,
                image: image.to_vec(),
                modified: SystemTime::now(),
            },
        );
        Ok(())
    }

    fn remove(&self, tile: &TilePath, format: ImageFormat) -> Result<bool> {
        let mut content = self.lock();
        if content
            .tiles
            .get(tile)
            .is_some_and(|stored| stored.format == format)
        {
            content.tiles.remove(tile);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn remove_subtree(&self, tile: &TilePath, _format: ImageFormat) -> Result<()> {
        self.lock().tiles.retain(|path, _| !within(path, tile));
        Ok(())
    }

    fn exists(&self, tile: &TilePath, _format: ImageFormat) -> Result<bool> {
        Ok(self.lock().tiles.keys().any(|path| within(path, tile)))
    }

    fn relocate(&self, from: &TilePath, to: &TilePath, _format: ImageFormat) -> Result<()> {
        let mut content = self.lock();
        let moved = content
            .tiles
            .keys()
            .filter(|path| within(path, from))
            .cloned()
            .collect::<Vec<_>>();
        if moved.is_empty() {
            return Ok(());
        }
        let mut staged = Vec::with_capacity(moved.len());
        for path in moved {
            let Some(stored) = content.tiles.remove(&path) else {
                continue;
            };
            let mut digits = to.digits().to_vec();
            digits.extend_from_slice(path.digits().get(from.depth()..).unwrap_or_default());
            let target = TilePath::new(digits).ok_or_else(|| anyhow!("invalid tile path"))?;
            staged.push((target, stored));
        }
        content.tiles.retain(|path, _| !within(path, to));
        content.tiles.extend(staged);
        Ok(())
    }

    fn load_document(&self, name: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.lock().documents.get(name).cloned())
    }

    fn store_document(&self, name: &str, content: &[u8]) -> Result<()> {
        self.lock()
            .documents
            .insert(name.to_owned(), content.to_vec());
        Ok(())
    }
}
