use std::{
    fs, io,
    path::{Path, PathBuf},
    time::SystemTime,
};

use anyhow::{Context, Result};
use isomap_core::TilePath;
use log::{trace, warn};

use super::TileStore;
use crate::quadtree::ImageFormat;

const ROOT_TILE_NAME: &str = "base";
/// Parks a subtree while it is being relocated.
const STAGING_NAME: &str = ".relocating";

/// Stores tiles as image files in a directory tree.
///
/// The tile `[d0, d1, ..., dn]` is stored as `d0/d1/.../dn.<ext>`, the root tile as `base.<ext>`.
/// The subtree of a tile lives in the directory named like the tile's image without extension.
#[derive(Clone, Debug)]
pub struct FsTileStore {
    root: PathBuf,
}

impl FsTileStore {
    /// Creates a store rooted at the given directory. The directory is created on demand.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the image file of a tile.
    #[must_use]
    pub fn image_path(&self, tile: &TilePath, format: ImageFormat) -> PathBuf {
        let mut path = self.subtree_path(tile);
        if tile.is_root() {
            path.push(ROOT_TILE_NAME);
        }
        path.set_extension(format.extension());
        path
    }

    /// Returns the directory holding a tile's subtree.
    #[must_use]
    pub fn subtree_path(&self, tile: &TilePath) -> PathBuf {
        let mut path = self.root.clone();
        for digit in tile.digits() {
            path.push(digit.to_string());
        }
        path
    }

    fn staging_paths(&self, format: ImageFormat) -> (PathBuf, PathBuf) {
        let subtree = self.root.join(STAGING_NAME);
        let mut image = subtree.clone();
        image.set_extension(format.extension());
        (image, subtree)
    }

    /// Writes a file next to its destination first and renames it into place, so an interrupted
    /// write never leaves a truncated file behind.
    fn replace_file(path: &Path, content: &[u8]) -> Result<()> {
        let mut temp_path = path.as_os_str().to_owned();
        temp_path.push(".tmp");
        let temp_path = PathBuf::from(temp_path);

        let result = fs::write(&temp_path, content)
            .and_then(|()| fs::rename(&temp_path, path))
            .with_context(|| format!("writing {}", path.display()));
        if result.is_err() {
            if let Err(error) = fs::remove_file(&temp_path) {
                if error.kind() != io::ErrorKind::NotFound {
                    warn!("could not remove {}: {error}", temp_path.display());
                }
            }
        }
        result
    }

    /// Moves an image and a subtree to their new locations. Missing sources are skipped.
    fn move_pair(from: (&Path, &Path), to: (&Path, &Path)) -> Result<()> {
        for (source, target) in [(from.0, to.0), (from.1, to.1)] {
            if !source.exists() {
                continue;
            }
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("creating directory {}", parent.display()))?;
            }
            fs::rename(source, target).with_context(|| {
                format!("moving {} to {}", source.display(), target.display())
            })?;
        }
        Ok(())
    }
}

impl TileStore for FsTileStore {
    fn modified(&self, tile: &TilePath, format: ImageFormat) -> Result<Option<SystemTime>> {
        let path = self.image_path(tile, format);
        match fs::metadata(&path) {
            Ok(metadata) => Ok(Some(metadata.modified()?)),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error).with_context(|| format!("inspecting {}", path.display())),
        }
    }

    fn read(&self, tile: &TilePath, format: ImageFormat) -> Result<Vec<u8>> {
        let path = self.image_path(tile, format);
        fs::read(&path).with_context(|| format!("reading tile {}", path.display()))
    }

    fn write(&self, tile: &TilePath, format: ImageFormat, image: &[u8]) -> Result<()> {
        let path = self.image_path(tile, format);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating directory {}", parent.display()))?;
        }
        Self::replace_file(&path, image)
    }

    fn remove(&self, tile: &TilePath, format: ImageFormat) -> Result<bool> {
        let path = self.image_path(tile, format);
        match fs::remove_file(&path) {
            Ok(()) => {
                trace!("removed tile {}", path.display());
                Ok(true)
            }
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(error) => Err(error).with_context(|| format!("removing tile {}", path.display())),
        }
    }

    fn remove_subtree(&self, tile: &TilePath, format: ImageFormat) -> Result<()> {
        self.remove(tile, format)?;
        if tile.is_root() {
            // the root's subtree is the store itself; only drop the quadrants
            for child in tile.children() {
                self.remove_subtree(&child, format)?;
            }
            return Ok(());
        }
        let subtree = self.subtree_path(tile);
        match fs::remove_dir_all(&subtree) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(error) => {
                Err(error).with_context(|| format!("removing directory {}", subtree.display()))
            }
        }
    }

    fn exists(&self, tile: &TilePath, format: ImageFormat) -> Result<bool> {
        Ok(self.image_path(tile, format).exists() || self.subtree_path(tile).is_dir())
    }

    fn relocate(&self, from: &TilePath, to: &TilePath, format: ImageFormat) -> Result<()> {
        if !self.exists(from, format)? {
            return Ok(());
        }
        let staging = self.staging_paths(format);
        if staging.0.exists() || staging.1.exists() {
            warn!("discarding leftovers of an interrupted relocation in {}", self.root.display());
            if staging.0.exists() {
                fs::remove_file(&staging.0)?;
            }
            if staging.1.exists() {
                fs::remove_dir_all(&staging.1)?;
            }
        }

        let source = (self.image_path(from, format), self.subtree_path(from));
        Self::move_pair((&source.0, &source.1), (&staging.0, &staging.1))?;
        self.remove_subtree(to, format)?;
        let target = (self.image_path(to, format), self.subtree_path(to));
        Self::move_pair((&staging.0, &staging.1), (&target.0, &target.1))?;
        trace!("relocated tile {from} to {to}");
        Ok(())
    }

    fn load_document(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let path = self.root.join(name);
        match fs::read(&path) {
            Ok(content) => Ok(Some(content)),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error).with_context(|| format!("reading {}", path.display())),
        }
    }

    fn store_document(&self, name: &str, content: &[u8]) -> Result<()> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("creating directory {}", self.root.display()))?;
        Self::replace_file(&self.root.join(name), content)
    }

    fn local_path(&self, tile: &TilePath, format: ImageFormat) -> Option<PathBuf> {
        Some(self.image_path(tile, format))
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    const PNG: ImageFormat = ImageFormat::Png;

    fn tile(digits: &[u8]) -> TilePath {
        TilePath::new(digits).unwrap()
    }

    #[test]
    fn naming() {
        let store = FsTileStore::new("/out");
        assert_eq!(Path::new("/out/base.png"), store.image_path(&TilePath::ROOT, PNG));
        assert_eq!(Path::new("/out/3.png"), store.image_path(&tile(&[3]), PNG));
        assert_eq!(
            Path::new("/out/0/2/1.jpg"),
            store.image_path(&tile(&[0, 2, 1]), ImageFormat::Jpg)
        );
        assert_eq!(Path::new("/out/0/2"), store.subtree_path(&tile(&[0, 2])));
    }

    #[test]
    fn write_read_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsTileStore::new(dir.path());
        let path = tile(&[1, 2]);
        assert_eq!(None, store.modified(&path, PNG).unwrap());

        store.write(&path, PNG, b"image").unwrap();
        assert!(store.modified(&path, PNG).unwrap().is_some());
        assert_eq!(None, store.modified(&path, ImageFormat::Jpg).unwrap());
        assert_eq!(b"image".to_vec(), store.read(&path, PNG).unwrap());
        assert!(store.exists(&tile(&[1]), PNG).unwrap());

        assert!(store.remove(&path, PNG).unwrap());
        assert!(!store.remove(&path, PNG).unwrap());
    }

    #[test]
    fn tiles_are_written_in_one_step() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsTileStore::new(dir.path());
        let path = tile(&[0, 3]);
        store.write(&path, PNG, b"first").unwrap();
        store.write(&path, PNG, b"second").unwrap();
        assert_eq!(b"second".to_vec(), store.read(&path, PNG).unwrap());
        assert!(!dir.path().join("0/3.png.tmp").exists());

        // a non-empty directory in place of the image makes the final rename fail
        let blocked = tile(&[1]);
        fs::create_dir_all(dir.path().join("1.png/inner")).unwrap();
        assert!(store.write(&blocked, PNG, b"new").is_err());
        assert!(!dir.path().join("1.png.tmp").exists());
    }

    #[test]
    fn relocate_into_own_subtree() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsTileStore::new(dir.path());
        store.write(&tile(&[1]), PNG, b"one").unwrap();
        store.write(&tile(&[1, 0]), PNG, b"one-zero").unwrap();

        store.relocate(&tile(&[1]), &tile(&[1, 2]), PNG).unwrap();
        assert_eq!(None, store.modified(&tile(&[1]), PNG).unwrap());
        assert_eq!(b"one".to_vec(), store.read(&tile(&[1, 2]), PNG).unwrap());
        assert_eq!(b"one-zero".to_vec(), store.read(&tile(&[1, 2, 0]), PNG).unwrap());
        assert!(!dir.path().join(STAGING_NAME).exists());
    }

    #[test]
    fn relocate_replaces_ancestor() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsTileStore::new(dir.path());
        store.write(&tile(&[2]), PNG, b"old").unwrap();
        store.write(&tile(&[2, 0]), PNG, b"sibling").unwrap();
        store.write(&tile(&[2, 1]), PNG, b"kept").unwrap();
        store.write(&tile(&[2, 1, 3]), PNG, b"grandchild").unwrap();

        store.relocate(&tile(&[2, 1]), &tile(&[2]), PNG).unwrap();
        assert_eq!(b"kept".to_vec(), store.read(&tile(&[2]), PNG).unwrap());
        assert_eq!(b"grandchild".to_vec(), store.read(&tile(&[2, 3]), PNG).unwrap());
        assert!(!store.exists(&tile(&[2, 0]), PNG).unwrap());
    }

    #[test]
    fn documents_are_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsTileStore::new(dir.path().join("out"));
        assert_eq!(None, store.load_document("meta.json").unwrap());
        store.store_document("meta.json", b"first").unwrap();
        store.store_document("meta.json", b"second").unwrap();
        assert_eq!(Some(b"second".to_vec()), store.load_document("meta.json").unwrap());
        assert!(!dir.path().join("out/meta.json.tmp").exists());
    }

    #[test]
    fn failed_document_write_keeps_old_version() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsTileStore::new(dir.path());
        store.store_document("meta.json", b"first").unwrap();
        // a non-empty directory in place of the target makes the final rename fail
        fs::create_dir(dir.path().join("blocked.json")).unwrap();
        fs::write(dir.path().join("blocked.json/inner"), b"x").unwrap();

        assert!(store.store_document("blocked.json", b"new").is_err());
        assert!(!dir.path().join("blocked.json.tmp").exists());
        assert_eq!(Some(b"first".to_vec()), store.load_document("meta.json").unwrap());
    }
}
