//! A saved world with its dimensions.

use std::{
    fs,
    io::Read,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result, bail};
use flate2::read::GzDecoder;
use flexstr::SharedStr;
use glam::IVec3;
use isomap_core::NorthDirection;
use log::{debug, info};
use serde::Deserialize;

use crate::{
    RenderError,
    region::{RegionFormat, RegionStore, scan_region_files},
};

/// Name of the file holding the world-level metadata.
pub const LEVEL_FILE_NAME: &str = "level.dat";
/// The only world format version which can be rendered.
pub const DATA_VERSION: i32 = 19132;
/// Directory holding the biome data, if the world has any.
pub const BIOME_DIR_NAME: &str = "biomes";

/// Directories are searched this deep for region files.
const DIMENSION_SEARCH_DEPTH: usize = 2;

#[derive(Deserialize)]
struct LevelDat {
    #[serde(rename = "Data")]
    data: LevelData,
}

#[derive(Deserialize)]
struct LevelData {
    version: Option<i32>,
    #[serde(rename = "SpawnX")]
    spawn_x: i32,
    #[serde(rename = "SpawnY")]
    spawn_y: i32,
    #[serde(rename = "SpawnZ")]
    spawn_z: i32,
    #[serde(rename = "LevelName")]
    level_name: Option<String>,
}

/// A world directory holding one region store per dimension.
pub struct World {
    path: PathBuf,
    name: String,
    spawn: IVec3,
    has_biome_data: bool,
    /// sorted by name
    region_stores: Vec<RegionStore>,
}

impl World {
    /// Opens a world, validates its format version and discovers all of its dimensions.
    ///
    /// # Errors
    ///
    /// Fails if `level.dat` is unreadable or of an unsupported version, or if the directory tree
    /// can't be listed.
    pub fn open(
        path: impl Into<PathBuf>,
        north: NorthDirection,
        format: Arc<dyn RegionFormat>,
    ) -> Result<Self> {
        let path = path.into();
        info!("opening world at {path}", path = path.display());

        let level = read_level_dat(&path.join(LEVEL_FILE_NAME))?;
        if level.version != Some(DATA_VERSION) {
            bail!(RenderError::UnsupportedWorldVersion {
                found: level.version,
                expected: DATA_VERSION,
            });
        }
        let has_biome_data = path.join(BIOME_DIR_NAME).is_dir();

        let mut region_stores = Vec::new();
        for dir in find_dimension_dirs(&path, format.extension())? {
            let name = dimension_name(&path, &dir);
            debug!("found dimension '{name}' in {dir}", dir = dir.display());
            let mut store = RegionStore::open(name, &dir, north, Arc::clone(&format))?;
            store.set_biome_data(has_biome_data);
            region_stores.push(store);
        }
        region_stores.sort_by(|store_a, store_b| store_a.name_str().cmp(store_b.name_str()));

        Ok(Self {
            path,
            name: level.level_name.unwrap_or_else(|| "world".to_owned()),
            spawn: IVec3::new(level.spawn_x, level.spawn_y, level.spawn_z),
            has_biome_data,
            region_stores,
        })
    }

    /// The world's root directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The name stored in `level.dat`, or `world` if none is set.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The default spawn position in world block coordinates.
    #[must_use]
    pub fn spawn_point(&self) -> IVec3 {
        self.spawn
    }

    #[must_use]
    pub fn has_biome_data(&self) -> bool {
        self.has_biome_data
    }

    /// Returns the names of all discovered dimensions in sorted order.
    pub fn dimension_names(&self) -> impl Iterator<Item = &SharedStr> {
        self.region_stores.iter().map(RegionStore::name)
    }

    /// Returns the region store of the named dimension.
    #[must_use]
    pub fn region_store(&self, name: &str) -> Option<&RegionStore> {
        self.region_stores
            .iter()
            .find(|store| store.name_str() == name)
    }
}

fn read_level_dat(path: &Path) -> Result<LevelData> {
    let compressed = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let mut bytes = Vec::new();
    GzDecoder::new(compressed.as_slice())
        .read_to_end(&mut bytes)
        .with_context(|| format!("decompressing {}", path.display()))?;
    let level: LevelDat =
        fastnbt::from_bytes(&bytes).with_context(|| format!("decoding {}", path.display()))?;
    Ok(level.data)
}

/// Returns every directory within `root` (including itself) which contains region files.
fn find_dimension_dirs(root: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    let mut pending = vec![(root.to_owned(), 0)];
    while let Some((dir, depth)) = pending.pop() {
        // region files never live inside the biome data
        if dir.file_name().is_some_and(|name| name == BIOME_DIR_NAME) {
            continue;
        }
        if !scan_region_files(&dir, extension)?.is_empty() {
            found.push(dir.clone());
        }
        if depth == DIMENSION_SEARCH_DEPTH {
            continue;
        }
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                pending.push((entry.path(), depth + 1));
            }
        }
    }
    found.sort();
    Ok(found)
}

fn dimension_name(root: &Path, dir: &Path) -> SharedStr {
    let relative = dir.strip_prefix(root).unwrap_or(dir);
    let name = relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    if name.is_empty() {
        SharedStr::from_borrowed(".")
    } else {
        name.into()
    }
}
