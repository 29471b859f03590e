use std::{
    collections::HashSet,
    fmt, fs,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    sync::Arc,
    time::SystemTime,
};

use anyhow::{Context, Result, bail};
use flexstr::SharedStr;
use isomap_core::{Chunk, ChunkPos, DiagBounds, NorthDirection, RegionPos};
use log::{debug, trace, warn};
use lru::LruCache;

use super::{RegionFormat, RegionReader};
use crate::RenderError;

/// Default number of regions kept open per store.
pub const REGION_CACHE_LIMIT: usize = 256;
/// Default number of decoded chunks kept per cached region.
pub const CHUNK_CACHE_LIMIT: usize = 64;

fn cache_limit(limit: usize) -> NonZeroUsize {
    NonZeroUsize::new(limit).unwrap_or(NonZeroUsize::MIN)
}

/// Result of looking up a single chunk.
#[derive(Clone)]
pub enum ChunkLookup {
    /// the decoded and rotated chunk
    Found(Arc<Chunk>),
    /// neither the region nor the chunk exist
    NotFound,
    /// the chunk exists but its data couldn't be decoded
    Corrupt,
}

impl fmt::Debug for ChunkLookup {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Found(chunk) => write!(formatter, "Found({})", chunk.pos()),
            Self::NotFound => formatter.write_str("NotFound"),
            Self::Corrupt => formatter.write_str("Corrupt"),
        }
    }
}

struct RegionEntry {
    reader: Box<dyn RegionReader>,
    mtime: SystemTime,
    chunks: LruCache<ChunkPos, ChunkLookup>,
}

/// The immutable part of a region store which may be shared between workers.
#[derive(Clone)]
struct RegionIndex {
    name: SharedStr,
    path: PathBuf,
    north: NorthDirection,
    format: Arc<dyn RegionFormat>,
    /// all regions with a file on disk, in the rotated frame
    regions: HashSet<RegionPos>,
    bounds: DiagBounds,
    has_biome_data: bool,
}

/// Provides access to the chunks of a single dimension.
///
/// All positions accepted and returned by a store are expressed in the rotated frame selected by
/// its north direction. The region files are enumerated once when the store is opened.
pub struct RegionStore {
    index: Arc<RegionIndex>,
    cache: LruCache<RegionPos, RegionEntry>,
    chunk_cache_limit: NonZeroUsize,
}

impl RegionStore {
    /// Opens the dimension stored in the given directory.
    ///
    /// # Errors
    ///
    /// Fails if the directory can't be listed, contains a malformed region file name or doesn't
    /// contain any region file at all.
    pub fn open(
        name: SharedStr,
        path: impl Into<PathBuf>,
        north: NorthDirection,
        format: Arc<dyn RegionFormat>,
    ) -> Result<Self> {
        let path = path.into();

        let mut regions = HashSet::new();
        for raw in scan_region_files(&path, format.extension())? {
            regions.insert(RegionPos(north.rotate(raw.0)));
        }
        let Some(bounds) = DiagBounds::for_regions(regions.iter().copied()) else {
            bail!(RenderError::NoRegions(path));
        };
        debug!(
            "dimension '{name}' has {count} regions covering {bounds}",
            count = regions.len()
        );

        let index = RegionIndex {
            name,
            path,
            north,
            format,
            regions,
            bounds,
            has_biome_data: false,
        };
        Ok(Self::with_index(Arc::new(index)))
    }

    fn with_index(index: Arc<RegionIndex>) -> Self {
        Self {
            index,
            cache: LruCache::new(cache_limit(REGION_CACHE_LIMIT)),
            chunk_cache_limit: cache_limit(CHUNK_CACHE_LIMIT),
        }
    }

    /// Returns a store sharing this store's region index but starting with empty caches.
    #[must_use]
    pub fn fresh(&self) -> Self {
        let mut store = Self::with_index(Arc::clone(&self.index));
        store.set_cache_limits(self.cache.cap().get(), self.chunk_cache_limit.get());
        store
    }

    /// Changes the number of regions and chunks per region kept in memory.
    /// Drops everything cached so far.
    pub fn set_cache_limits(&mut self, regions: usize, chunks_per_region: usize) {
        self.cache = LruCache::new(cache_limit(regions));
        self.chunk_cache_limit = cache_limit(chunks_per_region);
    }

    /// Marks whether biome data is available for this dimension.
    pub(crate) fn set_biome_data(&mut self, available: bool) {
        Arc::make_mut(&mut self.index).has_biome_data = available;
    }

    /// Name of the dimension, e.g. `region` or `DIM-1/region`.
    #[must_use]
    pub fn name(&self) -> &SharedStr {
        &self.index.name
    }

    pub(crate) fn name_str(&self) -> &str {
        &self.index.name
    }

    /// Directory containing the region files.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.index.path
    }

    #[must_use]
    pub fn north(&self) -> NorthDirection {
        self.index.north
    }

    /// Check whether biome color tables are needed to render this dimension.
    #[must_use]
    pub fn has_biome_data(&self) -> bool {
        self.index.has_biome_data
    }

    /// Returns the diagonal bounds covering every chunk the existing regions could hold.
    #[must_use]
    pub fn bounds(&self) -> DiagBounds {
        self.index.bounds
    }

    /// Iterates over all regions which exist on disk.
    pub fn regions(&self) -> impl Iterator<Item = RegionPos> + '_ {
        self.index.regions.iter().copied()
    }

    /// Check whether a region file exists for the given region.
    #[must_use]
    pub fn has_region(&self, region: RegionPos) -> bool {
        self.index.regions.contains(&region)
    }

    /// Returns the position of the region containing the given chunk.
    #[must_use]
    pub fn region_coords_from_chunk(chunk: ChunkPos) -> RegionPos {
        chunk.region()
    }

    /// Returns the file backing the given (rotated) region.
    #[must_use]
    pub fn region_path(&self, region: RegionPos) -> PathBuf {
        let raw = self.index.north.unrotate(region.0);
        self.index.path.join(format!(
            "r.{x}.{y}.{ext}",
            x = raw.x,
            y = raw.y,
            ext = self.index.format.extension()
        ))
    }

    /// Returns the modification time of the region's file, or `None` if it doesn't exist.
    pub fn region_mtime(&mut self, region: RegionPos) -> Option<SystemTime> {
        self.entry(region).map(|entry| entry.mtime)
    }

    /// Returns the time the chunk was last saved, or `None` if it doesn't exist.
    pub fn chunk_timestamp(&mut self, chunk: ChunkPos) -> Option<u32> {
        let north = self.index.north;
        let raw = ChunkPos(north.unrotate(chunk.0));
        self.entry(chunk.region())
            .and_then(|entry| entry.reader.timestamp(raw.local()))
    }

    /// Returns the decoded and rotated chunk.
    ///
    /// Decoding failures are logged and reported as [`ChunkLookup::Corrupt`].
    pub fn get_chunk(&mut self, chunk: ChunkPos) -> ChunkLookup {
        let north = self.index.north;
        let Some(entry) = self.entry(chunk.region()) else {
            return ChunkLookup::NotFound;
        };
        if let Some(cached) = entry.chunks.get(&chunk) {
            return cached.clone();
        }

        let raw = ChunkPos(north.unrotate(chunk.0));
        let lookup = match entry.reader.read_chunk(raw) {
            Ok(Some(decoded)) => {
                ChunkLookup::Found(Arc::new(decoded.rotated(chunk, north.rotations())))
            }
            Ok(None) => ChunkLookup::NotFound,
            Err(error) => {
                warn!("skipping corrupt chunk {chunk}: {error:#}");
                ChunkLookup::Corrupt
            }
        };
        entry.chunks.put(chunk, lookup.clone());
        lookup
    }

    /// Drops the cached region together with all of its cached chunks.
    pub fn invalidate_region(&mut self, region: RegionPos) {
        if self.cache.pop(&region).is_some() {
            trace!("invalidated region {region}");
        }
    }

    /// Reloads a region from disk, bypassing the cache.
    /// Returns the new modification time or `None` if it doesn't exist.
    pub fn reload_region(&mut self, region: RegionPos) -> Option<SystemTime> {
        self.invalidate_region(region);
        self.region_mtime(region)
    }

    /// Number of regions currently held in memory.
    #[must_use]
    pub fn cached_regions(&self) -> usize {
        self.cache.len()
    }

    fn entry(&mut self, region: RegionPos) -> Option<&mut RegionEntry> {
        if !self.index.regions.contains(&region) {
            return None;
        }
        if !self.cache.contains(&region) {
            let entry = self.load_region(region)?;
            if let Some((evicted, _)) = self.cache.push(region, entry) {
                trace!("evicted region {evicted} from the cache");
            }
        }
        self.cache.get_mut(&region)
    }

    fn load_region(&self, region: RegionPos) -> Option<RegionEntry> {
        let path = self.region_path(region);
        let loaded = fs::metadata(&path)
            .and_then(|metadata| metadata.modified())
            .with_context(|| format!("reading modification time of {}", path.display()))
            .and_then(|mtime| Ok((self.index.format.open(&path)?, mtime)));
        match loaded {
            Ok((reader, mtime)) => {
                trace!("loaded region {region} from {}", path.display());
                Some(RegionEntry {
                    reader,
                    mtime,
                    chunks: LruCache::new(self.chunk_cache_limit),
                })
            }
            Err(error) => {
                warn!("region {region} is unreadable: {error:#}");
                None
            }
        }
    }

    /// Parses a list of region file names (one per line) into a set of rotated region positions.
    ///
    /// Blank lines are ignored; leading directories are stripped.
    ///
    /// # Errors
    ///
    /// Fails if a line doesn't name a region file.
    pub fn parse_region_list(&self, list: &str) -> Result<HashSet<RegionPos>> {
        list.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| -> Result<RegionPos> {
                let file_name = Path::new(line)
                    .file_name()
                    .and_then(|name| name.to_str())
                    .unwrap_or(line);
                let raw = parse_region_file_name(file_name, self.index.format.extension())
                    .ok_or_else(|| RenderError::InvalidRegionName(line.to_owned()))?;
                Ok(RegionPos(self.index.north.rotate(raw.0)))
            })
            .collect()
    }
}

/// Parses a file name of the form `r.<x>.<y>.<ext>`.
fn parse_region_file_name(file_name: &str, extension: &str) -> Option<RegionPos> {
    let mut parts = file_name.split('.');
    let (Some("r"), Some(x), Some(y), Some(ext), None) = (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) else {
        return None;
    };
    if ext != extension {
        return None;
    }
    Some(RegionPos::new(x.parse().ok()?, y.parse().ok()?))
}

/// Lists the raw positions of all region files within a directory.
pub(crate) fn scan_region_files(dir: &Path, extension: &str) -> Result<Vec<RegionPos>> {
    let mut regions = Vec::new();
    let entries =
        fs::read_dir(dir).with_context(|| format!("listing regions in {}", dir.display()))?;
    for entry in entries {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        if !file_name.starts_with("r.") || !file_name.ends_with(extension) {
            continue;
        }
        let Some(region) = parse_region_file_name(file_name, extension) else {
            bail!(RenderError::InvalidRegionName(file_name.to_owned()));
        };
        regions.push(region);
    }
    Ok(regions)
}

#[cfg(test)]
mod tests {

    use std::time::Duration;

    use glam::IVec2;

    use super::*;
    use crate::{
        region::McRegionFormat,
        test_support::{ChunkFixture, write_raw_region, write_region},
    };

    fn open(dir: &Path, north: NorthDirection) -> RegionStore {
        RegionStore::open(
            SharedStr::from_borrowed("region"),
            dir,
            north,
            Arc::new(McRegionFormat),
        )
        .unwrap()
    }

    #[test]
    fn parse_file_names() {
        assert_eq!(
            Some(RegionPos::new(-3, 12)),
            parse_region_file_name("r.-3.12.mcr", "mcr")
        );
        assert_eq!(None, parse_region_file_name("r.-3.12.mca", "mcr"));
        assert_eq!(None, parse_region_file_name("r.x.12.mcr", "mcr"));
        assert_eq!(None, parse_region_file_name("r.1.2.3.mcr", "mcr"));
    }

    #[test]
    fn no_regions_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let error = RegionStore::open(
            SharedStr::from_borrowed("region"),
            dir.path(),
            NorthDirection::LowerLeft,
            Arc::new(McRegionFormat),
        )
        .err()
        .unwrap();
        assert!(matches!(
            error.downcast_ref::<RenderError>(),
            Some(RenderError::NoRegions(_))
        ));
    }

    #[test]
    fn bounds_of_single_region() {
        let dir = tempfile::tempdir().unwrap();
        let chunks: Vec<_> = (0..32)
            .map(|index| ChunkFixture::new(ChunkPos::new(index, 31 - index)))
            .collect();
        write_region(dir.path(), RegionPos::new(0, 0), &chunks);
        let store = open(dir.path(), NorthDirection::LowerLeft);
        assert_eq!(
            DiagBounds {
                min_column: 0,
                max_column: 62,
                min_row: -31,
                max_row: 31,
            },
            store.bounds()
        );
    }

    #[test]
    fn regions_are_rotated() {
        let dir = tempfile::tempdir().unwrap();
        write_region(dir.path(), RegionPos::new(2, -1), &[]);
        let store = open(dir.path(), NorthDirection::UpperLeft);
        let regions: Vec<_> = store.regions().collect();
        assert_eq!(vec![RegionPos::new(0, 2)], regions);
        assert_eq!(
            dir.path().join("r.2.-1.mcr"),
            store.region_path(RegionPos::new(0, 2))
        );
    }

    #[test]
    fn chunks_are_rotated() {
        let dir = tempfile::tempdir().unwrap();
        let raw = ChunkPos::new(3, 4);
        write_region(
            dir.path(),
            RegionPos::new(0, 0),
            &[ChunkFixture::new(raw).timestamp(99).column(3, 5, 40, 2)],
        );
        let mut store = open(dir.path(), NorthDirection::UpperLeft);
        let rotated = ChunkPos(NorthDirection::UpperLeft.rotate(raw.0));
        assert_eq!(ChunkPos(IVec2::new(-5, 3)), rotated);

        assert_eq!(Some(99), store.chunk_timestamp(rotated));
        assert_eq!(None, store.chunk_timestamp(raw));
        let ChunkLookup::Found(chunk) = store.get_chunk(rotated) else {
            panic!("chunk not found");
        };
        assert_eq!(rotated, chunk.pos());
        assert_eq!(Some((40, 2)), chunk.top_block(10, 3));
    }

    #[test]
    fn missing_region_and_chunk() {
        let dir = tempfile::tempdir().unwrap();
        write_region(
            dir.path(),
            RegionPos::new(0, 0),
            &[ChunkFixture::new(ChunkPos::new(0, 0))],
        );
        let mut store = open(dir.path(), NorthDirection::LowerLeft);
        assert!(matches!(
            store.get_chunk(ChunkPos::new(1, 0)),
            ChunkLookup::NotFound
        ));
        assert!(matches!(
            store.get_chunk(ChunkPos::new(-1, 0)),
            ChunkLookup::NotFound
        ));
        assert_eq!(None, store.region_mtime(RegionPos::new(-1, 0)));
        assert!(store.region_mtime(RegionPos::new(0, 0)).is_some());
    }

    #[test]
    fn corrupt_chunk_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        write_raw_region(
            dir.path(),
            RegionPos::new(0, 0),
            ChunkPos::new(1, 1).local(),
            2,
            b"garbage",
        );
        let mut store = open(dir.path(), NorthDirection::LowerLeft);
        assert!(matches!(
            store.get_chunk(ChunkPos::new(1, 1)),
            ChunkLookup::Corrupt
        ));
    }

    #[test]
    fn region_cache_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        for x in 0..5 {
            write_region(dir.path(), RegionPos::new(x, 0), &[]);
        }
        let mut store = open(dir.path(), NorthDirection::LowerLeft);
        store.set_cache_limits(2, 4);
        for x in 0..5 {
            assert!(store.region_mtime(RegionPos::new(x, 0)).is_some());
            assert!(store.cached_regions() <= 2);
        }
        let fresh = store.fresh();
        assert_eq!(0, fresh.cached_regions());
        assert_eq!(store.bounds(), fresh.bounds());
    }

    #[test]
    fn reload_sees_new_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_region(dir.path(), RegionPos::new(0, 0), &[]);
        let mut store = open(dir.path(), NorthDirection::LowerLeft);
        let before = store.region_mtime(RegionPos::new(0, 0)).unwrap();

        let later = before + Duration::from_secs(60);
        fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(later)
            .unwrap();
        assert_eq!(Some(before), store.region_mtime(RegionPos::new(0, 0)));
        assert_eq!(Some(later), store.reload_region(RegionPos::new(0, 0)));
    }

    #[test]
    fn region_list_is_rotated() {
        let dir = tempfile::tempdir().unwrap();
        write_region(dir.path(), RegionPos::new(0, 0), &[]);
        let store = open(dir.path(), NorthDirection::UpperRight);
        let list = store
            .parse_region_list("world/region/r.0.0.mcr\n\n r.2.-1.mcr \n")
            .unwrap();
        assert_eq!(2, list.len());
        assert!(list.contains(&RegionPos::new(-1, -1)));
        assert!(list.contains(&RegionPos::new(-3, 0)));
        assert!(store.parse_region_list("level.dat").is_err());
    }
}
