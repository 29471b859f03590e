//! Access to the chunks of a dimension stored in region files.

mod format;
pub(crate) mod mcregion;
mod store;

pub use format::*;
pub use mcregion::{McRegionFormat, McRegionReader};
pub(crate) use store::scan_region_files;
pub use store::{CHUNK_CACHE_LIMIT, ChunkLookup, REGION_CACHE_LIMIT, RegionStore};
