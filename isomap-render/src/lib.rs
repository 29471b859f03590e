//! Renders region based voxel worlds into zoomable quadtrees of map tiles.
//!
//! A [`world::World`] provides one [`region::RegionStore`] per dimension. Each combination of
//! dimension and render mode becomes a [`quadtree::TileQuadtree`], and a
//! [`RenderCoordinator`] brings all of their tiles up to date. Only tiles whose chunks changed
//! since they were written are rendered again.

mod cancel;
pub mod coordinator;
mod error;
pub mod optimize;
pub mod poi;
pub mod quadtree;
pub mod region;
pub mod render_mode;
#[cfg(test)]
mod test_support;
pub mod tile_store;
pub mod worker;
pub mod world;

pub use cancel::CancelToken;
pub use coordinator::{RenderCoordinator, RenderSummary};
pub use error::RenderError;
