use std::path::PathBuf;

use flexstr::SharedStr;
use isomap_core::NorthDirection;

/// Conditions which abort a render run.
///
/// These are raised through `anyhow` and can be recognised with `downcast_ref`.
#[derive(thiserror::Error, Debug)]
pub enum RenderError {
    #[error("no region files found in {}", .0.display())]
    NoRegions(PathBuf),
    #[error("the map is too large to fit into a quadtree of depth {0}; specify a smaller zoom level")]
    MapTooLarge(u32),
    #[error("zoom level {requested} is out of range; the deepest supported level is {max}")]
    DepthOutOfRange { requested: u32, max: u32 },
    #[error("unsupported world format version {found:?}; only version {expected} can be rendered")]
    UnsupportedWorldVersion { found: Option<i32>, expected: i32 },
    #[error(
        "the map was rendered with north direction {stored} but {requested} was requested; force a full re-render to change it"
    )]
    NorthDirectionConflict {
        stored: NorthDirection,
        requested: NorthDirection,
    },
    #[error("unknown render mode '{0}'")]
    UnknownRenderMode(SharedStr),
    #[error("required color table {} could not be loaded", .0.display())]
    MissingColorTable(PathBuf),
    #[error("'{0}' is not a valid region file name")]
    InvalidRegionName(String),
    #[error("render interrupted")]
    Interrupted,
    #[error("a worker terminated before delivering its result")]
    WorkerTerminated,
}

impl RenderError {
    /// Check whether the given error was caused by an interrupt request.
    #[must_use]
    pub fn is_interrupt(error: &anyhow::Error) -> bool {
        matches!(error.downcast_ref::<Self>(), Some(Self::Interrupted))
    }
}
