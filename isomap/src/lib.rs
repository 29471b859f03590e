//! Meta-package re-exporting all libraries of isomap.

pub use isomap_core as core;
pub use isomap_render as render;
