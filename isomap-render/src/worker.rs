//! Per-worker state and the processing of job batches.

use std::{
    fmt::{self, Display},
    sync::Arc,
};

use anyhow::{Result, anyhow};
use isomap_core::TilePath;
use log::{debug, warn};

use crate::{
    CancelToken,
    poi::{PoiEvent, PoiSender},
    quadtree::{ComposedJob, LeafContext, LeafJob, TileOutcome, Tileset},
    region::RegionStore,
    render_mode::{BiomeColorCache, ChunkRenderer, ReferenceRenderer, RenderModeTable},
};

/// A single unit of work for a worker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TileJob {
    Leaf(LeafJob),
    Composed(ComposedJob),
}

impl TileJob {
    /// Index of the quadtree this job belongs to.
    #[must_use]
    pub fn tree(&self) -> usize {
        match self {
            Self::Leaf(job) => job.tree,
            Self::Composed(job) => job.tree,
        }
    }

    #[must_use]
    pub fn path(&self) -> &TilePath {
        match self {
            Self::Leaf(job) => &job.path,
            Self::Composed(job) => &job.path,
        }
    }
}

impl From<LeafJob> for TileJob {
    fn from(job: LeafJob) -> Self {
        Self::Leaf(job)
    }
}

impl From<ComposedJob> for TileJob {
    fn from(job: ComposedJob) -> Self {
        Self::Composed(job)
    }
}

/// Counters of a processed batch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub jobs: usize,
    pub written: usize,
    pub removed: usize,
}

impl BatchReport {
    pub fn record(&mut self, outcome: TileOutcome) {
        self.jobs += 1;
        match outcome {
            TileOutcome::Written => self.written += 1,
            TileOutcome::Removed => self.removed += 1,
            TileOutcome::Skipped | TileOutcome::Empty => {}
        }
    }

    pub fn merge(&mut self, other: Self) {
        self.jobs += other.jobs;
        self.written += other.written;
        self.removed += other.removed;
    }
}

impl Display for BatchReport {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "{} jobs, {} tiles written, {} tiles removed",
            self.jobs, self.written, self.removed
        )
    }
}

/// What a worker needs to know about one quadtree.
pub struct TreeSetup {
    pub tileset: Arc<Tileset>,
    /// template for the worker's private region cache
    pub regions: RegionStore,
    pub events: PoiSender,
}

/// The configuration every worker is initialized from.
pub struct WorkerSetup {
    /// indexed by tree
    pub trees: Vec<TreeSetup>,
    pub modes: RenderModeTable,
    /// `None` disables biome tinting
    pub biome_colors: Option<Arc<BiomeColorCache>>,
    pub cancel: CancelToken,
}

struct TreeContext {
    tileset: Arc<Tileset>,
    regions: RegionStore,
    renderer: Box<dyn ChunkRenderer>,
    events: PoiSender,
}

/// Everything a single worker owns. Built once and handed to every batch.
pub struct WorkerContext {
    trees: Vec<TreeContext>,
    cancel: CancelToken,
}

impl WorkerContext {
    /// Prepares the renderers and private region caches of a worker.
    ///
    /// # Errors
    ///
    /// Fails if a tree uses an unknown render mode, or if the biome color tables are required but
    /// can't be loaded.
    pub fn initialize(setup: &WorkerSetup) -> Result<Self> {
        let mut trees = Vec::with_capacity(setup.trees.len());
        for tree in &setup.trees {
            let mode = setup.modes.resolve(tree.tileset.mode())?;
            let options = mode.options();
            let biome_colors = if options.biome_tint && tree.regions.has_biome_data() {
                match &setup.biome_colors {
                    Some(cache) => Some(cache.get()?),
                    None => {
                        warn!("{}: no texture directory given; plants are not tinted", tree.tileset);
                        None
                    }
                }
            } else {
                None
            };
            trees.push(TreeContext {
                tileset: Arc::clone(&tree.tileset),
                regions: tree.regions.fresh(),
                renderer: Box::new(ReferenceRenderer::new(options, biome_colors)),
                events: tree.events.clone(),
            });
        }
        Ok(Self {
            trees,
            cancel: setup.cancel.clone(),
        })
    }

    /// Renders every job of a batch in order.
    ///
    /// # Errors
    ///
    /// Fails on the first job which fails, or once the render has been cancelled.
    pub fn process_batch(&mut self, batch: &[TileJob]) -> Result<BatchReport> {
        let mut report = BatchReport::default();
        for job in batch {
            self.cancel.check()?;
            let outcome = self.process(job)?;
            if outcome == TileOutcome::Written {
                if let Some(tree) = self.trees.get(job.tree()) {
                    tree.events
                        .send(job.tree(), PoiEvent::Rendered(job.path().clone()))?;
                }
            }
            report.record(outcome);
        }
        debug!("finished batch: {report}");
        Ok(report)
    }

    fn process(&mut self, job: &TileJob) -> Result<TileOutcome> {
        let index = job.tree();
        let tree = self
            .trees
            .get_mut(index)
            .ok_or_else(|| anyhow!("job for unknown tree {index}"))?;
        match job {
            TileJob::Leaf(leaf) => tree.tileset.render_leaf_tile(
                leaf,
                &mut LeafContext {
                    regions: &mut tree.regions,
                    renderer: tree.renderer.as_ref(),
                    events: &tree.events,
                },
            ),
            TileJob::Composed(composed) => tree.tileset.render_composed_tile(&composed.path),
        }
    }
}
