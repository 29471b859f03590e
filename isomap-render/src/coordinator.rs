//! Scheduling of the render jobs of all quadtrees.
//!
//! Levels are processed from the deepest to the root, because composed tiles are built from the
//! tiles one level below. Within a level the jobs of all quadtrees are interleaved, grouped into
//! batches and handed to the workers.

use std::{
    collections::{HashMap, VecDeque},
    fmt::{self, Display},
    path::PathBuf,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use anyhow::{Result, bail, ensure};
use log::{info, warn};
use tokio::sync::oneshot::error::TryRecvError;

use crate::{
    CancelToken, RenderError,
    poi::{PoiReceiver, PoiSender, poi_queue},
    quadtree::{TileOutcome, TileQuadtree},
    render_mode::{BiomeColorCache, RenderModeTable},
    worker::{BatchReport, TileJob, TreeSetup, WorkerContext, WorkerSetup},
};

mod pool;
mod progress;
mod round_robin;

use pool::{Executor, PendingBatch, WorkerPool};
use progress::Progress;
use round_robin::RoundRobin;

/// Batches never hold fewer jobs than this.
pub const MIN_BATCH_SIZE: usize = 10;
/// Number of queued jobs at which the coordinator stops submitting and waits for results.
const HIGH_WATER_JOBS: usize = 10_000;
/// Number of queued jobs the coordinator waits for after reaching the high-water mark.
const LOW_WATER_JOBS: usize = 500;
/// Number of jobs collected by the periodic drain.
const TIMED_DRAIN_JOBS: usize = 1_000;
const DRAIN_INTERVAL: Duration = Duration::from_secs(1);
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Returns the number of jobs per batch for the given number of quadtrees.
#[must_use]
pub fn batch_size(trees: usize) -> usize {
    let mut size = 4 * trees.max(1);
    while size < MIN_BATCH_SIZE {
        size *= 2;
    }
    size
}

/// Counters of a whole render run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderSummary {
    /// number of tiles which have been checked
    pub jobs: usize,
    pub written: usize,
    pub removed: usize,
}

impl RenderSummary {
    fn add(&mut self, report: BatchReport) {
        self.jobs += report.jobs;
        self.written += report.written;
        self.removed += report.removed;
    }

    fn record(&mut self, outcome: TileOutcome) {
        let mut report = BatchReport::default();
        report.record(outcome);
        self.add(report);
    }
}

impl Display for RenderSummary {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "{} tiles checked, {} written, {} removed",
            self.jobs, self.written, self.removed
        )
    }
}

/// Renders a set of quadtrees.
pub struct RenderCoordinator {
    trees: Vec<TileQuadtree>,
    modes: RenderModeTable,
    biome_colors: Option<Arc<BiomeColorCache>>,
    cancel: CancelToken,
}

impl RenderCoordinator {
    /// Takes over the quadtrees to render. Every tree must have been created with its position in
    /// `trees` as index.
    ///
    /// # Errors
    ///
    /// Fails if a tree's index doesn't match its position.
    pub fn new(
        trees: Vec<TileQuadtree>,
        modes: RenderModeTable,
        biome_colors: Option<Arc<BiomeColorCache>>,
        cancel: CancelToken,
    ) -> Result<Self> {
        for (index, tree) in trees.iter().enumerate() {
            ensure!(
                tree.tree() == index,
                "quadtree {} has been registered at position {index}",
                tree.tree()
            );
        }
        Ok(Self {
            trees,
            modes,
            biome_colors,
            cancel,
        })
    }

    #[must_use]
    pub fn trees(&self) -> &[TileQuadtree] {
        &self.trees
    }

    #[must_use]
    pub fn into_trees(self) -> Vec<TileQuadtree> {
        self.trees
    }

    /// Brings every tile of every quadtree up to date.
    ///
    /// A single worker renders on the calling thread. Must not be called from within an async
    /// context.
    ///
    /// # Errors
    ///
    /// Fails if any job fails, a worker can't be initialized, or the render gets cancelled.
    /// Tiles written up to that point are kept and will be skipped by the next run.
    pub fn run(&mut self, workers: usize) -> Result<RenderSummary> {
        let workers = workers.max(1);
        for tree in &mut self.trees {
            tree.pre_process()?;
        }

        // cancelled on its own when the run fails, without touching the caller's token
        let cancel = self.cancel.child();
        let (senders, receivers) = self.event_queues(workers > 1);
        let setup = WorkerSetup {
            trees: self
                .trees
                .iter()
                .zip(senders)
                .map(|(tree, events)| TreeSetup {
                    tileset: Arc::clone(tree.tileset()),
                    regions: tree.regions().fresh(),
                    events,
                })
                .collect(),
            modes: self.modes.clone(),
            biome_colors: self.biome_colors.clone(),
            cancel: cancel.clone(),
        };
        let executor = if workers == 1 {
            info!("rendering without worker threads");
            Executor::Inline(Box::new(WorkerContext::initialize(&setup)?))
        } else {
            info!("rendering with {workers} workers");
            let contexts = (0..workers)
                .map(|_| WorkerContext::initialize(&setup))
                .collect::<Result<Vec<_>>>()?;
            Executor::Pool(WorkerPool::start(contexts)?)
        };
        drop(setup);

        let batch_size = batch_size(self.trees.len());
        let mut run = Run {
            trees: &mut self.trees,
            cancel,
            receivers,
            executor,
            pending: VecDeque::new(),
            batch_size,
            summary: RenderSummary::default(),
            last_drain: Instant::now(),
        };
        if let Err(error) = run.render_levels() {
            run.abort();
            return Err(error);
        }

        let (mut summary, mut receivers) = run.finish();
        drain_events(&mut self.trees, &mut receivers);

        for tree in &mut self.trees {
            if tree.depth() > 0 {
                self.cancel.check()?;
                summary.record(tree.render_root()?);
            }
        }
        for tree in &mut self.trees {
            tree.save_metadata()?;
        }
        info!("render finished: {summary}");
        Ok(summary)
    }

    /// Creates one event queue per dimension and returns the sending side for every tree.
    fn event_queues(&self, bounded: bool) -> (Vec<PoiSender>, Vec<PoiReceiver>) {
        let mut queues = HashMap::<PathBuf, PoiSender>::new();
        let mut senders = Vec::with_capacity(self.trees.len());
        let mut receivers = Vec::new();
        for tree in &self.trees {
            let sender = queues
                .entry(tree.regions().path().to_owned())
                .or_insert_with(|| {
                    let (sender, receiver) = poi_queue(bounded);
                    receivers.push(receiver);
                    sender
                });
            senders.push(sender.clone());
        }
        (senders, receivers)
    }
}

type JobStream = Box<dyn Iterator<Item = TileJob>>;

fn tiles_at_level(level: u32) -> u64 {
    4_u64.saturating_pow(level)
}

fn drain_events(trees: &mut [TileQuadtree], receivers: &mut [PoiReceiver]) {
    for receiver in receivers {
        while let Some(message) = receiver.try_next() {
            match trees.get_mut(message.tree) {
                Some(tree) => tree.apply_event(message.event),
                None => warn!("dropping event for unknown tree {}", message.tree),
            }
        }
    }
}

/// State of a running render.
struct Run<'run> {
    trees: &'run mut [TileQuadtree],
    cancel: CancelToken,
    receivers: Vec<PoiReceiver>,
    executor: Executor,
    /// results in submission order
    pending: VecDeque<PendingBatch>,
    batch_size: usize,
    summary: RenderSummary,
    last_drain: Instant,
}

impl Run<'_> {
    /// Renders all leaves and then every composed level above them, except the roots.
    fn render_levels(&mut self) -> Result<()> {
        let max_depth = self.trees.iter().map(TileQuadtree::depth).max().unwrap_or(0);
        let leaf_total = self
            .trees
            .iter()
            .map(|tree| tiles_at_level(tree.depth()))
            .fold(0, u64::saturating_add);
        let leaves = self
            .trees
            .iter()
            .map(|tree| -> JobStream { Box::new(tree.leaf_jobs().map(TileJob::from)) })
            .collect();
        self.pass("leaf tiles".to_owned(), leaves, leaf_total)?;

        for level in (1..max_depth).rev() {
            let active = self
                .trees
                .iter()
                .filter(|tree| tree.depth() > level)
                .collect::<Vec<_>>();
            let total = tiles_at_level(level).saturating_mul(active.len() as u64);
            let streams = active
                .iter()
                .map(|tree| -> JobStream { Box::new(tree.composed_jobs(level).map(TileJob::from)) })
                .collect();
            self.pass(format!("zoom level {level}"), streams, total)?;
        }
        Ok(())
    }

    fn high_water_mark(&self) -> usize {
        (HIGH_WATER_JOBS / self.batch_size).max(1)
    }

    fn low_water_mark(&self) -> usize {
        LOW_WATER_JOBS / self.batch_size
    }

    /// Submits all jobs of one level and waits for them to finish.
    fn pass(&mut self, label: String, streams: Vec<JobStream>, total: u64) -> Result<()> {
        let mut progress = Progress::new(label, total);
        let mut jobs = RoundRobin::new(streams);
        loop {
            let batch = jobs.by_ref().take(self.batch_size).collect::<Vec<_>>();
            if batch.is_empty() {
                break;
            }
            self.cancel.check()?;
            let pending = self.executor.submit(batch)?;
            self.pending.push_back(pending);

            if self.pending.len() > self.high_water_mark() {
                self.drain_to(self.low_water_mark(), &mut progress)?;
            } else if self.last_drain.elapsed() >= DRAIN_INTERVAL {
                let count = (TIMED_DRAIN_JOBS / self.batch_size).min(self.pending.len());
                for _ in 0..count {
                    self.wait_for_next(&mut progress)?;
                }
                self.last_drain = Instant::now();
            }
        }
        self.drain_to(0, &mut progress)
    }

    fn drain_to(&mut self, remaining: usize, progress: &mut Progress) -> Result<()> {
        while self.pending.len() > remaining {
            self.wait_for_next(progress)?;
        }
        self.last_drain = Instant::now();
        Ok(())
    }

    /// Waits for the oldest pending batch while forwarding events.
    fn wait_for_next(&mut self, progress: &mut Progress) -> Result<()> {
        let Some(mut pending) = self.pending.pop_front() else {
            return Ok(());
        };
        let report = loop {
            match pending.try_recv() {
                Ok(result) => break result?,
                Err(TryRecvError::Empty) => {
                    // keep the event queues moving so workers don't block on them
                    drain_events(self.trees, &mut self.receivers);
                    self.cancel.check()?;
                    thread::sleep(POLL_INTERVAL);
                }
                Err(TryRecvError::Closed) => bail!(RenderError::WorkerTerminated),
            }
        };
        drain_events(self.trees, &mut self.receivers);
        self.summary.add(report);
        progress.advance(u64::try_from(report.jobs).unwrap_or(u64::MAX));
        Ok(())
    }

    /// Stops the workers and returns the collected results.
    fn finish(self) -> (RenderSummary, Vec<PoiReceiver>) {
        self.executor.shutdown();
        (self.summary, self.receivers)
    }

    /// Stops the workers after a failure. Queued batches are discarded without touching any tile.
    fn abort(self) {
        let Self {
            cancel,
            receivers,
            executor,
            pending,
            ..
        } = self;
        warn!("aborting render; waiting for the workers to stop");
        cancel.cancel();
        // workers blocked on a full event queue fail instead of waiting forever
        drop(receivers);
        drop(pending);
        executor.shutdown();
    }
}

#[cfg(test)]
mod tests {

    use std::{
        fs,
        path::{Path, PathBuf},
        sync::atomic::{AtomicUsize, Ordering},
        time::SystemTime,
    };

    use flexstr::SharedStr;
    use glam::IVec3;
    use isomap_core::{ChunkPos, NorthDirection, RegionPos, TilePath};

    use super::*;
    use crate::{
        poi::PoiKind,
        quadtree::{ImageFormat, METADATA_FILE_NAME, QuadtreeMetadata, QuadtreeOptions},
        region::{McRegionFormat, RegionStore},
        test_support::{ChunkFixture, write_region},
        tile_store::{FsTileStore, TileStore},
    };

    fn write_world(dir: &Path) {
        write_region(
            dir,
            RegionPos::new(0, 0),
            &[
                ChunkFixture::new(ChunkPos::new(0, 0)).flat(10, 2),
                ChunkFixture::new(ChunkPos::new(1, 2))
                    .flat(30, 1)
                    .sign(IVec3::new(20, 31, 40), "welcome"),
            ],
        );
        write_region(
            dir,
            RegionPos::new(-1, 0),
            &[ChunkFixture::new(ChunkPos::new(-1, 2)).flat(60, 12)],
        );
    }

    fn coordinator(world: &Path, output: &Path, modes: &[&'static str]) -> RenderCoordinator {
        let trees = modes
            .iter()
            .enumerate()
            .map(|(index, mode)| {
                let regions = RegionStore::open(
                    SharedStr::from_borrowed("region"),
                    world,
                    NorthDirection::LowerLeft,
                    Arc::new(McRegionFormat),
                )
                .unwrap();
                let options = QuadtreeOptions {
                    depth: Some(2),
                    ..QuadtreeOptions::default()
                };
                TileQuadtree::new(
                    index,
                    regions,
                    Arc::new(FsTileStore::new(output.join(mode))),
                    SharedStr::from_borrowed(*mode),
                    options,
                )
                .unwrap()
            })
            .collect();
        RenderCoordinator::new(trees, RenderModeTable::new(), None, CancelToken::new()).unwrap()
    }

    /// A filesystem store whose tile lookups start failing after a number of calls.
    struct FailingStore {
        inner: FsTileStore,
        healthy_calls: usize,
        calls: AtomicUsize,
    }

    impl FailingStore {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn count(&self) -> usize {
            self.calls.fetch_add(1, Ordering::SeqCst)
        }
    }

    impl TileStore for FailingStore {
        fn modified(&self, tile: &TilePath, format: ImageFormat) -> Result<Option<SystemTime>> {
            if self.count() >= self.healthy_calls {
                bail!("tile storage failed");
            }
            self.inner.modified(tile, format)
        }

        fn read(&self, tile: &TilePath, format: ImageFormat) -> Result<Vec<u8>> {
            self.count();
            self.inner.read(tile, format)
        }

        fn write(&self, tile: &TilePath, format: ImageFormat, image: &[u8]) -> Result<()> {
            self.count();
            self.inner.write(tile, format, image)
        }

        fn remove(&self, tile: &TilePath, format: ImageFormat) -> Result<bool> {
            self.count();
            self.inner.remove(tile, format)
        }

        fn remove_subtree(&self, tile: &TilePath, format: ImageFormat) -> Result<()> {
            self.count();
            self.inner.remove_subtree(tile, format)
        }

        fn exists(&self, tile: &TilePath, format: ImageFormat) -> Result<bool> {
            self.count();
            self.inner.exists(tile, format)
        }

        fn relocate(&self, from: &TilePath, to: &TilePath, format: ImageFormat) -> Result<()> {
            self.count();
            self.inner.relocate(from, to, format)
        }

        fn load_document(&self, name: &str) -> Result<Option<Vec<u8>>> {
            self.count();
            self.inner.load_document(name)
        }

        fn store_document(&self, name: &str, content: &[u8]) -> Result<()> {
            self.count();
            self.inner.store_document(name, content)
        }
    }

    /// Returns every file below `dir` with its content.
    fn files(dir: &Path) -> Vec<(PathBuf, Vec<u8>)> {
        let mut found = Vec::new();
        let mut pending = vec![dir.to_owned()];
        while let Some(current) = pending.pop() {
            for entry in fs::read_dir(&current).unwrap() {
                let path = entry.unwrap().path();
                if path.is_dir() {
                    pending.push(path);
                } else {
                    let relative = path.strip_prefix(dir).unwrap().to_owned();
                    found.push((relative, fs::read(&path).unwrap()));
                }
            }
        }
        found.sort();
        found
    }

    #[test]
    fn batch_sizes() {
        assert_eq!(16, batch_size(0));
        assert_eq!(16, batch_size(1));
        assert_eq!(16, batch_size(2));
        assert_eq!(12, batch_size(3));
        assert_eq!(40, batch_size(10));
    }

    fn second_run_writes_nothing(workers: usize) {
        let world = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        write_world(world.path());

        let first = coordinator(world.path(), output.path(), &["normal"])
            .run(workers)
            .unwrap();
        // 16 leaves, 4 composed tiles and the root
        assert_eq!(21, first.jobs);
        assert!(first.written > 2);
        assert!(output.path().join("normal/base.png").is_file());

        let second = coordinator(world.path(), output.path(), &["normal"])
            .run(workers)
            .unwrap();
        assert_eq!(
            RenderSummary {
                jobs: 21,
                written: 0,
                removed: 0
            },
            second
        );
    }

    #[test]
    fn second_inline_run_writes_nothing() {
        second_run_writes_nothing(1);
    }

    #[test]
    fn second_pooled_run_writes_nothing() {
        second_run_writes_nothing(3);
    }

    #[test]
    fn pool_renders_like_inline() {
        let world = tempfile::tempdir().unwrap();
        write_world(world.path());
        let inline = tempfile::tempdir().unwrap();
        let pooled = tempfile::tempdir().unwrap();

        coordinator(world.path(), inline.path(), &["normal", "night"])
            .run(1)
            .unwrap();
        coordinator(world.path(), pooled.path(), &["normal", "night"])
            .run(4)
            .unwrap();
        let inline_files = files(inline.path());
        assert!(inline_files.len() > 4);
        assert_eq!(inline_files, files(pooled.path()));
    }

    #[test]
    fn signs_are_collected() {
        let world = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        write_world(world.path());

        let mut coordinator = coordinator(world.path(), output.path(), &["normal", "lighting"]);
        let summary = coordinator.run(2).unwrap();
        for tree in coordinator.trees() {
            let signs = tree
                .pois()
                .points()
                .iter()
                .filter(|poi| poi.kind == PoiKind::Sign)
                .collect::<Vec<_>>();
            assert_eq!(1, signs.len());
            assert_eq!("welcome", signs[0].text);
            assert_eq!([1, 2], signs[0].chunk);
        }
        let rendered = coordinator
            .trees()
            .iter()
            .map(|tree| tree.pois().rendered().len())
            .sum::<usize>();
        assert_eq!(summary.written, rendered);

        let store = FsTileStore::new(output.path().join("lighting"));
        let metadata = QuadtreeMetadata::load(&store).unwrap().unwrap();
        assert_eq!(Some(2), metadata.depth);
        assert_eq!(1, metadata.points_of_interest.len());
    }

    #[test]
    fn vanished_chunks_remove_tiles() {
        let world = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        write_world(world.path());
        coordinator(world.path(), output.path(), &["normal"]).run(1).unwrap();

        write_region(world.path(), RegionPos::new(0, 0), &[]);
        write_region(world.path(), RegionPos::new(-1, 0), &[]);
        let summary = coordinator(world.path(), output.path(), &["normal"]).run(2).unwrap();
        assert_eq!(0, summary.written);
        assert!(summary.removed > 2);

        let store = FsTileStore::new(output.path().join("normal"));
        assert!(!store.exists(&TilePath::ROOT, ImageFormat::Png).unwrap());
        let remaining = files(store.root())
            .into_iter()
            .map(|(path, _)| path)
            .collect::<Vec<_>>();
        assert_eq!(vec![PathBuf::from(METADATA_FILE_NAME)], remaining);
    }

    #[test]
    fn cancelled_run_is_interrupted() {
        let world = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        write_world(world.path());
        let mut coordinator = coordinator(world.path(), output.path(), &["normal"]);
        coordinator.cancel.cancel();
        for workers in [1, 2] {
            let error = coordinator.run(workers).unwrap_err();
            assert!(RenderError::is_interrupt(&error));
        }
    }

    #[test]
    fn pooled_worker_error_aborts_run() {
        let world = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        write_world(world.path());
        let store = Arc::new(FailingStore {
            inner: FsTileStore::new(output.path().join("normal")),
            healthy_calls: 20,
            calls: AtomicUsize::new(0),
        });
        let regions = RegionStore::open(
            SharedStr::from_borrowed("region"),
            world.path(),
            NorthDirection::LowerLeft,
            Arc::new(McRegionFormat),
        )
        .unwrap();
        let options = QuadtreeOptions {
            depth: Some(4),
            ..QuadtreeOptions::default()
        };
        let tree = TileQuadtree::new(
            0,
            regions,
            Arc::<FailingStore>::clone(&store),
            SharedStr::from_borrowed("normal"),
            options,
        )
        .unwrap();
        let cancel = CancelToken::new();
        let mut coordinator =
            RenderCoordinator::new(vec![tree], RenderModeTable::new(), None, cancel.clone())
                .unwrap();

        let error = coordinator.run(2).unwrap_err();
        assert!(format!("{error:#}").contains("tile storage failed"));
        assert!(!RenderError::is_interrupt(&error));
        // the run failed on its own; the caller's token is untouched
        assert!(!cancel.is_cancelled());

        // every worker has stopped once the run returns
        let calls = store.calls();
        thread::sleep(Duration::from_millis(300));
        assert_eq!(calls, store.calls());
    }

    #[test]
    fn unknown_mode_is_rejected() {
        let world = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        write_world(world.path());
        let error = coordinator(world.path(), output.path(), &["sepia"])
            .run(1)
            .unwrap_err();
        assert!(matches!(
            error.downcast_ref::<RenderError>(),
            Some(RenderError::UnknownRenderMode(_))
        ));
    }
}
