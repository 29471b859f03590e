//! Renders a voxel world into a zoomable quadtree of map tiles.
//!
//! Run it again after the world changed and only the affected tiles are redrawn.

use std::{
    fs,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    sync::Arc,
    thread,
};

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Parser, value_parser};
use flexstr::SharedStr;
use isomap_core::NorthDirection;
use isomap_render::{
    CancelToken, RenderCoordinator, RenderError,
    quadtree::{BackgroundColor, ImageFormat, MAX_TREE_DEPTH, QuadtreeOptions, TileQuadtree},
    region::McRegionFormat,
    render_mode::{BiomeColorCache, RenderModeTable},
    tile_store::FsTileStore,
    world::World,
};
use log::{LevelFilter, debug, error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// World directory containing `level.dat`
    #[arg(required_unless_present = "list_rendermodes")]
    world: Option<PathBuf>,

    /// Directory receiving the tiles; every render mode gets a subdirectory
    #[arg(required_unless_present = "list_rendermodes")]
    output: Option<PathBuf>,

    /// Number of render workers; 1 renders without worker threads [default: number of CPUs]
    #[arg(short, long)]
    processes: Option<NonZeroUsize>,

    /// Fixed zoom level (quadtree depth) instead of the smallest one showing the whole map
    #[arg(short, long, value_parser = value_parser!(u32).range(..=i64::from(MAX_TREE_DEPTH)))]
    zoom: Option<u32>,

    /// File listing the region files whose changes should be rendered, one per line
    #[arg(long)]
    regionlist: Option<PathBuf>,

    /// Render every tile even if it is up to date
    #[arg(long)]
    forcerender: bool,

    /// Render modes to use, separated by commas
    #[arg(long, value_delimiter = ',', default_value = "normal")]
    rendermodes: Vec<String>,

    /// JSON file with additional render modes derived from the built-in ones
    #[arg(long)]
    custom_rendermodes: Option<PathBuf>,

    /// List the available render modes and exit
    #[arg(long)]
    list_rendermodes: bool,

    /// Dimension to render, given as its directory relative to the world
    #[arg(long, default_value = "region")]
    dimension: String,

    /// Image format of the tiles (png, jpg)
    #[arg(long)]
    imgformat: Option<ImageFormat>,

    /// Quality of lossy tile images (0-100)
    #[arg(long)]
    imgquality: Option<u8>,

    /// Background color of the tiles as #rrggbb or #rrggbbaa
    #[arg(long)]
    bg_color: Option<BackgroundColor>,

    /// Run external PNG optimizers on every written tile (1: pngcrush, 2-3: also advdef)
    #[arg(long, default_value_t = 0)]
    optimize_img: u8,

    /// Map corner pointing to the top of the screen
    #[arg(long, default_value_t = NorthDirection::default())]
    north_direction: NorthDirection,

    /// Directory holding grasscolor.png and foliagecolor.png for tinting plants
    #[arg(long)]
    textures_path: Option<PathBuf>,

    /// More log output (up to -vv)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Less log output (up to -qq)
    #[arg(short, long, action = ArgAction::Count, conflicts_with = "verbose")]
    quiet: u8,
}

impl Args {
    fn log_level(&self) -> LevelFilter {
        match (self.verbose, self.quiet) {
            (0, 0) => LevelFilter::Info,
            (1, _) => LevelFilter::Debug,
            (_, 0) => LevelFilter::Trace,
            (_, 1) => LevelFilter::Warn,
            (_, _) => LevelFilter::Error,
        }
    }

    fn quadtree_options(&self) -> QuadtreeOptions {
        QuadtreeOptions {
            depth: self.zoom,
            image_format: self.imgformat,
            image_quality: self.imgquality,
            background_color: self.bg_color,
            force_render: self.forcerender,
            region_list: None,
            optimize_level: self.optimize_img,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // tokio::main makes rust-analyzer fragile,
    // so put the code in a separate place.
    real_main().await
}

async fn real_main() -> Result<()> {
    let args = Args::parse();
    env_logger::Builder::new()
        .filter_level(args.log_level())
        .parse_default_env()
        .init();

    let mut modes = RenderModeTable::new();
    if let Some(path) = &args.custom_rendermodes {
        let json = fs::read_to_string(path)
            .with_context(|| format!("reading custom render modes from {}", path.display()))?;
        modes.load_custom(&json)?;
    }
    if args.list_rendermodes {
        list_render_modes(&modes);
        return Ok(());
    }
    for mode in &args.rendermodes {
        modes.resolve(mode)?;
    }

    let (Some(world_path), Some(output)) = (&args.world, &args.output) else {
        bail!("world and output directory are required");
    };
    let world = World::open(world_path, args.north_direction, Arc::new(McRegionFormat))?;
    info!("rendering world '{}'", world.name());
    let cancel = CancelToken::new();
    let mut coordinator = build_coordinator(&args, &world, output, modes, cancel.clone())?;

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; stopping after the current tiles");
            cancel.cancel();
        }
    });

    let workers = args
        .processes
        .or_else(|| thread::available_parallelism().ok())
        .map_or(1, NonZeroUsize::get);
    let result = tokio::task::spawn_blocking(move || coordinator.run(workers))
        .await
        .context("render thread panicked")?;
    match result {
        Ok(summary) => {
            info!("done: {summary}");
            Ok(())
        }
        Err(render_error) => {
            if RenderError::is_interrupt(&render_error) {
                error!("render interrupted; the next run continues where this one stopped");
            } else {
                error!("render failed: {render_error:?}");
            }
            Err(render_error)
        }
    }
}

fn build_coordinator(
    args: &Args,
    world: &World,
    output: &Path,
    modes: RenderModeTable,
    cancel: CancelToken,
) -> Result<RenderCoordinator> {
    let Some(regions) = world.region_store(&args.dimension) else {
        let known = world
            .dimension_names()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        bail!(
            "dimension '{}' not found; available: {known}",
            args.dimension
        );
    };

    let mut options = args.quadtree_options();
    if let Some(path) = &args.regionlist {
        let list = fs::read_to_string(path)
            .with_context(|| format!("reading region list {}", path.display()))?;
        let allowed = regions.parse_region_list(&list)?;
        info!("only changes within {} regions are rendered", allowed.len());
        options.region_list = Some(allowed);
    }

    let mut trees = Vec::with_capacity(args.rendermodes.len());
    for (index, mode) in args.rendermodes.iter().enumerate() {
        let store = FsTileStore::new(output.join(mode));
        debug!("tiles of mode '{mode}' go to {}", store.root().display());
        let mut tree = TileQuadtree::new(
            index,
            regions.fresh(),
            Arc::new(store),
            SharedStr::from(mode.clone()),
            options.clone(),
        )?;
        tree.record_spawn(world.spawn_point());
        trees.push(tree);
    }

    let biome_colors = args
        .textures_path
        .as_ref()
        .map(|path| Arc::new(BiomeColorCache::new(path)));
    RenderCoordinator::new(trees, modes, biome_colors, cancel)
}

#[expect(clippy::print_stdout, reason = "the listing is the command's output")]
fn list_render_modes(modes: &RenderModeTable) {
    for mode in modes.iter() {
        match mode.parent() {
            Some(parent) => println!(
                "{:<12} {} (based on {parent})",
                mode.name(),
                mode.description()
            ),
            None => println!("{:<12} {}", mode.name(), mode.description()),
        }
    }
}
