//! Flowroute CLI - sorted-order flow routing over synthetic surfaces

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::{Duration, Instant};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use flowroute_algorithms::hydrology::{
    burn_streams, channels_from_order, flow_accumulation, flow_length, label_basins,
    resolve_routing, stream_network, strahler_order, AccumulationParams, BasinParams, BasinSeeds,
    BurnMethod, BurnParams, FloodOutcome, FloodTarget, FlowLengthDirection, FlowLengthParams,
    FlowRouting, FlowUnit, LakeFlood, MfdParams, RoutingMethod, SortOrder, SortedIndex,
    StreamNetworkParams,
};
use flowroute_core::raster::d8;
use flowroute_core::{GeoTransform, Progress, Raster, RasterElement};

// ─── CLI structure ──────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "flowroute")]
#[command(author, version, about = "Sorted-order flow routing over raster surfaces", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Synthetic elevation surface
#[derive(Args)]
struct SurfaceArgs {
    /// Surface shape: ramp, bowl, valley, pit
    #[arg(short, long, default_value = "valley")]
    surface: String,
    /// Number of rows
    #[arg(long, default_value = "200")]
    rows: usize,
    /// Number of columns
    #[arg(long, default_value = "200")]
    cols: usize,
    /// Cell size in map units
    #[arg(long, default_value = "10.0")]
    cell_size: f64,
}

/// Direction method selection
#[derive(Args)]
struct MethodArgs {
    /// Routing method: d8, mfd
    #[arg(short, long, default_value = "d8")]
    method: String,
    /// MFD convergence exponent
    #[arg(short, long, default_value = "1.1")]
    exponent: f64,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the sorted cell index and report its extent
    Index {
        #[command(flatten)]
        surface: SurfaceArgs,
    },
    /// Resolve D8 or MFD flow directions
    Direction {
        #[command(flatten)]
        surface: SurfaceArgs,
        #[command(flatten)]
        method: MethodArgs,
    },
    /// Accumulate contributing area
    Accumulate {
        #[command(flatten)]
        surface: SurfaceArgs,
        #[command(flatten)]
        method: MethodArgs,
        /// Report area instead of cell counts
        #[arg(long)]
        area: bool,
        /// Route cells above this many contributing cells with D8
        #[arg(long)]
        linear_threshold: Option<f64>,
    },
    /// Longest flow path length
    Length {
        #[command(flatten)]
        surface: SurfaceArgs,
        #[command(flatten)]
        method: MethodArgs,
        /// Measure from the divide instead of to the outlet
        #[arg(long)]
        upstream: bool,
    },
    /// Label drainage basins
    Basins {
        #[command(flatten)]
        surface: SurfaceArgs,
        /// Discard basins with fewer cells
        #[arg(long, default_value = "0")]
        min_size: usize,
        /// Seed from channels of at least this Strahler order instead of outlets
        #[arg(long)]
        order: Option<i32>,
    },
    /// Flood a lake from a seed cell
    Flood {
        #[command(flatten)]
        surface: SurfaceArgs,
        /// Seed row
        #[arg(long)]
        row: usize,
        /// Seed column
        #[arg(long)]
        col: usize,
        /// Water depth above the seed
        #[arg(long, conflicts_with = "level")]
        depth: Option<f64>,
        /// Absolute water level
        #[arg(long)]
        level: Option<f64>,
    },
    /// Burn an accumulation-derived channel network into the surface
    Burn {
        #[command(flatten)]
        surface: SurfaceArgs,
        /// Burn method: decrement, minimum
        #[arg(long, default_value = "decrement")]
        burn: String,
        /// Amount to lower channel cells by
        #[arg(long, default_value = "1.0")]
        epsilon: f64,
        /// Accumulation threshold (cells) defining channels
        #[arg(long, default_value = "100")]
        threshold: f64,
    },
}

// ─── Helpers ────────────────────────────────────────────────────────────

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to install logger")
}

/// Progress bar fed by the sweeps
struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    fn new(msg: &str) -> Result<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{msg} [{bar:40.cyan/blue}] {pos}/{len}")
                .context("Invalid progress template")?
                .progress_chars("=> "),
        );
        bar.set_message(msg.to_string());
        Ok(Self { bar })
    }

    fn finish(self) {
        self.bar.finish_and_clear();
    }
}

impl Progress for BarProgress {
    fn set_progress(&self, done: usize, total: usize) {
        if self.bar.length() != Some(total as u64) {
            self.bar.set_length(total as u64);
        }
        self.bar.set_position(done as u64);
    }
}

fn make_surface(args: &SurfaceArgs) -> Result<Raster<f64>> {
    let (rows, cols) = (args.rows, args.cols);
    if rows == 0 || cols == 0 {
        anyhow::bail!("Surface must have at least one row and column");
    }
    if !args.cell_size.is_finite() || args.cell_size <= 0.0 {
        anyhow::bail!("Cell size must be positive, got {}", args.cell_size);
    }

    let (cr, cc) = (rows as f64 / 2.0, cols as f64 / 2.0);
    // Small deterministic roughness so flats do not dominate
    let noise = |row: usize, col: usize| ((row * 7 + col * 13) % 17) as f64 * 0.01;
    let elevation: Box<dyn Fn(usize, usize) -> f64> = match args.surface.to_lowercase().as_str() {
        "ramp" => Box::new(move |_, col| (cols - col) as f64),
        "bowl" => Box::new(move |row, col| {
            let (dr, dc) = (row as f64 - cr, col as f64 - cc);
            (dr * dr + dc * dc).sqrt() + noise(row, col)
        }),
        "valley" => Box::new(move |row, col| {
            (col as f64 - cc).abs() * 2.0 + (rows - row) as f64 + noise(row, col)
        }),
        "pit" => Box::new(move |row, col| {
            let (dr, dc) = (row as f64 - cr, col as f64 - cc);
            let dist = (dr * dr + dc * dc).sqrt();
            (cols - col) as f64 * 0.5 + (10.0 - dist).max(0.0) * -1.5 + noise(row, col)
        }),
        other => anyhow::bail!("Unknown surface: {}. Use ramp, bowl, valley, or pit.", other),
    };

    let mut dem = Raster::new(rows, cols);
    dem.set_transform(GeoTransform::new(0.0, rows as f64 * args.cell_size, args.cell_size, -args.cell_size));
    dem.set_nodata(Some(f64::NAN));
    for row in 0..rows {
        for col in 0..cols {
            dem.set(row, col, elevation(row, col))?;
        }
    }
    info!("Surface: {} ({} x {}, cell {})", args.surface, cols, rows, args.cell_size);
    Ok(dem)
}

fn parse_method(args: &MethodArgs) -> Result<RoutingMethod> {
    match args.method.to_lowercase().as_str() {
        "d8" => Ok(RoutingMethod::D8),
        "mfd" => Ok(RoutingMethod::Mfd {
            exponent: args.exponent,
        }),
        _ => anyhow::bail!("Unknown method: {}. Use d8 or mfd.", args.method),
    }
}

fn parse_burn_method(s: &str) -> Result<BurnMethod> {
    match s.to_lowercase().as_str() {
        "decrement" | "dec" => Ok(BurnMethod::Decrement),
        "minimum" | "min" | "neighbor-minimum" => Ok(BurnMethod::NeighborMinimum),
        _ => anyhow::bail!("Unknown burn method: {}. Use decrement or minimum.", s),
    }
}

fn summary<T: RasterElement + std::fmt::Display>(name: &str, raster: &Raster<T>) {
    let stats = raster.statistics();
    println!("{}:", name);
    if let (Some(min), Some(max)) = (stats.min, stats.max) {
        println!("  Min: {:.4}  Max: {:.4}", min, max);
    }
    if let Some(mean) = stats.mean {
        println!("  Mean: {:.4}", mean);
    }
    println!(
        "  Valid cells: {} ({:.1}%)",
        stats.valid_count,
        100.0 * stats.valid_count as f64 / raster.len() as f64
    );
}

fn done(elapsed: Duration, completed: bool) {
    if !completed {
        println!("  Sweep cancelled; unprocessed cells are no-data");
    }
    println!("  Processing time: {:.2?}", elapsed);
}

fn build_index(dem: &Raster<f64>) -> Result<SortedIndex> {
    let progress = BarProgress::new("Sorting")?;
    let index = SortedIndex::build(dem, &progress).context("Failed to build sorted index")?;
    progress.finish();
    Ok(index)
}

fn build_routing(dem: &Raster<f64>, method: RoutingMethod) -> Result<FlowRouting> {
    let progress = BarProgress::new("Directions")?;
    let routing = resolve_routing(dem, method, &progress).context("Failed to resolve flow directions")?;
    progress.finish();
    Ok(routing)
}

// ─── Main ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;

    match cli.command {
        Commands::Index { surface } => {
            let dem = make_surface(&surface)?;
            let start = Instant::now();
            let index = build_index(&dem)?;
            let elapsed = start.elapsed();

            println!("Sorted index: {} valid cells", index.len());
            if let (Some(low), Some(high)) = (
                index.get(SortOrder::Ascending, 0),
                index.get(SortOrder::Descending, 0),
            ) {
                println!("  Lowest cell: {:?} = {:.4}", low, dem.get(low.0, low.1)?);
                println!("  Highest cell: {:?} = {:.4}", high, dem.get(high.0, high.1)?);
            }
            done(elapsed, true);
        }

        Commands::Direction { surface, method } => {
            let dem = make_surface(&surface)?;
            let method = parse_method(&method)?;
            let start = Instant::now();
            let routing = build_routing(&dem, method)?;
            let elapsed = start.elapsed();

            let (rows, cols) = dem.shape();
            let terminal = (0..rows)
                .flat_map(|r| (0..cols).map(move |c| (r, c)))
                .filter(|&(r, c)| dem.is_valid(r, c) && routing.is_terminal(r, c))
                .count();
            match &routing {
                FlowRouting::D8(dirs) => {
                    println!("D8 directions resolved");
                    let sinks = dirs.data().iter().filter(|&&d| d == d8::SINK).count();
                    println!("  Sinks: {}", sinks);
                }
                FlowRouting::Mfd(_) => {
                    let exponent = match method {
                        RoutingMethod::Mfd { exponent } => exponent,
                        RoutingMethod::D8 => MfdParams::default().exponent,
                    };
                    println!("MFD weights resolved (exponent {})", exponent);
                }
            }
            println!("  Terminal cells: {}", terminal);
            done(elapsed, true);
        }

        Commands::Accumulate {
            surface,
            method,
            area,
            linear_threshold,
        } => {
            let dem = make_surface(&surface)?;
            let params = AccumulationParams {
                routing: parse_method(&method)?,
                unit: if area { FlowUnit::Area } else { FlowUnit::Cells },
                linear_threshold,
                ..Default::default()
            };
            let start = Instant::now();
            let progress = BarProgress::new("Accumulating")?;
            let out = flow_accumulation(&dem, params, &progress).context("Failed to accumulate flow")?;
            progress.finish();
            let elapsed = start.elapsed();

            summary("Flow accumulation", &out.flow);
            summary("Mean flow length", &out.mean_flow_length);
            done(elapsed, out.completed);
        }

        Commands::Length {
            surface,
            method,
            upstream,
        } => {
            let dem = make_surface(&surface)?;
            let method = parse_method(&method)?;
            let start = Instant::now();
            let index = build_index(&dem)?;
            let routing = build_routing(&dem, method)?;
            let params = FlowLengthParams {
                direction: if upstream {
                    FlowLengthDirection::Upstream
                } else {
                    FlowLengthDirection::Downstream
                },
                weights: None,
            };
            let progress = BarProgress::new("Flow length")?;
            let out = flow_length(&dem, &index, &routing, params, &progress)
                .context("Failed to compute flow length")?;
            progress.finish();
            let elapsed = start.elapsed();

            summary("Flow length", &out.length);
            done(elapsed, out.completed);
        }

        Commands::Basins {
            surface,
            min_size,
            order,
        } => {
            let dem = make_surface(&surface)?;
            let start = Instant::now();
            let index = build_index(&dem)?;
            let routing = build_routing(&dem, RoutingMethod::D8)?;

            let seeds = match (order, routing.as_d8()) {
                (Some(min_order), Some(dirs)) => {
                    let progress = BarProgress::new("Stream order")?;
                    let order = strahler_order(&index, dirs, &progress).context("Failed to compute stream order")?;
                    progress.finish();
                    BasinSeeds::Channels(channels_from_order(&order.order, min_order)?)
                }
                _ => BasinSeeds::Outlets,
            };

            let progress = BarProgress::new("Labelling")?;
            let out = label_basins(&dem, &index, &routing, BasinParams { seeds, min_size }, &progress)
                .context("Failed to label basins")?;
            progress.finish();
            let elapsed = start.elapsed();

            println!("Basins: {} kept, {} suppressed", out.basins.len(), out.suppressed);
            if let Some(largest) = out.basins.iter().max_by_key(|b| b.cells) {
                println!(
                    "  Largest: id {} with {} cells, outlet {:?}",
                    largest.id, largest.cells, largest.outlet
                );
            }
            done(elapsed, out.completed);
        }

        Commands::Flood {
            surface,
            row,
            col,
            depth,
            level,
        } => {
            let dem = make_surface(&surface)?;
            let target = match (depth, level) {
                (Some(d), None) => FloodTarget::Depth(d),
                (None, Some(l)) => FloodTarget::Level(l),
                _ => anyhow::bail!("Give exactly one of --depth or --level"),
            };
            let start = Instant::now();
            let mut lake = LakeFlood::new(&dem)?;
            let outcome = lake.flood((row, col), target).context("Failed to flood")?;
            let elapsed = start.elapsed();

            match outcome {
                FloodOutcome::Flooded { cells } => {
                    println!("Flooded {} cells", cells);
                    summary("Water depth", lake.depth());
                }
                FloodOutcome::AlreadyFlooded => println!("Seed already at or above the target level"),
                FloodOutcome::InvalidSeed => println!("Seed ({}, {}) is outside the grid or no-data", row, col),
            }
            done(elapsed, true);
        }

        Commands::Burn {
            surface,
            burn,
            epsilon,
            threshold,
        } => {
            let dem = make_surface(&surface)?;
            let method = parse_burn_method(&burn)?;
            let start = Instant::now();
            let progress = BarProgress::new("Accumulating")?;
            let flow = flow_accumulation(&dem, AccumulationParams::default(), &progress)
                .context("Failed to accumulate flow")?
                .flow;
            progress.finish();
            let channels = stream_network(&flow, StreamNetworkParams { threshold })?;
            let burned = burn_streams(&dem, &channels, BurnParams { method, epsilon })
                .context("Failed to burn streams")?;
            let elapsed = start.elapsed();

            let channel_cells = channels.data().iter().filter(|&&v| v == 1).count();
            println!("Burned {} channel cells", channel_cells);
            summary("Burned surface", &burned);
            done(elapsed, true);
        }
    }

    Ok(())
}
