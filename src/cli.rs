// ============================================================================
// paintfe-tiles CLI – headless scenarios, stress runs and benchmarks
// ============================================================================
//
// Usage examples:
//   paintfe-tiles scenario
//   paintfe-tiles stress --readers 8 --writers 2 --iterations 5000
//   paintfe-tiles bench --op multiply --size 1024 --opacity 0.5
//   paintfe-tiles --config engine.cfg roundtrip --output /tmp/dev.pft

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use clap::{Args, Parser, Subcommand};

use paintfe_tiles::config::EngineConfig;
use paintfe_tiles::device::PaintDevice;
use paintfe_tiles::error::{Result, TileError};
use paintfe_tiles::geometry::{Rect, TileCoord};
use paintfe_tiles::io::{load_device_file, save_device_file};
use paintfe_tiles::ops::Painter;
use paintfe_tiles::random::RandomSource;
use paintfe_tiles::tiles::{ChannelLayout, Tile, TileStore};

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// Headless driver for the tiled paint engine.
#[derive(Parser, Debug)]
#[command(
    name = "paintfe-tiles",
    about = "Tiled paint engine: scenarios, stress tests and benchmarks",
    version
)]
pub struct CliArgs {
    /// Engine settings file (`key=value` per line). Flags override it.
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Session log file. Defaults to the platform data directory.
    #[arg(long, global = true, value_name = "FILE")]
    pub log: Option<PathBuf>,

    /// Log at debug level and print per-step details.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Paint a half-opaque red dab onto a transparent device and print pixels.
    Scenario,
    /// Concurrent readers and writers on one tile store.
    Stress(StressArgs),
    /// Composite throughput for one op.
    Bench(BenchArgs),
    /// Save a generated device, load it back and compare.
    Roundtrip(RoundtripArgs),
}

#[derive(Args, Debug)]
pub struct StressArgs {
    #[arg(long, default_value_t = 4)]
    pub readers: usize,
    #[arg(long, default_value_t = 2)]
    pub writers: usize,
    /// Operations per writer.
    #[arg(long, default_value_t = 2000)]
    pub iterations: usize,
    /// How long a reader keeps a snapshot before checking it.
    #[arg(long, default_value_t = 0, value_name = "MS")]
    pub hold_ms: u64,
}

#[derive(Args, Debug)]
pub struct BenchArgs {
    #[arg(long, default_value = "over", value_name = "ID")]
    pub op: String,
    /// Edge length of the painted square.
    #[arg(long, default_value_t = 1024)]
    pub size: i32,
    #[arg(long, default_value_t = 0.5)]
    pub opacity: f32,
    #[arg(long, default_value_t = 5)]
    pub passes: usize,
}

#[derive(Args, Debug)]
pub struct RoundtripArgs {
    #[arg(short, long, value_name = "FILE")]
    pub output: PathBuf,
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run the selected command and return an OS exit code.
pub fn run(args: CliArgs, config: EngineConfig) -> ExitCode {
    let start = Instant::now();
    let result = match &args.command {
        Command::Scenario => run_scenario(&config),
        Command::Stress(s) => run_stress(s, &config),
        Command::Bench(b) => run_bench(b, &config),
        Command::Roundtrip(r) => run_roundtrip(r, &config),
    };
    if args.verbose {
        println!("done in {:.0}ms", start.elapsed().as_secs_f64() * 1000.0);
    }
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{:?} failed: {}", args.command, e);
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Resolve the effective config: file (if any), then command-line overrides.
pub fn load_config(args: &CliArgs) -> Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::load_from(path)?,
        None => EngineConfig::default(),
    };
    if args.verbose {
        config.log_level = "debug".to_string();
    }
    config.validate()?;
    Ok(config)
}

// ============================================================================
// Commands
// ============================================================================

fn run_scenario(config: &EngineConfig) -> Result<()> {
    let device = PaintDevice::with_config(ChannelLayout::rgba8(), &[0, 0, 0, 0], config)?;
    let dab = [255u8, 0, 0, 255].repeat(100);
    let mut painter = Painter::new(&device);
    painter.set_opacity(128.0 / 255.0);
    painter.bit_blt_buffer(5, 5, &dab, 10, 10, None)?;

    for (x, y) in [(5, 5), (14, 14), (20, 20)] {
        println!("({:>2},{:>2}) = {:?}", x, y, device.pixel(x, y).as_slice());
    }
    if let Some(dirty) = painter.take_dirty_rect() {
        println!("dirty = {:?}", dirty);
    }
    println!("tiles = {}", device.tile_count());
    Ok(())
}

/// Tile contents written by the stress writers: every byte of a tile holds
/// the same value, so a torn or freed buffer shows up as a mixed tile.
fn stress_tile(coord: TileCoord, value: u8) -> Result<Tile> {
    Tile::filled(coord, &[value; 4])
}

fn run_stress(args: &StressArgs, config: &EngineConfig) -> Result<()> {
    const GRID: i32 = 8;
    let store = Arc::new(TileStore::with_shards(&[0, 0, 0, 0], config.shard_count)?);
    let stop = Arc::new(AtomicBool::new(false));
    let reads = Arc::new(AtomicU64::new(0));
    let errors = Arc::new(AtomicU64::new(0));
    let hold = Duration::from_millis(args.hold_ms);

    let readers: Vec<_> = (0..args.readers)
        .map(|i| {
            let store = Arc::clone(&store);
            let stop = Arc::clone(&stop);
            let reads = Arc::clone(&reads);
            let errors = Arc::clone(&errors);
            thread::spawn(move || {
                let ctx = store.register_reader();
                let mut rng = RandomSource::new(i as u64);
                while !stop.load(Ordering::Acquire) {
                    let coord = TileCoord::new(rng.generate_range(0, GRID as i64 - 1) as i32, 0);
                    let tile = store.tile_at(coord);
                    if !hold.is_zero() {
                        thread::sleep(hold);
                    }
                    let first = tile.data()[0];
                    if tile.data().iter().any(|&b| b != first) {
                        errors.fetch_add(1, Ordering::Relaxed);
                    }
                    reads.fetch_add(1, Ordering::Relaxed);
                    drop(tile);
                    ctx.quiescent();
                }
            })
        })
        .collect();

    let writers: Vec<_> = (0..args.writers)
        .map(|w| {
            let store = Arc::clone(&store);
            let iterations = args.iterations;
            let writers = args.writers as i32;
            thread::spawn(move || -> Result<()> {
                let mut rng = RandomSource::new(1000 + w as u64);
                // Writer `w` owns columns w, w + writers, ...
                let cols: Vec<i32> = (0..GRID).filter(|c| c % writers == w as i32).collect();
                if cols.is_empty() {
                    return Ok(());
                }
                for n in 0..iterations {
                    let col = cols[rng.generate_range(0, cols.len() as i64 - 1) as usize];
                    let coord = TileCoord::new(col, 0);
                    match n % 3 {
                        0 => store.set_tile(coord, stress_tile(coord, n as u8)?)?,
                        1 => {
                            store.remove_tile(coord);
                        }
                        _ => {
                            let cell = store.ensure_writable_tile_at(coord)?;
                            let mut tile = cell.lock();
                            tile.writable_view()?.fill(n as u8);
                        }
                    }
                }
                Ok(())
            })
        })
        .collect();

    let mut writer_result = Ok(());
    for handle in writers {
        match handle.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => writer_result = Err(e),
            Err(_) => writer_result = Err(TileError::Config("writer thread panicked".into())),
        }
    }
    stop.store(true, Ordering::Release);
    for handle in readers {
        if handle.join().is_err() {
            errors.fetch_add(1, Ordering::Relaxed);
        }
    }
    writer_result?;

    let pending = store.pending_reclamations();
    store.flush_reclamation();
    let errors = errors.load(Ordering::Relaxed);
    println!(
        "reads = {}, inconsistent = {}, pending before flush = {}, tiles = {}",
        reads.load(Ordering::Relaxed),
        errors,
        pending,
        store.tile_count()
    );
    if errors > 0 {
        return Err(TileError::Config(format!("{} inconsistent tile reads", errors)));
    }
    Ok(())
}

fn run_bench(args: &BenchArgs, config: &EngineConfig) -> Result<()> {
    let layout = config.layout()?;
    let ps = layout.pixel_size();
    let device = PaintDevice::with_config(layout, &vec![0u8; ps], config)?;
    let mut painter = Painter::new(&device);
    painter.set_composite_op(&args.op)?;
    painter.set_opacity(args.opacity);

    let size = args.size.max(1);
    let mut rng = RandomSource::new(1);
    let src: Vec<u8> = (0..size as usize * size as usize * ps)
        .map(|_| rng.generate() as u8)
        .collect();

    // Warm-up pass allocates the tiles.
    painter.bit_blt_buffer(0, 0, &src, size, size, None)?;
    let start = Instant::now();
    for _ in 0..args.passes {
        painter.bit_blt_buffer(0, 0, &src, size, size, None)?;
    }
    let secs = start.elapsed().as_secs_f64().max(1e-9);
    let mpix = (size as f64 * size as f64 * args.passes as f64) / 1e6;
    println!(
        "{} {}x{} x{}: {:.1} Mpx/s ({} tiles)",
        painter.composite_op(),
        size,
        size,
        args.passes,
        mpix / secs,
        device.tile_count()
    );
    Ok(())
}

fn run_roundtrip(args: &RoundtripArgs, config: &EngineConfig) -> Result<()> {
    let layout = config.layout()?;
    let ps = layout.pixel_size();
    let device = PaintDevice::with_config(layout, &vec![0u8; ps], config)?;
    let mut painter = Painter::new(&device);
    let mut rng = RandomSource::new(42);
    for _ in 0..32 {
        let x = rng.generate_range(-300, 300) as i32;
        let y = rng.generate_range(-300, 300) as i32;
        let pixel: Vec<u8> = (0..ps).map(|_| rng.generate() as u8).collect();
        painter.fill_rect(Rect::new(x, y, 40, 25), &pixel)?;
    }

    save_device_file(&device, &args.output)?;
    let loaded = load_device_file(&args.output)?;

    let extent = device.extent();
    if loaded.extent() != extent || loaded.read_vec(extent)? != device.read_vec(extent)? {
        return Err(TileError::InvalidFormat("reloaded device differs".into()));
    }
    println!(
        "round trip ok: {} tiles, extent {:?} -> {}",
        loaded.tile_count(),
        extent,
        args.output.display()
    );
    Ok(())
}
