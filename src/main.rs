//! tileview - headless deep-zoom renderer.
//!
//! `render` drives the compositor against tiles on disk and writes the
//! composited viewport as a PNG. `plan` prints the level and tile range a
//! viewport would use.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tileview::{
    config::{Cli, Command, PlanConfig, RenderConfig},
    CachedProvider, Canvas, Compositor, FileTileProvider, Manifest, RenderStats, TileState,
};

/// Pause between frames while tiles are fading in.
const FRAME_INTERVAL: Duration = Duration::from_millis(16);

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.into_command() {
        Command::Render(config) => run_render(config).await,
        Command::Plan(config) => run_plan(config),
    }
}

// =============================================================================
// Render Command
// =============================================================================

async fn run_render(config: RenderConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let manifest = match Manifest::load(&config.view.manifest) {
        Ok(manifest) => manifest,
        Err(e) => {
            error!("Failed to load manifest: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let compositor_config = config.compositor_config();
    info!("Configuration:");
    info!("  Manifest: {}", config.view.manifest.display());
    info!("  Tiles from: {}", manifest.root().display());
    info!(
        "  Image: {}x{}, {} level(s)",
        manifest.width,
        manifest.height,
        manifest.levels.len()
    );
    info!(
        "  Workers: {}..{}, cache: {} tiles",
        compositor_config.pool.min_workers, compositor_config.pool.max_workers, config.cache_tiles
    );

    let provider = Arc::new(CachedProvider::with_capacity(
        FileTileProvider::new(manifest.root()),
        config.cache_tiles,
    ));
    let mut compositor = Compositor::new(provider.clone(), compositor_config);

    let stats = Arc::new(Mutex::new(RenderStats::default()));
    compositor.set_render_observer(Box::new(stats.clone()));

    if let Err(e) = manifest.apply(&mut compositor) {
        error!("Invalid detail level: {}", e);
        return ExitCode::FAILURE;
    }
    compositor.set_scale(config.view.scale);

    let selector = compositor.selector();
    let viewport = config
        .view
        .viewport(selector.scaled_width(), selector.scaled_height());
    if viewport.is_empty() {
        error!("Viewport {:?} does not overlap the image", viewport);
        return ExitCode::FAILURE;
    }
    compositor.update_viewport(viewport);

    if let Some(level) = compositor.current_level() {
        info!("  Level: {} for scale {}", level, config.view.scale);
    }
    info!("  Viewport: {:?}", viewport);

    let mut canvas = Canvas::new(viewport);
    let outcome = tokio::time::timeout(config.timeout(), drive(&mut compositor, &mut canvas)).await;
    let frames = match outcome {
        Ok(frames) => frames,
        Err(_) => {
            error!(
                "Render did not settle within {}s ({} of {} tiles decoded)",
                config.timeout_secs,
                compositor.count_in_state(TileState::Decoded),
                compositor.tile_count()
            );
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = canvas.pixels().save(&config.output) {
        error!("Failed to write {}: {}", config.output.display(), e);
        return ExitCode::FAILURE;
    }

    let stats = stats.lock().clone();
    for (tile, e) in &stats.decode_errors {
        warn!("  Tile {} failed: {}", tile, e);
    }
    let (hits, misses) = provider.stats();
    info!(
        "Wrote {} ({} frames, {} tiles, {} errors)",
        config.output.display(),
        frames,
        compositor.count_in_state(TileState::Decoded),
        stats.decode_errors.len()
    );

    if config.json {
        let json = serde_json::json!({
            "output": config.output.display().to_string(),
            "level": compositor.current_level().map(ToString::to_string),
            "viewport": viewport,
            "tile_range": compositor.tile_range(),
            "tiles": compositor.tile_count(),
            "decoded": compositor.count_in_state(TileState::Decoded),
            "frames": frames,
            "batches_started": stats.started,
            "batches_completed": stats.completed,
            "decode_errors": stats
                .decode_errors
                .iter()
                .map(|(tile, e)| serde_json::json!({ "tile": tile.to_string(), "error": e.to_string() }))
                .collect::<Vec<_>>(),
            "cache": { "hits": hits, "misses": misses },
        });
        match serde_json::to_string_pretty(&json) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                error!("Failed to encode statistics: {}", e);
                return ExitCode::FAILURE;
            }
        }
    }

    ExitCode::SUCCESS
}

/// Pump the compositor until nothing is pending and no frame is requested.
///
/// Returns the number of frames drawn.
async fn drive(compositor: &mut Compositor, canvas: &mut Canvas) -> usize {
    let mut frames = 0;
    loop {
        compositor.poll();

        if compositor.needs_draw() {
            canvas.clear();
            let more = compositor.draw(canvas);
            frames += 1;
            if more {
                tokio::time::sleep(FRAME_INTERVAL).await;
            }
            continue;
        }

        if compositor.is_idle() {
            debug!(frames, "render settled");
            return frames;
        }
        compositor.wait_for_work().await;
    }
}

// =============================================================================
// Plan Command
// =============================================================================

fn run_plan(config: PlanConfig) -> ExitCode {
    if let Err(e) = config.validate() {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    let manifest = match Manifest::load(&config.view.manifest) {
        Ok(manifest) => manifest,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let view = &config.view;
    let plan = match manifest.plan(view.scale, view.padding, |w, h| view.viewport(w, h)) {
        Ok(Some(plan)) => plan,
        Ok(None) => {
            eprintln!("Error: no detail level available");
            return ExitCode::FAILURE;
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match serde_json::to_string_pretty(&plan) {
        Ok(text) => {
            println!("{}", text);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "tileview=debug"
    } else {
        "tileview=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
