//! File-backed rendering integration tests.
//!
//! Tests verify:
//! - A manifest on disk renders onto a canvas with tiles in the right place
//! - Edge tiles smaller than the nominal tile size
//! - Missing tile files are reported and skipped
//! - The decoded-tile cache serves re-renders

use std::fs;
use std::path::Path;
use std::sync::Arc;

use image::Rgba;
use parking_lot::Mutex;

use tileview::error::DecodeError;
use tileview::{
    CachedProvider, Canvas, Compositor, FileTileProvider, Manifest, Rect, RenderStats, TileState,
};

use super::test_utils::{settle, test_config, write_tile};

const RED: [u8; 4] = [255, 0, 0, 255];
const GREEN: [u8; 4] = [0, 255, 0, 255];
const BLUE: [u8; 4] = [0, 0, 255, 255];
const WHITE: [u8; 4] = [255, 255, 255, 255];
const GRAY: [u8; 4] = [128, 128, 128, 255];

/// 64x64 image: four 32px tiles at full scale, one 32px tile at half.
fn write_pyramid(dir: &Path) -> Manifest {
    write_tile(&dir.join("full/0_0.png"), 32, 32, RED);
    write_tile(&dir.join("full/1_0.png"), 32, 32, GREEN);
    write_tile(&dir.join("full/0_1.png"), 32, 32, BLUE);
    write_tile(&dir.join("full/1_1.png"), 32, 32, WHITE);
    write_tile(&dir.join("half/0_0.png"), 32, 32, GRAY);

    let path = dir.join("pyramid.json");
    fs::write(
        &path,
        r#"{
            "width": 64,
            "height": 64,
            "levels": [
                { "scale": 1.0, "pattern": "full/{col}_{row}.png", "tile_width": 32, "tile_height": 32 },
                { "scale": 0.5, "pattern": "half/{col}_{row}.png", "tile_width": 32, "tile_height": 32 }
            ]
        }"#,
    )
    .unwrap();
    Manifest::load(&path).unwrap()
}

fn render(compositor: &mut Compositor, viewport: Rect) -> Canvas {
    compositor.update_viewport(viewport);
    settle(compositor);

    let mut canvas = Canvas::new(viewport);
    compositor.draw(&mut canvas);
    canvas
}

#[test]
fn test_manifest_renders_full_level() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = write_pyramid(dir.path());

    let provider = Arc::new(FileTileProvider::new(manifest.root()));
    let mut compositor = Compositor::new(provider, test_config());
    manifest.apply(&mut compositor).unwrap();
    compositor.set_scale(1.0);

    let canvas = render(&mut compositor, Rect::new(0, 0, 64, 64));

    assert_eq!(compositor.count_in_state(TileState::Decoded), 4);
    let pixels = canvas.pixels();
    assert_eq!(pixels.get_pixel(5, 5), &Rgba(RED));
    assert_eq!(pixels.get_pixel(40, 5), &Rgba(GREEN));
    assert_eq!(pixels.get_pixel(5, 40), &Rgba(BLUE));
    assert_eq!(pixels.get_pixel(63, 63), &Rgba(WHITE));
}

#[test]
fn test_manifest_renders_coarse_level_when_zoomed_out() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = write_pyramid(dir.path());

    let provider = Arc::new(FileTileProvider::new(manifest.root()));
    let mut compositor = Compositor::new(provider, test_config());
    manifest.apply(&mut compositor).unwrap();
    compositor.set_scale(0.5);

    let canvas = render(&mut compositor, Rect::new(0, 0, 32, 32));

    assert_eq!(compositor.current_level().unwrap().scale, 0.5);
    assert_eq!(compositor.tile_count(), 1);
    assert_eq!(canvas.pixels().get_pixel(16, 16), &Rgba(GRAY));
}

#[test]
fn test_panned_viewport_is_translated() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = write_pyramid(dir.path());

    let provider = Arc::new(FileTileProvider::new(manifest.root()));
    let mut compositor = Compositor::new(provider, test_config());
    manifest.apply(&mut compositor).unwrap();

    let canvas = render(&mut compositor, Rect::new(32, 32, 64, 64));

    assert_eq!(compositor.tile_count(), 1);
    assert_eq!(canvas.viewport(), Rect::new(32, 32, 64, 64));
    assert_eq!(canvas.pixels().get_pixel(0, 0), &Rgba(WHITE));
}

#[test]
fn test_edge_tiles_use_real_image_size() {
    let dir = tempfile::tempdir().unwrap();
    write_tile(&dir.path().join("0_0.png"), 64, 64, RED);
    write_tile(&dir.path().join("1_0.png"), 16, 64, GREEN);

    let provider = Arc::new(FileTileProvider::new(dir.path()));
    let mut compositor = Compositor::new(provider, test_config());
    compositor
        .add_detail_level(1.0, "{col}_{row}.png", 64, 64)
        .unwrap();
    compositor.set_size(80, 64);

    let canvas = render(&mut compositor, Rect::new(0, 0, 80, 64));

    let edge = compositor
        .tiles()
        .into_iter()
        .find(|tile| tile.column() == 1)
        .unwrap();
    assert_eq!(edge.width(), 16);
    assert_eq!(edge.relative_rect(), Rect::new(64, 0, 80, 64));
    assert_eq!(canvas.pixels().get_pixel(70, 10), &Rgba(GREEN));
    assert_eq!(canvas.pixels().get_pixel(60, 10), &Rgba(RED));
}

#[test]
fn test_missing_file_reported_and_skipped() {
    let dir = tempfile::tempdir().unwrap();
    write_tile(&dir.path().join("0_0.png"), 32, 32, RED);

    let provider = Arc::new(FileTileProvider::new(dir.path()));
    let mut compositor = Compositor::new(provider, test_config());
    let stats = Arc::new(Mutex::new(RenderStats::default()));
    compositor.set_render_observer(Box::new(Arc::clone(&stats)));
    compositor
        .add_detail_level(1.0, "{col}_{row}.png", 32, 32)
        .unwrap();
    compositor.set_size(64, 32);

    let canvas = render(&mut compositor, Rect::new(0, 0, 64, 32));

    assert_eq!(compositor.count_in_state(TileState::Decoded), 1);
    assert_eq!(canvas.pixels().get_pixel(10, 10), &Rgba(RED));
    assert_eq!(canvas.pixels().get_pixel(40, 10), &Rgba([0, 0, 0, 0]));

    let stats = stats.lock();
    assert_eq!(stats.decode_errors.len(), 1);
    assert!(matches!(
        stats.decode_errors[0].1,
        DecodeError::NotFound { .. }
    ));
}

#[test]
fn test_cache_serves_rerender() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = write_pyramid(dir.path());

    let provider = Arc::new(CachedProvider::with_capacity(
        FileTileProvider::new(manifest.root()),
        16,
    ));
    let mut compositor = Compositor::new(provider.clone(), test_config());
    manifest.apply(&mut compositor).unwrap();
    render(&mut compositor, Rect::new(0, 0, 64, 64));
    assert_eq!(provider.stats(), (0, 4));

    // dropping every tile forces a fresh decode pass
    compositor.clear();
    compositor.request_render();
    let canvas = render(&mut compositor, Rect::new(0, 0, 64, 64));

    assert_eq!(provider.stats(), (4, 4));
    assert_eq!(canvas.pixels().get_pixel(40, 40), &Rgba(WHITE));
}
