//! Compositor integration tests.
//!
//! Tests verify:
//! - Visible tile ranges with and without viewport padding
//! - Decode failures stay confined to their tile
//! - Level changes are reported to observers
//! - A full async render loop onto a canvas

use std::sync::Arc;
use std::time::Duration;

use image::Rgba;
use parking_lot::Mutex;

use tileview::error::DecodeError;
use tileview::{
    Canvas, Compositor, CompositorConfig, DetailLevel, Rect, RecordingSurface, RenderStats,
    TileKey, TileRange, TileState,
};

use super::test_utils::{settle, test_config, MockProvider};

fn shared_stats(compositor: &mut Compositor) -> Arc<Mutex<RenderStats>> {
    let stats = Arc::new(Mutex::new(RenderStats::default()));
    compositor.set_render_observer(Box::new(Arc::clone(&stats)));
    stats
}

// =============================================================================
// Visibility
// =============================================================================

#[test]
fn test_full_viewport_single_level() {
    let mut compositor = Compositor::new(Arc::new(MockProvider::new()), test_config());
    compositor.add_detail_level(1.0, "tiles", 256, 256).unwrap();
    compositor.set_size(512, 512);
    compositor.update_viewport(Rect::new(0, 0, 512, 512));

    settle(&mut compositor);

    assert_eq!(
        compositor.tile_range(),
        Some(TileRange {
            row_start: 0,
            row_end: 2,
            column_start: 0,
            column_end: 2,
        })
    );
    assert_eq!(compositor.tile_count(), 4);
    assert_eq!(compositor.count_in_state(TileState::Decoded), 4);

    let keys: Vec<(i32, i32)> = compositor
        .tiles()
        .iter()
        .map(|tile| (tile.column(), tile.row()))
        .collect();
    assert_eq!(keys, vec![(0, 0), (1, 0), (0, 1), (1, 1)]);
}

#[test]
fn test_padding_never_shrinks_visible_set() {
    let render = |padding: i32, viewport: Rect| {
        let mut compositor = Compositor::new(
            Arc::new(MockProvider::new()),
            CompositorConfig {
                viewport_padding: padding,
                ..test_config()
            },
        );
        compositor.add_detail_level(1.0, "tiles", 256, 256).unwrap();
        compositor.set_size(1024, 1024);
        compositor.update_viewport(viewport);
        settle(&mut compositor);
        compositor.tile_range().unwrap()
    };

    // clamped to the canvas: identical
    let full = Rect::new(0, 0, 512, 512);
    assert_eq!(render(0, full).len(), 4);
    assert_eq!(render(50, full).rows(), 3);

    // interior viewport grows by a ring of tiles
    let inner = Rect::new(256, 256, 512, 512);
    let plain = render(0, inner);
    let padded = render(50, inner);
    assert_eq!(plain.len(), 1);
    assert_eq!(
        padded,
        TileRange {
            row_start: 0,
            row_end: 3,
            column_start: 0,
            column_end: 3,
        }
    );
    for row in plain.row_start..plain.row_end {
        for column in plain.column_start..plain.column_end {
            assert!(padded.contains(column, row));
        }
    }
}

#[test]
fn test_zoomed_out_uses_coarse_level() {
    let mut compositor = Compositor::new(Arc::new(MockProvider::new()), test_config());
    compositor.add_detail_level(1.0, "full", 256, 256).unwrap();
    compositor.add_detail_level(0.25, "quarter", 256, 256).unwrap();
    compositor.set_size(4096, 4096);
    compositor.set_scale(0.2);
    compositor.update_viewport(Rect::new(0, 0, 819, 819));

    settle(&mut compositor);

    // 0.2 / 0.25 shrinks each 256px tile to 204.8px on screen
    assert_eq!(compositor.current_level().unwrap().scale, 0.25);
    assert_eq!(compositor.tile_range().unwrap().columns(), 4);
    assert!(compositor.tiles().iter().all(|t| t.level_scale() == 0.25));
}

// =============================================================================
// Failures
// =============================================================================

#[test]
fn test_failing_tile_is_isolated() {
    let provider = Arc::new(MockProvider::new().failing(2, 3));
    let mut compositor = Compositor::new(provider, test_config());
    let stats = shared_stats(&mut compositor);
    compositor.add_detail_level(1.0, "tiles", 256, 256).unwrap();
    compositor.set_size(1024, 1024);
    compositor.update_viewport(Rect::new(0, 0, 1024, 1024));

    settle(&mut compositor);

    let failed = TileKey::new(2, 3, 1.0);
    assert_eq!(compositor.tile(&failed).unwrap().state(), TileState::Unassigned);
    assert!(!compositor.tile(&failed).unwrap().has_image());
    assert_eq!(compositor.tile_count(), 16);
    assert_eq!(compositor.count_in_state(TileState::Decoded), 15);

    let stats = stats.lock();
    assert_eq!(stats.decode_errors.len(), 1);
    assert_eq!(stats.decode_errors[0].0, failed);
    assert!(matches!(stats.decode_errors[0].1, DecodeError::Io { .. }));
    assert_eq!(stats.completed, 1);
}

#[test]
fn test_missing_tile_reported_as_not_found() {
    let provider = Arc::new(MockProvider::new().missing(0, 0));
    let mut compositor = Compositor::new(provider, test_config());
    let stats = shared_stats(&mut compositor);
    compositor.add_detail_level(1.0, "tiles", 256, 256).unwrap();
    compositor.set_size(512, 256);
    compositor.update_viewport(Rect::new(0, 0, 512, 256));

    settle(&mut compositor);

    assert_eq!(compositor.count_in_state(TileState::Decoded), 1);
    let stats = stats.lock();
    assert_eq!(stats.decode_errors.len(), 1);
    assert!(matches!(
        stats.decode_errors[0].1,
        DecodeError::NotFound { .. }
    ));
}

#[test]
fn test_failed_tile_not_drawn() {
    let provider = Arc::new(MockProvider::new().failing(1, 0));
    let mut compositor = Compositor::new(provider, test_config());
    compositor.add_detail_level(1.0, "tiles", 256, 256).unwrap();
    compositor.set_size(512, 256);
    compositor.update_viewport(Rect::new(0, 0, 512, 256));
    settle(&mut compositor);

    let mut surface = RecordingSurface::new();
    compositor.draw(&mut surface);
    let frame = surface.end_frame();
    assert_eq!(frame.len(), 1);
    assert_eq!(frame[0].tile, TileKey::new(0, 0, 1.0));
}

// =============================================================================
// Level Changes
// =============================================================================

#[test]
fn test_level_change_observer() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);

    let mut compositor = Compositor::new(Arc::new(MockProvider::new()), test_config());
    compositor.add_detail_level(0.5, "half", 256, 256).unwrap();
    compositor.add_detail_level(1.0, "full", 256, 256).unwrap();
    compositor.set_size(1024, 1024);
    assert_eq!(compositor.current_level().unwrap().scale, 1.0);

    compositor.set_level_change_observer(Box::new(move |level: &DetailLevel| {
        sink.lock().push(level.scale());
    }));

    compositor.set_scale(0.4);
    compositor.set_scale(0.45);
    compositor.set_scale(0.9);
    compositor.set_scale(0.3);

    // only actual switches are reported
    assert_eq!(*seen.lock(), vec![0.5, 1.0, 0.5]);
}

#[test]
fn test_switch_back_and_forth_settles_on_final_level() {
    let provider = Arc::new(MockProvider::new());
    let mut compositor = Compositor::new(provider, test_config());
    let stats = shared_stats(&mut compositor);
    compositor.add_detail_level(0.5, "half", 256, 256).unwrap();
    compositor.add_detail_level(1.0, "full", 256, 256).unwrap();
    compositor.set_size(1024, 1024);
    compositor.set_scale(1.0);
    compositor.update_viewport(Rect::new(0, 0, 1024, 1024));
    compositor.poll();

    compositor.set_scale(0.5);
    compositor.update_viewport(Rect::new(0, 0, 512, 512));
    settle(&mut compositor);

    assert_eq!(compositor.current_level().unwrap().scale, 0.5);
    assert_eq!(compositor.last_rendered_level().unwrap().scale, 0.5);
    assert_eq!(compositor.count_in_state(TileState::Decoded), 4);
    assert!(compositor.tiles().iter().all(|t| t.level_scale() == 0.5));
    assert!(stats.lock().cancelled >= 1);
}

// =============================================================================
// Async Render Loop
// =============================================================================

#[tokio::test]
async fn test_render_loop_onto_canvas() {
    let provider = Arc::new(MockProvider::new().with_color([10, 200, 30, 255]));
    let mut compositor = Compositor::new(
        provider,
        CompositorConfig {
            render_buffer: Duration::from_millis(15),
            transition_duration: Duration::from_millis(30),
            ..test_config()
        },
    );
    compositor.set_transitions_enabled(true);
    compositor.add_detail_level(1.0, "tiles", 64, 64).unwrap();
    compositor.set_size(256, 128);
    let viewport = Rect::new(0, 0, 256, 128);
    compositor.update_viewport(viewport);

    let mut canvas = Canvas::new(viewport);
    let frames = tokio::time::timeout(Duration::from_secs(5), async {
        let mut frames = 0;
        loop {
            compositor.poll();
            if compositor.needs_draw() {
                canvas.clear();
                if compositor.draw(&mut canvas) {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                frames += 1;
                continue;
            }
            if compositor.is_idle() {
                return frames;
            }
            compositor.wait_for_work().await;
        }
    })
    .await
    .expect("render loop did not settle");

    assert!(frames >= 2);
    assert_eq!(compositor.count_in_state(TileState::Decoded), 8);
    assert_eq!(canvas.draw_count(), 8);
    for (x, y) in [(0, 0), (255, 127), (100, 70)] {
        assert_eq!(canvas.pixels().get_pixel(x, y), &Rgba([10, 200, 30, 255]));
    }
}
