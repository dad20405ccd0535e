//! Decode scheduler integration tests.
//!
//! The scheduler is driven directly with tiles, the way the compositor uses
//! it, and its events are applied by hand.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

use tileview::tile::{DecodeOutcome, TaskReport};
use tileview::{DecodeScheduler, PoolConfig, SchedulerEvent, Tile, TileKey, TileState};

use super::test_utils::MockProvider;

const WAIT: Duration = Duration::from_secs(5);

fn row_of_tiles(row: i32, columns: i32, source: &str) -> HashMap<TileKey, Tile> {
    let source: Arc<str> = Arc::from(source);
    (0..columns)
        .map(|column| {
            let tile = Tile::new(column, row, 64, 64, 1.0, Arc::clone(&source));
            (tile.key(), tile)
        })
        .collect()
}

/// Collect task reports until the batch completes.
async fn collect_batch(events: &mut UnboundedReceiver<SchedulerEvent>) -> Vec<TaskReport> {
    let mut reports = Vec::new();
    loop {
        let event = timeout(WAIT, events.recv())
            .await
            .expect("batch did not complete")
            .expect("scheduler dropped");
        match event {
            SchedulerEvent::Task(report) => reports.push(report),
            SchedulerEvent::BatchComplete { .. } => return reports,
        }
    }
}

/// Apply reports the way the owner does: only to tiles still awaiting them.
fn apply(tiles: &mut HashMap<TileKey, Tile>, reports: Vec<TaskReport>) -> usize {
    let mut applied = 0;
    for report in reports {
        let Some(tile) = tiles
            .get_mut(&report.key)
            .filter(|tile| tile.awaits(report.task_id))
        else {
            continue;
        };
        match report.outcome {
            DecodeOutcome::Decoded(image) => {
                tile.complete_decode(image);
                applied += 1;
            }
            DecodeOutcome::Failed(_) | DecodeOutcome::Incomplete => tile.reset(),
        }
    }
    applied
}

#[tokio::test]
async fn test_batch_with_failure_applies_remaining_tiles() {
    let provider = Arc::new(MockProvider::new().failing(2, 0));
    let (mut scheduler, mut events) = DecodeScheduler::new(provider, PoolConfig::new(2, 2));
    let mut tiles = row_of_tiles(0, 5, "tiles");

    let report = scheduler.queue(&mut tiles);
    assert_eq!(report.submitted, 5);
    assert!(report.batch_started);
    assert!(tiles.values().all(|t| t.state() == TileState::PendingDecode));

    let reports = collect_batch(&mut events).await;
    assert_eq!(reports.len(), 5);
    assert_eq!(apply(&mut tiles, reports), 4);

    assert_eq!(
        tiles[&TileKey::new(2, 0, 1.0)].state(),
        TileState::Unassigned
    );
    let decoded = tiles
        .values()
        .filter(|t| t.state() == TileState::Decoded)
        .count();
    assert_eq!(decoded, 4);
    assert_eq!(scheduler.outstanding(), 0);
}

#[tokio::test]
async fn test_requeue_retries_only_unassigned_tiles() {
    let provider = Arc::new(MockProvider::new().failing(1, 0));
    let (mut scheduler, mut events) =
        DecodeScheduler::new(provider.clone(), PoolConfig::new(1, 2));
    let mut tiles = row_of_tiles(0, 3, "tiles");

    scheduler.queue(&mut tiles);
    let reports = collect_batch(&mut events).await;
    apply(&mut tiles, reports);
    assert_eq!(provider.calls(), 3);

    // only the failed tile goes back to the pool
    let report = scheduler.queue(&mut tiles);
    assert_eq!(report.submitted, 1);
    assert!(report.batch_started);
    let reports = collect_batch(&mut events).await;
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].key, TileKey::new(1, 0, 1.0));
    assert_eq!(provider.calls(), 4);
}

#[tokio::test]
async fn test_tiles_leaving_view_are_coalesced() {
    let provider = Arc::new(MockProvider::new());
    let (mut scheduler, mut events) = DecodeScheduler::new(provider, PoolConfig::new(1, 1));

    // first row blocks in the provider until cancelled
    let mut first = row_of_tiles(0, 4, "gated");
    let report = scheduler.queue(&mut first);
    assert_eq!(report.submitted, 4);

    let mut second = row_of_tiles(5, 4, "open");
    let report = scheduler.queue(&mut second);
    assert_eq!(report.submitted, 4);
    assert_eq!(report.coalesced, 4);
    assert!(!report.batch_started);

    let reports = collect_batch(&mut events).await;
    assert_eq!(reports.len(), 8);
    for report in &reports {
        match report.key.row {
            0 => assert!(matches!(report.outcome, DecodeOutcome::Incomplete)),
            _ => assert!(matches!(report.outcome, DecodeOutcome::Decoded(_))),
        }
    }

    assert_eq!(apply(&mut second, reports), 4);
    assert!(second.values().all(|t| t.state() == TileState::Decoded));
}

#[tokio::test]
async fn test_stale_completion_is_discarded() {
    let provider = Arc::new(MockProvider::new());
    let (mut scheduler, mut events) =
        DecodeScheduler::new(provider.clone(), PoolConfig::new(1, 1));
    let mut tiles = row_of_tiles(0, 1, "gated");
    let key = TileKey::new(0, 0, 1.0);

    scheduler.queue(&mut tiles);
    let first_task = tiles[&key].task_id().unwrap();

    // reset cancels the in-flight task; resubmitting gets a fresh one
    tiles.get_mut(&key).unwrap().reset();
    assert!(tiles.get_mut(&key).unwrap().submit(&mut scheduler));
    let second_task = tiles[&key].task_id().unwrap();
    assert_ne!(first_task, second_task);
    provider.open();

    let reports = collect_batch(&mut events).await;
    assert_eq!(reports.len(), 2);
    assert!(!tiles[&key].awaits(first_task));
    assert!(tiles[&key].awaits(second_task));

    assert_eq!(apply(&mut tiles, reports), 1);
    assert_eq!(tiles[&key].state(), TileState::Decoded);
}

#[tokio::test]
async fn test_cancel_all_then_new_batch() {
    let provider = Arc::new(MockProvider::new());
    let (mut scheduler, mut events) =
        DecodeScheduler::new(provider.clone(), PoolConfig::new(1, 1));

    let mut stale = row_of_tiles(0, 3, "gated");
    let abandoned = scheduler.queue(&mut stale).batch;

    scheduler.cancel_all();
    assert_ne!(scheduler.batch(), abandoned);
    assert_eq!(scheduler.outstanding(), 0);
    assert_eq!(scheduler.pending_len(), 0);
    for tile in stale.values_mut() {
        tile.reset();
    }

    let mut fresh = row_of_tiles(1, 2, "open");
    let report = scheduler.queue(&mut fresh);
    assert!(report.batch_started);
    assert!(report.batch > abandoned);
    let fresh_batch = report.batch;

    // reports of the abandoned batch may arrive first; only the new batch completes
    let mut decoded = 0;
    loop {
        let event = timeout(WAIT, events.recv()).await.unwrap().unwrap();
        match event {
            SchedulerEvent::Task(report) if report.key.row == 1 => {
                assert!(matches!(report.outcome, DecodeOutcome::Decoded(_)));
                decoded += 1;
            }
            SchedulerEvent::Task(_) => {}
            SchedulerEvent::BatchComplete { batch } => {
                assert_eq!(batch, fresh_batch);
                break;
            }
        }
    }
    assert_eq!(decoded, 2);
}
