//! Concurrent fan-out, cancellation and failure handling under simulated latency.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use arco_partitions::error::Error;
use arco_partitions::model::{PageSize, RunTagFilter};
use arco_partitions::scheduler::{ChunkScheduler, LoadOutcome};
use arco_partitions::source::PartitionSource;
use arco_partitions::source::memory::InMemoryPartitionSource;
use arco_partitions::view::{PartitionView, ViewParams};
use arco_test_utils::{
    CappedPartitionSource, FaultConfig, OpaqueCursorSource, PartitionSetFactory,
    SimulatedPartitionSource, assert_completed, assert_empty_loading, assert_in_set_order,
    assert_monotonic_progress, drain_progress, engine_config, init_test_logging,
    progress_values,
};

type Simulated = Arc<SimulatedPartitionSource<Arc<InMemoryPartitionSource>>>;

fn simulated(count: usize, seed: u64) -> Simulated {
    let inner = PartitionSetFactory::source(PartitionSetFactory::with_runs(
        "daily",
        count,
        &["extract", "load"],
    ));
    Arc::new(SimulatedPartitionSource::with_seed(inner, seed))
}

#[tokio::test(start_paused = true)]
async fn out_of_order_chunks_are_exposed_in_sequence_order() {
    init_test_logging();
    let set = PartitionSetFactory::with_runs("daily", 200, &["extract", "load"]);
    // Later chunks answer first.
    let source = Arc::new(
        SimulatedPartitionSource::with_seed(PartitionSetFactory::source(set.clone()), 1)
            .with_latency_fn(|call, _| {
                Duration::from_millis(match call {
                    1 => 10,
                    2 => 300,
                    3 => 200,
                    _ => 100,
                })
            }),
    );
    let scheduler = Arc::new(ChunkScheduler::new(Arc::clone(&source), &engine_config(50, 4)));
    let mut progress = scheduler.subscribe_progress();
    let mut view = PartitionView::with_scheduler(
        ViewParams::new("daily").with_page_size(PageSize::All),
        scheduler,
    );

    let page = view.load().await.unwrap().unwrap();
    assert_eq!(page.partitions.len(), 200);
    assert_in_set_order(&page.partitions, &set, 0);
    assert_eq!(source.call_count(), 4);

    let events = drain_progress(&mut progress);
    assert_monotonic_progress(&events);
    assert_completed(&events, view.generation());
    // Nothing past the first chunk is visible until the second chunk lands.
    let loaded: Vec<_> = events.iter().map(|e| e.loaded).collect();
    assert!(loaded.iter().all(|n| [0, 50, 200].contains(n)), "{loaded:?}");
    assert!(loaded.windows(2).all(|w| w[0] <= w[1]));
}

#[tokio::test(start_paused = true)]
async fn tag_change_mid_fetch_discards_the_old_generation() {
    let source = Arc::new(
        SimulatedPartitionSource::with_seed(
            PartitionSetFactory::source(PartitionSetFactory::with_runs("daily", 120, &["extract"])),
            3,
        )
        .with_latency_fn(|_, _| Duration::from_millis(100)),
    );
    let mut view = PartitionView::new(
        ViewParams::new("daily").with_page_size(PageSize::All),
        Arc::clone(&source),
        &engine_config(50, 1),
    );

    let pending = view.start_load();
    let stale = pending.generation();
    let handle = tokio::spawn(pending.run());

    // First chunk has landed, second is in flight.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(view.snapshot().partitions.len(), 50);

    assert!(view.set_run_tags(vec![RunTagFilter::tag("team", "data")]));
    let snapshot = view.snapshot();
    assert_empty_loading(&snapshot);
    assert!(!snapshot.pagination.has_prev_cursor);

    let result = handle.await.unwrap();
    assert!(matches!(result, Ok(LoadOutcome::Superseded { .. })));
    assert!(view.apply(stale, result).unwrap().is_none());
    assert_eq!(source.call_count(), 2);
    assert_empty_loading(&view.snapshot());

    view.load().await.unwrap();
    let snapshot = view.snapshot();
    assert_eq!(snapshot.partitions.len(), 120);
    assert_eq!(snapshot.loading_percent, 100);
    assert!(
        snapshot
            .partitions
            .iter()
            .flat_map(|p| &p.runs)
            .all(|run| run.has_tag("team", "data"))
    );
    let filtered = source.requests().into_iter().skip(2).collect::<Vec<_>>();
    assert!(filtered.iter().all(|fetch| fetch.request.filters.len() == 1));
}

#[tokio::test(start_paused = true)]
async fn failed_chunk_aborts_the_page_and_reload_recovers() {
    let source = simulated(200, 9);
    source.configure_faults(FaultConfig {
        latency_range_ms: Some((5, 50)),
        ..FaultConfig::fail_on_call(3)
    });
    let mut view = PartitionView::new(
        ViewParams::new("daily").with_page_size(PageSize::All),
        Arc::clone(&source),
        &engine_config(50, 4),
    );

    let err = view.load().await.unwrap_err();
    assert!(matches!(err, Error::Fetch(ref fetch) if fetch.is_retriable()));
    let snapshot = view.snapshot();
    assert!(!snapshot.loading);
    assert!(snapshot.partitions.is_empty());
    assert!(snapshot.error.as_ref().is_some_and(|e| e.kind() == "network"));

    let page = view.load().await.unwrap().unwrap();
    assert_eq!(page.partitions.len(), 200);
    let snapshot = view.snapshot();
    assert!(snapshot.error.is_none());
    assert_eq!(snapshot.loading_percent, 100);
}

#[tokio::test(start_paused = true)]
async fn navigation_supersedes_a_slow_page() {
    let source = simulated(90, 5);
    source.configure_faults(FaultConfig::jittery(50, 200));
    let mut view = PartitionView::new(
        ViewParams::new("daily"),
        Arc::clone(&source),
        &engine_config(10, 2),
    );
    view.load().await.unwrap();
    view.advance().unwrap();

    let pending = view.start_load();
    let stale = pending.generation();
    let handle = tokio::spawn(pending.run());
    tokio::time::sleep(Duration::from_millis(1)).await;

    assert!(view.retreat());
    let result = handle.await.unwrap();
    assert!(view.apply(stale, result).unwrap().is_none());

    view.load().await.unwrap();
    let snapshot = view.snapshot();
    assert_eq!(snapshot.partitions.len(), 30);
    assert_eq!(snapshot.partitions[0].name, "2024-01-01");
    assert!(snapshot.pagination.has_next_cursor);
}

#[tokio::test]
async fn capped_source_fan_out_keeps_every_partition() {
    let set = PartitionSetFactory::daily("daily", 200);
    let source = Arc::new(CappedPartitionSource::new(
        PartitionSetFactory::source(set.clone()),
        20,
    ));
    let mut view = PartitionView::new(
        ViewParams::new("daily").with_page_size(PageSize::All),
        Arc::clone(&source),
        &engine_config(50, 4),
    );

    let page = view.load().await.unwrap().unwrap();
    assert_eq!(page.partitions.len(), 200);
    assert_in_set_order(&page.partitions, &set, 0);
    assert!(page.next_cursor.is_none());
    assert_eq!(source.call_count(), 10);
}

#[tokio::test]
async fn capped_source_counted_page_hands_back_the_right_cursor() {
    let set = PartitionSetFactory::daily("daily", 200);
    let source = Arc::new(CappedPartitionSource::new(
        PartitionSetFactory::source(set.clone()),
        20,
    ));
    let mut view = PartitionView::new(
        ViewParams::new("daily").with_page_size(PageSize::count(100).unwrap()),
        source,
        &engine_config(50, 4),
    );

    let first = view.load().await.unwrap().unwrap();
    assert_eq!(first.partitions.len(), 100);
    assert_in_set_order(&first.partitions, &set, 0);

    view.advance().unwrap();
    let second = view.load().await.unwrap().unwrap();
    assert_eq!(second.partitions.len(), 100);
    assert_in_set_order(&second.partitions, &set, 100);
    assert!(second.next_cursor.is_none());
}

#[tokio::test(start_paused = true)]
async fn short_chunks_mid_fan_out_fall_back_to_cursors() {
    init_test_logging();
    let set = PartitionSetFactory::daily("daily", 200);
    // The first chunk is full, every later one is cut to 20, and the planned
    // chunks answer in reverse order.
    let capped = Arc::new(
        CappedPartitionSource::new(PartitionSetFactory::source(set.clone()), 20)
            .with_cap_from_call(2),
    );
    let source = Arc::new(
        SimulatedPartitionSource::with_seed(capped, 11).with_latency_fn(|call, _| {
            Duration::from_millis(match call {
                1 => 10,
                2 => 300,
                3 => 200,
                4 => 100,
                _ => 10,
            })
        }),
    );
    let scheduler = Arc::new(ChunkScheduler::new(Arc::clone(&source), &engine_config(50, 4)));
    let mut progress = scheduler.subscribe_progress();
    let mut view = PartitionView::with_scheduler(
        ViewParams::new("daily").with_page_size(PageSize::count(120).unwrap()),
        scheduler,
    );

    let page = view.load().await.unwrap().unwrap();
    assert_eq!(page.partitions.len(), 120);
    assert_in_set_order(&page.partitions, &set, 0);

    let events = drain_progress(&mut progress);
    assert_monotonic_progress(&events);
    assert_completed(&events, view.generation());
    // The page stopped fanning out at 70 and followed cursors from there.
    let resumed: Vec<_> = source
        .requests()
        .into_iter()
        .skip(3)
        .map(|fetch| fetch.request.cursor)
        .collect();
    assert_eq!(
        resumed.first().cloned().flatten(),
        source.seek("daily", None, 70)
    );

    view.advance().unwrap();
    let next = view.load().await.unwrap().unwrap();
    assert_eq!(next.partitions.len(), 80);
    assert_in_set_order(&next.partitions, &set, 120);
}

#[tokio::test]
async fn opaque_cursors_load_sequentially_with_estimated_progress() {
    let set = PartitionSetFactory::daily("daily", 200);
    let source = Arc::new(SimulatedPartitionSource::with_seed(
        OpaqueCursorSource::new(PartitionSetFactory::source(set.clone())),
        2,
    ));
    let scheduler = Arc::new(ChunkScheduler::new(Arc::clone(&source), &engine_config(50, 4)));
    let mut progress = scheduler.subscribe_progress();
    let mut view = PartitionView::with_scheduler(
        ViewParams::new("daily").with_page_size(PageSize::All),
        scheduler,
    );

    let page = view.load().await.unwrap().unwrap();
    assert_eq!(page.partitions.len(), 200);
    assert_in_set_order(&page.partitions, &set, 0);
    assert_eq!(source.call_count(), 4);

    let events = drain_progress(&mut progress);
    assert_monotonic_progress(&events);
    assert_completed(&events, view.generation());
    // Without a total, each chunk assumes one more chunk of the same size.
    assert_eq!(
        progress_values(&events, view.generation()),
        vec![0, 50, 66, 75, 100]
    );
}

#[tokio::test]
async fn opaque_cursors_paginate_counted_pages() {
    let set = PartitionSetFactory::daily("daily", 45);
    let source = Arc::new(OpaqueCursorSource::new(PartitionSetFactory::source(set.clone())));
    let mut view = PartitionView::new(ViewParams::new("daily"), source, &engine_config(7, 4));

    let first = view.load().await.unwrap().unwrap();
    assert_eq!(first.partitions.len(), 30);
    assert!(first.next_cursor.is_some());

    view.advance().unwrap();
    let second = view.load().await.unwrap().unwrap();
    assert_eq!(second.partitions.len(), 15);
    assert_in_set_order(&second.partitions, &set, 30);
    assert!(view.snapshot().pagination.has_prev_cursor);
}

#[tokio::test(start_paused = true)]
async fn flaky_network_pages_load_after_retries() {
    let source = simulated(200, 17);
    source.configure_faults(FaultConfig::flaky_network());
    let mut view = PartitionView::new(
        ViewParams::new("daily").with_page_size(PageSize::All),
        Arc::clone(&source),
        &engine_config(50, 4),
    );

    let mut failures = 0;
    let page = loop {
        match view.load().await {
            Ok(Some(page)) => break page,
            Ok(None) => panic!("nothing superseded this view"),
            Err(err) => {
                assert!(matches!(err, Error::Fetch(ref fetch) if fetch.is_retriable()));
                let snapshot = view.snapshot();
                assert!(!snapshot.loading);
                assert!(snapshot.partitions.is_empty());
                failures += 1;
                assert!(failures < 50, "network never recovered");
            }
        }
    };
    assert_eq!(page.partitions.len(), 200);
    assert_eq!(view.snapshot().loading_percent, 100);

    let injected = source
        .requests()
        .iter()
        .filter(|fetch| fetch.injected_failure)
        .count();
    assert!(injected >= failures);
}
