use std::sync::Arc;
use std::time::{Duration, Instant};

use tilekit::{
    EngineEvent, EngineOptions, LatLng, LatLngBounds, MapEngine, Point, PrefetchEvent,
    PrefetchOptions, StaticProvider, TileCoord, TileProvider, TileView,
};

/// End-to-end scenarios driving the engine the way an embedding
/// application would: configure, pan/zoom, render, read back snapshots.
fn engine_with_provider(options: EngineOptions) -> (MapEngine, Arc<StaticProvider>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let provider = Arc::new(StaticProvider::new(vec![0]));
    let engine = MapEngine::new(
        Arc::clone(&provider) as Arc<dyn TileProvider>,
        options,
        Point::new(640.0, 480.0),
    );
    (engine, provider)
}

fn fast_options() -> EngineOptions {
    EngineOptions {
        fetch_workers: 2,
        retry_delay: Duration::from_millis(5),
        ..EngineOptions::default()
    }
}

fn seed_level(provider: &StaticProvider, zoom: u8) {
    let side = 1_i64 << zoom;
    for y in 0..side {
        for x in 0..side {
            provider.insert(TileCoord::new(x, y, zoom), 0, vec![zoom]);
        }
    }
}

fn wait_until(deadline: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    cond()
}

/// A fresh engine pointed at seeded imagery converges to a fully exact
/// render pass and reports loads on the event stream.
#[test]
fn test_view_converges_to_exact_imagery() {
    let (mut engine, provider) = engine_with_provider(fast_options());
    seed_level(&provider, 3);
    engine.set_zoom(3.0);
    engine.set_position(LatLng::new(48.8566, 2.3522));

    assert!(wait_until(Duration::from_secs(3), || {
        engine
            .render_pass()
            .tiles
            .iter()
            .all(|t| matches!(t.view, TileView::Exact(_)))
    }));

    let mut loaded = 0;
    while let Ok(event) = engine.events().try_recv() {
        if matches!(event, EngineEvent::TileLoaded(_)) {
            loaded += 1;
        }
    }
    assert!(loaded > 0);
    assert_eq!(engine.render_pass().tiles_in_flight, 0);
}

/// Zooming in before the new level arrives shows ancestor imagery as a
/// substitute, with the crop offsets a renderer needs to cut out the
/// right quadrant.
#[test]
fn test_zoom_in_falls_back_to_parent_imagery() {
    let (mut engine, provider) = engine_with_provider(fast_options());
    seed_level(&provider, 2);
    engine.set_zoom(2.0);
    engine.set_position(LatLng::new(0.0, 0.0));
    assert!(wait_until(Duration::from_secs(3), || {
        engine
            .render_pass()
            .tiles
            .iter()
            .all(|t| matches!(t.view, TileView::Exact(_)))
    }));

    // level 3 has no imagery yet, so every tile substitutes its parent
    engine.set_zoom(3.0);
    let pass = engine.render_pass();
    let mut substitutes = 0;
    for tile in &pass.tiles {
        if let TileView::Substitute { ix, xoff, yoff, .. } = tile.view {
            assert_eq!(ix, 2);
            assert_eq!(xoff, tile.coord.x % 2);
            assert_eq!(yoff, tile.coord.y % 2);
            substitutes += 1;
        }
    }
    assert!(substitutes > 0);
}

/// Failed coordinates keep their record until a reload; afterwards newly
/// available imagery loads normally.
#[test]
fn test_reload_recovers_from_failures() {
    let (mut engine, provider) = engine_with_provider(fast_options());
    engine.set_zoom(1.0);
    engine.set_position(LatLng::new(0.0, 0.0));

    assert!(wait_until(Duration::from_secs(3), || {
        engine.render_pass().tiles.iter().all(|t| t.failure.is_some())
    }));
    assert!(!engine.failed_loads().is_empty());

    seed_level(&provider, 1);
    engine.reload();
    assert!(wait_until(Duration::from_secs(3), || {
        engine
            .render_pass()
            .tiles
            .iter()
            .all(|t| matches!(t.view, TileView::Exact(_)))
    }));
    assert!(engine.failed_loads().is_empty());
}

/// Fitting a rectangle centers on it and picks a zoom inside the
/// configured range; an empty rectangle is rejected.
#[test]
fn test_zoom_to_fit_rect_contract() {
    let (mut engine, _provider) = engine_with_provider(fast_options());

    let rect = LatLngBounds::from_coords(10.0, 10.0, 20.0, 20.0);
    assert!(engine.zoom_to_fit_rect(&rect));
    assert_eq!(engine.viewport().position(), LatLng::new(15.0, 15.0));
    assert!(engine.viewport().zoom() <= 18.0);

    // the fitted view really contains the rectangle
    let bounds = engine.viewport().bounds();
    assert!(bounds.contains(&LatLng::new(10.0, 10.0)));
    assert!(bounds.contains(&LatLng::new(20.0, 20.0)));

    let empty = LatLngBounds::from_coords(10.0, 10.0, 10.0, 10.0);
    assert!(!engine.zoom_to_fit_rect(&empty));
}

/// A pointer press followed by a small wiggle never pans; crossing the
/// tolerance pans by the full delta from the press point.
#[test]
fn test_drag_gesture_tolerance() {
    let (mut engine, _provider) = engine_with_provider(fast_options());
    engine.set_zoom(5.0);
    engine.set_position(LatLng::new(0.0, 0.0));
    let offset_before = engine.viewport().render_offset();

    engine.begin_drag(Point::new(100.0, 100.0));
    assert!(!engine.drag(Point::new(105.0, 100.0)));
    assert_eq!(engine.viewport().render_offset(), offset_before);

    assert!(engine.drag(Point::new(130.0, 100.0)));
    let offset = engine.viewport().render_offset();
    assert!((offset.x - (offset_before.x + 30.0)).abs() < 1e-9);
    engine.end_drag();
    assert!(!engine.viewport().is_dragging());
}

/// A prefetch job walks the whole rectangle, reports progress and a
/// final tally, then releases the cache gate.
#[test]
fn test_prefetch_batch_reports_and_releases_gate() {
    let (mut engine, provider) = engine_with_provider(fast_options());
    seed_level(&provider, 3);

    let rect = LatLngBounds::from_coords(-40.0, -40.0, 40.0, 40.0);
    let events = engine
        .start_prefetch(
            rect,
            3,
            PrefetchOptions {
                throttle: Duration::from_millis(0),
                retry_delay: Duration::from_millis(5),
            },
        )
        .expect("no job should be running yet");

    let mut saw_progress = false;
    let mut done = None;
    for event in events.iter() {
        match event {
            PrefetchEvent::Progress { completed, total } => {
                assert!(completed <= total);
                saw_progress = true;
            }
            PrefetchEvent::Done {
                succeeded,
                total,
                cancelled,
            } => {
                assert_eq!(succeeded, total);
                assert!(!cancelled);
                done = Some(total);
            }
        }
    }
    assert!(saw_progress);
    assert!(done.expect("job must finish") > 0);
    assert!(engine.cache_gate().is_idle());
}

/// Failure records survive pans within the same zoom level but are wiped
/// by a zoom change along with out-of-window imagery.
#[test]
fn test_zoom_change_resets_failures() {
    let (mut engine, _provider) = engine_with_provider(fast_options());
    engine.set_zoom(1.0);
    engine.set_position(LatLng::new(0.0, 0.0));
    assert!(wait_until(Duration::from_secs(3), || {
        engine.render_pass();
        !engine.failed_loads().is_empty()
    }));

    engine.set_position(LatLng::new(5.0, 5.0));
    assert!(!engine.failed_loads().is_empty());

    engine.set_zoom(2.0);
    assert!(engine.failed_loads().is_empty());
}
