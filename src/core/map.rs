//! Engine facade: owns the tile matrix, the fetch pipeline and the
//! viewport, and hands the presentation layer an immutable snapshot of
//! what to draw each frame.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver};

use crate::core::config::{EngineOptions, MouseWheelZoomType, PrefetchOptions};
use crate::core::geo::{LatLng, LatLngBounds, Point, TileCoord};
use crate::core::viewport::Viewport;
use crate::tiles::failed::{FailedLoad, FailedLoadTracker};
use crate::tiles::fetch::FetchPipeline;
use crate::tiles::matrix::{TileMatrix, TileView};
use crate::tiles::prefetch::{CacheGate, PrefetchEvent, Prefetcher};
use crate::tiles::provider::TileProvider;

/// Asynchronous notifications from the fetch workers. Drained by the
/// embedding application to schedule repaints or surface errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent {
    TileLoaded(TileCoord),
    TileFailed(TileCoord),
}

/// One tile the renderer should paint this frame.
#[derive(Debug, Clone)]
pub struct RenderTile {
    pub coord: TileCoord,
    /// Top-left pixel position in unrotated, unscaled viewport space.
    pub pixel: Point,
    /// Exact imagery, an ancestor substitute, or nothing yet.
    pub view: TileView,
    /// Present when the last fetch for this coordinate gave up.
    pub failure: Option<FailedLoad>,
}

/// Frame snapshot: everything the presentation layer needs to paint,
/// captured under a single matrix read lock.
#[derive(Debug, Clone)]
pub struct RenderPass {
    pub tiles: Vec<RenderTile>,
    /// Fractional-zoom scale the renderer applies to its transform.
    pub scale: f64,
    pub bearing: f64,
    pub offset: Point,
    pub tiles_in_flight: usize,
}

pub struct MapEngine {
    options: EngineOptions,
    viewport: Viewport,
    matrix: Arc<TileMatrix>,
    failed: Arc<FailedLoadTracker>,
    pipeline: FetchPipeline,
    provider: Arc<dyn TileProvider>,
    current_zoom: Arc<AtomicU8>,
    dirty: Arc<AtomicBool>,
    event_rx: Receiver<EngineEvent>,
    gate: Arc<CacheGate>,
    prefetcher: Prefetcher,
}

impl MapEngine {
    pub fn new(provider: Arc<dyn TileProvider>, options: EngineOptions, size: Point) -> Self {
        let matrix = Arc::new(TileMatrix::new());
        let failed = Arc::new(FailedLoadTracker::new());
        let viewport = Viewport::new(&options, size);
        let current_zoom = Arc::new(AtomicU8::new(viewport.integer_zoom()));
        let dirty = Arc::new(AtomicBool::new(true));
        let (event_tx, event_rx) = unbounded();

        let pipeline = FetchPipeline::new(
            Arc::clone(&provider),
            Arc::clone(&matrix),
            Arc::clone(&failed),
            &options,
            Arc::clone(&current_zoom),
            Arc::clone(&dirty),
            event_tx,
        );

        Self {
            options,
            viewport,
            matrix,
            failed,
            pipeline,
            provider,
            current_zoom,
            dirty,
            event_rx,
            gate: Arc::new(CacheGate::new()),
            prefetcher: Prefetcher::new(),
        }
    }

    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn matrix(&self) -> &Arc<TileMatrix> {
        &self.matrix
    }

    pub fn failed_loads(&self) -> &Arc<FailedLoadTracker> {
        &self.failed
    }

    /// Completion stream from the fetch workers.
    pub fn events(&self) -> &Receiver<EngineEvent> {
        &self.event_rx
    }

    pub fn copyright(&self) -> Option<&str> {
        self.provider.copyright()
    }

    /// True once since the last call if anything changed that warrants a
    /// repaint.
    pub fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::SeqCst)
    }

    pub fn set_size(&mut self, size: Point) {
        self.viewport.set_size(size);
        self.mark_dirty();
    }

    pub fn set_position(&mut self, position: LatLng) {
        self.viewport.set_position(position);
        self.mark_dirty();
    }

    pub fn set_bearing(&mut self, degrees: f64) {
        self.viewport.set_bearing(degrees);
        self.mark_dirty();
    }

    pub fn set_zoom(&mut self, zoom: f64) {
        self.viewport.set_zoom(zoom);
        self.after_zoom_change();
    }

    /// Applies a wheel zoom, anchoring the configured point.
    pub fn wheel_zoom(&mut self, mouse_local: Point, zoom: f64) {
        match self.options.mouse_wheel_zoom_type {
            MouseWheelZoomType::MousePositionAndCenter => {
                let target = self.viewport.from_local_to_lat_lng(&mouse_local);
                self.viewport.set_position(target);
                self.viewport.set_zoom(zoom);
            }
            MouseWheelZoomType::MousePositionWithoutCenter => {
                self.viewport.zoom_around(mouse_local, zoom);
            }
            MouseWheelZoomType::ViewCenter => {
                self.viewport.set_zoom(zoom);
            }
        }
        self.after_zoom_change();
    }

    /// Centers on `rect` at the largest zoom that shows all of it.
    /// `false` when the rectangle is empty, leaving the view untouched.
    pub fn zoom_to_fit_rect(&mut self, rect: &LatLngBounds) -> bool {
        let fitted = self.viewport.zoom_to_fit_rect(rect);
        if fitted {
            self.after_zoom_change();
        }
        fitted
    }

    pub fn begin_drag(&mut self, anchor: Point) {
        self.viewport.begin_drag(anchor);
    }

    pub fn drag(&mut self, current: Point) -> bool {
        let moved = self.viewport.drag(current);
        if moved {
            self.mark_dirty();
        }
        moved
    }

    pub fn end_drag(&mut self) {
        self.viewport.end_drag();
        self.mark_dirty();
    }

    /// Drops all cached imagery and failure records; the next render pass
    /// refetches everything in view.
    pub fn reload(&mut self) {
        log::debug!("reload: clearing matrix and failure records");
        self.matrix.clear();
        self.failed.clear_all();
        self.mark_dirty();
    }

    /// Builds the frame snapshot and schedules fetches for every tile
    /// without exact imagery.
    pub fn render_pass(&self) -> RenderPass {
        let levels_kept = self.options.levels_kept_in_memory;
        let draw_list = self.viewport.draw_list();

        let mut tiles = Vec::with_capacity(draw_list.len());
        {
            let view = self.matrix.snapshot();
            for entry in &draw_list {
                let resolved = view.resolve(entry.coord, levels_kept);
                let failure = if matches!(resolved, TileView::Exact(_)) {
                    None
                } else {
                    self.failed.try_get(entry.coord)
                };
                tiles.push(RenderTile {
                    coord: entry.coord,
                    pixel: entry.pixel,
                    view: resolved,
                    failure,
                });
            }
        }

        // Request outside the read lock so workers can write immediately.
        for tile in &tiles {
            if !matches!(tile.view, TileView::Exact(_)) && tile.failure.is_none() {
                if let Err(err) = self.pipeline.request_tile(tile.coord) {
                    log::warn!("tile request dropped for {}: {}", tile.coord, err);
                }
            }
        }

        RenderPass {
            tiles,
            scale: self.viewport.display_scale(),
            bearing: self.viewport.bearing(),
            offset: self.viewport.render_offset(),
            tiles_in_flight: self.pipeline.in_flight(),
        }
    }

    /// Starts a background prefetch over `rect` at `zoom`. `None` while a
    /// previous job is still running.
    pub fn start_prefetch(
        &mut self,
        rect: LatLngBounds,
        zoom: u8,
        options: PrefetchOptions,
    ) -> Option<Receiver<PrefetchEvent>> {
        self.prefetcher.start(
            rect,
            zoom,
            Arc::clone(&self.provider),
            options,
            Arc::clone(&self.gate),
        )
    }

    pub fn cancel_prefetch(&mut self) {
        self.prefetcher.cancel();
        self.prefetcher.join();
    }

    /// Idle/busy signal the prefetcher toggles around a batch job.
    pub fn cache_gate(&self) -> &Arc<CacheGate> {
        &self.gate
    }

    fn after_zoom_change(&mut self) {
        let zoom = self.viewport.integer_zoom();
        if self.current_zoom.swap(zoom, Ordering::SeqCst) != zoom {
            self.matrix.evict(zoom, self.options.levels_kept_in_memory);
            self.failed.clear_all();
        }
        self.mark_dirty();
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }
}

impl Drop for MapEngine {
    fn drop(&mut self) {
        // Workers hold clones of the matrix and tracker; stop them before
        // the engine's own references go away.
        self.prefetcher.cancel();
        self.prefetcher.join();
        self.pipeline.shutdown();
    }
}
