//! Background fetch pipeline.
//!
//! Requests are queued over a crossbeam channel and serviced by a small
//! pool of worker threads. A pending set enforces at most one in-flight
//! fetch per coordinate; a per-request retry budget requeues failed
//! fetches after a fixed delay and records the final error in the
//! failed-load tracker once the budget is exhausted.

use crate::core::config::EngineOptions;
use crate::core::geo::TileCoord;
use crate::core::map::EngineEvent;
use crate::core::projection;
use crate::tiles::failed::FailedLoadTracker;
use crate::tiles::matrix::TileMatrix;
use crate::tiles::provider::TileProvider;
use crate::tiles::types::{LayerImage, Tile};
use crate::{EngineError, Result};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use fxhash::FxHashSet;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

#[derive(Debug)]
struct FetchRequest {
    coord: TileCoord,
    attempts_remaining: u32,
}

/// Shared state each worker operates on.
struct WorkerContext {
    provider: Arc<dyn TileProvider>,
    matrix: Arc<TileMatrix>,
    failed: Arc<FailedLoadTracker>,
    pending: Arc<Mutex<FxHashSet<TileCoord>>>,
    task_tx: Sender<FetchRequest>,
    event_tx: Sender<EngineEvent>,
    dirty: Arc<AtomicBool>,
    current_zoom: Arc<AtomicU8>,
    shutdown: Arc<AtomicBool>,
    levels_kept: u8,
    retry_delay: Duration,
}

pub struct FetchPipeline {
    task_tx: Sender<FetchRequest>,
    pending: Arc<Mutex<FxHashSet<TileCoord>>>,
    matrix: Arc<TileMatrix>,
    shutdown: Arc<AtomicBool>,
    attempts_per_tile: u32,
    workers: Vec<JoinHandle<()>>,
}

impl FetchPipeline {
    /// Spawns the worker pool. `current_zoom` feeds the eviction window
    /// applied after every successful put; `dirty` and `event_tx` surface
    /// completions to the render loop.
    pub fn new(
        provider: Arc<dyn TileProvider>,
        matrix: Arc<TileMatrix>,
        failed: Arc<FailedLoadTracker>,
        options: &EngineOptions,
        current_zoom: Arc<AtomicU8>,
        dirty: Arc<AtomicBool>,
        event_tx: Sender<EngineEvent>,
    ) -> Self {
        let (task_tx, task_rx) = unbounded::<FetchRequest>();
        let pending = Arc::new(Mutex::new(FxHashSet::default()));
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(options.fetch_workers.max(1));
        for id in 0..options.fetch_workers.max(1) {
            let ctx = WorkerContext {
                provider: Arc::clone(&provider),
                matrix: Arc::clone(&matrix),
                failed: Arc::clone(&failed),
                pending: Arc::clone(&pending),
                task_tx: task_tx.clone(),
                event_tx: event_tx.clone(),
                dirty: Arc::clone(&dirty),
                current_zoom: Arc::clone(&current_zoom),
                shutdown: Arc::clone(&shutdown),
                levels_kept: options.levels_kept_in_memory,
                retry_delay: options.retry_delay,
            };
            let rx = task_rx.clone();
            workers.push(
                thread::Builder::new()
                    .name(format!("tile-fetch-{}", id))
                    .spawn(move || worker_loop(rx, ctx))
                    .expect("failed to spawn fetch worker"),
            );
        }

        Self {
            task_tx,
            pending,
            matrix,
            shutdown,
            attempts_per_tile: options.attempts_per_tile(),
            workers,
        }
    }

    /// Schedules a fetch for `coord` unless the tile is already cached or
    /// a fetch for it is already in flight. Returns immediately; results
    /// surface through the tile matrix.
    pub fn request_tile(&self, coord: TileCoord) -> Result<()> {
        projection::check_coord(coord)?;

        if self.matrix.get(coord).is_populated() {
            return Ok(());
        }

        {
            let mut pending = self.pending.lock().expect("pending lock poisoned");
            if !pending.insert(coord) {
                return Ok(());
            }
        }

        let request = FetchRequest {
            coord,
            attempts_remaining: self.attempts_per_tile,
        };
        if self.task_tx.send(request).is_err() {
            self.pending
                .lock()
                .expect("pending lock poisoned")
                .remove(&coord);
            return Err(EngineError::Shutdown);
        }
        Ok(())
    }

    /// Number of coordinates currently queued or downloading.
    pub fn in_flight(&self) -> usize {
        self.pending.lock().expect("pending lock poisoned").len()
    }

    /// Signals the workers to stop and joins them. Called by [`Drop`];
    /// explicit use lets teardown order the join before other cleanup.
    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for FetchPipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(task_rx: Receiver<FetchRequest>, ctx: WorkerContext) {
    loop {
        if ctx.shutdown.load(Ordering::SeqCst) {
            break;
        }
        match task_rx.recv_timeout(Duration::from_millis(50)) {
            Ok(request) => process(&ctx, request),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn process(ctx: &WorkerContext, request: FetchRequest) {
    let coord = request.coord;

    if ctx.shutdown.load(Ordering::SeqCst) || ctx.matrix.get(coord).is_populated() {
        remove_pending(ctx, coord);
        return;
    }

    log::debug!(
        "fetching tile {} ({} attempts left)",
        coord,
        request.attempts_remaining
    );

    let mut layers = Vec::with_capacity(ctx.provider.overlays().len());
    let mut failure: Option<EngineError> = None;
    for &layer in ctx.provider.overlays() {
        match ctx.provider.fetch_layer(coord, layer) {
            Ok(bytes) => layers.push(LayerImage::new(layer, bytes)),
            Err(e) => {
                failure = Some(e);
                break;
            }
        }
    }

    match failure {
        None => {
            ctx.matrix.put(coord, Tile::populated(layers));
            ctx.matrix
                .evict(ctx.current_zoom.load(Ordering::SeqCst), ctx.levels_kept);
            ctx.failed.clear(coord);
            remove_pending(ctx, coord);
            ctx.dirty.store(true, Ordering::SeqCst);
            let _ = ctx.event_tx.send(EngineEvent::TileLoaded(coord));
        }
        Some(error) if error.is_retryable() && request.attempts_remaining > 1 => {
            log::warn!("tile {} fetch failed, will retry: {}", coord, error);
            thread::sleep(ctx.retry_delay);
            let requeued = FetchRequest {
                coord,
                attempts_remaining: request.attempts_remaining - 1,
            };
            // the coordinate stays pending across the retry
            if ctx.task_tx.send(requeued).is_err() {
                remove_pending(ctx, coord);
            }
        }
        Some(error) => {
            log::error!("giving up on tile {}: {}", coord, error);
            ctx.failed.record(coord, error);
            remove_pending(ctx, coord);
            ctx.dirty.store(true, Ordering::SeqCst);
            let _ = ctx.event_tx.send(EngineEvent::TileFailed(coord));
        }
    }
}

fn remove_pending(ctx: &WorkerContext, coord: TileCoord) {
    ctx.pending
        .lock()
        .expect("pending lock poisoned")
        .remove(&coord);
}
