//! Batch prefetch job: walks a geographic rectangle at a fixed zoom and
//! drives provider fetches directly, with no live rendering deadline.
//!
//! The job owns one dedicated thread which is allowed to block on the
//! provider and on its throttle sleep. Fetch order is shuffled so partial
//! runs stay representative and provider load is unbiased.

use crate::core::config::PrefetchOptions;
use crate::core::geo::LatLngBounds;
use crate::core::projection;
use crate::tiles::provider::TileProvider;
use crossbeam_channel::{unbounded, Receiver, Sender};
use rand::seq::SliceRandom;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Coordination primitive a concurrent bulk cache-flush process waits on:
/// reset (busy) when a batch window opens, set (idle) when it closes.
#[derive(Debug)]
pub struct CacheGate {
    idle: Mutex<bool>,
    cvar: Condvar,
}

impl Default for CacheGate {
    fn default() -> Self {
        Self {
            idle: Mutex::new(true),
            cvar: Condvar::new(),
        }
    }
}

impl CacheGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the cache busy; waiters block until [`set_idle`](Self::set_idle).
    pub fn set_busy(&self) {
        *self.idle.lock().expect("cache gate lock poisoned") = false;
    }

    /// Marks the cache idle and wakes all waiters.
    pub fn set_idle(&self) {
        *self.idle.lock().expect("cache gate lock poisoned") = true;
        self.cvar.notify_all();
    }

    pub fn is_idle(&self) -> bool {
        *self.idle.lock().expect("cache gate lock poisoned")
    }

    /// Blocks until the gate is idle or the timeout elapses; returns
    /// whether the gate was idle on return.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let guard = self.idle.lock().expect("cache gate lock poisoned");
        let (guard, _) = self
            .cvar
            .wait_timeout_while(guard, timeout, |idle| !*idle)
            .expect("cache gate lock poisoned");
        *guard
    }
}

/// Progress stream of a prefetch run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrefetchEvent {
    /// Emitted after every processed tile.
    Progress { completed: usize, total: usize },
    /// Terminal report; `cancelled` runs report partial completion.
    Done {
        succeeded: usize,
        total: usize,
        cancelled: bool,
    },
}

/// Runs at most one batch job at a time; a `start` while one is running
/// is a no-op.
pub struct Prefetcher {
    running: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Default for Prefetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Prefetcher {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            cancel: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Starts a batch run over `(rect, zoom)` and returns its progress
    /// stream, or `None` when a run is already in progress.
    pub fn start(
        &mut self,
        rect: LatLngBounds,
        zoom: u8,
        provider: Arc<dyn TileProvider>,
        options: PrefetchOptions,
        gate: Arc<CacheGate>,
    ) -> Option<Receiver<PrefetchEvent>> {
        if self.running.swap(true, Ordering::SeqCst) {
            return None;
        }
        self.cancel.store(false, Ordering::SeqCst);

        let (tx, rx) = unbounded();
        let running = Arc::clone(&self.running);
        let cancel = Arc::clone(&self.cancel);

        let handle = thread::Builder::new()
            .name("tile-prefetch".into())
            .spawn(move || {
                run_job(rect, zoom, provider, options, gate, cancel, tx);
                running.store(false, Ordering::SeqCst);
            })
            .expect("failed to spawn prefetch thread");
        self.handle = Some(handle);
        Some(rx)
    }

    /// Requests cooperative cancellation; checked at each tile boundary,
    /// never interrupting a fetch already in flight.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Waits for the current run to finish.
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Prefetcher {
    fn drop(&mut self) {
        self.cancel();
        self.join();
    }
}

fn run_job(
    rect: LatLngBounds,
    zoom: u8,
    provider: Arc<dyn TileProvider>,
    options: PrefetchOptions,
    gate: Arc<CacheGate>,
    cancel: Arc<AtomicBool>,
    tx: Sender<PrefetchEvent>,
) {
    gate.set_busy();

    let mut tiles = projection::area_tile_list(&rect, zoom, 0.0);
    tiles.shuffle(&mut rand::thread_rng());
    let total = tiles.len();

    log::debug!("prefetch of {} tiles at zoom {} starting", total, zoom);

    let mut succeeded = 0_usize;
    let mut retried = false;
    let mut cancelled = false;

    let mut index = 0_usize;
    while index < total {
        if cancel.load(Ordering::SeqCst) {
            cancelled = true;
            break;
        }

        let coord = tiles[index];
        if cache_tile(&*provider, coord) {
            succeeded += 1;
            retried = false;
        } else if !retried {
            // one retry per tile, then move on
            retried = true;
            thread::sleep(options.retry_delay);
            continue;
        } else {
            log::warn!("prefetch giving up on tile {}", coord);
            retried = false;
        }

        index += 1;
        let _ = tx.send(PrefetchEvent::Progress {
            completed: index,
            total,
        });

        if !options.throttle.is_zero() {
            thread::sleep(options.throttle);
        }
    }

    gate.set_idle();
    log::debug!(
        "prefetch finished: {}/{} (cancelled: {})",
        succeeded,
        total,
        cancelled
    );
    let _ = tx.send(PrefetchEvent::Done {
        succeeded,
        total,
        cancelled,
    });
}

/// Fetches every configured layer for one tile; all must succeed.
fn cache_tile(provider: &dyn TileProvider, coord: crate::core::geo::TileCoord) -> bool {
    for &layer in provider.overlays() {
        if let Err(e) = provider.fetch_layer(coord, layer) {
            log::debug!("prefetch fetch failed for {} layer {}: {}", coord, layer, e);
            return false;
        }
    }
    true
}
