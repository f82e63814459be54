//! Advisory record of fetches that exhausted their retry budget.
//!
//! Guarded by its own mutex rather than the tile matrix lock: entries are
//! tiny and touched at high frequency, a different contention profile from
//! bulk image writes. Losing an entry only ever costs a redundant retry.

use crate::core::geo::TileCoord;
use crate::EngineError;
use fxhash::FxHashMap;
use std::sync::Mutex;
use std::time::Instant;

/// A failed fetch for one coordinate.
#[derive(Debug, Clone)]
pub struct FailedLoad {
    pub coord: TileCoord,
    pub error: EngineError,
    pub at: Instant,
}

#[derive(Debug, Default)]
pub struct FailedLoadTracker {
    inner: Mutex<FxHashMap<TileCoord, FailedLoad>>,
}

impl FailedLoadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the last error for a coordinate, replacing any earlier one.
    pub fn record(&self, coord: TileCoord, error: EngineError) {
        let mut map = self.inner.lock().expect("failed-load lock poisoned");
        map.insert(
            coord,
            FailedLoad {
                coord,
                error,
                at: Instant::now(),
            },
        );
    }

    pub fn try_get(&self, coord: TileCoord) -> Option<FailedLoad> {
        self.inner
            .lock()
            .expect("failed-load lock poisoned")
            .get(&coord)
            .cloned()
    }

    /// Cleared whenever a subsequent fetch for the coordinate succeeds.
    pub fn clear(&self, coord: TileCoord) {
        self.inner
            .lock()
            .expect("failed-load lock poisoned")
            .remove(&coord);
    }

    /// Cleared wholesale on reload or provider change.
    pub fn clear_all(&self) {
        self.inner
            .lock()
            .expect("failed-load lock poisoned")
            .clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("failed-load lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
