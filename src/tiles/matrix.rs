//! Concurrent tile matrix: the authoritative `TileCoord -> Tile` mapping.
//!
//! Many readers (render passes, fallback lookups) share the read section;
//! a single writer (fetch completion, eviction, clear) briefly excludes
//! them. Writers never hold the lock across provider I/O.

use crate::core::geo::TileCoord;
use crate::tiles::types::Tile;
use fxhash::FxHashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard};

/// The shared tile store.
#[derive(Debug, Default)]
pub struct TileMatrix {
    inner: RwLock<FxHashMap<TileCoord, Arc<Tile>>>,
}

/// What a renderer should draw for a requested coordinate.
#[derive(Debug, Clone)]
pub enum TileView {
    /// The exact tile is cached.
    Exact(Arc<Tile>),
    /// An ancestor stands in for the missing tile. The renderer crops the
    /// ancestor image to the 1/ix-sized sub-rectangle at (xoff, yoff) tile
    /// units and stretches it by `ix`.
    Substitute {
        tile: Arc<Tile>,
        xoff: i64,
        yoff: i64,
        ix: i64,
    },
    /// Nothing cached along the ancestor walk; consult the failed-load
    /// tracker for an explanatory message, else draw the neutral
    /// "no imagery" placeholder.
    Missing,
}

impl TileMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    /// Non-blocking lookup; the Empty sentinel stands in for absent entries.
    pub fn get(&self, coord: TileCoord) -> Arc<Tile> {
        self.inner
            .read()
            .expect("tile matrix lock poisoned")
            .get(&coord)
            .cloned()
            .unwrap_or_else(Tile::empty)
    }

    /// Inserts or replaces an entry.
    pub fn put(&self, coord: TileCoord, tile: Arc<Tile>) {
        self.inner
            .write()
            .expect("tile matrix lock poisoned")
            .insert(coord, tile);
    }

    /// Removes every entry whose zoom falls outside the retained window
    /// `[current_zoom - levels_kept, current_zoom]`.
    pub fn evict(&self, current_zoom: u8, levels_kept: u8) {
        let low = current_zoom.saturating_sub(levels_kept);
        let mut map = self.inner.write().expect("tile matrix lock poisoned");
        let before = map.len();
        map.retain(|coord, _| coord.z >= low && coord.z <= current_zoom);
        let evicted = before - map.len();
        if evicted > 0 {
            log::debug!(
                "evicted {} tiles outside zoom window [{}, {}]",
                evicted,
                low,
                current_zoom
            );
        }
    }

    /// Drops all entries (explicit reload or provider change).
    pub fn clear(&self) {
        self.inner
            .write()
            .expect("tile matrix lock poisoned")
            .clear();
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("tile matrix lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Scoped read-locked snapshot. A render pass holds this for the whole
    /// frame so every lookup sees one coordinate-consistent matrix state.
    pub fn snapshot(&self) -> TileMatrixView<'_> {
        TileMatrixView {
            guard: self.inner.read().expect("tile matrix lock poisoned"),
        }
    }
}

/// Read-locked view over the matrix, handed to the renderer.
pub struct TileMatrixView<'a> {
    guard: RwLockReadGuard<'a, FxHashMap<TileCoord, Arc<Tile>>>,
}

impl TileMatrixView<'_> {
    /// Lookup without fallback.
    pub fn get(&self, coord: TileCoord) -> Arc<Tile> {
        self.guard.get(&coord).cloned().unwrap_or_else(Tile::empty)
    }

    pub fn contains(&self, coord: TileCoord) -> bool {
        self.guard
            .get(&coord)
            .map(|t| t.is_populated())
            .unwrap_or(false)
    }

    /// Lookup with the deterministic parent-tile fallback.
    ///
    /// When the exact tile is missing, walks ancestors one zoom step at a
    /// time, at most `levels_kept` steps and never past zoom 0, and stops
    /// at the first populated one.
    pub fn resolve(&self, coord: TileCoord, levels_kept: u8) -> TileView {
        if let Some(tile) = self.guard.get(&coord) {
            if tile.is_populated() {
                return TileView::Exact(Arc::clone(tile));
            }
        }

        let mut zoom_offset: u8 = 1;
        while zoom_offset < coord.z && zoom_offset <= levels_kept {
            if let Some(parent) = coord.ancestor(zoom_offset) {
                if let Some(tile) = self.guard.get(&parent) {
                    if tile.is_populated() {
                        let ix = 1_i64 << zoom_offset;
                        return TileView::Substitute {
                            tile: Arc::clone(tile),
                            xoff: (coord.x - parent.x * ix).abs(),
                            yoff: (coord.y - parent.y * ix).abs(),
                            ix,
                        };
                    }
                }
            }
            zoom_offset += 1;
        }

        TileView::Missing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tiles::types::LayerImage;

    fn populated() -> Arc<Tile> {
        Tile::populated(vec![LayerImage::new(0, vec![0xAB])])
    }

    #[test]
    fn test_get_returns_empty_sentinel_for_miss() {
        let matrix = TileMatrix::new();
        let tile = matrix.get(TileCoord::new(1, 1, 3));
        assert!(!tile.is_populated());
    }

    #[test]
    fn test_put_and_get() {
        let matrix = TileMatrix::new();
        let coord = TileCoord::new(4, 5, 6);
        matrix.put(coord, populated());
        assert!(matrix.get(coord).is_populated());
        assert_eq!(matrix.len(), 1);
    }

    #[test]
    fn test_eviction_window() {
        let matrix = TileMatrix::new();
        for z in [5_u8, 6, 7, 8] {
            matrix.put(TileCoord::new(0, 0, z), populated());
        }
        matrix.evict(8, 2);

        assert!(!matrix.get(TileCoord::new(0, 0, 5)).is_populated());
        for z in [6_u8, 7, 8] {
            assert!(matrix.get(TileCoord::new(0, 0, z)).is_populated());
        }
        assert_eq!(matrix.len(), 3);
    }

    #[test]
    fn test_clear() {
        let matrix = TileMatrix::new();
        matrix.put(TileCoord::new(0, 0, 1), populated());
        matrix.clear();
        assert!(matrix.is_empty());
    }

    #[test]
    fn test_resolve_exact() {
        let matrix = TileMatrix::new();
        let coord = TileCoord::new(2, 3, 4);
        matrix.put(coord, populated());
        let view = matrix.snapshot();
        assert!(matches!(view.resolve(coord, 5), TileView::Exact(_)));
    }

    #[test]
    fn test_resolve_substitute_from_grandparent() {
        let matrix = TileMatrix::new();
        let zoom = 8;
        let coord = TileCoord::new(37, 41, zoom);
        // only the ancestor at zoom-2 is populated
        let ancestor = coord.ancestor(2).unwrap();
        matrix.put(ancestor, populated());

        let view = matrix.snapshot();
        match view.resolve(coord, 5) {
            TileView::Substitute {
                xoff, yoff, ix, ..
            } => {
                assert_eq!(ix, 4);
                assert_eq!(xoff, coord.x % 4);
                assert_eq!(yoff, coord.y % 4);
            }
            other => panic!("expected substitute, got {:?}", other),
        }
    }

    #[test]
    fn test_resolve_fallback_bounded_by_levels_kept() {
        let matrix = TileMatrix::new();
        let coord = TileCoord::new(37, 41, 8);
        matrix.put(coord.ancestor(3).unwrap(), populated());

        let view = matrix.snapshot();
        assert!(matches!(view.resolve(coord, 2), TileView::Missing));
        assert!(matches!(
            view.resolve(coord, 3),
            TileView::Substitute { ix: 8, .. }
        ));
    }

    #[test]
    fn test_resolve_missing() {
        let matrix = TileMatrix::new();
        let view = matrix.snapshot();
        assert!(matches!(
            view.resolve(TileCoord::new(0, 0, 3), 5),
            TileView::Missing
        ));
    }

    #[test]
    fn test_concurrent_readers_and_writer() {
        let matrix = Arc::new(TileMatrix::new());
        let mut handles = Vec::new();
        for t in 0..4 {
            let m = Arc::clone(&matrix);
            handles.push(std::thread::spawn(move || {
                for i in 0..200_i64 {
                    let coord = TileCoord::new(i, t, 9);
                    if t % 2 == 0 {
                        m.put(coord, populated());
                    } else {
                        let _ = m.get(coord);
                        let _ = m.snapshot().resolve(coord, 3);
                    }
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(matrix.len(), 400);
    }
}
