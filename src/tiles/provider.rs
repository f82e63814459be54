//! The consumed provider interface: turns `(coordinate, layer)` into raw
//! image bytes. Transport, decoding and on-disk persistence live behind it.

use crate::core::geo::TileCoord;
use crate::{EngineError, Result};
use fxhash::FxHashMap;
use std::sync::Mutex;

/// Identifier of one overlay/provider layer.
pub type LayerId = u32;

pub trait TileProvider: Send + Sync {
    /// Fetches the raw bytes of one layer image. May block on I/O; the
    /// engine only calls this from fetch workers and the prefetcher.
    fn fetch_layer(&self, coord: TileCoord, layer: LayerId) -> Result<Vec<u8>>;

    /// Configured overlay layers, fetched in order for every tile.
    fn overlays(&self) -> &[LayerId];

    fn copyright(&self) -> Option<&str> {
        None
    }
}

/// In-memory provider backed by pre-seeded tile bytes.
///
/// Useful for offline fixtures and tests; coordinates without seeded bytes
/// report [`EngineError::NotFound`].
pub struct StaticProvider {
    overlays: Vec<LayerId>,
    tiles: Mutex<FxHashMap<(TileCoord, LayerId), Vec<u8>>>,
}

impl StaticProvider {
    pub fn new(overlays: Vec<LayerId>) -> Self {
        Self {
            overlays,
            tiles: Mutex::new(FxHashMap::default()),
        }
    }

    pub fn insert(&self, coord: TileCoord, layer: LayerId, bytes: Vec<u8>) {
        self.tiles
            .lock()
            .expect("static provider lock poisoned")
            .insert((coord, layer), bytes);
    }
}

impl TileProvider for StaticProvider {
    fn fetch_layer(&self, coord: TileCoord, layer: LayerId) -> Result<Vec<u8>> {
        self.tiles
            .lock()
            .expect("static provider lock poisoned")
            .get(&(coord, layer))
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("tile {} layer {}", coord, layer)))
    }

    fn overlays(&self) -> &[LayerId] {
        &self.overlays
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_provider_round_trip() {
        let provider = StaticProvider::new(vec![0]);
        let coord = TileCoord::new(1, 2, 3);
        provider.insert(coord, 0, vec![9, 9]);

        assert_eq!(provider.fetch_layer(coord, 0).unwrap(), vec![9, 9]);
        assert!(matches!(
            provider.fetch_layer(TileCoord::new(0, 0, 3), 0),
            Err(EngineError::NotFound(_))
        ));
        assert_eq!(provider.overlays(), &[0]);
    }
}
