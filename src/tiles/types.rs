//! Tile value types shared between the matrix, the fetch pipeline and the
//! renderer snapshot.

use crate::tiles::provider::LayerId;
use once_cell::sync::Lazy;
use std::sync::Arc;

/// One raw image belonging to a single overlay/provider layer.
///
/// The engine never decodes the bytes; it only moves them between the
/// provider and the renderer.
#[derive(Debug, Clone)]
pub struct LayerImage {
    pub layer: LayerId,
    pub data: Arc<Vec<u8>>,
}

impl LayerImage {
    pub fn new(layer: LayerId, data: Vec<u8>) -> Self {
        Self {
            layer,
            data: Arc::new(data),
        }
    }
}

/// A cached tile entry.
///
/// Created `Empty` when first requested, promoted to `Populated` by the
/// fetch pipeline on success and never mutated afterwards except by full
/// replacement on reload.
#[derive(Debug)]
pub enum Tile {
    /// Sentinel for an absent tile; lookups never block on a pending fetch.
    Empty,
    Populated { layers: Vec<LayerImage> },
}

static EMPTY_TILE: Lazy<Arc<Tile>> = Lazy::new(|| Arc::new(Tile::Empty));

impl Tile {
    /// The shared Empty sentinel.
    pub fn empty() -> Arc<Tile> {
        Arc::clone(&EMPTY_TILE)
    }

    pub fn populated(layers: Vec<LayerImage>) -> Arc<Tile> {
        Arc::new(Tile::Populated { layers })
    }

    pub fn is_populated(&self) -> bool {
        matches!(self, Tile::Populated { .. })
    }

    /// Layer images of a populated tile; empty slice for the sentinel.
    pub fn layers(&self) -> &[LayerImage] {
        match self {
            Tile::Empty => &[],
            Tile::Populated { layers } => layers,
        }
    }
}
