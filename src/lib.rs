//! # tilekit
//!
//! Tile cache and coordinate engine for slippy maps.
//!
//! The crate decides *what* to draw and *where*, never *how* to paint it:
//! it owns the concurrent tile matrix, the fetch/retry/fallback pipeline,
//! the Mercator projection math and the viewport state machine. Networking,
//! image decoding and the actual drawing surface are external collaborators
//! reached through the [`tiles::provider::TileProvider`] trait and the
//! renderer-facing snapshot API on [`core::map::MapEngine`].

pub mod core;
pub mod tiles;

// Re-export public API
pub use crate::core::{
    config::{EngineOptions, MouseWheelZoomType, PrefetchOptions, ScaleMode},
    geo::{LatLng, LatLngBounds, Point, TileCoord},
    map::{EngineEvent, MapEngine, RenderPass, RenderTile},
    viewport::{DrawTile, Viewport},
};

pub use crate::tiles::{
    failed::{FailedLoad, FailedLoadTracker},
    fetch::FetchPipeline,
    matrix::{TileMatrix, TileView},
    prefetch::{CacheGate, PrefetchEvent, Prefetcher},
    provider::{LayerId, StaticProvider, TileProvider},
    types::{LayerImage, Tile},
};

/// Result type used throughout the library
pub type Result<T> = std::result::Result<T, EngineError>;

/// Common error types
///
/// Variants carry rendered messages rather than source errors so that a
/// [`FailedLoad`] record can hold a clone of the error that produced it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// Network/provider failure; retryable up to the configured budget.
    #[error("fetch failed: {0}")]
    Fetch(String),

    /// Provider explicitly reports no imagery for the coordinate;
    /// recorded as a failed load but never retried.
    #[error("no imagery: {0}")]
    NotFound(String),

    /// Out-of-range coordinate handed to the projection; a programming or
    /// configuration error, never retried.
    #[error("invalid coordinates: {0}")]
    Projection(String),

    /// The fetch pipeline has been torn down.
    #[error("fetch pipeline is shut down")]
    Shutdown,
}

impl EngineError {
    /// Whether the retry budget applies to this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Fetch(_))
    }
}
