//! Engine configuration knobs.

use crate::core::geo::LatLngBounds;
use std::time::Duration;

/// How a fractional zoom level is displayed using integer tile sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleMode {
    /// Fractional zoom is truncated; tiles are never stretched.
    Integer,
    /// A zoom of 12.3 draws the level-12 tile set enlarged.
    ScaleUp,
    /// A zoom of 12.3 draws the level-13 tile set shrunk.
    ScaleDown,
    /// ScaleUp until a remainder of 0.25, ScaleDown for bigger remainders.
    Dynamic,
}

impl Default for ScaleMode {
    fn default() -> Self {
        Self::Integer
    }
}

/// Which geographical point is held fixed during a zoom-by-delta operation.
///
/// Input glue: the engine only honors the anchor the caller passes along,
/// filtering of wheel events stays on the caller side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseWheelZoomType {
    /// Zoom around the cursor and recenter the map on it.
    MousePositionAndCenter,
    /// Zoom around the viewport center.
    ViewCenter,
    /// Zoom around the cursor without moving the center to it.
    MousePositionWithoutCenter,
}

impl Default for MouseWheelZoomType {
    fn default() -> Self {
        Self::MousePositionAndCenter
    }
}

/// Recognized engine options.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub min_zoom: u8,
    pub max_zoom: u8,
    /// Number of zoom levels below the current one retained in the tile
    /// matrix; everything outside `[zoom - levels, zoom]` is evicted.
    pub levels_kept_in_memory: u8,
    /// Retries granted to a live fetch after its first failed attempt.
    pub retry_load_tile: u32,
    /// Minimum delay before a failed coordinate's next attempt.
    pub retry_delay: Duration,
    /// Number of background fetch workers.
    pub fetch_workers: usize,
    pub scale_mode: ScaleMode,
    /// Optional clamp rectangle for the map position.
    pub bounds_of_map: Option<LatLngBounds>,
    pub mouse_wheel_zoom_type: MouseWheelZoomType,
    /// Pointer travel required before a press turns into a pan.
    pub drag_tolerance_px: f64,
    /// Extra world pixels around the viewport included in the draw list.
    pub tile_margin_px: f64,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            min_zoom: 0,
            max_zoom: 18,
            levels_kept_in_memory: 5,
            retry_load_tile: 2,
            retry_delay: Duration::from_millis(100),
            fetch_workers: 4,
            scale_mode: ScaleMode::default(),
            bounds_of_map: None,
            mouse_wheel_zoom_type: MouseWheelZoomType::default(),
            drag_tolerance_px: 10.0,
            tile_margin_px: 50.0,
        }
    }
}

impl EngineOptions {
    /// Total fetch attempts granted per tile.
    pub fn attempts_per_tile(&self) -> u32 {
        self.retry_load_tile + 1
    }
}

/// Options for a batch prefetch run, independent of the live viewport.
#[derive(Debug, Clone)]
pub struct PrefetchOptions {
    /// Throttle sleep between tiles.
    pub throttle: Duration,
    /// Delay before the single retry a failed tile is granted.
    pub retry_delay: Duration,
}

impl Default for PrefetchOptions {
    fn default() -> Self {
        Self {
            throttle: Duration::from_millis(100),
            // batch jobs back off noticeably longer than live fetches
            retry_delay: Duration::from_millis(1111),
        }
    }
}
