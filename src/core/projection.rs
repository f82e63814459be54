//! Stateless Web Mercator projection math (EPSG:3857).
//!
//! Every function here is a pure computation over its arguments, so the
//! render thread, the fetch workers and the prefetcher can all call into
//! this module concurrently without any locking.

use crate::core::geo::{LatLng, LatLngBounds, Point, TileCoord};
use crate::{EngineError, Result};
use std::f64::consts::PI;

/// Edge length of a square tile in pixels
pub const TILE_SIZE: f64 = 256.0;

const EARTH_RADIUS: f64 = 6378137.0;

/// World size in pixels at the given zoom level
pub fn map_size(zoom: u8) -> f64 {
    TILE_SIZE * 2_f64.powi(zoom as i32)
}

/// Number of tiles per axis at a zoom level, saturating where the count
/// no longer fits a positive i64
pub fn tile_matrix_size(zoom: u8) -> (i64, i64) {
    if zoom >= 63 {
        return (i64::MAX, i64::MAX);
    }
    let n = 1_i64 << zoom;
    (n, n)
}

/// Forward projection: geographical coordinate to world pixel at `zoom`.
///
/// Exact inverse of [`pixel_to_lat_lng`] to within floating-point rounding
/// for any position inside the projectable latitude range.
pub fn lat_lng_to_pixel(pos: &LatLng, zoom: u8) -> Point {
    let scale = map_size(zoom);
    let lat = LatLng::clamp_lat(pos.lat);
    let lng = LatLng::wrap_lng(pos.lng);

    let x = lng.to_radians() * EARTH_RADIUS;
    let y = ((PI / 4.0 + lat.to_radians() / 2.0).tan().ln()) * EARTH_RADIUS;

    let pixel_x = (x + PI * EARTH_RADIUS) / (2.0 * PI * EARTH_RADIUS) * scale;
    let pixel_y = (-y + PI * EARTH_RADIUS) / (2.0 * PI * EARTH_RADIUS) * scale;

    Point::new(pixel_x, pixel_y)
}

/// Inverse projection: world pixel at `zoom` back to a geographical coordinate
pub fn pixel_to_lat_lng(pixel: &Point, zoom: u8) -> LatLng {
    let scale = map_size(zoom);

    let x = (pixel.x / scale) * (2.0 * PI * EARTH_RADIUS) - PI * EARTH_RADIUS;
    let y = PI * EARTH_RADIUS - (pixel.y / scale) * (2.0 * PI * EARTH_RADIUS);

    let lng = (x / EARTH_RADIUS).to_degrees();
    let lat = (2.0 * (y / EARTH_RADIUS).exp().atan() - PI / 2.0).to_degrees();

    LatLng::new(lat, lng)
}

/// The tile containing a geographical coordinate at `zoom`
pub fn lat_lng_to_tile(pos: &LatLng, zoom: u8) -> TileCoord {
    let pixel = lat_lng_to_pixel(pos, zoom);
    TileCoord::new(
        (pixel.x / TILE_SIZE).floor() as i64,
        (pixel.y / TILE_SIZE).floor() as i64,
        zoom,
    )
}

/// Checks that a tile coordinate lies inside the tile matrix for its zoom
pub fn check_coord(coord: TileCoord) -> Result<()> {
    if coord.is_valid() {
        Ok(())
    } else {
        Err(EngineError::Projection(format!(
            "tile {} outside matrix at zoom {}",
            coord, coord.z
        )))
    }
}

/// Enumerates every tile coordinate intersecting a lat/lng rectangle at
/// `zoom`, expanded on every side by `margin_px` world pixels.
///
/// The margin lets draw-list construction pre-load tiles just beyond the
/// viewport edge; the prefetcher passes zero.
pub fn area_tile_list(rect: &LatLngBounds, zoom: u8, margin_px: f64) -> Vec<TileCoord> {
    if rect.is_empty() {
        return Vec::new();
    }

    let nw = lat_lng_to_pixel(
        &LatLng::new(rect.north_east.lat, rect.south_west.lng),
        zoom,
    );
    let se = lat_lng_to_pixel(
        &LatLng::new(rect.south_west.lat, rect.north_east.lng),
        zoom,
    );

    let (max_x, max_y) = tile_matrix_size(zoom);
    let min_tx = (((nw.x - margin_px) / TILE_SIZE).floor() as i64).max(0);
    let max_tx = (((se.x + margin_px) / TILE_SIZE).floor() as i64).min(max_x - 1);
    let min_ty = (((nw.y - margin_px) / TILE_SIZE).floor() as i64).max(0);
    let max_ty = (((se.y + margin_px) / TILE_SIZE).floor() as i64).min(max_y - 1);

    let mut tiles = Vec::with_capacity(
        ((max_tx - min_tx + 1).max(0) * (max_ty - min_ty + 1).max(0)) as usize,
    );
    for y in min_ty..=max_ty {
        for x in min_tx..=max_tx {
            tiles.push(TileCoord::new(x, y, zoom));
        }
    }
    tiles
}

/// Largest zoom level at which `rect` fits entirely inside a viewport of
/// `viewport_size` pixels. `None` when the rectangle is empty or nothing
/// fits within the allowed zoom range.
pub fn max_zoom_to_fit_rect(
    rect: &LatLngBounds,
    viewport_size: &Point,
    min_zoom: u8,
    max_zoom: u8,
) -> Option<u8> {
    if rect.is_empty() || viewport_size.x <= 0.0 || viewport_size.y <= 0.0 {
        return None;
    }

    let mut best = None;
    for zoom in min_zoom..=max_zoom {
        let nw = lat_lng_to_pixel(
            &LatLng::new(rect.north_east.lat, rect.south_west.lng),
            zoom,
        );
        let se = lat_lng_to_pixel(
            &LatLng::new(rect.south_west.lat, rect.north_east.lng),
            zoom,
        );

        let width = (se.x - nw.x).abs();
        let height = (se.y - nw.y).abs();

        if width <= viewport_size.x && height <= viewport_size.y {
            best = Some(zoom);
        } else {
            break;
        }
    }
    best
}
