//! Viewport state machine: position, zoom, scale, rotation and drag.
//!
//! All math happens in the unrotated integer-zoom tile space; rotation
//! only affects how incoming pixel coordinates are mapped back into that
//! space, and widens the draw rectangle to cover the rotated viewport's
//! bounding box. The presentation layer applies the fractional-zoom scale
//! and the bearing to its own transform.

use crate::core::config::{EngineOptions, ScaleMode};
use crate::core::geo::{LatLng, LatLngBounds, Point, TileCoord};
use crate::core::projection::{self, TILE_SIZE};

/// One draw-list entry: a visible tile and its target pixel position in
/// unrotated, unscaled viewport space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawTile {
    pub coord: TileCoord,
    pub pixel: Point,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum DragState {
    Idle,
    /// Press recorded, pointer not yet past the drag tolerance.
    Armed { anchor: Point },
    Dragging {
        anchor: Point,
        start_offset: Point,
        start_center: Point,
    },
}

/// Manages the current view of the map; mutated only by the thread that
/// receives input or programmatic calls.
#[derive(Debug, Clone)]
pub struct Viewport {
    position: LatLng,
    zoom: f64,
    integer_zoom: u8,
    scale_x: f64,
    scale_y: f64,
    size: Point,
    render_offset: Point,
    bearing: f64,
    drag: DragState,
    last_in_bounds: Option<LatLng>,
    min_zoom: u8,
    max_zoom: u8,
    scale_mode: ScaleMode,
    bounds_of_map: Option<LatLngBounds>,
    drag_tolerance: f64,
    tile_margin: f64,
}

impl Viewport {
    pub fn new(options: &EngineOptions, size: Point) -> Self {
        let mut viewport = Self {
            position: LatLng::default(),
            zoom: options.min_zoom as f64,
            integer_zoom: options.min_zoom,
            scale_x: 1.0,
            scale_y: 1.0,
            size,
            render_offset: Point::default(),
            bearing: 0.0,
            drag: DragState::Idle,
            last_in_bounds: None,
            min_zoom: options.min_zoom,
            max_zoom: options.max_zoom,
            scale_mode: options.scale_mode,
            bounds_of_map: options.bounds_of_map.clone(),
            drag_tolerance: options.drag_tolerance_px,
            tile_margin: options.tile_margin_px,
        };
        viewport.recompute_render_offset();
        viewport
    }

    pub fn position(&self) -> LatLng {
        self.position
    }

    pub fn zoom(&self) -> f64 {
        self.zoom
    }

    /// Integer tile level the fractional zoom is displayed with.
    pub fn integer_zoom(&self) -> u8 {
        self.integer_zoom
    }

    /// Internal geometry scale (the reciprocal of the presentation scale).
    pub fn scale_x(&self) -> f64 {
        self.scale_x
    }

    pub fn scale_y(&self) -> f64 {
        self.scale_y
    }

    /// Scale the presentation layer applies to its transform.
    pub fn display_scale(&self) -> f64 {
        if self.scale_x == 0.0 {
            1.0
        } else {
            1.0 / self.scale_x
        }
    }

    pub fn size(&self) -> Point {
        self.size
    }

    pub fn render_offset(&self) -> Point {
        self.render_offset
    }

    pub fn bearing(&self) -> f64 {
        self.bearing
    }

    pub fn is_rotated(&self) -> bool {
        self.bearing != 0.0
    }

    pub fn is_dragging(&self) -> bool {
        matches!(self.drag, DragState::Dragging { .. })
    }

    pub fn set_size(&mut self, size: Point) {
        self.size = size;
        self.recompute_render_offset();
    }

    pub fn set_bearing(&mut self, degrees: f64) {
        self.bearing = degrees % 360.0;
    }

    /// Sets the center position, clamped to the configured map bounds.
    pub fn set_position(&mut self, position: LatLng) {
        self.position = self.clamp_position(position);
        self.recompute_render_offset();
    }

    /// Sets the zoom, clamped to `[min_zoom, max_zoom]`, and derives the
    /// integer zoom and scale per the configured scale mode.
    pub fn set_zoom(&mut self, zoom: f64) {
        self.zoom = zoom.clamp(self.min_zoom as f64, self.max_zoom as f64);

        let mut remainder = self.zoom % 1.0;
        if self.scale_mode == ScaleMode::Integer || remainder == 0.0 {
            self.integer_zoom = self.zoom.floor() as u8;
            self.scale_x = 1.0;
            self.scale_y = 1.0;
        } else {
            let scale_down = match self.scale_mode {
                ScaleMode::ScaleDown => true,
                ScaleMode::Dynamic => remainder > 0.25,
                _ => false,
            };
            if scale_down {
                remainder -= 1.0;
            }
            let scale = 2_f64.powf(remainder);
            self.scale_x = 1.0 / scale;
            self.scale_y = 1.0 / scale;
            self.integer_zoom = if scale_down {
                self.zoom.ceil() as u8
            } else {
                (self.zoom - remainder) as u8
            };
        }
        self.recompute_render_offset();
    }

    /// Sets the zoom while keeping the geographical point under
    /// `anchor_local` stationary on screen.
    pub fn zoom_around(&mut self, anchor_local: Point, zoom: f64) {
        let fixed = self.from_local_to_lat_lng(&anchor_local);
        self.set_zoom(zoom);
        let moved = self.from_lat_lng_to_local(&fixed);
        self.pan_pixels(moved.subtract(&anchor_local));
    }

    /// Largest zoom at which `rect` fits this viewport, or `None` for an
    /// empty rectangle.
    pub fn max_zoom_to_fit_rect(&self, rect: &LatLngBounds) -> Option<u8> {
        projection::max_zoom_to_fit_rect(rect, &self.size, self.min_zoom, self.max_zoom)
    }

    /// Centers on `rect` at its best-fit zoom. `false` when the rectangle
    /// is empty or nothing fits, leaving the viewport untouched.
    pub fn zoom_to_fit_rect(&mut self, rect: &LatLngBounds) -> bool {
        match self.max_zoom_to_fit_rect(rect) {
            Some(zoom) => {
                self.set_position(rect.center());
                self.set_zoom(zoom as f64);
                true
            }
            None => false,
        }
    }

    /// Records the press anchor; the pan only starts once the pointer
    /// travels past the drag tolerance.
    pub fn begin_drag(&mut self, anchor: Point) {
        self.drag = DragState::Armed { anchor };
        self.last_in_bounds = match &self.bounds_of_map {
            Some(bounds) if bounds.contains(&self.position) => Some(self.position),
            _ => None,
        };
    }

    /// Feeds a pointer move. Returns `true` when the viewport changed.
    pub fn drag(&mut self, current: Point) -> bool {
        match self.drag {
            DragState::Idle => false,
            DragState::Armed { anchor } => {
                let delta = current.subtract(&anchor);
                if delta.x.abs() <= self.drag_tolerance && delta.y.abs() <= self.drag_tolerance {
                    return false;
                }
                self.drag = DragState::Dragging {
                    anchor,
                    start_offset: self.render_offset,
                    start_center: projection::lat_lng_to_pixel(&self.position, self.integer_zoom),
                };
                self.apply_drag(current)
            }
            DragState::Dragging { .. } => self.apply_drag(current),
        }
    }

    /// Ends the pan. With a configured bounding rectangle, a position that
    /// ended up outside snaps to the last in-bounds position seen during
    /// the drag.
    pub fn end_drag(&mut self) {
        let was_dragging = self.is_dragging();
        self.drag = DragState::Idle;
        if !was_dragging {
            return;
        }
        if let Some(bounds) = self.bounds_of_map.clone() {
            if !bounds.contains(&self.position) {
                if let Some(last) = self.last_in_bounds {
                    self.set_position(last);
                }
            }
        }
        self.last_in_bounds = None;
    }

    fn apply_drag(&mut self, current: Point) -> bool {
        let DragState::Dragging {
            anchor,
            start_offset,
            start_center,
        } = self.drag
        else {
            return false;
        };

        let mut delta = current.subtract(&anchor);
        if self.is_rotated() {
            delta = delta.rotate(self.bearing);
        }

        self.render_offset = start_offset.add(&delta);
        let center = start_center.subtract(&delta);
        self.position = projection::pixel_to_lat_lng(&center, self.integer_zoom);

        if let Some(bounds) = &self.bounds_of_map {
            if bounds.contains(&self.position) {
                self.last_in_bounds = Some(self.position);
            }
        }
        true
    }

    /// Shifts the view by a pixel delta in unrotated space.
    pub fn pan_pixels(&mut self, delta: Point) {
        let center = projection::lat_lng_to_pixel(&self.position, self.integer_zoom);
        self.set_position(projection::pixel_to_lat_lng(&center.add(&delta), self.integer_zoom));
    }

    /// Converts a local (container) pixel to a geographical coordinate.
    pub fn from_local_to_lat_lng(&self, local: &Point) -> LatLng {
        let unrotated = self.unrotate(local);
        let world = unrotated.subtract(&self.render_offset);
        projection::pixel_to_lat_lng(&world, self.integer_zoom)
    }

    /// Converts a geographical coordinate to a local (container) pixel.
    pub fn from_lat_lng_to_local(&self, pos: &LatLng) -> Point {
        let world = projection::lat_lng_to_pixel(pos, self.integer_zoom);
        let local = world.add(&self.render_offset);
        self.rotate_local(&local)
    }

    /// Geographical bounds of the (unrotated) viewport rectangle.
    pub fn bounds(&self) -> LatLngBounds {
        let nw = self.from_local_to_lat_lng(&Point::new(0.0, 0.0));
        let se = self.from_local_to_lat_lng(&self.size);
        LatLngBounds::new(LatLng::new(se.lat, nw.lng), LatLng::new(nw.lat, se.lng))
    }

    /// Builds the ordered draw list for the current state: every tile
    /// intersecting the viewport plus the configured margin, paired with
    /// its pixel position, sorted center-out so the middle of the screen
    /// fills in first.
    pub fn draw_list(&self) -> Vec<DrawTile> {
        let zoom = self.integer_zoom;
        let center_world = projection::lat_lng_to_pixel(&self.position, zoom);

        // A rotated viewport is covered by the bounding square of its
        // diagonal; extra tiles beyond it are cheap compared to gaps.
        let (half_w, half_h) = if self.is_rotated() {
            let half_diag = self.size.distance_to(&Point::default()) / 2.0;
            (half_diag, half_diag)
        } else {
            (self.size.x / 2.0, self.size.y / 2.0)
        };

        let min = Point::new(
            center_world.x - half_w - self.tile_margin,
            center_world.y - half_h - self.tile_margin,
        );
        let max = Point::new(
            center_world.x + half_w + self.tile_margin,
            center_world.y + half_h + self.tile_margin,
        );

        let (matrix_w, matrix_h) = projection::tile_matrix_size(zoom);
        let min_tx = ((min.x / TILE_SIZE).floor() as i64).max(0);
        let max_tx = ((max.x / TILE_SIZE).floor() as i64).min(matrix_w - 1);
        let min_ty = ((min.y / TILE_SIZE).floor() as i64).max(0);
        let max_ty = ((max.y / TILE_SIZE).floor() as i64).min(matrix_h - 1);

        let center_tile = Point::new(center_world.x / TILE_SIZE, center_world.y / TILE_SIZE);
        let mut list = Vec::with_capacity(
            ((max_tx - min_tx + 1).max(0) * (max_ty - min_ty + 1).max(0)) as usize,
        );
        for y in min_ty..=max_ty {
            for x in min_tx..=max_tx {
                let coord = TileCoord::new(x, y, zoom);
                let pixel = coord.top_left_pixel(TILE_SIZE).add(&self.render_offset);
                list.push(DrawTile { coord, pixel });
            }
        }

        list.sort_by(|a, b| {
            let da = Point::new(a.coord.x as f64 + 0.5, a.coord.y as f64 + 0.5)
                .distance_to(&center_tile);
            let db = Point::new(b.coord.x as f64 + 0.5, b.coord.y as f64 + 0.5)
                .distance_to(&center_tile);
            da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
        });
        list
    }

    fn recompute_render_offset(&mut self) {
        let center = projection::lat_lng_to_pixel(&self.position, self.integer_zoom);
        self.render_offset = Point::new(
            self.size.x / 2.0 - center.x,
            self.size.y / 2.0 - center.y,
        );
    }

    fn clamp_position(&self, position: LatLng) -> LatLng {
        match &self.bounds_of_map {
            Some(bounds) => LatLng::new(
                position
                    .lat
                    .clamp(bounds.south_west.lat, bounds.north_east.lat),
                position
                    .lng
                    .clamp(bounds.south_west.lng, bounds.north_east.lng),
            ),
            None => LatLng::new(
                LatLng::clamp_lat(position.lat),
                LatLng::wrap_lng(position.lng),
            ),
        }
    }

    /// Maps an incoming (possibly rotated) pixel back to unrotated space.
    fn unrotate(&self, local: &Point) -> Point {
        if !self.is_rotated() {
            return *local;
        }
        let center = Point::new(self.size.x / 2.0, self.size.y / 2.0);
        local.subtract(&center).rotate(self.bearing).add(&center)
    }

    fn rotate_local(&self, local: &Point) -> Point {
        if !self.is_rotated() {
            return *local;
        }
        let center = Point::new(self.size.x / 2.0, self.size.y / 2.0);
        local.subtract(&center).rotate(-self.bearing).add(&center)
    }
}
