//! Grid geometry and icon placement. Everything here is pure string
//! building; the interactive shell decides when to write it.

use std::fmt::Write as _;

use image::RgbaImage;
use tracing::debug;

use crate::config::{Config, GridConfig};
use crate::render_cache::{RenderCache, RenderKey};
use crate::sixel::render_icon;
use crate::terminal::TerminalGeometry;

const TOP_LEFT: char = '╭';
const TOP_RIGHT: char = '╮';
const BOTTOM_LEFT: char = '╰';
const BOTTOM_RIGHT: char = '╯';
const HORIZONTAL: char = '─';
const VERTICAL: char = '│';
const RESET: &str = "\x1b[0m";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridLayout {
    pub term_columns: u32,
    pub term_rows: u32,
    pub grid: GridConfig,
    pub padding: u32,
    pub border: bool,
    /// Number of apps occupying slots, row-major.
    pub slots: usize,
}

impl GridLayout {
    pub fn new(config: &Config, geometry: &TerminalGeometry, slots: usize) -> Self {
        Self {
            term_columns: geometry.columns,
            term_rows: geometry.rows,
            grid: config.grid,
            padding: config.style.padding,
            border: config.style.border,
            slots,
        }
    }

    /// Terminal cells per grid cell. The last terminal row is left free so
    /// the bottom border is never cut off.
    pub fn cell_size(&self) -> (u32, u32) {
        if self.grid.columns == 0 || self.grid.rows == 0 {
            return (0, 0);
        }
        (
            self.term_columns / self.grid.columns,
            self.term_rows.saturating_sub(1) / self.grid.rows,
        )
    }

    fn border_width(&self) -> i64 {
        if self.border {
            1
        } else {
            0
        }
    }

    /// Space left for the icon inside one cell, floored at 1.
    pub fn icon_area(&self) -> (u32, u32) {
        let (cell_w, cell_h) = self.cell_size();
        let inset = 2 * i64::from(self.padding) + 2 * self.border_width();
        let fit = |extent: u32| (i64::from(extent) - inset).max(1) as u32;
        (fit(cell_w), fit(cell_h))
    }

    /// Slot under a zero-based terminal coordinate.
    pub fn hit_test(&self, x: u32, y: u32) -> Option<usize> {
        let (cell_w, cell_h) = self.cell_size();
        if cell_w == 0 || cell_h == 0 {
            return None;
        }
        let (col, row) = (x / cell_w, y / cell_h);
        if col >= self.grid.columns || row >= self.grid.rows {
            return None;
        }
        let index = (row * self.grid.columns + col) as usize;
        (index < self.slots).then_some(index)
    }

    /// Slot positions in row-major order, limited to the visible grid.
    pub fn visible_slots(&self) -> impl Iterator<Item = (usize, u32, u32)> + '_ {
        let capacity = (self.grid.rows * self.grid.columns) as usize;
        (0..self.slots.min(capacity)).map(move |index| {
            let columns = self.grid.columns as usize;
            (index, (index % columns) as u32, (index / columns) as u32)
        })
    }

    /// Rounded frame around every grid cell, occupied or not.
    pub fn frames(&self, color: &str) -> String {
        let capacity = (self.grid.rows * self.grid.columns) as usize;
        (0..capacity)
            .map(|index| self.frame(index, color))
            .collect()
    }

    /// Rounded frame around one cell in the given ANSI 256 color. Empty when
    /// borders are off or the cell has no room.
    pub fn frame(&self, index: usize, color: &str) -> String {
        let (cell_w, cell_h) = self.cell_size();
        if !self.border || cell_w < 2 || cell_h < 2 || self.grid.columns == 0 {
            return String::new();
        }
        let columns = self.grid.columns as usize;
        let x = (index % columns) as u32 * cell_w + 1;
        let y = (index / columns) as u32 * cell_h + 1;
        let inner = HORIZONTAL.to_string().repeat((cell_w - 2) as usize);

        let mut out = String::new();
        let _ = write!(out, "\x1b[{y};{x}H\x1b[38;5;{color}m{TOP_LEFT}{inner}{TOP_RIGHT}");
        for dy in 1..cell_h - 1 {
            let _ = write!(out, "\x1b[{};{x}H{VERTICAL}", y + dy);
            let _ = write!(out, "\x1b[{};{}H{VERTICAL}", y + dy, x + cell_w - 1);
        }
        let _ = write!(
            out,
            "\x1b[{};{x}H{BOTTOM_LEFT}{inner}{BOTTOM_RIGHT}{RESET}",
            y + cell_h - 1
        );
        out
    }
}

/// Owns the render cache for the current geometry epoch and emits the
/// positioned sixel overlay.
#[derive(Debug, Default)]
pub struct IconRenderer {
    cache: RenderCache,
    geometry: Option<TerminalGeometry>,
    drawn: bool,
}

impl IconRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cache(&self) -> &RenderCache {
        &self.cache
    }

    pub fn geometry(&self) -> Option<TerminalGeometry> {
        self.geometry
    }

    pub fn is_drawn(&self) -> bool {
        self.drawn
    }

    /// Starts a new epoch when the geometry differs from the current one.
    /// Encoded bitmaps depend only on the cell pixel size, so a grid-only
    /// change keeps the cache. Returns whether a redraw is required.
    pub fn apply_geometry(&mut self, geometry: TerminalGeometry) -> bool {
        let previous = self.geometry.replace(geometry);
        if previous == Some(geometry) {
            return false;
        }
        if previous.map(|previous| previous.cell) != Some(geometry.cell) {
            debug!(?geometry, "cell size changed, clearing render cache");
            self.cache.clear();
        }
        self.drawn = false;
        true
    }

    /// Cursor moves plus sixel payloads for every visible icon. `scales` is
    /// index-aligned with `icons`; missing entries mean 1.0.
    pub fn draw(&mut self, icons: &[RgbaImage], layout: &GridLayout, scales: &[f64]) -> String {
        let Some(geometry) = self.geometry else {
            return String::new();
        };
        let cell_px = geometry.cell;
        let (cell_w, cell_h) = layout.cell_size();
        if cell_w == 0 || cell_h == 0 || cell_px.width == 0 || cell_px.height == 0 {
            return String::new();
        }
        let (icon_w, icon_h) = layout.icon_area();
        let inset = layout.border_width() + i64::from(layout.padding);

        let mut out = String::new();
        for (index, col, row) in layout.visible_slots() {
            let Some(icon) = icons.get(index) else {
                continue;
            };
            let scale = scales.get(index).copied().unwrap_or(1.0);
            let width_cells = ((f64::from(icon_w) * scale) as u32).max(1);
            let height_cells = ((f64::from(icon_h) * scale) as u32).max(1);

            let key = RenderKey::new(index, width_cells, height_cells, scale);
            let bitmap = self.cache.get_or_render(key, || {
                render_icon(icon, width_cells, height_cells, cell_px)
            });
            if bitmap.is_empty() {
                continue;
            }

            let bitmap_w = i64::from(bitmap.pixel_width / cell_px.width);
            let bitmap_h = i64::from(bitmap.pixel_height / cell_px.height);
            let offset_x = (i64::from(icon_w) - bitmap_w) / 2;
            let offset_y = (i64::from(icon_h) - bitmap_h) / 2;
            let x = (i64::from(col) * i64::from(cell_w) + inset + offset_x + 1).max(1);
            let y = (i64::from(row) * i64::from(cell_h) + inset + offset_y + 1).max(1);

            let _ = write!(out, "\x1b[{y};{x}H");
            out.push_str(&bitmap.encoded);
        }

        self.drawn = true;
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn layout(
        term_columns: u32,
        term_rows: u32,
        rows: u32,
        columns: u32,
        slots: usize,
    ) -> GridLayout {
        GridLayout {
            term_columns,
            term_rows,
            grid: GridConfig { rows, columns },
            padding: 1,
            border: true,
            slots,
        }
    }

    fn icon() -> RgbaImage {
        RgbaImage::from_pixel(48, 48, Rgba([200, 30, 30, 255]))
    }

    #[test]
    fn cell_size_reserves_last_row() {
        let grid = layout(100, 21, 2, 5, 3);
        assert_eq!(grid.cell_size(), (20, 10));
        assert_eq!(grid.icon_area(), (16, 6));
    }

    #[test]
    fn icon_area_floors_at_one() {
        let grid = layout(10, 4, 1, 5, 1);
        assert_eq!(grid.cell_size(), (2, 3));
        assert_eq!(grid.icon_area(), (1, 1));
    }

    #[test]
    fn hit_test_maps_coordinates_to_slots() {
        let grid = layout(100, 21, 2, 5, 7);
        assert_eq!(grid.hit_test(0, 0), Some(0));
        assert_eq!(grid.hit_test(45, 3), Some(2));
        assert_eq!(grid.hit_test(25, 12), Some(6));
        assert_eq!(grid.hit_test(45, 12), None, "slot 7 is empty");
        assert_eq!(grid.hit_test(99, 25), None);
    }

    #[test]
    fn draws_centered_icon_at_expected_cursor() {
        // 60x13 terminal, 1x5 grid: 12x12 cells, 8x8 icon area.
        let grid = layout(60, 13, 1, 5, 2);
        let mut renderer = IconRenderer::new();
        assert!(renderer.apply_geometry(TerminalGeometry::new(60, 13, 10, 20)));

        let out = renderer.draw(&[icon(), icon()], &grid, &[1.0, 0.5]);
        // Full scale: 80x160 px box, square fit is 80x80 -> 8x4 cells,
        // offsets (0, 2); cursor col 0*12+1+1+0+1, row 0+1+1+2+1.
        assert!(out.starts_with("\x1b[5;3H\x1bP0;1;0q\"1;1;80;80"));
        // Half scale: 4x4 cells -> 40x80 px box, 40x40 bitmap -> 4x2 cells,
        // offsets (2, 3); col 12+1+1+2+1, row 1+1+3+1.
        assert!(out.contains("\x1b[6;17H\x1bP0;1;0q\"1;1;40;40"));
        assert!(renderer.is_drawn());
        assert_eq!(renderer.cache().encode_count(), 2);
    }

    #[test]
    fn repeated_draws_reuse_cache_until_geometry_changes() {
        let grid = layout(60, 13, 1, 5, 1);
        let mut renderer = IconRenderer::new();
        renderer.apply_geometry(TerminalGeometry::new(60, 13, 10, 20));

        let first = renderer.draw(&[icon()], &grid, &[1.0]);
        let second = renderer.draw(&[icon()], &grid, &[1.0]);
        assert_eq!(first, second);
        assert_eq!(renderer.cache().encode_count(), 1);

        assert!(!renderer.apply_geometry(TerminalGeometry::new(60, 13, 10, 20)));
        assert!(renderer.is_drawn());

        assert!(renderer.apply_geometry(TerminalGeometry::new(60, 13, 12, 24)));
        assert!(renderer.cache().is_empty());
        assert!(!renderer.is_drawn());
        let third = renderer.draw(&[icon()], &grid, &[1.0]);
        assert_ne!(first, third);
        assert_eq!(renderer.cache().encode_count(), 2);
    }

    #[test]
    fn grid_only_change_keeps_encoded_bitmaps() {
        let mut renderer = IconRenderer::new();
        renderer.apply_geometry(TerminalGeometry::new(60, 41, 10, 20));
        let before = renderer.draw(&[icon()], &layout(60, 41, 2, 5, 1), &[1.0]);
        assert_eq!(renderer.cache().encode_count(), 1);

        // One more row leaves the 20-row cells untouched.
        assert!(renderer.apply_geometry(TerminalGeometry::new(60, 42, 10, 20)));
        assert!(!renderer.is_drawn());
        assert_eq!(renderer.cache().len(), 1);

        let after = renderer.draw(&[icon()], &layout(60, 42, 2, 5, 1), &[1.0]);
        assert_eq!(before, after);
        assert_eq!(renderer.cache().encode_count(), 1);
    }

    #[test]
    fn draw_without_geometry_is_empty() {
        let grid = layout(60, 13, 1, 5, 1);
        let mut renderer = IconRenderer::new();
        assert!(renderer.draw(&[icon()], &grid, &[1.0]).is_empty());
    }

    #[test]
    fn frame_uses_rounded_corners_and_color() {
        let grid = layout(20, 5, 1, 2, 2);
        let frame = grid.frame(1, "96");
        assert!(frame.starts_with("\x1b[1;11H\x1b[38;5;96m╭────────╮"));
        assert!(frame.contains("\x1b[2;20H│"));
        assert!(frame.ends_with("\x1b[4;11H╰────────╯\x1b[0m"));
        assert!(layout(20, 5, 1, 2, 2).frames("240").matches('╭').count() == 2);
    }
}
