//! Terminal geometry: character grid size plus the pixel size of one cell.

use crossterm::terminal;
use tracing::{debug, warn};

/// Cell size used when the terminal does not report pixel dimensions.
pub const FALLBACK_CELL: CellPixels = CellPixels {
    width: 10,
    height: 20,
};

/// Geometry observations accepted per session: the startup query and its
/// immediate follow-up. Anything later is a virtual-keyboard resize storm and
/// is ignored.
const ACCEPTED_OBSERVATIONS: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellPixels {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalGeometry {
    pub columns: u32,
    pub rows: u32,
    pub cell: CellPixels,
}

impl TerminalGeometry {
    pub fn new(columns: u32, rows: u32, cell_width: u32, cell_height: u32) -> Self {
        Self {
            columns,
            rows,
            cell: CellPixels {
                width: cell_width,
                height: cell_height,
            },
        }
    }

    /// Builds geometry from a window-size report, deriving the cell size from
    /// the window's pixel extent.
    pub fn from_window(columns: u16, rows: u16, pixel_width: u16, pixel_height: u16) -> Self {
        let cell = if columns == 0 || rows == 0 || pixel_width == 0 || pixel_height == 0 {
            FALLBACK_CELL
        } else {
            CellPixels {
                width: (u32::from(pixel_width) / u32::from(columns)).max(1),
                height: (u32::from(pixel_height) / u32::from(rows)).max(1),
            }
        };
        Self {
            columns: u32::from(columns),
            rows: u32::from(rows),
            cell,
        }
    }
}

/// Asks the controlling terminal for its size. Terminals that do not report
/// pixels get `FALLBACK_CELL`.
pub fn query_geometry() -> TerminalGeometry {
    match terminal::window_size() {
        Ok(size) => {
            let geometry =
                TerminalGeometry::from_window(size.columns, size.rows, size.width, size.height);
            debug!(?geometry, "queried terminal geometry");
            geometry
        }
        Err(error) => {
            let (columns, rows) = terminal::size().unwrap_or((80, 24));
            warn!(%error, "terminal did not report pixel size, using fallback cell");
            TerminalGeometry {
                columns: u32::from(columns),
                rows: u32::from(rows),
                cell: FALLBACK_CELL,
            }
        }
    }
}

/// Outcome of offering a geometry observation to a `GeometryTracker`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryUpdate {
    /// Accepted and different from the previous value: a new geometry epoch.
    Changed(TerminalGeometry),
    /// Accepted but identical to the current epoch.
    Unchanged,
    /// Arrived after the session stopped listening.
    Ignored,
}

#[derive(Debug, Default)]
pub struct GeometryTracker {
    current: Option<TerminalGeometry>,
    observations: u8,
}

impl GeometryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<TerminalGeometry> {
        self.current
    }

    pub fn is_listening(&self) -> bool {
        self.observations < ACCEPTED_OBSERVATIONS
    }

    pub fn observe(&mut self, geometry: TerminalGeometry) -> GeometryUpdate {
        if !self.is_listening() {
            debug!(?geometry, "ignoring late geometry signal");
            return GeometryUpdate::Ignored;
        }
        self.observations += 1;

        if self.current == Some(geometry) {
            return GeometryUpdate::Unchanged;
        }
        self.current = Some(geometry);
        GeometryUpdate::Changed(geometry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_cell_size_from_window_pixels() {
        let geometry = TerminalGeometry::from_window(80, 24, 800, 480);
        assert_eq!(geometry, TerminalGeometry::new(80, 24, 10, 20));
    }

    #[test]
    fn missing_pixel_report_falls_back() {
        let geometry = TerminalGeometry::from_window(100, 40, 0, 0);
        assert_eq!(geometry.cell, FALLBACK_CELL);
        assert_eq!((geometry.columns, geometry.rows), (100, 40));
    }

    #[test]
    fn tracker_accepts_two_observations_then_ignores() {
        let mut tracker = GeometryTracker::new();
        let first = TerminalGeometry::new(80, 24, 10, 20);
        let second = TerminalGeometry::new(80, 24, 12, 24);

        assert_eq!(tracker.observe(first), GeometryUpdate::Changed(first));
        assert_eq!(tracker.observe(second), GeometryUpdate::Changed(second));
        assert!(!tracker.is_listening());

        let third = TerminalGeometry::new(80, 12, 12, 24);
        assert_eq!(tracker.observe(third), GeometryUpdate::Ignored);
        assert_eq!(tracker.current(), Some(second));
    }

    #[test]
    fn identical_follow_up_is_unchanged() {
        let mut tracker = GeometryTracker::new();
        let geometry = TerminalGeometry::new(60, 30, 9, 18);
        tracker.observe(geometry);
        assert_eq!(tracker.observe(geometry), GeometryUpdate::Unchanged);
    }
}
