//! Interactive grid: alternate screen, mouse capture, one sixel overlay per
//! geometry epoch and a short border flash on click.

use std::io::{self, Stdout, Write};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossterm::cursor::{Hide, Show};
use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
    KeyModifiers, MouseButton, MouseEventKind,
};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use image::RgbaImage;
use tracing::{debug, warn};

use crate::config::{AppConfig, Config};
use crate::grid::{GridLayout, IconRenderer};
use crate::launch::Launcher;
use crate::terminal::{query_geometry, GeometryTracker, GeometryUpdate, TerminalGeometry};

pub const FLASH_DURATION: Duration = Duration::from_millis(150);
const IDLE_POLL: Duration = Duration::from_millis(250);
const SYNC_START: &str = "\x1b[?2026h";
const SYNC_END: &str = "\x1b[?2026l";
const CLEAR: &str = "\x1b[2J\x1b[H";

/// Terminal-independent session state; every method returns the bytes to
/// write, if any.
pub struct ShellState {
    config: Config,
    apps: Vec<AppConfig>,
    icons: Vec<RgbaImage>,
    scales: Vec<f64>,
    tracker: GeometryTracker,
    renderer: IconRenderer,
    flash: Option<(usize, Instant)>,
}

impl ShellState {
    /// `icons` must be index-aligned with `config.display_apps()`.
    pub fn new(config: Config, icons: Vec<RgbaImage>) -> Self {
        let apps = config.display_apps();
        let scales = apps.iter().map(|app| config.effective_scale(app)).collect();
        Self {
            config,
            apps,
            icons,
            scales,
            tracker: GeometryTracker::new(),
            renderer: IconRenderer::new(),
            flash: None,
        }
    }

    pub fn apps(&self) -> &[AppConfig] {
        &self.apps
    }

    pub fn renderer(&self) -> &IconRenderer {
        &self.renderer
    }

    pub fn is_listening(&self) -> bool {
        self.tracker.is_listening()
    }

    fn layout(&self) -> Option<GridLayout> {
        self.renderer
            .geometry()
            .map(|geometry| GridLayout::new(&self.config, &geometry, self.apps.len()))
    }

    /// Offers a geometry observation; a new epoch produces a full redraw.
    pub fn observe_geometry(&mut self, geometry: TerminalGeometry) -> Option<String> {
        match self.tracker.observe(geometry) {
            GeometryUpdate::Changed(geometry) => {
                self.renderer.apply_geometry(geometry);
                Some(self.full_frame())
            }
            GeometryUpdate::Unchanged | GeometryUpdate::Ignored => None,
        }
    }

    /// Startup handshake: the initial query plus one immediate follow-up that
    /// reconciles pixel measurements. Returns the latest frame to write.
    pub fn settle_geometry(
        &mut self,
        mut query: impl FnMut() -> TerminalGeometry,
    ) -> Option<String> {
        let first = self.observe_geometry(query());
        let second = self.observe_geometry(query());
        second.or(first)
    }

    /// Borders plus the sixel overlay.
    pub fn full_frame(&mut self) -> String {
        let Some(layout) = self.layout() else {
            return String::new();
        };
        let mut out = String::from(SYNC_START);
        out.push_str(CLEAR);

        let (cell_w, cell_h) = layout.cell_size();
        if self.apps.is_empty() {
            out.push_str("No apps configured. Edit ~/.config/tooie-shelf/config.yaml");
        } else if cell_w == 0 || cell_h == 0 {
            out.push_str("Terminal too small");
        } else {
            out.push_str(&layout.frames(self.config.border_color()));
            out.push_str(&self.renderer.draw(&self.icons, &layout, &self.scales));
        }

        out.push_str(&format!("\x1b[{};1H", layout.term_rows.max(1)));
        out.push_str(SYNC_END);
        out
    }

    /// Returns the clicked slot and the highlight frame for it.
    pub fn click(&mut self, x: u16, y: u16, now: Instant) -> Option<(usize, String)> {
        let layout = self.layout()?;
        let index = layout.hit_test(u32::from(x), u32::from(y))?;

        let mut out = self.expire_flash(now + FLASH_DURATION).unwrap_or_default();
        out.push_str(&layout.frame(index, self.config.highlight_color()));
        out.push_str(&format!("\x1b[{};1H", layout.term_rows.max(1)));
        self.flash = Some((index, now + FLASH_DURATION));
        Some((index, out))
    }

    /// Restores the normal border once the flash deadline has passed.
    pub fn expire_flash(&mut self, now: Instant) -> Option<String> {
        let (index, deadline) = self.flash?;
        if now < deadline {
            return None;
        }
        self.flash = None;
        let layout = self.layout()?;
        Some(layout.frame(index, self.config.border_color()))
    }

    /// Time until the pending flash should be cleared.
    pub fn next_deadline(&self, now: Instant) -> Duration {
        self.flash
            .map(|(_, deadline)| deadline.saturating_duration_since(now))
            .unwrap_or(IDLE_POLL)
    }
}

pub fn is_quit_key(key: &KeyEvent) -> bool {
    match key.code {
        KeyCode::Char('q') | KeyCode::Esc => true,
        KeyCode::Char('c') => key.modifiers.contains(KeyModifiers::CONTROL),
        _ => false,
    }
}

/// Restores the terminal on every exit path.
struct TerminalGuard {
    stdout: Stdout,
}

impl TerminalGuard {
    fn enter() -> Result<Self> {
        let mut stdout = io::stdout();
        enable_raw_mode().context("failed to enable raw mode")?;
        execute!(stdout, EnterAlternateScreen, EnableMouseCapture, Hide)
            .context("failed to enter alternate screen")?;
        Ok(Self { stdout })
    }

    fn write(&mut self, bytes: &str) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        self.stdout.write_all(bytes.as_bytes())?;
        self.stdout.flush()?;
        Ok(())
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = execute!(self.stdout, Show, DisableMouseCapture, LeaveAlternateScreen);
        let _ = disable_raw_mode();
    }
}

/// Runs until a quit key (or a launch with `close_on_launch`).
pub fn run(config: Config, icons: Vec<RgbaImage>, launcher: &Launcher) -> Result<()> {
    let close_on_launch = config.behavior.close_on_launch;
    let mut state = ShellState::new(config, icons);
    let mut terminal = TerminalGuard::enter()?;

    if let Some(frame) = state.settle_geometry(query_geometry) {
        terminal.write(&frame)?;
    }

    loop {
        let now = Instant::now();
        if let Some(restore) = state.expire_flash(now) {
            terminal.write(&restore)?;
        }
        launcher.tasks().reap();
        if !event::poll(state.next_deadline(now)).context("failed to poll terminal events")? {
            continue;
        }

        match event::read().context("failed to read terminal event")? {
            Event::Key(key) if key.kind == KeyEventKind::Press && is_quit_key(&key) => break,
            Event::Resize(columns, rows) => {
                debug!(columns, rows, "ignoring resize");
            }
            Event::Mouse(mouse) if mouse.kind == MouseEventKind::Up(MouseButton::Left) => {
                let Some((index, flash)) = state.click(mouse.column, mouse.row, Instant::now())
                else {
                    continue;
                };
                terminal.write(&flash)?;
                let app = &state.apps()[index];
                if let Err(error) = launcher.launch(app) {
                    warn!(app = %app.name, "{error:#}");
                }
                if close_on_launch {
                    break;
                }
            }
            _ => {}
        }
    }

    launcher.tasks().shutdown();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn state_with_apps(count: usize) -> ShellState {
        let mut config = Config::default();
        config.apps = (0..count)
            .map(|index| AppConfig {
                name: format!("app{index}"),
                command: Some("true".into()),
                ..AppConfig::default()
            })
            .collect();
        let icons = vec![RgbaImage::from_pixel(16, 16, Rgba([0, 0, 255, 255])); count];
        ShellState::new(config, icons)
    }

    #[test]
    fn third_geometry_signal_is_ignored() {
        let mut state = state_with_apps(2);
        let frame = state
            .observe_geometry(TerminalGeometry::new(60, 13, 10, 20))
            .expect("first geometry should draw");
        assert!(frame.contains("\x1bP0;1;0q"));
        assert_eq!(state.renderer().cache().encode_count(), 2);

        let frame = state
            .observe_geometry(TerminalGeometry::new(60, 13, 12, 24))
            .expect("changed follow-up should redraw");
        assert!(frame.contains("\x1bP0;1;0q"));
        assert_eq!(state.renderer().cache().encode_count(), 4);

        assert!(state
            .observe_geometry(TerminalGeometry::new(60, 9, 10, 20))
            .is_none());
        assert!(!state.is_listening());
        assert_eq!(state.renderer().geometry(), Some(TerminalGeometry::new(60, 13, 12, 24)));
    }

    #[test]
    fn keyboard_resizes_after_startup_do_not_move_the_grid() {
        let mut state = state_with_apps(2);
        let mut queries = vec![
            TerminalGeometry::new(60, 41, 10, 20),
            TerminalGeometry::new(60, 41, 12, 24),
        ]
        .into_iter();
        let frame = state
            .settle_geometry(|| queries.next().expect("two queries"))
            .expect("startup should draw");
        assert!(frame.contains("\x1bP0;1;0q"));
        assert!(!state.is_listening());

        // Keyboard opens, then closes.
        assert!(state
            .observe_geometry(TerminalGeometry::new(60, 15, 12, 24))
            .is_none());
        assert!(state
            .observe_geometry(TerminalGeometry::new(60, 41, 12, 24))
            .is_none());
        assert_eq!(
            state.renderer().geometry(),
            Some(TerminalGeometry::new(60, 41, 12, 24))
        );
    }

    #[test]
    fn identical_startup_queries_draw_once() {
        let mut state = state_with_apps(1);
        let frame = state.settle_geometry(|| TerminalGeometry::new(60, 13, 10, 20));
        assert!(frame.is_some());
        assert_eq!(state.renderer().cache().encode_count(), 1);
        assert!(!state.is_listening());
    }

    #[test]
    fn click_flashes_then_restores_border() {
        let mut state = state_with_apps(2);
        state.observe_geometry(TerminalGeometry::new(60, 13, 10, 20));
        let start = Instant::now();

        let (index, flash) = state.click(14, 3, start).expect("slot 1 should hit");
        assert_eq!(index, 1);
        assert!(flash.contains("\x1b[38;5;96m"));

        assert!(state.expire_flash(start + Duration::from_millis(10)).is_none());
        let restore = state
            .expire_flash(start + FLASH_DURATION)
            .expect("flash should expire");
        assert!(restore.contains("\x1b[38;5;240m"));
        assert!(state.expire_flash(start + FLASH_DURATION * 2).is_none());
    }

    #[test]
    fn clicks_on_empty_slots_miss() {
        let mut state = state_with_apps(1);
        assert!(state.click(0, 0, Instant::now()).is_none(), "no geometry yet");
        state.observe_geometry(TerminalGeometry::new(60, 13, 10, 20));
        assert!(state.click(30, 3, Instant::now()).is_none());
    }

    #[test]
    fn empty_config_shows_hint() {
        let mut state = state_with_apps(0);
        let frame = state
            .observe_geometry(TerminalGeometry::new(60, 13, 10, 20))
            .expect("first geometry should draw");
        assert!(frame.contains("No apps configured"));
    }

    #[test]
    fn quit_keys() {
        let key = |code, modifiers| KeyEvent::new(code, modifiers);
        assert!(is_quit_key(&key(KeyCode::Char('q'), KeyModifiers::NONE)));
        assert!(is_quit_key(&key(KeyCode::Esc, KeyModifiers::NONE)));
        assert!(is_quit_key(&key(KeyCode::Char('c'), KeyModifiers::CONTROL)));
        assert!(!is_quit_key(&key(KeyCode::Char('c'), KeyModifiers::NONE)));
    }
}
