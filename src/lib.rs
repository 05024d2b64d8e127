//! Icon resolution, extraction, caching and sixel rendering for a terminal
//! app launcher grid.

pub mod config;
pub mod error_codes;
pub mod extract;
pub mod grid;
pub mod icon_cache;
pub mod icon_sources;
pub mod launch;
pub mod normalize;
pub mod render_cache;
pub mod resolver;
pub mod shell;
pub mod sixel;
pub mod system;
pub mod terminal;
