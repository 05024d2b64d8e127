use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::icon_sources::IconSource;
use crate::resolver::IdentityResolver;
use crate::system::home_dir;

pub const CONFIG_FILE: &str = "config.yaml";
const DEFAULT_BORDER_COLOR: &str = "240";
const DEFAULT_HIGHLIGHT_COLOR: &str = "96";
const MIN_SCALE: f64 = 0.1;
const MAX_SCALE: f64 = 1.0;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// App names in display order; empty shows every app.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub display: Vec<String>,
    pub grid: GridConfig,
    pub style: StyleConfig,
    pub behavior: BehaviorConfig,
    pub apps: Vec<AppConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub rows: u32,
    pub columns: u32,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            rows: 1,
            columns: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StyleConfig {
    pub border: bool,
    pub padding: u32,
    /// Global icon scale, clamped to `0.1..=1.0` when used.
    pub icon_scale: f64,
    /// ANSI 256 color index, or `default`.
    pub border_color: String,
    pub highlight_color: String,
}

impl Default for StyleConfig {
    fn default() -> Self {
        Self {
            border: true,
            padding: 1,
            icon_scale: 1.0,
            border_color: DEFAULT_BORDER_COLOR.to_owned(),
            highlight_color: DEFAULT_HIGHLIGHT_COLOR.to_owned(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorConfig {
    pub close_on_launch: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity: Option<String>,
    /// Shell command; takes priority over `package` when launching.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_scale: Option<f64>,
}

impl AppConfig {
    pub fn is_command(&self) -> bool {
        self.command.as_deref().is_some_and(|command| !command.is_empty())
    }

    pub fn package(&self) -> Option<&str> {
        self.package.as_deref().filter(|package| !package.is_empty())
    }

    pub fn activity(&self) -> Option<&str> {
        self.activity.as_deref().filter(|activity| !activity.is_empty())
    }

    pub fn icon(&self) -> Option<&str> {
        self.icon.as_deref().filter(|icon| !icon.is_empty())
    }

    fn needs_detection(&self) -> bool {
        !self.is_command() && (self.package().is_none() || self.activity().is_none())
    }
}

impl Config {
    /// Per-app scale if positive, else global if positive, else 1.0.
    pub fn effective_scale(&self, app: &AppConfig) -> f64 {
        match app.icon_scale.filter(|scale| *scale > 0.0) {
            Some(scale) => clamp_scale(scale),
            None if self.style.icon_scale > 0.0 => clamp_scale(self.style.icon_scale),
            None => 1.0,
        }
    }

    /// Apps in `display` order; names not matching any app are skipped.
    pub fn display_apps(&self) -> Vec<AppConfig> {
        if self.display.is_empty() {
            return self.apps.clone();
        }
        let by_name: HashMap<&str, &AppConfig> = self
            .apps
            .iter()
            .map(|app| (app.name.as_str(), app))
            .collect();
        self.display
            .iter()
            .filter_map(|name| by_name.get(name.as_str()).map(|app| (*app).clone()))
            .collect()
    }

    pub fn border_color(&self) -> &str {
        color_or(&self.style.border_color, DEFAULT_BORDER_COLOR)
    }

    pub fn highlight_color(&self) -> &str {
        color_or(&self.style.highlight_color, DEFAULT_HIGHLIGHT_COLOR)
    }

    pub fn validate(&self) -> Result<()> {
        if self.grid.rows < 1 {
            bail!("grid.rows must be at least 1");
        }
        if self.grid.columns < 1 {
            bail!("grid.columns must be at least 1");
        }

        for (index, app) in self.apps.iter().enumerate() {
            if !app.is_command() {
                if app.package().is_none() {
                    bail!(
                        "app {index} ({}): package name is required for Android apps (or omit package/activity to auto-detect)",
                        app.name
                    );
                }
                if app.activity().is_none() {
                    bail!(
                        "app {index} ({}): activity is required for Android apps (or omit package/activity to auto-detect)",
                        app.name
                    );
                }
            }
            // Remote sources are checked at load time, where a bad one falls
            // back to the placeholder.
            if let Some(icon) = app.icon() {
                match IconSource::parse(icon) {
                    Ok(IconSource::Local(path)) if !path.exists() => {
                        bail!(
                            "app {index} ({}): icon file not found: {}",
                            app.name,
                            path.display()
                        );
                    }
                    Ok(_) => {}
                    Err(error) => warn!(app = %app.name, "{error}"),
                }
            }
        }
        Ok(())
    }
}

fn clamp_scale(scale: f64) -> f64 {
    scale.clamp(MIN_SCALE, MAX_SCALE)
}

fn color_or<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.is_empty() || value == "default" {
        fallback
    } else {
        value
    }
}

/// `~/.config/tooie-shelf`, or `./.config/tooie-shelf` without a home.
pub fn config_root() -> PathBuf {
    home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("tooie-shelf")
}

pub fn default_config_path() -> PathBuf {
    config_root().join(CONFIG_FILE)
}

/// Expands a leading `~/` against `$HOME`.
pub fn expand_home(path: &str) -> String {
    match (path.strip_prefix("~/"), home_dir()) {
        (Some(rest), Some(home)) => home.join(rest).display().to_string(),
        _ => path.to_owned(),
    }
}

pub fn parse_config(contents: &str, origin: &Path) -> Result<Config> {
    serde_yaml::from_str(contents).map_err(|error| {
        let location = error
            .location()
            .map(|location| format!("line {}, column {}", location.line(), location.column()))
            .unwrap_or_else(|| "unknown location".to_owned());
        anyhow!(
            "failed to parse yaml in {} at {}: {}",
            origin.display(),
            location,
            error
        )
    })
}

/// Reads, expands, auto-detects and validates. A missing file yields the
/// defaults. Detection failures only warn; validation failures are fatal.
pub fn load(path: &Path, resolver: Option<&IdentityResolver>) -> Result<Config> {
    let mut config = match fs::read_to_string(path) {
        Ok(contents) => parse_config(&contents, path)?,
        Err(error) if error.kind() == io::ErrorKind::NotFound => {
            info!(path = %path.display(), "no config file, using defaults");
            Config::default()
        }
        Err(error) => {
            return Err(error)
                .with_context(|| format!("failed to read config {}", path.display()));
        }
    };

    for app in &mut config.apps {
        app.icon = app.icon.as_deref().map(expand_home);

        let Some(resolver) = resolver else { continue };
        if app.needs_detection() {
            if let Err(error) = auto_detect(app, resolver) {
                warn!(app = %app.name, "{error:#}");
            }
        }
    }

    config.validate()?;
    Ok(config)
}

fn auto_detect(app: &mut AppConfig, resolver: &IdentityResolver) -> Result<()> {
    info!(app = %app.name, "auto-detecting package/activity");

    let package = match app.package() {
        Some(package) => package.to_owned(),
        None => {
            let package = resolver
                .resolve_package(&app.name)
                .with_context(|| format!("could not auto-detect package for '{}'", app.name))?;
            info!(app = %app.name, package, "found package");
            app.package = Some(package.clone());
            package
        }
    };

    if app.activity().is_none() {
        let activity = resolver.resolve_entry_point(&package).with_context(|| {
            format!(
                "could not auto-detect activity for '{}' ({package})",
                app.name
            )
        })?;
        info!(app = %app.name, activity, "found activity");
        app.activity = Some(activity);
    }
    Ok(())
}
