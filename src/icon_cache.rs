//! Disk-backed caches under the config root:
//!
//! - `icons/<package>.png`: decoded icons, no expiry.
//! - `icon-paths/<package>.txt`: resource-path hints, expiring
//!   `HINT_TTL` after the file's modification time.
//!
//! Reads never fail: missing, expired or corrupt entries are misses.

use std::fs;
use std::io::{self, Cursor, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use image::RgbaImage;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

pub const ICONS_DIR: &str = "icons";
pub const ICON_PATHS_DIR: &str = "icon-paths";
pub const HINT_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct IconCache {
    root: PathBuf,
}

impl IconCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn icon_path(&self, package: &str) -> PathBuf {
        self.root.join(ICONS_DIR).join(format!("{package}.png"))
    }

    pub fn hint_path(&self, package: &str) -> PathBuf {
        self.root.join(ICON_PATHS_DIR).join(format!("{package}.txt"))
    }

    pub fn load_icon(&self, package: &str) -> Option<RgbaImage> {
        let path = self.icon_path(package);
        if !path.is_file() {
            return None;
        }
        match image::open(&path) {
            Ok(decoded) => Some(decoded.into_rgba8()),
            Err(error) => {
                warn!(package, path = %path.display(), %error, "discarding unreadable cached icon");
                None
            }
        }
    }

    pub fn store_icon(&self, package: &str, icon: &RgbaImage) -> io::Result<PathBuf> {
        let path = self.icon_path(package);
        let mut png = Cursor::new(Vec::new());
        icon.write_to(&mut png, image::ImageFormat::Png)
            .map_err(|error| io::Error::other(error.to_string()))?;
        write_atomic(&path, png.get_ref())?;
        debug!(package, path = %path.display(), "stored decoded icon");
        Ok(path)
    }

    pub fn load_hint(&self, package: &str) -> Option<String> {
        self.load_hint_at(package, SystemTime::now())
    }

    /// Hint lookup against an explicit clock.
    pub fn load_hint_at(&self, package: &str, now: SystemTime) -> Option<String> {
        let path = self.hint_path(package);
        let modified = fs::metadata(&path).and_then(|meta| meta.modified()).ok()?;
        let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
        if age > HINT_TTL {
            debug!(package, age_secs = age.as_secs(), "resource path hint expired");
            return None;
        }

        let hint = fs::read_to_string(&path).ok()?;
        let hint = hint.trim();
        (!hint.is_empty()).then(|| hint.to_owned())
    }

    pub fn store_hint(&self, package: &str, resource_path: &str) -> io::Result<()> {
        write_atomic(&self.hint_path(package), resource_path.trim().as_bytes())
    }

    /// Removes both disk tiers.
    pub fn clear(&self) -> io::Result<()> {
        for dir in [ICONS_DIR, ICON_PATHS_DIR] {
            let path = self.root.join(dir);
            match fs::remove_dir_all(&path) {
                Ok(()) => {}
                Err(error) if error.kind() == io::ErrorKind::NotFound => {}
                Err(error) => return Err(error),
            }
        }
        Ok(())
    }
}

/// Stages `bytes` in a uniquely named file beside `path` and renames it into
/// place, so concurrent writers never expose a partial file.
fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    let mut staging = NamedTempFile::new_in(dir)?;
    staging.write_all(bytes)?;
    staging.persist(path).map_err(|error| error.error)?;
    Ok(())
}
