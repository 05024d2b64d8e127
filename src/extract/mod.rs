//! Package icon extraction.
//!
//! For each archive a package ships, an ordered list of strategies is tried
//! until one yields a decodable raster. The first success is persisted to the
//! decoded-icon cache so later runs never reopen an archive.

mod archive;
mod resource_paths;
mod strategies;

use std::path::PathBuf;
use std::sync::Arc;

use image::RgbaImage;
use tracing::{debug, info, warn};

pub use archive::ArchiveIndex;
pub use resource_paths::{density_dpi, parse_badging_icon, parse_dump_icon, raster_sibling};
pub use strategies::{
    default_strategies, ArchiveToolQuery, ConventionLookup, ExtractionContext, IconStrategy,
    IntrospectionQuery, LargestAsset, StrategyKind,
};

use crate::error_codes::IconError;
use crate::icon_cache::IconCache;
use crate::system::{parse_package_lines, PackageShell};

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedIcon {
    pub image: RgbaImage,
    /// Archive entry (or cache file) the image came from.
    pub source_path: String,
    pub strategy: StrategyKind,
}

pub struct IconExtractor {
    shell: Arc<dyn PackageShell>,
    cache: IconCache,
    strategies: Vec<Box<dyn IconStrategy>>,
}

impl IconExtractor {
    pub fn new(shell: Arc<dyn PackageShell>, cache: IconCache) -> Self {
        Self::with_strategies(shell, cache, default_strategies())
    }

    pub fn with_strategies(
        shell: Arc<dyn PackageShell>,
        cache: IconCache,
        strategies: Vec<Box<dyn IconStrategy>>,
    ) -> Self {
        Self {
            shell,
            cache,
            strategies,
        }
    }

    pub fn cache(&self) -> &IconCache {
        &self.cache
    }

    pub fn extract(&self, package: &str) -> Result<ExtractedIcon, IconError> {
        let package = package.trim();
        if package.is_empty() {
            return Err(IconError::not_found("empty package identifier"));
        }

        if let Some(image) = self.cache.load_icon(package) {
            debug!(package, "decoded icon cache hit");
            return Ok(ExtractedIcon {
                image,
                source_path: self.cache.icon_path(package).display().to_string(),
                strategy: StrategyKind::DiskCache,
            });
        }

        let archives: Vec<PathBuf> = parse_package_lines(&self.shell.package_paths(package)?)
            .into_iter()
            .map(PathBuf::from)
            .collect();
        if archives.is_empty() {
            return Err(IconError::not_found(format!("no archives for {package}")));
        }

        for path in &archives {
            let mut archive = match ArchiveIndex::open(path) {
                Ok(archive) => archive,
                Err(error) => {
                    debug!(
                        package,
                        archive = %path.display(),
                        %error,
                        "skipping unreadable archive"
                    );
                    continue;
                }
            };

            let mut ctx = ExtractionContext {
                package,
                archive: &mut archive,
                shell: self.shell.as_ref(),
                cache: &self.cache,
            };
            for strategy in &self.strategies {
                match strategy.attempt(&mut ctx) {
                    Ok(found) => {
                        info!(
                            package,
                            strategy = %found.strategy,
                            entry = %found.source_path,
                            "extracted icon"
                        );
                        if let Err(error) = self.cache.store_icon(package, &found.image) {
                            warn!(package, %error, "could not persist decoded icon");
                        }
                        return Ok(found);
                    }
                    Err(error) => {
                        debug!(package, strategy = %strategy.kind(), %error, "strategy missed");
                    }
                }
            }
        }

        Err(IconError::not_found(format!(
            "no icon could be extracted for {package}"
        )))
    }
}
