use std::fmt;

use tracing::{debug, warn};

use super::archive::ArchiveIndex;
use super::resource_paths::{parse_badging_icon, parse_dump_icon, raster_sibling};
use super::ExtractedIcon;
use crate::error_codes::IconError;
use crate::icon_cache::IconCache;
use crate::system::PackageShell;

const MIPMAP_DENSITIES: &[&str] = &["xxxhdpi", "xxhdpi", "xhdpi", "hdpi", "mdpi"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    DiskCache,
    MipmapConvention,
    Introspection,
    ArchiveTool,
    DrawableConvention,
    LargestAsset,
}

impl StrategyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DiskCache => "disk-cache",
            Self::MipmapConvention => "mipmap-convention",
            Self::Introspection => "introspection",
            Self::ArchiveTool => "archive-tool",
            Self::DrawableConvention => "drawable-convention",
            Self::LargestAsset => "largest-asset",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a strategy may consult for one archive of one package.
pub struct ExtractionContext<'a> {
    pub package: &'a str,
    pub archive: &'a mut ArchiveIndex,
    pub shell: &'a dyn PackageShell,
    pub cache: &'a IconCache,
}

impl ExtractionContext<'_> {
    /// Decodes `name` if the archive has it; decode failures are logged
    /// and reported as misses so the caller can keep looking.
    fn try_entry(&mut self, name: &str, kind: StrategyKind) -> Option<ExtractedIcon> {
        if !self.archive.contains(name) {
            return None;
        }
        match self.archive.decode(name) {
            Ok(image) => Some(ExtractedIcon {
                image,
                source_path: name.to_owned(),
                strategy: kind,
            }),
            Err(error) => {
                debug!(
                    package = self.package,
                    entry = name,
                    %error,
                    "archive entry did not decode"
                );
                None
            }
        }
    }

    fn first_of(
        &mut self,
        candidates: impl IntoIterator<Item = String>,
        kind: StrategyKind,
    ) -> Result<ExtractedIcon, IconError> {
        for name in candidates {
            if let Some(found) = self.try_entry(&name, kind) {
                return Ok(found);
            }
        }
        Err(IconError::not_found(format!(
            "{kind} found nothing in {}",
            self.archive.path().display()
        )))
    }
}

pub trait IconStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    fn attempt(&self, ctx: &mut ExtractionContext<'_>) -> Result<ExtractedIcon, IconError>;
}

/// Conventional resource directories, looked up by exact name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConventionLookup {
    Mipmap,
    Drawable,
}

impl ConventionLookup {
    /// Candidate entry names in lookup order: basename, then format, then
    /// density (`-v4` before plain), ending with the bare directory.
    pub fn candidates(self) -> Vec<String> {
        let (dir, basenames, formats): (&str, &[&str], &[&str]) = match self {
            Self::Mipmap => ("mipmap", &["ic_launcher", "app_icon"], &["webp", "png"]),
            Self::Drawable => ("drawable", &["ic_launcher"], &["png", "webp"]),
        };

        let mut names = Vec::new();
        for basename in basenames {
            for format in formats {
                for density in MIPMAP_DENSITIES {
                    names.push(format!("res/{dir}-{density}-v4/{basename}.{format}"));
                    names.push(format!("res/{dir}-{density}/{basename}.{format}"));
                }
                names.push(format!("res/{dir}/{basename}.{format}"));
            }
        }
        names
    }
}

impl IconStrategy for ConventionLookup {
    fn kind(&self) -> StrategyKind {
        match self {
            Self::Mipmap => StrategyKind::MipmapConvention,
            Self::Drawable => StrategyKind::DrawableConvention,
        }
    }

    fn attempt(&self, ctx: &mut ExtractionContext<'_>) -> Result<ExtractedIcon, IconError> {
        ctx.first_of(self.candidates(), self.kind())
    }
}

/// Asks the package manager (through the privileged bridge) which resource
/// the package declares as its icon. Results are remembered as hints.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntrospectionQuery;

impl IntrospectionQuery {
    fn resource_path(ctx: &ExtractionContext<'_>) -> Result<String, IconError> {
        if let Some(hint) = ctx.cache.load_hint(ctx.package) {
            debug!(package = ctx.package, hint, "using cached resource path");
            return Ok(hint);
        }

        let dump = ctx.shell.privileged_dump(ctx.package)?;
        let path = parse_dump_icon(&dump)
            .ok_or_else(|| IconError::not_found(format!("no icon= in dump of {}", ctx.package)))?;
        if let Err(error) = ctx.cache.store_hint(ctx.package, &path) {
            warn!(package = ctx.package, %error, "could not persist resource path hint");
        }
        Ok(path)
    }
}

impl IconStrategy for IntrospectionQuery {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Introspection
    }

    fn attempt(&self, ctx: &mut ExtractionContext<'_>) -> Result<ExtractedIcon, IconError> {
        let path = Self::resource_path(ctx)?;
        let mut candidates = vec![path.clone()];
        candidates.extend(raster_sibling(&path));
        ctx.first_of(candidates, self.kind())
    }
}

/// Reads the icon declaration through `aapt2 dump badging`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArchiveToolQuery;

impl IconStrategy for ArchiveToolQuery {
    fn kind(&self) -> StrategyKind {
        StrategyKind::ArchiveTool
    }

    fn attempt(&self, ctx: &mut ExtractionContext<'_>) -> Result<ExtractedIcon, IconError> {
        let badging = ctx.shell.badging(ctx.archive.path())?;
        let path = parse_badging_icon(&badging).ok_or_else(|| {
            IconError::not_found(format!(
                "no icon in badging of {}",
                ctx.archive.path().display()
            ))
        })?;
        ctx.first_of([path], self.kind())
    }
}

/// Last resort: the biggest raster under a matching directory.
#[derive(Debug, Clone)]
pub struct LargestAsset {
    marker: String,
}

impl LargestAsset {
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
        }
    }
}

impl Default for LargestAsset {
    fn default() -> Self {
        Self::new("mipmap")
    }
}

impl IconStrategy for LargestAsset {
    fn kind(&self) -> StrategyKind {
        StrategyKind::LargestAsset
    }

    fn attempt(&self, ctx: &mut ExtractionContext<'_>) -> Result<ExtractedIcon, IconError> {
        if ctx.archive.is_split() {
            return Err(IconError::not_found("split archives are not scanned"));
        }
        let name = ctx
            .archive
            .largest_image(&self.marker)
            .map(str::to_owned)
            .ok_or_else(|| IconError::not_found(format!("no {} raster", self.marker)))?;
        ctx.first_of([name], self.kind())
    }
}

/// Production order.
pub fn default_strategies() -> Vec<Box<dyn IconStrategy>> {
    vec![
        Box::new(ConventionLookup::Mipmap),
        Box::new(IntrospectionQuery),
        Box::new(ArchiveToolQuery),
        Box::new(ConventionLookup::Drawable),
        Box::new(LargestAsset::default()),
    ]
}
