//! Where each app's icon comes from, and the parallel loader that turns a
//! list of apps into a list of rasters.
//!
//! Precedence per app: the configured icon (catalog, URL or local file),
//! then package extraction, then a white placeholder.

use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use image::RgbaImage;
use reqwest::blocking::Client;
use tracing::{debug, warn};
use url::Url;

use crate::config::AppConfig;
use crate::error_codes::IconError;
use crate::extract::IconExtractor;
use crate::normalize::placeholder;

pub const CATALOG_PREFIX: &str = "dashboard:";
pub const CATALOG_URL_TEMPLATE: &str =
    "https://cdn.jsdelivr.net/gh/homarr-labs/dashboard-icons/png/{name}.png";
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(10);
pub const PLACEHOLDER_SIZE: u32 = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IconSource {
    /// Named entry in the public dashboard icon catalog.
    Catalog(String),
    Remote(Url),
    Local(PathBuf),
}

impl IconSource {
    pub fn parse(raw: &str) -> Result<Self, IconError> {
        let raw = raw.trim();
        if let Some(name) = raw.strip_prefix(CATALOG_PREFIX) {
            let name = name.trim();
            if name.is_empty() {
                return Err(IconError::not_found("catalog icon name is empty"));
            }
            return Ok(Self::Catalog(name.to_owned()));
        }
        if raw.starts_with("http://") || raw.starts_with("https://") {
            let url = Url::parse(raw).map_err(|error| {
                IconError::not_found(format!("invalid icon url '{raw}': {error}"))
            })?;
            return Ok(Self::Remote(url));
        }
        Ok(Self::Local(PathBuf::from(raw)))
    }

    /// Address a remote source is fetched from.
    pub fn url(&self) -> Option<Url> {
        match self {
            Self::Catalog(name) => Url::parse(&CATALOG_URL_TEMPLATE.replace("{name}", name)).ok(),
            Self::Remote(url) => Some(url.clone()),
            Self::Local(_) => None,
        }
    }
}

pub struct IconLoader {
    http: Client,
    extractor: IconExtractor,
}

impl IconLoader {
    pub fn new(extractor: IconExtractor) -> Result<Self> {
        let http = Client::builder()
            .timeout(FETCH_TIMEOUT)
            .user_agent(concat!("tooie-shelf/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build http client")?;
        Ok(Self { http, extractor })
    }

    pub fn extractor(&self) -> &IconExtractor {
        &self.extractor
    }

    pub fn load_source(&self, source: &IconSource) -> Result<RgbaImage, IconError> {
        match source {
            IconSource::Local(path) => {
                let decoded = image::open(path).map_err(|error| match error {
                    image::ImageError::IoError(io) => IconError::Io(io),
                    other => IconError::from(other),
                })?;
                Ok(decoded.into_rgba8())
            }
            remote => {
                let url = remote
                    .url()
                    .ok_or_else(|| IconError::not_found(format!("{remote:?} has no url")))?;
                self.fetch(&url)
            }
        }
    }

    fn fetch(&self, url: &Url) -> Result<RgbaImage, IconError> {
        debug!(%url, "fetching icon");
        let response = self
            .http
            .get(url.clone())
            .send()
            .and_then(|response| response.error_for_status())
            .map_err(|error| http_error(url, error))?;
        let bytes = response.bytes().map_err(|error| http_error(url, error))?;
        Ok(image::load_from_memory(&bytes)?.into_rgba8())
    }

    /// Never fails: every miss degrades to the next source, ending at the
    /// placeholder.
    pub fn load_single_icon(&self, app: &AppConfig) -> RgbaImage {
        if let Some(raw) = app.icon() {
            match IconSource::parse(raw).and_then(|source| self.load_source(&source)) {
                Ok(image) => return image,
                Err(error) => warn!(app = %app.name, icon = raw, %error, "failed to load icon"),
            }
        }

        if let Some(package) = app.package() {
            match self.extractor.extract(package) {
                Ok(found) => return found.image,
                Err(error) => warn!(app = %app.name, package, %error, "failed to extract icon"),
            }
        }

        placeholder(PLACEHOLDER_SIZE)
    }

    /// One worker per app; the result is index-aligned with `apps`.
    pub fn load_icons(&self, apps: &[AppConfig]) -> Vec<RgbaImage> {
        let mut icons: Vec<Option<RgbaImage>> = vec![None; apps.len()];
        let (sender, receiver) = mpsc::channel();

        thread::scope(|scope| {
            for (index, app) in apps.iter().enumerate() {
                let sender = sender.clone();
                scope.spawn(move || {
                    let _ = sender.send((index, self.load_single_icon(app)));
                });
            }
            drop(sender);

            for (index, icon) in receiver {
                icons[index] = Some(icon);
            }
        });

        icons
            .into_iter()
            .map(|icon| icon.unwrap_or_else(|| placeholder(PLACEHOLDER_SIZE)))
            .collect()
    }
}

fn http_error(url: &Url, error: reqwest::Error) -> IconError {
    if error.is_timeout() {
        IconError::Timeout(format!("{url} after {}s", FETCH_TIMEOUT.as_secs()))
    } else {
        IconError::tool("http", format!("{url}: {error}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_catalog_references() {
        let source = IconSource::parse("dashboard:home-assistant").expect("catalog should parse");
        assert_eq!(source, IconSource::Catalog("home-assistant".into()));
        assert_eq!(
            source.url().expect("catalog should have a url").as_str(),
            "https://cdn.jsdelivr.net/gh/homarr-labs/dashboard-icons/png/home-assistant.png"
        );
        assert!(IconSource::parse("dashboard:").is_err());
    }

    #[test]
    fn parses_urls_and_local_paths() {
        assert!(matches!(
            IconSource::parse("https://example.com/a.png"),
            Ok(IconSource::Remote(_))
        ));
        assert!(IconSource::parse("https://").is_err());
        assert_eq!(
            IconSource::parse("/data/icons/a.png").expect("path should parse"),
            IconSource::Local(PathBuf::from("/data/icons/a.png"))
        );
        assert_eq!(IconSource::Local(PathBuf::from("a.png")).url(), None);
    }
}
