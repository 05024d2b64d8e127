//! Random-access view over one package archive.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use image::RgbaImage;
use zip::ZipArchive;

use crate::error_codes::IconError;

const SPLIT_MARKER: &str = "split_config.";

#[derive(Debug, Clone)]
struct EntryMeta {
    index: usize,
    size: u64,
}

pub struct ArchiveIndex {
    path: PathBuf,
    archive: ZipArchive<BufReader<File>>,
    names: Vec<String>,
    entries: HashMap<String, EntryMeta>,
}

impl ArchiveIndex {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, IconError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let mut archive = ZipArchive::new(BufReader::new(file))
            .map_err(|error| IconError::DecodeFailure(format!("{}: {error}", path.display())))?;

        let mut names = Vec::with_capacity(archive.len());
        let mut entries = HashMap::with_capacity(archive.len());
        for index in 0..archive.len() {
            let entry = archive
                .by_index_raw(index)
                .map_err(|error| IconError::DecodeFailure(error.to_string()))?;
            if entry.is_dir() {
                continue;
            }
            let name = entry.name().to_owned();
            entries.insert(
                name.clone(),
                EntryMeta {
                    index,
                    size: entry.size(),
                },
            );
            names.push(name);
        }

        Ok(Self {
            path,
            archive,
            names,
            entries,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Split archives carry configuration resources only.
    pub fn is_split(&self) -> bool {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().contains(SPLIT_MARKER))
            .unwrap_or(false)
    }

    /// Decodes one entry by exact name.
    pub fn decode(&mut self, name: &str) -> Result<RgbaImage, IconError> {
        let meta = self
            .entries
            .get(name)
            .ok_or_else(|| IconError::not_found(format!("{name} not in archive")))?;
        let mut entry = self
            .archive
            .by_index(meta.index)
            .map_err(|error| IconError::DecodeFailure(format!("{name}: {error}")))?;

        let mut bytes = Vec::with_capacity(usize::try_from(meta.size).unwrap_or(0));
        entry.read_to_end(&mut bytes)?;
        let decoded = image::load_from_memory(&bytes)?;
        Ok(decoded.into_rgba8())
    }

    /// Largest raster entry by uncompressed size whose path contains `marker`.
    /// Ties keep archive order.
    pub fn largest_image(&self, marker: &str) -> Option<&str> {
        let mut best: Option<(&str, u64)> = None;
        for name in &self.names {
            let is_raster = name.ends_with(".png") || name.ends_with(".webp");
            if !is_raster || !name.contains(marker) {
                continue;
            }
            let size = self.entries[name].size;
            if best.map_or(true, |(_, best_size)| size > best_size) {
                best = Some((name, size));
            }
        }
        best.map(|(name, _)| name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    use image::Rgba;
    use tempfile::tempdir;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    fn png_bytes(size: u32) -> Vec<u8> {
        let mut bytes = Cursor::new(Vec::new());
        RgbaImage::from_pixel(size, size, Rgba([9, 8, 7, 255]))
            .write_to(&mut bytes, image::ImageFormat::Png)
            .expect("png should encode");
        bytes.into_inner()
    }

    fn write_archive(path: &Path, entries: &[(&str, Vec<u8>)]) {
        let file = File::create(path).expect("archive should create");
        let mut writer = ZipWriter::new(file);
        for (name, bytes) in entries {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .expect("entry should start");
            writer.write_all(bytes).expect("entry should write");
        }
        writer.finish().expect("archive should finish");
    }

    #[test]
    fn indexes_and_decodes_entries() {
        let dir = tempdir().expect("tempdir should create");
        let path = dir.path().join("base.apk");
        write_archive(
            &path,
            &[
                ("AndroidManifest.xml", b"<manifest/>".to_vec()),
                ("res/mipmap-hdpi-v4/ic_launcher.png", png_bytes(4)),
            ],
        );

        let mut archive = ArchiveIndex::open(&path).expect("archive should open");
        assert!(archive.contains("res/mipmap-hdpi-v4/ic_launcher.png"));
        assert!(!archive.contains("res/mipmap-hdpi/ic_launcher.png"));
        assert!(!archive.is_split());

        let icon = archive
            .decode("res/mipmap-hdpi-v4/ic_launcher.png")
            .expect("icon should decode");
        assert_eq!(icon.dimensions(), (4, 4));

        let error = archive
            .decode("AndroidManifest.xml")
            .expect_err("manifest is not an image");
        assert_eq!(error.code(), "DECODE_FAILURE");
    }

    #[test]
    fn largest_image_filters_by_marker_and_size() {
        let dir = tempdir().expect("tempdir should create");
        let path = dir.path().join("split_config.xxhdpi.apk");
        write_archive(
            &path,
            &[
                ("res/drawable/huge.png", png_bytes(64)),
                ("res/mipmap-mdpi/a.png", png_bytes(2)),
                ("res/mipmap-xxhdpi/b.png", png_bytes(48)),
                ("res/mipmap-xxhdpi/c.xml", vec![0; 4096]),
            ],
        );

        let archive = ArchiveIndex::open(&path).expect("archive should open");
        assert!(archive.is_split());
        assert_eq!(archive.largest_image("mipmap"), Some("res/mipmap-xxhdpi/b.png"));
        assert_eq!(archive.largest_image("nothing"), None);
    }

    #[test]
    fn non_zip_file_fails_to_open() {
        let dir = tempdir().expect("tempdir should create");
        let path = dir.path().join("broken.apk");
        std::fs::write(&path, b"not a zip").expect("file should write");
        assert!(ArchiveIndex::open(&path).is_err());
    }
}
