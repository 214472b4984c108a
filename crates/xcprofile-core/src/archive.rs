//! Profile archive packing and unpacking.
//!
//! A `.developerprofile` is a ZIP whose entries all live under `developer/`.
//! The pipeline talks to archives only through [`ProfileArchive`];
//! [`ZipProfileArchive`] is the implementation used by the CLI.

use std::fs::{self, File};
use std::io;
use std::path::Path;

use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::ProfileError;
use crate::fsio;

/// Container format collaborator.
pub trait ProfileArchive {
    /// Extract `archive` into `destination`, mirroring its internal layout.
    ///
    /// # Errors
    ///
    /// [`ProfileError::UnpackFailed`] on any read or extraction failure.
    fn unpack(&self, archive: &Path, destination: &Path) -> Result<(), ProfileError>;

    /// Write the directory `source` (including its own name as the top-level
    /// entry) to `archive`, replacing any existing file.
    ///
    /// # Errors
    ///
    /// [`ProfileError::PackFailed`] on any failure; the previous archive is
    /// left untouched in that case.
    fn pack(&self, source: &Path, archive: &Path) -> Result<(), ProfileError>;
}

/// ZIP compression level, clamped to 0-9. Level 0 stores entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionLevel(u32);

impl CompressionLevel {
    pub const STORED: Self = Self(0);
    pub const DEFAULT: Self = Self(6);
    pub const MAX: Self = Self(9);

    #[must_use]
    pub fn new(level: u32) -> Self {
        Self(level.min(9))
    }

    #[must_use]
    pub const fn level(self) -> u32 {
        self.0
    }

    fn options(self) -> SimpleFileOptions {
        if self.0 == 0 {
            SimpleFileOptions::default().compression_method(CompressionMethod::Stored)
        } else {
            SimpleFileOptions::default()
                .compression_method(CompressionMethod::Deflated)
                .compression_level(Some(i64::from(self.0)))
        }
    }
}

impl Default for CompressionLevel {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// ZIP-backed [`ProfileArchive`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ZipProfileArchive {
    compression: CompressionLevel,
}

impl ZipProfileArchive {
    #[must_use]
    pub const fn new(compression: CompressionLevel) -> Self {
        Self { compression }
    }

    fn extract(archive: &Path, destination: &Path) -> Result<usize, String> {
        let file = File::open(archive).map_err(|e| format!("{}: {e}", archive.display()))?;
        let mut zip = ZipArchive::new(file).map_err(|e| format!("not a zip archive: {e}"))?;
        fs::create_dir_all(destination).map_err(|e| e.to_string())?;

        let mut extracted = 0usize;
        for index in 0..zip.len() {
            let mut entry = zip.by_index(index).map_err(|e| e.to_string())?;
            // Entries with absolute paths or `..` components are dropped.
            let Some(relative) = entry.enclosed_name() else {
                tracing::warn!(entry = entry.name(), "skipping archive entry outside the tree");
                continue;
            };
            let target = destination.join(relative);

            if entry.is_dir() {
                fs::create_dir_all(&target).map_err(|e| e.to_string())?;
                continue;
            }
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| e.to_string())?;
            }
            let mut out = File::create(&target).map_err(|e| e.to_string())?;
            io::copy(&mut entry, &mut out).map_err(|e| e.to_string())?;
            extracted = extracted.saturating_add(1);
        }
        Ok(extracted)
    }

    fn write_zip(&self, source: &Path, output: &Path) -> Result<(), String> {
        let top = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| format!("invalid source directory: {}", source.display()))?;

        let file = File::create(output).map_err(|e| e.to_string())?;
        let mut zip = ZipWriter::new(file);
        let options = self.compression.options();

        for entry in WalkDir::new(source).follow_links(false).sort_by_file_name() {
            let entry = entry.map_err(|e| format!("failed to walk directory: {e}"))?;
            let relative = entry
                .path()
                .strip_prefix(source)
                .map_err(|e| e.to_string())?;
            // Archive paths always use '/' regardless of platform.
            let mut name = top.clone();
            for component in relative.components() {
                name.push('/');
                name.push_str(&component.as_os_str().to_string_lossy());
            }

            if entry.file_type().is_dir() {
                zip.add_directory(format!("{name}/"), options)
                    .map_err(|e| e.to_string())?;
            } else if entry.file_type().is_file() {
                zip.start_file(name, options).map_err(|e| e.to_string())?;
                let mut input = File::open(entry.path()).map_err(|e| e.to_string())?;
                io::copy(&mut input, &mut zip).map_err(|e| e.to_string())?;
            }
        }

        zip.finish().map_err(|e| e.to_string())?;
        Ok(())
    }
}

impl ProfileArchive for ZipProfileArchive {
    fn unpack(&self, archive: &Path, destination: &Path) -> Result<(), ProfileError> {
        let count = Self::extract(archive, destination).map_err(ProfileError::UnpackFailed)?;
        tracing::debug!(
            archive = %archive.display(),
            destination = %destination.display(),
            files = count,
            "unpacked profile archive"
        );
        Ok(())
    }

    fn pack(&self, source: &Path, archive: &Path) -> Result<(), ProfileError> {
        if !source.is_dir() {
            return Err(ProfileError::PackFailed(format!(
                "not a directory: {}",
                source.display()
            )));
        }

        let tmp = fsio::sibling_tmp(archive);
        if let Err(reason) = self.write_zip(source, &tmp) {
            let _ = fs::remove_file(&tmp);
            return Err(ProfileError::PackFailed(reason));
        }
        fs::rename(&tmp, archive).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            ProfileError::PackFailed(format!("failed to replace {}: {e}", archive.display()))
        })?;

        tracing::info!(
            source = %source.display(),
            archive = %archive.display(),
            "packed profile archive"
        );
        Ok(())
    }
}
