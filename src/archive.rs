//! ZIP packaging of a download directory.

use std::fs::File;
use std::io;
use std::path::{Component, Path};

use walkdir::WalkDir;
use zip::CompressionMethod;
use zip::write::{FileOptions, ZipWriter};

use crate::error::{Error, Result};

/// Writes a directory tree into a single ZIP archive.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArchivePackager;

impl ArchivePackager {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Packs every regular file under `source_dir` into `archive_path`.
    ///
    /// Entry names are paths relative to `source_dir` with `/` separators; no
    /// directory entries are written and symbolic links are skipped, so
    /// nothing outside `source_dir` ends up in the archive. Returns the number
    /// of entries written. A partially written archive is removed on failure.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Packaging`] on any I/O failure.
    pub fn pack(&self, source_dir: &Path, archive_path: &Path) -> Result<usize> {
        let result = write_archive(source_dir, archive_path);
        if result.is_err() {
            remove_partial(archive_path);
        }
        result
    }
}

/// Removes a partially written archive. Returns whether no file is left behind.
fn remove_partial(archive_path: &Path) -> bool {
    match std::fs::remove_file(archive_path) {
        Ok(()) => true,
        Err(e) if e.kind() == io::ErrorKind::NotFound => true,
        Err(e) => {
            log::warn!(
                "Failed to remove partial archive {}: {e}",
                archive_path.display()
            );
            false
        }
    }
}

fn packaging(context: &str, path: &Path, err: impl std::fmt::Display) -> Error {
    Error::Packaging(format!("{context} {}: {err}", path.display()))
}

fn entry_name(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn write_archive(source_dir: &Path, archive_path: &Path) -> Result<usize> {
    let file = File::create(archive_path).map_err(|e| packaging("cannot create", archive_path, e))?;
    let mut zip = ZipWriter::new(file);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut written = 0;

    for entry in WalkDir::new(source_dir).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(|e| packaging("cannot walk", source_dir, e))?;
        if !entry.file_type().is_file() || entry.path() == archive_path {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(source_dir)
            .map_err(|e| packaging("unexpected entry", entry.path(), e))?;
        let name = entry_name(relative);

        zip.start_file(name.as_str(), options)
            .map_err(|e| packaging("cannot add", entry.path(), e))?;
        let mut source =
            File::open(entry.path()).map_err(|e| packaging("cannot read", entry.path(), e))?;
        io::copy(&mut source, &mut zip).map_err(|e| packaging("cannot write", archive_path, e))?;
        written += 1;
    }

    zip.finish()
        .map_err(|e| packaging("cannot finish", archive_path, e))?;
    log::info!("Packed {written} file(s) into {}", archive_path.display());
    Ok(written)
}
