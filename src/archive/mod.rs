// src/archive/mod.rs

//! Package archive extraction
//!
//! Package archives are compressed tarballs rooted at the package's install
//! root. Extraction streams through a format-detected decoder and refuses
//! any entry whose normalized path would escape the destination directory.

use crate::compression::{create_decoder, CompressionFormat};
use crate::path::sanitize_path;
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Archive extraction errors
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("cannot open archive: {0}")]
    OpenFile(String),

    #[error("cannot read archive header: {0}")]
    ReadHeader(String),

    #[error("invalid entry header: {0}")]
    ExtractHeader(String),

    #[error("cannot extract entry data: {0}")]
    ExtractData(String),

    #[error("unsupported archive format")]
    UnsupportedFormat,

    #[error("internal archive error: {0}")]
    InternalError(String),
}

/// Normalize an entry path from an archive
///
/// Returns `Ok(None)` for entries that normalize to nothing (the archive's
/// own root, `./`), and an error for traversal attempts.
fn normalized_entry_path(raw: &Path) -> Result<Option<PathBuf>, ArchiveError> {
    match sanitize_path(raw) {
        Ok(p) => Ok(Some(p)),
        Err(crate::Error::InvalidPath(_)) => Ok(None),
        Err(_) => Err(ArchiveError::ExtractHeader(format!(
            "entry '{}' escapes the destination",
            raw.display()
        ))),
    }
}

/// Open an archive and wrap it in the right decompressor
fn open_archive(archive_path: &Path) -> Result<tar::Archive<Box<dyn Read>>, ArchiveError> {
    let mut file =
        File::open(archive_path).map_err(|e| ArchiveError::OpenFile(e.to_string()))?;

    let mut magic = [0u8; 6];
    let n = file
        .read(&mut magic)
        .map_err(|e| ArchiveError::ReadHeader(e.to_string()))?;
    file.seek(SeekFrom::Start(0))
        .map_err(|e| ArchiveError::ReadHeader(e.to_string()))?;

    let format = CompressionFormat::from_magic_bytes(&magic[..n]);
    if format == CompressionFormat::None {
        return Err(ArchiveError::UnsupportedFormat);
    }

    let decoder: Box<dyn Read> = create_decoder(file, format)
        .map_err(|e| ArchiveError::ReadHeader(e.to_string()))?;
    Ok(tar::Archive::new(decoder))
}

/// Extract an archive into `destination`
///
/// Creates the destination, unpacks every entry under it, and returns the
/// relative paths of the regular files that were written. Directories and
/// symlinks are extracted but not enumerated in the returned manifest.
pub fn extract(
    archive_path: &Path,
    destination: &Path,
) -> Result<Vec<PathBuf>, ArchiveError> {
    fs::create_dir_all(destination)
        .map_err(|e| ArchiveError::InternalError(e.to_string()))?;

    let mut archive = open_archive(archive_path)?;
    let mut manifest = Vec::new();

    let entries = archive
        .entries()
        .map_err(|e| ArchiveError::ReadHeader(e.to_string()))?;

    for entry in entries {
        let mut entry = entry.map_err(|e| ArchiveError::ReadHeader(e.to_string()))?;

        let raw_path = entry
            .path()
            .map_err(|e| ArchiveError::ExtractHeader(e.to_string()))?
            .into_owned();

        let Some(relative) = normalized_entry_path(&raw_path)? else {
            continue;
        };

        let target = destination.join(&relative);
        debug_assert!(target.starts_with(destination));

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| ArchiveError::ExtractData(e.to_string()))?;
        }

        let is_file = entry.header().entry_type().is_file();
        entry.unpack(&target).map_err(|e| {
            ArchiveError::ExtractData(format!("{}: {}", relative.display(), e))
        })?;

        if is_file {
            manifest.push(relative);
        }
    }

    debug!(
        "extracted {} files from {}",
        manifest.len(),
        archive_path.display()
    );
    Ok(manifest)
}

/// Extract a single named entry into memory
///
/// Fails if the entry is absent from the archive.
pub fn extract_single(archive_path: &Path, name: &Path) -> Result<Vec<u8>, ArchiveError> {
    let wanted = normalized_entry_path(name)?.ok_or_else(|| {
        ArchiveError::ExtractHeader(format!("invalid entry name '{}'", name.display()))
    })?;

    let mut archive = open_archive(archive_path)?;
    let entries = archive
        .entries()
        .map_err(|e| ArchiveError::ReadHeader(e.to_string()))?;

    for entry in entries {
        let mut entry = entry.map_err(|e| ArchiveError::ReadHeader(e.to_string()))?;

        let raw_path = entry
            .path()
            .map_err(|e| ArchiveError::ExtractHeader(e.to_string()))?
            .into_owned();

        if normalized_entry_path(&raw_path)?.as_deref() == Some(wanted.as_path()) {
            let mut content = Vec::new();
            entry
                .read_to_end(&mut content)
                .map_err(|e| ArchiveError::ExtractData(e.to_string()))?;
            return Ok(content);
        }
    }

    Err(ArchiveError::ReadHeader(format!(
        "no entry named '{}' in archive",
        wanted.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tempfile::TempDir;

    fn build_test_archive(dir: &Path, entries: &[(&str, &[u8])]) -> PathBuf {
        let archive_path = dir.join("test.au");
        let file = File::create(&archive_path).unwrap();
        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = tar::Builder::new(encoder);

        for (path, content) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, path, *content).unwrap();
        }

        builder.into_inner().unwrap().finish().unwrap();
        archive_path
    }

    #[test]
    fn test_extract_regular_files() {
        let tmp = TempDir::new().unwrap();
        let archive = build_test_archive(
            tmp.path(),
            &[
                ("usr/bin/hello", b"#!/bin/sh\necho hi\n"),
                ("etc/hello.conf", b"key = value\n"),
            ],
        );

        let dest = tmp.path().join("out");
        let mut manifest = extract(&archive, &dest).unwrap();
        manifest.sort();

        assert_eq!(
            manifest,
            vec![
                PathBuf::from("etc/hello.conf"),
                PathBuf::from("usr/bin/hello")
            ]
        );
        assert_eq!(
            fs::read(dest.join("etc/hello.conf")).unwrap(),
            b"key = value\n"
        );
    }

    #[test]
    fn test_extract_strips_dot_prefix() {
        let tmp = TempDir::new().unwrap();
        let archive = build_test_archive(tmp.path(), &[("./usr/share/doc", b"doc\n")]);

        let dest = tmp.path().join("out");
        let manifest = extract(&archive, &dest).unwrap();
        assert_eq!(manifest, vec![PathBuf::from("usr/share/doc")]);
    }

    #[test]
    fn test_extract_single() {
        let tmp = TempDir::new().unwrap();
        let archive = build_test_archive(
            tmp.path(),
            &[(".AURORA_META", b"name: hello\n"), ("usr/bin/hello", b"x")],
        );

        let content = extract_single(&archive, Path::new(".AURORA_META")).unwrap();
        assert_eq!(content, b"name: hello\n");
    }

    #[test]
    fn test_extract_single_missing_entry() {
        let tmp = TempDir::new().unwrap();
        let archive = build_test_archive(tmp.path(), &[("usr/bin/hello", b"x")]);

        let result = extract_single(&archive, Path::new(".AURORA_META"));
        assert!(matches!(result, Err(ArchiveError::ReadHeader(_))));
    }

    #[test]
    fn test_traversal_entry_rejected() {
        assert!(normalized_entry_path(Path::new("../evil")).is_err());
        assert!(normalized_entry_path(Path::new("usr/../../evil")).is_err());
        assert_eq!(
            normalized_entry_path(Path::new("./")).unwrap(),
            None
        );
        assert_eq!(
            normalized_entry_path(Path::new("/usr/bin/x")).unwrap(),
            Some(PathBuf::from("usr/bin/x"))
        );
    }

    #[test]
    fn test_symlinks_extracted_but_not_in_manifest() {
        let tmp = TempDir::new().unwrap();
        let archive_path = tmp.path().join("links.au");
        let file = File::create(&archive_path).unwrap();
        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = tar::Builder::new(encoder);

        let mut header = tar::Header::new_gnu();
        header.set_size(2);
        header.set_mode(0o755);
        header.set_cksum();
        builder
            .append_data(&mut header, "usr/bin/hello", &b"hi"[..])
            .unwrap();

        let mut link = tar::Header::new_gnu();
        link.set_entry_type(tar::EntryType::Symlink);
        link.set_size(0);
        builder
            .append_link(&mut link, "usr/bin/alias", "hello")
            .unwrap();

        builder.into_inner().unwrap().finish().unwrap();

        let dest = tmp.path().join("out");
        let manifest = extract(&archive_path, &dest).unwrap();

        // The symlink exists on disk but only regular files are enumerated
        assert_eq!(manifest, vec![PathBuf::from("usr/bin/hello")]);
        let link_path = dest.join("usr/bin/alias");
        assert!(link_path.symlink_metadata().unwrap().file_type().is_symlink());
    }

    #[test]
    fn test_uncompressed_data_rejected() {
        let tmp = TempDir::new().unwrap();
        let bogus = tmp.path().join("bogus.au");
        fs::write(&bogus, b"this is not an archive at all").unwrap();

        let result = extract(&bogus, &tmp.path().join("out"));
        assert!(matches!(result, Err(ArchiveError::UnsupportedFormat)));
    }

    #[test]
    fn test_missing_archive() {
        let tmp = TempDir::new().unwrap();
        let result = extract(&tmp.path().join("nope.au"), &tmp.path().join("out"));
        assert!(matches!(result, Err(ArchiveError::OpenFile(_))));
    }
}
