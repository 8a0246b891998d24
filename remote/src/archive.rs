//! Zip extraction for downloaded artifacts.
//!
//! Every entry name is validated before anything is written, so an archive
//! containing a single escaping entry leaves the destination untouched.

use crate::error::ErrorClass;
use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};

/// Trait for extracting artifact archives, enabling test mocking.
///
/// # Examples
///
/// ```
/// use juno_remote::archive::ZipExtractor;
///
/// let extractor = ZipExtractor;
/// // Use extractor.extract(archive_path, dest_dir) in production
/// ```
#[cfg_attr(test, mockall::automock)]
pub trait ArchiveExtractor {
    /// Extracts the archive at `archive_path` into `dest_dir`.
    ///
    /// Returns the relative paths of the extracted files in archive order.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::PathTraversal`] if any entry would land
    /// outside `dest_dir`, [`ArchiveError::Zip`] for unreadable archives and
    /// [`ArchiveError::Io`] on I/O failures.
    fn extract(&self, archive_path: &Path, dest_dir: &Path) -> Result<Vec<PathBuf>, ArchiveError>;
}

/// Errors arising from archive extraction.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// I/O error during extraction.
    #[error("extraction I/O error: {0}")]
    Io(#[from] io::Error),

    /// The archive could not be read.
    #[error("invalid zip archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// An entry attempts to escape the destination.
    #[error("path traversal detected: {entry}")]
    PathTraversal {
        /// The offending entry name.
        entry: String,
    },
}

impl ArchiveError {
    /// Classifies the failure.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::PathTraversal { .. } | Self::Zip(_) => ErrorClass::Integrity,
            Self::Io(_) => ErrorClass::Fatal,
        }
    }
}

/// Extractor for zip archives using the `zip` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZipExtractor;

impl ArchiveExtractor for ZipExtractor {
    fn extract(&self, archive_path: &Path, dest_dir: &Path) -> Result<Vec<PathBuf>, ArchiveError> {
        let mut archive = zip::ZipArchive::new(File::open(archive_path)?)?;

        let mut entries = Vec::with_capacity(archive.len());
        for index in 0..archive.len() {
            let entry = archive.by_index(index)?;
            let relative = validate_entry_path(entry.name())?;
            if entry.enclosed_name().is_none() {
                return Err(ArchiveError::PathTraversal {
                    entry: entry.name().to_owned(),
                });
            }
            entries.push((index, relative, entry.is_dir()));
        }

        fs::create_dir_all(dest_dir)?;
        let mut extracted = Vec::new();
        for (index, relative, is_dir) in entries {
            let target = dest_dir.join(&relative);
            if is_dir {
                fs::create_dir_all(&target)?;
                continue;
            }
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut entry = archive.by_index(index)?;
            let mut output = File::create(&target)?;
            io::copy(&mut entry, &mut output)?;
            extracted.push(relative);
        }
        Ok(extracted)
    }
}

/// Validates that an entry name stays inside the destination directory.
fn validate_entry_path(name: &str) -> Result<PathBuf, ArchiveError> {
    let traversal = || ArchiveError::PathTraversal {
        entry: name.to_owned(),
    };
    let path = Path::new(name);
    if path.is_absolute() || name.starts_with('/') || name.starts_with('\\') {
        return Err(traversal());
    }

    let mut relative = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(traversal());
            }
        }
    }
    if relative.as_os_str().is_empty() {
        return Err(traversal());
    }
    Ok(relative)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::write_zip;
    use rstest::rstest;

    #[test]
    fn extracts_entries_in_archive_order() {
        let temp = tempfile::tempdir().expect("temp dir");
        let archive = temp.path().join("fw.zip");
        write_zip(
            &archive,
            &[
                ("build/", ""),
                ("build/app.bin", "app"),
                ("README.txt", "notes"),
            ],
        );
        let dest = temp.path().join("out");

        let files = ZipExtractor.extract(&archive, &dest).expect("extract");

        assert_eq!(
            files,
            vec![PathBuf::from("build/app.bin"), PathBuf::from("README.txt")]
        );
        assert_eq!(fs::read(dest.join("build/app.bin")).expect("read"), b"app");
    }

    #[test]
    fn traversal_entry_writes_nothing() {
        let temp = tempfile::tempdir().expect("temp dir");
        let archive = temp.path().join("evil.zip");
        write_zip(
            &archive,
            &[("ok.bin", "fine"), ("../escape.bin", "evil")],
        );
        let dest = temp.path().join("out");

        let err = ZipExtractor
            .extract(&archive, &dest)
            .expect_err("traversal rejected");

        assert!(matches!(err, ArchiveError::PathTraversal { .. }));
        assert_eq!(err.class(), ErrorClass::Integrity);
        assert!(!dest.exists());
        assert!(!temp.path().join("escape.bin").exists());
    }

    #[test]
    fn garbage_is_not_an_archive() {
        let temp = tempfile::tempdir().expect("temp dir");
        let archive = temp.path().join("junk.zip");
        fs::write(&archive, b"not a zip").expect("write junk");

        let err = ZipExtractor
            .extract(&archive, &temp.path().join("out"))
            .expect_err("invalid archive");

        assert!(matches!(err, ArchiveError::Zip(_)));
    }

    #[rstest]
    #[case::parent_dir("../escape.bin")]
    #[case::nested_parent("fw/../../escape.bin")]
    #[case::absolute("/etc/passwd")]
    #[case::backslash_root("\\windows\\system32")]
    #[case::empty("./")]
    fn rejects_escaping_names(#[case] name: &str) {
        assert!(matches!(
            validate_entry_path(name),
            Err(ArchiveError::PathTraversal { .. })
        ));
    }

    #[rstest]
    #[case::plain("firmware.bin", "firmware.bin")]
    #[case::nested("build/esp32/firmware.bin", "build/esp32/firmware.bin")]
    #[case::current_dir("./firmware.bin", "firmware.bin")]
    fn accepts_relative_names(#[case] name: &str, #[case] expected: &str) {
        assert_eq!(
            validate_entry_path(name).expect("valid name"),
            PathBuf::from(expected)
        );
    }
}
