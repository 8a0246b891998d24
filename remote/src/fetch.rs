//! Artifact download and firmware binary selection.
//!
//! The fetcher downloads an artifact's zip through [`ResumableTransfer`],
//! checks its digest when the CI provider supplied one, extracts it, and
//! copies the firmware binary to a fixed location.

use crate::archive::{ArchiveError, ArchiveExtractor};
use crate::ci::ArtifactDescriptor;
use crate::error::ErrorClass;
use crate::transfer::{ResumableTransfer, TransferError, TransferRequest};
use log::{debug, info, warn};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

/// File name of the selected firmware binary inside the output directory.
pub const CANONICAL_BINARY: &str = "firmware.bin";

/// Errors raised while fetching an artifact.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Downloading the archive failed.
    #[error("failed to download artifact {name}: {source}")]
    Transfer {
        /// Artifact name.
        name: String,
        /// Underlying transfer error.
        #[source]
        source: TransferError,
    },

    /// Extracting the archive failed.
    #[error("failed to extract artifact {name}: {source}")]
    Archive {
        /// Artifact name.
        name: String,
        /// Underlying extraction error.
        #[source]
        source: ArchiveError,
    },

    /// The archive holds no file with the binary extension.
    #[error("no matching entry in archive {name} (looking for *{extension})")]
    NoMatchingEntry {
        /// Artifact name.
        name: String,
        /// Extension searched for.
        extension: String,
    },

    /// The archive digest differs from the one the CI provider reported.
    #[error("digest mismatch for {name}: expected {expected}, got {actual}")]
    DigestMismatch {
        /// Artifact name.
        name: String,
        /// Digest reported by the provider.
        expected: String,
        /// Digest of the downloaded archive.
        actual: String,
    },

    /// A local file operation failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
}

impl FetchError {
    /// Classifies the failure.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Transfer { source, .. } => source.class(),
            Self::Archive { source, .. } => source.class(),
            Self::NoMatchingEntry { .. } => ErrorClass::NotFound,
            Self::DigestMismatch { .. } => ErrorClass::Integrity,
            Self::Io { .. } => ErrorClass::Fatal,
        }
    }
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> FetchError + '_ {
    move |source| FetchError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Downloads artifacts and extracts the firmware binary.
pub struct ArtifactFetcher<'a> {
    transfer: &'a ResumableTransfer<'a>,
    extractor: &'a dyn ArchiveExtractor,
    binary_extension: &'a str,
}

impl<'a> ArtifactFetcher<'a> {
    /// Creates a fetcher selecting entries ending in `binary_extension`.
    #[must_use]
    pub fn new(
        transfer: &'a ResumableTransfer<'a>,
        extractor: &'a dyn ArchiveExtractor,
        binary_extension: &'a str,
    ) -> Self {
        Self {
            transfer,
            extractor,
            binary_extension,
        }
    }

    /// Retrieves `descriptor` into `output_dir` and returns the path of the
    /// firmware binary, `output_dir/firmware.bin`.
    ///
    /// The archive is saved as `output_dir/<name>.zip` and unpacked into
    /// `output_dir/<name>/`. When several entries match the binary extension
    /// the first in archive order is used.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] if the download, digest check or extraction
    /// fails, or if no entry matches the binary extension.
    pub fn fetch(
        &self,
        descriptor: &ArtifactDescriptor,
        output_dir: &Path,
    ) -> Result<PathBuf, FetchError> {
        let name = sanitize_name(&descriptor.name);
        fs::create_dir_all(output_dir).map_err(io_error(output_dir))?;

        let archive_path = output_dir.join(format!("{name}.zip"));
        remove_if_present(&archive_path)?;
        let request = TransferRequest::new(&descriptor.download_url, &archive_path)
            .with_declared_size(Some(descriptor.size));
        self.transfer
            .download(&request)
            .map_err(|source| FetchError::Transfer {
                name: descriptor.name.clone(),
                source,
            })?;

        if let Some(expected) = descriptor.digest.as_deref() {
            verify_digest(&descriptor.name, &archive_path, expected)?;
        }

        let extract_dir = output_dir.join(&name);
        if extract_dir.exists() {
            fs::remove_dir_all(&extract_dir).map_err(io_error(&extract_dir))?;
        }
        let files = self
            .extractor
            .extract(&archive_path, &extract_dir)
            .map_err(|source| FetchError::Archive {
                name: descriptor.name.clone(),
                source,
            })?;

        let binary = self.select_binary(&descriptor.name, &files)?;
        let source = extract_dir.join(binary);
        let target = output_dir.join(CANONICAL_BINARY);
        fs::copy(&source, &target).map_err(io_error(&target))?;
        info!(
            "firmware from {} copied to {}",
            source.display(),
            target.display()
        );
        Ok(target)
    }

    fn select_binary<'f>(&self, name: &str, files: &'f [PathBuf]) -> Result<&'f Path, FetchError> {
        let mut matches = files.iter().filter(|file| {
            file.file_name()
                .and_then(|file_name| file_name.to_str())
                .is_some_and(|file_name| file_name.ends_with(self.binary_extension))
        });
        let Some(first) = matches.next() else {
            return Err(FetchError::NoMatchingEntry {
                name: name.to_owned(),
                extension: self.binary_extension.to_owned(),
            });
        };
        let ignored: Vec<String> = matches.map(|file| file.display().to_string()).collect();
        if !ignored.is_empty() {
            warn!(
                "artifact {name} holds several *{} files; using {} and ignoring {}",
                self.binary_extension,
                first.display(),
                ignored.join(", ")
            );
        }
        Ok(first)
    }
}

/// Replaces characters that cannot appear in a single path component.
fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|ch| match ch {
            '/' | '\\' | ':' | '\0' => '_',
            other => other,
        })
        .collect();
    match cleaned.trim() {
        "" | "." | ".." => "artifact".to_owned(),
        trimmed => trimmed.to_owned(),
    }
}

/// Removes a finalized archive left by an earlier fetch.
fn remove_if_present(path: &Path) -> Result<(), FetchError> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!("removed previous archive {}", path.display());
            Ok(())
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_error(path)(err)),
    }
}

fn verify_digest(name: &str, path: &Path, expected: &str) -> Result<(), FetchError> {
    let Some(expected_hex) = expected.strip_prefix("sha256:") else {
        warn!("ignoring unsupported digest {expected} for {name}");
        return Ok(());
    };
    let actual = sha256_file(path)?;
    if !actual.eq_ignore_ascii_case(expected_hex) {
        return Err(FetchError::DigestMismatch {
            name: name.to_owned(),
            expected: expected_hex.to_owned(),
            actual,
        });
    }
    debug!("digest of {} verified", path.display());
    Ok(())
}

fn sha256_file(path: &Path) -> Result<String, FetchError> {
    let mut file = File::open(path).map_err(io_error(path))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher).map_err(io_error(path))?;
    Ok(hasher
        .finalize()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect())
}

#[cfg(test)]
#[path = "fetch_tests.rs"]
mod tests;
