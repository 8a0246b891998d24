//! On-disk state for an interrupted transfer.
//!
//! Bytes land in `<destination>.part`. A sidecar `<destination>.part.json`
//! records which URL and total size the partial belongs to so a restarted
//! process can resume without asking the server again, and so a partial left
//! behind for a different resource is never extended.

use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Returns the partial-file path for `destination`.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use juno_remote::transfer::partial_path;
///
/// assert_eq!(partial_path(Path::new("/out/fw.zip")), Path::new("/out/fw.zip.part"));
/// ```
#[must_use]
pub fn partial_path(destination: &Path) -> PathBuf {
    with_suffix(destination, ".part")
}

/// Returns the sidecar path for `destination`.
#[must_use]
pub fn sidecar_path(destination: &Path) -> PathBuf {
    with_suffix(destination, ".part.json")
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Metadata persisted next to a partial file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferState {
    /// Resource the partial bytes came from.
    pub url: String,
    /// Total size of the resource.
    pub expected_size: u64,
}

impl TransferState {
    /// Reads the sidecar for `destination`.
    ///
    /// A missing or unreadable sidecar yields `None`; the caller then treats
    /// the partial as untrusted.
    #[must_use]
    pub fn load(destination: &Path) -> Option<Self> {
        let path = sidecar_path(destination);
        let text = fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&text) {
            Ok(state) => Some(state),
            Err(err) => {
                log::warn!("ignoring corrupt transfer state {}: {err}", path.display());
                None
            }
        }
    }

    /// Writes the sidecar for `destination`.
    ///
    /// # Errors
    ///
    /// Returns any I/O error raised while writing the file.
    pub fn save(&self, destination: &Path) -> io::Result<()> {
        let json = serde_json::to_string(self).map_err(io::Error::other)?;
        fs::write(sidecar_path(destination), json)
    }

    /// Removes the sidecar for `destination`, ignoring a missing file.
    ///
    /// # Errors
    ///
    /// Returns any other I/O error raised while removing the file.
    pub fn clear(destination: &Path) -> io::Result<()> {
        match fs::remove_file(sidecar_path(destination)) {
            Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
            _ => Ok(()),
        }
    }

    /// Returns `true` if this state describes `url`.
    #[must_use]
    pub fn matches(&self, url: &str) -> bool {
        self.url == url
    }
}

/// Exclusive handle on a partial file.
///
/// The advisory lock is held for the lifetime of the value so two processes
/// never append to the same partial.
#[derive(Debug)]
pub struct PartialFile {
    file: File,
    path: PathBuf,
}

impl PartialFile {
    /// Opens (creating if needed) and locks the partial for `destination`.
    ///
    /// Returns `Ok(None)` if another process holds the lock.
    ///
    /// # Errors
    ///
    /// Returns any I/O error raised while opening or locking the file, other
    /// than lock contention.
    pub fn acquire(destination: &Path) -> io::Result<Option<Self>> {
        let path = partial_path(destination);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        match fs2::FileExt::try_lock_exclusive(&file) {
            Ok(()) => Ok(Some(Self { file, path })),
            Err(err) if is_contended(&err) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Number of bytes currently on disk.
    ///
    /// # Errors
    ///
    /// Returns any I/O error raised while reading metadata.
    pub fn len(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// Discards every byte in the partial.
    ///
    /// # Errors
    ///
    /// Returns any I/O error raised while truncating.
    pub fn truncate(&mut self) -> io::Result<()> {
        self.file.set_len(0)
    }

    /// Returns the underlying file handle.
    pub fn file_mut(&mut self) -> &mut File {
        &mut self.file
    }

    /// Path of the partial file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flushes the partial and moves it to `destination`.
    ///
    /// # Errors
    ///
    /// Returns any I/O error raised while syncing or renaming.
    pub fn finalize(self, destination: &Path) -> io::Result<()> {
        self.file.sync_all()?;
        let Self { file, path } = self;
        drop(file);
        fs::rename(&path, destination)
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}
