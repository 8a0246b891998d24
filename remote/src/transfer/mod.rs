//! Resumable, retrying file downloads.
//!
//! A transfer writes into `<destination>.part` and only renames the partial
//! to `destination` once it holds exactly the expected number of bytes, so
//! the destination is never observed half-written. Interrupted transfers
//! continue from the bytes already on disk with a ranged request.
//!
//! ```no_run
//! use std::time::Duration;
//! use juno_remote::cancel::CancelToken;
//! use juno_remote::transfer::{ResumableTransfer, RetryPolicy, TransferRequest};
//! use juno_remote::transfer::transport::UreqTransport;
//!
//! let agent = juno_remote::http::agent(Duration::from_secs(30), Duration::from_secs(60));
//! let transport = UreqTransport::new(agent);
//! let cancel = CancelToken::new();
//! let transfer = ResumableTransfer::new(&transport, RetryPolicy::default(), &cancel);
//! let request = TransferRequest::new("https://example.com/toolchain.tar.gz", "toolchain.tar.gz");
//! transfer.download(&request)?;
//! # Ok::<(), juno_remote::transfer::TransferError>(())
//! ```

mod state;
pub mod transport;

pub use state::{PartialFile, TransferState, partial_path, sidecar_path};

use crate::cancel::{CancelToken, Cancelled};
use crate::error::ErrorClass;
use log::{debug, info, warn};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::time::Duration;
use transport::{BodyStatus, RangeTransport, TransportError};

/// Size of the buffer used to copy body bytes to disk.
const CHUNK_SIZE: usize = 64 * 1024;

/// Retry bounds for a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    /// Pause between attempts.
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_delay: Duration::from_secs(3),
        }
    }
}

/// A file to download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    /// Source URL.
    pub url: String,
    /// Final location of the file.
    pub destination: PathBuf,
    /// Size to assume when the server does not report one.
    pub declared_size: Option<u64>,
}

impl TransferRequest {
    /// Creates a request without a declared size.
    pub fn new(url: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            destination: destination.into(),
            declared_size: None,
        }
    }

    /// Sets the size used when the server omits `Content-Length`.
    #[must_use]
    pub const fn with_declared_size(mut self, size: Option<u64>) -> Self {
        self.declared_size = size;
        self
    }
}

/// How a successful transfer completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    /// The destination already existed; nothing was touched.
    AlreadyComplete,
    /// A complete partial was promoted without requesting the body.
    Finalized {
        /// Final file size.
        bytes: u64,
    },
    /// Body bytes were downloaded.
    Downloaded {
        /// Final file size.
        bytes: u64,
        /// Attempts made, including the successful one.
        attempts: u32,
        /// Offset of the first body request when it resumed a partial.
        resumed_from: Option<u64>,
    },
}

/// Errors raised by [`ResumableTransfer::download`].
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// The server rejected a request or could not be reached.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Neither the server nor the caller supplied a size.
    #[error("size of {url} is unknown")]
    UnknownSize {
        /// Requested URL.
        url: String,
    },

    /// Another process holds the lock on the partial file.
    #[error("{path} is locked by another transfer")]
    Busy {
        /// Path of the locked partial.
        path: PathBuf,
    },

    /// The body ran past the expected size; the partial was discarded.
    #[error("received {received} bytes but expected {expected}")]
    Oversized {
        /// Expected total size.
        expected: u64,
        /// Bytes that would have been on disk.
        received: u64,
    },

    /// A ranged response started somewhere other than the requested offset.
    #[error("requested bytes from offset {requested} but the server sent offset {reported}")]
    RangeMismatch {
        /// Offset sent in the `Range` header.
        requested: u64,
        /// Offset reported by `Content-Range`.
        reported: u64,
    },

    /// The body ended before the expected size was reached.
    #[error("body ended after {received} of {expected} bytes")]
    Incomplete {
        /// Bytes on disk.
        received: u64,
        /// Expected total size.
        expected: u64,
    },

    /// Reading the body failed mid-stream.
    #[error("connection to {url} lost after {received} bytes: {source}")]
    Interrupted {
        /// Requested URL.
        url: String,
        /// Bytes on disk when the stream failed.
        received: u64,
        /// Underlying read error.
        #[source]
        source: io::Error,
    },

    /// Every allowed attempt failed.
    #[error("transfer failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Attempts made.
        attempts: u32,
        /// Failure of the final attempt.
        #[source]
        last: Box<TransferError>,
    },

    /// The transfer was cancelled; the partial is left for a later resume.
    #[error(transparent)]
    Cancelled(#[from] Cancelled),

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

impl TransferError {
    fn io(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { path, source }
    }

    /// Classifies the failure.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Transport(err) => err.class(),
            Self::Oversized { .. } | Self::RangeMismatch { .. } => ErrorClass::Integrity,
            Self::Incomplete { .. } | Self::Interrupted { .. } => ErrorClass::TransientNetwork,
            Self::RetriesExhausted { last, .. } => last.class(),
            Self::Cancelled(_) => ErrorClass::Cancelled,
            Self::UnknownSize { .. } | Self::Busy { .. } | Self::Io { .. } => ErrorClass::Fatal,
        }
    }

    fn is_retryable(&self) -> bool {
        matches!(
            self.class(),
            ErrorClass::TransientNetwork | ErrorClass::Integrity
        )
    }
}

/// Bookkeeping shared across the attempts of one download.
#[derive(Debug, Default)]
struct Progress {
    expected: Option<u64>,
    body_requests: u32,
    resumed_from: Option<u64>,
}

/// Download engine that resumes partial files and retries transient
/// failures.
pub struct ResumableTransfer<'a> {
    transport: &'a dyn RangeTransport,
    policy: RetryPolicy,
    cancel: &'a CancelToken,
}

impl<'a> ResumableTransfer<'a> {
    /// Creates a transfer engine.
    #[must_use]
    pub fn new(
        transport: &'a dyn RangeTransport,
        policy: RetryPolicy,
        cancel: &'a CancelToken,
    ) -> Self {
        Self {
            transport,
            policy,
            cancel,
        }
    }

    /// Downloads `request.url` to `request.destination`.
    ///
    /// On success the destination holds exactly the expected bytes. On
    /// failure the destination does not exist and any partial bytes remain in
    /// `<destination>.part` for the next call.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::RetriesExhausted`] when transient failures
    /// outlast the retry policy, and fails immediately on authentication,
    /// missing resources, unknown sizes, local I/O errors and cancellation.
    pub fn download(&self, request: &TransferRequest) -> Result<TransferOutcome, TransferError> {
        let destination = request.destination.as_path();
        if destination.exists() {
            debug!("{} already present; skipping transfer", destination.display());
            return Ok(TransferOutcome::AlreadyComplete);
        }
        self.cancel.check()?;

        let part = partial_path(destination);
        let mut partial = PartialFile::acquire(destination)
            .map_err(TransferError::io(&part))?
            .ok_or_else(|| TransferError::Busy { path: part.clone() })?;

        let mut progress = Progress {
            expected: recorded_size(request, &partial).map_err(TransferError::io(&part))?,
            ..Progress::default()
        };

        let mut failures = 0_u32;
        let bytes = loop {
            match self.attempt(request, &mut partial, &mut progress) {
                Ok(bytes) => break bytes,
                Err(err) if err.is_retryable() => {
                    failures += 1;
                    if failures > self.policy.max_retries {
                        return Err(TransferError::RetriesExhausted {
                            attempts: failures,
                            last: Box::new(err),
                        });
                    }
                    warn!(
                        "attempt {failures} for {} failed: {err}; retrying in {}s",
                        request.url,
                        self.policy.retry_delay.as_secs_f32()
                    );
                    self.cancel.sleep(self.policy.retry_delay)?;
                }
                Err(err) => return Err(err),
            }
        };

        partial
            .finalize(destination)
            .map_err(TransferError::io(destination))?;
        TransferState::clear(destination).map_err(TransferError::io(sidecar_path(destination)))?;

        if progress.body_requests == 0 {
            info!("finalized {} from a complete partial", destination.display());
            return Ok(TransferOutcome::Finalized { bytes });
        }
        info!("downloaded {} ({bytes} bytes)", destination.display());
        Ok(TransferOutcome::Downloaded {
            bytes,
            attempts: failures + 1,
            resumed_from: progress.resumed_from,
        })
    }

    /// Runs one attempt and returns the expected size once the partial is
    /// complete.
    fn attempt(
        &self,
        request: &TransferRequest,
        partial: &mut PartialFile,
        progress: &mut Progress,
    ) -> Result<u64, TransferError> {
        let expected = match progress.expected {
            Some(size) => size,
            None => {
                let size = self.query_size(request, partial)?;
                progress.expected = Some(size);
                size
            }
        };

        let part = partial.path().to_path_buf();
        let mut offset = partial.len().map_err(TransferError::io(&part))?;
        if offset == expected {
            return Ok(expected);
        }
        if offset > expected {
            warn!(
                "{} holds {offset} bytes but {expected} are expected; restarting",
                part.display()
            );
            partial.truncate().map_err(TransferError::io(&part))?;
            offset = 0;
        }

        self.cancel.check()?;
        debug!("requesting {} from byte {offset}", request.url);
        progress.body_requests += 1;
        if offset > 0 && progress.resumed_from.is_none() {
            progress.resumed_from = Some(offset);
        }
        let body = self.transport.open(&request.url, offset)?;

        match body.status {
            BodyStatus::Full if offset > 0 => {
                warn!(
                    "{} ignored the range request; restarting from byte 0",
                    request.url
                );
                partial.truncate().map_err(TransferError::io(&part))?;
                offset = 0;
                progress.resumed_from = None;
            }
            BodyStatus::Partial => {
                if let Some(reported) = body.range_start.filter(|start| *start != offset) {
                    partial.truncate().map_err(TransferError::io(&part))?;
                    return Err(TransferError::RangeMismatch {
                        requested: offset,
                        reported,
                    });
                }
            }
            BodyStatus::Full => {}
        }

        self.stream(body.reader, partial, offset, expected, &request.url)?;
        Ok(expected)
    }

    /// Asks the server for the size and reconciles any recorded state.
    fn query_size(
        &self,
        request: &TransferRequest,
        partial: &mut PartialFile,
    ) -> Result<u64, TransferError> {
        let reported = self.transport.content_length(&request.url)?;
        let expected = reported
            .or(request.declared_size)
            .ok_or_else(|| TransferError::UnknownSize {
                url: request.url.clone(),
            })?;
        if let (Some(server), Some(declared)) = (reported, request.declared_size) {
            if server != declared {
                warn!(
                    "{} reports {server} bytes but {declared} were declared; using {server}",
                    request.url
                );
            }
        }

        let destination = request.destination.as_path();
        if let Some(previous) = TransferState::load(destination) {
            if !previous.matches(&request.url) || previous.expected_size != expected {
                warn!(
                    "discarding stale partial for {} ({} bytes expected)",
                    previous.url, previous.expected_size
                );
                partial
                    .truncate()
                    .map_err(TransferError::io(partial.path()))?;
            }
        }
        TransferState {
            url: request.url.clone(),
            expected_size: expected,
        }
        .save(destination)
        .map_err(TransferError::io(sidecar_path(destination)))?;
        Ok(expected)
    }

    /// Appends body bytes to the partial, which must currently end at
    /// `offset`.
    fn stream(
        &self,
        mut reader: Box<dyn Read>,
        partial: &mut PartialFile,
        offset: u64,
        expected: u64,
        url: &str,
    ) -> Result<(), TransferError> {
        let part = partial.path().to_path_buf();
        let file = partial.file_mut();
        file.seek(SeekFrom::Start(offset))
            .map_err(TransferError::io(&part))?;

        let mut received = offset;
        let mut buffer = vec![0_u8; CHUNK_SIZE];
        loop {
            self.cancel.check()?;
            let read = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(read) => read,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(source) => {
                    return Err(TransferError::Interrupted {
                        url: url.to_owned(),
                        received,
                        source,
                    });
                }
            };
            let total = received + read as u64;
            if total > expected {
                file.set_len(0).map_err(TransferError::io(&part))?;
                return Err(TransferError::Oversized {
                    expected,
                    received: total,
                });
            }
            file.write_all(&buffer[..read])
                .map_err(TransferError::io(&part))?;
            received = total;
        }
        file.flush().map_err(TransferError::io(&part))?;

        if received < expected {
            return Err(TransferError::Incomplete { received, expected });
        }
        Ok(())
    }
}

/// Returns the recorded size when the sidecar and partial agree that the
/// partial is already complete.
fn recorded_size(request: &TransferRequest, partial: &PartialFile) -> io::Result<Option<u64>> {
    let Some(state) = TransferState::load(&request.destination) else {
        return Ok(None);
    };
    if state.matches(&request.url) && partial.len()? == state.expected_size {
        debug!(
            "{} already holds all {} bytes",
            partial.path().display(),
            state.expected_size
        );
        return Ok(Some(state.expected_size));
    }
    Ok(None)
}
