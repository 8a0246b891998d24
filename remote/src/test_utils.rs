//! Shared test utilities for the remote build crate.

use crate::ci::{ArtifactRecord, CiError, CiProvider, RunStatus, WorkflowRunRef};
use crate::exec::CommandExecutor;
use crate::transfer::transport::{BodyStatus, RangeTransport, RangedBody, TransportError};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Output};

/// Creates an `ExitStatus` from an exit code (Unix implementation).
#[cfg(unix)]
pub fn exit_status(code: i32) -> ExitStatus {
    use std::os::unix::process::ExitStatusExt;

    ExitStatus::from_raw(code << 8)
}

/// Creates an `ExitStatus` from an exit code (Windows implementation).
#[cfg(windows)]
pub fn exit_status(code: i32) -> ExitStatus {
    use std::os::windows::process::ExitStatusExt;

    ExitStatus::from_raw(code as u32)
}

/// Creates a successful command `Output` with empty stdout and stderr.
pub fn success_output() -> Output {
    success_output_with_stdout("")
}

/// Creates a successful command `Output` with the given stdout.
pub fn success_output_with_stdout(stdout: &str) -> Output {
    Output {
        status: exit_status(0),
        stdout: stdout.as_bytes().to_vec(),
        stderr: Vec::new(),
    }
}

/// Creates a failed command `Output` with the given stderr message.
pub fn failure_output(stderr: &str) -> Output {
    Output {
        status: exit_status(128),
        stdout: Vec::new(),
        stderr: stderr.as_bytes().to_vec(),
    }
}

/// Represents an expected command invocation for testing.
#[derive(Debug)]
pub struct ExpectedCall {
    /// The command to execute (e.g., "git").
    pub cmd: &'static str,
    /// Leading arguments the invocation must start with.
    pub leading_args: Vec<&'static str>,
    /// The result to return when this command is invoked.
    pub result: io::Result<Output>,
}

impl ExpectedCall {
    /// Expects `git` with the given leading arguments and returns `result`.
    pub fn git(leading_args: Vec<&'static str>, result: io::Result<Output>) -> Self {
        Self {
            cmd: "git",
            leading_args,
            result,
        }
    }
}

/// An invocation observed by [`StubExecutor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    /// Arguments passed to the command.
    pub args: Vec<String>,
    /// Working directory, if one was given.
    pub cwd: Option<PathBuf>,
}

/// A stub implementation of `CommandExecutor` for testing.
///
/// Checks invocations against a queue of expected calls, returns their
/// predefined results, and records what was actually run.
#[derive(Debug)]
pub struct StubExecutor {
    expected: RefCell<VecDeque<ExpectedCall>>,
    recorded: RefCell<Vec<RecordedCall>>,
}

impl StubExecutor {
    /// Creates a new `StubExecutor` with the given expected calls.
    pub fn new(expected: Vec<ExpectedCall>) -> Self {
        Self {
            expected: RefCell::new(expected.into()),
            recorded: RefCell::new(Vec::new()),
        }
    }

    /// Returns every invocation seen so far.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.recorded.borrow().clone()
    }

    /// Asserts that all expected command invocations have been consumed.
    ///
    /// # Panics
    ///
    /// Panics if there are remaining expected calls that were not invoked.
    pub fn assert_finished(&self) {
        assert!(
            self.expected.borrow().is_empty(),
            "expected no further command invocations"
        );
    }
}

impl CommandExecutor for StubExecutor {
    fn run(&self, cmd: &str, args: &[&str], cwd: Option<&Path>) -> io::Result<Output> {
        let call = self
            .expected
            .borrow_mut()
            .pop_front()
            .expect("unexpected command invocation");

        assert_eq!(call.cmd, cmd);
        assert!(
            args.starts_with(&call.leading_args),
            "expected arguments starting with {:?}, got {args:?}",
            call.leading_args
        );
        self.recorded.borrow_mut().push(RecordedCall {
            args: args.iter().map(|arg| (*arg).to_owned()).collect(),
            cwd: cwd.map(Path::to_path_buf),
        });

        call.result
    }
}

/// How a scripted body request misbehaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFault {
    /// Deliver this many bytes, then fail with a connection reset.
    ResetAfter(usize),
    /// Deliver this many bytes, then end the body early.
    EndAfter(usize),
    /// Report this offset in `Content-Range` instead of the requested one.
    MisreportStart(u64),
}

/// A `RangeTransport` serving an in-memory resource.
///
/// Faults are consumed one per body request, in order; requests beyond the
/// script succeed.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    body: Vec<u8>,
    report_length: bool,
    honour_range: bool,
    persistent_fault: Option<BodyFault>,
    faults: RefCell<VecDeque<BodyFault>>,
    head_error: RefCell<Option<TransportError>>,
    open_errors: RefCell<VecDeque<TransportError>>,
    head_requests: Cell<usize>,
    offsets: RefCell<Vec<u64>>,
}

impl MemoryTransport {
    /// Serves `body`, reporting its length and honouring ranges.
    pub fn new(body: Vec<u8>) -> Self {
        Self {
            body,
            report_length: true,
            honour_range: true,
            ..Self::default()
        }
    }

    /// Answers ranged requests with the full body and HTTP 200.
    #[must_use]
    pub fn ignoring_range(mut self) -> Self {
        self.honour_range = false;
        self
    }

    /// Omits `Content-Length` from metadata responses.
    #[must_use]
    pub fn without_length(mut self) -> Self {
        self.report_length = false;
        self
    }

    /// Queues a fault for the next unfaulted body request.
    #[must_use]
    pub fn with_fault(self, fault: BodyFault) -> Self {
        self.faults.borrow_mut().push_back(fault);
        self
    }

    /// Applies `fault` to every body request.
    #[must_use]
    pub fn always(mut self, fault: BodyFault) -> Self {
        self.persistent_fault = Some(fault);
        self
    }

    /// Fails the metadata request with `err`.
    #[must_use]
    pub fn with_head_error(self, err: TransportError) -> Self {
        *self.head_error.borrow_mut() = Some(err);
        self
    }

    /// Fails the next body request with `err` before any bytes are sent.
    #[must_use]
    pub fn with_open_error(self, err: TransportError) -> Self {
        self.open_errors.borrow_mut().push_back(err);
        self
    }

    /// Number of metadata requests served.
    pub fn head_requests(&self) -> usize {
        self.head_requests.get()
    }

    /// Number of body requests served, including failed ones.
    pub fn body_requests(&self) -> usize {
        self.offsets.borrow().len()
    }

    /// Offsets requested by each body request, in order.
    pub fn offsets(&self) -> Vec<u64> {
        self.offsets.borrow().clone()
    }
}

impl RangeTransport for MemoryTransport {
    fn content_length(&self, _url: &str) -> Result<Option<u64>, TransportError> {
        self.head_requests.set(self.head_requests.get() + 1);
        if let Some(err) = self.head_error.borrow_mut().take() {
            return Err(err);
        }
        Ok(self.report_length.then_some(self.body.len() as u64))
    }

    fn open(&self, _url: &str, offset: u64) -> Result<RangedBody, TransportError> {
        self.offsets.borrow_mut().push(offset);
        if let Some(err) = self.open_errors.borrow_mut().pop_front() {
            return Err(err);
        }

        let (status, start) = if offset > 0 && self.honour_range {
            (BodyStatus::Partial, offset)
        } else {
            (BodyStatus::Full, 0)
        };
        let start_index = usize::try_from(start)
            .unwrap_or(usize::MAX)
            .min(self.body.len());
        let mut data = self.body[start_index..].to_vec();

        let fault = self
            .faults
            .borrow_mut()
            .pop_front()
            .or(self.persistent_fault);
        let mut range_start = (status == BodyStatus::Partial).then_some(start);
        let mut reset_after = None;
        match fault {
            Some(BodyFault::ResetAfter(bytes)) => reset_after = Some(bytes.min(data.len())),
            Some(BodyFault::EndAfter(bytes)) => data.truncate(bytes),
            Some(BodyFault::MisreportStart(reported)) => range_start = Some(reported),
            None => {}
        }

        Ok(RangedBody {
            status,
            range_start,
            reader: Box::new(ScriptedReader {
                data,
                position: 0,
                reset_after,
            }),
        })
    }
}

/// Reader that optionally fails once `reset_after` bytes were delivered.
struct ScriptedReader {
    data: Vec<u8>,
    position: usize,
    reset_after: Option<usize>,
}

impl Read for ScriptedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let limit = self.reset_after.unwrap_or(self.data.len());
        if self.position >= limit {
            if self.reset_after.is_some() {
                return Err(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "connection reset by peer",
                ));
            }
            return Ok(0);
        }
        let count = buf.len().min(limit - self.position);
        buf[..count].copy_from_slice(&self.data[self.position..self.position + count]);
        self.position += count;
        Ok(count)
    }
}

/// Returns `len` bytes of deterministic, non-repeating-looking content.
pub fn patterned_bytes(len: usize) -> Vec<u8> {
    (0..len)
        .map(|index| u8::try_from((index * 31 + index / 251) % 251).unwrap_or(0))
        .collect()
}

/// Returns the lowercase hex SHA-256 digest of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

/// Writes a zip archive at `path` holding `entries` in order.
///
/// Names ending in `/` become directory entries.
pub fn write_zip(path: &Path, entries: &[(&str, &str)]) {
    let file = std::fs::File::create(path).expect("create zip");
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default();
    for (name, contents) in entries {
        if name.ends_with('/') {
            writer.add_directory(*name, options).expect("add directory");
        } else {
            writer.start_file(*name, options).expect("start entry");
            writer.write_all(contents.as_bytes()).expect("write entry");
        }
    }
    writer.finish().expect("finish zip");
}

/// Returns the bytes of a zip archive holding `entries` in order.
pub fn zip_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
    let temp = tempfile::tempdir().expect("temp dir");
    let path = temp.path().join("archive.zip");
    write_zip(&path, entries);
    std::fs::read(&path).expect("read zip")
}

/// Builds an artifact listing record for `branch`.
///
/// `created_at` is an RFC 3339 timestamp.
pub fn artifact_record(
    id: u64,
    name: &str,
    branch: &str,
    created_at: Option<&str>,
) -> ArtifactRecord {
    ArtifactRecord {
        id,
        name: name.to_owned(),
        size_in_bytes: 1024,
        archive_download_url: format!(
            "https://api.github.com/repos/acme/fw/actions/artifacts/{id}/zip"
        ),
        expired: false,
        created_at: created_at.map(|stamp| {
            DateTime::parse_from_rfc3339(stamp)
                .expect("valid timestamp")
                .with_timezone(&Utc)
        }),
        digest: None,
        workflow_run: Some(WorkflowRunRef {
            head_branch: Some(branch.to_owned()),
            head_sha: None,
        }),
    }
}

/// A `CiProvider` replaying scripted listings.
///
/// Each `list_artifacts` call consumes one response; once the script runs
/// out, an empty listing is returned.
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    listings: RefCell<VecDeque<Result<Vec<ArtifactRecord>, CiError>>>,
    runs: RefCell<Vec<RunStatus>>,
    list_calls: Cell<usize>,
}

impl ScriptedProvider {
    /// Creates a provider with no scripted responses.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a listing response.
    #[must_use]
    pub fn then_list(self, response: Result<Vec<ArtifactRecord>, CiError>) -> Self {
        self.listings.borrow_mut().push_back(response);
        self
    }

    /// Queues `count` empty listings.
    #[must_use]
    pub fn then_empty(self, count: usize) -> Self {
        for _ in 0..count {
            self.listings.borrow_mut().push_back(Ok(Vec::new()));
        }
        self
    }

    /// Adds `status` to the workflow runs reported for every branch, after
    /// any runs added earlier.
    #[must_use]
    pub fn with_run(self, status: RunStatus) -> Self {
        self.runs.borrow_mut().push(status);
        self
    }

    /// Number of listing requests served.
    pub fn list_calls(&self) -> usize {
        self.list_calls.get()
    }
}

impl CiProvider for ScriptedProvider {
    fn list_artifacts(&self) -> Result<Vec<ArtifactRecord>, CiError> {
        self.list_calls.set(self.list_calls.get() + 1);
        self.listings
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    fn workflow_runs(&self, _branch: &str) -> Result<Vec<RunStatus>, CiError> {
        Ok(self.runs.borrow().clone())
    }
}
