//! Project publication to a fresh remote branch.
//!
//! [`RepoPublisher::push`] shallow-clones the firmware repository into a
//! scratch directory, overlays the generated project, commits it on a newly
//! named branch and pushes that branch. The scratch directory is removed on
//! every return path.

use crate::config::FirmwareConfig;
use crate::error::ErrorClass;
use crate::exec::{CommandExecutor, combined_output};
use crate::request::{Credential, RepoSlug, RequestError};
use log::{debug, info};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Output;
use walkdir::WalkDir;

/// Directory name of the clone inside the scratch directory.
const CLONE_DIRNAME: &str = "repo";

/// Git output fragments that indicate rejected credentials.
const AUTH_MARKERS: &[&str] = &[
    "authentication failed",
    "could not read username",
    "invalid username or password",
    "the requested url returned error: 401",
    "the requested url returned error: 403",
    "permission to",
];

/// A git invocation made while publishing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitStep {
    /// `git clone`
    Clone,
    /// `git checkout -b`
    Checkout,
    /// `git add -A`
    Add,
    /// `git commit`
    Commit,
    /// `git rev-parse HEAD`
    RevParse,
    /// `git push`
    Push,
}

impl fmt::Display for GitStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Clone => "clone",
            Self::Checkout => "checkout",
            Self::Add => "add",
            Self::Commit => "commit",
            Self::RevParse => "rev-parse",
            Self::Push => "push",
        };
        f.write_str(label)
    }
}

/// A pushed branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteBranch {
    /// Branch name, `<prefix>-<16 hex digits>`.
    pub name: String,
    /// Commit the branch points at.
    pub commit: String,
}

/// Errors raised while publishing a project.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// The project directory does not exist.
    #[error("project directory {path} does not exist")]
    MissingProject {
        /// Path that was given.
        path: PathBuf,
    },

    /// The repository URL cannot be used as a git remote.
    #[error(transparent)]
    InvalidRemote(#[from] RequestError),

    /// Preparing the working copy failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// Git could not be started or did not finish in time.
    #[error("git {step} could not run: {source}")]
    Command {
        /// Failed step.
        step: GitStep,
        /// Spawn or timeout error.
        #[source]
        source: io::Error,
    },

    /// Git exited unsuccessfully.
    #[error("git {step} failed (exit code {code:?}): {output}")]
    Process {
        /// Failed step.
        step: GitStep,
        /// Exit code, if the process exited normally.
        code: Option<i32>,
        /// Captured stdout and stderr with the credential redacted.
        output: String,
    },

    /// The remote rejected the credential.
    #[error("git {step} was denied access: {output}")]
    Auth {
        /// Failed step.
        step: GitStep,
        /// Captured stdout and stderr with the credential redacted.
        output: String,
    },
}

impl PublishError {
    /// Classifies the failure.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::Auth { .. } => ErrorClass::Auth,
            Self::Process { .. } | Self::Command { .. } => ErrorClass::Process,
            Self::MissingProject { .. } | Self::InvalidRemote(_) | Self::Io { .. } => {
                ErrorClass::Fatal
            }
        }
    }
}

/// Generates a branch name with a 64-bit random suffix.
///
/// # Examples
///
/// ```
/// use juno_remote::publish::generate_branch_name;
///
/// let name = generate_branch_name("juno-build");
/// assert!(name.starts_with("juno-build-"));
/// assert_eq!(name.len(), "juno-build-".len() + 16);
/// ```
#[must_use]
pub fn generate_branch_name(prefix: &str) -> String {
    format!("{prefix}-{:016x}", rand::random::<u64>())
}

/// Builds the push URL with the token in the authority component.
#[must_use]
pub fn authenticated_url(slug: &RepoSlug, credential: &Credential) -> String {
    format!(
        "https://{}@github.com/{}/{}.git",
        credential.expose(),
        slug.owner(),
        slug.name()
    )
}

/// Publishes projects through git.
pub struct RepoPublisher<'a> {
    executor: &'a dyn CommandExecutor,
    settings: &'a FirmwareConfig,
}

impl<'a> RepoPublisher<'a> {
    /// Creates a publisher running git through `executor`.
    #[must_use]
    pub fn new(executor: &'a dyn CommandExecutor, settings: &'a FirmwareConfig) -> Self {
        Self { executor, settings }
    }

    /// Pushes the contents of `project_dir` to a new branch of `repo_url`.
    ///
    /// Git failures are not retried. The credential never appears in
    /// returned errors.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::Auth`] when the remote rejects the credential,
    /// [`PublishError::Process`] for other git failures and
    /// [`PublishError::Io`] if the working copy cannot be prepared.
    pub fn push(
        &self,
        project_dir: &Path,
        repo_url: &str,
        credential: &Credential,
    ) -> Result<RemoteBranch, PublishError> {
        if !project_dir.is_dir() {
            return Err(PublishError::MissingProject {
                path: project_dir.to_path_buf(),
            });
        }
        let slug = RepoSlug::from_url(repo_url)?;
        let remote = authenticated_url(&slug, credential);

        let scratch = tempfile::Builder::new()
            .prefix("juno-publish-")
            .tempdir()
            .map_err(|source| PublishError::Io {
                path: std::env::temp_dir(),
                source,
            })?;
        let clone_dir = scratch.path().join(CLONE_DIRNAME);

        info!("cloning {slug}");
        self.git(
            GitStep::Clone,
            &[
                "clone",
                "--depth",
                "1",
                "--single-branch",
                &remote,
                CLONE_DIRNAME,
            ],
            scratch.path(),
            credential,
        )?;

        let copied = copy_project(project_dir, &clone_dir)?;
        debug!("copied {copied} files from {}", project_dir.display());

        let branch = generate_branch_name(&self.settings.branch_prefix);
        self.git(
            GitStep::Checkout,
            &["checkout", "-b", &branch],
            &clone_dir,
            credential,
        )?;
        self.git(GitStep::Add, &["add", "-A"], &clone_dir, credential)?;

        let name = format!("user.name={}", self.settings.author_name);
        let email = format!("user.email={}", self.settings.author_email);
        self.git(
            GitStep::Commit,
            &[
                "-c",
                &name,
                "-c",
                &email,
                "commit",
                "--allow-empty",
                "-m",
                &self.settings.commit_message,
            ],
            &clone_dir,
            credential,
        )?;

        let head = self.git(
            GitStep::RevParse,
            &["rev-parse", "HEAD"],
            &clone_dir,
            credential,
        )?;
        let commit = String::from_utf8_lossy(&head.stdout).trim().to_owned();

        info!("pushing branch {branch} ({commit})");
        self.git(
            GitStep::Push,
            &["push", "-u", "origin", &branch],
            &clone_dir,
            credential,
        )?;

        Ok(RemoteBranch {
            name: branch,
            commit,
        })
    }

    fn git(
        &self,
        step: GitStep,
        args: &[&str],
        cwd: &Path,
        credential: &Credential,
    ) -> Result<Output, PublishError> {
        debug!("running git {step} in {}", cwd.display());
        let output = self
            .executor
            .run("git", args, Some(cwd))
            .map_err(|source| PublishError::Command { step, source })?;
        if output.status.success() {
            return Ok(output);
        }

        let text = credential.redact(&combined_output(&output));
        if looks_like_auth_failure(&text) {
            return Err(PublishError::Auth { step, output: text });
        }
        Err(PublishError::Process {
            step,
            code: output.status.code(),
            output: text,
        })
    }
}

/// Returns `true` if git output reports rejected credentials.
fn looks_like_auth_failure(output: &str) -> bool {
    let lower = output.to_lowercase();
    AUTH_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Copies every file under `source` into `dest`, overwriting existing files.
///
/// A top-level `.git` directory in `source` is skipped. Returns the number
/// of files copied.
fn copy_project(source: &Path, dest: &Path) -> Result<usize, PublishError> {
    let io_error = |path: &Path| {
        let path = path.to_path_buf();
        move |source| PublishError::Io { path, source }
    };

    fs::create_dir_all(dest).map_err(io_error(dest))?;
    let walker = WalkDir::new(source)
        .min_depth(1)
        .into_iter()
        .filter_entry(|entry| !(entry.depth() == 1 && entry.file_name() == ".git"));

    let mut copied = 0;
    for entry in walker {
        let entry = entry.map_err(|err| PublishError::Io {
            path: source.to_path_buf(),
            source: err.into(),
        })?;
        let Ok(relative) = entry.path().strip_prefix(source) else {
            continue;
        };
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(io_error(&target))?;
        } else {
            fs::copy(entry.path(), &target).map_err(io_error(&target))?;
            copied += 1;
        }
    }
    Ok(copied)
}

#[cfg(test)]
#[path = "publish_tests.rs"]
mod tests;
