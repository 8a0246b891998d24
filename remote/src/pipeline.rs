//! Build-and-retrieve orchestration.
//!
//! A pipeline run publishes the project to a fresh branch, waits for CI to
//! list an artifact for that branch, then downloads and unpacks it. Stages
//! run strictly in that order and the first failure aborts the run; the
//! caller receives a single [`PipelineError`] naming the stage.

use crate::archive::{ArchiveExtractor, ZipExtractor};
use crate::cancel::CancelToken;
use crate::ci::{ArtifactDescriptor, CiProvider, GitHubActions};
use crate::config::JunoConfig;
use crate::error::ErrorClass;
use crate::exec::{CommandExecutor, SystemCommandExecutor};
use crate::fetch::{ArtifactFetcher, FetchError};
use crate::http;
use crate::output::write_progress;
use crate::publish::{PublishError, RemoteBranch, RepoPublisher};
use crate::request::BuildRequest;
use crate::transfer::ResumableTransfer;
use crate::transfer::transport::{RangeTransport, UreqTransport};
use crate::watch::{ArtifactWatcher, CiRun, WatchError};
use log::info;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Result type for pipeline runs.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Pipeline stage, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Pushing the project to a new branch.
    Publish,
    /// Waiting for the CI artifact.
    Watch,
    /// Downloading and unpacking the artifact.
    Fetch,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Publish => "publish",
            Self::Watch => "watch",
            Self::Fetch => "fetch",
        };
        f.write_str(label)
    }
}

/// The underlying cause of a stage failure.
#[derive(Debug, thiserror::Error)]
pub enum StageFailure {
    /// Publishing failed.
    #[error(transparent)]
    Publish(#[from] PublishError),
    /// Waiting for the artifact failed.
    #[error(transparent)]
    Watch(#[from] WatchError),
    /// Retrieving the artifact failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

impl StageFailure {
    /// Classifies the failure.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Publish(err) => err.class(),
            Self::Watch(err) => err.class(),
            Self::Fetch(err) => err.class(),
        }
    }
}

/// A pipeline run that stopped at `stage`.
#[derive(Debug, thiserror::Error)]
#[error("{stage} stage failed: {source}")]
pub struct PipelineError {
    /// Stage that failed.
    pub stage: Stage,
    /// What went wrong.
    #[source]
    pub source: StageFailure,
}

impl PipelineError {
    fn new(stage: Stage, source: impl Into<StageFailure>) -> Self {
        Self {
            stage,
            source: source.into(),
        }
    }

    /// Classifies the failure.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        self.source.class()
    }
}

/// Everything a successful run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutcome {
    /// Branch the project was pushed to.
    pub branch: RemoteBranch,
    /// Artifact CI produced for the branch.
    pub artifact: ArtifactDescriptor,
    /// Location of the extracted firmware binary.
    pub binary: PathBuf,
}

/// External boundaries the pipeline talks through.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    /// Runs git.
    pub executor: &'a dyn CommandExecutor,
    /// Lists CI artifacts and workflow runs.
    pub provider: &'a dyn CiProvider,
    /// Downloads artifact archives.
    pub transport: &'a dyn RangeTransport,
    /// Unpacks artifact archives.
    pub extractor: &'a dyn ArchiveExtractor,
}

/// Settings shared by every stage of a run.
pub struct PipelineContext<'a> {
    /// Loaded configuration.
    pub config: &'a JunoConfig,
    /// Trips poll and retry waits.
    pub cancel: &'a CancelToken,
    /// Directory receiving the archive and `firmware.bin`.
    pub output_dir: &'a Path,
    /// Suppress progress output.
    pub quiet: bool,
}

/// Runs the pipeline against GitHub using the system `git`.
///
/// # Errors
///
/// Returns a [`PipelineError`] naming the first stage that failed.
pub fn run_pipeline(
    request: &BuildRequest,
    context: &PipelineContext<'_>,
    stderr: &mut dyn Write,
) -> Result<BuildOutcome> {
    let config = context.config;
    let executor = SystemCommandExecutor::new(config.firmware.git_timeout())
        .with_env("GIT_TERMINAL_PROMPT", "0");

    let connect_timeout = Duration::from_secs(config.transfer.connect_timeout_secs);
    let api_agent = http::agent(
        connect_timeout,
        Duration::from_secs(config.ci.request_timeout_secs),
    );
    let provider = GitHubActions::new(
        api_agent,
        &config.ci.api_base,
        request.slug().clone(),
        request.credential().clone(),
    );

    let download_agent = http::agent(
        connect_timeout,
        Duration::from_secs(config.transfer.response_timeout_secs),
    );
    let transport = UreqTransport::new(download_agent).with_bearer(request.credential().clone());

    let collaborators = Collaborators {
        executor: &executor,
        provider: &provider,
        transport: &transport,
        extractor: &ZipExtractor,
    };
    run_pipeline_with(request, context, collaborators, stderr)
}

/// Runs publish, watch and fetch through the given collaborators.
///
/// # Errors
///
/// Returns a [`PipelineError`] naming the first stage that failed. Later
/// stages do not run after a failure.
pub fn run_pipeline_with(
    request: &BuildRequest,
    context: &PipelineContext<'_>,
    collaborators: Collaborators<'_>,
    stderr: &mut dyn Write,
) -> Result<BuildOutcome> {
    let config = context.config;
    let quiet = context.quiet;

    let target = request.device().unwrap_or("default device");
    write_progress(
        stderr,
        quiet,
        format!("Publishing {} for {target}...", request.project_dir().display()),
    );
    let branch = RepoPublisher::new(collaborators.executor, &config.firmware)
        .push(
            request.project_dir(),
            request.repository(),
            request.credential(),
        )
        .map_err(|err| PipelineError::new(Stage::Publish, err))?;
    write_progress(
        stderr,
        quiet,
        format!("  Pushed branch {} ({})", branch.name, branch.commit),
    );

    let policy = config.poll_policy();
    write_progress(
        stderr,
        quiet,
        format!(
            "Waiting for CI artifact (up to {} polls, {}s apart)...",
            policy.max_attempts,
            policy.interval.as_secs()
        ),
    );
    let mut run = CiRun::new(branch.name.clone());
    let artifact = ArtifactWatcher::new(collaborators.provider, context.cancel)
        .with_artifact_name(config.ci.artifact_name.as_deref())
        .wait_for_artifact(&mut run, policy)
        .map_err(|err| PipelineError::new(Stage::Watch, err))?;
    info!(
        "artifact {} ({}) ready after {} polls",
        artifact.name,
        artifact.id,
        run.attempts()
    );
    write_progress(
        stderr,
        quiet,
        format!("  Artifact {} ready ({} bytes)", artifact.name, artifact.size),
    );

    write_progress(stderr, quiet, format!("Fetching {}...", artifact.name));
    let transfer = ResumableTransfer::new(
        collaborators.transport,
        config.retry_policy(),
        context.cancel,
    );
    let binary = ArtifactFetcher::new(
        &transfer,
        collaborators.extractor,
        &config.output.binary_extension,
    )
    .fetch(&artifact, context.output_dir)
    .map_err(|err| PipelineError::new(Stage::Fetch, err))?;
    write_progress(stderr, quiet, format!("  Firmware ready at {}", binary.display()));

    Ok(BuildOutcome {
        branch,
        artifact,
        binary,
    })
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
