//! Bounded polling for a published build artifact.
//!
//! [`ArtifactWatcher`] drives a [`CiRun`] through its states by polling the
//! CI provider at a fixed interval until an artifact built from the branch
//! appears, the run fails, or the attempt budget runs out.

use crate::cancel::{CancelToken, Cancelled};
use crate::ci::{ArtifactDescriptor, ArtifactRecord, CiError, CiProvider, RunStatus};
use crate::error::ErrorClass;
use log::{debug, info, warn};
use std::fmt;
use std::time::Duration;

/// Polling bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Maximum number of listing requests.
    pub max_attempts: u32,
    /// Pause between attempts.
    pub interval: Duration,
}

/// Logical state of the CI run for a pushed branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// No poll has completed yet.
    Pending,
    /// At least one poll found nothing yet.
    Running,
    /// A matching artifact was found.
    ArtifactReady,
    /// The run or the provider failed.
    Failed,
    /// The attempt budget ran out.
    TimedOut,
}

impl RunState {
    /// Returns `true` for states that never change again.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::ArtifactReady | Self::Failed | Self::TimedOut)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::ArtifactReady => "artifact ready",
            Self::Failed => "failed",
            Self::TimedOut => "timed out",
        };
        f.write_str(label)
    }
}

/// Tracks polling progress for one branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CiRun {
    branch: String,
    state: RunState,
    attempts: u32,
}

impl CiRun {
    /// Starts tracking `branch` in the pending state.
    pub fn new(branch: impl Into<String>) -> Self {
        Self {
            branch: branch.into(),
            state: RunState::Pending,
            attempts: 0,
        }
    }

    /// Branch the run builds.
    #[must_use]
    pub fn branch(&self) -> &str {
        &self.branch
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> RunState {
        self.state
    }

    /// Polls made so far.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    fn transition(&mut self, next: RunState) {
        if self.state.is_terminal() {
            return;
        }
        debug!("run for {} moved from {} to {next}", self.branch, self.state);
        self.state = next;
    }
}

/// Errors raised while waiting for an artifact.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// No artifact appeared within the attempt budget.
    #[error("no artifact for branch {branch} after {attempts} attempts")]
    Timeout {
        /// Branch being watched.
        branch: String,
        /// Attempts made.
        attempts: u32,
    },

    /// The workflow run finished without producing an artifact.
    #[error("workflow run for branch {branch} concluded with {conclusion}")]
    RunFailed {
        /// Branch being watched.
        branch: String,
        /// Conclusion reported by the provider.
        conclusion: String,
    },

    /// The run was already in a terminal state.
    #[error("run for branch {branch} already {state}")]
    Finished {
        /// Branch being watched.
        branch: String,
        /// Terminal state of the run.
        state: RunState,
    },

    /// The CI provider failed.
    #[error(transparent)]
    Provider(#[from] CiError),

    /// The wait was cancelled.
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

impl WatchError {
    /// Classifies the failure.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::Timeout { .. } => ErrorClass::Timeout,
            Self::RunFailed { .. } | Self::Finished { .. } => ErrorClass::Fatal,
            Self::Provider(err) => err.class(),
            Self::Cancelled(_) => ErrorClass::Cancelled,
        }
    }
}

/// Polls a CI provider for the artifact built from a branch.
pub struct ArtifactWatcher<'a> {
    provider: &'a dyn CiProvider,
    cancel: &'a CancelToken,
    artifact_name: Option<&'a str>,
}

impl<'a> ArtifactWatcher<'a> {
    /// Creates a watcher that accepts any artifact name.
    #[must_use]
    pub fn new(provider: &'a dyn CiProvider, cancel: &'a CancelToken) -> Self {
        Self {
            provider,
            cancel,
            artifact_name: None,
        }
    }

    /// Restricts matches to artifacts called `name`.
    #[must_use]
    pub const fn with_artifact_name(mut self, name: Option<&'a str>) -> Self {
        self.artifact_name = name;
        self
    }

    /// Polls until an artifact for `run`'s branch is listed.
    ///
    /// A listing with no match counts as one attempt and is followed by a
    /// pause of `policy.interval`, except after the final attempt. A listing
    /// endpoint that is not available yet counts the same way; any other
    /// provider failure ends the wait immediately. The wait also ends once
    /// every workflow run on the branch has finished unsuccessfully.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Timeout`] once `policy.max_attempts` polls found
    /// nothing, [`WatchError::RunFailed`] if the workflow run concluded
    /// unsuccessfully, [`WatchError::Provider`] for fatal provider errors and
    /// [`WatchError::Cancelled`] if the cancel token trips.
    pub fn wait_for_artifact(
        &self,
        run: &mut CiRun,
        policy: PollPolicy,
    ) -> Result<ArtifactDescriptor, WatchError> {
        if run.state().is_terminal() {
            return Err(WatchError::Finished {
                branch: run.branch().to_owned(),
                state: run.state(),
            });
        }

        while run.attempts() < policy.max_attempts {
            self.cancel.check()?;
            run.attempts += 1;
            match self.poll(run.branch()) {
                Ok(Some(descriptor)) => {
                    info!(
                        "artifact {} ({}) ready for {} after {} attempts",
                        descriptor.name,
                        descriptor.id,
                        run.branch(),
                        run.attempts()
                    );
                    run.transition(RunState::ArtifactReady);
                    return Ok(descriptor);
                }
                Ok(None) => run.transition(RunState::Running),
                Err(err) if err.class() == ErrorClass::NotReady => {
                    debug!("poll {} for {} not ready: {err}", run.attempts(), run.branch());
                    run.transition(RunState::Running);
                }
                Err(err) => {
                    run.transition(RunState::Failed);
                    return Err(err);
                }
            }

            if run.attempts() < policy.max_attempts {
                self.cancel.sleep(policy.interval)?;
            }
        }

        warn!(
            "gave up waiting for an artifact on {} after {} attempts",
            run.branch(),
            run.attempts()
        );
        run.transition(RunState::TimedOut);
        Err(WatchError::Timeout {
            branch: run.branch().to_owned(),
            attempts: run.attempts(),
        })
    }

    fn poll(&self, branch: &str) -> Result<Option<ArtifactDescriptor>, WatchError> {
        let records = self.provider.list_artifacts()?;
        if let Some(descriptor) = select_artifact(&records, branch, self.artifact_name) {
            return Ok(Some(descriptor));
        }

        let runs = match self.provider.workflow_runs(branch) {
            Ok(runs) => runs,
            Err(err) if err.class() == ErrorClass::NotReady => {
                debug!("run status for {branch} not available yet: {err}");
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };
        if let Some(conclusion) = every_run_failed(&runs) {
            return Err(WatchError::RunFailed {
                branch: branch.to_owned(),
                conclusion: conclusion.to_owned(),
            });
        }
        Ok(None)
    }
}

/// Returns the newest run's conclusion when no run on the branch can still
/// publish an artifact.
fn every_run_failed(runs: &[RunStatus]) -> Option<&str> {
    let newest = runs.first()?.failed_conclusion()?;
    runs.iter()
        .all(|run| run.failed_conclusion().is_some())
        .then_some(newest)
}

/// Picks the artifact for `branch` from a listing.
///
/// Only unexpired records built from `branch` (and called `name`, when
/// given) are candidates. The newest `created_at` wins; a timestamped
/// candidate beats an untimestamped one; remaining ties go to the earliest
/// record in listing order.
#[must_use]
pub fn select_artifact(
    records: &[ArtifactRecord],
    branch: &str,
    name: Option<&str>,
) -> Option<ArtifactDescriptor> {
    let mut candidates = records
        .iter()
        .filter(|record| record.belongs_to(branch))
        .filter(|record| name.is_none_or(|wanted| record.name == wanted));

    let first = candidates.next()?;
    let chosen = candidates.fold(first, |best, candidate| {
        if is_newer(candidate, best) {
            candidate
        } else {
            best
        }
    });
    Some(ArtifactDescriptor::from(chosen.clone()))
}

fn is_newer(candidate: &ArtifactRecord, current: &ArtifactRecord) -> bool {
    match (candidate.created_at, current.created_at) {
        (Some(candidate), Some(current)) => candidate > current,
        (Some(_), None) => true,
        (None, _) => false,
    }
}

#[cfg(test)]
#[path = "watch_tests.rs"]
mod tests;
