//! GitHub Actions artifact and workflow run queries.
//!
//! The watcher talks to CI through the [`CiProvider`] trait; [`GitHubActions`]
//! implements it against the REST API.

use crate::error::ErrorClass;
use crate::http::{self, Failure};
use crate::request::{Credential, RepoSlug};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

const ACCEPT: &str = "application/vnd.github+json";
const API_VERSION: &str = "2022-11-28";
const RUNS_PER_PAGE: u32 = 20;

/// Workflow conclusions that mean no artifact will ever appear.
const FAILED_CONCLUSIONS: &[&str] = &[
    "failure",
    "cancelled",
    "timed_out",
    "action_required",
    "startup_failure",
];

/// Errors raised while querying the CI provider.
#[derive(Debug, thiserror::Error)]
pub enum CiError {
    /// The listing endpoint does not exist yet (HTTP 404).
    #[error("{url} is not available yet")]
    NotReady {
        /// Requested URL.
        url: String,
    },

    /// The token was rejected.
    #[error("CI API rejected the credential for {url} (HTTP {status})")]
    Auth {
        /// Requested URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },

    /// The API answered with an unexpected status.
    #[error("CI API returned HTTP {status} for {url}")]
    Status {
        /// Requested URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },

    /// The response body could not be parsed.
    #[error("malformed response from {url}: {source}")]
    Malformed {
        /// Requested URL.
        url: String,
        /// Parse error.
        #[source]
        source: serde_json::Error,
    },

    /// The request failed before a response arrived.
    #[error("network error for {url}: {reason}")]
    Network {
        /// Requested URL.
        url: String,
        /// Description of the failure.
        reason: String,
    },
}

impl CiError {
    /// Classifies the failure.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::NotReady { .. } => ErrorClass::NotReady,
            Self::Auth { .. } => ErrorClass::Auth,
            Self::Network { .. } => ErrorClass::TransientNetwork,
            Self::Status { .. } | Self::Malformed { .. } => ErrorClass::Fatal,
        }
    }

    fn from_ureq(url: &str, err: &ureq::Error) -> Self {
        let url = url.to_owned();
        match Failure::from(err) {
            Failure::Status(404) => Self::NotReady { url },
            Failure::Status(status) => match http::classify_status(status) {
                ErrorClass::Auth => Self::Auth { url, status },
                _ => Self::Status { url, status },
            },
            Failure::Network(reason) => Self::Network { url, reason },
        }
    }
}

/// The workflow run that produced an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowRunRef {
    /// Branch the run built.
    #[serde(default)]
    pub head_branch: Option<String>,
    /// Commit the run built.
    #[serde(default)]
    pub head_sha: Option<String>,
}

/// One entry of the artifact listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    /// CI-assigned identifier.
    pub id: u64,
    /// Artifact name.
    pub name: String,
    /// Archive size in bytes.
    pub size_in_bytes: u64,
    /// URL of the zip archive.
    pub archive_download_url: String,
    /// Whether the artifact has expired.
    #[serde(default)]
    pub expired: bool,
    /// Creation time.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// Archive digest, `sha256:<hex>`.
    #[serde(default)]
    pub digest: Option<String>,
    /// Originating run.
    #[serde(default)]
    pub workflow_run: Option<WorkflowRunRef>,
}

impl ArtifactRecord {
    /// Returns `true` if the record was produced for `branch` and can still
    /// be downloaded.
    #[must_use]
    pub fn belongs_to(&self, branch: &str) -> bool {
        !self.expired
            && self
                .workflow_run
                .as_ref()
                .and_then(|run| run.head_branch.as_deref())
                == Some(branch)
    }
}

#[derive(Debug, Deserialize)]
struct ArtifactList {
    #[serde(default)]
    artifacts: Vec<ArtifactRecord>,
}

/// Status of a workflow run.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RunStatus {
    /// `queued`, `in_progress`, `completed`, ...
    pub status: String,
    /// Outcome once completed.
    #[serde(default)]
    pub conclusion: Option<String>,
}

impl RunStatus {
    /// Returns the conclusion if the run finished without producing output.
    ///
    /// # Examples
    ///
    /// ```
    /// use juno_remote::ci::RunStatus;
    ///
    /// let run = RunStatus {
    ///     status: "completed".to_owned(),
    ///     conclusion: Some("failure".to_owned()),
    /// };
    /// assert_eq!(run.failed_conclusion(), Some("failure"));
    /// ```
    #[must_use]
    pub fn failed_conclusion(&self) -> Option<&str> {
        self.conclusion
            .as_deref()
            .filter(|conclusion| FAILED_CONCLUSIONS.contains(conclusion))
    }
}

#[derive(Debug, Deserialize)]
struct RunList {
    #[serde(default)]
    workflow_runs: Vec<RunStatus>,
}

/// Selected build artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactDescriptor {
    /// CI-assigned identifier.
    pub id: u64,
    /// Artifact name.
    pub name: String,
    /// URL of the zip archive.
    pub download_url: String,
    /// Declared archive size.
    pub size: u64,
    /// Creation time, if reported.
    pub created_at: Option<DateTime<Utc>>,
    /// Expected archive digest, `sha256:<hex>`.
    pub digest: Option<String>,
}

impl From<ArtifactRecord> for ArtifactDescriptor {
    fn from(record: ArtifactRecord) -> Self {
        Self {
            id: record.id,
            name: record.name,
            download_url: record.archive_download_url,
            size: record.size_in_bytes,
            created_at: record.created_at,
            digest: record.digest,
        }
    }
}

/// Read access to a CI provider.
#[cfg_attr(test, mockall::automock)]
pub trait CiProvider {
    /// Lists the repository's artifacts in provider order.
    ///
    /// # Errors
    ///
    /// Returns [`CiError`] if the request fails or the response is malformed.
    fn list_artifacts(&self) -> Result<Vec<ArtifactRecord>, CiError>;

    /// Returns the recent workflow runs on `branch`, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`CiError`] if the request fails or the response is malformed.
    fn workflow_runs(&self, branch: &str) -> Result<Vec<RunStatus>, CiError>;
}

/// GitHub Actions REST client for one repository.
#[derive(Debug, Clone)]
pub struct GitHubActions {
    agent: ureq::Agent,
    api_base: String,
    slug: RepoSlug,
    credential: Credential,
}

impl GitHubActions {
    /// Creates a client for `slug` authenticated with `credential`.
    #[must_use]
    pub fn new(agent: ureq::Agent, api_base: &str, slug: RepoSlug, credential: Credential) -> Self {
        Self {
            agent,
            api_base: api_base.trim_end_matches('/').to_owned(),
            slug,
            credential,
        }
    }

    fn artifacts_url(&self) -> String {
        format!(
            "{}/repos/{}/actions/artifacts?per_page=100",
            self.api_base, self.slug
        )
    }

    fn runs_url(&self, branch: &str) -> String {
        format!(
            "{}/repos/{}/actions/runs?branch={branch}&per_page={RUNS_PER_PAGE}",
            self.api_base, self.slug
        )
    }

    fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, CiError> {
        let response = self
            .agent
            .get(url)
            .header("Accept", ACCEPT)
            .header("X-GitHub-Api-Version", API_VERSION)
            .header(
                "Authorization",
                format!("Bearer {}", self.credential.expose()),
            )
            .call()
            .map_err(|err| CiError::from_ureq(url, &err))?;
        let body = response
            .into_body()
            .read_to_string()
            .map_err(|err| CiError::Network {
                url: url.to_owned(),
                reason: err.to_string(),
            })?;
        serde_json::from_str(&body).map_err(|source| CiError::Malformed {
            url: url.to_owned(),
            source,
        })
    }
}

impl CiProvider for GitHubActions {
    fn list_artifacts(&self) -> Result<Vec<ArtifactRecord>, CiError> {
        let list: ArtifactList = self.get_json(&self.artifacts_url())?;
        Ok(list.artifacts)
    }

    fn workflow_runs(&self, branch: &str) -> Result<Vec<RunStatus>, CiError> {
        let list: RunList = self.get_json(&self.runs_url(branch))?;
        Ok(list.workflow_runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const LISTING: &str = r#"{
        "total_count": 2,
        "artifacts": [
            {
                "id": 11,
                "node_id": "MDg6QXJ0aWZhY3QxMQ==",
                "name": "firmware",
                "size_in_bytes": 556,
                "url": "https://api.github.com/repos/acme/fw/actions/artifacts/11",
                "archive_download_url": "https://api.github.com/repos/acme/fw/actions/artifacts/11/zip",
                "expired": false,
                "digest": "sha256:cfc2ef9b5b0bf2c7ee5b4a6a8e1d03b4a8d1bd0f7c2c9c2a9a7c7b52d7d5c111",
                "created_at": "2025-01-10T12:00:00Z",
                "workflow_run": {
                    "id": 7,
                    "head_branch": "juno-build-00000000000000aa",
                    "head_sha": "abc123"
                }
            },
            {
                "id": 12,
                "name": "logs",
                "size_in_bytes": 10,
                "archive_download_url": "https://api.github.com/repos/acme/fw/actions/artifacts/12/zip",
                "expired": true,
                "created_at": null
            }
        ]
    }"#;

    #[test]
    fn parses_artifact_listing() {
        let list: ArtifactList = serde_json::from_str(LISTING).expect("valid listing");
        assert_eq!(list.artifacts.len(), 2);
        let first = &list.artifacts[0];
        assert_eq!(first.id, 11);
        assert!(first.belongs_to("juno-build-00000000000000aa"));
        assert!(first.created_at.is_some());
        let second = &list.artifacts[1];
        assert!(second.expired);
        assert_eq!(second.workflow_run, None);
        assert!(!second.belongs_to("juno-build-00000000000000aa"));
    }

    #[test]
    fn descriptor_keeps_download_fields() {
        let list: ArtifactList = serde_json::from_str(LISTING).expect("valid listing");
        let descriptor = ArtifactDescriptor::from(list.artifacts[0].clone());
        assert_eq!(descriptor.name, "firmware");
        assert_eq!(descriptor.size, 556);
        assert!(descriptor.download_url.ends_with("/11/zip"));
        assert!(
            descriptor
                .digest
                .as_deref()
                .is_some_and(|digest| digest.starts_with("sha256:"))
        );
    }

    #[test]
    fn parses_run_listing() {
        let runs: RunList = serde_json::from_str(
            r#"{"total_count": 1, "workflow_runs": [{"status": "completed", "conclusion": "success"}]}"#,
        )
        .expect("valid runs");
        assert_eq!(runs.workflow_runs[0].failed_conclusion(), None);
    }

    #[rstest]
    #[case::failure(Some("failure"), true)]
    #[case::cancelled(Some("cancelled"), true)]
    #[case::startup(Some("startup_failure"), true)]
    #[case::success(Some("success"), false)]
    #[case::skipped(Some("skipped"), false)]
    #[case::running(None, false)]
    fn failing_conclusions_are_detected(#[case] conclusion: Option<&str>, #[case] failed: bool) {
        let run = RunStatus {
            status: "completed".to_owned(),
            conclusion: conclusion.map(str::to_owned),
        };
        assert_eq!(run.failed_conclusion().is_some(), failed);
    }

    #[rstest]
    #[case::missing(404, ErrorClass::NotReady)]
    #[case::unauthorised(401, ErrorClass::Auth)]
    #[case::forbidden(403, ErrorClass::Auth)]
    #[case::server(500, ErrorClass::Fatal)]
    fn statuses_map_to_classes(#[case] status: u16, #[case] class: ErrorClass) {
        let err = CiError::from_ureq("https://api.test/x", &ureq::Error::StatusCode(status));
        assert_eq!(err.class(), class);
    }

    #[test]
    fn urls_target_repository() {
        let client = GitHubActions::new(
            ureq::Agent::new_with_defaults(),
            "https://api.github.com/",
            RepoSlug::from_url("https://github.com/acme/fw").expect("valid slug"),
            Credential::new("tok"),
        );
        assert_eq!(
            client.artifacts_url(),
            "https://api.github.com/repos/acme/fw/actions/artifacts?per_page=100"
        );
        assert_eq!(
            client.runs_url("juno-build-1"),
            "https://api.github.com/repos/acme/fw/actions/runs?branch=juno-build-1&per_page=20"
        );
    }

    #[test]
    fn malformed_body_is_fatal() {
        let source = serde_json::from_str::<ArtifactList>("[").expect_err("invalid json");
        let err = CiError::Malformed {
            url: "https://api.test/x".to_owned(),
            source,
        };
        assert_eq!(err.class(), ErrorClass::Fatal);
    }
}
