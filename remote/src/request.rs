//! Build request and credential types.
//!
//! A [`BuildRequest`] is created once per pipeline invocation and never
//! mutated afterwards. The access token travels inside a [`Credential`]
//! whose formatting implementations never print the secret.

use std::fmt;
use std::path::{Path, PathBuf};

/// Errors raised while constructing a [`BuildRequest`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    /// The repository URL is not an `https://github.com/<owner>/<name>` URL.
    #[error("invalid repository URL {url}: {reason}")]
    InvalidRepository {
        /// The rejected URL.
        url: String,
        /// Why the URL was rejected.
        reason: &'static str,
    },

    /// The access token is empty or whitespace.
    #[error("access token is empty")]
    EmptyCredential,
}

/// Access token for the firmware repository and the CI API.
///
/// # Examples
///
/// ```
/// use juno_remote::request::Credential;
///
/// let credential = Credential::new("ghp_secret");
/// assert_eq!(format!("{credential:?}"), "Credential(***)");
/// assert_eq!(credential.redact("push to ghp_secret@github"), "push to ***@github");
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Wraps an access token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the raw token for use in URLs and headers.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Returns `true` if the token is empty or whitespace.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Replaces every occurrence of the token in `text` with `***`.
    #[must_use]
    pub fn redact(&self, text: &str) -> String {
        if self.is_blank() {
            return text.to_owned();
        }
        text.replace(self.0.as_str(), "***")
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

const GITHUB_PREFIX: &str = "https://github.com/";

/// The `owner/name` pair identifying a GitHub repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoSlug {
    owner: String,
    name: String,
}

impl RepoSlug {
    /// Parses a slug from an `https://github.com/<owner>/<name>[.git]` URL.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::InvalidRepository`] for any other shape.
    ///
    /// # Examples
    ///
    /// ```
    /// use juno_remote::request::RepoSlug;
    ///
    /// let slug = RepoSlug::from_url("https://github.com/acme/esp32-firmware.git")?;
    /// assert_eq!(slug.owner(), "acme");
    /// assert_eq!(slug.name(), "esp32-firmware");
    /// # Ok::<(), juno_remote::request::RequestError>(())
    /// ```
    pub fn from_url(url: &str) -> Result<Self, RequestError> {
        let invalid = |reason| RequestError::InvalidRepository {
            url: url.to_owned(),
            reason,
        };
        let path = url
            .trim()
            .strip_prefix(GITHUB_PREFIX)
            .ok_or_else(|| invalid("expected an https://github.com/ URL"))?;
        let path = path.trim_end_matches('/');
        let path = path.strip_suffix(".git").unwrap_or(path);

        let mut parts = path.split('/');
        let (Some(owner), Some(name), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(invalid("expected exactly <owner>/<name>"));
        };
        if owner.is_empty() || name.is_empty() {
            return Err(invalid("owner and name must be non-empty"));
        }
        if owner.contains('@') {
            return Err(invalid("credentials must not be embedded in the URL"));
        }

        Ok(Self {
            owner: owner.to_owned(),
            name: name.to_owned(),
        })
    }

    /// Returns the repository owner.
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Returns the repository name without any `.git` suffix.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for RepoSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// One remote build invocation.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    project_dir: PathBuf,
    repository: String,
    slug: RepoSlug,
    credential: Credential,
    device: Option<String>,
}

impl BuildRequest {
    /// Validates the inputs and creates a request.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError`] if the repository URL cannot be parsed or the
    /// credential is blank.
    pub fn new(
        project_dir: impl Into<PathBuf>,
        repository: &str,
        credential: Credential,
        device: Option<String>,
    ) -> Result<Self, RequestError> {
        let slug = RepoSlug::from_url(repository)?;
        if credential.is_blank() {
            return Err(RequestError::EmptyCredential);
        }
        Ok(Self {
            project_dir: project_dir.into(),
            repository: repository.trim().to_owned(),
            slug,
            credential,
            device: device.filter(|id| !id.trim().is_empty()),
        })
    }

    /// Local directory holding the generated build project.
    #[must_use]
    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    /// Repository URL without credentials.
    #[must_use]
    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// Parsed `owner/name` of the repository.
    #[must_use]
    pub fn slug(&self) -> &RepoSlug {
        &self.slug
    }

    /// Access token shared by git and the CI API.
    #[must_use]
    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    /// Identifier of the target device, if one was given.
    #[must_use]
    pub fn device(&self) -> Option<&str> {
        self.device.as_deref()
    }
}
