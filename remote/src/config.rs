//! Configuration for the remote build pipeline.
//!
//! Settings live in `juno.toml`, grouped by component. [`JunoConfig`] is
//! constructed once, validated, and then passed by reference into every
//! stage; nothing mutates it afterwards. Every field has a default so a
//! missing file or table falls back cleanly.
//!
//! ```toml
//! [firmware]
//! repository = "https://github.com/acme/esp32-firmware"
//! branch_prefix = "juno-build"
//!
//! [ci]
//! max_attempts = 20
//! poll_interval_secs = 10
//!
//! [transfer]
//! max_retries = 5
//! retry_delay_secs = 3
//! ```

use crate::request::Credential;
use crate::transfer::RetryPolicy;
use crate::watch::PollPolicy;
use directories_next::ProjectDirs;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable that overrides `firmware.token`.
pub const TOKEN_ENV_VAR: &str = "JUNO_FIRMWARE_TOKEN";

const CONFIG_FILENAME: &str = "juno.toml";
const FIRMWARE_DIRNAME: &str = "firmware";

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read configuration {path}: {source}")]
    Read {
        /// Path of the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML for [`JunoConfig`].
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is syntactically valid but unusable.
    #[error("invalid value for {field}: {reason}")]
    Invalid {
        /// Dotted path of the offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// No working directory was configured and none could be derived.
    #[error("could not determine the Juno data directory; set output.work_dir")]
    MissingWorkDir,
}

/// Top-level configuration value.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct JunoConfig {
    /// Firmware repository and publication settings.
    pub firmware: FirmwareConfig,
    /// CI provider polling settings.
    pub ci: CiConfig,
    /// Resumable transfer settings.
    pub transfer: TransferConfig,
    /// Output locations.
    pub output: OutputConfig,
}

impl JunoConfig {
    /// Parses and validates configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML or unknown keys and
    /// [`ConfigError::Invalid`] for out-of-range values.
    ///
    /// # Examples
    ///
    /// ```
    /// use juno_remote::config::JunoConfig;
    ///
    /// let config = JunoConfig::from_toml_str("[ci]\nmax_attempts = 3\n")?;
    /// assert_eq!(config.ci.max_attempts, 3);
    /// assert_eq!(config.firmware.branch_prefix, "juno-build");
    /// # Ok::<(), juno_remote::config::ConfigError>(())
    /// ```
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from an explicit path.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] if the file cannot be read, or any error
    /// from [`JunoConfig::from_toml_str`].
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Loads configuration from the platform default location, falling back
    /// to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_default() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) if path.is_file() => Self::load(&path),
            _ => {
                log::debug!("no configuration file found; using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Returns `<config dir>/juno/juno.toml` for the current platform.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join(CONFIG_FILENAME))
    }

    /// Checks invariants that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ci.max_attempts == 0 {
            return Err(invalid("ci.max_attempts", "must be at least 1"));
        }
        if self.firmware.branch_prefix.trim().is_empty() {
            return Err(invalid("firmware.branch_prefix", "must not be empty"));
        }
        if self.firmware.branch_prefix.contains(char::is_whitespace) {
            return Err(invalid("firmware.branch_prefix", "must not contain whitespace"));
        }
        if self.firmware.commit_message.trim().is_empty() {
            return Err(invalid("firmware.commit_message", "must not be empty"));
        }
        let extension = &self.output.binary_extension;
        if !extension.starts_with('.') || extension.len() < 2 {
            return Err(invalid(
                "output.binary_extension",
                "must start with '.' followed by at least one character",
            ));
        }
        if self.ci.api_base.trim().is_empty() {
            return Err(invalid("ci.api_base", "must not be empty"));
        }
        Ok(())
    }

    /// Resolves the access token, preferring the environment override.
    ///
    /// `env_value` is the value of [`TOKEN_ENV_VAR`], passed in so callers
    /// control where the environment is read.
    #[must_use]
    pub fn resolve_token(&self, env_value: Option<String>) -> Option<Credential> {
        env_value
            .filter(|token| !token.trim().is_empty())
            .or_else(|| {
                self.firmware
                    .token
                    .clone()
                    .filter(|token| !token.trim().is_empty())
            })
            .map(Credential::new)
    }

    /// Returns the configured working directory or the platform data dir.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingWorkDir`] if neither is available.
    pub fn work_dir(&self) -> Result<PathBuf, ConfigError> {
        if let Some(dir) = &self.output.work_dir {
            return Ok(dir.clone());
        }
        project_dirs()
            .map(|dirs| dirs.data_dir().to_path_buf())
            .ok_or(ConfigError::MissingWorkDir)
    }

    /// Returns `<work_dir>/firmware`, the canonical firmware output directory.
    ///
    /// # Errors
    ///
    /// Propagates [`JunoConfig::work_dir`] failures.
    pub fn firmware_dir(&self) -> Result<PathBuf, ConfigError> {
        Ok(self.work_dir()?.join(FIRMWARE_DIRNAME))
    }

    /// Polling bounds for the artifact watcher.
    #[must_use]
    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            max_attempts: self.ci.max_attempts,
            interval: Duration::from_secs(self.ci.poll_interval_secs),
        }
    }

    /// Retry bounds for resumable transfers.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.transfer.max_retries,
            retry_delay: Duration::from_secs(self.transfer.retry_delay_secs),
        }
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_owned(),
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "juno")
}

/// Firmware repository and publication settings.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct FirmwareConfig {
    /// HTTPS URL of the GitHub repository that builds the firmware.
    pub repository: Option<String>,
    /// Access token; [`TOKEN_ENV_VAR`] takes precedence when set.
    pub token: Option<String>,
    /// Prefix for generated branch names.
    pub branch_prefix: String,
    /// Commit message for the published project.
    pub commit_message: String,
    /// Committer name passed to git.
    pub author_name: String,
    /// Committer email passed to git.
    pub author_email: String,
    /// Timeout for each git command, in seconds.
    pub git_timeout_secs: u64,
}

impl FirmwareConfig {
    /// Timeout applied to each git command.
    #[must_use]
    pub const fn git_timeout(&self) -> Duration {
        Duration::from_secs(self.git_timeout_secs)
    }
}

impl Default for FirmwareConfig {
    fn default() -> Self {
        Self {
            repository: None,
            token: None,
            branch_prefix: "juno-build".to_owned(),
            commit_message: "JUNO: Automated build push".to_owned(),
            author_name: "Juno Builder".to_owned(),
            author_email: "juno-builder@users.noreply.github.com".to_owned(),
            git_timeout_secs: 300,
        }
    }
}

/// CI provider polling settings.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct CiConfig {
    /// Base URL of the GitHub REST API.
    pub api_base: String,
    /// Only accept artifacts with this name, when set.
    pub artifact_name: Option<String>,
    /// Maximum number of listing attempts before giving up.
    pub max_attempts: u32,
    /// Seconds to wait between listing attempts.
    pub poll_interval_secs: u64,
    /// Seconds to wait for an API response.
    pub request_timeout_secs: u64,
}

impl Default for CiConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.github.com".to_owned(),
            artifact_name: None,
            max_attempts: 20,
            poll_interval_secs: 10,
            request_timeout_secs: 30,
        }
    }
}

/// Resumable transfer settings.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct TransferConfig {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    /// Seconds to wait before each retry.
    pub retry_delay_secs: u64,
    /// Seconds allowed to establish a connection.
    pub connect_timeout_secs: u64,
    /// Seconds allowed to receive response headers.
    pub response_timeout_secs: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_delay_secs: 3,
            connect_timeout_secs: 30,
            response_timeout_secs: 60,
        }
    }
}

/// Output locations.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    /// Working directory; defaults to the platform data directory.
    pub work_dir: Option<PathBuf>,
    /// Extension identifying the firmware binary inside the artifact.
    pub binary_extension: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            work_dir: None,
            binary_extension: ".bin".to_owned(),
        }
    }
}
