//! Shared HTTP agent construction and status classification.

use crate::error::ErrorClass;
use std::time::Duration;

/// User agent sent with every request; the GitHub API rejects requests
/// without one.
pub const USER_AGENT: &str = concat!("juno-remote/", env!("CARGO_PKG_VERSION"));

/// Builds a `ureq` agent with connection and response timeouts.
///
/// No global timeout is set: artifact bodies can take arbitrarily long and an
/// interrupted body is resumed rather than restarted.
#[must_use]
pub fn agent(connect_timeout: Duration, response_timeout: Duration) -> ureq::Agent {
    let config = ureq::Agent::config_builder()
        .timeout_connect(Some(connect_timeout))
        .timeout_recv_response(Some(response_timeout))
        .user_agent(USER_AGENT)
        .build();
    ureq::Agent::new_with_config(config)
}

/// Classifies an HTTP error status.
///
/// # Examples
///
/// ```
/// use juno_remote::error::ErrorClass;
/// use juno_remote::http::classify_status;
///
/// assert_eq!(classify_status(403), ErrorClass::Auth);
/// assert_eq!(classify_status(404), ErrorClass::NotFound);
/// assert_eq!(classify_status(500), ErrorClass::Fatal);
/// ```
#[must_use]
pub const fn classify_status(status: u16) -> ErrorClass {
    match status {
        401 | 403 => ErrorClass::Auth,
        404 => ErrorClass::NotFound,
        _ => ErrorClass::Fatal,
    }
}

/// A `ureq` failure reduced to what callers need to classify it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    /// The server answered with an error status.
    Status(u16),
    /// The request never produced a response.
    Network(String),
}

impl From<&ureq::Error> for Failure {
    fn from(err: &ureq::Error) -> Self {
        match err {
            ureq::Error::StatusCode(status) => Self::Status(*status),
            other => Self::Network(other.to_string()),
        }
    }
}
