//! Error classification shared by every pipeline stage.
//!
//! Each stage defines its own error enum with the context it needs. This
//! module provides the coarse taxonomy used to decide whether a failure is
//! retried locally or surfaced to the caller.

use std::fmt;

/// Coarse classification of a failure.
///
/// Transfers retry [`ErrorClass::TransientNetwork`] and the artifact watcher
/// retries [`ErrorClass::NotReady`]; every other class reaches the caller.
///
/// # Examples
///
/// ```
/// use juno_remote::error::ErrorClass;
///
/// assert_eq!(ErrorClass::NotReady.as_str(), "not-ready");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Timeouts, resets, and truncated bodies.
    TransientNetwork,
    /// The CI provider has not published the artifact yet.
    NotReady,
    /// The remote rejected the credential (HTTP 401/403 or git auth failure).
    Auth,
    /// Downloaded or extracted data failed a size, digest, or path check.
    Integrity,
    /// A requested resource or archive entry does not exist.
    NotFound,
    /// An external command exited unsuccessfully.
    Process,
    /// Polling exhausted its attempt bound.
    Timeout,
    /// A cancellable wait was interrupted.
    Cancelled,
    /// Any other unrecoverable failure.
    Fatal,
}

impl ErrorClass {
    /// Returns the lowercase label used in diagnostics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TransientNetwork => "transient-network",
            Self::NotReady => "not-ready",
            Self::Auth => "auth",
            Self::Integrity => "integrity",
            Self::NotFound => "not-found",
            Self::Process => "process",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::Fatal => "fatal",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::transient(ErrorClass::TransientNetwork, "transient-network")]
    #[case::not_ready(ErrorClass::NotReady, "not-ready")]
    #[case::not_found(ErrorClass::NotFound, "not-found")]
    #[case::cancelled(ErrorClass::Cancelled, "cancelled")]
    fn labels_are_kebab_case(#[case] class: ErrorClass, #[case] expected: &str) {
        assert_eq!(class.as_str(), expected);
    }

    #[test]
    fn display_uses_label() {
        assert_eq!(ErrorClass::TransientNetwork.to_string(), "transient-network");
    }
}
