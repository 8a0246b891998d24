//! HTTP transport used by resumable transfers.
//!
//! [`RangeTransport`] is the seam between the transfer algorithm and the
//! network: a metadata query for the total size and a body request starting
//! at a byte offset. [`UreqTransport`] is the production implementation.

use crate::error::ErrorClass;
use crate::http::{self, Failure};
use crate::request::Credential;
use std::io::Read;

/// Whether a body response honoured the requested range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyStatus {
    /// HTTP 200: the complete resource from byte zero.
    Full,
    /// HTTP 206: the resource from the requested offset.
    Partial,
}

/// An open response body.
pub struct RangedBody {
    /// Whether the server honoured the range request.
    pub status: BodyStatus,
    /// First byte position reported by `Content-Range`, when present.
    pub range_start: Option<u64>,
    /// Streaming reader over the body bytes.
    pub reader: Box<dyn Read>,
}

impl std::fmt::Debug for RangedBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RangedBody")
            .field("status", &self.status)
            .field("range_start", &self.range_start)
            .finish_non_exhaustive()
    }
}

/// Errors surfaced by a [`RangeTransport`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The server answered with an error status.
    #[error("{url} responded with HTTP {status}")]
    Status {
        /// Requested URL.
        url: String,
        /// HTTP status code.
        status: u16,
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

impl TransportError {
    /// Classifies the failure.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::Status { status, .. } => http::classify_status(*status),
            Self::Network { .. } => ErrorClass::TransientNetwork,
        }
    }

    fn from_ureq(url: &str, err: &ureq::Error) -> Self {
        match Failure::from(err) {
            Failure::Status(status) => Self::Status {
                url: url.to_owned(),
                status,
            },
            Failure::Network(reason) => Self::Network {
                url: url.to_owned(),
                reason,
            },
        }
    }
}

/// Network operations needed by a resumable transfer.
pub trait RangeTransport {
    /// Returns the total size of the resource without downloading its body,
    /// or `None` if the server does not report one.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the metadata request fails.
    fn content_length(&self, url: &str) -> Result<Option<u64>, TransportError>;

    /// Opens the body starting at byte `offset`.
    ///
    /// An `offset` of zero requests the whole resource.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the request fails or the server answers
    /// with an error status.
    fn open(&self, url: &str, offset: u64) -> Result<RangedBody, TransportError>;
}

/// `ureq`-backed transport with optional bearer authentication.
#[derive(Debug, Clone)]
pub struct UreqTransport {
    agent: ureq::Agent,
    bearer: Option<Credential>,
}

impl UreqTransport {
    /// Creates an unauthenticated transport.
    #[must_use]
    pub fn new(agent: ureq::Agent) -> Self {
        Self {
            agent,
            bearer: None,
        }
    }

    /// Sends `Authorization: Bearer <token>` with every request.
    #[must_use]
    pub fn with_bearer(mut self, credential: Credential) -> Self {
        self.bearer = Some(credential);
        self
    }

    fn authorization(&self) -> Option<String> {
        self.bearer
            .as_ref()
            .map(|credential| format!("Bearer {}", credential.expose()))
    }
}

impl RangeTransport for UreqTransport {
    fn content_length(&self, url: &str) -> Result<Option<u64>, TransportError> {
        let mut request = self.agent.head(url).header("Accept-Encoding", "identity");
        if let Some(value) = self.authorization() {
            request = request.header("Authorization", value);
        }
        let response = request
            .call()
            .map_err(|err| TransportError::from_ureq(url, &err))?;
        Ok(response
            .headers()
            .get("content-length")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse().ok()))
    }

    fn open(&self, url: &str, offset: u64) -> Result<RangedBody, TransportError> {
        // Compressed bodies would make byte offsets meaningless.
        let mut request = self.agent.get(url).header("Accept-Encoding", "identity");
        if let Some(value) = self.authorization() {
            request = request.header("Authorization", value);
        }
        if offset > 0 {
            request = request.header("Range", format!("bytes={offset}-"));
        }
        let response = request
            .call()
            .map_err(|err| TransportError::from_ureq(url, &err))?;

        let status = if response.status().as_u16() == 206 {
            BodyStatus::Partial
        } else {
            BodyStatus::Full
        };
        let range_start = response
            .headers()
            .get("content-range")
            .and_then(|value| value.to_str().ok())
            .and_then(parse_content_range_start);

        Ok(RangedBody {
            status,
            range_start,
            reader: Box::new(response.into_body().into_reader()),
        })
    }
}

/// Extracts the first byte position from a `Content-Range` header value.
///
/// # Examples
///
/// ```
/// use juno_remote::transfer::transport::parse_content_range_start;
///
/// assert_eq!(parse_content_range_start("bytes 512000-1048575/1048576"), Some(512_000));
/// assert_eq!(parse_content_range_start("bytes */1048576"), None);
/// ```
#[must_use]
pub fn parse_content_range_start(value: &str) -> Option<u64> {
    let range = value.trim().strip_prefix("bytes")?.trim_start();
    let (start, _) = range.split_once('-')?;
    start.trim().parse().ok()
}
