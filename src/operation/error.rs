//! Error types for download operations.
//!
//! Transport failures are passed through unchanged from the transfer handle.
//! Cancellation, policy rejection and late subscription are synthesized by the
//! operation itself so callers can tell them apart from network faults.

use std::sync::Arc;

use thiserror::Error;

/// Errors raised by a transport while performing the actual transfer.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Network-level error (DNS resolution, connection refused, TLS errors, etc.)
    #[error("network error downloading {url}: {source}")]
    Network {
        /// The URL that failed to download.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout downloading {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// The transport could not be opened for this request.
    #[error("failed to open transfer for {url}: {reason}")]
    Open {
        /// The URL of the request.
        url: String,
        /// Why the transfer could not start.
        reason: String,
    },

    /// An authentication challenge was cancelled by the challenge policy.
    #[error("authentication challenge for {host} cancelled downloading {url}")]
    ChallengeCancelled {
        /// The URL of the request.
        url: String,
        /// The host that issued the challenge.
        host: String,
    },

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {source}")]
    ClientBuild {
        /// The underlying builder error.
        #[source]
        source: reqwest::Error,
    },

    /// Any other transport-reported failure.
    #[error("transfer failed for {url}: {message}")]
    Other {
        /// The URL of the request.
        url: String,
        /// Transport-specific description.
        message: String,
    },
}

impl TransportError {
    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an open failure.
    pub fn open(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Open {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Creates a cancelled-challenge error.
    pub fn challenge_cancelled(url: impl Into<String>, host: impl Into<String>) -> Self {
        Self::ChallengeCancelled {
            url: url.into(),
            host: host.into(),
        }
    }

    /// Creates a generic transport failure.
    pub fn other(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Other {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Maps a reqwest error, promoting timeouts to [`TransportError::Timeout`].
    pub fn from_reqwest(url: impl Into<String>, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::timeout(url)
        } else {
            Self::network(url, source)
        }
    }
}

/// Errors surfaced to subscribers and to callers of the operation.
#[derive(Debug, Error)]
pub enum OperationError {
    /// Failure reported by the transport, passed through unchanged.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The operation was cancelled before it could finish.
    #[error("download of {url} was cancelled")]
    Cancelled {
        /// The URL of the cancelled request.
        url: String,
    },

    /// The response matched the operation's rejection policy.
    #[error("HTTP {status} rejected by download policy for {url}")]
    PolicyRejected {
        /// The URL of the request.
        url: String,
        /// The rejected status code.
        status: u16,
    },

    /// The operation already finished; create a new one instead.
    #[error("download of {url} already finished; cannot attach a new subscriber")]
    AlreadyFinished {
        /// The URL of the finished request.
        url: String,
    },
}

impl OperationError {
    /// Creates a cancellation error.
    pub fn cancelled(url: impl Into<String>) -> Self {
        Self::Cancelled { url: url.into() }
    }

    /// Creates a policy rejection error.
    pub fn policy_rejected(url: impl Into<String>, status: u16) -> Self {
        Self::PolicyRejected {
            url: url.into(),
            status,
        }
    }

    /// Creates an already-finished error.
    pub fn already_finished(url: impl Into<String>) -> Self {
        Self::AlreadyFinished { url: url.into() }
    }

    /// Returns true for synthesized cancellation, which callers should not retry.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Error shared by every subscriber that receives the same completion.
pub type SharedError = Arc<OperationError>;
