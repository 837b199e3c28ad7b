//! Events flowing into an operation from its transport, and lifecycle
//! notifications flowing out of it.

use bytes::Bytes;
use reqwest::header::{CONTENT_LENGTH, HeaderMap};

use super::error::TransportError;
use super::state::OperationState;

/// Response metadata captured when headers arrive.
#[derive(Debug, Clone)]
pub struct ResponseMetadata {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: HeaderMap,
    /// Whether the transport served this response from a local cache.
    pub from_cache: bool,
}

impl ResponseMetadata {
    /// Creates metadata for a network-served response.
    #[must_use]
    pub fn new(status: u16, headers: HeaderMap) -> Self {
        Self {
            status,
            headers,
            from_cache: false,
        }
    }

    /// Marks the response as served from a cache.
    #[must_use]
    pub fn served_from_cache(mut self) -> Self {
        self.from_cache = true;
        self
    }

    /// Returns the declared body length from `Content-Length`, if valid.
    #[must_use]
    pub fn content_length(&self) -> Option<u64> {
        self.headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
    }
}

/// An event emitted by a transfer handle.
///
/// Transient: an event is consumed by the single ingress of the operation and
/// not retained.
#[derive(Debug)]
pub enum TransferEvent {
    /// Response headers arrived.
    ResponseReceived(ResponseMetadata),
    /// A body chunk arrived; `cumulative_bytes` is the transport's own count.
    DataReceived {
        /// The chunk bytes.
        chunk: Bytes,
        /// Total bytes the transport has delivered so far.
        cumulative_bytes: u64,
    },
    /// The transfer ended.
    ///
    /// `data` overrides the accumulated body when the transport buffers the
    /// payload itself; otherwise the operation uses what it accumulated.
    Completed {
        /// Full payload, when the transport provides it.
        data: Option<Bytes>,
        /// Failure, absent on success.
        error: Option<TransportError>,
    },
}

impl TransferEvent {
    /// Returns a stable label for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ResponseReceived(_) => "response",
            Self::DataReceived { .. } => "data",
            Self::Completed { .. } => "completed",
        }
    }

    /// Creates a successful completion relying on accumulated data.
    #[must_use]
    pub fn success() -> Self {
        Self::Completed {
            data: None,
            error: None,
        }
    }

    /// Creates a failed completion.
    #[must_use]
    pub fn failure(error: TransportError) -> Self {
        Self::Completed {
            data: None,
            error: Some(error),
        }
    }
}

/// Lifecycle notification broadcast to observers of an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationEvent {
    /// The transport was opened.
    Started {
        /// The request URL.
        url: String,
    },
    /// Response headers were accepted.
    ResponseReceived {
        /// HTTP status code.
        status: u16,
    },
    /// The transfer handle was released.
    Stopped,
    /// The operation reached a terminal state.
    Finished {
        /// The terminal state.
        state: OperationState,
    },
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_content_length_parsed_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("60"));
        let meta = ResponseMetadata::new(200, headers);
        assert_eq!(meta.content_length(), Some(60));
        assert!(!meta.from_cache);
    }

    #[test]
    fn test_content_length_missing_or_garbage_is_unknown() {
        assert_eq!(ResponseMetadata::new(200, HeaderMap::new()).content_length(), None);

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("lots"));
        assert_eq!(ResponseMetadata::new(200, headers).content_length(), None);
    }

    #[test]
    fn test_event_kind_labels() {
        assert_eq!(TransferEvent::success().kind(), "completed");
        let data = TransferEvent::DataReceived {
            chunk: Bytes::from_static(b"abc"),
            cumulative_bytes: 3,
        };
        assert_eq!(data.kind(), "data");
    }
}
