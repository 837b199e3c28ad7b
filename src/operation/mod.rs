//! Shared download operations.
//!
//! A [`DownloadOperation`] performs exactly one transfer and fans its progress
//! and its single completion out to any number of [`Subscriber`]s. Subscribers
//! come and go while the transfer runs; the transfer itself is cancelled only
//! when explicitly asked, or when the last subscriber leaves and the operation
//! was configured to cancel when unobserved.
//!
//! # Features
//!
//! - Exactly one completion per subscriber, never followed by progress
//! - Coalesced cancellation: one cancel notifies every attached subscriber
//! - Authentication challenges forwarded to a pluggable [`ChallengeHook`]
//! - Pluggable [`Transport`]; [`HttpTransport`] streams with `reqwest`
//! - Lifecycle notifications through a broadcast channel
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use shared_fetch_core::operation::{
//!     DownloadOperation, DownloadOptions, DownloadRequest, HttpTransport, SubscriberEvent,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let operation = DownloadOperation::new(
//!     DownloadRequest::parse("https://example.com/photo.jpg")?,
//!     DownloadOptions::default().auto_cancel_when_unobserved(true),
//!     Arc::new(HttpTransport::new()?),
//! );
//! let (_token, mut rx) = operation.subscribe_channel(false)?;
//! operation.start();
//! while let Some(event) = rx.recv().await {
//!     if let SubscriberEvent::Completed(completion) = event {
//!         println!("received {:?} bytes", completion.data().map(|d| d.len()));
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod challenge;
mod constants;
mod dispatch;
mod download;
mod error;
mod event;
mod http;
mod options;
mod request;
mod state;
mod subscriber;
mod transport;

pub use challenge::{
    Challenge, ChallengeDisposition, ChallengeHook, ChallengeKind, Credential,
    DefaultChallengeHook,
};
pub use constants::{
    CONNECT_TIMEOUT_SECS, LIFECYCLE_CHANNEL_CAPACITY, MAX_CHALLENGE_ROUNDS, READ_TIMEOUT_SECS,
    STATUS_NOT_MODIFIED,
};
pub use download::DownloadOperation;
pub use error::{OperationError, SharedError, TransportError};
pub use event::{OperationEvent, ResponseMetadata, TransferEvent};
pub use http::HttpTransport;
pub use options::{DownloadOptions, ParseRejectionError, RejectionPolicy};
pub use request::DownloadRequest;
pub use state::OperationState;
pub use subscriber::{
    CancelFn, Completion, CompletionFn, Payload, Progress, ProgressFn, Subscriber,
    SubscriberEvent, SubscriptionToken,
};
pub use transport::{TransferEvents, TransferHandle, Transport};
