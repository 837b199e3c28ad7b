//! Shared Fetch Core Library
//!
//! This library provides a download operation that performs one network
//! transfer on behalf of many concurrent subscribers. Each subscriber sees the
//! same progress stream and exactly one completion, cancellation is coalesced
//! across subscribers, and authentication challenges raised by the transport
//! are forwarded to a caller-supplied policy.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`operation`] - Download operation, subscribers, transports and policies

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod operation;

// Re-export commonly used types
pub use operation::{
    Challenge, ChallengeDisposition, ChallengeHook, Completion, Credential, DownloadOperation,
    DownloadOptions, DownloadRequest, HttpTransport, OperationError, OperationEvent,
    OperationState, Payload, Progress, RejectionPolicy, ResponseMetadata, Subscriber,
    SubscriberEvent, SubscriptionToken, TransferEvent, TransferEvents, TransferHandle, Transport,
    TransportError,
};
