//! The seam between an operation and whatever performs the network I/O.
//!
//! A [`Transport`] opens one transfer per operation and reports everything it
//! observes through the [`TransferEvents`] sink it was given. That sink is the
//! operation's single ingress: every event, from any transport thread, passes
//! through the operation's lock before anything else happens.

use std::fmt;
use std::sync::Weak;

use tracing::trace;

use super::challenge::{Challenge, ChallengeDisposition};
use super::download::Inner;
use super::error::TransportError;
use super::event::TransferEvent;
use super::request::DownloadRequest;

/// Factory capability that starts transfers.
pub trait Transport: Send + Sync {
    /// Opens a transfer for `request`, reporting through `events`.
    ///
    /// Implementations may emit events before returning.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when the transfer cannot be started at all.
    fn open(
        &self,
        request: &DownloadRequest,
        events: TransferEvents,
    ) -> Result<Box<dyn TransferHandle>, TransportError>;
}

/// A live transfer that can be asked to stop.
pub trait TransferHandle: Send + Sync {
    /// Signals the transfer to stop. Must be idempotent.
    fn cancel(&self);
}

/// Event sink handed to a transport; forwards into the owning operation.
///
/// Holds only a weak reference, so a transfer never keeps its operation alive.
#[derive(Clone)]
pub struct TransferEvents {
    operation: Weak<Inner>,
}

impl TransferEvents {
    pub(crate) fn new(operation: Weak<Inner>) -> Self {
        Self { operation }
    }

    /// Delivers an event; returns false once the operation no longer accepts
    /// events, which tells the transport to stop.
    pub fn send(&self, event: TransferEvent) -> bool {
        match self.operation.upgrade() {
            Some(inner) => inner.ingest(event),
            None => {
                trace!(kind = event.kind(), "operation dropped; discarding transfer event");
                false
            }
        }
    }

    /// Asks the operation how to answer an authentication challenge.
    ///
    /// Runs the challenge hook synchronously on the calling thread.
    #[must_use]
    pub fn challenge(&self, challenge: &Challenge) -> ChallengeDisposition {
        self.operation
            .upgrade()
            .map_or(ChallengeDisposition::Cancel, |inner| {
                inner.answer_challenge(challenge)
            })
    }

    /// Returns true while the operation still accepts events.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.operation
            .upgrade()
            .is_some_and(|inner| inner.accepts_events())
    }
}

impl fmt::Debug for TransferEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferEvents")
            .field("live", &self.is_live())
            .finish()
    }
}
