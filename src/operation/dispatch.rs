//! Outgoing notifications queued under the operation lock and delivered
//! after it is released.
//!
//! Every notification is appended to the operation's outbox while the lock is
//! held, in the order the state machine produced it. Exactly one thread drains
//! the outbox at a time; a callback that re-enters the operation (to subscribe,
//! unsubscribe or cancel) only appends and returns, and the thread already
//! draining delivers what it appended.

use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tracing::{trace, warn};

use super::subscriber::{Completion, PartialBody, Progress, SubscriberEntry};

/// A single delivery owed to one subscriber.
pub(crate) enum Notification {
    Progress {
        entry: Arc<SubscriberEntry>,
        progress: Progress,
        partial: Option<Arc<PartialBody>>,
    },
    Cancelled {
        entry: Arc<SubscriberEntry>,
    },
    Completed {
        entry: Arc<SubscriberEntry>,
        completion: Completion,
    },
}

impl Notification {
    fn deliver(&self) {
        match self {
            Self::Progress {
                entry,
                progress,
                partial,
            } => {
                let delivered = match partial {
                    Some(partial) => entry.deliver_progress(&Progress {
                        partial_data: Some(partial.bytes()),
                        ..progress.clone()
                    }),
                    None => entry.deliver_progress(progress),
                };
                if !delivered {
                    trace!(token = %entry.token(), "skipping progress for detached subscriber");
                }
            }
            Self::Cancelled { entry } => entry.deliver_cancelled(),
            Self::Completed { entry, completion } => {
                if !entry.deliver_completion(completion) {
                    warn!(token = %entry.token(), "duplicate completion suppressed");
                }
            }
        }
    }

    fn token_label(&self) -> String {
        let entry = match self {
            Self::Progress { entry, .. }
            | Self::Cancelled { entry }
            | Self::Completed { entry, .. } => entry,
        };
        entry.token().to_string()
    }
}

/// Pending notifications plus the flag naming whether a drain is in progress.
#[derive(Default)]
pub(crate) struct Outbox {
    queue: VecDeque<Notification>,
    draining: bool,
}

impl Outbox {
    pub(crate) fn push(&mut self, notification: Notification) {
        self.queue.push_back(notification);
    }

    /// Claims the drain; returns false if another frame is already draining.
    pub(crate) fn begin_drain(&mut self) -> bool {
        if self.draining {
            return false;
        }
        self.draining = true;
        true
    }

    /// Pops the next notification, releasing the drain when empty.
    pub(crate) fn next(&mut self) -> Option<Notification> {
        let next = self.queue.pop_front();
        if next.is_none() {
            self.draining = false;
        }
        next
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }
}

/// Invokes a notification, isolating the operation from a panicking callback.
pub(crate) fn deliver(notification: &Notification) {
    if catch_unwind(AssertUnwindSafe(|| notification.deliver())).is_err() {
        warn!(
            token = %notification.token_label(),
            "subscriber callback panicked; continuing delivery"
        );
    }
}
