//! Subscribers and the registry that holds them.
//!
//! A [`Subscriber`] is plain data: three optional callbacks plus a declared
//! interest in partial data. The [`SubscriberRegistry`] is not synchronized on
//! its own; it lives inside the operation's lock, which is the single point of
//! serialization for every mutation and snapshot.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;

use super::error::SharedError;
use super::event::ResponseMetadata;

/// Progress callback.
pub type ProgressFn = Arc<dyn Fn(&Progress) + Send + Sync>;
/// Completion callback.
pub type CompletionFn = Arc<dyn Fn(&Completion) + Send + Sync>;
/// Cancellation callback.
pub type CancelFn = Arc<dyn Fn() + Send + Sync>;

/// Opaque handle identifying one subscription within one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionToken(u64);

impl SubscriptionToken {
    /// Returns the raw token value.
    #[must_use]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A progress notification.
#[derive(Debug, Clone)]
pub struct Progress {
    /// Bytes received so far.
    pub received: u64,
    /// Expected total, `None` while unknown.
    pub expected: Option<u64>,
    /// Bytes accumulated so far, for subscribers that asked for them.
    pub partial_data: Option<Bytes>,
}

impl Progress {
    /// Returns completion as a fraction in `0.0..=1.0`, if the total is known.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn fraction(&self) -> Option<f64> {
        self.expected
            .filter(|&expected| expected > 0)
            .map(|expected| (self.received as f64 / expected as f64).min(1.0))
    }
}

/// Body received so far, shared by every partial-data subscriber of one chunk.
///
/// Holds the chunks by reference; the contiguous copy is built on first use.
pub(crate) struct PartialBody {
    chunks: Vec<Bytes>,
    joined: OnceLock<Bytes>,
}

impl PartialBody {
    pub(crate) fn new(chunks: Vec<Bytes>) -> Self {
        Self {
            chunks,
            joined: OnceLock::new(),
        }
    }

    pub(crate) fn bytes(&self) -> Bytes {
        self.joined.get_or_init(|| join_chunks(&self.chunks)).clone()
    }
}

/// Concatenates body chunks, without copying when there is only one.
pub(crate) fn join_chunks(chunks: &[Bytes]) -> Bytes {
    match chunks {
        [] => Bytes::new(),
        [only] => only.clone(),
        _ => {
            let mut joined = BytesMut::with_capacity(chunks.iter().map(Bytes::len).sum());
            for chunk in chunks {
                joined.extend_from_slice(chunk);
            }
            joined.freeze()
        }
    }
}

/// The successful result of an operation.
#[derive(Debug, Clone, Default)]
pub struct Payload {
    /// Body bytes; `None` when the caller should reuse data it already has.
    pub data: Option<Bytes>,
    /// Captured response metadata.
    pub response: Option<ResponseMetadata>,
    /// The server answered `304 Not Modified`.
    pub not_modified: bool,
    /// The external decoder should decompress `data`.
    pub decompress: bool,
}

/// The single terminal notification a subscriber receives.
#[derive(Debug, Clone)]
pub struct Completion {
    /// Payload on success, shared error otherwise.
    pub outcome: Result<Payload, SharedError>,
    /// Always true: completion is only delivered once the operation finished.
    pub finished: bool,
}

impl Completion {
    pub(crate) fn success(payload: Payload) -> Self {
        Self {
            outcome: Ok(payload),
            finished: true,
        }
    }

    pub(crate) fn failure(error: SharedError) -> Self {
        Self {
            outcome: Err(error),
            finished: true,
        }
    }

    /// Returns the payload data, if the operation succeeded with data.
    #[must_use]
    pub fn data(&self) -> Option<&Bytes> {
        self.outcome.as_ref().ok().and_then(|p| p.data.as_ref())
    }

    /// Returns the error, if the operation failed.
    #[must_use]
    pub fn error(&self) -> Option<&SharedError> {
        self.outcome.as_ref().err()
    }
}

/// Caller-supplied set of callbacks attached to one operation.
#[derive(Clone, Default)]
pub struct Subscriber {
    on_progress: Option<ProgressFn>,
    on_completed: Option<CompletionFn>,
    on_cancelled: Option<CancelFn>,
    wants_partial_data: bool,
}

impl Subscriber {
    /// Creates a subscriber with no callbacks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the progress callback.
    #[must_use]
    pub fn on_progress(mut self, f: impl Fn(&Progress) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(f));
        self
    }

    /// Sets the completion callback.
    #[must_use]
    pub fn on_completed(mut self, f: impl Fn(&Completion) + Send + Sync + 'static) -> Self {
        self.on_completed = Some(Arc::new(f));
        self
    }

    /// Sets the cancellation callback, run before the cancellation completion.
    #[must_use]
    pub fn on_cancelled(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_cancelled = Some(Arc::new(f));
        self
    }

    /// Requests accumulated bytes with every progress notification.
    #[must_use]
    pub fn with_partial_data(mut self) -> Self {
        self.wants_partial_data = true;
        self
    }

    /// Returns whether this subscriber asked for partial data.
    #[must_use]
    pub fn wants_partial_data(&self) -> bool {
        self.wants_partial_data
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("on_progress", &self.on_progress.is_some())
            .field("on_completed", &self.on_completed.is_some())
            .field("on_cancelled", &self.on_cancelled.is_some())
            .field("wants_partial_data", &self.wants_partial_data)
            .finish()
    }
}

/// A registered subscriber plus its delivery gates.
///
/// `attached` drops to false on unsubscribe so progress already queued for
/// delivery is skipped; `completed` flips once and never back.
#[derive(Debug)]
pub(crate) struct SubscriberEntry {
    token: SubscriptionToken,
    subscriber: Subscriber,
    attached: AtomicBool,
    completed: AtomicBool,
}

impl SubscriberEntry {
    pub(crate) fn token(&self) -> SubscriptionToken {
        self.token
    }

    pub(crate) fn wants_partial_data(&self) -> bool {
        self.subscriber.wants_partial_data
    }

    pub(crate) fn detach(&self) {
        self.attached.store(false, Ordering::SeqCst);
    }

    /// Delivers progress unless the entry detached or already completed.
    pub(crate) fn deliver_progress(&self, progress: &Progress) -> bool {
        if !self.attached.load(Ordering::SeqCst) || self.completed.load(Ordering::SeqCst) {
            return false;
        }
        if let Some(f) = &self.subscriber.on_progress {
            f(progress);
        }
        true
    }

    /// Runs the cancellation callback, if the entry has not completed yet.
    pub(crate) fn deliver_cancelled(&self) {
        if self.completed.load(Ordering::SeqCst) {
            return;
        }
        if let Some(f) = &self.subscriber.on_cancelled {
            f();
        }
    }

    /// Delivers the completion at most once; returns false on a repeat.
    pub(crate) fn deliver_completion(&self, completion: &Completion) -> bool {
        if self.completed.swap(true, Ordering::SeqCst) {
            return false;
        }
        if let Some(f) = &self.subscriber.on_completed {
            f(completion);
        }
        true
    }
}

/// Insertion-ordered table of live subscribers for one operation.
#[derive(Debug, Default)]
pub struct SubscriberRegistry {
    next_token: u64,
    entries: Vec<Arc<SubscriberEntry>>,
    closed: bool,
}

impl SubscriberRegistry {
    /// Creates an empty, open registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a subscriber, returning `None` once the registry was closed.
    pub fn add(&mut self, subscriber: Subscriber) -> Option<SubscriptionToken> {
        if self.closed {
            return None;
        }
        self.next_token += 1;
        let token = SubscriptionToken(self.next_token);
        self.entries.push(Arc::new(SubscriberEntry {
            token,
            subscriber,
            attached: AtomicBool::new(true),
            completed: AtomicBool::new(false),
        }));
        Some(token)
    }

    /// Removes the subscriber for `token`; returns true if it existed.
    pub fn remove(&mut self, token: SubscriptionToken) -> bool {
        let Some(index) = self.entries.iter().position(|e| e.token == token) else {
            return false;
        };
        let entry = self.entries.remove(index);
        entry.detach();
        true
    }

    /// Removes every subscriber; returns how many were attached.
    pub fn remove_all(&mut self) -> usize {
        let removed = self.entries.len();
        for entry in self.entries.drain(..) {
            entry.detach();
        }
        removed
    }

    /// Removes every subscriber and refuses further additions.
    ///
    /// The drained entries stay attached: they are owed a completion.
    pub(crate) fn close(&mut self) -> Vec<Arc<SubscriberEntry>> {
        self.closed = true;
        std::mem::take(&mut self.entries)
    }

    /// Returns the current entries in insertion order.
    pub(crate) fn snapshot(&self) -> Vec<Arc<SubscriberEntry>> {
        self.entries.clone()
    }

    /// Returns the number of live subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when no subscriber is attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns true when any subscriber asked for partial data.
    pub(crate) fn any_wants_partial_data(&self) -> bool {
        self.entries.iter().any(|e| e.wants_partial_data())
    }
}

/// Subscriber notifications delivered through a channel.
#[derive(Debug, Clone)]
pub enum SubscriberEvent {
    /// A progress notification.
    Progress(Progress),
    /// The operation was cancelled; a `Completed` follows.
    Cancelled,
    /// The terminal notification.
    Completed(Completion),
}

/// Builds a subscriber forwarding every notification into an unbounded channel.
pub(crate) fn channel_subscriber(
    wants_partial_data: bool,
) -> (Subscriber, mpsc::UnboundedReceiver<SubscriberEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let progress_tx = tx.clone();
    let cancel_tx = tx.clone();
    let mut subscriber = Subscriber::new()
        .on_progress(move |p| {
            let _ = progress_tx.send(SubscriberEvent::Progress(p.clone()));
        })
        .on_cancelled(move || {
            let _ = cancel_tx.send(SubscriberEvent::Cancelled);
        })
        .on_completed(move |c| {
            let _ = tx.send(SubscriberEvent::Completed(c.clone()));
        });
    subscriber.wants_partial_data = wants_partial_data;
    (subscriber, rx)
}
