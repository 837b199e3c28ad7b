//! The download operation: one transfer, many subscribers.
//!
//! # Concurrency Model
//!
//! - All state lives in one `Mutex<Shared>`; every transition, registry
//!   mutation and snapshot happens under it.
//! - Transport events enter through [`TransferEvents`] and take the same lock.
//! - Subscriber callbacks never run under the lock. Notifications are queued in
//!   the outbox and drained by one thread at a time once the lock is released,
//!   so callbacks may re-enter the operation freely.
//! - The transport is opened and cancelled outside the lock, so a transport that
//!   emits events synchronously cannot deadlock against its operation.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, instrument, trace, warn};

use super::challenge::{
    Challenge, ChallengeDisposition, ChallengeHook, Credential, DefaultChallengeHook,
};
use super::constants::{LIFECYCLE_CHANNEL_CAPACITY, STATUS_NOT_MODIFIED};
use super::dispatch::{self, Notification, Outbox};
use super::error::{OperationError, TransportError};
use super::event::{OperationEvent, ResponseMetadata, TransferEvent};
use super::options::DownloadOptions;
use super::request::DownloadRequest;
use super::state::OperationState;
use super::subscriber::{
    Completion, PartialBody, Payload, Progress, Subscriber, SubscriberEvent, SubscriberRegistry,
    SubscriptionToken, channel_subscriber, join_chunks,
};
use super::transport::{TransferEvents, TransferHandle, Transport};

/// A single download that any number of subscribers can share.
///
/// Cloning is cheap and yields another handle to the same operation. When the
/// last handle is dropped, an unfinished operation is cancelled.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use shared_fetch_core::operation::{
///     DownloadOperation, DownloadOptions, DownloadRequest, HttpTransport, Subscriber,
/// };
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let request = DownloadRequest::parse("https://example.com/photo.jpg")?;
/// let operation = DownloadOperation::new(
///     request,
///     DownloadOptions::default(),
///     Arc::new(HttpTransport::new()?),
/// );
/// operation.subscribe(
///     Subscriber::new()
///         .on_progress(|p| println!("{} / {:?}", p.received, p.expected))
///         .on_completed(|c| println!("done: {:?}", c.error())),
/// )?;
/// operation.start();
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct DownloadOperation {
    inner: Arc<Inner>,
}

pub(crate) struct Inner {
    request: DownloadRequest,
    options: DownloadOptions,
    transport: Arc<dyn Transport>,
    url: String,
    lifecycle: broadcast::Sender<OperationEvent>,
    shared: Mutex<Shared>,
}

struct Shared {
    state: OperationState,
    registry: SubscriberRegistry,
    handle: Option<Box<dyn TransferHandle>>,
    credential: Option<Credential>,
    challenge_hook: Arc<dyn ChallengeHook>,
    body: Vec<Bytes>,
    bytes_received: u64,
    expected_size: Option<u64>,
    response: Option<ResponseMetadata>,
    outbox: Outbox,
}

/// Work left over after a terminal transition, done once the lock is released.
struct Finished {
    state: OperationState,
    handle: Option<Box<dyn TransferHandle>>,
    cancel_transfer: bool,
}

impl DownloadOperation {
    /// Creates an idle operation for `request`.
    ///
    /// `transport` is the factory that will open the transfer on [`start`](Self::start).
    #[must_use]
    pub fn new(
        request: DownloadRequest,
        options: DownloadOptions,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let request = if options.ignore_cached_response {
            request.bypassing_caches()
        } else {
            request
        };
        let url = request.url().to_string();
        let (lifecycle, _) = broadcast::channel(LIFECYCLE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                request,
                options,
                transport,
                url,
                lifecycle,
                shared: Mutex::new(Shared {
                    state: OperationState::Idle,
                    registry: SubscriberRegistry::new(),
                    handle: None,
                    credential: None,
                    challenge_hook: Arc::new(DefaultChallengeHook),
                    body: Vec::new(),
                    bytes_received: 0,
                    expected_size: None,
                    response: None,
                    outbox: Outbox::default(),
                }),
            }),
        }
    }

    /// Sets the credential offered to authentication challenges.
    #[must_use]
    pub fn with_credential(self, credential: Credential) -> Self {
        self.set_credential(Some(credential));
        self
    }

    /// Registers the hook that decides authentication challenges.
    #[must_use]
    pub fn with_challenge_hook(self, hook: Arc<dyn ChallengeHook>) -> Self {
        self.set_challenge_hook(hook);
        self
    }

    /// Replaces the stored credential.
    pub fn set_credential(&self, credential: Option<Credential>) {
        self.inner.lock().credential = credential;
    }

    /// Replaces the challenge hook.
    pub fn set_challenge_hook(&self, hook: Arc<dyn ChallengeHook>) {
        self.inner.lock().challenge_hook = hook;
    }

    /// Opens the transport. Does nothing unless the operation is idle.
    #[instrument(skip(self), fields(url = %self.inner.url))]
    pub fn start(&self) {
        self.inner.start();
    }

    /// Cancels the operation and delivers a cancellation completion to every
    /// attached subscriber. Does nothing once finished.
    #[instrument(skip(self), fields(url = %self.inner.url))]
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    /// Attaches a subscriber.
    ///
    /// # Errors
    ///
    /// Returns [`OperationError::AlreadyFinished`] once the operation has
    /// finished; the caller should create a new operation instead.
    pub fn subscribe(&self, subscriber: Subscriber) -> Result<SubscriptionToken, OperationError> {
        let mut shared = self.inner.lock();
        if shared.state.is_finished() {
            debug!(url = %self.inner.url, state = %shared.state, "rejecting late subscriber");
            return Err(OperationError::already_finished(&self.inner.url));
        }
        let token = shared
            .registry
            .add(subscriber)
            .ok_or_else(|| OperationError::already_finished(&self.inner.url))?;
        debug!(
            url = %self.inner.url,
            %token,
            subscribers = shared.registry.len(),
            "subscriber attached"
        );
        Ok(token)
    }

    /// Attaches a subscriber whose notifications arrive on a channel.
    ///
    /// # Errors
    ///
    /// Same as [`subscribe`](Self::subscribe).
    pub fn subscribe_channel(
        &self,
        wants_partial_data: bool,
    ) -> Result<(SubscriptionToken, mpsc::UnboundedReceiver<SubscriberEvent>), OperationError>
    {
        let (subscriber, rx) = channel_subscriber(wants_partial_data);
        let token = self.subscribe(subscriber)?;
        Ok((token, rx))
    }

    /// Detaches a subscriber; returns true if it was attached.
    ///
    /// A detached subscriber receives nothing further. Removing the last one
    /// cancels the operation only with
    /// [`auto_cancel_when_unobserved`](DownloadOptions::auto_cancel_when_unobserved).
    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        self.inner.unsubscribe(token)
    }

    /// Detaches every subscriber; returns how many were attached.
    ///
    /// Same unobserved policy as [`unsubscribe`](Self::unsubscribe).
    pub fn unsubscribe_all(&self) -> usize {
        self.inner.unsubscribe_all()
    }

    /// Signals that the host application moved to the background.
    ///
    /// Without [`allow_background_execution`](DownloadOptions::allow_background_execution)
    /// an unfinished operation is cancelled.
    pub fn enter_background(&self) {
        if self.inner.options.allow_background_execution {
            info!(url = %self.inner.url, "continuing download in background");
            return;
        }
        if !self.state().is_finished() {
            info!(url = %self.inner.url, "background execution not allowed; cancelling");
            self.inner.cancel();
        }
    }

    /// Subscribes to lifecycle notifications.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<OperationEvent> {
        self.inner.lifecycle.subscribe()
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> OperationState {
        self.inner.lock().state
    }

    /// Returns the request this operation serves.
    #[must_use]
    pub fn request(&self) -> &DownloadRequest {
        &self.inner.request
    }

    /// Returns the options this operation was created with.
    #[must_use]
    pub fn options(&self) -> &DownloadOptions {
        &self.inner.options
    }

    /// Returns the bytes received so far.
    #[must_use]
    pub fn bytes_received(&self) -> u64 {
        self.inner.lock().bytes_received
    }

    /// Returns the expected total size, if known.
    #[must_use]
    pub fn expected_size(&self) -> Option<u64> {
        self.inner.lock().expected_size
    }

    /// Returns the captured response metadata, if headers arrived.
    #[must_use]
    pub fn response(&self) -> Option<ResponseMetadata> {
        self.inner.lock().response.clone()
    }

    /// Returns the stored credential.
    #[must_use]
    pub fn credential(&self) -> Option<Credential> {
        self.inner.lock().credential.clone()
    }

    /// Returns the number of attached subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().registry.len()
    }
}

impl std::fmt::Debug for DownloadOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadOperation")
            .field("url", &self.inner.url)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, event: OperationEvent) {
        // No receivers is fine.
        let _ = self.lifecycle.send(event);
    }

    fn start(self: &Arc<Self>) {
        {
            let mut shared = self.lock();
            if shared.state != OperationState::Idle {
                debug!(state = %shared.state, "start ignored");
                return;
            }
            shared.state = OperationState::Running;
        }
        info!("starting transfer");
        self.publish(OperationEvent::Started {
            url: self.url.clone(),
        });

        let events = TransferEvents::new(Arc::downgrade(self));
        let opened = self.transport.open(&self.request, events);

        let mut shared = self.lock();
        match opened {
            Ok(handle) if shared.state.is_running() => {
                shared.handle = Some(handle);
            }
            Ok(handle) => {
                // Finished while opening: synchronous completion or a racing cancel.
                let state = shared.state;
                drop(shared);
                debug!(%state, "operation finished while opening; releasing handle");
                if state != OperationState::Succeeded {
                    handle.cancel();
                }
            }
            Err(error) => {
                warn!(error = %error, "failed to open transfer");
                if shared.state.is_running() {
                    let completion = Completion::failure(Arc::new(error.into()));
                    let finished = self.finish_locked(
                        &mut shared,
                        OperationState::Failed,
                        &completion,
                        false,
                        false,
                    );
                    drop(shared);
                    self.complete(finished);
                    self.drain(self.lock());
                }
            }
        }
    }

    fn cancel(&self) {
        let mut shared = self.lock();
        if shared.state.is_finished() {
            debug!(state = %shared.state, "cancel ignored");
            return;
        }
        info!(subscribers = shared.registry.len(), "cancelling download");
        let completion = Completion::failure(Arc::new(OperationError::cancelled(&self.url)));
        let finished =
            self.finish_locked(&mut shared, OperationState::Cancelled, &completion, true, true);
        drop(shared);
        self.complete(finished);
        self.drain(self.lock());
    }

    fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        let mut shared = self.lock();
        if !shared.registry.remove(token) {
            return false;
        }
        debug!(url = %self.url, %token, remaining = shared.registry.len(), "subscriber detached");
        self.after_detach(shared);
        true
    }

    fn unsubscribe_all(&self) -> usize {
        let mut shared = self.lock();
        let removed = shared.registry.remove_all();
        if removed == 0 {
            return 0;
        }
        debug!(url = %self.url, removed, "all subscribers detached");
        self.after_detach(shared);
        removed
    }

    /// Applies the unobserved policy once subscribers were removed.
    fn after_detach(&self, mut shared: MutexGuard<'_, Shared>) {
        if !shared.registry.is_empty() || shared.state.is_finished() {
            return;
        }
        if !self.options.auto_cancel_when_unobserved {
            debug!(url = %self.url, "no subscribers left; transfer continues unobserved");
            return;
        }
        info!(url = %self.url, "last subscriber detached; cancelling download");
        let completion = Completion::failure(Arc::new(OperationError::cancelled(&self.url)));
        let finished =
            self.finish_locked(&mut shared, OperationState::Cancelled, &completion, true, true);
        drop(shared);
        self.complete(finished);
        self.drain(self.lock());
    }

    pub(crate) fn accepts_events(&self) -> bool {
        self.lock().state.is_running()
    }

    /// Single ingress for transport events. Returns whether more are accepted.
    pub(crate) fn ingest(&self, event: TransferEvent) -> bool {
        let mut shared = self.lock();
        if !shared.state.is_running() {
            trace!(
                url = %self.url,
                kind = event.kind(),
                state = %shared.state,
                "ignoring transfer event"
            );
            return false;
        }
        match event {
            TransferEvent::ResponseReceived(response) => self.on_response(shared, response),
            TransferEvent::DataReceived {
                chunk,
                cumulative_bytes,
            } => {
                self.on_data(&mut shared, &chunk, cumulative_bytes);
                self.drain(shared);
                true
            }
            TransferEvent::Completed { data, error } => {
                self.on_completed(shared, data, error);
                false
            }
        }
    }

    fn on_response(&self, mut shared: MutexGuard<'_, Shared>, response: ResponseMetadata) -> bool {
        let status = response.status;
        debug!(url = %self.url, status, from_cache = response.from_cache, "response received");
        if shared.expected_size.is_none() {
            shared.expected_size = response.content_length();
        }
        let from_cache = response.from_cache;
        shared.response = Some(response);
        self.publish(OperationEvent::ResponseReceived { status });

        let outcome = if status == STATUS_NOT_MODIFIED {
            if self.options.retrieve_existing_data_when_not_modified {
                Some(Ok(Payload {
                    data: None,
                    response: shared.response.clone(),
                    not_modified: true,
                    decompress: false,
                }))
            } else {
                Some(Err(OperationError::policy_rejected(&self.url, status)))
            }
        } else if self.options.rejection.rejects(status) {
            Some(Err(OperationError::policy_rejected(&self.url, status)))
        } else if from_cache && self.options.ignore_cached_response {
            Some(Ok(Payload {
                data: None,
                response: shared.response.clone(),
                not_modified: false,
                decompress: false,
            }))
        } else {
            None
        };

        let Some(outcome) = outcome else {
            return true;
        };
        let (state, completion) = match outcome {
            Ok(payload) => {
                info!(url = %self.url, status, "finishing without body");
                (OperationState::Succeeded, Completion::success(payload))
            }
            Err(error) => {
                warn!(url = %self.url, status, "response rejected by policy");
                (OperationState::Failed, Completion::failure(Arc::new(error)))
            }
        };
        let finished = self.finish_locked(&mut shared, state, &completion, true, false);
        drop(shared);
        self.complete(finished);
        self.drain(self.lock());
        false
    }

    fn on_data(&self, shared: &mut Shared, chunk: &Bytes, cumulative_bytes: u64) {
        shared.bytes_received += chunk.len() as u64;
        shared.body.push(chunk.clone());
        if cumulative_bytes != shared.bytes_received {
            debug!(
                url = %self.url,
                transport = cumulative_bytes,
                counted = shared.bytes_received,
                "transport byte count differs from received chunks"
            );
        }
        if shared.expected_size.is_none() {
            shared.expected_size = shared
                .response
                .as_ref()
                .and_then(ResponseMetadata::content_length);
        }
        trace!(
            url = %self.url,
            bytes = shared.bytes_received,
            expected = ?shared.expected_size,
            queued = shared.outbox.len(),
            "data received"
        );

        // Joined outside the lock, at most once per chunk.
        let partial = shared
            .registry
            .any_wants_partial_data()
            .then(|| Arc::new(PartialBody::new(shared.body.clone())));
        let progress = Progress {
            received: shared.bytes_received,
            expected: shared.expected_size,
            partial_data: None,
        };
        for entry in shared.registry.snapshot() {
            let partial = partial
                .as_ref()
                .filter(|_| entry.wants_partial_data())
                .map(Arc::clone);
            shared.outbox.push(Notification::Progress {
                entry,
                progress: progress.clone(),
                partial,
            });
        }
    }

    fn on_completed(
        &self,
        mut shared: MutexGuard<'_, Shared>,
        data: Option<Bytes>,
        error: Option<TransportError>,
    ) {
        let (state, completion) = match error {
            Some(error) => {
                warn!(url = %self.url, error = %error, "transfer failed");
                (
                    OperationState::Failed,
                    Completion::failure(Arc::new(error.into())),
                )
            }
            None => {
                let data = data.unwrap_or_else(|| join_chunks(&std::mem::take(&mut shared.body)));
                info!(url = %self.url, bytes = data.len(), "download complete");
                let payload = Payload {
                    data: Some(data),
                    response: shared.response.clone(),
                    not_modified: false,
                    decompress: self.options.should_decompress_result,
                };
                (OperationState::Succeeded, Completion::success(payload))
            }
        };
        let finished = self.finish_locked(&mut shared, state, &completion, false, false);
        drop(shared);
        self.complete(finished);
        self.drain(self.lock());
    }

    /// Performs a terminal transition under the lock.
    ///
    /// Closes the registry and queues exactly one completion per subscriber
    /// attached at this moment.
    fn finish_locked(
        &self,
        shared: &mut Shared,
        next: OperationState,
        completion: &Completion,
        cancel_transfer: bool,
        notify_cancelled: bool,
    ) -> Finished {
        debug_assert!(
            shared.state.can_transition_to(next),
            "illegal transition {} -> {}",
            shared.state,
            next
        );
        debug!(
            url = %self.url,
            from = %shared.state,
            to = %next,
            subscribers = shared.registry.len(),
            "operation finished"
        );
        shared.state = next;
        for entry in shared.registry.close() {
            if notify_cancelled {
                shared.outbox.push(Notification::Cancelled {
                    entry: Arc::clone(&entry),
                });
            }
            shared.outbox.push(Notification::Completed {
                entry,
                completion: completion.clone(),
            });
        }
        shared.body.clear();
        Finished {
            state: next,
            handle: shared.handle.take(),
            cancel_transfer,
        }
    }

    /// Releases the transfer handle and publishes the terminal notifications.
    fn complete(&self, finished: Finished) {
        if let Some(handle) = finished.handle {
            if finished.cancel_transfer {
                handle.cancel();
            }
        }
        self.publish(OperationEvent::Stopped);
        self.publish(OperationEvent::Finished {
            state: finished.state,
        });
    }

    /// Delivers queued notifications unless another frame is already doing so.
    fn drain<'a>(&'a self, mut shared: MutexGuard<'a, Shared>) {
        if !shared.outbox.begin_drain() {
            return;
        }
        loop {
            let Some(notification) = shared.outbox.next() else {
                break;
            };
            drop(shared);
            dispatch::deliver(&notification);
            shared = self.lock();
        }
    }

    pub(crate) fn answer_challenge(&self, challenge: &Challenge) -> ChallengeDisposition {
        let (hook, credential) = {
            let shared = self.lock();
            if !shared.state.is_running() {
                return ChallengeDisposition::Cancel;
            }
            (Arc::clone(&shared.challenge_hook), shared.credential.clone())
        };
        let decision = hook.decide(challenge, credential.as_ref());
        debug!(
            url = %self.url,
            host = %challenge.host,
            failures = challenge.previous_failure_count,
            decision = ?decision,
            "authentication challenge answered"
        );
        decision
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let shared = self
            .shared
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if shared.state.is_finished() {
            return;
        }
        debug!(url = %self.url, "operation dropped while unfinished; cancelling");
        shared.state = OperationState::Cancelled;
        let mut pending = Vec::new();
        while let Some(notification) = shared.outbox.next() {
            pending.push(notification);
        }
        let error = Arc::new(OperationError::cancelled(&self.url));
        for entry in shared.registry.close() {
            pending.push(Notification::Cancelled {
                entry: Arc::clone(&entry),
            });
            pending.push(Notification::Completed {
                entry,
                completion: Completion::failure(Arc::clone(&error)),
            });
        }
        if let Some(handle) = shared.handle.take() {
            handle.cancel();
        }
        for notification in &pending {
            dispatch::deliver(notification);
        }
    }
}
