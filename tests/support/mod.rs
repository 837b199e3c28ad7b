//! Shared helpers for operation integration tests.
//!
//! `ScriptedTransport` hands its event sink back to the test so events can be
//! driven by hand (or from several threads), and `Recorder` captures every
//! notification a subscriber receives, in order.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use reqwest::header::{CONTENT_LENGTH, HeaderMap, HeaderValue};
use shared_fetch_core::{
    Completion, DownloadOperation, DownloadOptions, DownloadRequest, ResponseMetadata, Subscriber,
    TransferEvent, TransferEvents, TransferHandle, Transport, TransportError,
};

pub const TEST_URL: &str = "https://images.example.com/photo.jpg";

/// Transport whose events are emitted by the test.
#[derive(Default)]
pub struct ScriptedTransport {
    events: Mutex<Option<TransferEvents>>,
    requests: Mutex<Vec<DownloadRequest>>,
    cancels: Arc<AtomicUsize>,
}

struct ScriptedHandle {
    cancels: Arc<AtomicUsize>,
}

impl TransferHandle for ScriptedHandle {
    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }
}

impl Transport for ScriptedTransport {
    fn open(
        &self,
        request: &DownloadRequest,
        events: TransferEvents,
    ) -> Result<Box<dyn TransferHandle>, TransportError> {
        self.requests.lock().unwrap().push(request.clone());
        *self.events.lock().unwrap() = Some(events);
        Ok(Box::new(ScriptedHandle {
            cancels: Arc::clone(&self.cancels),
        }))
    }
}

impl ScriptedTransport {
    /// Returns the sink captured by `open`.
    pub fn sink(&self) -> TransferEvents {
        self.events
            .lock()
            .unwrap()
            .clone()
            .expect("transport was not opened")
    }

    pub fn emit(&self, event: TransferEvent) -> bool {
        self.sink().send(event)
    }

    pub fn respond(&self, status: u16, content_length: Option<u64>) -> bool {
        let mut headers = HeaderMap::new();
        if let Some(len) = content_length {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
        }
        self.emit(TransferEvent::ResponseReceived(ResponseMetadata::new(
            status, headers,
        )))
    }

    pub fn chunk(&self, bytes: &[u8], cumulative: u64) -> bool {
        self.emit(TransferEvent::DataReceived {
            chunk: Bytes::copy_from_slice(bytes),
            cumulative_bytes: cumulative,
        })
    }

    pub fn complete(&self) -> bool {
        self.emit(TransferEvent::success())
    }

    pub fn opens(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn opened_request(&self) -> DownloadRequest {
        self.requests.lock().unwrap()[0].clone()
    }

    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }
}

/// Creates an operation over a fresh scripted transport.
pub fn scripted_operation(options: DownloadOptions) -> (DownloadOperation, Arc<ScriptedTransport>) {
    let transport = Arc::new(ScriptedTransport::default());
    let request = DownloadRequest::parse(TEST_URL).unwrap();
    let op = DownloadOperation::new(request, options, Arc::clone(&transport) as Arc<dyn Transport>);
    (op, transport)
}

/// One notification as seen by a subscriber.
#[derive(Debug, Clone)]
pub enum Seen {
    Progress(u64),
    Cancelled,
    Completed(Completion),
}

/// Captures a subscriber's notifications in delivery order.
#[derive(Default)]
pub struct Recorder {
    seen: Mutex<Vec<Seen>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn subscriber(self: &Arc<Self>) -> Subscriber {
        let p = Arc::clone(self);
        let c = Arc::clone(self);
        let x = Arc::clone(self);
        Subscriber::new()
            .on_progress(move |progress| p.push(Seen::Progress(progress.received)))
            .on_completed(move |completion| c.push(Seen::Completed(completion.clone())))
            .on_cancelled(move || x.push(Seen::Cancelled))
    }

    fn push(&self, seen: Seen) {
        self.seen.lock().unwrap().push(seen);
    }

    pub fn seen(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }

    pub fn progress(&self) -> Vec<u64> {
        self.seen()
            .into_iter()
            .filter_map(|s| match s {
                Seen::Progress(received) => Some(received),
                _ => None,
            })
            .collect()
    }

    pub fn completions(&self) -> Vec<Completion> {
        self.seen()
            .into_iter()
            .filter_map(|s| match s {
                Seen::Completed(completion) => Some(completion),
                _ => None,
            })
            .collect()
    }

    pub fn cancels(&self) -> usize {
        self.seen()
            .iter()
            .filter(|s| matches!(s, Seen::Cancelled))
            .count()
    }

    /// Asserts exactly one completion, delivered last.
    pub fn assert_single_terminal_completion(&self) -> Completion {
        let seen = self.seen();
        let completions = self.completions();
        assert_eq!(completions.len(), 1, "expected one completion, saw {seen:?}");
        assert!(
            matches!(seen.last(), Some(Seen::Completed(_))),
            "completion must be the last notification, saw {seen:?}"
        );
        completions.into_iter().next().unwrap()
    }
}
