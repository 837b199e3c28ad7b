//! Integration tests for the shared download operation.
//!
//! These tests drive a scripted transport by hand, including from several
//! threads at once, and check what every subscriber observed.

mod support;

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use reqwest::header::CACHE_CONTROL;
use shared_fetch_core::{
    Challenge, ChallengeDisposition, Credential, DownloadOperation, DownloadOptions,
    OperationError, OperationEvent, OperationState, SubscriberEvent, TransferEvent,
    TransportError,
};
use support::{Recorder, Seen, TEST_URL, scripted_operation};

const CHUNK: &[u8] = b"0123456789";

#[test]
fn test_three_chunks_with_subscriber_detaching_midway() {
    let (op, transport) = scripted_operation(DownloadOptions::default());
    let a = Recorder::new();
    let b = Recorder::new();
    op.subscribe(a.subscriber()).unwrap();
    let b_token = op.subscribe(b.subscriber()).unwrap();

    op.start();
    assert!(transport.respond(200, Some(30)));
    assert!(transport.chunk(CHUNK, 10));
    assert!(op.unsubscribe(b_token));
    assert!(transport.chunk(CHUNK, 20));
    assert!(transport.chunk(CHUNK, 30));
    assert!(!transport.complete(), "completion ends the event stream");

    assert_eq!(a.progress(), vec![10, 20, 30]);
    let completion = a.assert_single_terminal_completion();
    assert_eq!(completion.data().map(Bytes::len), Some(30));

    assert_eq!(b.progress(), vec![10]);
    assert!(b.completions().is_empty(), "detached subscriber gets no completion");
    assert_eq!(op.state(), OperationState::Succeeded);
    assert_eq!(transport.cancels(), 0);
}

#[test]
fn test_progress_reports_expected_size_from_content_length() {
    let (op, transport) = scripted_operation(DownloadOptions::default());
    let (_token, mut rx) = op.subscribe_channel(false).unwrap();
    op.start();
    transport.respond(200, Some(20));
    transport.chunk(CHUNK, 10);

    match rx.try_recv().unwrap() {
        SubscriberEvent::Progress(progress) => {
            assert_eq!(progress.received, 10);
            assert_eq!(progress.expected, Some(20));
            assert_eq!(progress.fraction(), Some(0.5));
            assert!(progress.partial_data.is_none());
        }
        other => panic!("expected progress, got {other:?}"),
    }
}

#[test]
fn test_partial_data_only_for_subscribers_that_ask() {
    let (op, transport) = scripted_operation(DownloadOptions::default());
    let (_t1, mut wants) = op.subscribe_channel(true).unwrap();
    let (_t2, mut plain) = op.subscribe_channel(false).unwrap();
    op.start();
    transport.respond(200, None);
    transport.chunk(b"abc", 3);
    transport.chunk(b"def", 6);

    let mut partials = Vec::new();
    while let Ok(SubscriberEvent::Progress(progress)) = wants.try_recv() {
        partials.push(progress.partial_data.unwrap());
    }
    assert_eq!(partials, vec![Bytes::from_static(b"abc"), Bytes::from_static(b"abcdef")]);

    while let Ok(event) = plain.try_recv() {
        if let SubscriberEvent::Progress(progress) = event {
            assert!(progress.partial_data.is_none());
        }
    }
}

#[test]
fn test_cancel_notifies_every_subscriber_once() {
    let (op, transport) = scripted_operation(DownloadOptions::default());
    let recorders: Vec<_> = (0..5).map(|_| Recorder::new()).collect();
    for recorder in &recorders {
        op.subscribe(recorder.subscriber()).unwrap();
    }
    op.start();
    transport.respond(200, Some(100));
    transport.chunk(CHUNK, 10);

    op.cancel();
    op.cancel();

    for recorder in &recorders {
        let completion = recorder.assert_single_terminal_completion();
        assert!(completion.error().unwrap().is_cancelled());
        assert_eq!(recorder.cancels(), 1);
    }
    assert_eq!(transport.cancels(), 1, "transfer handle cancelled exactly once");
    assert_eq!(op.state(), OperationState::Cancelled);
    assert!(!transport.chunk(CHUNK, 20), "events after cancel are refused");
}

#[test]
fn test_cancel_races_with_data_without_duplicate_completion() {
    for _ in 0..50 {
        let (op, transport) = scripted_operation(DownloadOptions::default());
        let recorders: Vec<_> = (0..8).map(|_| Recorder::new()).collect();
        for recorder in &recorders {
            op.subscribe(recorder.subscriber()).unwrap();
        }
        op.start();
        transport.respond(200, Some(1_000));
        let sink = transport.sink();

        thread::scope(|s| {
            s.spawn(|| {
                for i in 1..=100u64 {
                    let accepted = sink.send(TransferEvent::DataReceived {
                        chunk: Bytes::from_static(CHUNK),
                        cumulative_bytes: i * 10,
                    });
                    if !accepted {
                        break;
                    }
                }
            });
            s.spawn(|| op.cancel());
        });

        for recorder in &recorders {
            let completion = recorder.assert_single_terminal_completion();
            assert!(completion.error().unwrap().is_cancelled());
            assert_eq!(recorder.cancels(), 1);
        }
        assert_eq!(op.state(), OperationState::Cancelled);
    }
}

#[test]
fn test_subscriber_churn_during_transfer() {
    let (op, transport) = scripted_operation(DownloadOptions::default());
    let stable = Recorder::new();
    op.subscribe(stable.subscriber()).unwrap();
    op.start();
    transport.respond(200, Some(500));
    let sink = transport.sink();
    let churned: Vec<_> = (0..4).map(|_| Recorder::new()).collect();

    thread::scope(|s| {
        s.spawn(|| {
            for i in 1..=50u64 {
                sink.send(TransferEvent::DataReceived {
                    chunk: Bytes::from_static(CHUNK),
                    cumulative_bytes: i * 10,
                });
            }
        });
        for recorder in &churned {
            let op = &op;
            s.spawn(move || {
                for _ in 0..25 {
                    if let Ok(token) = op.subscribe(recorder.subscriber()) {
                        assert!(op.unsubscribe(token));
                    }
                }
            });
        }
    });
    transport.complete();

    let completion = stable.assert_single_terminal_completion();
    assert_eq!(completion.data().map(Bytes::len), Some(500));
    assert_eq!(stable.progress().len(), 50);
    for recorder in &churned {
        assert!(recorder.completions().is_empty());
    }
    assert_eq!(op.subscriber_count(), 0);
}

#[test]
fn test_last_subscriber_leaving_cancels_with_auto_cancel() {
    let options = DownloadOptions::default().auto_cancel_when_unobserved(true);
    let (op, transport) = scripted_operation(options);
    let a = Recorder::new();
    let b = Recorder::new();
    let a_token = op.subscribe(a.subscriber()).unwrap();
    let b_token = op.subscribe(b.subscriber()).unwrap();
    op.start();
    transport.respond(200, None);

    op.unsubscribe(a_token);
    assert_eq!(op.state(), OperationState::Running);
    op.unsubscribe(b_token);
    assert_eq!(op.state(), OperationState::Cancelled);
    assert_eq!(transport.cancels(), 1);
    assert!(a.completions().is_empty());
    assert!(b.completions().is_empty());
}

#[test]
fn test_transfer_continues_unobserved_and_accepts_reattachment() {
    let (op, transport) = scripted_operation(DownloadOptions::default());
    let a = Recorder::new();
    let a_token = op.subscribe(a.subscriber()).unwrap();
    op.start();
    transport.respond(200, Some(20));
    transport.chunk(CHUNK, 10);
    op.unsubscribe(a_token);
    assert_eq!(op.state(), OperationState::Running);
    assert_eq!(transport.cancels(), 0);

    assert!(transport.chunk(CHUNK, 20), "unobserved transfer keeps running");
    let b = Recorder::new();
    op.subscribe(b.subscriber()).unwrap();
    transport.complete();

    let completion = b.assert_single_terminal_completion();
    assert_eq!(completion.data().map(Bytes::len), Some(20));
    assert!(b.progress().is_empty());
}

#[test]
fn test_subscribe_after_finish_is_rejected() {
    let (op, transport) = scripted_operation(DownloadOptions::default());
    op.start();
    transport.respond(200, Some(0));
    transport.complete();

    let late = Recorder::new();
    let err = op.subscribe(late.subscriber()).unwrap_err();
    assert!(matches!(err, OperationError::AlreadyFinished { .. }));
    assert!(late.seen().is_empty());
}

#[test]
fn test_transport_error_reaches_subscribers_unchanged() {
    let (op, transport) = scripted_operation(DownloadOptions::default());
    let a = Recorder::new();
    op.subscribe(a.subscriber()).unwrap();
    op.start();
    transport.respond(200, None);
    transport.emit(TransferEvent::failure(TransportError::other(
        TEST_URL,
        "connection reset",
    )));

    let completion = a.assert_single_terminal_completion();
    let error = completion.error().unwrap();
    let OperationError::Transport(TransportError::Other { message, .. }) = error.as_ref() else {
        panic!("expected the transport error unchanged, got {error:?}");
    };
    assert_eq!(message, "connection reset");
    assert_eq!(op.state(), OperationState::Failed);
}

#[test]
fn test_rejected_status_fails_and_cancels_transfer() {
    let options = DownloadOptions::default().with_rejection("400-599".parse().unwrap());
    let (op, transport) = scripted_operation(options);
    let a = Recorder::new();
    op.subscribe(a.subscriber()).unwrap();
    op.start();

    assert!(!transport.respond(404, None));
    let completion = a.assert_single_terminal_completion();
    assert!(matches!(
        completion.error().unwrap().as_ref(),
        OperationError::PolicyRejected { status: 404, .. }
    ));
    assert_eq!(transport.cancels(), 1);
    assert_eq!(a.cancels(), 0, "rejection is not a cancellation");
}

#[test]
fn test_not_modified_succeeds_without_data_when_enabled() {
    let options = DownloadOptions::default().retrieve_existing_data_when_not_modified(true);
    let (op, transport) = scripted_operation(options);
    let a = Recorder::new();
    op.subscribe(a.subscriber()).unwrap();
    op.start();
    transport.respond(304, None);

    let completion = a.assert_single_terminal_completion();
    let payload = completion.outcome.as_ref().unwrap();
    assert!(payload.not_modified);
    assert!(payload.data.is_none());
    assert_eq!(op.state(), OperationState::Succeeded);
}

#[test]
fn test_ignore_cached_response_adds_no_cache_headers() {
    let options = DownloadOptions::default().ignore_cached_response(true);
    let (op, transport) = scripted_operation(options);
    op.start();
    let request = transport.opened_request();
    assert_eq!(request.headers().get(CACHE_CONTROL).unwrap(), "no-cache");
}

#[test]
fn test_lifecycle_events_are_broadcast() {
    let (op, transport) = scripted_operation(DownloadOptions::default());
    let mut events = op.events();
    op.start();
    transport.respond(200, None);
    transport.complete();

    assert_eq!(
        events.try_recv().unwrap(),
        OperationEvent::Started {
            url: TEST_URL.to_string()
        }
    );
    assert_eq!(
        events.try_recv().unwrap(),
        OperationEvent::ResponseReceived { status: 200 }
    );
    assert_eq!(events.try_recv().unwrap(), OperationEvent::Stopped);
    assert_eq!(
        events.try_recv().unwrap(),
        OperationEvent::Finished {
            state: OperationState::Succeeded
        }
    );
}

#[test]
fn test_challenge_uses_stored_credential_once() {
    let (op, transport) = scripted_operation(DownloadOptions::default());
    let op = op.with_credential(Credential::new("alice", Some("secret".to_string())));
    op.start();
    let sink = transport.sink();

    let first = Challenge::from_header(r#"Basic realm="photos""#, "images.example.com", false, 0);
    match sink.challenge(&first) {
        ChallengeDisposition::UseCredential(credential) => {
            assert_eq!(credential.user(), "alice");
            assert_eq!(credential.password(), Some("secret"));
        }
        other => panic!("expected credential, got {other:?}"),
    }

    let retry = Challenge::from_header(r#"Basic realm="photos""#, "images.example.com", false, 1);
    assert_eq!(sink.challenge(&retry), ChallengeDisposition::Cancel);
}

/// Runs `challenge` through `sink` on another thread, failing if it never returns.
fn answer_within_timeout(
    sink: shared_fetch_core::TransferEvents,
    challenge: Challenge,
) -> ChallengeDisposition {
    let (tx, rx) = std::sync::mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(sink.challenge(&challenge));
    });
    rx.recv_timeout(Duration::from_secs(5))
        .expect("challenge hook deadlocked against the operation")
}

#[test]
fn test_challenge_hook_may_call_back_into_operation() {
    let (op, transport) = scripted_operation(DownloadOptions::default());
    let slot: Arc<Mutex<Option<DownloadOperation>>> = Arc::new(Mutex::new(None));
    let late = Recorder::new();
    let hook_slot = Arc::clone(&slot);
    let hook_late = Arc::clone(&late);
    let op = op.with_challenge_hook(Arc::new(
        move |challenge: &Challenge, _: Option<&Credential>| {
            let op = hook_slot.lock().unwrap().clone().unwrap();
            assert_eq!(op.state(), OperationState::Running);
            op.subscribe(hook_late.subscriber()).unwrap();
            ChallengeDisposition::UseCredential(Credential::new(
                format!("user@{}", challenge.host),
                None,
            ))
        },
    ));
    *slot.lock().unwrap() = Some(op.clone());
    op.start();

    let challenge = Challenge::from_header("Basic", "images.example.com", false, 0);
    let disposition = answer_within_timeout(transport.sink(), challenge);
    assert_eq!(
        disposition,
        ChallengeDisposition::UseCredential(Credential::new("user@images.example.com", None))
    );
    assert_eq!(op.subscriber_count(), 1);

    assert!(transport.complete());
    late.assert_single_terminal_completion();
    slot.lock().unwrap().take();
}

#[test]
fn test_challenge_hook_may_cancel_operation() {
    let (op, transport) = scripted_operation(DownloadOptions::default());
    let a = Recorder::new();
    op.subscribe(a.subscriber()).unwrap();
    let slot: Arc<Mutex<Option<DownloadOperation>>> = Arc::new(Mutex::new(None));
    let hook_slot = Arc::clone(&slot);
    let op = op.with_challenge_hook(Arc::new(
        move |_: &Challenge, _: Option<&Credential>| {
            if let Some(op) = hook_slot.lock().unwrap().take() {
                op.cancel();
            }
            ChallengeDisposition::Cancel
        },
    ));
    *slot.lock().unwrap() = Some(op.clone());
    op.start();

    let challenge = Challenge::from_header("Basic", "images.example.com", false, 0);
    let disposition = answer_within_timeout(transport.sink(), challenge);
    assert_eq!(disposition, ChallengeDisposition::Cancel);
    assert_eq!(op.state(), OperationState::Cancelled);
    assert_eq!(transport.cancels(), 1);
    assert_eq!(a.cancels(), 1);
    assert!(a.assert_single_terminal_completion().error().unwrap().is_cancelled());
}

#[test]
fn test_dropping_last_handle_cancels_transfer() {
    let (op, transport) = scripted_operation(DownloadOptions::default());
    let a = Recorder::new();
    op.subscribe(a.subscriber()).unwrap();
    op.start();
    let sink = transport.sink();
    drop(op);

    assert_eq!(transport.cancels(), 1);
    assert!(!sink.is_live());
    assert!(!sink.send(TransferEvent::success()));
    let seen = a.seen();
    assert!(matches!(
        seen.as_slice(),
        [Seen::Cancelled, Seen::Completed(c)] if c.error().unwrap().is_cancelled()
    ));
}

#[test]
fn test_callback_can_cancel_reentrantly() {
    let (op, transport) = scripted_operation(DownloadOptions::default());
    let a = Recorder::new();
    op.subscribe(a.subscriber()).unwrap();
    let canceller = op.clone();
    op.subscribe(shared_fetch_core::Subscriber::new().on_progress(move |_| canceller.cancel()))
        .unwrap();
    op.start();
    transport.respond(200, None);
    transport.chunk(CHUNK, 10);

    assert_eq!(op.state(), OperationState::Cancelled);
    assert_eq!(a.progress(), vec![10]);
    a.assert_single_terminal_completion();
}
