//! Default transport built on `reqwest`.
//!
//! Each opened transfer runs as a Tokio task that streams the response body
//! and reports headers, chunks and completion through the operation's event
//! sink. Authentication challenges (`401` / `407`) are forwarded to the
//! operation and answered with HTTP Basic credentials, in `Authorization` for
//! the origin and `Proxy-Authorization` for a proxy.

use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use futures_util::StreamExt;
use reqwest::header::{
    AUTHORIZATION, HeaderName, HeaderValue, PROXY_AUTHENTICATE, PROXY_AUTHORIZATION,
    WWW_AUTHENTICATE,
};
use reqwest::{Client, Response, StatusCode};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::challenge::{Challenge, ChallengeDisposition, Credential};
use super::constants::{CONNECT_TIMEOUT_SECS, MAX_CHALLENGE_ROUNDS, READ_TIMEOUT_SECS};
use super::error::TransportError;
use super::event::{ResponseMetadata, TransferEvent};
use super::request::DownloadRequest;
use super::transport::{TransferEvents, TransferHandle, Transport};

/// HTTP transport with streaming bodies and connection pooling.
///
/// Create once and share between operations; every operation gets its own
/// task but all of them reuse the same connection pool.
///
/// Responses are always reported as network-served: reqwest keeps no HTTP
/// cache, so [`ResponseMetadata::from_cache`] is never set by this transport.
/// `ignore_cached_response` still sends `Cache-Control: no-cache` upstream.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    runtime: Option<Handle>,
}

impl HttpTransport {
    /// Creates a transport with default timeouts.
    ///
    /// Default configuration:
    /// - Connect timeout: 30 seconds
    /// - Read timeout: 5 minutes
    /// - Gzip decompression: enabled
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ClientBuild`] if the HTTP client cannot be built.
    pub fn new() -> Result<Self, TransportError> {
        Self::with_timeouts(CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS)
    }

    /// Creates a transport with explicit timeout values in seconds.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ClientBuild`] if the HTTP client cannot be built.
    pub fn with_timeouts(
        connect_timeout_secs: u64,
        read_timeout_secs: u64,
    ) -> Result<Self, TransportError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout_secs))
            .timeout(Duration::from_secs(read_timeout_secs))
            .gzip(true)
            .user_agent(concat!("shared-fetch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|source| TransportError::ClientBuild { source })?;
        Ok(Self {
            client,
            runtime: None,
        })
    }

    /// Spawns transfers on `runtime` instead of the caller's current runtime.
    ///
    /// Needed when operations are started from threads outside Tokio.
    #[must_use]
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }
}

impl Transport for HttpTransport {
    fn open(
        &self,
        request: &DownloadRequest,
        events: TransferEvents,
    ) -> Result<Box<dyn TransferHandle>, TransportError> {
        let runtime = match &self.runtime {
            Some(runtime) => runtime.clone(),
            None => Handle::try_current()
                .map_err(|e| TransportError::open(request.url().as_str(), e.to_string()))?,
        };
        let token = CancellationToken::new();
        runtime.spawn(run_transfer(
            self.client.clone(),
            request.clone(),
            events,
            token.clone(),
        ));
        Ok(Box::new(HttpTransferHandle { token }))
    }
}

/// Handle to a spawned HTTP transfer.
#[derive(Debug)]
struct HttpTransferHandle {
    token: CancellationToken,
}

impl TransferHandle for HttpTransferHandle {
    fn cancel(&self) {
        self.token.cancel();
    }
}

#[instrument(skip_all, fields(url = %request.url()))]
async fn run_transfer(
    client: Client,
    request: DownloadRequest,
    events: TransferEvents,
    token: CancellationToken,
) {
    tokio::select! {
        () = token.cancelled() => debug!("transfer cancelled"),
        () = drive_transfer(&client, &request, &events) => {}
    }
}

async fn drive_transfer(client: &Client, request: &DownloadRequest, events: &TransferEvents) {
    let url = request.url().as_str();
    let mut answer: Option<(HeaderName, HeaderValue)> = None;
    let mut failures: u32 = 0;

    let response = loop {
        let response = match send_request(client, request, answer.clone()).await {
            Ok(response) => response,
            Err(error) => {
                events.send(TransferEvent::failure(error));
                return;
            }
        };
        let Some(challenge) = challenge_for(&response, request, failures) else {
            break response;
        };
        if failures >= MAX_CHALLENGE_ROUNDS {
            warn!(host = %challenge.host, failures, "giving up on authentication challenge");
            break response;
        }
        match events.challenge(&challenge) {
            ChallengeDisposition::UseCredential(credential) => {
                debug!(
                    host = %challenge.host,
                    user = credential.user(),
                    proxy = challenge.proxy,
                    "retrying with credential"
                );
                let header = if challenge.proxy {
                    PROXY_AUTHORIZATION
                } else {
                    AUTHORIZATION
                };
                match basic_authorization(&credential) {
                    Ok(value) => answer = Some((header, value)),
                    Err(message) => {
                        events.send(TransferEvent::failure(TransportError::other(url, message)));
                        return;
                    }
                }
                failures += 1;
            }
            ChallengeDisposition::Cancel => {
                events.send(TransferEvent::failure(TransportError::challenge_cancelled(
                    url,
                    challenge.host,
                )));
                return;
            }
            ChallengeDisposition::PerformDefaultHandling
            | ChallengeDisposition::RejectProtectionSpace => break response,
        }
    };

    let metadata = ResponseMetadata::new(response.status().as_u16(), response.headers().clone());
    if !events.send(TransferEvent::ResponseReceived(metadata)) {
        debug!("operation stopped accepting events after response");
        return;
    }

    let mut stream = response.bytes_stream();
    let mut cumulative_bytes: u64 = 0;
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(chunk) => {
                cumulative_bytes += chunk.len() as u64;
                if !events.send(TransferEvent::DataReceived {
                    chunk,
                    cumulative_bytes,
                }) {
                    debug!(bytes = cumulative_bytes, "operation stopped accepting data");
                    return;
                }
            }
            Err(error) => {
                events.send(TransferEvent::failure(TransportError::from_reqwest(url, error)));
                return;
            }
        }
    }

    info!(bytes = cumulative_bytes, "transfer complete");
    events.send(TransferEvent::success());
}

async fn send_request(
    client: &Client,
    request: &DownloadRequest,
    answer: Option<(HeaderName, HeaderValue)>,
) -> Result<Response, TransportError> {
    let mut builder = client
        .request(request.method().clone(), request.url().clone())
        .headers(request.headers().clone());
    if let Some((name, value)) = answer {
        builder = builder.header(name, value);
    }
    builder
        .send()
        .await
        .map_err(|e| TransportError::from_reqwest(request.url().as_str(), e))
}

/// Encodes `credential` as a sensitive `Basic` header value.
fn basic_authorization(credential: &Credential) -> Result<HeaderValue, String> {
    let raw = format!(
        "{}:{}",
        credential.user(),
        credential.password().unwrap_or_default()
    );
    let mut value = HeaderValue::from_str(&format!("Basic {}", STANDARD.encode(raw)))
        .map_err(|e| format!("invalid credential header: {e}"))?;
    value.set_sensitive(true);
    Ok(value)
}

/// Builds a challenge from a `401` or `407` response, if it advertises one.
fn challenge_for(
    response: &Response,
    request: &DownloadRequest,
    previous_failure_count: u32,
) -> Option<Challenge> {
    let (header, proxy) = match response.status() {
        StatusCode::UNAUTHORIZED => (WWW_AUTHENTICATE, false),
        StatusCode::PROXY_AUTHENTICATION_REQUIRED => (PROXY_AUTHENTICATE, true),
        _ => return None,
    };
    let value = response.headers().get(header)?.to_str().ok()?;
    Some(Challenge::from_header(
        value,
        request.host(),
        proxy,
        previous_failure_count,
    ))
}
