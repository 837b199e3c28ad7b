//! CLI entry point for the shared-fetch tool.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::ProgressBar;
use shared_fetch_core::{
    Completion, Credential, DownloadOperation, DownloadRequest, HttpTransport, OperationEvent,
    OperationState, SubscriberEvent, SubscriptionToken,
};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

mod app_config;
mod cli;
mod progress;
mod report;

use app_config::{load_default_file_config, resolve_http_timeouts, resolve_options};
use cli::Args;
use progress::SubscriberBars;
use report::{Outcome, RunSummary, SubscriberReport};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();
    init_tracing(&args);

    let loaded = load_default_file_config()?;
    debug!(path = ?loaded.path, found = loaded.config.is_some(), "configuration resolved");
    let options = resolve_options(&args, loaded.config.as_ref());
    let timeouts = resolve_http_timeouts(loaded.config.as_ref());
    debug!(?options, ?timeouts, "download options");

    let mut request = DownloadRequest::parse(&args.url)?;
    for (name, value) in &args.headers {
        request = request.with_header(name.clone(), value.clone());
    }

    let transport = HttpTransport::with_timeouts(timeouts.connect_secs, timeouts.read_secs)?;
    let operation = DownloadOperation::new(request, options, Arc::new(transport));
    if let Some(user) = &args.user {
        operation.set_credential(Some(Credential::new(user.clone(), args.password.clone())));
    }

    let mut lifecycle = operation.events();
    let bars = SubscriberBars::new(!args.json && !args.quiet);
    let mut observers = JoinSet::new();
    for _ in 0..args.subscribers {
        let (token, rx) = operation.subscribe_channel(false)?;
        let bar = bars.add(token);
        observers.spawn(observe(
            operation.clone(),
            token,
            rx,
            bar,
            args.detach_after,
        ));
    }

    info!(url = %args.url, subscribers = args.subscribers, "starting shared download");
    operation.start();
    let state = wait_for_finish(&mut lifecycle, &operation).await;

    let mut subscribers = Vec::with_capacity(usize::from(args.subscribers));
    let mut completion: Option<Completion> = None;
    while let Some(joined) = observers.join_next().await {
        let (report, done) = joined.context("subscriber task failed")?;
        if completion.is_none() {
            completion = done;
        }
        subscribers.push(report);
    }
    subscribers.sort_by_key(|report| report.token);

    let payload = completion.as_ref().and_then(|c| c.outcome.as_ref().ok());
    let mut output = None;
    if let Some(path) = &args.output {
        match payload.and_then(|p| p.data.as_ref()) {
            Some(data) => {
                tokio::fs::write(path, data)
                    .await
                    .with_context(|| format!("Failed to write '{}'", path.display()))?;
                info!(path = %path.display(), bytes = data.len(), "body written");
                output = Some(path.clone());
            }
            None => warn!(path = %path.display(), "no body to write"),
        }
    }

    let summary = RunSummary {
        url: args.url.clone(),
        state,
        status: operation.response().map(|r| r.status),
        bytes_received: operation.bytes_received(),
        expected_size: operation.expected_size(),
        not_modified: payload.is_some_and(|p| p.not_modified),
        output,
        subscribers,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else if !args.quiet {
        print!("{}", summary.render_text());
    }

    Ok(if summary.succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn init_tracing(args: &Args) {
    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Consumes one subscriber's notifications until it completes or detaches.
async fn observe(
    operation: DownloadOperation,
    token: SubscriptionToken,
    mut rx: UnboundedReceiver<SubscriberEvent>,
    bar: ProgressBar,
    detach_after: Option<u64>,
) -> (SubscriberReport, Option<Completion>) {
    let mut report = SubscriberReport::new(token);
    while let Some(event) = rx.recv().await {
        match event {
            SubscriberEvent::Progress(progress) => {
                report.progress_events += 1;
                report.bytes_seen = progress.received;
                progress::update(&bar, &progress);
                if detach_after.is_some_and(|limit| progress.received >= limit) {
                    operation.unsubscribe(token);
                    report.outcome = Outcome::Detached;
                    bar.abandon_with_message(Outcome::Detached.label());
                    debug!(%token, bytes = progress.received, "subscriber detached");
                    return (report, None);
                }
            }
            SubscriberEvent::Cancelled => report.saw_cancel = true,
            SubscriberEvent::Completed(completion) => {
                report.record_completion(&completion);
                bar.finish_with_message(report.outcome.label());
                return (report, Some(completion));
            }
        }
    }
    (report, None)
}

/// Waits for the operation's terminal lifecycle event.
async fn wait_for_finish(
    lifecycle: &mut broadcast::Receiver<OperationEvent>,
    operation: &DownloadOperation,
) -> OperationState {
    loop {
        match lifecycle.recv().await {
            Ok(OperationEvent::Finished { state }) => return state,
            Ok(event) => debug!(?event, "lifecycle"),
            Err(RecvError::Lagged(skipped)) => {
                debug!(skipped, "lifecycle receiver lagged");
                let state = operation.state();
                if state.is_finished() {
                    return state;
                }
            }
            Err(RecvError::Closed) => return operation.state(),
        }
    }
}
