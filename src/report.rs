//! Run summaries printed after the shared transfer finishes.

use std::fmt::Write as _;
use std::path::PathBuf;

use serde::Serialize;
use shared_fetch_core::{Completion, OperationState, SubscriptionToken};

/// How a single subscriber's run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum Outcome {
    /// No completion arrived.
    Pending,
    Succeeded,
    Failed,
    Cancelled,
    /// The subscriber left before completion.
    Detached,
}

impl Outcome {
    /// Returns a stable lowercase label.
    pub(crate) fn label(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Detached => "detached",
        }
    }
}

/// What one subscriber observed.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct SubscriberReport {
    pub(crate) token: u64,
    pub(crate) outcome: Outcome,
    pub(crate) progress_events: u64,
    pub(crate) bytes_seen: u64,
    pub(crate) saw_cancel: bool,
    pub(crate) error: Option<String>,
}

impl SubscriberReport {
    pub(crate) fn new(token: SubscriptionToken) -> Self {
        Self {
            token: token.as_u64(),
            outcome: Outcome::Pending,
            progress_events: 0,
            bytes_seen: 0,
            saw_cancel: false,
            error: None,
        }
    }

    /// Records the terminal notification.
    pub(crate) fn record_completion(&mut self, completion: &Completion) {
        match &completion.outcome {
            Ok(_) => self.outcome = Outcome::Succeeded,
            Err(error) => {
                self.outcome = if error.is_cancelled() {
                    Outcome::Cancelled
                } else {
                    Outcome::Failed
                };
                self.error = Some(error.to_string());
            }
        }
    }
}

/// Summary of the whole run.
#[derive(Debug, Serialize)]
pub(crate) struct RunSummary {
    pub(crate) url: String,
    pub(crate) state: OperationState,
    pub(crate) status: Option<u16>,
    pub(crate) bytes_received: u64,
    pub(crate) expected_size: Option<u64>,
    pub(crate) not_modified: bool,
    pub(crate) output: Option<PathBuf>,
    pub(crate) subscribers: Vec<SubscriberReport>,
}

impl RunSummary {
    /// The process exits successfully only when the transfer succeeded.
    pub(crate) fn succeeded(&self) -> bool {
        self.state == OperationState::Succeeded
    }

    /// Renders a human-readable multi-line summary.
    pub(crate) fn render_text(&self) -> String {
        let mut out = String::new();
        let status = self
            .status
            .map_or_else(|| "-".to_string(), |s| s.to_string());
        let _ = writeln!(
            out,
            "{} {} (HTTP {status}, {} bytes)",
            self.state, self.url, self.bytes_received
        );
        if self.not_modified {
            let _ = writeln!(out, "  not modified; reuse cached data");
        }
        if let Some(path) = &self.output {
            let _ = writeln!(out, "  saved to {}", path.display());
        }
        for sub in &self.subscribers {
            let _ = write!(
                out,
                "  #{} {}: {} progress events, {} bytes",
                sub.token,
                sub.outcome.label(),
                sub.progress_events,
                sub.bytes_seen
            );
            if let Some(error) = &sub.error {
                let _ = write!(out, " ({error})");
            }
            out.push('\n');
        }
        out
    }
}
