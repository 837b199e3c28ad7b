//! Per-subscriber progress bars.

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use shared_fetch_core::{Progress, SubscriptionToken};

/// One bar per subscriber, stacked in a single multi-bar display.
pub(crate) struct SubscriberBars {
    multi: MultiProgress,
}

impl SubscriberBars {
    /// Creates the display; when `visible` is false every bar draws nowhere.
    pub(crate) fn new(visible: bool) -> Self {
        let multi = MultiProgress::new();
        if !visible {
            multi.set_draw_target(ProgressDrawTarget::hidden());
        }
        Self { multi }
    }

    /// Adds a bar labelled with the subscriber's token.
    pub(crate) fn add(&self, token: SubscriptionToken) -> ProgressBar {
        let bar = self.multi.add(ProgressBar::new(0));
        bar.set_style(
            ProgressStyle::with_template("{prefix:>4} [{bar:30}] {bytes}/{total_bytes} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        bar.set_prefix(token.to_string());
        bar
    }
}

/// Moves `bar` to the subscriber's latest progress.
pub(crate) fn update(bar: &ProgressBar, progress: &Progress) {
    if let Some(expected) = progress.expected {
        bar.set_length(expected);
    } else if progress.received > bar.length().unwrap_or(0) {
        bar.set_length(progress.received);
    }
    bar.set_position(progress.received);
}
