//! Behavioral options for a download operation.

use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

/// Flags that change how an operation reacts to its subscribers and responses.
///
/// Every flag defaults to `false`; the rejection policy defaults to empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadOptions {
    /// Keep running when the host application moves to the background.
    pub allow_background_execution: bool,
    /// Cancel the transfer as soon as the last subscriber detaches.
    pub auto_cancel_when_unobserved: bool,
    /// Ask the external decoder to decompress the final payload.
    pub should_decompress_result: bool,
    /// Bypass HTTP caches and finish without data on a cache-served response.
    pub ignore_cached_response: bool,
    /// Treat `304 Not Modified` as success so the caller reuses its cached bytes.
    pub retrieve_existing_data_when_not_modified: bool,
    /// Status codes that terminate the transfer as soon as headers arrive.
    pub rejection: RejectionPolicy,
}

impl DownloadOptions {
    /// Creates options with every flag disabled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets [`auto_cancel_when_unobserved`](Self::auto_cancel_when_unobserved).
    #[must_use]
    pub fn auto_cancel_when_unobserved(mut self, enabled: bool) -> Self {
        self.auto_cancel_when_unobserved = enabled;
        self
    }

    /// Sets [`allow_background_execution`](Self::allow_background_execution).
    #[must_use]
    pub fn allow_background_execution(mut self, enabled: bool) -> Self {
        self.allow_background_execution = enabled;
        self
    }

    /// Sets [`should_decompress_result`](Self::should_decompress_result).
    #[must_use]
    pub fn should_decompress_result(mut self, enabled: bool) -> Self {
        self.should_decompress_result = enabled;
        self
    }

    /// Sets [`ignore_cached_response`](Self::ignore_cached_response).
    #[must_use]
    pub fn ignore_cached_response(mut self, enabled: bool) -> Self {
        self.ignore_cached_response = enabled;
        self
    }

    /// Sets [`retrieve_existing_data_when_not_modified`](Self::retrieve_existing_data_when_not_modified).
    #[must_use]
    pub fn retrieve_existing_data_when_not_modified(mut self, enabled: bool) -> Self {
        self.retrieve_existing_data_when_not_modified = enabled;
        self
    }

    /// Replaces the rejection policy.
    #[must_use]
    pub fn with_rejection(mut self, rejection: RejectionPolicy) -> Self {
        self.rejection = rejection;
        self
    }
}

/// Status-code predicate deciding whether a response is rejected outright.
///
/// Membership is pure configuration: an empty policy accepts every status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RejectionPolicy {
    ranges: Vec<RangeInclusive<u16>>,
}

impl RejectionPolicy {
    /// Creates a policy that rejects nothing.
    #[must_use]
    pub fn accept_all() -> Self {
        Self::default()
    }

    /// Adds an inclusive range of rejected status codes.
    #[must_use]
    pub fn reject_range(mut self, range: RangeInclusive<u16>) -> Self {
        self.ranges.push(range);
        self
    }

    /// Adds a single rejected status code.
    #[must_use]
    pub fn reject_status(self, status: u16) -> Self {
        self.reject_range(status..=status)
    }

    /// Returns true when `status` falls into any configured range.
    #[must_use]
    pub fn rejects(&self, status: u16) -> bool {
        self.ranges.iter().any(|range| range.contains(&status))
    }

    /// Returns true when no status is rejected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

/// Error parsing a rejection policy string such as `"400-599,304"`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid status range '{0}': expected a code like 404 or a range like 400-599")]
pub struct ParseRejectionError(String);

impl FromStr for RejectionPolicy {
    type Err = ParseRejectionError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let mut policy = Self::default();
        for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let parse = |s: &str| {
                s.trim()
                    .parse::<u16>()
                    .ok()
                    .filter(|code| (100..=599).contains(code))
                    .ok_or_else(|| ParseRejectionError(part.to_string()))
            };
            policy = match part.split_once('-') {
                Some((start, end)) => {
                    let (start, end) = (parse(start)?, parse(end)?);
                    if start > end {
                        return Err(ParseRejectionError(part.to_string()));
                    }
                    policy.reject_range(start..=end)
                }
                None => policy.reject_status(parse(part)?),
            };
        }
        Ok(policy)
    }
}

impl fmt::Display for RejectionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .ranges
            .iter()
            .map(|range| {
                if range.start() == range.end() {
                    range.start().to_string()
                } else {
                    format!("{}-{}", range.start(), range.end())
                }
            })
            .collect();
        f.write_str(&parts.join(","))
    }
}
