//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;
use reqwest::header::{HeaderName, HeaderValue};

use shared_fetch_core::RejectionPolicy;

/// Maximum number of simulated subscribers.
pub const MAX_SUBSCRIBERS: u8 = 64;

/// Download one URL on behalf of several concurrent subscribers.
///
/// Every subscriber shares the same transfer and receives its own progress
/// stream and exactly one completion.
#[derive(Parser, Debug)]
#[command(name = "shared-fetch")]
#[command(author, version, about)]
pub struct Args {
    /// URL to download
    pub url: String,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Number of subscribers attached to the shared transfer (1-64)
    #[arg(
        short = 's',
        long,
        default_value_t = 1,
        value_parser = clap::value_parser!(u8).range(1..=i64::from(MAX_SUBSCRIBERS))
    )]
    pub subscribers: u8,

    /// Detach each subscriber once it has seen this many bytes
    #[arg(long, value_name = "BYTES")]
    pub detach_after: Option<u64>,

    /// Cancel the transfer when the last subscriber detaches
    #[arg(long)]
    pub auto_cancel: bool,

    /// Mark the payload for decompression by the consumer
    #[arg(long)]
    pub decompress: bool,

    /// Bypass caches and finish without data on a cache-served response
    #[arg(long)]
    pub ignore_cached: bool,

    /// Treat 304 Not Modified as success
    #[arg(long)]
    pub not_modified_aware: bool,

    /// Status codes that abort the transfer, e.g. "400-599,304"
    #[arg(long, value_name = "RANGES")]
    pub reject_status: Option<RejectionPolicy>,

    /// Username offered to authentication challenges
    #[arg(long)]
    pub user: Option<String>,

    /// Password offered with --user
    #[arg(long, requires = "user")]
    pub password: Option<String>,

    /// Extra request header, e.g. -H 'Accept: image/png' (repeatable)
    #[arg(short = 'H', long = "header", value_name = "NAME: VALUE", value_parser = parse_header)]
    pub headers: Vec<(HeaderName, HeaderValue)>,

    /// Write the downloaded body to this file
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Print a JSON summary instead of progress bars
    #[arg(long)]
    pub json: bool,
}

/// Splits a `Name: Value` header argument.
fn parse_header(raw: &str) -> Result<(HeaderName, HeaderValue), String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected 'Name: Value', got '{raw}'"))?;
    let name = HeaderName::from_bytes(name.trim().as_bytes()).map_err(|e| e.to_string())?;
    let value = HeaderValue::from_str(value.trim()).map_err(|e| e.to_string())?;
    Ok((name, value))
}
