//! Constants for the operation module (timeouts, transport limits).

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout (5 minutes for large resources).
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Maximum authentication rounds the HTTP transport attempts for one request.
pub const MAX_CHALLENGE_ROUNDS: u32 = 3;

/// Capacity of the lifecycle event broadcast channel.
pub const LIFECYCLE_CHANNEL_CAPACITY: usize = 16;

/// Status code for a conditional request whose cached copy is still valid.
pub const STATUS_NOT_MODIFIED: u16 = 304;
