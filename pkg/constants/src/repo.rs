//! Content repository client constants.

/// API prefix of the repository protocol (`GET /repo/{basepath}` and friends).
pub const DEFAULT_REPO_API_PATH: &str = "/repo";

/// Per-attempt request timeout, in seconds.
pub const REQUEST_TIMEOUT_SECS: u64 = 5;

/// Idle connection lifetime in the HTTP pool, in seconds.
pub const POOL_IDLE_TIMEOUT_SECS: u64 = 60;

/// Idle connections kept per host.
pub const POOL_MAX_IDLE_PER_HOST: usize = 10;

/// Batch retry: first backoff delay, in milliseconds.
pub const RETRY_INITIAL_DELAY_MS: u64 = 200;

/// Batch retry: backoff multiplier.
pub const RETRY_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Batch retry: backoff cap, in seconds.
pub const RETRY_MAX_DELAY_SECS: u64 = 30;

/// Batch retry: total attempts, including the first.
pub const RETRY_MAX_ATTEMPTS: u32 = 5;
