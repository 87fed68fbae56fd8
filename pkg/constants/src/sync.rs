//! Sync runner defaults.

/// Minimum gap between successive sync executions, in seconds.
pub const DEFAULT_MIN_SYNC_PERIOD_SECS: u64 = 3;

/// Forced sync interval when nothing kicked the runner, in seconds.
pub const DEFAULT_SYNC_PERIOD_SECS: u64 = 30;

/// Back-to-back executions allowed after an idle period.
pub const DEFAULT_BURST_SYNCS: u32 = 2;

/// Events the in-memory watch source keeps for late subscribers.
pub const DEFAULT_EVENT_LOG_SIZE: usize = 4096;
