//! Scheduler constants for balance sync.

use std::time::Duration;

/// Periodic balance poll cadence in seconds.
pub const BALANCE_POLL_INTERVAL_SECS: u64 = 30;

/// Maximum jitter (seconds) added to periodic poll intervals.
pub const BALANCE_POLL_JITTER_SECS: u64 = 5;

/// How long a cached balance counts as fresh.
pub const BALANCE_FRESHNESS: Duration = Duration::from_secs(30);

/// How long a persisted session record stays valid.
pub const SESSION_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Upper bound on waiting for another caller's in-flight sync.
pub const SYNC_WAIT_TIMEOUT: Duration = Duration::from_secs(15);

/// Client-enforced timeout for one remote call.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
