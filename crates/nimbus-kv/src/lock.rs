//! Shared lock-row semantics used by both drivers: a lock is just a
//! regular key under the caller's chosen prefix (conventionally
//! `locks/<name>`), created with `create` and held until deleted or its
//! TTL lapses. This module only holds the shared polling constant; the
//! actual acquire/try-acquire logic lives on each driver since it needs
//! driver-specific atomicity (a SQLite transaction vs. a Postgres
//! `INSERT ... ON CONFLICT DO NOTHING`).

use std::time::Duration;

/// The fixed backoff `acquireLock` polls with while a lock is held by
/// another holder. Matches the fixed (non-exponential) backoff the
/// contract specifies, since lock contention is expected to be brief
/// and exponential backoff would only slow down the common case.
pub const DEFAULT_LOCK_POLL_INTERVAL: Duration = Duration::from_millis(100);
