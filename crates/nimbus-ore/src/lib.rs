//! Internal utility library for the nimbus workspace.
//!
//! Every other `nimbus-*` crate depends on this one for the ambient
//! concerns that aren't specific to any single component: structured
//! logging setup, a shared Prometheus registry, the cross-cutting error
//! taxonomy from the error handling design, retry helpers, and small
//! task-spawning conveniences. Keep this crate's own dependency surface
//! small; if a dependency is only needed by one feature, gate it behind
//! a feature flag rather than pulling it in for everyone.

pub mod error;
pub mod logging;
pub mod metrics;
pub mod now;
pub mod retry;
pub mod task;
