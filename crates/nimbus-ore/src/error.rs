//! The error taxonomy shared across every nimbus component.
//!
//! Every lower layer (the KV backend, the hook runner, the health
//! agent's RPC surface) ultimately classifies its failures into one of
//! these kinds so that a caller can decide, generically, whether to
//! retry, surface a degraded observation, or fail the operation outright.

use std::fmt;

/// A classification of failure independent of any particular
/// component's representation. Individual crates wrap this in their own
/// `thiserror` enum (see e.g. `nimbus_kv::KvError`) rather than using it
/// bare, so that error messages stay component-specific.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The entity does not exist. Always safe to treat as empty.
    NotFound,
    /// A create would conflict with an existing entity.
    AlreadyExists,
    /// An optimistic-concurrency compare-and-swap observed a value other
    /// than the one the caller expected.
    CompareFailed,
    /// A permanent input error. Never retried.
    BadParameter,
    /// A transient failure, typically a network or connection problem.
    /// Safe to retry with backoff within a bounded window.
    ConnectionProblem,
    /// An operation exceeded its deadline. Callers that produce
    /// observations (rather than hard failures) should downgrade this to
    /// a `Degraded`/`Unknown` status rather than propagating an error.
    Timeout,
    /// A panic was caught and converted into this error rather than
    /// unwinding past the component boundary.
    Panic,
}

impl ErrorKind {
    /// Whether a caller may reasonably retry an operation that failed
    /// with this kind. Only `ConnectionProblem` is retryable; everything
    /// else is either permanent or requires an explicit CAS retry loop
    /// with the caller re-reading the conflicting value first.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::ConnectionProblem)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::NotFound => "not found",
            ErrorKind::AlreadyExists => "already exists",
            ErrorKind::CompareFailed => "compare failed",
            ErrorKind::BadParameter => "bad parameter",
            ErrorKind::ConnectionProblem => "connection problem",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Panic => "panic",
        };
        f.write_str(s)
    }
}
